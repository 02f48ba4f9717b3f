//! Readiness reactor for client connections.
//!
//! A single `lineserve-reactor` thread blocks in `mio::Poll` and wakes the
//! task waiting on a connection when it becomes readable or writable.
//! [`Connection`] implements tokio's `AsyncRead`/`AsyncWrite` on top of it,
//! so the dispatcher can use tokio's buffered I/O helpers while each task is
//! driven by a plain worker thread.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{self as sys, Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use mio::{Events, Interest, Token};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::{ReactorError, ReactorResult};

const READ: usize = 0;
const WRITE: usize = 1;

#[derive(Clone)]
pub struct Reactor {
    shared: Arc<Shared>,
}

struct Shared {
    registry: mio::Registry,
    /// Next token to hand out
    token: AtomicUsize,
    /// Registered connections by token
    sources: Mutex<HashMap<Token, Arc<Source>>>,
}

/// Readiness state of one connection.
struct Source {
    token: Token,
    /// Task waiting on each direction
    interest: Mutex<[Option<Waker>; 2]>,
    /// Per direction: bit 0 is "ready", the rest counts readiness events.
    /// A task only clears the ready bit if no event arrived since it looked.
    readiness: [AtomicUsize; 2],
}

const READY: usize = 1;

impl Source {
    fn mark_ready(&self, direction: usize) {
        // bump the tick and set the ready bit in one step
        let _ = self.readiness[direction].fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(v.wrapping_add(2) | READY)
        });
    }

    /// Current readiness word if the direction is ready.
    fn ready(&self, direction: usize) -> Option<usize> {
        let word = self.readiness[direction].load(Ordering::Acquire);
        (word & READY == READY).then_some(word)
    }

    /// Clears the ready bit unless an event arrived after `observed` was read.
    fn clear(&self, direction: usize, observed: usize) {
        let _ = self.readiness[direction].compare_exchange(
            observed,
            observed & !READY,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Reactor {
    /// Creates a reactor and starts its event loop thread.
    pub fn new() -> ReactorResult<Self> {
        let poll = mio::Poll::new().map_err(ReactorError::Init)?;
        let shared = Arc::new(Shared {
            token: AtomicUsize::new(0),
            registry: poll.registry().try_clone().map_err(ReactorError::Init)?,
            sources: Mutex::new(HashMap::with_capacity(64)),
        });

        std::thread::Builder::new()
            .name("lineserve-reactor".to_owned())
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.run(poll)
            })
            .map_err(ReactorError::Init)?;

        Ok(Reactor { shared })
    }

    /// Switches an accepted stream to non-blocking mode and starts tracking it.
    pub fn register(&self, stream: sys::TcpStream, peer: SocketAddr) -> ReactorResult<Connection> {
        let registration = |source| ReactorError::Registration { peer, source };

        stream.set_nonblocking(true).map_err(registration)?;
        let mut sys = mio::net::TcpStream::from_std(stream);
        let token = Token(self.shared.token.fetch_add(1, Ordering::Relaxed));

        let source = Arc::new(Source {
            token,
            interest: Default::default(),
            readiness: Default::default(),
        });

        // tracked before registering so the first event, which may fire at once, finds it
        self.shared
            .sources
            .lock()
            .map_err(|_| ReactorError::LockPoisoned)?
            .insert(token, Arc::clone(&source));

        if let Err(e) = self
            .shared
            .registry
            .register(&mut sys, token, Interest::READABLE | Interest::WRITABLE)
        {
            self.forget(token);
            return Err(registration(e));
        }

        Ok(Connection {
            sys,
            peer,
            source,
            reactor: self.clone(),
        })
    }

    /// Number of connections currently registered.
    pub fn connections(&self) -> usize {
        self.shared
            .sources
            .lock()
            .map(|sources| sources.len())
            .unwrap_or(0)
    }

    fn forget(&self, token: Token) {
        if let Ok(mut sources) = self.shared.sources.lock() {
            sources.remove(&token);
        }
    }

    /// Ready with the readiness word, or Pending with the task's waker stored.
    fn poll_ready(&self, source: &Source, direction: usize, cx: &Context<'_>) -> Poll<io::Result<usize>> {
        if let Some(word) = source.ready(direction) {
            return Poll::Ready(Ok(word));
        }

        {
            let mut interest = source
                .interest
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, ReactorError::LockPoisoned))?;

            match &interest[direction] {
                Some(existing) if existing.will_wake(cx.waker()) => {}
                _ => interest[direction] = Some(cx.waker().clone()),
            }
        }

        // readiness may have arrived while the waker was being stored
        match source.ready(direction) {
            Some(word) => Poll::Ready(Ok(word)),
            None => Poll::Pending,
        }
    }
}

impl Shared {
    fn run(&self, mut poll: mio::Poll) {
        let mut events = Events::with_capacity(64);
        let mut wakers = Vec::new();

        loop {
            if let Err(err) = self.poll(&mut poll, &mut events, &mut wakers) {
                log::warn!("failed to poll reactor: {}", err);
            }
            events.clear();
        }
    }

    fn poll(&self, poll: &mut mio::Poll, events: &mut Events, wakers: &mut Vec<Waker>) -> ReactorResult<()> {
        if let Err(err) = poll.poll(events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(ReactorError::Polling(err));
        }

        for event in events.iter() {
            let source = {
                let sources = self.sources.lock().map_err(|_| ReactorError::LockPoisoned)?;
                match sources.get(&event.token()) {
                    Some(source) => Arc::clone(source),
                    None => continue,
                }
            };

            let mut interest = source.interest.lock().map_err(|_| ReactorError::LockPoisoned)?;

            // a closed peer counts as readable so the pending read sees EOF
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                if let Some(waker) = interest[READ].take() {
                    wakers.push(waker);
                }
                source.mark_ready(READ);
            }

            if event.is_writable() || event.is_write_closed() || event.is_error() {
                if let Some(waker) = interest[WRITE].take() {
                    wakers.push(waker);
                }
                source.mark_ready(WRITE);
            }
        }

        for waker in wakers.drain(..) {
            waker.wake();
        }

        Ok(())
    }
}

/// A non-blocking client connection registered with a [`Reactor`].
///
/// Dropping it deregisters and closes the socket.
pub struct Connection {
    sys: mio::net::TcpStream,
    peer: SocketAddr,
    reactor: Reactor,
    source: Arc<Source>,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Runs `f` once the reactor reports `direction` ready. A `WouldBlock`
    /// clears readiness, unless an event landed meanwhile, and parks the task
    /// until the next event.
    fn poll_io<T>(
        &self,
        direction: usize,
        mut f: impl FnMut() -> io::Result<T>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<T>> {
        loop {
            let observed = match self.reactor.poll_ready(&self.source, direction, cx)? {
                Poll::Ready(word) => word,
                Poll::Pending => return Poll::Pending,
            };

            match f() {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.source.clear(direction, observed);
                }
                val => return Poll::Ready(val),
            }
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let unfilled = buf.initialize_unfilled();

        match self.poll_io(READ, || (&self.sys).read(unfilled), cx) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.poll_io(WRITE, || (&self.sys).write(buf), cx)
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready((&self.sys).flush())
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.sys.shutdown(Shutdown::Write) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Poll::Ready(Ok(())),
            res => Poll::Ready(res),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reactor.forget(self.source.token);
        let _ = self.reactor.shared.registry.deregister(&mut self.sys);
    }
}
