use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake};
use std::thread::{self, Thread};
use std::time::Duration;

use futures::FutureExt;

use crate::error::{ExecutorError, Result};

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Blocks the current thread until a future completes, parking between polls.
pub struct Parker {
    thread: Thread,
    parked: AtomicBool,
}

impl Parker {
    /// Creates a parker bound to the calling thread.
    ///
    /// Starts out parked so a wakeup that lands between polling and
    /// parking is not lost.
    pub fn new() -> Arc<Self> {
        Arc::new(Parker {
            thread: thread::current(),
            parked: AtomicBool::new(true),
        })
    }

    pub fn block_on<F: Future>(self: &Arc<Self>, fut: F) -> F::Output {
        self.parked.store(true, Ordering::Relaxed);

        let waker = Arc::clone(self).into();
        let mut cx = Context::from_waker(&waker);
        let mut fut = pin!(fut);

        loop {
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(res) => break res,
                Poll::Pending => {
                    while self.parked.swap(true, Ordering::Acquire) {
                        thread::park();
                    }
                }
            }
        }
    }
}

impl Wake for Parker {
    fn wake(self: Arc<Self>) {
        if self.parked.swap(false, Ordering::Release) {
            self.thread.unpark();
        }
    }
}

/// Pool of worker threads, each driving one connection future at a time.
///
/// A task is handed to an idle worker if there is one; otherwise a new
/// worker is spawned. Without `max_workers` the pool grows with the number
/// of in-flight connections. With a cap, tasks beyond it wait in the queue.
/// Idle workers exit after `keep_alive`.
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    keep_alive: Duration,
    shared: Mutex<Shared>,
    max_workers: Option<usize>,
    condvar: Condvar,
}

struct Shared {
    queue: VecDeque<Task>,
    /// Live worker threads
    workers: usize,
    /// Workers waiting on the condvar
    idle: usize,
    /// Idle workers that have been handed work but not yet woken
    notified: usize,
}

impl Executor {
    pub fn new(max_workers: Option<usize>, keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    notified: 0,
                }),
                condvar: Condvar::new(),
                keep_alive,
                max_workers,
            }),
        }
    }

    /// Queues a future to run on a worker thread.
    ///
    /// Failures to schedule are logged, not returned; the future is dropped.
    pub fn execute<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Err(e) = self.schedule(Box::pin(fut)) {
            log::error!("failed to schedule connection task: {}", e);
        }
    }

    fn schedule(&self, task: Task) -> Result<()> {
        let mut shared = self
            .inner
            .shared
            .lock()
            .map_err(|_| ExecutorError::LockPoisoned)?;

        shared.queue.push_back(task);

        if shared.idle > shared.notified {
            shared.notified += 1;
            self.inner.condvar.notify_one();
        } else if self.inner.max_workers.map_or(true, |max| shared.workers < max) {
            shared.workers += 1;
            if let Err(e) = self.spawn_worker() {
                shared.workers -= 1;
                shared.queue.pop_back();
                return Err(e);
            }
        }
        Ok(())
    }

    fn spawn_worker(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("lineserve-worker".to_owned())
            .spawn(move || {
                if let Err(e) = inner.run() {
                    log::error!("worker thread error: {}", e);
                }
            })
            .map_err(ExecutorError::ThreadSpawn)?;
        Ok(())
    }

    /// Number of live worker threads.
    pub fn workers(&self) -> usize {
        self.inner
            .shared
            .lock()
            .map(|shared| shared.workers)
            .unwrap_or(0)
    }
}

impl Inner {
    /// Worker loop: drain the queue, then wait for work until `keep_alive`
    /// passes without any.
    fn run(&self) -> Result<()> {
        let parker = Parker::new();
        let mut shared = self.shared.lock().map_err(|_| ExecutorError::LockPoisoned)?;

        'alive: loop {
            while let Some(task) = shared.queue.pop_front() {
                drop(shared);
                if parker.block_on(AssertUnwindSafe(task).catch_unwind()).is_err() {
                    log::error!("connection task panicked");
                }
                shared = self.shared.lock().map_err(|_| ExecutorError::LockPoisoned)?;
            }

            shared.idle += 1;

            loop {
                let (guard, timeout) = self
                    .condvar
                    .wait_timeout(shared, self.keep_alive)
                    .map_err(|_| ExecutorError::LockPoisoned)?;
                shared = guard;

                if shared.notified != 0 {
                    shared.notified -= 1;
                    shared.idle -= 1;
                    continue 'alive;
                }

                if timeout.timed_out() {
                    break 'alive;
                }
            }
        }

        shared.idle -= 1;
        shared.workers -= 1;
        log::debug!("idle worker exiting, {} left", shared.workers);
        Ok(())
    }
}
