//! Per-connection request handling.
//!
//! A connection moves through `AwaitingRequest → Routing → Handling →
//! Responding → Closed`. The serving future owns the stream, so it is
//! closed exactly once whichever way the request ends.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ConnectionError, HandlerError};
use crate::http::{Request, Response, Status};
use crate::route::RouteTable;

/// How a request ended.
#[derive(Debug)]
pub enum Outcome {
    /// The handler completed; carries its response buffer
    Success(Response),
    /// No route matched the path
    NotFound,
    /// The matched handler failed or panicked
    Failure(HandlerError),
}

impl Outcome {
    pub fn status(&self) -> Status {
        match self {
            Outcome::Success(_) => Status::Ok,
            Outcome::NotFound => Status::NotFound,
            Outcome::Failure(_) => Status::ServerError,
        }
    }

    /// Body sent to the client. Failure details are never included.
    pub fn body(&self) -> &[u8] {
        match self {
            Outcome::Success(response) => response.as_bytes(),
            other => other.status().canned_body().unwrap_or_default().as_bytes(),
        }
    }

    /// Full response bytes: head followed by body.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = self.status().head().into_bytes();
        wire.extend_from_slice(self.body());
        wire
    }
}

/// Routes one request per connection against a shared, frozen route table.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    max_request_line: usize,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteTable>, max_request_line: usize) -> Self {
        Self {
            routes,
            max_request_line,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Resolves the request and runs the matched handler.
    pub fn dispatch(&self, request: &Request) -> Outcome {
        let Some(found) = self.routes.resolve(request.path()) else {
            log::debug!("no route for /{}", request.path());
            return Outcome::NotFound;
        };

        let mut response = Response::new();
        let handler = found.handler;
        let params = found.params;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(request, &mut response, params)
        }));

        let error = match result {
            Ok(Ok(())) => return Outcome::Success(response),
            Ok(Err(e)) => e,
            Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
        };

        log::error!("route {:?} failed for /{}: {}", found.template, request.path(), error);
        Outcome::Failure(error)
    }

    /// Serves a single request on `stream`, then shuts it down.
    ///
    /// Returns the status written, or the I/O failure that ended the
    /// connection early.
    pub async fn serve<S>(&self, stream: S, peer: Option<SocketAddr>) -> Result<Status, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(stream).take(self.max_request_line as u64);
        let mut line = Vec::new();

        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(ConnectionError::Read)?;
        if read == 0 {
            return Err(ConnectionError::Disconnected);
        }

        let request = Request::new(String::from_utf8_lossy(&line), peer);
        match peer {
            Some(peer) => log::info!("[{}] /{}", peer, request.path()),
            None => log::info!("[] /{}", request.path()),
        }

        let outcome = self.dispatch(&request);

        let mut stream = reader.into_inner().into_inner();
        stream
            .write_all(&outcome.to_wire())
            .await
            .map_err(ConnectionError::Write)?;
        stream.shutdown().await.map_err(ConnectionError::Write)?;

        Ok(outcome.status())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::handler_fn;
    use futures::executor::block_on;
    use tokio::io::duplex;

    fn dispatcher() -> Dispatcher {
        let mut routes = RouteTable::new();
        routes.register(
            "users/:username/books/:book-id",
            handler_fn(|_, res, params| {
                res.write(format!("<p style='color:red;'>{} wrote {}</p>", params[0], params[1]));
                Ok(())
            }),
        );
        routes.register("action_man", handler_fn(|_, res, _| {
            res.write("<h1>WOO!</h1>");
            Ok(())
        }));
        routes.register("oh_no", handler_fn(|_, _, _| Err(HandlerError::msg("no such method"))));
        routes.register("panics", handler_fn(|_, res, _| {
            res.write("partial");
            panic!("handler blew up");
        }));
        Dispatcher::new(Arc::new(routes), 8192)
    }

    fn request(line: &str) -> Request {
        Request::new(line, None)
    }

    /// Tests that a matched handler's buffer becomes the body of a 200.
    #[test]
    fn test_dispatch_success() {
        let outcome = dispatcher().dispatch(&request("GET /users/alice/books/42 HTTP/1.1\r\n"));

        assert_eq!(outcome.status(), Status::Ok);
        assert_eq!(outcome.body(), b"<p style='color:red;'>alice wrote 42</p>");
    }

    /// Tests that an unmatched path is a 404 with the fixed body.
    #[test]
    fn test_dispatch_not_found() {
        let outcome = dispatcher().dispatch(&request("GET /nowhere HTTP/1.1\r\n"));

        assert!(matches!(outcome, Outcome::NotFound));
        assert_eq!(
            outcome.to_wire(),
            b"HTTP/1.1 404/NOT FOUND\r\nContent-type:text/html\r\n\r\n404 - Not Found"
        );
    }

    /// Tests that a handler error is a 500 and its detail is not sent.
    #[test]
    fn test_dispatch_handler_error() {
        let outcome = dispatcher().dispatch(&request("GET /oh_no HTTP/1.1\r\n"));

        assert!(matches!(outcome, Outcome::Failure(HandlerError::Failed(_))));
        assert_eq!(outcome.body(), b"500 - Server Error");
    }

    /// Tests that a panicking handler is contained and partial output discarded.
    #[test]
    fn test_dispatch_handler_panic() {
        let outcome = dispatcher().dispatch(&request("GET /panics HTTP/1.1\r\n"));

        match &outcome {
            Outcome::Failure(HandlerError::Panicked(message)) => {
                assert_eq!(message, "handler blew up")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(outcome.body(), b"500 - Server Error");
    }

    /// Tests a full exchange over an in-memory stream.
    #[test]
    fn test_serve_writes_response_and_closes() {
        let dispatcher = dispatcher();
        let (mut client, server) = duplex(1024);

        block_on(async {
            client.write_all(b"GET /action_man HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

            let status = dispatcher.serve(server, None).await.unwrap();
            assert_eq!(status, Status::Ok);

            let mut wire = String::new();
            client.read_to_string(&mut wire).await.unwrap();
            assert_eq!(wire, "HTTP/1.1 200/OK\r\nContent-type:text/html\r\n\r\n<h1>WOO!</h1>");
        });
    }

    /// Tests that a client that sends nothing gets nothing back.
    #[test]
    fn test_serve_disconnected() {
        let dispatcher = dispatcher();
        let (client, server) = duplex(64);
        drop(client);

        let result = block_on(dispatcher.serve(server, None));
        assert!(matches!(result, Err(ConnectionError::Disconnected)));
    }

    /// Tests that an overlong request line is cut at the configured limit.
    #[test]
    fn test_serve_caps_request_line() {
        let dispatcher = Dispatcher::new(dispatcher().routes, 12);
        let (mut client, server) = duplex(1024);

        block_on(async {
            client.write_all(b"GET /action_man HTTP/1.1\r\n").await.unwrap();

            // only "GET /action_" is read
            let status = dispatcher.serve(server, None).await.unwrap();
            assert_eq!(status, Status::NotFound);
        });
    }
}
