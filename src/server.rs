use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ConnectionError, RouteError, ServerError};
use crate::executor::Executor;
use crate::net::Reactor;
use crate::route::{Handler, RouteTable};
use crate::static_files::StaticFiles;

/// The server: configuration plus the routes registered on it.
///
/// Routes are added with [`route`](Server::route) before the server is
/// bound; [`listen`](Server::listen) freezes them and hands them to every
/// connection.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    routes: RouteTable,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let routes = RouteTable::with_escaping(config.escape_literals);
        Self { config, routes }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Registers `handler` for `template`. Returns false if the template is
    /// absent or does not compile.
    pub fn route<'t, H: Handler>(&mut self, template: impl Into<Option<&'t str>>, handler: H) -> bool {
        self.routes.register(template, handler)
    }

    /// Like [`route`](Server::route), reporting why a template was rejected.
    pub fn try_route<'t, H: Handler>(
        &mut self,
        template: impl Into<Option<&'t str>>,
        handler: H,
    ) -> Result<(), RouteError> {
        self.routes.try_register(template, handler)
    }

    /// Serves files under the configured `static_root` for paths matching `template`.
    pub fn serve_static<'t>(&mut self, template: impl Into<Option<&'t str>>) -> bool {
        let files = StaticFiles::new(self.config.static_root.clone());
        self.route(template, files)
    }

    /// Binds the configured address.
    pub fn listen(self) -> Result<Listener, ServerError> {
        let addr = self.config.address();
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        log::info!(
            "listening on {} with {} routes",
            listener.local_addr()?,
            self.routes.len()
        );

        Ok(Listener {
            listener,
            reactor: Reactor::new()?,
            executor: Executor::new(self.config.max_workers, self.config.worker_keep_alive()),
            dispatcher: Arc::new(Dispatcher::new(
                Arc::new(self.routes),
                self.config.max_request_line,
            )),
        })
    }

    /// Binds and serves until the process exits.
    pub fn start(self) -> Result<(), ServerError> {
        self.listen()?.run()
    }
}

/// A bound server accepting connections.
pub struct Listener {
    listener: TcpListener,
    reactor: Reactor,
    executor: Executor,
    dispatcher: Arc<Dispatcher>,
}

impl Listener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, serving each on its own worker.
    ///
    /// Failures on one connection are logged and never stop the loop.
    pub fn run(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.spawn(stream, peer),
                Err(e) => log::warn!("failed to accept connection: {}", e),
            }
        }
    }

    fn spawn(&self, stream: std::net::TcpStream, peer: SocketAddr) {
        let conn = match self.reactor.register(stream, peer) {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("dropping connection: {}", e);
                return;
            }
        };

        log::debug!(
            "[{}] accepted ({} open, {} workers)",
            peer,
            self.reactor.connections(),
            self.executor.workers()
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        self.executor.execute(async move {
            let peer = conn.peer_addr();
            match dispatcher.serve(conn, Some(peer)).await {
                Ok(status) => log::debug!("[{}] {}", peer, status),
                Err(ConnectionError::Disconnected) => log::debug!("[{}] closed without a request", peer),
                Err(e) => log::warn!("[{}] {}", peer, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    use crate::error::HandlerError;
    use crate::route::handler_fn;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    fn start(server: Server) -> SocketAddr {
        let listener = server.listen().unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || listener.run());
        addr
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(stream, "GET /{} HTTP/1.1\r\n", path).unwrap();
        let mut wire = String::new();
        stream.read_to_string(&mut wire).unwrap();
        wire
    }

    fn books_server() -> Server {
        let mut server = Server::new(test_config());
        server.route(
            "users/:username/books/:book-id",
            handler_fn(|_, res, params| {
                res.write(format!("{} wrote {}", params[0], params[1]));
                Ok(())
            }),
        );
        server.route("oh_no", handler_fn(|_, _, _| Err(HandlerError::msg("undefined method"))));
        server
    }

    /// Tests that registration goes through to the route table.
    #[test]
    fn test_route_registration() {
        let mut server = books_server();
        assert_eq!(server.routes().len(), 2);

        assert!(!server.route(None, handler_fn(|_, _, _| Ok(()))));
        assert!(matches!(
            server.try_route(None, handler_fn(|_, _, _| Ok(()))),
            Err(RouteError::MissingTemplate)
        ));
        assert_eq!(server.routes().len(), 2);
    }

    /// Tests that binding an unusable address is reported.
    #[test]
    fn test_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..test_config()
        };

        let err = Server::new(config).listen().err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    /// Tests the three outcomes end to end over TCP.
    #[test]
    fn test_responses_over_tcp() {
        let addr = start(books_server());

        assert_eq!(
            get(addr, "users/alice/books/42"),
            "HTTP/1.1 200/OK\r\nContent-type:text/html\r\n\r\nalice wrote 42"
        );
        assert_eq!(
            get(addr, "missing"),
            "HTTP/1.1 404/NOT FOUND\r\nContent-type:text/html\r\n\r\n404 - Not Found"
        );
        assert_eq!(
            get(addr, "oh_no"),
            "HTTP/1.1 500/SERVER ERROR\r\nContent-type:text/html\r\n\r\n500 - Server Error"
        );
    }

    /// Tests that a client closing without a request does not disturb others.
    #[test]
    fn test_silent_client() {
        let addr = start(books_server());

        drop(TcpStream::connect(addr).unwrap());
        assert!(get(addr, "users/bob/books/7").ends_with("bob wrote 7"));
    }

    /// Tests that a stalled client does not block other connections.
    #[test]
    fn test_stalled_client_does_not_block() {
        let addr = start(books_server());

        let _stalled = TcpStream::connect(addr).unwrap();
        assert!(get(addr, "users/carol/books/1").ends_with("carol wrote 1"));
    }

    /// Tests that concurrent connections each get their own response.
    #[test]
    fn test_concurrent_connections() {
        let addr = start(books_server());

        let clients: Vec<_> = (0..16)
            .map(|i| {
                thread::spawn(move || {
                    let wire = get(addr, &format!("users/user{}/books/{}", i, i * 10));
                    (i, wire)
                })
            })
            .collect();

        for client in clients {
            let (i, wire) = client.join().unwrap();
            assert_eq!(
                wire,
                format!(
                    "HTTP/1.1 200/OK\r\nContent-type:text/html\r\n\r\nuser{} wrote {}",
                    i,
                    i * 10
                )
            );
        }
    }

    /// Tests static files registered through the server.
    #[test]
    fn test_serve_static() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();

        let mut server = Server::new(ServerConfig {
            static_root: dir.path().to_path_buf(),
            ..test_config()
        });
        assert!(server.serve_static(""));
        let addr = start(server);

        assert!(get(addr, "").ends_with("<h1>home</h1>"));
        assert!(get(addr, "gone.html").ends_with("File not found"));
    }
}
