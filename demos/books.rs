//! A small lineserve application.
//!
//! Routes:
//! - `/action_man` - a static greeting
//! - `/oh_no` - a handler that always fails (500)
//! - `/users/:username/books/:book-id` - echoes both parameters
//! - anything else under `static_root` - served from disk

use lineserve::{handler_fn, HandlerError, Server, ServerConfig};
use log::LevelFilter;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .expect("failed to install logger");

    let config = ServerConfig::new().unwrap_or_else(|e| {
        log::warn!("using default configuration: {}", e);
        ServerConfig::default()
    });
    let mut server = Server::new(config);

    server.route("action_man", handler_fn(|_req, res, _params| {
        res.write("<h1>WOO!</h1>");
        Ok(())
    }));

    server.route("oh_no", handler_fn(|_req, _res, _params| {
        Err(HandlerError::msg("oh no"))
    }));

    server.route("users/:username/books/:book-id", handler_fn(|_req, res, params| {
        res.write(format!(
            "<p style='color:red;'>{} wrote {}</p>",
            params[0], params[1]
        ));
        Ok(())
    }));

    // registered last so the routes above win
    server.serve_static("");

    println!("Try these routes:");
    for template in server.routes().templates() {
        println!("  - /{}", template);
    }

    if let Err(e) = server.start() {
        log::error!("server stopped: {}", e);
        std::process::exit(1);
    }
}
