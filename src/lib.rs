#![doc = include_str!("../README.md")]

//! ## Architecture
//!
//! - [`RouteTable`] compiles route templates into [`PathMatcher`]s and
//!   resolves a path to the first registered match
//! - [`Dispatcher`] reads one request line, routes it, runs the handler and
//!   writes exactly one of `200`, `404` or `500`
//! - [`Server`] owns the configuration and routes; [`Listener`] accepts
//!   connections and runs each on its own worker thread
//! - A mio-based reactor drives socket readiness for all connections
//!
//! ## Configuration
//! [`ServerConfig`] is read from an optional `lineserve` config file and
//! environment variables prefixed with `LINESERVE_`.

pub use crate::config::ServerConfig;
pub use crate::dispatcher::{Dispatcher, Outcome};
pub use crate::error::{
    ConnectionError, ExecutorError, HandlerError, ReactorError, RouteError, ServerError,
};
pub use crate::http::{extract_path, Request, Response, Status};
pub use crate::route::{handler_fn, FnHandler, Handler, Params, PathMatcher, RouteMatch, RouteTable};
pub use crate::server::{Listener, Server};
pub use crate::static_files::StaticFiles;

mod config;
mod dispatcher;
mod error;
mod executor;
mod http;
mod net;
mod route;
mod server;
mod static_files;
