use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while registering a route template.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No template was supplied
    #[error("route template is missing")]
    MissingTemplate,

    /// The template could not be compiled into a pattern
    #[error("invalid route template {template:?}: {source}")]
    InvalidPattern {
        template: String,
        #[source]
        source: regex::Error,
    },

    /// Raw literals in the template introduced capture groups of their own
    #[error("route template {template:?} has {placeholders} placeholders but {groups} capture groups")]
    CaptureMismatch {
        template: String,
        placeholders: usize,
        groups: usize,
    },
}

/// Failures raised by a handler while building a response.
///
/// Any of these turns into a `500` for the client. The detail is only
/// logged.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Application-level failure with a description
    #[error("handler failed: {0}")]
    Failed(String),

    /// I/O failure from a collaborator (e.g. reading a static file)
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn msg(message: impl ToString) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

/// I/O failures on a single client connection.
///
/// These never escape the connection that produced them.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The client closed the connection before sending a request line
    #[error("client disconnected before sending a request")]
    Disconnected,

    #[error("failed reading request: {0}")]
    Read(#[source] io::Error),

    #[error("failed writing response: {0}")]
    Write(#[source] io::Error),
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("reactor error: {0}")]
    Reactor(#[from] ReactorError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Represents errors that can occur while running connection tasks on the executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A mutex lock became poisoned due to a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,

    /// Spawning a new worker thread failed
    #[error("thread spawn failed: {0}")]
    ThreadSpawn(io::Error),
}

/// Represents errors that can occur in the reactor driving socket readiness.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("reactor initialization failed: {0}")]
    Init(io::Error),

    /// Registering a connection with the reactor failed
    #[error("registration of {peer} failed: {source}")]
    Registration {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("polling failed: {0}")]
    Polling(io::Error),

    /// A mutex lock became poisoned due to a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,
}

/// Type alias for Results using ExecutorError as the error type
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Type alias for Results using ReactorError as the error type
pub type ReactorResult<T> = std::result::Result<T, ReactorError>;
