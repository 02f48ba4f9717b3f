use serde::Deserialize;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "LINESERVE";

/// Configuration for the server.
///
/// Loaded from an optional `lineserve` config file and from environment
/// variables prefixed with `LINESERVE_`. Every field has a default, so an
/// empty source yields [`ServerConfig::default`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind. Defaults to "localhost".
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind. Defaults to 3000.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served by the static file handler. Defaults to "public/".
    #[serde(default = "default_static_root")]
    pub static_root: PathBuf,
    /// Escape regex metacharacters in literal template segments.
    #[serde(default = "default_escape_literals")]
    pub escape_literals: bool,
    /// Maximum number of bytes read as the request line. Defaults to 8kb.
    #[serde(default = "default_max_request_line")]
    pub max_request_line: usize,
    /// Optional cap on worker threads. Unset means one worker per
    /// in-flight connection with no limit.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Seconds an idle worker waits for a new connection before exiting.
    #[serde(default = "default_keep_alive_secs")]
    pub worker_keep_alive_secs: u64,
}

impl TryFrom<config::Config> for ServerConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl ServerConfig {
    /// Loads the configuration.
    ///
    /// 1. Loads a `.env` file if present
    /// 2. Reads a `lineserve` config file (any format the `config` crate knows), if it exists
    /// 3. Overrides with `LINESERVE_*` environment variables
    ///
    /// # Errors
    /// Returns a ConfigError if a source cannot be read, a value has the
    /// wrong type, or a limit is zero.
    pub fn new() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load(env: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("lineserve").required(false))
            .add_source(env)
            .build()?
            .try_into()
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.max_request_line == 0 {
            return Err(config::ConfigError::Message(
                "max_request_line must be at least 1".to_string(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(config::ConfigError::Message(
                "max_workers must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// The `host:port` pair to bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_root() -> PathBuf {
    PathBuf::from("public/")
}

fn default_escape_literals() -> bool {
    true
}

fn default_max_request_line() -> usize {
    8192
}

fn default_keep_alive_secs() -> u64 {
    6
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_root: default_static_root(),
            escape_literals: default_escape_literals(),
            max_request_line: default_max_request_line(),
            max_workers: None,
            worker_keep_alive_secs: default_keep_alive_secs(),
        }
    }
}
