// Jackson Coxson

use std::time::Duration;

/// Problems with the startup configuration. All of these are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("expected at least one local address and a remote address")]
    Usage,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Json(#[from] json::Error),
    #[error("invalid address {0:?}, expected host:port")]
    Address(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote dial to {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("remote dial to {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },
}

impl ProxyError {
    /// Whether the process has any business continuing after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProxyError::Bind { .. })
    }
}
