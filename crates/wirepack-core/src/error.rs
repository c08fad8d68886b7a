use std::path::PathBuf;
use thiserror::Error;

/// Core error type for wirepack startup and configuration.
///
/// Pipeline failures (resolve, transform, plugin) never surface here; they
/// become diagnostics on the compilation instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    #[error("Cannot read entry '{specifier}': {message}")]
    Entry { specifier: String, message: String },
}

impl Error {
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }
}

/// The dev server could not start listening.
#[derive(Error, Debug)]
#[error("Failed to bind {addr}: {message}")]
pub struct ServerStartError {
    pub addr: String,
    pub message: String,
}

/// An upstream in the proxy table could not be reached.
///
/// Turned into a `502 Bad Gateway` for the one request; never fatal.
#[derive(Error, Debug)]
#[error("Proxy to {upstream} failed: {message}")]
pub struct ProxyError {
    pub upstream: String,
    pub message: String,
}
