//! Proxy error type and `Result` alias

use std::io;
use thiserror::Error;

/// Everything that can end a session or stop startup
#[derive(Error, Debug)]
pub enum Error {
    /// Socket or file I/O
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// Bad or missing settings, including unreadable config files
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Request head that could not be understood
    #[error("malformed request: {0}")]
    Parse(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Upstream or downstream proxy unreachable
    #[error("upstream unavailable: {0}")]
    Connection(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Destination not in the allowlist
    #[error("Domain {0} is blocked")]
    Blocked(String),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn blocked<S: Into<String>>(domain: S) -> Self {
        Error::Blocked(domain.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// True for errors that mean the peer simply went away
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;
