/// Error types for the WardLink client
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),
}

impl WardError {
    /// True when the server answered but rejected the request
    pub fn is_rejection(&self) -> bool {
        matches!(self, WardError::Api { .. })
    }
}

impl From<http::Error> for WardError {
    fn from(e: http::Error) -> Self {
        WardError::Http(e.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for WardError {
    fn from(e: hyper_util::client::legacy::Error) -> Self {
        if e.is_connect() {
            WardError::Connection(e.to_string())
        } else {
            WardError::Http(e.to_string())
        }
    }
}

impl From<hyper::Error> for WardError {
    fn from(e: hyper::Error) -> Self {
        WardError::Http(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WardError>;
