use thiserror::Error;

/// Main error type for pegasus
#[derive(Error, Debug)]
pub enum PegasusError {
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown time zone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid duration: {0}. Expected HH:MM:SS[.fff]")]
    InvalidDuration(String),

    #[error("Invalid waypoint: expected 3 elements, got {0}")]
    InvalidWaypoint(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PegasusError>;

impl PegasusError {
    /// Create a configuration error from a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid parameter error from a message
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
