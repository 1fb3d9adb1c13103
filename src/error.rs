//! Error types for the capture engine

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        source: std::io::Error,
    },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Socket option failed: {0}")]
    SocketOption(String),
}

/// Capture session errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session already stopped")]
    AlreadyStopped,

    #[error("Session task failed: {0}")]
    TaskFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
