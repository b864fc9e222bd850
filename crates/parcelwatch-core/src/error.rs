use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParcelwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid tracking number: {value}")]
    InvalidTrackingNumber { value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParcelwatchError {
    /// Short, stable error code for logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            ParcelwatchError::Config(_) => "CONFIG_ERROR",
            ParcelwatchError::InvalidTrackingNumber { .. } => "INVALID_TRACKING_NUMBER",
            ParcelwatchError::Serialization(_) => "SERIALIZATION_ERROR",
            ParcelwatchError::Io(_) => "IO_ERROR",
            ParcelwatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParcelwatchError>;
