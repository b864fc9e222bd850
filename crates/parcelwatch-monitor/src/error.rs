use parcelwatch_core::ParcelwatchError;
use parcelwatch_subscriptions::SubscriptionError;
use thiserror::Error;

use crate::tracking::TrackingError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Core(#[from] ParcelwatchError),

    #[error(transparent)]
    Store(#[from] SubscriptionError),

    #[error("tracking lookup failed: {0}")]
    Tracking(#[from] TrackingError),

    /// The provider answered but has no data for this shipment yet.
    #[error("no tracking information for {tracking_number}")]
    NoReport { tracking_number: String },
}

impl MonitorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.code(),
            Self::Store(SubscriptionError::NotFound { .. }) => "SUBSCRIPTION_NOT_FOUND",
            Self::Store(_) => "STORE_ERROR",
            Self::Tracking(_) => "TRACKING_ERROR",
            Self::NoReport { .. } => "NO_TRACKING_INFO",
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
