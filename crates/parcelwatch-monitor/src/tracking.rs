use std::time::Duration;

use async_trait::async_trait;
use parcelwatch_core::config::TrackingConfig;
use parcelwatch_core::types::{TrackingNumber, TrackingReport};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unknown tracking number {tracking_number}")]
    NotFound { tracking_number: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// Connection refused or timed out; worth retrying later.
    #[error("tracking provider unavailable: {0}")]
    Unavailable(String),
}

/// Source of current shipment state.
#[async_trait]
pub trait TrackingClient: Send + Sync {
    async fn fetch(&self, tracking_number: &TrackingNumber) -> Result<TrackingReport, TrackingError>;
}

/// Client for the HTTP tracking provider: `GET {base_url}/{number}`.
pub struct HttpTrackingClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTrackingClient {
    pub fn new(config: &TrackingConfig) -> Result<Self, TrackingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TrackingClient for HttpTrackingClient {
    async fn fetch(&self, tracking_number: &TrackingNumber) -> Result<TrackingReport, TrackingError> {
        let url = format!("{}/{}", self.base_url, tracking_number);
        debug!(%tracking_number, "querying tracking provider");

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                TrackingError::Unavailable(e.to_string())
            } else {
                TrackingError::Http(e)
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TrackingError::NotFound {
                tracking_number: tracking_number.to_string(),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "tracking provider error");
            return Err(TrackingError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        resp.json::<TrackingReport>()
            .await
            .map_err(|e| TrackingError::Parse(e.to_string()))
    }
}
