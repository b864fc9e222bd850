use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parcelwatch_core::config::NotificationsConfig;
use parcelwatch_core::notification::ArrivalNotice;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider accepted the request but reported no recipients.
    #[error("push rejected: {0}")]
    Rejected(String),
}

/// Delivery channel for arrival notices.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notice: &ArrivalNotice) -> Result<(), NotifyError>;
}

/// Push delivery through the OneSignal REST API.
pub struct OneSignalNotifier {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    api_key: String,
}

impl OneSignalNotifier {
    pub fn new(base_url: &str, app_id: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!("push client builder failed ({e}), using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn build_body(&self, notice: &ArrivalNotice) -> serde_json::Value {
        serde_json::json!({
            "app_id": self.app_id,
            "include_subscription_ids": [notice.push_user_id],
            "headings": { "en": notice.title },
            "contents": { "en": notice.body },
            "data": notice.data(),
        })
    }
}

#[async_trait]
impl Notifier for OneSignalNotifier {
    fn name(&self) -> &str {
        "onesignal"
    }

    async fn send(&self, notice: &ArrivalNotice) -> Result<(), NotifyError> {
        let url = format!("{}/api/v1/notifications", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("authorization", format!("Key {}", self.api_key))
            .json(&self.build_body(notice))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OneSignal API error");
            return Err(NotifyError::Api {
                status,
                message: text,
            });
        }

        // OneSignal answers 200 with an `errors` field when no device matched.
        let body: serde_json::Value = resp.json().await?;
        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(NotifyError::Rejected(errors.to_string()));
        }

        info!(tracking_number = %notice.tracking_number, "arrival push sent");
        Ok(())
    }
}

/// Fallback when push credentials are not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notice: &ArrivalNotice) -> Result<(), NotifyError> {
        info!(
            tracking_number = %notice.tracking_number,
            push_user_id = %notice.push_user_id,
            title = %notice.title,
            "arrival notice (push disabled)"
        );
        Ok(())
    }
}

/// Pick the notifier for the configured credentials.
pub fn build_notifier(config: &NotificationsConfig) -> Arc<dyn Notifier> {
    match config.onesignal_credentials() {
        Some((app_id, api_key)) => {
            info!("push notifications via OneSignal");
            Arc::new(OneSignalNotifier::new(&config.base_url, app_id, api_key))
        }
        None => {
            warn!("OneSignal credentials missing, arrival notices will only be logged");
            Arc::new(LogNotifier)
        }
    }
}
