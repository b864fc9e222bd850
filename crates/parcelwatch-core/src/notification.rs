//! Arrival notice, shared between the check engine and the push notifier.

use serde::{Deserialize, Serialize};

/// Push sent once when a shipment reaches its pickup state.
///
/// Built by the check engine after the delivery transition is persisted;
/// consumed by whichever `Notifier` implementation is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalNotice {
    pub tracking_number: String,
    /// Push-provider subscription id of the recipient device.
    pub push_user_id: String,
    pub title: String,
    pub body: String,
    /// Provider status text that triggered the notice.
    pub state: String,
}

impl ArrivalNotice {
    pub fn new(tracking_number: &str, push_user_id: &str, state: &str) -> Self {
        Self {
            tracking_number: tracking_number.to_string(),
            push_user_id: push_user_id.to_string(),
            title: "Your parcel has arrived!".to_string(),
            body: format!("Shipment {tracking_number} is ready for pickup at the office."),
            state: state.to_string(),
        }
    }

    /// Extra key/value data attached to the push payload.
    pub fn data(&self) -> serde_json::Value {
        serde_json::json!({
            "tracking_number": self.tracking_number,
            "kind": "arrival",
            "state": self.state,
        })
    }
}
