use parcelwatch_core::types::{HistoryEntry, TrackingNumber, TrackingReport};
use parcelwatch_scheduler::ShipmentSnapshot;
use serde::{Deserialize, Serialize};

/// Request to start tracking a shipment for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub tracking_number: TrackingNumber,
    /// Push-provider subscription id that receives the arrival notice.
    pub push_user_id: String,
    pub phone: Option<String>,
}

/// A persisted subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// UUIDv7 primary key, time-sortable.
    pub id: String,
    pub tracking_number: String,
    pub push_user_id: String,
    pub phone: Option<String>,
    pub origin: String,
    pub destination: String,
    /// Last status text seen from the provider.
    pub current_state: String,
    pub admission_time: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    /// Provider history as of the last check.
    pub history: Vec<HistoryEntry>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    pub last_checked_at: Option<String>,
    /// RFC3339 instant of the next planned check; `None` once delivered.
    pub next_check_at: Option<String>,
    pub checks_performed: u32,
    pub threshold_check_done: bool,
    /// False after the owner cancelled.
    pub active: bool,
    /// Set exactly once, when the pickup state is first observed.
    pub delivered_at: Option<String>,
    pub updated_at: String,
}

impl Subscription {
    /// Scheduler input built from the stored state.
    pub fn snapshot(&self) -> ShipmentSnapshot {
        ShipmentSnapshot {
            current_state: self.current_state.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            admission_time: self.admission_time.clone(),
            history: self.history.clone(),
            checks_performed: self.checks_performed,
            threshold_check_done: self.threshold_check_done,
        }
    }

    /// Scheduler input for a fresh provider report, carrying this
    /// subscription's check progress.
    ///
    /// Blank route fields in the report keep the stored values.
    pub fn snapshot_with(&self, report: &TrackingReport) -> ShipmentSnapshot {
        let pick = |fresh: &str, stored: &str| {
            if fresh.trim().is_empty() {
                stored.to_string()
            } else {
                fresh.to_string()
            }
        };
        ShipmentSnapshot {
            current_state: report.current_state.clone(),
            origin: pick(&report.origin, &self.origin),
            destination: pick(&report.destination, &self.destination),
            admission_time: report
                .admission_time
                .clone()
                .or_else(|| self.admission_time.clone()),
            history: report.history.clone(),
            checks_performed: self.checks_performed,
            threshold_check_done: self.threshold_check_done,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}

/// One row of the per-subscription check log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub checked_at: String,
    pub state_found: String,
}

/// Aggregate counters for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub total: u64,
    pub active: u64,
    pub delivered: u64,
    /// Active, undelivered and past their next check time.
    pub due: u64,
}

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub subscriptions: u64,
    pub log_entries: u64,
}
