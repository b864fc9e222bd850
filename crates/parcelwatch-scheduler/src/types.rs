use chrono::{DateTime, Utc};
use parcelwatch_core::types::{HistoryEntry, TrackingReport};
use serde::{Deserialize, Serialize};

/// Everything the scheduler needs to know about one shipment.
///
/// The caller owns and persists this data; the scheduler only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentSnapshot {
    /// Free-text status from the tracking provider.
    pub current_state: String,
    /// Origin city, possibly `"CITY (REGION)"`.
    pub origin: String,
    pub destination: String,
    /// Raw admission timestamp as reported by the provider.
    pub admission_time: Option<String>,
    /// Tracking history, searched for the real dispatch instant.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Number of checks already run for this shipment.
    #[serde(default)]
    pub checks_performed: u32,
    /// Set once a threshold-aligned check has been scheduled.
    #[serde(default)]
    pub threshold_check_done: bool,
}

impl ShipmentSnapshot {
    /// Snapshot of a freshly reported shipment with no checks behind it.
    pub fn from_report(report: &TrackingReport) -> Self {
        Self {
            current_state: report.current_state.clone(),
            origin: report.origin.clone(),
            destination: report.destination.clone(),
            admission_time: report.admission_time.clone(),
            history: report.history.clone(),
            checks_performed: 0,
            threshold_check_done: false,
        }
    }

    pub fn with_progress(mut self, checks_performed: u32, threshold_check_done: bool) -> Self {
        self.checks_performed = checks_performed;
        self.threshold_check_done = threshold_check_done;
        self
    }
}

/// Which rule produced a [`ScheduleDecision::CheckAt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckReason {
    /// Not dispatched yet; short fixed poll.
    PreDispatch,
    /// First in-transit check, placed at the progress threshold.
    ThresholdAligned,
    /// The threshold instant had already passed; check almost immediately.
    CatchUp,
    /// Between the threshold and the full travel estimate.
    ArrivalWindow,
    /// Later than the full travel estimate.
    Overdue,
    /// An internal error was swallowed; short fixed retry.
    Fallback,
}

impl CheckReason {
    /// True for the reasons that consume the one threshold-aligned check.
    pub fn is_threshold_check(&self) -> bool {
        matches!(self, CheckReason::ThresholdAligned | CheckReason::CatchUp)
    }
}

impl std::fmt::Display for CheckReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckReason::PreDispatch => "pre_dispatch",
            CheckReason::ThresholdAligned => "threshold_aligned",
            CheckReason::CatchUp => "catch_up",
            CheckReason::ArrivalWindow => "arrival_window",
            CheckReason::Overdue => "overdue",
            CheckReason::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CheckReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pre_dispatch" => Ok(CheckReason::PreDispatch),
            "threshold_aligned" => Ok(CheckReason::ThresholdAligned),
            "catch_up" => Ok(CheckReason::CatchUp),
            "arrival_window" => Ok(CheckReason::ArrivalWindow),
            "overdue" => Ok(CheckReason::Overdue),
            "fallback" => Ok(CheckReason::Fallback),
            other => Err(format!("unknown check reason: {other}")),
        }
    }
}

/// Outcome of one scheduling computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleDecision {
    /// The shipment reached a terminal state; stop checking.
    Stop,
    /// Check again at `at`.
    CheckAt {
        at: DateTime<Utc>,
        reason: CheckReason,
    },
}

impl ScheduleDecision {
    pub fn next_check_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ScheduleDecision::Stop => None,
            ScheduleDecision::CheckAt { at, .. } => Some(*at),
        }
    }

    pub fn reason(&self) -> Option<CheckReason> {
        match self {
            ScheduleDecision::Stop => None,
            ScheduleDecision::CheckAt { reason, .. } => Some(*reason),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduleDecision::Stop)
    }
}

/// Where the dispatch reference instant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    /// A history entry mentioning the dispatch phrase.
    History,
    /// The shipment's admission timestamp.
    Admission,
    /// Nothing parseable; the invocation clock reading was used.
    InvocationTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReference {
    pub at: DateTime<Utc>,
    pub source: ReferenceSource,
}
