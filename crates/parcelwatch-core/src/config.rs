use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Scheduling defaults. Each one is overridable under `[schedule]`.
pub const DEFAULT_PRE_DISPATCH_INTERVAL_MINS: u32 = 30;
pub const DEFAULT_THRESHOLD_FRACTION: f64 = 0.9;
pub const DEFAULT_POST_THRESHOLD_INTERVAL_MINS: u32 = 30;
pub const DEFAULT_OVERDUE_INTERVAL_MINS: u32 = 60;
pub const DEFAULT_CATCH_UP_DELAY_MINS: u32 = 5;
pub const DEFAULT_ROUTE_HOURS: u32 = 12;

pub const DEFAULT_TRACKING_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_RETRY_AFTER_FAILURE_MINS: u32 = 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETENTION_HOURS: u32 = 48;

/// Top-level config (parcelwatch.toml + PARCELWATCH_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParcelwatchConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where and how the external tracking provider is queried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Base URL; the tracking number is appended as the last path segment.
    #[serde(default = "default_tracking_base_url")]
    pub base_url: String,
    #[serde(default = "default_tracking_timeout")]
    pub timeout_secs: u64,
    /// Delay before retrying a shipment whose fetch failed.
    #[serde(default = "default_retry_after_failure")]
    pub retry_after_failure_mins: u32,
    /// Maximum number of provider requests in flight during one cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracking_base_url(),
            timeout_secs: DEFAULT_TRACKING_TIMEOUT_SECS,
            retry_after_failure_mins: DEFAULT_RETRY_AFTER_FAILURE_MINS,
            concurrency: default_concurrency(),
        }
    }
}

/// Knobs of the adaptive verification scheduler.
///
/// Phrases are matched as case-insensitive substrings of the provider's
/// free-text status, so only the significant fragment needs to be listed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Poll cadence while the shipment is still waiting at the origin.
    #[serde(default = "default_pre_dispatch_interval")]
    pub pre_dispatch_interval_mins: u32,
    /// Fraction of the route's travel time at which the first in-transit check fires.
    #[serde(default = "default_threshold_fraction")]
    pub threshold_fraction: f64,
    /// Poll cadence between the threshold and the full travel estimate.
    #[serde(default = "default_post_threshold_interval")]
    pub post_threshold_interval_mins: u32,
    /// Poll cadence once the shipment is later than its travel estimate.
    #[serde(default = "default_overdue_interval")]
    pub overdue_interval_mins: u32,
    /// Used when the threshold instant has already passed.
    #[serde(default = "default_catch_up_delay")]
    pub catch_up_delay_mins: u32,
    #[serde(default = "default_terminal_phrases")]
    pub terminal_phrases: Vec<String>,
    #[serde(default = "default_dispatch_phrases")]
    pub dispatch_phrases: Vec<String>,
    /// Offset used to interpret provider timestamps that carry no zone.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            pre_dispatch_interval_mins: DEFAULT_PRE_DISPATCH_INTERVAL_MINS,
            threshold_fraction: DEFAULT_THRESHOLD_FRACTION,
            post_threshold_interval_mins: DEFAULT_POST_THRESHOLD_INTERVAL_MINS,
            overdue_interval_mins: DEFAULT_OVERDUE_INTERVAL_MINS,
            catch_up_delay_mins: DEFAULT_CATCH_UP_DELAY_MINS,
            terminal_phrases: default_terminal_phrases(),
            dispatch_phrases: default_dispatch_phrases(),
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutesConfig {
    /// Travel time assumed for any pair missing from the table.
    #[serde(default = "default_route_hours")]
    pub default_hours: u32,
    /// Entries added to (or overriding) the built-in route table.
    #[serde(default)]
    pub extra: Vec<RouteOverride>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            default_hours: DEFAULT_ROUTE_HOURS,
            extra: Vec::new(),
        }
    }
}

/// A single directional route entry. City names go through the same
/// normalization as provider data, so `"Medellín (Antioquia)"` is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteOverride {
    pub origin: String,
    pub destination: String,
    pub hours: u32,
}

/// OneSignal push settings. Push delivery is disabled while either
/// credential is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub onesignal_app_id: Option<String>,
    pub onesignal_api_key: Option<String>,
    #[serde(default = "default_onesignal_base_url")]
    pub base_url: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            onesignal_app_id: None,
            onesignal_api_key: None,
            base_url: default_onesignal_base_url(),
        }
    }
}

impl NotificationsConfig {
    /// Returns `(app_id, api_key)` when both are present and non-empty.
    pub fn onesignal_credentials(&self) -> Option<(&str, &str)> {
        let app_id = self.onesignal_app_id.as_deref().filter(|s| !s.is_empty())?;
        let api_key = self.onesignal_api_key.as_deref().filter(|s| !s.is_empty())?;
        Some((app_id, api_key))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the `run` loop looks for due shipments.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Delivered subscriptions are purged this long after delivery.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retention_hours: DEFAULT_RETENTION_HOURS,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parcelwatch/parcelwatch.db", home)
}
fn default_tracking_base_url() -> String {
    "http://localhost:8000/api/tracking".to_string()
}
fn default_tracking_timeout() -> u64 {
    DEFAULT_TRACKING_TIMEOUT_SECS
}
fn default_retry_after_failure() -> u32 {
    DEFAULT_RETRY_AFTER_FAILURE_MINS
}
fn default_concurrency() -> usize {
    4
}
fn default_pre_dispatch_interval() -> u32 {
    DEFAULT_PRE_DISPATCH_INTERVAL_MINS
}
fn default_threshold_fraction() -> f64 {
    DEFAULT_THRESHOLD_FRACTION
}
fn default_post_threshold_interval() -> u32 {
    DEFAULT_POST_THRESHOLD_INTERVAL_MINS
}
fn default_overdue_interval() -> u32 {
    DEFAULT_OVERDUE_INTERVAL_MINS
}
fn default_catch_up_delay() -> u32 {
    DEFAULT_CATCH_UP_DELAY_MINS
}
fn default_terminal_phrases() -> Vec<String> {
    vec!["RECLAME EN OFICINA".to_string(), "ENTREGADA".to_string()]
}
fn default_dispatch_phrases() -> Vec<String> {
    vec!["DESPACHO".to_string(), "EN RUTA".to_string()]
}
fn default_route_hours() -> u32 {
    DEFAULT_ROUTE_HOURS
}
fn default_onesignal_base_url() -> String {
    "https://onesignal.com".to_string()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_retention_hours() -> u32 {
    DEFAULT_RETENTION_HOURS
}

impl ParcelwatchConfig {
    /// Load config from a TOML file with PARCELWATCH_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `PARCELWATCH_SCHEDULE__THRESHOLD_FRACTION=0.8`.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.parcelwatch/parcelwatch.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        let config: ParcelwatchConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PARCELWATCH_").split("__"))
            .extract()
            .map_err(|e| crate::error::ParcelwatchError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let fraction = self.schedule.threshold_fraction;
        if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
            return Err(crate::error::ParcelwatchError::Config(format!(
                "schedule.threshold_fraction must be in (0, 1], got {fraction}"
            )));
        }
        if self.tracking.concurrency == 0 {
            return Err(crate::error::ParcelwatchError::Config(
                "tracking.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parcelwatch/parcelwatch.toml", home)
}
