use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::{stream, StreamExt};
use parcelwatch_core::config::ParcelwatchConfig;
use parcelwatch_core::notification::ArrivalNotice;
use parcelwatch_core::types::{TrackingNumber, TrackingReport};
use parcelwatch_scheduler::{ShipmentSnapshot, VerificationScheduler};
use parcelwatch_subscriptions::{
    NewSubscription, Subscription, SubscriptionError, SubscriptionManager, SubscriptionStats,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{MonitorError, Result};
use crate::notify::Notifier;
use crate::tracking::{TrackingClient, TrackingError};

/// Timing knobs for the check loop.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: std::time::Duration,
    /// Delay before retrying a shipment whose lookup failed.
    pub retry_after_failure: Duration,
    /// How long delivered subscriptions are kept before purging.
    pub retention: Duration,
    /// Maximum provider lookups in flight per cycle.
    pub concurrency: usize,
}

impl EngineSettings {
    pub fn from_config(config: &ParcelwatchConfig) -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(config.engine.poll_interval_secs.max(1)),
            retry_after_failure: Duration::minutes(i64::from(
                config.tracking.retry_after_failure_mins,
            )),
            retention: Duration::hours(i64::from(config.engine.retention_hours)),
            concurrency: config.tracking.concurrency.max(1),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ParcelwatchConfig::default())
    }
}

/// Counters for one pass over the due subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub due: u64,
    /// Lookups that returned a report, delivered or not.
    pub checked: u64,
    pub notified: u64,
    pub notify_failures: u64,
    /// Results discarded because the subscription was cancelled or already
    /// delivered by the time they came back.
    pub skipped: u64,
    pub fetch_failures: u64,
    /// Store errors while persisting a check.
    pub errors: u64,
    pub purged_subscriptions: u64,
    pub purged_log_entries: u64,
}

enum Outcome {
    Checked,
    /// This cycle made the delivery transition.
    Delivered { push_failed: bool },
    /// Cancelled or already delivered by the time the result came back.
    Skipped,
    FetchFailed,
    Failed,
}

/// Drives periodic shipment checks and arrival notifications.
pub struct CheckEngine {
    store: Arc<SubscriptionManager>,
    scheduler: Arc<VerificationScheduler>,
    tracker: Arc<dyn TrackingClient>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl CheckEngine {
    pub fn new(
        store: Arc<SubscriptionManager>,
        scheduler: Arc<VerificationScheduler>,
        tracker: Arc<dyn TrackingClient>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            scheduler,
            tracker,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &SubscriptionManager {
        &self.store
    }

    pub fn scheduler(&self) -> &VerificationScheduler {
        &self.scheduler
    }

    /// Start tracking a shipment for one device.
    ///
    /// Returns the existing subscription when the device already follows
    /// this shipment. Otherwise the provider must know the shipment.
    #[instrument(skip(self, phone))]
    pub async fn subscribe(
        &self,
        tracking_number: &str,
        push_user_id: &str,
        phone: Option<String>,
    ) -> Result<Subscription> {
        let number = TrackingNumber::parse(tracking_number)?;
        if let Some(existing) = self.store.find_active(&number, push_user_id)? {
            debug!(subscription_id = %existing.id, "already subscribed");
            return Ok(existing);
        }

        let report = match self.tracker.fetch(&number).await {
            Ok(report) if !report.current_state.trim().is_empty() => report,
            Ok(_) | Err(TrackingError::NotFound { .. }) => {
                return Err(MonitorError::NoReport {
                    tracking_number: number.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let decision = self
            .scheduler
            .next_check(&ShipmentSnapshot::from_report(&report), now);
        let request = NewSubscription {
            tracking_number: number,
            push_user_id: push_user_id.to_string(),
            phone,
        };
        Ok(self.store.create(&request, &report, &decision, now)?)
    }

    /// Active subscription for a shipment.
    pub fn status(&self, tracking_number: &str) -> Result<Subscription> {
        let number = TrackingNumber::parse(tracking_number)?;
        self.store
            .get_active(number.as_str())?
            .ok_or_else(|| {
                SubscriptionError::NotFound {
                    tracking_number: number.to_string(),
                }
                .into()
            })
    }

    pub fn cancel(&self, tracking_number: &str) -> Result<usize> {
        let number = TrackingNumber::parse(tracking_number)?;
        Ok(self.store.cancel(number.as_str(), Utc::now())?)
    }

    pub fn stats(&self) -> Result<SubscriptionStats> {
        Ok(self.store.stats(Utc::now())?)
    }

    /// Check every subscription due at `now`, then purge old deliveries.
    ///
    /// Lookups run concurrently up to the configured fan-out; their results
    /// are applied to the store, and pushes sent, one subscription at a time.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let due = self.store.due(now)?;
        let mut report = CycleReport {
            due: due.len() as u64,
            ..Default::default()
        };
        if !due.is_empty() {
            info!(count = due.len(), "checking due shipments");
        }

        let fetched: Vec<(Subscription, std::result::Result<TrackingReport, Outcome>)> =
            stream::iter(due)
                .map(|sub| async move {
                    let fetched = self.fetch_due(&sub, now).await;
                    (sub, fetched)
                })
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;

        for (sub, fetched) in fetched {
            let outcome = match fetched {
                Ok(tracking) => self.apply_or_defer(&sub, &tracking, now).await,
                Err(outcome) => outcome,
            };
            match outcome {
                Outcome::Checked => report.checked += 1,
                Outcome::Delivered { push_failed } => {
                    report.checked += 1;
                    if push_failed {
                        report.notify_failures += 1;
                    } else {
                        report.notified += 1;
                    }
                }
                Outcome::Skipped => report.skipped += 1,
                Outcome::FetchFailed => report.fetch_failures += 1,
                Outcome::Failed => report.errors += 1,
            }
        }

        match now.checked_sub_signed(self.settings.retention) {
            Some(cutoff) => {
                let purged = self.store.purge_delivered(cutoff)?;
                report.purged_subscriptions = purged.subscriptions;
                report.purged_log_entries = purged.log_entries;
            }
            None => warn!(
                retention_hours = self.settings.retention.num_hours(),
                "retention window out of range, skipping purge"
            ),
        }

        if report.due > 0 || report.purged_subscriptions > 0 {
            info!(
                checked = report.checked,
                notified = report.notified,
                skipped = report.skipped,
                fetch_failures = report.fetch_failures,
                purged = report.purged_subscriptions,
                "check cycle complete"
            );
        }
        Ok(report)
    }

    /// Provider lookup for one due subscription; defers it on failure.
    async fn fetch_due(
        &self,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> std::result::Result<TrackingReport, Outcome> {
        let number = match TrackingNumber::parse(&sub.tracking_number) {
            Ok(n) => n,
            Err(e) => {
                error!(subscription_id = %sub.id, "stored tracking number is invalid: {e}");
                self.defer(sub, now);
                return Err(Outcome::Failed);
            }
        };

        self.tracker.fetch(&number).await.map_err(|e| {
            warn!(tracking_number = %number, "lookup failed, retrying later: {e}");
            self.defer(sub, now);
            Outcome::FetchFailed
        })
    }

    async fn apply_or_defer(
        &self,
        sub: &Subscription,
        tracking: &TrackingReport,
        now: DateTime<Utc>,
    ) -> Outcome {
        match self.apply_report(sub, tracking, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(tracking_number = %sub.tracking_number, "failed to persist check: {e}");
                self.defer(sub, now);
                Outcome::Failed
            }
        }
    }

    async fn apply_report(
        &self,
        sub: &Subscription,
        report: &TrackingReport,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let decision = self.scheduler.next_check(&sub.snapshot_with(report), now);
        if !decision.is_terminal() {
            if !self.store.record_check(&sub.id, report, &decision, now)? {
                return Ok(Outcome::Skipped);
            }
            return Ok(Outcome::Checked);
        }

        // Already delivered, or cancelled since the cycle started.
        if !self.store.mark_delivered(&sub.id, report, now)? {
            debug!(subscription_id = %sub.id, "no delivery transition, notice not sent");
            return Ok(Outcome::Skipped);
        }

        let notice = ArrivalNotice::new(
            &sub.tracking_number,
            &sub.push_user_id,
            &report.current_state,
        );
        match self.notifier.send(&notice).await {
            Ok(()) => Ok(Outcome::Delivered { push_failed: false }),
            Err(e) => {
                error!(
                    tracking_number = %sub.tracking_number,
                    notifier = self.notifier.name(),
                    "arrival push failed: {e}"
                );
                Ok(Outcome::Delivered { push_failed: true })
            }
        }
    }

    fn defer(&self, sub: &Subscription, now: DateTime<Utc>) {
        let at = now + self.settings.retry_after_failure;
        if let Err(e) = self.store.defer(&sub.id, at, now) {
            error!(subscription_id = %sub.id, "failed to defer check: {e}");
        }
    }

    /// Run cycles on a fixed interval until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = self.settings.poll_interval.as_secs(),
            notifier = self.notifier.name(),
            "check engine started"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        error!("check cycle error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("check engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
