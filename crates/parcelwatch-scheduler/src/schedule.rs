use chrono::{DateTime, Duration, FixedOffset, Offset, SubsecRound, Utc};
use parcelwatch_core::config::ScheduleConfig;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, ScheduleError},
    routes::RouteTable,
    timestamps::parse_provider_timestamp,
    types::{CheckReason, DispatchReference, ReferenceSource, ScheduleDecision, ShipmentSnapshot},
};

/// Decides when each tracked shipment should next be checked.
///
/// Pure: the output depends only on the snapshot, the `now` reading, the
/// configuration and the route table. Safe to share across threads.
#[derive(Debug, Clone)]
pub struct VerificationScheduler {
    pre_dispatch_interval: Duration,
    threshold_fraction: f64,
    post_threshold_interval: Duration,
    overdue_interval: Duration,
    catch_up_delay: Duration,
    /// Stored uppercase; matched against the uppercased status text.
    terminal_phrases: Vec<String>,
    dispatch_phrases: Vec<String>,
    local_offset: FixedOffset,
    routes: RouteTable,
}

impl VerificationScheduler {
    pub fn new(config: &ScheduleConfig, routes: RouteTable) -> Self {
        let local_offset = FixedOffset::east_opt(config.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| {
                warn!(
                    utc_offset_minutes = config.utc_offset_minutes,
                    "utc offset out of range, reading provider times as UTC"
                );
                Utc.fix()
            });

        Self {
            pre_dispatch_interval: minutes(config.pre_dispatch_interval_mins),
            threshold_fraction: config.threshold_fraction,
            post_threshold_interval: minutes(config.post_threshold_interval_mins),
            overdue_interval: minutes(config.overdue_interval_mins),
            catch_up_delay: minutes(config.catch_up_delay_mins),
            terminal_phrases: uppercase_all(&config.terminal_phrases),
            dispatch_phrases: uppercase_all(&config.dispatch_phrases),
            local_offset,
            routes,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Next check for `snapshot`, reading the clock exactly once.
    pub fn next_check_now(&self, snapshot: &ShipmentSnapshot) -> ScheduleDecision {
        self.next_check(snapshot, Utc::now())
    }

    /// Next check for `snapshot` as seen at `now`.
    ///
    /// Never fails: an internal error is logged and mapped to a short retry
    /// so the shipment keeps being tracked.
    pub fn next_check(&self, snapshot: &ShipmentSnapshot, now: DateTime<Utc>) -> ScheduleDecision {
        match self.try_next_check(snapshot, now) {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    origin = %snapshot.origin,
                    destination = %snapshot.destination,
                    "next-check computation failed, retrying shortly: {e}"
                );
                ScheduleDecision::CheckAt {
                    at: now
                        .checked_add_signed(self.pre_dispatch_interval)
                        .unwrap_or(now),
                    reason: CheckReason::Fallback,
                }
            }
        }
    }

    /// Fallible core of [`Self::next_check`].
    pub fn try_next_check(
        &self,
        snapshot: &ShipmentSnapshot,
        now: DateTime<Utc>,
    ) -> Result<ScheduleDecision> {
        let state = snapshot.current_state.to_uppercase();

        if contains_any(&state, &self.terminal_phrases) {
            info!(state = %snapshot.current_state, "shipment reached pickup state, stopping checks");
            return Ok(ScheduleDecision::Stop);
        }

        if !contains_any(&state, &self.dispatch_phrases) {
            let at = add(now, self.pre_dispatch_interval)?;
            debug!(%at, "not dispatched yet");
            return Ok(ScheduleDecision::CheckAt {
                at,
                reason: CheckReason::PreDispatch,
            });
        }

        let fraction = self.validated_fraction()?;
        let travel_hours = self
            .routes
            .resolve_travel_hours(&snapshot.origin, &snapshot.destination);
        let reference = self.resolve_dispatch_reference(snapshot, now);

        // Real-valued milliseconds; whole seconds only when emitting a timestamp.
        let travel_ms = f64::from(travel_hours) * 3_600_000.0;
        let threshold_ms = travel_ms * fraction;
        let elapsed_ms = (now - reference.at).num_milliseconds() as f64;

        let decision = if !snapshot.threshold_check_done && elapsed_ms < threshold_ms {
            let target = add(reference.at, millis(threshold_ms)?)?.trunc_subsecs(0);
            if target > now {
                ScheduleDecision::CheckAt {
                    at: target,
                    reason: CheckReason::ThresholdAligned,
                }
            } else {
                // Only reachable when truncating to whole seconds moved the
                // target to or before `now`.
                ScheduleDecision::CheckAt {
                    at: add(now, self.catch_up_delay)?,
                    reason: CheckReason::CatchUp,
                }
            }
        } else if elapsed_ms > travel_ms {
            ScheduleDecision::CheckAt {
                at: add(now, self.overdue_interval)?,
                reason: CheckReason::Overdue,
            }
        } else {
            ScheduleDecision::CheckAt {
                at: add(now, self.post_threshold_interval)?,
                reason: CheckReason::ArrivalWindow,
            }
        };

        info!(
            travel_hours,
            reference = %reference.at,
            source = ?reference.source,
            checks = snapshot.checks_performed,
            next = ?decision.next_check_at(),
            reason = ?decision.reason(),
            "scheduled in-transit check"
        );
        Ok(decision)
    }

    /// Find the instant the shipment actually left the origin.
    ///
    /// Preference: earliest history entry mentioning a dispatch phrase, then
    /// the admission timestamp, then `now`. History entries with unparseable
    /// timestamps cannot be ordered and are skipped.
    pub fn resolve_dispatch_reference(
        &self,
        snapshot: &ShipmentSnapshot,
        now: DateTime<Utc>,
    ) -> DispatchReference {
        let mut dated: Vec<(DateTime<Utc>, &str)> = snapshot
            .history
            .iter()
            .filter_map(|entry| {
                match parse_provider_timestamp(&entry.timestamp, self.local_offset) {
                    Some(at) => Some((at, entry.detail.as_str())),
                    None => {
                        debug!(timestamp = %entry.timestamp, "skipping history entry with unparseable timestamp");
                        None
                    }
                }
            })
            .collect();
        dated.sort_by_key(|(at, _)| *at);

        if let Some((at, _)) = dated
            .iter()
            .find(|(_, detail)| contains_any(&detail.to_uppercase(), &self.dispatch_phrases))
        {
            return DispatchReference {
                at: *at,
                source: ReferenceSource::History,
            };
        }

        if let Some(at) = snapshot
            .admission_time
            .as_deref()
            .and_then(|raw| parse_provider_timestamp(raw, self.local_offset))
        {
            return DispatchReference {
                at,
                source: ReferenceSource::Admission,
            };
        }

        warn!(
            admission_time = ?snapshot.admission_time,
            "no usable dispatch or admission time, measuring from now"
        );
        DispatchReference {
            at: now,
            source: ReferenceSource::InvocationTime,
        }
    }

    fn validated_fraction(&self) -> Result<f64> {
        let f = self.threshold_fraction;
        if f.is_finite() && f > 0.0 && f <= 1.0 {
            Ok(f)
        } else {
            Err(ScheduleError::InvalidConfig(format!(
                "threshold fraction must be in (0, 1], got {f}"
            )))
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}

fn uppercase_all(phrases: &[String]) -> Vec<String> {
    phrases.iter().map(|p| p.trim().to_uppercase()).collect()
}

fn minutes(mins: u32) -> Duration {
    Duration::minutes(i64::from(mins))
}

fn millis(ms: f64) -> Result<Duration> {
    let rounded = ms.round();
    if !rounded.is_finite() || rounded.abs() > i64::MAX as f64 {
        return Err(ScheduleError::TimeOverflow(format!("{ms} ms")));
    }
    Ok(Duration::milliseconds(rounded as i64))
}

fn add(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    at.checked_add_signed(by)
        .ok_or_else(|| ScheduleError::TimeOverflow(format!("{at} + {by}")))
}
