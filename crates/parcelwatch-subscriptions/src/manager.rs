use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use parcelwatch_core::types::{TrackingNumber, TrackingReport};
use parcelwatch_scheduler::ScheduleDecision;
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, SubscriptionError};
use crate::types::{
    NewSubscription, PurgeReport, Subscription, SubscriptionStats, VerificationRecord,
};

const SELECT_COLUMNS: &str = "SELECT id, tracking_number, push_user_id, phone, origin, destination,
        current_state, admission_time, sender, recipient, history, created_at,
        last_checked_at, next_check_at, checks_performed, threshold_check_done,
        active, delivered_at, updated_at
     FROM subscriptions";

/// Fixed-width RFC 3339 in UTC, so stored instants compare correctly as text.
pub fn db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Thread-safe store for shipment subscriptions and their check log.
///
/// Wraps a single SQLite connection in a `Mutex`; every public method holds
/// the lock for one statement or one transaction.
pub struct SubscriptionManager {
    db: Mutex<Connection>,
}

impl SubscriptionManager {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| SubscriptionError::LockPoisoned)
    }

    /// The active subscription of `push_user_id` for this shipment, if any.
    #[instrument(skip(self), fields(tracking_number = %tracking_number))]
    pub fn find_active(
        &self,
        tracking_number: &TrackingNumber,
        push_user_id: &str,
    ) -> Result<Option<Subscription>> {
        let db = self.conn()?;
        let sql = format!(
            "{SELECT_COLUMNS} WHERE tracking_number = ?1 AND push_user_id = ?2 AND active = 1"
        );
        let sub = db
            .query_row(
                &sql,
                params![tracking_number.as_str(), push_user_id],
                row_to_subscription,
            )
            .optional()?;
        Ok(sub)
    }

    /// Insert a subscription seeded from the provider's first report.
    ///
    /// Idempotent per active (tracking number, device): a concurrent or
    /// repeated call returns the row that already exists.
    #[instrument(skip(self, report, decision), fields(tracking_number = %new.tracking_number))]
    pub fn create(
        &self,
        new: &NewSubscription,
        report: &TrackingReport,
        decision: &ScheduleDecision,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let id = Uuid::now_v7().to_string();
        let now_str = db_time(now);
        // Already at pickup when subscribing: let the next cycle deliver the notice.
        let next = db_time(decision.next_check_at().unwrap_or(now));
        let threshold_done = decision.reason().is_some_and(|r| r.is_threshold_check());
        let history = serde_json::to_string(&report.history)?;

        let db = self.conn()?;
        let inserted = db.execute(
            "INSERT OR IGNORE INTO subscriptions
             (id, tracking_number, push_user_id, phone, origin, destination,
              current_state, admission_time, sender, recipient, history,
              created_at, next_check_at, threshold_check_done, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?12)",
            params![
                id,
                new.tracking_number.as_str(),
                new.push_user_id,
                new.phone,
                report.origin,
                report.destination,
                report.current_state,
                report.admission_time,
                report.sender,
                report.recipient,
                history,
                now_str,
                next,
                threshold_done,
            ],
        )?;
        if inserted == 1 {
            info!(subscription_id = %id, next_check_at = %next, "subscription created");
        } else {
            debug!("active subscription already exists");
        }

        // Read back; covers the race where two callers insert simultaneously.
        let sql = format!(
            "{SELECT_COLUMNS} WHERE tracking_number = ?1 AND push_user_id = ?2 AND active = 1"
        );
        let sub = db.query_row(
            &sql,
            params![new.tracking_number.as_str(), new.push_user_id],
            row_to_subscription,
        )?;
        Ok(sub)
    }

    /// Look up a subscription by primary key.
    pub fn get(&self, id: &str) -> Result<Subscription> {
        let db = self.conn()?;
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        db.query_row(&sql, params![id], row_to_subscription)
            .optional()?
            .ok_or_else(|| SubscriptionError::UnknownId { id: id.to_string() })
    }

    /// Most recent active subscription for a shipment, any device.
    pub fn get_active(&self, tracking_number: &str) -> Result<Option<Subscription>> {
        let db = self.conn()?;
        let sql = format!(
            "{SELECT_COLUMNS} WHERE tracking_number = ?1 AND active = 1
             ORDER BY created_at DESC LIMIT 1"
        );
        let sub = db
            .query_row(&sql, params![tracking_number], row_to_subscription)
            .optional()?;
        Ok(sub)
    }

    /// Deactivate every active subscription for a shipment.
    ///
    /// Returns the number of rows deactivated; `NotFound` if there were none.
    #[instrument(skip(self))]
    pub fn cancel(&self, tracking_number: &str, now: DateTime<Utc>) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE subscriptions SET active = 0, updated_at = ?1
             WHERE tracking_number = ?2 AND active = 1",
            params![db_time(now), tracking_number],
        )?;
        if n == 0 {
            return Err(SubscriptionError::NotFound {
                tracking_number: tracking_number.to_string(),
            });
        }
        info!(count = n, "subscription cancelled");
        Ok(n)
    }

    /// Active, undelivered subscriptions whose next check is at or before `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let db = self.conn()?;
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE active = 1 AND delivered_at IS NULL
               AND next_check_at IS NOT NULL AND next_check_at <= ?1
             ORDER BY next_check_at"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![db_time(now)], row_to_subscription)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Persist a completed check that did not end in delivery.
    ///
    /// Returns `false` without touching the row when the subscription was
    /// cancelled in the meantime.
    pub fn record_check(
        &self,
        id: &str,
        report: &TrackingReport,
        decision: &ScheduleDecision,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_str = db_time(now);
        let next = decision.next_check_at().map(db_time);
        let threshold_done = decision.reason().is_some_and(|r| r.is_threshold_check());
        let history = serde_json::to_string(&report.history)?;

        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let n = tx.execute(
            "UPDATE subscriptions
             SET current_state        = ?1,
                 history              = ?2,
                 origin               = CASE WHEN ?3 = '' THEN origin ELSE ?3 END,
                 destination          = CASE WHEN ?4 = '' THEN destination ELSE ?4 END,
                 admission_time       = COALESCE(?5, admission_time),
                 last_checked_at      = ?6,
                 next_check_at        = ?7,
                 checks_performed     = checks_performed + 1,
                 threshold_check_done = threshold_check_done OR ?8,
                 updated_at           = ?6
             WHERE id = ?9 AND active = 1",
            params![
                report.current_state,
                history,
                report.origin,
                report.destination,
                report.admission_time,
                now_str,
                next,
                threshold_done,
                id,
            ],
        )?;
        if n == 0 {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(SubscriptionError::UnknownId { id: id.to_string() });
            }
            debug!(subscription_id = %id, "subscription cancelled, check discarded");
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO verification_log (subscription_id, checked_at, state_found)
             VALUES (?1, ?2, ?3)",
            params![id, now_str, report.current_state],
        )?;
        tx.commit()?;
        debug!(subscription_id = %id, next_check_at = ?next, "check recorded");
        Ok(true)
    }

    /// Record the pickup state and stop further checks.
    ///
    /// Returns `true` only for the call that made the transition, so a
    /// caller sends the arrival notice at most once per subscription.
    /// Cancelled subscriptions never transition.
    pub fn mark_delivered(
        &self,
        id: &str,
        report: &TrackingReport,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_str = db_time(now);
        let history = serde_json::to_string(&report.history)?;

        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let n = tx.execute(
            "UPDATE subscriptions
             SET current_state    = ?1,
                 history          = ?2,
                 last_checked_at  = ?3,
                 next_check_at    = NULL,
                 checks_performed = checks_performed + 1,
                 delivered_at     = ?3,
                 updated_at       = ?3
             WHERE id = ?4 AND active = 1 AND delivered_at IS NULL",
            params![report.current_state, history, now_str, id],
        )?;
        if n == 1 {
            tx.execute(
                "INSERT INTO verification_log (subscription_id, checked_at, state_found)
                 VALUES (?1, ?2, ?3)",
                params![id, now_str, report.current_state],
            )?;
        }
        tx.commit()?;
        if n == 1 {
            info!(subscription_id = %id, "shipment delivered");
        }
        Ok(n == 1)
    }

    /// Push the next check out to `at` without counting a check.
    pub fn defer(&self, id: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE subscriptions SET next_check_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![db_time(at), db_time(now), id],
        )?;
        if n == 0 {
            return Err(SubscriptionError::UnknownId { id: id.to_string() });
        }
        Ok(())
    }

    /// Delete subscriptions delivered before `cutoff`, log rows first.
    pub fn purge_delivered(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let cutoff = db_time(cutoff);
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let log_entries = tx.execute(
            "DELETE FROM verification_log WHERE subscription_id IN (
                 SELECT id FROM subscriptions
                 WHERE delivered_at IS NOT NULL AND delivered_at < ?1)",
            params![cutoff],
        )?;
        let subscriptions = tx.execute(
            "DELETE FROM subscriptions WHERE delivered_at IS NOT NULL AND delivered_at < ?1",
            params![cutoff],
        )?;
        tx.commit()?;
        if subscriptions > 0 {
            info!(subscriptions, log_entries, "purged delivered subscriptions");
        }
        Ok(PurgeReport {
            subscriptions: subscriptions as u64,
            log_entries: log_entries as u64,
        })
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Result<SubscriptionStats> {
        let db = self.conn()?;
        let stats = db.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(active = 1), 0),
                    COALESCE(SUM(delivered_at IS NOT NULL), 0),
                    COALESCE(SUM(active = 1 AND delivered_at IS NULL
                                 AND next_check_at IS NOT NULL AND next_check_at <= ?1), 0)
             FROM subscriptions",
            params![db_time(now)],
            |row| {
                Ok(SubscriptionStats {
                    total: row.get::<_, i64>(0)? as u64,
                    active: row.get::<_, i64>(1)? as u64,
                    delivered: row.get::<_, i64>(2)? as u64,
                    due: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    /// Check log of one subscription, oldest first.
    pub fn verification_log(&self, id: &str) -> Result<Vec<VerificationRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT checked_at, state_found FROM verification_log
             WHERE subscription_id = ?1 ORDER BY checked_at, id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(VerificationRecord {
                checked_at: row.get(0)?,
                state_found: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Map a SQLite row to a `Subscription`.
fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    let history_json: String = row.get(10)?;
    let history = serde_json::from_str(&history_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    Ok(Subscription {
        id: row.get(0)?,
        tracking_number: row.get(1)?,
        push_user_id: row.get(2)?,
        phone: row.get(3)?,
        origin: row.get(4)?,
        destination: row.get(5)?,
        current_state: row.get(6)?,
        admission_time: row.get(7)?,
        sender: row.get(8)?,
        recipient: row.get(9)?,
        history,
        created_at: row.get(11)?,
        last_checked_at: row.get(12)?,
        next_check_at: row.get(13)?,
        checks_performed: row.get::<_, i64>(14)? as u32,
        threshold_check_done: row.get(15)?,
        active: row.get(16)?,
        delivered_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}
