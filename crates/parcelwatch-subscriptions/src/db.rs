use rusqlite::Connection;

use crate::error::Result;

/// Initialise the subscription tables and their indexes.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subscriptions (
            id                   TEXT    NOT NULL PRIMARY KEY,
            tracking_number      TEXT    NOT NULL,
            push_user_id         TEXT    NOT NULL,
            phone                TEXT,
            origin               TEXT    NOT NULL DEFAULT '',
            destination          TEXT    NOT NULL DEFAULT '',
            current_state        TEXT    NOT NULL DEFAULT '',
            admission_time       TEXT,               -- provider text, not normalised
            sender               TEXT,
            recipient            TEXT,
            history              TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            created_at           TEXT    NOT NULL,
            last_checked_at      TEXT,
            next_check_at        TEXT,               -- RFC 3339 UTC or NULL
            checks_performed     INTEGER NOT NULL DEFAULT 0,
            threshold_check_done INTEGER NOT NULL DEFAULT 0,
            active               INTEGER NOT NULL DEFAULT 1,
            delivered_at         TEXT,
            updated_at           TEXT    NOT NULL
        ) STRICT;

        -- Due query: WHERE active = 1 AND next_check_at <= ? ORDER BY next_check_at
        CREATE INDEX IF NOT EXISTS idx_subscriptions_next_check
            ON subscriptions (next_check_at);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_tracking_number
            ON subscriptions (tracking_number);
        -- At most one active subscription per device and shipment.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_active_pair
            ON subscriptions (tracking_number, push_user_id) WHERE active = 1;

        CREATE TABLE IF NOT EXISTS verification_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id TEXT    NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
            checked_at      TEXT    NOT NULL,
            state_found     TEXT    NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_verification_log_subscription
            ON verification_log (subscription_id, checked_at);
        ",
    )?;
    Ok(())
}
