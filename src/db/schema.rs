use crate::errors::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info, instrument};

#[instrument(skip(conn))]
pub(crate) fn create_tables(conn: &Connection) -> Result<()> {
    debug!("Executing CREATE TABLE statements if tables do not exist.");
    conn.execute_batch(
        "BEGIN;

        CREATE TABLE IF NOT EXISTS machines (
            machine_id INTEGER PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'available',
            is_online BOOLEAN NOT NULL DEFAULT TRUE,
            whatsapp_number TEXT,
            time_remaining INTEGER NOT NULL DEFAULT 0,
            reserved_at DATETIME,
            cycle_started_at DATETIME,
            near_complete_notified BOOLEAN NOT NULL DEFAULT FALSE,
            machine_type TEXT NOT NULL DEFAULT 'washer',
            price REAL NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        );

        -- No FOREIGN KEY back to machines: payment history must survive an
        -- admin deleting the machine it was paid on.
        CREATE TABLE IF NOT EXISTS transactions (
            transaction_id TEXT PRIMARY KEY,
            machine_id INTEGER NOT NULL,
            amount REAL NOT NULL,
            whatsapp_number TEXT,
            timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- One row per UTC calendar day; version drives the aggregator's
        -- compare-and-set updates.
        CREATE TABLE IF NOT EXISTS daily_records (
            date TEXT PRIMARY KEY,
            cycles INTEGER NOT NULL DEFAULT 0,
            revenue REAL NOT NULL DEFAULT 0.0,
            version INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_timestamp
            ON transactions(timestamp);

        COMMIT;",
    )
    .map_err(|e| Error::Database(format!("Failed to create tables: {}", e)))?;
    info!("Database tables ensured (machines, transactions, daily_records).");
    Ok(())
}
