#![allow(dead_code)]
use crate::db::{DbPool, schema};
use crate::errors::{Error, Result};
use crate::models::MachineStatus;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")),
        )
        .with_test_writer() // Crucial for `cargo test` output
        .try_init(); // Use try_init to avoid panic if already initialized
}

// Helper to create an in-memory DbPool for testing; sets up the schema too.
pub(crate) async fn setup_test_db() -> Result<DbPool> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("Test DB: Failed to open in-memory: {}", e)))?;
    schema::create_tables(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) struct DirectInsertMachineArgs<'a> {
    pub(crate) conn: &'a Connection,
    pub(crate) machine_id: i64,
    pub(crate) status: MachineStatus,
    pub(crate) whatsapp_number: Option<&'a str>,
    pub(crate) time_remaining: i64,
    pub(crate) reserved_at: Option<DateTime<Utc>>,
    pub(crate) cycle_started_at: Option<DateTime<Utc>>,
    pub(crate) near_complete_notified: bool,
    pub(crate) price: f64,
}

// Quick machine insert for focused tests, bypassing the registry's create
// path so arbitrary states can be staged directly.
pub(crate) fn direct_insert_machine(args: &DirectInsertMachineArgs<'_>) -> Result<()> {
    let mut stmt = args.conn.prepare_cached(
        "INSERT INTO machines (machine_id, status, is_online, whatsapp_number, time_remaining,
                               reserved_at, cycle_started_at, near_complete_notified,
                               machine_type, price, version)
         VALUES (?1, ?2, TRUE, ?3, ?4, ?5, ?6, ?7, 'washer', ?8, 0)",
    )?;
    stmt.execute(params![
        args.machine_id,
        args.status.as_str(),
        args.whatsapp_number,
        args.time_remaining,
        args.reserved_at,
        args.cycle_started_at,
        args.near_complete_notified,
        args.price,
    ])?;
    Ok(())
}

pub(crate) fn count_transactions(conn: &Connection, machine_id: i64) -> Result<i64> {
    let mut stmt =
        conn.prepare_cached("SELECT COUNT(*) FROM transactions WHERE machine_id = ?1")?;
    stmt.query_row(params![machine_id], |row| row.get(0))
        .map_err(Error::from)
}
