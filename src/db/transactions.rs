use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::models::Transaction;
use rusqlite::{Connection, params};
use tracing::{debug, instrument};

/// Builds a `txn_` id from a fresh v4 uuid (first 12 hex chars).
pub(crate) fn new_transaction_id() -> String {
    format!("txn_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Inserts one immutable transaction row.
///
/// Takes a raw connection so the wash-start path can run it inside the same
/// sqlite transaction as the machine compare-and-set.
pub(crate) fn insert_transaction(conn: &Connection, txn: &Transaction) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO transactions (transaction_id, machine_id, amount, whatsapp_number, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    stmt.execute(params![
        txn.transaction_id,
        txn.machine_id,
        txn.amount,
        txn.whatsapp_number,
        txn.timestamp,
    ])?;
    Ok(())
}

/// Returns the most recent transactions, newest first.
///
/// # Errors
///
/// Returns `Error::Database` if the lock cannot be acquired.
#[instrument(skip(pool))]
pub async fn get_recent_transactions(pool: &DbPool, limit: usize) -> Result<Vec<Transaction>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT transaction_id, machine_id, amount, whatsapp_number, timestamp
         FROM transactions ORDER BY timestamp DESC, transaction_id DESC LIMIT ?1",
    )?;
    let transactions = stmt
        .query_map(params![limit as i64], |row| {
            Ok(Transaction {
                transaction_id: row.get(0)?,
                machine_id: row.get(1)?,
                amount: row.get(2)?,
                whatsapp_number: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    debug!("Fetched {} recent transaction(s)", transactions.len());
    Ok(transactions)
}

/// All-time cycle count and revenue, for the owner dashboard.
#[instrument(skip(pool))]
pub async fn get_lifetime_totals(pool: &DbPool) -> Result<(i64, f64)> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt =
        conn.prepare_cached("SELECT COUNT(*), COALESCE(SUM(amount), 0.0) FROM transactions")?;
    let totals = stmt.query_row([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(totals)
}
