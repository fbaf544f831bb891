use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::models::DailyRecord;
use chrono::NaiveDate;
use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument};

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Fetches the day's record, or `None` when no cycle has started that day.
#[instrument(skip(pool))]
pub async fn get_daily_record(pool: &DbPool, date: NaiveDate) -> Result<Option<DailyRecord>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn
        .prepare_cached("SELECT cycles, revenue, version FROM daily_records WHERE date = ?1")?;
    let record = stmt
        .query_row(params![date_key(date)], |row| {
            Ok(DailyRecord {
                date,
                cycles: row.get(0)?,
                revenue: row.get(1)?,
                version: row.get(2)?,
            })
        })
        .optional()?;
    Ok(record)
}

/// Makes sure the day's row exists, starting from zeroed counters. Safe to
/// race: `INSERT OR IGNORE` keeps whichever row got there first.
#[instrument(skip(pool))]
pub async fn ensure_daily_record(pool: &DbPool, date: NaiveDate) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    conn.execute(
        "INSERT OR IGNORE INTO daily_records (date, cycles, revenue, version)
         VALUES (?1, 0, 0.0, 0)",
        params![date_key(date)],
    )?;
    Ok(())
}

/// Adds one cycle and its revenue to the day's counters, guarded by the
/// record's version. The aggregator loops read → `compare_and_add` until a
/// write is accepted, the same discipline the machine registry uses.
///
/// # Errors
///
/// Returns `Error::Conflict` when another start won the race for this
/// version, `Error::NotFound` when the row does not exist yet.
#[instrument(skip(pool))]
pub async fn compare_and_add(
    pool: &DbPool,
    date: NaiveDate,
    expected_version: i64,
    amount: f64,
) -> Result<DailyRecord> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let key = date_key(date);
    let mut stmt = conn.prepare_cached(
        "UPDATE daily_records
         SET cycles = cycles + 1, revenue = revenue + ?1, version = version + 1
         WHERE date = ?2 AND version = ?3",
    )?;
    let rows = stmt.execute(params![amount, key, expected_version])?;
    if rows == 0 {
        let mut check = conn.prepare_cached("SELECT date FROM daily_records WHERE date = ?1")?;
        let exists: Option<String> = check
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        return Err(if exists.is_some() {
            // Day-level conflict; reported with a zero machine id since no
            // machine is involved.
            Error::Conflict(0)
        } else {
            Error::NotFound(format!("daily record {}", key))
        });
    }

    let mut reread =
        conn.prepare_cached("SELECT cycles, revenue, version FROM daily_records WHERE date = ?1")?;
    let record = reread.query_row(params![key], |row| {
        Ok(DailyRecord {
            date,
            cycles: row.get(0)?,
            revenue: row.get(1)?,
            version: row.get(2)?,
        })
    })?;
    debug!(
        "Daily record {} now cycles={}, revenue={:.2}",
        key, record.cycles, record.revenue
    );
    Ok(record)
}
