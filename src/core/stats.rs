//! Usage aggregation business logic.
//!
//! Consumes `CycleStarted` events and keeps the per-day cycle/revenue
//! counters consistent with accepted transitions. Counters are serialized by
//! compare-and-set on the day's record version, independent of any machine
//! ordering; this module never touches machine fields.

use crate::db::{self, DbPool};
use crate::errors::{Error, Result};
use crate::models::{DailyRecord, DashboardStats, MachineStatus};
use chrono::{NaiveDate, Utc};
use tracing::{debug, instrument, warn};

/// Bounded retries for the read → compare-and-set loop. Conflicts only arise
/// from simultaneous starts on the same day, so a handful is plenty.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Adds one wash start to the day's counters, creating the day's record if
/// absent. Retries on version conflicts until the increment is accepted, so
/// concurrent starts across machines all land.
///
/// # Errors
///
/// Returns `Error::Conflict` only after exhausting the retry budget.
#[instrument(skip(pool))]
pub async fn record_cycle_start(
    pool: &DbPool,
    date: NaiveDate,
    amount: f64,
) -> Result<DailyRecord> {
    db::ensure_daily_record(pool, date).await?;

    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let current = db::get_daily_record(pool, date)
            .await?
            .unwrap_or_else(|| DailyRecord::empty(date));
        match db::compare_and_add(pool, date, current.version, amount).await {
            Ok(record) => {
                debug!(
                    "Recorded cycle start for {}: cycles={}, revenue={:.2}",
                    date, record.cycles, record.revenue
                );
                return Ok(record);
            }
            Err(Error::Conflict(_)) => {
                debug!(
                    "Daily record {} moved concurrently (attempt {}), re-reading",
                    date, attempt
                );
            }
            Err(e) => return Err(e),
        }
    }
    warn!(
        "Gave up recording cycle start for {} after {} attempts",
        date, MAX_CAS_ATTEMPTS
    );
    Err(Error::Conflict(0))
}

/// Day counters for the dashboard; a day with no starts reads as zeroes.
#[instrument(skip(pool))]
pub async fn get_daily_stats(pool: &DbPool, date: NaiveDate) -> Result<DailyRecord> {
    Ok(db::get_daily_record(pool, date)
        .await?
        .unwrap_or_else(|| DailyRecord::empty(date)))
}

/// Owner-dashboard snapshot: washing machine count, lifetime totals from the
/// transaction log, and today's counters.
#[instrument(skip(pool))]
pub async fn get_dashboard_stats(pool: &DbPool) -> Result<DashboardStats> {
    let machines = db::list_machines(pool).await?;
    let active_machines = machines
        .iter()
        .filter(|m| m.status == MachineStatus::Washing)
        .count() as i64;

    let (total_cycles, total_revenue) = db::get_lifetime_totals(pool).await?;
    let today = get_daily_stats(pool, Utc::now().date_naive()).await?;

    Ok(DashboardStats {
        active_machines,
        total_revenue,
        total_cycles,
        today_revenue: today.revenue,
        today_cycles: today.cycles,
    })
}
