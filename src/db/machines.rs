use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::models::{Machine, MachineStatus, Transaction};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument, warn};

/// Full mutable field set written by one accepted transition.
///
/// The transition engine reads a snapshot, edits a copy of these fields, and
/// hands them back to [`compare_and_set`] together with the snapshot's
/// version. `price` and `machine_type` are provisioning-time configuration
/// and are deliberately absent.
#[derive(Debug, Clone)]
pub struct MachineUpdate {
    pub status: MachineStatus,
    pub is_online: bool,
    pub whatsapp_number: Option<String>,
    pub time_remaining: i64,
    pub reserved_at: Option<DateTime<Utc>>,
    pub cycle_started_at: Option<DateTime<Utc>>,
    pub near_complete_notified: bool,
}

impl From<&Machine> for MachineUpdate {
    fn from(machine: &Machine) -> Self {
        Self {
            status: machine.status,
            is_online: machine.is_online,
            whatsapp_number: machine.whatsapp_number.clone(),
            time_remaining: machine.time_remaining,
            reserved_at: machine.reserved_at,
            cycle_started_at: machine.cycle_started_at,
            near_complete_notified: machine.near_complete_notified,
        }
    }
}

pub struct CreateMachineArgs {
    /// Explicit id; `None` picks the next integer above the current max.
    pub machine_id: Option<i64>,
    pub machine_type: String,
    pub price: f64,
}

fn row_to_machine(row: &Row<'_>) -> rusqlite::Result<Machine> {
    let status_str: String = row.get("status")?;
    let status = MachineStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown machine status '{}'", status_str).into(),
        )
    })?;
    Ok(Machine {
        machine_id: row.get("machine_id")?,
        status,
        is_online: row.get("is_online")?,
        whatsapp_number: row.get("whatsapp_number")?,
        time_remaining: row.get("time_remaining")?,
        reserved_at: row.get("reserved_at")?,
        cycle_started_at: row.get("cycle_started_at")?,
        near_complete_notified: row.get("near_complete_notified")?,
        machine_type: row.get("machine_type")?,
        price: row.get("price")?,
        version: row.get("version")?,
    })
}

const MACHINE_COLUMNS: &str = "machine_id, status, is_online, whatsapp_number, time_remaining, \
     reserved_at, cycle_started_at, near_complete_notified, machine_type, price, version";

/// Fetches a single machine snapshot.
///
/// # Errors
///
/// Returns `Error::NotFound` for an unknown id, `Error::Database` if the
/// lock cannot be acquired.
#[instrument(skip(pool))]
pub async fn get_machine(pool: &DbPool, machine_id: i64) -> Result<Machine> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM machines WHERE machine_id = ?1",
        MACHINE_COLUMNS
    ))?;
    stmt.query_row(params![machine_id], row_to_machine)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("machine {}", machine_id)))
}

/// Lists all machines ordered by numeric `machine_id`.
#[instrument(skip(pool))]
pub async fn list_machines(pool: &DbPool) -> Result<Vec<Machine>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM machines ORDER BY machine_id ASC",
        MACHINE_COLUMNS
    ))?;
    let machines = stmt
        .query_map([], row_to_machine)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(machines)
}

/// Creates a machine row in the initial `available` state.
///
/// # Returns
///
/// Returns `Ok(i64)` with the new machine id.
///
/// # Errors
///
/// Returns `Error::Validation` if an explicit id is already taken or the
/// price is negative, `Error::Database` on lock failure.
#[instrument(skip(pool, args))]
pub async fn create_machine(pool: &DbPool, args: &CreateMachineArgs) -> Result<i64> {
    if args.price < 0.0 {
        return Err(Error::Validation(format!(
            "machine price must not be negative (got {})",
            args.price
        )));
    }
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;

    let machine_id = match args.machine_id {
        Some(id) => {
            let mut stmt =
                conn.prepare_cached("SELECT machine_id FROM machines WHERE machine_id = ?1")?;
            let exists: Option<i64> = stmt.query_row(params![id], |row| row.get(0)).optional()?;
            if exists.is_some() {
                return Err(Error::Validation(format!("machine {} already exists", id)));
            }
            id
        }
        None => {
            let mut stmt =
                conn.prepare_cached("SELECT COALESCE(MAX(machine_id), 0) + 1 FROM machines")?;
            stmt.query_row([], |row| row.get(0))?
        }
    };

    conn.execute(
        "INSERT INTO machines (machine_id, status, is_online, machine_type, price)
         VALUES (?1, 'available', TRUE, ?2, ?3)",
        params![machine_id, args.machine_type, args.price],
    )?;
    info!(
        "Created machine {} (type='{}', price={:.2})",
        machine_id, args.machine_type, args.price
    );
    Ok(machine_id)
}

/// Removes a machine row. Admin-only path; the caller is assumed to have
/// been authorized by the excluded auth layer.
#[instrument(skip(pool))]
pub async fn delete_machine(pool: &DbPool, machine_id: i64) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows = conn.execute(
        "DELETE FROM machines WHERE machine_id = ?1",
        params![machine_id],
    )?;
    if rows == 0 {
        return Err(Error::NotFound(format!("machine {}", machine_id)));
    }
    info!("Deleted machine {}", machine_id);
    Ok(())
}

/// The registry's single mutation primitive.
///
/// Writes the full field set and bumps `version`, guarded by
/// `version = expected_version`. A zero-row update means either the machine
/// vanished (`NotFound`) or another transition won the race (`Conflict`);
/// the follow-up existence check disambiguates the two.
///
/// # Returns
///
/// Returns `Ok(i64)` with the new version on an accepted write.
///
/// # Errors
///
/// Returns `Error::Conflict` when the stored version no longer matches
/// `expected_version`, `Error::NotFound` for an unknown id.
#[instrument(skip(pool, update))]
pub async fn compare_and_set(
    pool: &DbPool,
    machine_id: i64,
    expected_version: i64,
    update: &MachineUpdate,
) -> Result<i64> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows = execute_cas(&conn, machine_id, expected_version, update)?;
    if rows == 0 {
        return Err(cas_failure(&conn, machine_id)?);
    }
    debug!(
        "Machine {} advanced to version {} (status='{}')",
        machine_id,
        expected_version + 1,
        update.status
    );
    Ok(expected_version + 1)
}

/// Commits a reserved → washing transition and its transaction record as one
/// sqlite transaction, so the `Transaction` row exists iff the compare-and-set
/// was accepted.
///
/// # Errors
///
/// Returns `Error::Conflict` / `Error::NotFound` exactly as
/// [`compare_and_set`] does; `Error::Database` on commit failure.
#[instrument(skip(pool, update, txn))]
pub async fn commit_wash_start(
    pool: &DbPool,
    machine_id: i64,
    expected_version: i64,
    update: &MachineUpdate,
    txn: &Transaction,
) -> Result<i64> {
    let mut conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock for wash start".to_string()))?;
    let tx = conn
        .transaction()
        .map_err(|e| Error::Database(format!("Failed to start transaction: {}", e)))?;

    let rows = execute_cas(&tx, machine_id, expected_version, update)?;
    if rows == 0 {
        let failure = cas_failure(&tx, machine_id)?;
        warn!("Wash start for machine {} not committed: {}", machine_id, failure);
        return Err(failure);
    }

    crate::db::transactions::insert_transaction(&tx, txn)?;

    tx.commit().map_err(|e| {
        Error::Database(format!(
            "Failed to commit wash start for machine {}: {}",
            machine_id, e
        ))
    })?;
    info!(
        "Committed wash start for machine {}: transaction {} amount={:.2}",
        machine_id, txn.transaction_id, txn.amount
    );
    Ok(expected_version + 1)
}

fn execute_cas(
    conn: &rusqlite::Connection,
    machine_id: i64,
    expected_version: i64,
    update: &MachineUpdate,
) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "UPDATE machines
         SET status = ?1, is_online = ?2, whatsapp_number = ?3, time_remaining = ?4,
             reserved_at = ?5, cycle_started_at = ?6, near_complete_notified = ?7,
             version = version + 1
         WHERE machine_id = ?8 AND version = ?9",
    )?;
    let rows = stmt.execute(params![
        update.status.as_str(),
        update.is_online,
        update.whatsapp_number,
        update.time_remaining,
        update.reserved_at,
        update.cycle_started_at,
        update.near_complete_notified,
        machine_id,
        expected_version,
    ])?;
    Ok(rows)
}

fn cas_failure(conn: &rusqlite::Connection, machine_id: i64) -> Result<Error> {
    let mut stmt = conn.prepare_cached("SELECT machine_id FROM machines WHERE machine_id = ?1")?;
    let exists: Option<i64> = stmt
        .query_row(params![machine_id], |row| row.get(0))
        .optional()?;
    Ok(if exists.is_some() {
        Error::Conflict(machine_id)
    } else {
        Error::NotFound(format!("machine {}", machine_id))
    })
}

/// Provisions the configured default fleet, but only when the machines table
/// is empty. One-time bootstrapping, deliberately outside the transition
/// engine.
#[instrument(skip(pool, config))]
pub async fn seed_default_machines(pool: &DbPool, config: &AppConfig) -> Result<usize> {
    {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock for seeding".to_string()))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM machines", [], |row| row.get(0))?;
        if count > 0 {
            debug!("Machines table already has {} row(s), skipping seed.", count);
            return Ok(0);
        }
    }

    let mut created = 0;
    for machine_cfg in &config.machines {
        create_machine(
            pool,
            &CreateMachineArgs {
                machine_id: machine_cfg.machine_id,
                machine_type: machine_cfg.machine_type.clone(),
                price: machine_cfg.price,
            },
        )
        .await?;
        created += 1;
    }
    info!("Seeded {} default machine(s).", created);
    Ok(created)
}
