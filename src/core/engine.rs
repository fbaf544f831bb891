//! Transition engine.
//!
//! Every lifecycle change follows the same shape: read a fresh snapshot,
//! check the guard against it, compute the full new field set, and commit
//! through the registry's compare-and-set with the snapshot's version. A
//! guard failure against the fresh snapshot is `InvalidTransition`; a version
//! that moved between read and write is `Conflict`, surfaced to the caller
//! to re-read and re-decide rather than silently retried here.

use crate::db::{self, DbPool, MachineUpdate};
use crate::errors::{Error, Result};
use crate::models::{CycleEvent, Machine, MachineStatus, Transaction};
use chrono::Utc;
use tracing::{debug, info, instrument};

/// Rebuilds the post-transition snapshot from the pre-transition one plus the
/// accepted update, sparing a re-read under the pool lock.
fn applied(snapshot: &Machine, update: &MachineUpdate, new_version: i64) -> Machine {
    Machine {
        machine_id: snapshot.machine_id,
        status: update.status,
        is_online: update.is_online,
        whatsapp_number: update.whatsapp_number.clone(),
        time_remaining: update.time_remaining,
        reserved_at: update.reserved_at,
        cycle_started_at: update.cycle_started_at,
        near_complete_notified: update.near_complete_notified,
        machine_type: snapshot.machine_type.clone(),
        price: snapshot.price,
        version: new_version,
    }
}

/// Normalizes a customer WhatsApp number: digits only, `60` country prefix
/// added when missing.
///
/// # Errors
///
/// Returns `Error::Validation` when the input contains no digits or the
/// normalized number has an implausible length.
pub fn normalize_whatsapp_number(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(Error::Validation(format!(
            "whatsapp number '{}' contains no digits",
            raw
        )));
    }
    let normalized = if digits.starts_with("60") {
        digits
    } else {
        format!("60{}", digits)
    };
    if normalized.len() < 10 || normalized.len() > 14 {
        return Err(Error::Validation(format!(
            "whatsapp number '{}' has an invalid length after normalization",
            normalized
        )));
    }
    Ok(normalized)
}

/// available → reserved. Captures the contact number and the reservation
/// timestamp.
#[instrument(skip(pool, whatsapp_number))]
pub async fn reserve(
    pool: &DbPool,
    machine_id: i64,
    whatsapp_number: Option<&str>,
) -> Result<Machine> {
    let normalized = whatsapp_number
        .map(normalize_whatsapp_number)
        .transpose()?;

    let snapshot = db::get_machine(pool, machine_id).await?;
    if snapshot.status != MachineStatus::Available {
        return Err(Error::InvalidTransition {
            machine_id,
            current: snapshot.status,
            attempted: "reserve",
        });
    }

    let mut update = MachineUpdate::from(&snapshot);
    update.status = MachineStatus::Reserved;
    update.reserved_at = Some(Utc::now());
    update.whatsapp_number = normalized;

    let new_version = db::compare_and_set(pool, machine_id, snapshot.version, &update).await?;
    info!("Machine {} reserved (version {})", machine_id, new_version);
    Ok(applied(&snapshot, &update, new_version))
}

/// reserved → washing. Arms the countdown, records the transaction, and
/// stages the `CycleStarted` event — the compare-and-set and the transaction
/// insert commit together, so the record exists iff the transition was
/// accepted.
#[instrument(skip(pool))]
pub async fn confirm_start(
    pool: &DbPool,
    machine_id: i64,
    amount: f64,
    wash_duration_secs: i64,
) -> Result<(Machine, Transaction, CycleEvent)> {
    if amount <= 0.0 {
        return Err(Error::Validation(format!(
            "payment amount must be positive (got {})",
            amount
        )));
    }

    let snapshot = db::get_machine(pool, machine_id).await?;
    if snapshot.status != MachineStatus::Reserved {
        return Err(Error::InvalidTransition {
            machine_id,
            current: snapshot.status,
            attempted: "confirm a wash start",
        });
    }

    let now = Utc::now();
    let mut update = MachineUpdate::from(&snapshot);
    update.status = MachineStatus::Washing;
    update.time_remaining = wash_duration_secs;
    update.reserved_at = None;
    update.cycle_started_at = Some(now);
    update.near_complete_notified = false;

    let txn = Transaction {
        transaction_id: crate::db::transactions::new_transaction_id(),
        machine_id,
        amount,
        whatsapp_number: update.whatsapp_number.clone(),
        timestamp: now,
    };
    let new_version =
        db::commit_wash_start(pool, machine_id, snapshot.version, &update, &txn).await?;

    let event = CycleEvent::CycleStarted {
        machine_id,
        amount,
        whatsapp_number: update.whatsapp_number.clone(),
        started_at: now,
    };
    info!(
        "Machine {} washing for {}s (transaction {})",
        machine_id, wash_duration_secs, txn.transaction_id
    );
    Ok((applied(&snapshot, &update, new_version), txn, event))
}

/// reserved → available. Clears the contact number and reservation
/// timestamp; no transaction, no events.
#[instrument(skip(pool))]
pub async fn cancel(pool: &DbPool, machine_id: i64) -> Result<Machine> {
    let snapshot = db::get_machine(pool, machine_id).await?;
    if snapshot.status != MachineStatus::Reserved {
        return Err(Error::InvalidTransition {
            machine_id,
            current: snapshot.status,
            attempted: "cancel",
        });
    }

    let mut update = MachineUpdate::from(&snapshot);
    update.status = MachineStatus::Available;
    update.whatsapp_number = None;
    update.reserved_at = None;
    update.time_remaining = 0;

    let new_version = db::compare_and_set(pool, machine_id, snapshot.version, &update).await?;
    info!("Machine {} reservation cancelled", machine_id);
    Ok(applied(&snapshot, &update, new_version))
}

/// washing → available, from a fresh read. Used for the trusted
/// hardware-complete signal; early completion is honored.
#[instrument(skip(pool))]
pub async fn complete_cycle(pool: &DbPool, machine_id: i64) -> Result<(Machine, CycleEvent)> {
    let snapshot = db::get_machine(pool, machine_id).await?;
    if snapshot.status != MachineStatus::Washing {
        return Err(Error::InvalidTransition {
            machine_id,
            current: snapshot.status,
            attempted: "complete",
        });
    }
    complete_from_snapshot(pool, &snapshot).await
}

/// washing → available against an already-held snapshot; the snapshot's
/// version guards the write, so a machine that moved on since the read
/// produces a `Conflict` instead of a double completion.
async fn complete_from_snapshot(
    pool: &DbPool,
    snapshot: &Machine,
) -> Result<(Machine, CycleEvent)> {
    let started_at = snapshot.cycle_started_at.unwrap_or_else(Utc::now);
    let event = CycleEvent::CycleCompleted {
        machine_id: snapshot.machine_id,
        whatsapp_number: snapshot.whatsapp_number.clone(),
        started_at,
    };

    let mut update = MachineUpdate::from(snapshot);
    update.status = MachineStatus::Available;
    update.whatsapp_number = None;
    update.reserved_at = None;
    update.cycle_started_at = None;
    update.time_remaining = 0;
    update.near_complete_notified = false;

    let new_version =
        db::compare_and_set(pool, snapshot.machine_id, snapshot.version, &update).await?;
    info!("Machine {} cycle completed", snapshot.machine_id);
    Ok((applied(snapshot, &update, new_version), event))
}

/// One countdown step for a washing machine, driven by the scheduler.
///
/// Decrements by `elapsed_secs` floored at zero. A zero-crossing (the
/// pre-decrement value was positive, the new value is zero) drives the
/// completion edge exactly once; crossing the near-complete threshold with
/// the latch unset records the latch in the same compare-and-set that
/// records the decrement, so the signal cannot re-fire within a cycle.
///
/// # Errors
///
/// Returns `Error::Conflict` when another actor changed the machine since
/// the snapshot was taken; the scheduler treats that as benign.
#[instrument(skip(pool, snapshot), fields(machine_id = snapshot.machine_id))]
pub async fn apply_tick(
    pool: &DbPool,
    snapshot: &Machine,
    elapsed_secs: i64,
    near_complete_threshold_secs: i64,
) -> Result<Vec<CycleEvent>> {
    if snapshot.status != MachineStatus::Washing || snapshot.time_remaining <= 0 {
        return Ok(Vec::new());
    }

    let previous = snapshot.time_remaining;
    let remaining = (previous - elapsed_secs).max(0);

    if remaining == 0 {
        // Zero-crossing: the pre-decrement value was > 0, so this fires once.
        let (_, event) = complete_from_snapshot(pool, snapshot).await?;
        return Ok(vec![event]);
    }

    let crossed_threshold = !snapshot.near_complete_notified
        && previous > near_complete_threshold_secs
        && remaining <= near_complete_threshold_secs;

    let mut update = MachineUpdate::from(snapshot);
    update.time_remaining = remaining;
    if crossed_threshold {
        update.near_complete_notified = true;
    }
    db::compare_and_set(pool, snapshot.machine_id, snapshot.version, &update).await?;
    debug!(
        "Machine {} countdown {} -> {}",
        snapshot.machine_id, previous, remaining
    );

    if crossed_threshold {
        let started_at = snapshot.cycle_started_at.unwrap_or_else(Utc::now);
        return Ok(vec![CycleEvent::NearComplete {
            machine_id: snapshot.machine_id,
            whatsapp_number: snapshot.whatsapp_number.clone(),
            started_at,
        }]);
    }
    Ok(Vec::new())
}

/// Admin override. Skips the guard but still commits through compare-and-set,
/// so it serializes with every other transition.
///
/// Target `available` clears all transient fields; target `washing` arms a
/// fresh countdown (no transaction, no `CycleStarted` — an unpaid override
/// must not show up in revenue); `broken`/`maintenance` zero the countdown so
/// the scheduler skips the machine on its next tick.
#[instrument(skip(pool))]
pub async fn admin_set_status(
    pool: &DbPool,
    machine_id: i64,
    target: MachineStatus,
    wash_duration_secs: i64,
) -> Result<Machine> {
    if target == MachineStatus::Reserved {
        return Err(Error::Validation(
            "admin cannot force a machine into 'reserved'".to_string(),
        ));
    }

    let snapshot = db::get_machine(pool, machine_id).await?;
    let mut update = MachineUpdate::from(&snapshot);
    update.status = target;
    match target {
        MachineStatus::Available => {
            update.whatsapp_number = None;
            update.reserved_at = None;
            update.cycle_started_at = None;
            update.time_remaining = 0;
            update.near_complete_notified = false;
        }
        MachineStatus::Washing => {
            update.reserved_at = None;
            update.cycle_started_at = Some(Utc::now());
            update.time_remaining = wash_duration_secs;
            update.near_complete_notified = false;
        }
        MachineStatus::Broken | MachineStatus::Maintenance => {
            update.time_remaining = 0;
        }
        MachineStatus::Reserved => unreachable!("rejected above"),
    }

    let new_version = db::compare_and_set(pool, machine_id, snapshot.version, &update).await?;
    info!(
        "Admin set machine {} from '{}' to '{}'",
        machine_id, snapshot.status, target
    );
    Ok(applied(&snapshot, &update, new_version))
}

/// Hardware heartbeat: records `is_online` only. Never part of any guard.
#[instrument(skip(pool))]
pub async fn set_online(pool: &DbPool, machine_id: i64, online: bool) -> Result<Machine> {
    let snapshot = db::get_machine(pool, machine_id).await?;
    if snapshot.is_online == online {
        return Ok(snapshot);
    }
    let mut update = MachineUpdate::from(&snapshot);
    update.is_online = online;
    let new_version = db::compare_and_set(pool, machine_id, snapshot.version, &update).await?;
    debug!("Machine {} is_online={}", machine_id, online);
    Ok(applied(&snapshot, &update, new_version))
}
