//! Countdown scheduler.
//!
//! One background task drives every washing machine's countdown and the
//! optional reservation-expiry sweep. Clients only ever read
//! `time_remaining`; nothing outside this loop decrements it, so every
//! viewer of a machine sees the same authoritative clock.

use crate::core::{engine, service::LaundryService};
use crate::errors::{Error, Result};
use crate::models::{CycleEvent, MachineStatus};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument};

/// One sweep over the fleet: countdown ticks for washing machines, expiry
/// for stale reservations.
///
/// A `Conflict` on any per-machine edge is benign — another actor changed
/// that machine between the snapshot and the write — and skips the machine
/// for this sweep only. Returns the events the sweep produced, which have
/// already been fanned out to the aggregator and dispatcher.
#[instrument(skip(service))]
pub async fn tick_once(service: &LaundryService, elapsed_secs: i64) -> Result<Vec<CycleEvent>> {
    let machines = crate::db::list_machines(service.pool()).await?;
    let threshold = service.config().near_complete_threshold_secs;
    let expiry_window = service
        .config()
        .reservation_expiry_secs
        .map(Duration::seconds);
    let now = Utc::now();

    let mut all_events = Vec::new();
    for machine in &machines {
        match machine.status {
            MachineStatus::Washing => {
                match engine::apply_tick(service.pool(), machine, elapsed_secs, threshold).await {
                    Ok(events) => {
                        service.handle_events(&events).await;
                        all_events.extend(events);
                    }
                    Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => {
                        debug!(
                            "Machine {} changed during tick, skipping this sweep",
                            machine.machine_id
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            MachineStatus::Reserved => {
                let Some(window) = expiry_window else { continue };
                let Some(reserved_at) = machine.reserved_at else {
                    continue;
                };
                if now - reserved_at < window {
                    continue;
                }
                match engine::cancel(service.pool(), machine.machine_id).await {
                    Ok(_) => {
                        info!(
                            "Expired reservation on machine {} (held since {})",
                            machine.machine_id, reserved_at
                        );
                    }
                    // The reservation progressed to washing (or was otherwise
                    // resolved) between snapshot and write; nothing to expire.
                    Err(Error::Conflict(_))
                    | Err(Error::InvalidTransition { .. })
                    | Err(Error::NotFound(_)) => {
                        debug!(
                            "Reservation on machine {} progressed before expiry",
                            machine.machine_id
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {}
        }
    }
    Ok(all_events)
}

/// Scheduler loop. Whole elapsed seconds accumulate across ticks, so a slow
/// sweep decrements by however long it actually took rather than drifting.
pub async fn run(service: Arc<LaundryService>) {
    let tick_secs = service.config().tick_interval_secs;
    let mut ticker = interval(std::time::Duration::from_secs(tick_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Countdown scheduler running at {}s ticks.", tick_secs);

    let mut last = Instant::now();
    loop {
        ticker.tick().await;
        let elapsed_secs = last.elapsed().as_secs() as i64;
        if elapsed_secs == 0 {
            continue;
        }
        // Carry sub-second remainders into the next sweep.
        last += std::time::Duration::from_secs(elapsed_secs as u64);

        if let Err(e) = tick_once(&service, elapsed_secs).await {
            error!("Scheduler sweep failed: {}", e);
        }
    }
}
