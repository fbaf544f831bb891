//! Boundary facade for the excluded UI, auth, and hardware layers.
//!
//! `LaundryService` owns the registry pool, the configuration, and the
//! notification dispatcher. Every mutation enters through the transition
//! engine; the events an accepted transition stages are fanned out from here
//! to the usage aggregator and the dispatcher, which never write machine
//! state themselves.

use crate::config::AppConfig;
use crate::core::{engine, notify::NotificationDispatcher, notify::NotificationTransport, stats};
use crate::db::{self, DbPool};
use crate::errors::Result;
use crate::models::{
    CycleEvent, DailyRecord, DashboardStats, Machine, MachineStatus, Transaction,
};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, instrument};

/// The dashboard's transaction feed never pages deeper than this.
const MAX_RECENT_TRANSACTIONS: usize = 50;

pub struct LaundryService {
    db_pool: DbPool,
    config: Arc<AppConfig>,
    dispatcher: NotificationDispatcher,
}

impl LaundryService {
    pub fn new(
        db_pool: DbPool,
        config: Arc<AppConfig>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        let dispatcher = NotificationDispatcher::new(
            transport,
            config.wash_duration_secs,
            config.near_complete_threshold_secs,
        );
        Self {
            db_pool,
            config,
            dispatcher,
        }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.db_pool
    }

    pub(crate) fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Read-only fleet snapshot for the kiosk display, ordered by machine id.
    pub async fn list_machines(&self) -> Result<Vec<Machine>> {
        db::list_machines(&self.db_pool).await
    }

    pub async fn get_machine(&self, machine_id: i64) -> Result<Machine> {
        db::get_machine(&self.db_pool, machine_id).await
    }

    /// Customer selects a machine on the kiosk. The optional contact number
    /// is normalized and held until the cycle ends.
    #[instrument(skip(self, whatsapp_number))]
    pub async fn reserve_machine(
        &self,
        machine_id: i64,
        whatsapp_number: Option<&str>,
    ) -> Result<Machine> {
        engine::reserve(&self.db_pool, machine_id, whatsapp_number).await
    }

    /// Payment outcome for a reserved machine. A verified payment starts the
    /// wash and returns the transaction; an unverified one routes to the
    /// cancellation edge and returns no transaction.
    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        machine_id: i64,
        amount: f64,
        verified: bool,
    ) -> Result<(Machine, Option<Transaction>)> {
        if !verified {
            let machine = engine::cancel(&self.db_pool, machine_id).await?;
            return Ok((machine, None));
        }
        let (machine, txn, event) = engine::confirm_start(
            &self.db_pool,
            machine_id,
            amount,
            self.config.wash_duration_secs,
        )
        .await?;
        self.handle_events(std::slice::from_ref(&event)).await;
        Ok((machine, Some(txn)))
    }

    /// Trusted START-button press from the device layer. Payment already
    /// happened at reservation time in this flow, so the machine's configured
    /// price is the transaction amount.
    #[instrument(skip(self))]
    pub async fn hardware_start_signal(&self, machine_id: i64) -> Result<Machine> {
        let snapshot = db::get_machine(&self.db_pool, machine_id).await?;
        let (machine, _txn, event) = engine::confirm_start(
            &self.db_pool,
            machine_id,
            snapshot.price,
            self.config.wash_duration_secs,
        )
        .await?;
        self.handle_events(std::slice::from_ref(&event)).await;
        Ok(machine)
    }

    /// Trusted early-completion signal from the device layer.
    #[instrument(skip(self))]
    pub async fn hardware_complete_signal(&self, machine_id: i64) -> Result<Machine> {
        let (machine, event) = engine::complete_cycle(&self.db_pool, machine_id).await?;
        self.handle_events(std::slice::from_ref(&event)).await;
        Ok(machine)
    }

    /// Hardware heartbeat; flips `is_online` only.
    #[instrument(skip(self))]
    pub async fn hardware_heartbeat(&self, machine_id: i64, online: bool) -> Result<Machine> {
        engine::set_online(&self.db_pool, machine_id, online).await
    }

    /// Admin override; the excluded auth layer has already authorized the
    /// caller.
    #[instrument(skip(self))]
    pub async fn admin_set_status(
        &self,
        machine_id: i64,
        status: MachineStatus,
    ) -> Result<Machine> {
        engine::admin_set_status(
            &self.db_pool,
            machine_id,
            status,
            self.config.wash_duration_secs,
        )
        .await
    }

    #[instrument(skip(self, args))]
    pub async fn admin_create_machine(&self, args: &db::CreateMachineArgs) -> Result<i64> {
        db::create_machine(&self.db_pool, args).await
    }

    #[instrument(skip(self))]
    pub async fn admin_delete_machine(&self, machine_id: i64) -> Result<()> {
        db::delete_machine(&self.db_pool, machine_id).await
    }

    pub async fn get_daily_stats(&self, date: NaiveDate) -> Result<DailyRecord> {
        stats::get_daily_stats(&self.db_pool, date).await
    }

    pub async fn get_recent_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        db::get_recent_transactions(&self.db_pool, limit.min(MAX_RECENT_TRANSACTIONS)).await
    }

    pub async fn get_dashboard_stats(&self) -> Result<DashboardStats> {
        stats::get_dashboard_stats(&self.db_pool).await
    }

    /// Fans accepted-transition events out to the downstream consumers:
    /// aggregator first (stats must never trail a sent notification), then
    /// the dispatcher. Aggregation failures are logged, not propagated — the
    /// transition itself already committed.
    pub(crate) async fn handle_events(&self, events: &[CycleEvent]) {
        for event in events {
            if let CycleEvent::CycleStarted {
                amount, started_at, ..
            } = event
            {
                if let Err(e) =
                    stats::record_cycle_start(&self.db_pool, started_at.date_naive(), *amount)
                        .await
                {
                    error!(
                        "Failed to aggregate cycle start for machine {}: {}",
                        event.machine_id(),
                        e
                    );
                }
            }
            self.dispatcher.dispatch(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notify::test_support::RecordingTransport;
    use crate::core::notify::NotificationKind;
    use crate::core::scheduler;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Error;
    use chrono::Utc;

    async fn service_with(
        wash_duration_secs: i64,
        transport: Arc<RecordingTransport>,
    ) -> Result<LaundryService> {
        let pool = setup_test_db().await?;
        let config = AppConfig {
            wash_duration_secs,
            ..AppConfig::default()
        };
        let service = LaundryService::new(pool, Arc::new(config), transport);
        db::seed_default_machines(service.pool(), service.config()).await?;
        Ok(service)
    }

    #[tokio::test]
    async fn test_full_cycle_scenario() -> Result<()> {
        init_test_tracing();
        let transport = RecordingTransport::new();
        let service = service_with(3, transport.clone()).await?;

        // Machine 1 available at price 5.00.
        let machine = service.get_machine(1).await?;
        assert_eq!(machine.status, MachineStatus::Available);
        assert!((machine.price - 5.0).abs() < f64::EPSILON);

        let reserved = service.reserve_machine(1, Some("0123456789")).await?;
        assert_eq!(reserved.status, MachineStatus::Reserved);

        let (washing, txn) = service.confirm_payment(1, 5.0, true).await?;
        assert_eq!(washing.status, MachineStatus::Washing);
        assert_eq!(washing.time_remaining, 3);
        let txn = txn.expect("verified payment must create a transaction");
        assert!((txn.amount - 5.0).abs() < f64::EPSILON);

        // Drive the countdown past zero through the scheduler path.
        for _ in 0..4 {
            scheduler::tick_once(&service, 1).await?;
        }

        let done = service.get_machine(1).await?;
        assert_eq!(done.status, MachineStatus::Available);
        assert_eq!(done.time_remaining, 0);
        assert!(done.whatsapp_number.is_none());

        let sent = transport.sent.lock().await;
        let completions: Vec<_> = sent
            .iter()
            .filter(|i| i.kind == NotificationKind::Done)
            .collect();
        assert_eq!(completions.len(), 1, "Exactly one completion intent");

        // One transaction, one aggregated cycle.
        let today = service.get_daily_stats(Utc::now().date_naive()).await?;
        assert_eq!(today.cycles, 1);
        assert!((today.revenue - 5.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[tokio::test]
    async fn test_unverified_payment_cancels_without_side_effects() -> Result<()> {
        init_test_tracing();
        let transport = RecordingTransport::new();
        let service = service_with(180, transport.clone()).await?;

        service.reserve_machine(1, None).await?;
        let (machine, txn) = service.confirm_payment(1, 5.0, false).await?;
        assert_eq!(machine.status, MachineStatus::Available);
        assert!(txn.is_none());

        assert!(service.get_recent_transactions(50).await?.is_empty());
        let today = service.get_daily_stats(Utc::now().date_naive()).await?;
        assert_eq!(today.cycles, 0);
        assert!(transport.sent.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_second_reservation_rejected() -> Result<()> {
        init_test_tracing();
        let transport = RecordingTransport::new();
        let service = service_with(180, transport).await?;

        service.reserve_machine(1, Some("0123456789")).await?;
        let err = service.reserve_machine(1, Some("0198765432")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { .. } | Error::Conflict(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_hardware_start_uses_configured_price() -> Result<()> {
        init_test_tracing();
        let transport = RecordingTransport::new();
        let service = service_with(180, transport).await?;

        service.reserve_machine(2, Some("0123456789")).await?;
        let machine = service.hardware_start_signal(2).await?;
        assert_eq!(machine.status, MachineStatus::Washing);

        let recent = service.get_recent_transactions(10).await?;
        assert_eq!(recent.len(), 1);
        assert!((recent[0].amount - 5.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[tokio::test]
    async fn test_hardware_complete_ends_cycle_early() -> Result<()> {
        init_test_tracing();
        let transport = RecordingTransport::new();
        let service = service_with(180, transport.clone()).await?;

        service.reserve_machine(1, Some("0123456789")).await?;
        service.confirm_payment(1, 5.0, true).await?;
        let machine = service.hardware_complete_signal(1).await?;
        assert_eq!(machine.status, MachineStatus::Available);

        let sent = transport.sent.lock().await;
        assert!(sent.iter().any(|i| i.kind == NotificationKind::Done));
        Ok(())
    }

    #[tokio::test]
    async fn test_interleaved_starts_aggregate_exactly() -> Result<()> {
        init_test_tracing();
        let transport = RecordingTransport::new();
        let service = service_with(180, transport).await?;

        // A third machine joins the default fleet for the stress run.
        service
            .admin_create_machine(&db::CreateMachineArgs {
                machine_id: None,
                machine_type: "washer".to_string(),
                price: 7.0,
            })
            .await?;

        for id in [1, 2, 3] {
            service.reserve_machine(id, None).await?;
        }
        let (a, b, c) = tokio::join!(
            service.confirm_payment(1, 5.0, true),
            service.confirm_payment(2, 5.0, true),
            service.confirm_payment(3, 7.0, true),
        );
        a?;
        b?;
        c?;

        let today = service.get_daily_stats(Utc::now().date_naive()).await?;
        assert_eq!(today.cycles, 3);
        assert!((today.revenue - 17.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_create_and_delete() -> Result<()> {
        init_test_tracing();
        let transport = RecordingTransport::new();
        let service = service_with(180, transport).await?;

        let id = service
            .admin_create_machine(&db::CreateMachineArgs {
                machine_id: Some(9),
                machine_type: "dryer".to_string(),
                price: 3.0,
            })
            .await?;
        assert_eq!(id, 9);
        assert_eq!(service.list_machines().await?.len(), 3);

        service.admin_delete_machine(9).await?;
        assert!(matches!(
            service.get_machine(9).await.unwrap_err(),
            Error::NotFound(_)
        ));
        Ok(())
    }
}
