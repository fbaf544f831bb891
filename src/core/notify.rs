//! Notification dispatcher.
//!
//! Maps cycle events to at-most-once WhatsApp notification intents. The
//! dispatcher decides *what* and *when* to send; the transport behind
//! [`NotificationTransport`] decides *how* a message reaches a phone. A
//! transport failure is logged and dropped — the machine transition that
//! triggered it already happened and must not be rolled back or retried from
//! here.

use crate::errors::Result;
use crate::models::CycleEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Dedup keys kept in memory; old cycles age out well before this fills.
const SEEN_KEY_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    WashStarted,
    AlmostDone,
    Done,
}

impl NotificationKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::WashStarted => "wash_started",
            Self::AlmostDone => "almost_done",
            Self::Done => "done",
        }
    }
}

/// A deduplicated, ready-to-send message. The idempotency key ties the
/// intent to one event kind of one wash cycle, so redelivery attempts by the
/// transport layer cannot double-notify.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationIntent {
    pub machine_id: i64,
    pub whatsapp_number: String,
    pub kind: NotificationKind,
    pub dedupe_key: String,
    pub message: String,
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, intent: &NotificationIntent) -> Result<()>;
}

pub struct NotificationDispatcher {
    transport: Arc<dyn NotificationTransport>,
    wash_duration_secs: i64,
    near_complete_threshold_secs: i64,
    seen: Mutex<SeenKeys>,
}

// Insertion-ordered seen set so pruning drops the oldest keys first.
struct SeenKeys {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenKeys {
    fn new() -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns false when the key was already present.
    fn insert(&mut self, key: String) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > SEEN_KEY_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }
}

fn dedupe_key(machine_id: i64, started_at: DateTime<Utc>, kind: NotificationKind) -> String {
    format!(
        "{}:{}:{}",
        machine_id,
        started_at.timestamp_millis(),
        kind.as_str()
    )
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        wash_duration_secs: i64,
        near_complete_threshold_secs: i64,
    ) -> Self {
        Self {
            transport,
            wash_duration_secs,
            near_complete_threshold_secs,
            seen: Mutex::new(SeenKeys::new()),
        }
    }

    fn message_for(&self, machine_id: i64, kind: NotificationKind) -> String {
        match kind {
            NotificationKind::WashStarted => format!(
                "Smart Dobi: Mesin {} telah dimulakan! Basuhan akan siap dalam {} minit. Anda akan menerima notifikasi.",
                machine_id,
                (self.wash_duration_secs + 59) / 60
            ),
            NotificationKind::AlmostDone => format!(
                "Smart Dobi: Mesin {} hampir siap! Kurang {} minit berbaki.",
                machine_id,
                (self.near_complete_threshold_secs + 59) / 60
            ),
            NotificationKind::Done => format!(
                "Smart Dobi: Mesin {} telah selesai! Sila ambil pakaian anda. Terima kasih!",
                machine_id
            ),
        }
    }

    /// Turns one event into at most one intent and hands it to the transport.
    ///
    /// Returns the intent that was handed over, `None` when the event carried
    /// no contact number or its idempotency key was already seen. Transport
    /// errors are logged at `warn!` and swallowed by design.
    pub async fn dispatch(&self, event: &CycleEvent) -> Option<NotificationIntent> {
        let (kind, number, started_at) = match event {
            CycleEvent::CycleStarted {
                whatsapp_number,
                started_at,
                ..
            } => (
                NotificationKind::WashStarted,
                whatsapp_number.clone(),
                *started_at,
            ),
            CycleEvent::NearComplete {
                whatsapp_number,
                started_at,
                ..
            } => (
                NotificationKind::AlmostDone,
                whatsapp_number.clone(),
                *started_at,
            ),
            CycleEvent::CycleCompleted {
                whatsapp_number,
                started_at,
                ..
            } => (NotificationKind::Done, whatsapp_number.clone(), *started_at),
        };
        let machine_id = event.machine_id();

        // No contact captured at reservation time: no intent at all.
        let Some(whatsapp_number) = number else {
            debug!(
                "Machine {} has no whatsapp number, skipping {:?} notification",
                machine_id, kind
            );
            return None;
        };

        let key = dedupe_key(machine_id, started_at, kind);
        {
            let mut seen = self.seen.lock().await;
            if !seen.insert(key.clone()) {
                debug!("Duplicate notification intent suppressed: {}", key);
                return None;
            }
        }

        let intent = NotificationIntent {
            machine_id,
            whatsapp_number,
            kind,
            dedupe_key: key,
            message: self.message_for(machine_id, kind),
        };
        info!(
            "Dispatching {:?} notification for machine {} to {}",
            intent.kind, intent.machine_id, intent.whatsapp_number
        );
        if let Err(e) = self.transport.send(&intent).await {
            // Delivery is fully external; a lost message never blocks or
            // rolls back the machine transition behind it.
            warn!(
                "Notification transport failed for {} (machine {}): {}",
                intent.dedupe_key, intent.machine_id, e
            );
        }
        Some(intent)
    }
}

/// Transport that drops every message; useful until a real WhatsApp gateway
/// is wired in.
pub struct NoopTransport;

#[async_trait]
impl NotificationTransport for NoopTransport {
    async fn send(&self, intent: &NotificationIntent) -> Result<()> {
        debug!("NoopTransport: dropping {}", intent.dedupe_key);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records every intent the dispatcher hands over.
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Mutex<Vec<NotificationIntent>>,
    }

    impl RecordingTransport {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationTransport for RecordingTransport {
        async fn send(&self, intent: &NotificationIntent) -> Result<()> {
            self.sent.lock().await.push(intent.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingTransport;
    use super::*;
    use crate::errors::Error;

    fn started_event(machine_id: i64, number: Option<&str>) -> CycleEvent {
        CycleEvent::CycleStarted {
            machine_id,
            amount: 5.0,
            whatsapp_number: number.map(str::to_string),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_without_number_emits_nothing() {
        let transport = RecordingTransport::new();
        let dispatcher = NotificationDispatcher::new(transport.clone(), 180, 60);

        let intent = dispatcher.dispatch(&started_event(1, None)).await;
        assert!(intent.is_none());
        assert!(transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_event_suppressed() {
        let transport = RecordingTransport::new();
        let dispatcher = NotificationDispatcher::new(transport.clone(), 180, 60);

        let event = started_event(1, Some("60123456789"));
        assert!(dispatcher.dispatch(&event).await.is_some());
        assert!(dispatcher.dispatch(&event).await.is_none());
        assert_eq!(transport.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_cycle_different_kinds_all_pass() {
        let transport = RecordingTransport::new();
        let dispatcher = NotificationDispatcher::new(transport.clone(), 180, 60);
        let started_at = Utc::now();
        let number = Some("60123456789".to_string());

        dispatcher
            .dispatch(&CycleEvent::CycleStarted {
                machine_id: 1,
                amount: 5.0,
                whatsapp_number: number.clone(),
                started_at,
            })
            .await;
        dispatcher
            .dispatch(&CycleEvent::NearComplete {
                machine_id: 1,
                whatsapp_number: number.clone(),
                started_at,
            })
            .await;
        dispatcher
            .dispatch(&CycleEvent::CycleCompleted {
                machine_id: 1,
                whatsapp_number: number,
                started_at,
            })
            .await;

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].kind, NotificationKind::WashStarted);
        assert_eq!(sent[1].kind, NotificationKind::AlmostDone);
        assert_eq!(sent[2].kind, NotificationKind::Done);
        // Same cycle, three distinct idempotency keys.
        assert_ne!(sent[0].dedupe_key, sent[1].dedupe_key);
        assert_ne!(sent[1].dedupe_key, sent[2].dedupe_key);
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        struct FailingTransport;

        #[async_trait]
        impl NotificationTransport for FailingTransport {
            async fn send(&self, _intent: &NotificationIntent) -> Result<()> {
                Err(Error::Database("gateway down".to_string()))
            }
        }

        let dispatcher = NotificationDispatcher::new(Arc::new(FailingTransport), 180, 60);
        // The intent is still produced and marked seen; delivery loss is the
        // transport's problem, never the state machine's.
        let intent = dispatcher.dispatch(&started_event(1, Some("60123456789"))).await;
        assert!(intent.is_some());
    }

    #[tokio::test]
    async fn test_messages_mention_machine_and_duration() {
        let transport = RecordingTransport::new();
        let dispatcher = NotificationDispatcher::new(transport.clone(), 180, 60);
        dispatcher
            .dispatch(&started_event(7, Some("60123456789")))
            .await;
        let sent = transport.sent.lock().await;
        assert!(sent[0].message.contains("Mesin 7"));
        assert!(sent[0].message.contains("3 minit"));
    }
}
