use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a machine. Exactly one value at any instant; the
/// stored TEXT column round-trips through [`MachineStatus::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Available,
    Reserved,
    Washing,
    Broken,
    Maintenance,
}

impl MachineStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Washing => "washing",
            Self::Broken => "broken",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "reserved" => Some(Self::Reserved),
            "washing" => Some(Self::Washing),
            "broken" => Some(Self::Broken),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Mirrors the "machines" table row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Machine {
    pub machine_id: i64, // Primary Key
    pub status: MachineStatus,
    pub is_online: bool, // hardware heartbeat; display semantics only
    pub whatsapp_number: Option<String>, // NULL whenever status is available
    pub time_remaining: i64, // seconds; > 0 implies status == washing
    pub reserved_at: Option<DateTime<Utc>>,
    pub cycle_started_at: Option<DateTime<Utc>>, // anchors notification idempotency keys
    pub near_complete_notified: bool, // one-shot latch, reset at wash start
    pub machine_type: String, // "washer" or "dryer"
    pub price: f64,      // per-cycle price, configuration
    pub version: i64,    // optimistic concurrency counter
}

/// Immutable record created exactly once per accepted wash start.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Transaction {
    pub transaction_id: String, // "txn_" + 12 hex chars
    pub machine_id: i64,
    pub amount: f64,
    pub whatsapp_number: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-day cycle and revenue counters. Accumulate-only; mutated solely by the
/// usage aggregator through compare-and-set on `version`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub cycles: i64,
    pub revenue: f64,
    pub version: i64,
}

impl DailyRecord {
    /// Zeroed record for a day with no recorded cycles yet.
    pub const fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            cycles: 0,
            revenue: 0.0,
            version: 0,
        }
    }
}

/// Snapshot numbers for the owner dashboard.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DashboardStats {
    pub active_machines: i64,
    pub total_revenue: f64,
    pub total_cycles: i64,
    pub today_revenue: f64,
    pub today_cycles: i64,
}

/// Event staged by an accepted transition, consumed by the notification
/// dispatcher and the usage aggregator. Carries everything the consumers
/// need so neither ever reads (or writes) machine fields itself.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleEvent {
    CycleStarted {
        machine_id: i64,
        amount: f64,
        whatsapp_number: Option<String>,
        started_at: DateTime<Utc>,
    },
    NearComplete {
        machine_id: i64,
        whatsapp_number: Option<String>,
        started_at: DateTime<Utc>,
    },
    CycleCompleted {
        machine_id: i64,
        whatsapp_number: Option<String>,
        started_at: DateTime<Utc>,
    },
}

impl CycleEvent {
    pub const fn machine_id(&self) -> i64 {
        match self {
            Self::CycleStarted { machine_id, .. }
            | Self::NearComplete { machine_id, .. }
            | Self::CycleCompleted { machine_id, .. } => *machine_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_codec_round_trips() {
        for status in [
            MachineStatus::Available,
            MachineStatus::Reserved,
            MachineStatus::Washing,
            MachineStatus::Broken,
            MachineStatus::Maintenance,
        ] {
            assert_eq!(MachineStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MachineStatus::parse("idle"), None);
    }
}
