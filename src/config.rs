use crate::errors::{Error, Result};
use serde::Deserialize;
use std::{env, fs, path::Path};
use tracing::{debug, info, warn};

const DEFAULT_DATABASE_PATH: &str = "data/smart_dobi.sqlite";
const DEFAULT_WASH_DURATION_SECS: i64 = 180;
// Must sit below the wash duration, otherwise the countdown starts already
// under the boundary and the "almost done" notification never fires.
const DEFAULT_NEAR_COMPLETE_THRESHOLD_SECS: i64 = 60;
const DEFAULT_TICK_INTERVAL_SECS: u64 = 1;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Length of one wash cycle, in seconds.
    #[serde(default = "default_wash_duration")]
    pub wash_duration_secs: i64,
    /// `time_remaining` boundary below which the "almost done" notification
    /// fires, in seconds.
    #[serde(default = "default_near_complete_threshold")]
    pub near_complete_threshold_secs: i64,
    /// Scheduler tick interval, in seconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// When set, reservations older than this many seconds are cancelled by
    /// the scheduler. Absent means reservations never expire automatically.
    #[serde(default)]
    pub reservation_expiry_secs: Option<i64>,
    /// Fleet provisioned on first start, when the machines table is empty.
    #[serde(default = "default_machines")]
    pub machines: Vec<MachineConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MachineConfig {
    /// Explicit id; omitted means "next integer above the current max".
    #[serde(default)]
    pub machine_id: Option<i64>,
    #[serde(default = "default_machine_type")]
    pub machine_type: String,
    pub price: f64,
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

const fn default_wash_duration() -> i64 {
    DEFAULT_WASH_DURATION_SECS
}

const fn default_near_complete_threshold() -> i64 {
    DEFAULT_NEAR_COMPLETE_THRESHOLD_SECS
}

const fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}

fn default_machine_type() -> String {
    "washer".to_string()
}

// Two RM5.00 washers, matching the default kiosk fleet.
fn default_machines() -> Vec<MachineConfig> {
    vec![
        MachineConfig {
            machine_id: Some(1),
            machine_type: "washer".to_string(),
            price: 5.00,
        },
        MachineConfig {
            machine_id: Some(2),
            machine_type: "washer".to_string(),
            price: 5.00,
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wash_duration_secs: default_wash_duration(),
            near_complete_threshold_secs: default_near_complete_threshold(),
            tick_interval_secs: default_tick_interval(),
            reservation_expiry_secs: None,
            machines: default_machines(),
        }
    }
}

impl AppConfig {
    /// Rejects values that would make the scheduler misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.wash_duration_secs <= 0 {
            return Err(Error::Config(
                "wash_duration_secs must be positive".to_string(),
            ));
        }
        if self.near_complete_threshold_secs < 0 {
            return Err(Error::Config(
                "near_complete_threshold_secs must not be negative".to_string(),
            ));
        }
        if self.near_complete_threshold_secs >= self.wash_duration_secs {
            // Not fatal, but the countdown starts at or below the boundary
            // and the "almost done" notification will never fire.
            warn!(
                "near_complete_threshold_secs ({}) >= wash_duration_secs ({}); \
                 near-complete notifications are disabled by this configuration.",
                self.near_complete_threshold_secs, self.wash_duration_secs
            );
        }
        if self.tick_interval_secs == 0 {
            return Err(Error::Config(
                "tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if let Some(expiry) = self.reservation_expiry_secs {
            if expiry <= 0 {
                return Err(Error::Config(
                    "reservation_expiry_secs must be positive when set".to_string(),
                ));
            }
        }
        for machine in &self.machines {
            if machine.price < 0.0 {
                return Err(Error::Config(format!(
                    "machine price must not be negative (got {})",
                    machine.price
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = fs::read_to_string(path_ref)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path_ref, e)))?;
    let app_config: AppConfig = toml::from_str(&contents).map_err(|e| {
        Error::Config(format!(
            "Failed to parse TOML from config file {:?}: {}",
            path_ref, e
        ))
    })?;
    Ok(app_config)
}

/// Loads `config.toml` if present (falling back to defaults otherwise), then
/// applies the `DATABASE_PATH` environment override and validates.
pub fn load_app_configuration() -> Result<AppConfig> {
    let config_path = env::var("SMART_DOBI_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

    let mut config = if Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        warn!(
            "Config file {:?} not found, using built-in defaults.",
            config_path
        );
        AppConfig::default()
    };

    if let Ok(db_path) = env::var("DATABASE_PATH") {
        debug!("DATABASE_PATH override in effect: {}", db_path);
        config.database_path = db_path;
    }

    config.validate()?;
    info!(
        "Configuration loaded: wash_duration={}s, near_complete_threshold={}s, tick={}s, {} seed machine(s).",
        config.wash_duration_secs,
        config.near_complete_threshold_secs,
        config.tick_interval_secs,
        config.machines.len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.wash_duration_secs, 180);
        assert_eq!(config.near_complete_threshold_secs, 60);
        assert_eq!(config.machines.len(), 2);
    }

    #[test]
    fn default_countdown_crosses_the_near_complete_boundary() {
        // The default countdown must start above the boundary, or the
        // "almost done" notification could never fire.
        let config = AppConfig::default();
        assert!(config.near_complete_threshold_secs < config.wash_duration_secs);
    }

    #[test]
    fn threshold_at_or_above_duration_is_tolerated() {
        // Warn-only: an operator may deliberately silence near-complete
        // notifications this way.
        let config = AppConfig {
            wash_duration_secs: 60,
            near_complete_threshold_secs: 300,
            ..AppConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn parses_minimal_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            wash_duration_secs = 60

            [[machines]]
            machine_id = 7
            price = 4.50
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.wash_duration_secs, 60);
        assert_eq!(config.near_complete_threshold_secs, 60);
        assert_eq!(config.machines.len(), 1);
        assert_eq!(config.machines[0].machine_id, Some(7));
        assert_eq!(config.machines[0].machine_type, "washer");
    }

    #[test]
    fn rejects_zero_tick_interval() {
        let config = AppConfig {
            tick_interval_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
