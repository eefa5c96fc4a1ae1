//! Aggregate configuration.
//!
//! [`SyncConfig`] bundles the per-component configs. It can be loaded from
//! JSON, where every duration is given in milliseconds and every field may be
//! omitted:
//!
//! ```json
//! {
//!   "health": { "heartbeat_interval_ms": 30000, "auto_reconnect": true },
//!   "presence": { "staleness_window_ms": 300000 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::health::{HealthMonitorConfig, QualityThresholds};
use crate::presence::PresenceConfig;

/// Configuration for every component.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Connection health monitor settings.
    pub health: HealthMonitorConfig,
    /// Presence channel settings.
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HealthFile {
    heartbeat_interval_ms: u64,
    auto_reconnect: bool,
    reconnect_delay_ms: u64,
    settle_delay_ms: u64,
    max_reconnect_attempts: Option<u32>,
    thresholds: QualityThresholds,
    control_queue_capacity: usize,
}

impl Default for HealthFile {
    fn default() -> Self {
        Self::from(&HealthMonitorConfig::default())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl From<&HealthMonitorConfig> for HealthFile {
    fn from(cfg: &HealthMonitorConfig) -> Self {
        Self {
            heartbeat_interval_ms: millis(cfg.heartbeat_interval),
            auto_reconnect: cfg.auto_reconnect,
            reconnect_delay_ms: millis(cfg.reconnect_delay),
            settle_delay_ms: millis(cfg.settle_delay),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            thresholds: cfg.thresholds,
            control_queue_capacity: cfg.control_queue_capacity,
        }
    }
}

impl From<HealthFile> for HealthMonitorConfig {
    fn from(f: HealthFile) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(f.heartbeat_interval_ms),
            auto_reconnect: f.auto_reconnect,
            reconnect_delay: Duration::from_millis(f.reconnect_delay_ms),
            settle_delay: Duration::from_millis(f.settle_delay_ms),
            max_reconnect_attempts: f.max_reconnect_attempts,
            thresholds: f.thresholds,
            control_queue_capacity: f.control_queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PresenceFile {
    channel_name: String,
    staleness_window_ms: u64,
}

impl Default for PresenceFile {
    fn default() -> Self {
        Self::from(&PresenceConfig::default())
    }
}

impl From<&PresenceConfig> for PresenceFile {
    fn from(cfg: &PresenceConfig) -> Self {
        Self {
            channel_name: cfg.channel_name.clone(),
            staleness_window_ms: millis(cfg.staleness_window),
        }
    }
}

impl From<PresenceFile> for PresenceConfig {
    fn from(f: PresenceFile) -> Self {
        Self {
            channel_name: f.channel_name,
            staleness_window: Duration::from_millis(f.staleness_window_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyncFile {
    health: HealthFile,
    presence: PresenceFile,
}

fn non_zero(field: &str, d: Duration) -> Result<(), ConfigError> {
    if d.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl SyncConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    /// `Parse` for malformed JSON or unknown fields, `InvalidValue` for
    /// values [`SyncConfig::validate`] rejects.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: SyncFile = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let cfg = Self {
            health: file.health.into(),
            presence: file.presence.into(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serializes the configuration to pretty JSON.
    ///
    /// # Errors
    /// `Parse` if serialization fails.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        let file = SyncFile {
            health: HealthFile::from(&self.health),
            presence: PresenceFile::from(&self.presence),
        };
        serde_json::to_string_pretty(&file).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// `InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.health.thresholds.validate()?;
        non_zero("health.heartbeat_interval", self.health.heartbeat_interval)?;
        non_zero("health.reconnect_delay", self.health.reconnect_delay)?;
        non_zero("presence.staleness_window", self.presence.staleness_window)?;
        if self.health.control_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.control_queue_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.presence.channel_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "presence.channel_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.health.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.health.reconnect_delay, Duration::from_secs(30));
        assert_eq!(cfg.health.settle_delay, Duration::from_secs(1));
        assert!(!cfg.health.auto_reconnect);
        assert_eq!(cfg.health.thresholds, QualityThresholds::default());
        assert_eq!(cfg.presence.channel_name, "user-activity");
        assert_eq!(cfg.presence.staleness_window, Duration::from_secs(300));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg = SyncConfig::from_json_str(
            r#"{"health": {"auto_reconnect": true, "max_reconnect_attempts": 5, "thresholds": {"poor": 0.2}},
                "presence": {"staleness_window_ms": 60000}}"#,
        )
        .unwrap();
        assert!(cfg.health.auto_reconnect);
        assert_eq!(cfg.health.max_reconnect_attempts, Some(5));
        assert!((cfg.health.thresholds.poor - 0.2).abs() < f64::EPSILON);
        assert!((cfg.health.thresholds.good - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.presence.staleness_window, Duration::from_secs(60));
    }

    #[test]
    fn rejects_bad_values() {
        let err = SyncConfig::from_json_str(r#"{"health": {"thresholds": {"excellent": 0.6}}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = SyncConfig::from_json_str(r#"{"health": {"heartbeat_interval_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "health.heartbeat_interval"));

        let err = SyncConfig::from_json_str(r#"{"health": {"heartbeat": 5}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn json_round_trip_preserves_settings() {
        let mut cfg = SyncConfig::default();
        cfg.health.auto_reconnect = true;
        cfg.presence.channel_name = "presence".into();
        let parsed = SyncConfig::from_json_str(&cfg.to_json_string().unwrap()).unwrap();
        assert!(parsed.health.auto_reconnect);
        assert_eq!(parsed.presence.channel_name, "presence");
    }
}
