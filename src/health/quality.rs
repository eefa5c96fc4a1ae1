//! Connection quality classification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::source::ChannelState;

/// Coarse health label derived from the live/tracked channel ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    /// No tracked channel is live, or nothing is tracked.
    Disconnected,
    /// At least the `poor` ratio is live.
    Poor,
    /// At least the `good` ratio is live.
    Good,
    /// At least the `excellent` ratio is live.
    Excellent,
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Poor => write!(f, "poor"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Minimum connected ratio for each quality label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum ratio for `excellent`.
    pub excellent: f64,
    /// Minimum ratio for `good`.
    pub good: f64,
    /// Minimum ratio for `poor`.
    pub poor: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.9,
            good: 0.7,
            poor: 0.3,
        }
    }
}

impl QualityThresholds {
    /// Classifies `connected` live channels out of `total` tracked ones.
    #[must_use]
    pub fn classify(&self, connected: usize, total: usize) -> ConnectionQuality {
        if total == 0 {
            return ConnectionQuality::Disconnected;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = connected as f64 / total as f64;
        if ratio >= self.excellent {
            ConnectionQuality::Excellent
        } else if ratio >= self.good {
            ConnectionQuality::Good
        } else if ratio >= self.poor {
            ConnectionQuality::Poor
        } else {
            ConnectionQuality::Disconnected
        }
    }

    /// Checks that thresholds lie in `[0, 1]` and strictly descend.
    ///
    /// # Errors
    /// `InvalidValue` naming the first offending threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("excellent", self.excellent), ("good", self.good), ("poor", self.poor)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: format!("thresholds.{field}"),
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if !(self.excellent > self.good && self.good > self.poor) {
            return Err(ConfigError::InvalidValue {
                field: "thresholds".to_string(),
                reason: "must satisfy excellent > good > poor".to_string(),
            });
        }
        Ok(())
    }
}

/// Aggregated connection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// True if any tracked channel is live.
    pub is_connected: bool,
    /// Time of the last heartbeat tick.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Channel names of the tracked topics.
    pub subscriptions: Vec<String>,
    /// Manual and automatic reconnects so far.
    pub reconnect_attempts: u32,
    /// Current quality label.
    pub connection_quality: ConnectionQuality,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            is_connected: false,
            last_heartbeat: None,
            subscriptions: Vec::new(),
            reconnect_attempts: 0,
            connection_quality: ConnectionQuality::Disconnected,
        }
    }
}

/// Connected/total counts and quality for a set of channel states.
#[must_use]
pub fn assess(states: &[ChannelState], thresholds: &QualityThresholds) -> (usize, usize, ConnectionQuality) {
    let connected = states.iter().filter(|s| s.is_connected()).count();
    let total = states.len();
    (connected, total, thresholds.classify(connected, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_of_three_is_poor() {
        let t = QualityThresholds::default();
        assert_eq!(t.classify(2, 3), ConnectionQuality::Poor);
        assert_eq!(t.classify(3, 3), ConnectionQuality::Excellent);
    }

    #[test]
    fn zero_connected_or_tracked_is_disconnected() {
        let t = QualityThresholds::default();
        for total in 0..5 {
            assert_eq!(t.classify(0, total), ConnectionQuality::Disconnected);
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        let t = QualityThresholds::default();
        assert_eq!(t.classify(9, 10), ConnectionQuality::Excellent);
        assert_eq!(t.classify(7, 10), ConnectionQuality::Good);
        assert_eq!(t.classify(3, 10), ConnectionQuality::Poor);
        assert_eq!(t.classify(1, 4), ConnectionQuality::Disconnected);
    }

    #[test]
    fn assess_counts_subscribed_only() {
        let states = [
            ChannelState::Subscribed,
            ChannelState::Connecting,
            ChannelState::Subscribed,
        ];
        let (connected, total, quality) = assess(&states, &QualityThresholds::default());
        assert_eq!((connected, total), (2, 3));
        assert_eq!(quality, ConnectionQuality::Poor);
    }

    #[test]
    fn thresholds_validate() {
        assert!(QualityThresholds::default().validate().is_ok());
        let bad = QualityThresholds {
            excellent: 0.5,
            good: 0.7,
            poor: 0.3,
        };
        assert!(bad.validate().is_err());
        let out_of_range = QualityThresholds {
            excellent: 1.5,
            ..QualityThresholds::default()
        };
        assert!(out_of_range.validate().is_err());
    }
}
