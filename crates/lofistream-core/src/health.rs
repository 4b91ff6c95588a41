//! Backlog health classification and producer backpressure.
//!
//! Health is a pure function of the unconsumed backlog depth measured in
//! hours of playback. The classifier only reports; whether to halt on
//! [`BufferHealth::Depleted`] is the producer loop's decision.

use crate::{BufferError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of backlog depth.
///
/// Ordering is by health quality: `Depleted < Emergency < Critical <
/// Warning < Healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BufferHealth {
    /// Backlog effectively empty; the feed is about to run dry
    Depleted,
    /// Backlog below the emergency threshold
    Emergency,
    /// Backlog below the critical threshold
    Critical,
    /// Backlog below the target but not yet critical
    Warning,
    /// Backlog at or above the target depth
    Healthy,
}

impl fmt::Display for BufferHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufferHealth::Healthy => "HEALTHY",
            BufferHealth::Warning => "WARNING",
            BufferHealth::Critical => "CRITICAL",
            BufferHealth::Emergency => "EMERGENCY",
            BufferHealth::Depleted => "DEPLETED",
        };
        f.write_str(s)
    }
}

/// Descending threshold table mapping backlog hours to health tiers, plus
/// the backpressure delay each tier imposes on the producer.
///
/// Delays are zero from [`BufferHealth::Critical`] downward: production is
/// never throttled when the backlog is dangerously low.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Hours at or above which the buffer is `Healthy`
    pub target_hours: f64,
    /// Hours at or above which the buffer is at least `Warning`
    pub warning_hours: f64,
    /// Hours at or above which the buffer is at least `Critical`
    pub critical_hours: f64,
    /// Hours at or above which the buffer is at least `Emergency`;
    /// below this the buffer is `Depleted`
    pub emergency_hours: f64,
    /// Producer pause after each chunk while `Healthy`, in seconds
    pub healthy_break_secs: u64,
    /// Producer pause after each chunk while `Warning`, in seconds
    pub warning_break_secs: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            target_hours: 24.0,
            warning_hours: 12.0,
            critical_hours: 6.0,
            emergency_hours: 2.0,
            healthy_break_secs: 120,
            warning_break_secs: 60,
        }
    }
}

impl HealthPolicy {
    /// Classify a backlog depth into a health tier.
    ///
    /// Pure and monotonic: more hours never classifies worse.
    pub fn classify(&self, hours_remaining: f64) -> BufferHealth {
        if hours_remaining >= self.target_hours {
            BufferHealth::Healthy
        } else if hours_remaining >= self.warning_hours {
            BufferHealth::Warning
        } else if hours_remaining >= self.critical_hours {
            BufferHealth::Critical
        } else if hours_remaining >= self.emergency_hours {
            BufferHealth::Emergency
        } else {
            BufferHealth::Depleted
        }
    }

    /// Backpressure delay for a health tier, in seconds.
    pub fn break_secs(&self, health: BufferHealth) -> u64 {
        match health {
            BufferHealth::Healthy => self.healthy_break_secs,
            BufferHealth::Warning => self.warning_break_secs,
            BufferHealth::Critical | BufferHealth::Emergency | BufferHealth::Depleted => 0,
        }
    }

    /// Validate the threshold table.
    ///
    /// Thresholds must descend strictly and delays must not increase as
    /// health worsens.
    pub fn validate(&self) -> Result<()> {
        let t = [
            self.target_hours,
            self.warning_hours,
            self.critical_hours,
            self.emergency_hours,
        ];
        if t.iter().any(|h| !h.is_finite() || *h < 0.0) {
            return Err(BufferError::Config(
                "health thresholds must be non-negative and finite".to_string(),
            ));
        }
        if !(t[0] > t[1] && t[1] > t[2] && t[2] > t[3]) {
            return Err(BufferError::Config(format!(
                "health thresholds must descend strictly: {:?}",
                t
            )));
        }
        if self.warning_break_secs > self.healthy_break_secs {
            return Err(BufferError::Config(
                "warning break must not exceed healthy break".to_string(),
            ));
        }
        Ok(())
    }
}
