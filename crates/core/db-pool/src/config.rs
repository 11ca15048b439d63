//! Pool tuning knobs and their validation.

use std::time::Duration;

use serde::Deserialize;

/// Default number of connections a pool starts with.
pub const DEFAULT_MIN_SIZE: u32 = 5;

/// Default capacity ceiling for a pool.
pub const DEFAULT_MAX_SIZE: u32 = 20;

/// Default probe statement for health checks.
pub const DEFAULT_HEALTH_PROBE: &str = "SELECT 1";

/// Tuning knobs for one connection pool.
///
/// The connection URL is passed separately to
/// [`DbPool::connect`](crate::DbPool::connect); everything here is
/// endpoint-independent. All fields carry serde defaults so a config file
/// only needs to override what it cares about. The config is immutable once
/// the pool is built; retuning requires a restart.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Capacity floor; also the number of connections opened eagerly at startup.
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    /// Capacity ceiling.
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Capacity added per scale-up.
    #[serde(default = "default_scale_up_step")]
    pub scale_up_step: u32,
    /// Capacity removed per scale-down.
    #[serde(default = "default_scale_down_step")]
    pub scale_down_step: u32,
    /// Utilization at or above which the monitor scales up (when callers are waiting).
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,
    /// Utilization at or below which the monitor considers scaling down.
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,
    /// Minimum time between two scale-downs.
    #[serde(
        default = "default_scale_down_cooldown",
        rename = "scale_down_cooldown_secs",
        deserialize_with = "duration_from_secs"
    )]
    pub scale_down_cooldown: Duration,
    /// How often the monitor inspects utilization.
    #[serde(
        default = "default_monitor_interval",
        rename = "monitor_interval_secs",
        deserialize_with = "duration_from_secs"
    )]
    pub monitor_interval: Duration,
    /// How often the health probe runs.
    #[serde(
        default = "default_health_check_interval",
        rename = "health_check_interval_secs",
        deserialize_with = "duration_from_secs"
    )]
    pub health_check_interval: Duration,
    /// Statement executed verbatim by the health check.
    #[serde(default = "default_health_probe")]
    pub health_check_probe: String,
    /// Retry budget for statements that fail transiently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bound on opening one physical connection.
    #[serde(
        default = "default_connect_timeout",
        rename = "connect_timeout_secs",
        deserialize_with = "duration_from_secs"
    )]
    pub connect_timeout: Duration,
    /// Bound on waiting for free capacity in `acquire`.
    #[serde(
        default = "default_acquire_timeout",
        rename = "acquire_timeout_secs",
        deserialize_with = "duration_from_secs"
    )]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            max_size: default_max_size(),
            scale_up_step: default_scale_up_step(),
            scale_down_step: default_scale_down_step(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            scale_down_cooldown: default_scale_down_cooldown(),
            monitor_interval: default_monitor_interval(),
            health_check_interval: default_health_check_interval(),
            health_check_probe: default_health_probe(),
            max_retries: default_max_retries(),
            connect_timeout: default_connect_timeout(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

impl PoolConfig {
    /// Checks the invariants the pool relies on.
    ///
    /// Called by [`DbPool::connect`](crate::DbPool::connect); exposed so
    /// configuration loaders can reject bad files before touching the
    /// database.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_size == 0 {
            return Err(ConfigError::ZeroMinSize);
        }
        if self.max_size < self.min_size {
            return Err(ConfigError::SizeBoundsInverted {
                min: self.min_size,
                max: self.max_size,
            });
        }
        if self.scale_up_step == 0 {
            return Err(ConfigError::ZeroStep {
                name: "scale_up_step",
            });
        }
        if self.scale_down_step == 0 {
            return Err(ConfigError::ZeroStep {
                name: "scale_down_step",
            });
        }
        if !(self.scale_up_threshold > 0.0 && self.scale_up_threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "scale_up_threshold",
                value: self.scale_up_threshold,
            });
        }
        if !(self.scale_down_threshold >= 0.0 && self.scale_down_threshold < 1.0) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "scale_down_threshold",
                value: self.scale_down_threshold,
            });
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(ConfigError::ThresholdsInverted {
                down: self.scale_down_threshold,
                up: self.scale_up_threshold,
            });
        }
        if self.monitor_interval.is_zero() {
            return Err(ConfigError::ZeroInterval {
                name: "monitor_interval",
            });
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::ZeroInterval {
                name: "health_check_interval",
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroInterval {
                name: "connect_timeout",
            });
        }
        if self.acquire_timeout.is_zero() {
            return Err(ConfigError::ZeroInterval {
                name: "acquire_timeout",
            });
        }
        if self.health_check_probe.trim().is_empty() {
            return Err(ConfigError::EmptyProbe);
        }
        Ok(())
    }
}

/// Rejected pool configuration.
///
/// Configuration problems are fatal: they are reported once at startup and
/// never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("min_size must be at least 1")]
    ZeroMinSize,

    #[error("max_size ({max}) must not be below min_size ({min})")]
    SizeBoundsInverted { min: u32, max: u32 },

    #[error("{name} must be at least 1")]
    ZeroStep { name: &'static str },

    #[error("{name} is out of range: {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("scale_down_threshold ({down}) must be below scale_up_threshold ({up})")]
    ThresholdsInverted { down: f64, up: f64 },

    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },

    #[error("health_check_probe must not be empty")]
    EmptyProbe,

    #[error("invalid connection URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

fn default_min_size() -> u32 {
    DEFAULT_MIN_SIZE
}

fn default_max_size() -> u32 {
    DEFAULT_MAX_SIZE
}

fn default_scale_up_step() -> u32 {
    5
}

fn default_scale_down_step() -> u32 {
    2
}

fn default_scale_up_threshold() -> f64 {
    0.8
}

fn default_scale_down_threshold() -> f64 {
    0.3
}

fn default_scale_down_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_probe() -> String {
    DEFAULT_HEALTH_PROBE.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    f64::deserialize(deserializer).map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PoolConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn rejects_zero_min_size() {
        let config = PoolConfig {
            min_size: 0,
            ..PoolConfig::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::ZeroMinSize)));
    }

    #[test]
    fn rejects_inverted_size_bounds() {
        let config = PoolConfig {
            min_size: 10,
            max_size: 5,
            ..PoolConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::SizeBoundsInverted { min: 10, max: 5 })
        ));
    }

    #[test]
    fn rejects_zero_scale_steps() {
        let config = PoolConfig {
            scale_up_step: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroStep {
                name: "scale_up_step"
            })
        ));

        let config = PoolConfig {
            scale_down_step: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroStep {
                name: "scale_down_step"
            })
        ));
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let config = PoolConfig {
            scale_up_threshold: 1.2,
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                name: "scale_up_threshold",
                ..
            })
        ));

        let config = PoolConfig {
            scale_down_threshold: -0.1,
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                name: "scale_down_threshold",
                ..
            })
        ));
    }

    #[test]
    fn rejects_down_threshold_at_or_above_up_threshold() {
        let config = PoolConfig {
            scale_up_threshold: 0.5,
            scale_down_threshold: 0.5,
            ..PoolConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdsInverted { .. })
        ));
    }

    #[test]
    fn rejects_empty_probe() {
        let config = PoolConfig {
            health_check_probe: "   ".to_string(),
            ..PoolConfig::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::EmptyProbe)));
    }

    #[test]
    fn deserializes_durations_from_secs() {
        let config: PoolConfig = serde_json::from_str(
            r#"{
                "monitor_interval_secs": 2.5,
                "scale_down_cooldown_secs": 90
            }"#,
        )
        .expect("config should deserialize");

        assert_eq!(config.monitor_interval, Duration::from_millis(2500));
        assert_eq!(config.scale_down_cooldown, Duration::from_secs(90));
        assert_eq!(config.min_size, DEFAULT_MIN_SIZE);
    }
}
