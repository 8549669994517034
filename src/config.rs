use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_FILTER: &str = "glywatch_monitor=info,sqlx=warn";

/// Upper bound for any configured window, cooldown or skew allowance.
const MAX_SPAN_SECS: i64 = 7 * 24 * 60 * 60;

/// Glucose boundaries in mg/dL and the window used for trend detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
    pub rapid_drop_magnitude: f64,
    pub trend_delta: f64,
    pub trend_window_secs: i64,
    pub min_valid: f64,
    pub max_valid: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 70.0,
            high: 180.0,
            rapid_drop_magnitude: 30.0,
            trend_delta: 10.0,
            trend_window_secs: 15 * 60,
            min_valid: 20.0,
            max_valid: 600.0,
        }
    }
}

impl Thresholds {
    pub fn trend_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.trend_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub thresholds: Thresholds,
    pub history_capacity: usize,
    pub resolve_cooldown_secs: i64,
    pub delivery_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    /// How far past the server clock a reading may be stamped.
    pub max_clock_skew_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            history_capacity: 288,
            resolve_cooldown_secs: 30 * 60,
            delivery_timeout_ms: 5_000,
            sweep_interval_secs: 30,
            max_clock_skew_secs: 5 * 60,
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by any `GLYWATCH_*` variables present in the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_override("GLYWATCH_LOW_THRESHOLD")? {
            config.thresholds.low = value;
        }
        if let Some(value) = env_override("GLYWATCH_HIGH_THRESHOLD")? {
            config.thresholds.high = value;
        }
        if let Some(value) = env_override("GLYWATCH_RAPID_DROP")? {
            config.thresholds.rapid_drop_magnitude = value;
        }
        if let Some(value) = env_override("GLYWATCH_TREND_DELTA")? {
            config.thresholds.trend_delta = value;
        }
        if let Some(value) = env_override("GLYWATCH_TREND_WINDOW_SECS")? {
            config.thresholds.trend_window_secs = value;
        }
        if let Some(value) = env_override("GLYWATCH_HISTORY_CAPACITY")? {
            config.history_capacity = value;
        }
        if let Some(value) = env_override("GLYWATCH_RESOLVE_COOLDOWN_SECS")? {
            config.resolve_cooldown_secs = value;
        }
        if let Some(value) = env_override("GLYWATCH_DELIVERY_TIMEOUT_MS")? {
            config.delivery_timeout_ms = value;
        }
        if let Some(value) = env_override("GLYWATCH_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval_secs = value;
        }
        if let Some(value) = env_override("GLYWATCH_MAX_CLOCK_SKEW_SECS")? {
            config.max_clock_skew_secs = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let t = &self.thresholds;
        if t.low >= t.high {
            bail!("low threshold ({}) must be below high threshold ({})", t.low, t.high);
        }
        if t.min_valid >= t.max_valid {
            bail!("valid reading range is empty");
        }
        if t.trend_window_secs <= 0 || t.trend_window_secs > MAX_SPAN_SECS {
            bail!("trend window must be between 1 and {MAX_SPAN_SECS} seconds");
        }
        if !(0..=MAX_SPAN_SECS).contains(&self.resolve_cooldown_secs) {
            bail!("resolve cooldown must be between 0 and {MAX_SPAN_SECS} seconds");
        }
        if !(0..=MAX_SPAN_SECS).contains(&self.max_clock_skew_secs) {
            bail!("clock skew allowance must be between 0 and {MAX_SPAN_SECS} seconds");
        }
        if self.delivery_timeout_ms == 0 {
            bail!("delivery timeout must be at least one millisecond");
        }
        if self.history_capacity == 0 {
            bail!("history capacity must be at least one reading");
        }
        Ok(())
    }

    pub fn resolve_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.resolve_cooldown_secs)
    }

    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs)
    }

    pub fn delivery_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn env_override<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => {
            let parsed = raw
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("invalid value for {key}: {raw}"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.low, 70.0);
        assert_eq!(config.thresholds.high, 180.0);
        assert_eq!(config.resolve_cooldown(), chrono::Duration::minutes(30));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut config = MonitorConfig::default();
        config.thresholds.low = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_history_is_rejected() {
        let config = MonitorConfig {
            history_capacity: 0,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_spans_are_rejected() {
        let mut config = MonitorConfig::default();
        config.thresholds.trend_window_secs = i64::MAX;
        assert!(config.validate().is_err());

        let config = MonitorConfig {
            resolve_cooldown_secs: i64::MAX,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_delivery_timeout_is_rejected() {
        let config = MonitorConfig {
            delivery_timeout_ms: 0,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
