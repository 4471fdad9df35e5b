use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::calibration::PlattConfig;
use crate::preprocess::ShrinkParams;

pub const DEFAULT_HALF_LIFE_DAYS: f64 = 240.0;
pub const DEFAULT_MIN_GAMES_PER_TEAM: u32 = 6;
pub const DEFAULT_GOAL_CAP: f64 = 5.0;
pub const DEFAULT_SHRINK_ALPHA: f64 = 0.15;
pub const DEFAULT_FIT_ITERATIONS: usize = 240;
pub const DEFAULT_LEARNING_RATE: f64 = 0.10;
pub const DEFAULT_L2_PENALTY: f64 = 0.02;
pub const DEFAULT_PARAM_CLAMP: f64 = 3.0;
pub const DEFAULT_GRID_CAP: u32 = 8;
pub const DEFAULT_TOTALS_THRESHOLDS: [u32; 2] = [3, 4];
pub const DEFAULT_REBUILD_EVERY: usize = 6;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?} as a number")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key}: expected a comma separated list of goal totals, got {value:?}")]
    InvalidThresholds { key: &'static str, value: String },
}

/// Every tunable of the fit, forecast and backtest pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub half_life_days: f64,
    pub min_games_per_team: u32,
    pub goal_cap: f64,
    pub shrink_alpha: f64,
    pub iterations: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    pub param_clamp: f64,
    /// Scoreline grid covers `0..=grid_cap` goals per side.
    pub grid_cap: u32,
    /// Goal totals counted as "over"; 3 is the over 2.5 market.
    pub totals_thresholds: Vec<u32>,
    pub rebuild_every: usize,
    pub calibration: PlattConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            min_games_per_team: DEFAULT_MIN_GAMES_PER_TEAM,
            goal_cap: DEFAULT_GOAL_CAP,
            shrink_alpha: DEFAULT_SHRINK_ALPHA,
            iterations: DEFAULT_FIT_ITERATIONS,
            learning_rate: DEFAULT_LEARNING_RATE,
            l2_penalty: DEFAULT_L2_PENALTY,
            param_clamp: DEFAULT_PARAM_CLAMP,
            grid_cap: DEFAULT_GRID_CAP,
            totals_thresholds: DEFAULT_TOTALS_THRESHOLDS.to_vec(),
            rebuild_every: DEFAULT_REBUILD_EVERY,
            calibration: PlattConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn shrink_params(&self) -> ShrinkParams {
        ShrinkParams {
            goal_cap: self.goal_cap,
            alpha: self.shrink_alpha,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `FORECAST_*` keys, falling back to defaults for
    /// missing keys and clamping out-of-range values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let cal = d.calibration;
        Ok(Self {
            half_life_days: read_f64(&lookup, "FORECAST_HALF_LIFE_DAYS", d.half_life_days, 1.0, 3650.0)?,
            min_games_per_team: read_f64(
                &lookup,
                "FORECAST_MIN_GAMES",
                d.min_games_per_team as f64,
                0.0,
                100.0,
            )? as u32,
            goal_cap: read_f64(&lookup, "FORECAST_GOAL_CAP", d.goal_cap, 1.0, 20.0)?,
            shrink_alpha: read_f64(&lookup, "FORECAST_SHRINK_ALPHA", d.shrink_alpha, 0.0, 1.0)?,
            iterations: read_f64(&lookup, "FORECAST_ITERATIONS", d.iterations as f64, 1.0, 5000.0)?
                as usize,
            learning_rate: read_f64(&lookup, "FORECAST_LEARNING_RATE", d.learning_rate, 1e-4, 1.0)?,
            l2_penalty: read_f64(&lookup, "FORECAST_L2", d.l2_penalty, 0.0, 1.0)?,
            param_clamp: read_f64(&lookup, "FORECAST_PARAM_CLAMP", d.param_clamp, 0.5, 6.0)?,
            grid_cap: read_f64(&lookup, "FORECAST_GRID_CAP", d.grid_cap as f64, 4.0, 20.0)? as u32,
            totals_thresholds: read_thresholds(&lookup, "FORECAST_TOTALS_THRESHOLDS", &d.totals_thresholds)?,
            rebuild_every: read_f64(&lookup, "FORECAST_REBUILD_EVERY", d.rebuild_every as f64, 1.0, 500.0)?
                as usize,
            calibration: PlattConfig {
                iterations: read_f64(&lookup, "FORECAST_CAL_ITERATIONS", cal.iterations as f64, 1.0, 5000.0)?
                    as usize,
                learning_rate: read_f64(&lookup, "FORECAST_CAL_LEARNING_RATE", cal.learning_rate, 1e-4, 2.0)?,
                l2_penalty: read_f64(&lookup, "FORECAST_CAL_L2", cal.l2_penalty, 0.0, 1.0)?,
                min_samples: read_f64(&lookup, "FORECAST_CAL_MIN_SAMPLES", cal.min_samples as f64, 2.0, 10_000.0)?
                    as usize,
                improvement_eps: read_f64(&lookup, "FORECAST_CAL_EPS", cal.improvement_eps, 0.0, 0.1)?,
            },
        })
    }
}

fn read_f64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: f64,
    lo: f64,
    hi: f64,
) -> Result<f64, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    let value = trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::InvalidNumber {
            key,
            value: raw.clone(),
        })?;
    let clamped = value.clamp(lo, hi);
    if clamped != value {
        warn!(key, value, clamped, "config value out of range");
    }
    Ok(clamped)
}

fn read_thresholds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &[u32],
) -> Result<Vec<u32>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default.to_vec());
    };
    if raw.trim().is_empty() {
        return Ok(default.to_vec());
    }
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ']).filter(|p| !p.trim().is_empty()) {
        let Ok(v) = part.trim().parse::<u32>() else {
            return Err(ConfigError::InvalidThresholds { key, value: raw.clone() });
        };
        if v == 0 {
            return Err(ConfigError::InvalidThresholds { key, value: raw.clone() });
        }
        out.push(v);
    }
    out.sort_unstable();
    out.dedup();
    if out.is_empty() {
        return Err(ConfigError::InvalidThresholds { key, value: raw });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn values_are_parsed_and_clamped() {
        let cfg = EngineConfig::from_lookup(lookup_from(&[
            ("FORECAST_HALF_LIFE_DAYS", "90"),
            ("FORECAST_SHRINK_ALPHA", "1.7"),
            ("FORECAST_TOTALS_THRESHOLDS", "4, 3,3"),
            ("FORECAST_REBUILD_EVERY", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.half_life_days, 90.0);
        assert_eq!(cfg.shrink_alpha, 1.0);
        assert_eq!(cfg.totals_thresholds, vec![3, 4]);
        assert_eq!(cfg.rebuild_every, 1);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = EngineConfig::from_lookup(lookup_from(&[("FORECAST_L2", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: "FORECAST_L2", .. }));

        let err = EngineConfig::from_lookup(lookup_from(&[("FORECAST_TOTALS_THRESHOLDS", "2.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThresholds { .. }));
    }
}
