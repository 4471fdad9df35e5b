use serde::{Deserialize, Serialize};

use crate::calibration;
use crate::config::EngineConfig;
use crate::metrics::Prob3;
use crate::strength::StrengthModel;

/// Expected goals used when a competitor is unknown to the model.
pub const NEUTRAL_HOME_XG: f64 = 1.45;
pub const NEUTRAL_AWAY_XG: f64 = 1.15;

// Keeps exp() of clamped strengths inside a range the grid can represent.
const RATE_FLOOR: f64 = 1e-3;
const RATE_CEIL: f64 = 12.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalsForecast {
    /// Minimum goal total that settles "over"; 3 is the over 2.5 line.
    pub threshold: u32,
    pub raw: f64,
    pub calibrated: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchForecast {
    pub home: String,
    pub away: String,
    pub expected_home_goals: f64,
    pub expected_away_goals: f64,
    pub result: Prob3,
    pub totals: Vec<TotalsForecast>,
    pub sufficient_sample: bool,
}

impl MatchForecast {
    pub fn totals_for(&self, threshold: u32) -> Option<&TotalsForecast> {
        self.totals.iter().find(|t| t.threshold == threshold)
    }
}

/// Aggregated masses of a truncated scoreline grid, renormalized by the
/// probability the grid captured.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSummary {
    pub result: Prob3,
    pub over: Vec<(u32, f64)>,
    pub captured_mass: f64,
}

impl GridSummary {
    pub fn over_probability(&self, threshold: u32) -> Option<f64> {
        self.over
            .iter()
            .find(|(t, _)| *t == threshold)
            .map(|(_, p)| *p)
    }
}

pub fn forecast(model: &StrengthModel, home: &str, away: &str, cfg: &EngineConfig) -> MatchForecast {
    let Some((mu_home, mu_away)) = model.expected_goals_for(home, away) else {
        return neutral_forecast(home, away, cfg);
    };
    let grid = forecast_from_rates(mu_home, mu_away, &cfg.totals_thresholds, cfg.grid_cap);

    let totals = cfg
        .totals_thresholds
        .iter()
        .map(|threshold| {
            let raw = grid.over_probability(*threshold).unwrap_or(0.0);
            let calibrated = model
                .calibration_for(*threshold)
                .map(|params| calibration::apply(raw, params))
                .unwrap_or(raw);
            TotalsForecast {
                threshold: *threshold,
                raw,
                calibrated,
            }
        })
        .collect();

    MatchForecast {
        home: home.to_string(),
        away: away.to_string(),
        expected_home_goals: mu_home,
        expected_away_goals: mu_away,
        result: grid.result,
        totals,
        sufficient_sample: model.has_sufficient_sample(home, away),
    }
}

pub fn forecast_or_neutral(
    model: Option<&StrengthModel>,
    home: &str,
    away: &str,
    cfg: &EngineConfig,
) -> MatchForecast {
    match model {
        Some(model) => forecast(model, home, away, cfg),
        None => neutral_forecast(home, away, cfg),
    }
}

pub fn neutral_forecast(home: &str, away: &str, cfg: &EngineConfig) -> MatchForecast {
    let grid = forecast_from_rates(
        NEUTRAL_HOME_XG,
        NEUTRAL_AWAY_XG,
        &cfg.totals_thresholds,
        cfg.grid_cap,
    );
    MatchForecast {
        home: home.to_string(),
        away: away.to_string(),
        expected_home_goals: NEUTRAL_HOME_XG,
        expected_away_goals: NEUTRAL_AWAY_XG,
        result: grid.result,
        totals: grid
            .over
            .iter()
            .map(|(threshold, p)| TotalsForecast {
                threshold: *threshold,
                raw: *p,
                calibrated: *p,
            })
            .collect(),
        sufficient_sample: false,
    }
}

pub fn forecast_from_rates(
    mu_home: f64,
    mu_away: f64,
    thresholds: &[u32],
    grid_cap: u32,
) -> GridSummary {
    let pmf_h = poisson_pmf(mu_home.clamp(RATE_FLOOR, RATE_CEIL), grid_cap);
    let pmf_a = poisson_pmf(mu_away.clamp(RATE_FLOOR, RATE_CEIL), grid_cap);

    let mut p_home = 0.0_f64;
    let mut p_draw = 0.0_f64;
    let mut p_away = 0.0_f64;
    let mut over = vec![0.0_f64; thresholds.len()];
    let mut mass = 0.0_f64;

    for (h, p_h) in pmf_h.iter().enumerate() {
        for (a, p_a) in pmf_a.iter().enumerate() {
            let p = p_h * p_a;
            mass += p;
            if h > a {
                p_home += p;
            } else if h < a {
                p_away += p;
            } else {
                p_draw += p;
            }
            let total = (h + a) as u32;
            for (k, threshold) in thresholds.iter().enumerate() {
                if total >= *threshold {
                    over[k] += p;
                }
            }
        }
    }

    if mass <= 0.0 || !mass.is_finite() {
        return GridSummary {
            result: Prob3::uniform(),
            over: thresholds.iter().map(|t| (*t, 0.5)).collect(),
            captured_mass: 0.0,
        };
    }

    GridSummary {
        result: Prob3 {
            home: p_home,
            draw: p_draw,
            away: p_away,
        }
        .normalized(),
        over: thresholds
            .iter()
            .zip(over)
            .map(|(t, p)| (*t, (p / mass).clamp(0.0, 1.0)))
            .collect(),
        captured_mass: mass,
    }
}

/// Poisson masses for `0..=max_k`, built by the `p(k) = p(k-1) * lambda / k` recurrence.
pub fn poisson_pmf(lambda: f64, max_k: u32) -> Vec<f64> {
    let max_k = max_k as usize;
    let lambda = lambda.max(0.0);
    let mut out = vec![0.0; max_k + 1];
    out[0] = (-lambda).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * lambda / k as f64;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pmf_matches_closed_form() {
        let pmf = poisson_pmf(1.3, 8);
        let p3 = 1.3_f64.powi(3) * (-1.3_f64).exp() / 6.0;
        assert!((pmf[3] - p3).abs() < 1e-12);
        let sum: f64 = pmf.iter().sum();
        assert!(sum < 1.0 && sum > 0.999);
    }

    #[test]
    fn result_triple_sums_to_one() {
        for (h, a) in [(0.2, 3.5), (1.4, 1.1), (2.9, 0.4), (6.0, 6.0)] {
            let grid = forecast_from_rates(h, a, &[3, 4], 8);
            assert!((grid.result.sum() - 1.0).abs() < 1e-9);
            for (_, p) in &grid.over {
                assert!((0.0..=1.0).contains(p));
            }
        }
    }

    #[test]
    fn higher_thresholds_are_less_likely() {
        let grid = forecast_from_rates(1.6, 1.2, &[3, 4], 8);
        let o25 = grid.over_probability(3).unwrap();
        let o35 = grid.over_probability(4).unwrap();
        assert!(o25 > o35);
        assert!(grid.over_probability(5).is_none());
    }

    #[test]
    fn symmetric_rates_give_symmetric_result() {
        let grid = forecast_from_rates(1.3, 1.3, &[3], 8);
        assert!((grid.result.home - grid.result.away).abs() < 1e-12);
    }

    #[test]
    fn neutral_prior_is_flagged() {
        let cfg = EngineConfig::default();
        let f = neutral_forecast("Home", "Away", &cfg);
        assert!(!f.sufficient_sample);
        assert_eq!(f.expected_home_goals, NEUTRAL_HOME_XG);
        assert!(f.result.home > f.result.away);
        assert_eq!(f.totals.len(), cfg.totals_thresholds.len());
        assert!(f.totals.iter().all(|t| t.raw == t.calibrated));
    }
}
