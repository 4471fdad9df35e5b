use serde::{Deserialize, Serialize};

use crate::metrics::binary_log_loss;

/// Probabilities are pinned to `[PROB_EPS, 1 - PROB_EPS]` before any logit.
pub const PROB_EPS: f64 = 1e-6;

const SLOPE_RANGE: (f64, f64) = (0.2, 3.0);
const INTERCEPT_RANGE: (f64, f64) = (-2.5, 2.5);

/// Platt remapping `sigmoid(slope * logit(p) + intercept)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    pub slope: f64,
    pub intercept: f64,
}

impl CalibrationParameters {
    pub const IDENTITY: Self = Self {
        slope: 1.0,
        intercept: 0.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattConfig {
    pub iterations: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    pub min_samples: usize,
    /// Required drop in mean log-loss before a fit is kept.
    pub improvement_eps: f64,
}

impl Default for PlattConfig {
    fn default() -> Self {
        Self {
            iterations: 450,
            learning_rate: 0.5,
            l2_penalty: 1e-3,
            min_samples: 40,
            improvement_eps: 1e-4,
        }
    }
}

pub fn clamp_prob(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

pub fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    (p / (1.0 - p)).ln()
}

pub fn sigmoid(z: f64) -> f64 {
    let z = z.clamp(-40.0, 40.0);
    clamp_prob(1.0 / (1.0 + (-z).exp()))
}

pub fn apply(p_raw: f64, params: &CalibrationParameters) -> f64 {
    sigmoid(params.slope * logit(p_raw) + params.intercept)
}

/// Fits Platt parameters by gradient descent on mean logistic loss, starting
/// from the identity. Returns `None` when the sample is too small or when the
/// fitted transform does not beat the raw probabilities on the same sample.
pub fn fit(raw: &[f64], outcomes: &[bool], cfg: &PlattConfig) -> Option<CalibrationParameters> {
    if raw.len() != outcomes.len() || raw.len() < cfg.min_samples.max(1) {
        return None;
    }

    let xs: Vec<f64> = raw.iter().map(|p| logit(*p)).collect();
    let ys: Vec<f64> = outcomes.iter().map(|y| if *y { 1.0 } else { 0.0 }).collect();
    let n = xs.len() as f64;

    let mut params = CalibrationParameters::IDENTITY;
    for _ in 0..cfg.iterations {
        let mut grad_slope = 0.0_f64;
        let mut grad_intercept = 0.0_f64;
        for (x, y) in xs.iter().zip(&ys) {
            let p = sigmoid(params.slope * x + params.intercept);
            let err = p - y;
            grad_slope += err * x;
            grad_intercept += err;
        }
        // Penalize distance from the identity so thin samples stay near raw.
        grad_slope = grad_slope / n + cfg.l2_penalty * (params.slope - 1.0);
        grad_intercept = grad_intercept / n + cfg.l2_penalty * params.intercept;

        params.slope =
            (params.slope - cfg.learning_rate * grad_slope).clamp(SLOPE_RANGE.0, SLOPE_RANGE.1);
        params.intercept = (params.intercept - cfg.learning_rate * grad_intercept)
            .clamp(INTERCEPT_RANGE.0, INTERCEPT_RANGE.1);
    }

    let calibrated: Vec<f64> = raw.iter().map(|p| apply(*p, &params)).collect();
    let raw_loss = mean_log_loss(raw, outcomes);
    let cal_loss = mean_log_loss(&calibrated, outcomes);
    if cal_loss < raw_loss - cfg.improvement_eps {
        Some(params)
    } else {
        None
    }
}

pub fn mean_log_loss(probs: &[f64], outcomes: &[bool]) -> f64 {
    if probs.is_empty() || probs.len() != outcomes.len() {
        return 0.0;
    }
    probs
        .iter()
        .zip(outcomes)
        .map(|(p, y)| binary_log_loss(clamp_prob(*p), *y))
        .sum::<f64>()
        / probs.len() as f64
}
