use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::CalibrationParameters;
use crate::config::EngineConfig;
use crate::forecast::{self, MatchForecast};
use crate::matches::{MatchRecord, PlayedMatch, split_by_season};
use crate::metrics::{
    self, CalibrationBin, Metrics, Outcome, Prob3, binary_calibration_bins, calibration_bins,
    empirical_outcome_probs, expected_calibration_error,
};
use crate::preprocess;
use crate::staking::{BetLedger, Pricing, StakeRule};
use crate::strength::{self, StrengthModel};

pub const RELIABILITY_BINS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestMode {
    /// One model fit on everything outside the test season.
    Static,
    /// Refit every `rebuild_every` fixtures with the test fixtures seen so far.
    WalkForward,
}

impl FromStr for BacktestMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(BacktestMode::Static),
            "walk-forward" | "walk_forward" | "walkforward" | "rolling" => {
                Ok(BacktestMode::WalkForward)
            }
            other => Err(anyhow!(
                "unknown backtest mode {other:?} (expected static or walk-forward)"
            )),
        }
    }
}

/// Which model produced a forecast during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPhase {
    StaticModel,
    RollingModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestOptions {
    pub mode: BacktestMode,
    pub ev_threshold: f64,
    pub prob_threshold: f64,
    pub pricing: Pricing,
    pub commission: f64,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            mode: BacktestMode::Static,
            ev_threshold: 0.02,
            prob_threshold: 0.40,
            pricing: Pricing::default(),
            commission: 0.0,
        }
    }
}

impl BacktestOptions {
    pub fn new(mode: BacktestMode, ev_threshold: f64, prob_threshold: f64) -> Self {
        Self {
            mode,
            ev_threshold,
            prob_threshold,
            ..Self::default()
        }
    }

    pub fn stake_rule(&self) -> StakeRule {
        StakeRule {
            min_prob: self.prob_threshold,
            min_ev: self.ev_threshold,
            commission: self.commission.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureEvaluation {
    pub home: String,
    pub away: String,
    pub kickoff: DateTime<Utc>,
    pub home_goals: u32,
    pub away_goals: u32,
    pub outcome: Outcome,
    pub forecast: MatchForecast,
    pub baseline: Prob3,
    pub phase: ModelPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReliability {
    pub outcome: Outcome,
    pub ece: f64,
    pub bins: Vec<CalibrationBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMarketReport {
    pub model: Metrics,
    pub baseline: Metrics,
    /// Model log-loss minus baseline log-loss; negative means the model adds value.
    pub delta_log_loss: f64,
    pub reliability: Vec<ClassReliability>,
    pub pnl: BetLedger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalsMarketReport {
    pub threshold: u32,
    pub raw: Metrics,
    pub calibrated: Metrics,
    pub baseline: Metrics,
    /// Calibrated log-loss minus baseline log-loss.
    pub delta_log_loss: f64,
    pub ece_raw: f64,
    pub ece_calibrated: f64,
    pub reliability_raw: Vec<CalibrationBin>,
    pub reliability_calibrated: Vec<CalibrationBin>,
    /// Calibration carried by the first model of the walk, fit in-sample.
    pub calibration_static: Option<CalibrationParameters>,
    pub pnl: BetLedger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub test_season: String,
    pub options: BacktestOptions,
    pub config: EngineConfig,
    pub training_matches: usize,
    pub samples: usize,
    pub rebuilds: usize,
    pub final_phase: ModelPhase,
    pub result: ResultMarketReport,
    pub totals: Vec<TotalsMarketReport>,
    pub combined_pnl: BetLedger,
    pub fixtures: Vec<FixtureEvaluation>,
}

impl BacktestReport {
    pub fn delta_log_loss(&self) -> f64 {
        self.result.delta_log_loss
    }

    pub fn totals_for(&self, threshold: u32) -> Option<&TotalsMarketReport> {
        self.totals.iter().find(|t| t.threshold == threshold)
    }
}

/// Replays the played fixtures of `test_season` in kickoff order against models
/// fit on the rest of the data.
pub fn evaluate(
    all_matches: &[MatchRecord],
    test_season: &str,
    opts: &BacktestOptions,
    cfg: &EngineConfig,
) -> BacktestReport {
    let (mut training, test) = split_by_season(all_matches, test_season);
    let training_matches = training.len();
    let cadence = cfg.rebuild_every.max(1);
    let rule = opts.stake_rule();

    let mut walk = WalkState::new(&training, cfg);
    let calibration_static: Vec<Option<CalibrationParameters>> = cfg
        .totals_thresholds
        .iter()
        .map(|t| walk.model.as_ref().and_then(|m| m.calibration_for(*t).copied()))
        .collect();

    let mut result_preds: Vec<Prob3> = Vec::with_capacity(test.len());
    let mut baseline_preds: Vec<Prob3> = Vec::with_capacity(test.len());
    let mut outcomes: Vec<Outcome> = Vec::with_capacity(test.len());
    let mut result_pnl = BetLedger::default();
    let mut totals: Vec<TotalsTrack> = cfg
        .totals_thresholds
        .iter()
        .map(|t| TotalsTrack::new(*t, test.len()))
        .collect();
    let mut fixtures = Vec::with_capacity(test.len());

    for (i, fixture) in test.iter().enumerate() {
        if opts.mode == BacktestMode::WalkForward && i > 0 && i % cadence == 0 {
            training.extend(test[i - cadence..i].iter().cloned());
            walk.rebuild(&training, cfg);
        }

        let forecast =
            forecast::forecast_or_neutral(walk.model.as_ref(), &fixture.home, &fixture.away, cfg);
        let outcome = fixture.outcome();

        let pick = forecast.result.argmax();
        let price = opts.pricing.price(walk.baseline.result.get(pick));
        result_pnl.consider(&rule, forecast.result.get(pick), price, pick == outcome);

        for track in totals.iter_mut() {
            let hit = fixture.is_over(track.threshold);
            let (raw, calibrated) = forecast
                .totals_for(track.threshold)
                .map(|t| (t.raw, t.calibrated))
                .unwrap_or((0.5, 0.5));
            let base = walk.baseline.over_probability(track.threshold);
            track.raw.push(raw);
            track.calibrated.push(calibrated);
            track.baseline.push(base);
            track.hits.push(hit);
            track
                .pnl
                .consider(&rule, calibrated, opts.pricing.price(base), hit);
        }

        result_preds.push(forecast.result);
        baseline_preds.push(walk.baseline.result);
        outcomes.push(outcome);
        fixtures.push(FixtureEvaluation {
            home: fixture.home.clone(),
            away: fixture.away.clone(),
            kickoff: fixture.kickoff,
            home_goals: fixture.home_goals,
            away_goals: fixture.away_goals,
            outcome,
            forecast,
            baseline: walk.baseline.result,
            phase: walk.phase,
        });
    }

    let result = result_report(&result_preds, &baseline_preds, &outcomes, result_pnl);
    let totals: Vec<TotalsMarketReport> = totals
        .into_iter()
        .zip(calibration_static)
        .map(|(track, cal)| track.into_report(cal))
        .collect();

    let mut combined_pnl = result.pnl;
    for t in &totals {
        combined_pnl.merge(&t.pnl);
    }

    info!(
        season = test_season,
        mode = ?opts.mode,
        samples = outcomes.len(),
        rebuilds = walk.rebuilds,
        log_loss = result.model.log_loss,
        delta_log_loss = result.delta_log_loss,
        bets = combined_pnl.bets,
        profit = combined_pnl.profit,
        "backtest finished"
    );

    BacktestReport {
        test_season: test_season.to_string(),
        options: *opts,
        config: cfg.clone(),
        training_matches,
        samples: outcomes.len(),
        rebuilds: walk.rebuilds,
        final_phase: walk.phase,
        result,
        totals,
        combined_pnl,
        fixtures,
    }
}

/// Model in effect during a walk. Rebuilding replaces the model and baseline
/// wholesale.
struct WalkState {
    model: Option<StrengthModel>,
    baseline: Baseline,
    phase: ModelPhase,
    rebuilds: usize,
}

impl WalkState {
    fn new(training: &[PlayedMatch], cfg: &EngineConfig) -> Self {
        Self {
            model: strength::build_model(training, cfg),
            baseline: Baseline::from_training(training, cfg),
            phase: ModelPhase::StaticModel,
            rebuilds: 0,
        }
    }

    fn rebuild(&mut self, training: &[PlayedMatch], cfg: &EngineConfig) {
        self.model = strength::build_model(training, cfg);
        self.baseline = Baseline::from_training(training, cfg);
        self.phase = ModelPhase::RollingModel;
        self.rebuilds += 1;
        debug!(rebuild = self.rebuilds, training = training.len(), "rebuilt rolling model");
    }
}

/// Season base rates: observed home/draw/away frequencies and a Poisson total
/// at the league mean.
#[derive(Debug, Clone)]
struct Baseline {
    result: Prob3,
    over: Vec<(u32, f64)>,
}

impl Baseline {
    fn from_training(training: &[PlayedMatch], cfg: &EngineConfig) -> Self {
        let outcomes: Vec<Outcome> = training.iter().map(PlayedMatch::outcome).collect();
        let side_mean = preprocess::league_avg_goals(training) / 2.0;
        let grid =
            forecast::forecast_from_rates(side_mean, side_mean, &cfg.totals_thresholds, cfg.grid_cap);
        Self {
            result: empirical_outcome_probs(&outcomes),
            over: grid.over,
        }
    }

    fn over_probability(&self, threshold: u32) -> f64 {
        self.over
            .iter()
            .find(|(t, _)| *t == threshold)
            .map(|(_, p)| *p)
            .unwrap_or(0.5)
    }
}

struct TotalsTrack {
    threshold: u32,
    raw: Vec<f64>,
    calibrated: Vec<f64>,
    baseline: Vec<f64>,
    hits: Vec<bool>,
    pnl: BetLedger,
}

impl TotalsTrack {
    fn new(threshold: u32, capacity: usize) -> Self {
        Self {
            threshold,
            raw: Vec::with_capacity(capacity),
            calibrated: Vec::with_capacity(capacity),
            baseline: Vec::with_capacity(capacity),
            hits: Vec::with_capacity(capacity),
            pnl: BetLedger::default(),
        }
    }

    fn into_report(self, calibration_static: Option<CalibrationParameters>) -> TotalsMarketReport {
        let raw = metrics::evaluate_binary(&self.raw, &self.hits);
        let calibrated = metrics::evaluate_binary(&self.calibrated, &self.hits);
        let baseline = metrics::evaluate_binary(&self.baseline, &self.hits);
        let reliability_raw = binary_calibration_bins(&self.raw, &self.hits, RELIABILITY_BINS);
        let reliability_calibrated =
            binary_calibration_bins(&self.calibrated, &self.hits, RELIABILITY_BINS);
        TotalsMarketReport {
            threshold: self.threshold,
            raw,
            calibrated,
            baseline,
            delta_log_loss: calibrated.log_loss - baseline.log_loss,
            ece_raw: expected_calibration_error(&reliability_raw),
            ece_calibrated: expected_calibration_error(&reliability_calibrated),
            reliability_raw,
            reliability_calibrated,
            calibration_static,
            pnl: self.pnl,
        }
    }
}

fn result_report(
    preds: &[Prob3],
    baseline_preds: &[Prob3],
    outcomes: &[Outcome],
    pnl: BetLedger,
) -> ResultMarketReport {
    let model = metrics::evaluate_probs(preds, outcomes);
    let baseline = metrics::evaluate_probs(baseline_preds, outcomes);
    let reliability = [Outcome::Home, Outcome::Draw, Outcome::Away]
        .into_iter()
        .map(|class| {
            let bins = calibration_bins(preds, outcomes, class, RELIABILITY_BINS);
            ClassReliability {
                outcome: class,
                ece: expected_calibration_error(&bins),
                bins,
            }
        })
        .collect();
    ResultMarketReport {
        model,
        baseline,
        delta_log_loss: model.log_loss - baseline.log_loss,
        reliability,
        pnl,
    }
}
