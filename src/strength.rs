use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::f64::consts::LN_2;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::{self, CalibrationParameters};
use crate::config::EngineConfig;
use crate::forecast;
use crate::matches::PlayedMatch;
use crate::preprocess;

const MS_PER_DAY: f64 = 86_400_000.0;
const GRADIENT_CHUNK: usize = 512;
const WEIGHT_FLOOR: f64 = 1e-9;
const CENTER_BISECTIONS: usize = 100;

/// Fitted log-scale strengths, split by home/away role. Higher attack means
/// more goals scored; higher defense means more goals conceded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthModel {
    pub teams: Vec<String>,
    pub team_index: HashMap<String, usize>,
    pub attack_home: Vec<f64>,
    pub defense_home: Vec<f64>,
    pub attack_away: Vec<f64>,
    pub defense_away: Vec<f64>,
    pub home_advantage: f64,
    pub games_home: Vec<u32>,
    pub games_away: Vec<u32>,
    pub league_avg_goals: f64,
    pub min_games_per_team: u32,
    pub training_matches: usize,
    /// Platt parameters per totals threshold; absent means raw probabilities.
    pub calibration: BTreeMap<u32, CalibrationParameters>,
}

impl StrengthModel {
    pub fn index_of(&self, team: &str) -> Option<usize> {
        self.team_index.get(team).copied()
    }

    pub fn games_played(&self, team: &str) -> Option<u32> {
        let idx = self.index_of(team)?;
        Some(self.games_home[idx] + self.games_away[idx])
    }

    pub fn expected_goals(&self, home: usize, away: usize) -> (f64, f64) {
        poisson_rates(
            self.home_advantage,
            self.attack_home[home],
            self.defense_away[away],
            self.attack_away[away],
            self.defense_home[home],
        )
    }

    pub fn expected_goals_for(&self, home: &str, away: &str) -> Option<(f64, f64)> {
        Some(self.expected_goals(self.index_of(home)?, self.index_of(away)?))
    }

    pub fn has_sufficient_sample(&self, home: &str, away: &str) -> bool {
        let enough = |team: &str| {
            self.games_played(team)
                .is_some_and(|n| n >= self.min_games_per_team)
        };
        enough(home) && enough(away)
    }

    pub fn calibration_for(&self, threshold: u32) -> Option<&CalibrationParameters> {
        self.calibration.get(&threshold)
    }
}

/// Fits strengths and then the totals calibration on the same training matches.
pub fn build_model(matches: &[PlayedMatch], cfg: &EngineConfig) -> Option<StrengthModel> {
    let mut model = fit(matches, cfg)?;
    model.calibration = fit_totals_calibration(&model, matches, cfg);
    Some(model)
}

/// Time-decayed Poisson maximum likelihood by gradient ascent. Returns `None`
/// when the training set names no competitors.
pub fn fit(matches: &[PlayedMatch], cfg: &EngineConfig) -> Option<StrengthModel> {
    let teams: Vec<String> = matches
        .iter()
        .flat_map(|m| [m.home.clone(), m.away.clone()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if teams.is_empty() {
        debug!("no competitors in training set; skipping fit");
        return None;
    }
    let team_index: HashMap<String, usize> = teams
        .iter()
        .enumerate()
        .map(|(idx, team)| (team.clone(), idx))
        .collect();
    let n = teams.len();

    let league_avg_goals = preprocess::league_avg_goals(matches);
    let adjusted = preprocess::adjust_matches(matches, league_avg_goals, cfg.shrink_params());
    let now = matches.iter().map(|m| m.kickoff).max()?;

    let mut samples = Vec::with_capacity(adjusted.len());
    for adj in &adjusted {
        let (Some(&home), Some(&away)) = (
            team_index.get(&adj.fixture.home),
            team_index.get(&adj.fixture.away),
        ) else {
            continue;
        };
        samples.push(Sample {
            home,
            away,
            weight: recency_weight(adj.fixture.kickoff, now, cfg.half_life_days),
            goals_home: adj.adj_home_goals,
            goals_away: adj.adj_away_goals,
        });
    }

    let mut games_home = vec![0u32; n];
    let mut games_away = vec![0u32; n];
    let mut home_weight = vec![0.0_f64; n];
    let mut away_weight = vec![0.0_f64; n];
    let mut total_weight = 0.0_f64;
    for s in &samples {
        games_home[s.home] += 1;
        games_away[s.away] += 1;
        home_weight[s.home] += s.weight;
        away_weight[s.away] += s.weight;
        total_weight += s.weight;
    }

    let lr = cfg.learning_rate;
    let l2 = cfg.l2_penalty;
    let bound = cfg.param_clamp.abs();
    let mut params = Params::zeros(n);

    for _ in 0..cfg.iterations {
        // Chunks are reduced in order so the sum is identical run to run.
        let grad = samples
            .par_chunks(GRADIENT_CHUNK)
            .map(|chunk| accumulate(chunk, &params, n))
            .collect::<Vec<_>>()
            .into_iter()
            .fold(Params::zeros(n), Params::merge);

        ascend(&mut params.attack_home, &grad.attack_home, &home_weight, lr, l2);
        ascend(&mut params.defense_home, &grad.defense_home, &home_weight, lr, l2);
        ascend(&mut params.attack_away, &grad.attack_away, &away_weight, lr, l2);
        ascend(&mut params.defense_away, &grad.defense_away, &away_weight, lr, l2);
        let g_home = grad.home_advantage / total_weight.max(WEIGHT_FLOOR) - l2 * params.home_advantage;
        params.home_advantage = (params.home_advantage + lr * g_home).clamp(-bound, bound);

        for values in [
            &mut params.attack_home,
            &mut params.defense_home,
            &mut params.attack_away,
            &mut params.defense_away,
        ] {
            center_within_bound(values, bound);
        }
    }

    debug!(
        teams = n,
        matches = samples.len(),
        home_advantage = params.home_advantage,
        "fitted strength model"
    );

    Some(StrengthModel {
        teams,
        team_index,
        attack_home: params.attack_home,
        defense_home: params.defense_home,
        attack_away: params.attack_away,
        defense_away: params.defense_away,
        home_advantage: params.home_advantage,
        games_home,
        games_away,
        league_avg_goals,
        min_games_per_team: cfg.min_games_per_team,
        training_matches: samples.len(),
        calibration: BTreeMap::new(),
    })
}

pub fn recency_weight(kickoff: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age_ms = (now - kickoff).num_milliseconds().max(0) as f64;
    (-(LN_2 / (half_life_days * MS_PER_DAY)) * age_ms).exp()
}

fn poisson_rates(
    home_advantage: f64,
    attack_home: f64,
    defense_away: f64,
    attack_away: f64,
    defense_home: f64,
) -> (f64, f64) {
    (
        (home_advantage + attack_home + defense_away).exp(),
        (attack_away + defense_home).exp(),
    )
}

fn fit_totals_calibration(
    model: &StrengthModel,
    matches: &[PlayedMatch],
    cfg: &EngineConfig,
) -> BTreeMap<u32, CalibrationParameters> {
    let thresholds = &cfg.totals_thresholds;
    let mut raw: Vec<Vec<f64>> = vec![Vec::with_capacity(matches.len()); thresholds.len()];
    let mut hits: Vec<Vec<bool>> = vec![Vec::with_capacity(matches.len()); thresholds.len()];

    for m in matches {
        let Some((mu_home, mu_away)) = model.expected_goals_for(&m.home, &m.away) else {
            continue;
        };
        let grid = forecast::forecast_from_rates(mu_home, mu_away, thresholds, cfg.grid_cap);
        for (k, threshold) in thresholds.iter().enumerate() {
            raw[k].push(grid.over_probability(*threshold).unwrap_or(0.0));
            hits[k].push(m.is_over(*threshold));
        }
    }

    let mut out = BTreeMap::new();
    for (k, threshold) in thresholds.iter().enumerate() {
        match calibration::fit(&raw[k], &hits[k], &cfg.calibration) {
            Some(params) => {
                debug!(threshold, slope = params.slope, intercept = params.intercept, "totals calibration accepted");
                out.insert(*threshold, params);
            }
            None => debug!(threshold, samples = raw[k].len(), "totals calibration rejected"),
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    home: usize,
    away: usize,
    weight: f64,
    goals_home: f64,
    goals_away: f64,
}

#[derive(Debug, Clone)]
struct Params {
    attack_home: Vec<f64>,
    defense_home: Vec<f64>,
    attack_away: Vec<f64>,
    defense_away: Vec<f64>,
    home_advantage: f64,
}

impl Params {
    fn zeros(n: usize) -> Self {
        Self {
            attack_home: vec![0.0; n],
            defense_home: vec![0.0; n],
            attack_away: vec![0.0; n],
            defense_away: vec![0.0; n],
            home_advantage: 0.0,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        add_into(&mut self.attack_home, &other.attack_home);
        add_into(&mut self.defense_home, &other.defense_home);
        add_into(&mut self.attack_away, &other.attack_away);
        add_into(&mut self.defense_away, &other.defense_away);
        self.home_advantage += other.home_advantage;
        self
    }
}

fn accumulate(chunk: &[Sample], params: &Params, n: usize) -> Params {
    let mut g = Params::zeros(n);
    for s in chunk {
        let (mu_home, mu_away) = poisson_rates(
            params.home_advantage,
            params.attack_home[s.home],
            params.defense_away[s.away],
            params.attack_away[s.away],
            params.defense_home[s.home],
        );
        let r_home = (s.goals_home - mu_home) * s.weight;
        let r_away = (s.goals_away - mu_away) * s.weight;

        g.attack_home[s.home] += r_home;
        g.defense_away[s.away] += r_home;
        g.home_advantage += r_home;
        g.attack_away[s.away] += r_away;
        g.defense_home[s.home] += r_away;
    }
    g
}

// Gradients are scaled by each parameter's total recency weight, so one
// learning rate suits both thin and thick histories.
fn ascend(values: &mut [f64], grad: &[f64], weight: &[f64], lr: f64, l2: f64) {
    for ((v, g), w) in values.iter_mut().zip(grad).zip(weight) {
        let step = g / w.max(WEIGHT_FLOOR) - l2 * *v;
        *v += lr * step;
    }
}

/// Shifts the vector by the single offset that leaves it summing to zero once
/// clamped to `±bound`, so both constraints hold after every step.
fn center_within_bound(values: &mut [f64], bound: f64) {
    if values.is_empty() {
        return;
    }
    let clamped_sum = |shift: f64| {
        values
            .iter()
            .map(|v| (v - shift).clamp(-bound, bound))
            .sum::<f64>()
    };
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    // The clamped sum is non-increasing in the shift: n*bound at `lo`, -n*bound at `hi`.
    let (mut lo, mut hi) = (min - bound, max + bound);
    for _ in 0..CENTER_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if clamped_sum(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let shift = 0.5 * (lo + hi);
    for v in values.iter_mut() {
        *v = (*v - shift).clamp(-bound, bound);
    }
}

fn add_into(acc: &mut [f64], other: &[f64]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
}
