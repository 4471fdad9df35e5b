use serde::{Deserialize, Serialize};

use crate::matches::PlayedMatch;

/// League goals per match assumed when a training set is empty.
pub const DEFAULT_LEAGUE_AVG_GOALS: f64 = 2.60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShrinkParams {
    pub goal_cap: f64,
    /// 0 keeps the capped count, 1 replaces it with half the league mean.
    pub alpha: f64,
}

/// A played fixture with winsorized, shrunk goal counts used as Poisson targets.
#[derive(Debug, Clone, Copy)]
pub struct AdjustedMatch<'a> {
    pub fixture: &'a PlayedMatch,
    pub adj_home_goals: f64,
    pub adj_away_goals: f64,
}

pub fn shrink(
    home_goals: f64,
    away_goals: f64,
    league_avg_goals: f64,
    params: ShrinkParams,
) -> (f64, f64) {
    let alpha = params.alpha.clamp(0.0, 1.0);
    let cap = params.goal_cap.max(0.0);
    let side_mean = league_avg_goals / 2.0;
    let adjust = |goals: f64| (1.0 - alpha) * goals.clamp(0.0, cap) + alpha * side_mean;
    (adjust(home_goals), adjust(away_goals))
}

pub fn league_avg_goals(matches: &[PlayedMatch]) -> f64 {
    if matches.is_empty() {
        return DEFAULT_LEAGUE_AVG_GOALS;
    }
    let total: u64 = matches.iter().map(|m| m.total_goals() as u64).sum();
    total as f64 / matches.len() as f64
}

pub fn adjust_matches(
    matches: &[PlayedMatch],
    league_avg_goals: f64,
    params: ShrinkParams,
) -> Vec<AdjustedMatch<'_>> {
    matches
        .iter()
        .map(|m| {
            let (adj_home_goals, adj_away_goals) = shrink(
                m.home_goals as f64,
                m.away_goals as f64,
                league_avg_goals,
                params,
            );
            AdjustedMatch {
                fixture: m,
                adj_home_goals,
                adj_away_goals,
            }
        })
        .collect()
}
