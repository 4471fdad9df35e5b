use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::{Outcome, classify_outcome};

/// One fixture as delivered by the match feed. Unscheduled or unplayed fixtures
/// arrive with the kickoff and/or score missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub home: String,
    pub away: String,
    #[serde(default)]
    pub kickoff: Option<DateTime<Utc>>,
    #[serde(default)]
    pub home_goals: Option<u32>,
    #[serde(default)]
    pub away_goals: Option<u32>,
    pub season: String,
}

/// A fixture with a kickoff and a final score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayedMatch {
    pub home: String,
    pub away: String,
    pub kickoff: DateTime<Utc>,
    pub home_goals: u32,
    pub away_goals: u32,
    pub season: String,
}

impl MatchRecord {
    pub fn is_played(&self) -> bool {
        self.kickoff.is_some() && self.home_goals.is_some() && self.away_goals.is_some()
    }

    pub fn played(&self) -> Option<PlayedMatch> {
        let (Some(kickoff), Some(home_goals), Some(away_goals)) =
            (self.kickoff, self.home_goals, self.away_goals)
        else {
            return None;
        };
        Some(PlayedMatch {
            home: self.home.clone(),
            away: self.away.clone(),
            kickoff,
            home_goals,
            away_goals,
            season: self.season.clone(),
        })
    }
}

impl PlayedMatch {
    pub fn outcome(&self) -> Outcome {
        classify_outcome(self.home_goals, self.away_goals)
    }

    pub fn total_goals(&self) -> u32 {
        self.home_goals + self.away_goals
    }

    pub fn is_over(&self, threshold: u32) -> bool {
        self.total_goals() >= threshold
    }
}

/// Played fixtures in kickoff order. The sort is stable, so same-kickoff
/// fixtures keep their feed order.
pub fn played_matches(records: &[MatchRecord]) -> Vec<PlayedMatch> {
    let mut out: Vec<PlayedMatch> = records.iter().filter_map(MatchRecord::played).collect();
    out.sort_by_key(|m| m.kickoff);
    out
}

/// Played fixtures split into (everything outside `season`, `season` itself).
pub fn split_by_season(records: &[MatchRecord], season: &str) -> (Vec<PlayedMatch>, Vec<PlayedMatch>) {
    played_matches(records)
        .into_iter()
        .partition(|m| m.season != season)
}

pub fn season_labels(records: &[MatchRecord]) -> Vec<String> {
    records
        .iter()
        .map(|m| m.season.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Season containing the most recent played kickoff.
pub fn latest_season(records: &[MatchRecord]) -> Option<String> {
    played_matches(records).last().map(|m| m.season.clone())
}
