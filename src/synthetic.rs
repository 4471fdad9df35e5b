use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::matches::MatchRecord;

const MAX_SAMPLED_RATE: f64 = 12.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticTeam {
    pub name: String,
    /// Log-scale; higher scores more.
    pub attack: f64,
    /// Log-scale; higher concedes more.
    pub defense: f64,
}

/// A league with known strengths, used to produce seasons whose true
/// generating process is the model family being fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticLeague {
    pub teams: Vec<SyntheticTeam>,
    pub home_advantage: f64,
    /// Goals per side between two average teams on neutral ground.
    pub base_goals: f64,
    pub first_kickoff: DateTime<Utc>,
    pub days_between_rounds: i64,
}

impl SyntheticLeague {
    pub fn new(teams: Vec<SyntheticTeam>) -> Self {
        Self {
            teams,
            home_advantage: 0.22,
            base_goals: 1.25,
            first_kickoff: Utc
                .with_ymd_and_hms(2021, 8, 14, 15, 0, 0)
                .single()
                .unwrap_or_default(),
            days_between_rounds: 7,
        }
    }

    /// `n` teams with attack and defense drawn uniformly from `[-spread, spread]`.
    pub fn random(n: usize, spread: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let spread = spread.abs().max(f64::EPSILON);
        let teams = (0..n)
            .map(|i| SyntheticTeam {
                name: format!("Team {:02}", i + 1),
                attack: rng.gen_range(-spread..spread),
                defense: rng.gen_range(-spread..spread),
            })
            .collect();
        Self::new(teams)
    }

    pub fn expected_goals(&self, home: usize, away: usize) -> (f64, f64) {
        let (h, a) = (&self.teams[home], &self.teams[away]);
        (
            self.base_goals * (self.home_advantage + h.attack + a.defense).exp(),
            self.base_goals * (a.attack + h.defense).exp(),
        )
    }

    /// One double round robin per label, seasons back to back.
    pub fn generate(&self, seasons: &[&str], seed: u64) -> Vec<MatchRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        let rounds = double_round_robin(self.teams.len());
        let mut kickoff = self.first_kickoff;
        let mut out = Vec::with_capacity(seasons.len() * rounds.len() * self.teams.len() / 2);

        for season in seasons {
            for round in &rounds {
                for (home, away) in round {
                    let (mu_home, mu_away) = self.expected_goals(*home, *away);
                    out.push(MatchRecord {
                        home: self.teams[*home].name.clone(),
                        away: self.teams[*away].name.clone(),
                        kickoff: Some(kickoff),
                        home_goals: Some(sample_poisson(mu_home, &mut rng)),
                        away_goals: Some(sample_poisson(mu_away, &mut rng)),
                        season: season.to_string(),
                    });
                }
                kickoff += Duration::days(self.days_between_rounds);
            }
            // Off-season gap.
            kickoff += Duration::days(self.days_between_rounds * 8);
        }
        out
    }
}

/// Rounds of a double round robin by the circle method. Every ordered pair
/// appears exactly once; an odd team count gets a bye each round.
pub fn double_round_robin(n: usize) -> Vec<Vec<(usize, usize)>> {
    if n < 2 {
        return Vec::new();
    }
    let mut slots: Vec<Option<usize>> = (0..n).map(Some).collect();
    if n % 2 == 1 {
        slots.push(None);
    }
    let m = slots.len();

    let mut first_half = Vec::with_capacity(m - 1);
    for round in 0..m - 1 {
        let mut fixtures = Vec::with_capacity(m / 2);
        for i in 0..m / 2 {
            if let (Some(a), Some(b)) = (slots[i], slots[m - 1 - i]) {
                if (round + i) % 2 == 0 {
                    fixtures.push((a, b));
                } else {
                    fixtures.push((b, a));
                }
            }
        }
        first_half.push(fixtures);
        slots[1..].rotate_right(1);
    }

    let second_half: Vec<Vec<(usize, usize)>> = first_half
        .iter()
        .map(|round| round.iter().map(|(h, a)| (*a, *h)).collect())
        .collect();
    first_half.into_iter().chain(second_half).collect()
}

/// Knuth's product-of-uniforms sampler; fine for football-sized rates.
pub fn sample_poisson<R: Rng + ?Sized>(lambda: f64, rng: &mut R) -> u32 {
    let lambda = lambda.clamp(0.0, MAX_SAMPLED_RATE);
    let limit = (-lambda).exp();
    let mut k = 0u32;
    let mut product = rng.gen_range(0.0..1.0);
    while product > limit {
        k += 1;
        product *= rng.gen_range(0.0..1.0);
    }
    k
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn round_robin_covers_every_ordered_pair_once() {
        for n in [2, 5, 6] {
            let rounds = double_round_robin(n);
            let pairs: Vec<(usize, usize)> = rounds.iter().flatten().copied().collect();
            let unique: HashSet<_> = pairs.iter().copied().collect();
            assert_eq!(pairs.len(), n * (n - 1));
            assert_eq!(unique.len(), pairs.len());
            for round in &rounds {
                let mut seen = HashSet::new();
                for (h, a) in round {
                    assert!(seen.insert(*h) && seen.insert(*a), "team twice in a round");
                }
            }
        }
        assert!(double_round_robin(1).is_empty());
    }

    #[test]
    fn poisson_sampler_mean_is_close() {
        let mut rng = StdRng::seed_from_u64(7);
        let draws = 20_000;
        let total: u64 = (0..draws).map(|_| sample_poisson(1.6, &mut rng) as u64).sum();
        let mean = total as f64 / draws as f64;
        assert!((mean - 1.6).abs() < 0.05, "mean {mean}");
        assert_eq!(sample_poisson(0.0, &mut rng), 0);
    }

    #[test]
    fn generation_is_seeded() {
        let league = SyntheticLeague::random(6, 0.4, 3);
        let a = league.generate(&["s1", "s2"], 11);
        let b = league.generate(&["s1", "s2"], 11);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2 * 30);
        assert!(a.windows(2).all(|w| w[0].kickoff <= w[1].kickoff));
        assert_ne!(a, league.generate(&["s1", "s2"], 12));
    }

    #[test]
    fn schedule_start_is_fixed() {
        let first = SyntheticLeague::random(4, 0.3, 1).first_kickoff;
        assert_eq!(first, Utc.with_ymd_and_hms(2021, 8, 14, 15, 0, 0).unwrap());
        assert_eq!(first, SyntheticLeague::random(4, 0.3, 2).first_kickoff);
    }
}
