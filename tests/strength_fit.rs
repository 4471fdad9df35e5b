use chrono::{Duration, TimeZone, Utc};

use goalcast::config::EngineConfig;
use goalcast::forecast;
use goalcast::matches::{self, MatchRecord};
use goalcast::strength;

const TEAMS: [&str; 4] = ["Atlas", "Borea", "Corvo", "Draco"];

fn dominant_round_robin() -> Vec<MatchRecord> {
    let start = Utc.with_ymd_and_hms(2024, 8, 10, 14, 0, 0).unwrap();
    let mut out = Vec::new();
    let mut day = 0;
    for home in TEAMS {
        for away in TEAMS {
            if home == away {
                continue;
            }
            let (hg, ag) = match (home, away) {
                ("Atlas", _) => (2, 0),
                (_, "Atlas") => (0, 2),
                _ => (1, 1),
            };
            out.push(MatchRecord {
                home: home.to_string(),
                away: away.to_string(),
                kickoff: Some(start + Duration::days(day)),
                home_goals: Some(hg),
                away_goals: Some(ag),
                season: "2024/25".to_string(),
            });
            day += 3;
        }
    }
    out
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(0, |best, (i, v)| if *v > values[best] { i } else { best })
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(0, |best, (i, v)| if *v < values[best] { i } else { best })
}

#[test]
fn dominant_team_has_best_attack_and_defense() {
    let played = matches::played_matches(&dominant_round_robin());
    assert_eq!(played.len(), 12);

    let model = strength::fit(&played, &EngineConfig::default()).unwrap();
    let atlas = model.index_of("Atlas").unwrap();

    assert_eq!(argmax(&model.attack_home), atlas);
    assert_eq!(argmax(&model.attack_away), atlas);
    assert_eq!(argmin(&model.defense_home), atlas);
    assert_eq!(argmin(&model.defense_away), atlas);

    for values in [
        &model.attack_home,
        &model.defense_home,
        &model.attack_away,
        &model.defense_away,
    ] {
        let mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
        assert!(mean.abs() < 1e-9, "strength vector mean {mean}");
    }
}

#[test]
fn dominant_team_is_favoured_home_and_away() {
    let played = matches::played_matches(&dominant_round_robin());
    let cfg = EngineConfig::default();
    let model = strength::build_model(&played, &cfg).unwrap();

    let home = forecast::forecast(&model, "Atlas", "Corvo", &cfg);
    assert!(home.result.home > home.result.away);
    let away = forecast::forecast(&model, "Corvo", "Atlas", &cfg);
    assert!(away.result.away > away.result.home);

    // Six games each is exactly the default minimum.
    assert!(home.sufficient_sample);
    // Twelve fixtures are below the calibration minimum.
    assert!(model.calibration.is_empty());
    assert!(home.totals.iter().all(|t| t.raw == t.calibrated));
}

#[test]
fn unknown_team_gets_neutral_prior() {
    let played = matches::played_matches(&dominant_round_robin());
    let cfg = EngineConfig::default();
    let model = strength::build_model(&played, &cfg).unwrap();

    let f = forecast::forecast(&model, "Atlas", "Eridani", &cfg);
    assert!(!f.sufficient_sample);
    assert_eq!(f.expected_home_goals, forecast::NEUTRAL_HOME_XG);
    assert_eq!(f.expected_away_goals, forecast::NEUTRAL_AWAY_XG);
    assert!((f.result.sum() - 1.0).abs() < 1e-9);
}
