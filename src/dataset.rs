use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::matches::MatchRecord;

/// Parses a JSON array of match records. Fixtures without a kickoff or score
/// are kept; the engine filters them out itself.
pub fn parse_matches_json(body: &str) -> Result<Vec<MatchRecord>> {
    serde_json::from_str::<Vec<MatchRecord>>(body.trim()).context("invalid match records json")
}

pub fn load_matches_json(path: &Path) -> Result<Vec<MatchRecord>> {
    let body =
        fs::read_to_string(path).with_context(|| format!("read dataset {}", path.display()))?;
    parse_matches_json(&body).with_context(|| format!("parse dataset {}", path.display()))
}

pub fn write_matches_json(path: &Path, records: &[MatchRecord]) -> Result<()> {
    let body = serde_json::to_string_pretty(records).context("encode match records")?;
    fs::write(path, body).with_context(|| format!("write dataset {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_played_and_unplayed_records() {
        let body = r#"[
            {"home": "Ajax", "away": "PSV", "kickoff": "2024-02-04T13:30:00Z",
             "home_goals": 2, "away_goals": 2, "season": "2023/24"},
            {"home": "PSV", "away": "Ajax", "kickoff": null, "season": "2023/24"}
        ]"#;
        let records = parse_matches_json(body).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_played());
        assert!(!records[1].is_played());
        assert_eq!(records[1].home_goals, None);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_matches_json("{\"home\": 1}").unwrap_err();
        assert!(err.to_string().contains("invalid match records json"));
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("goalcast-dataset-{}.json", std::process::id()));
        let records = parse_matches_json(
            r#"[{"home": "A", "away": "B", "kickoff": "2024-01-01T00:00:00Z",
                 "home_goals": 1, "away_goals": 0, "season": "s"}]"#,
        )
        .unwrap();
        write_matches_json(&path, &records).unwrap();
        let loaded = load_matches_json(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, records);
    }
}
