use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::forecast::{self, MatchForecast};
use crate::matches::{MatchRecord, PlayedMatch, played_matches, split_by_season};
use crate::strength::{self, StrengthModel};

pub const DEFAULT_MODEL_TTL_MINUTES: i64 = 30;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Which played fixtures a cached model is trained on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingSet {
    All,
    ExcludeSeason(String),
}

impl TrainingSet {
    pub fn select(&self, records: &[MatchRecord]) -> Vec<PlayedMatch> {
        match self {
            TrainingSet::All => played_matches(records),
            TrainingSet::ExcludeSeason(season) => split_by_season(records, season).0,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    // `None` is cached too: an empty training set stays empty until the TTL lapses.
    model: Option<Arc<StrengthModel>>,
    built_at: DateTime<Utc>,
}

/// Fitted models keyed by training set. Entries are replaced whole on rebuild;
/// readers holding an `Arc` keep the model they were given.
pub struct ModelCache<C: Clock = SystemClock> {
    clock: C,
    ttl: Duration,
    entries: Mutex<HashMap<TrainingSet, CacheEntry>>,
}

impl ModelCache<SystemClock> {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(SystemClock, ttl)
    }
}

impl Default for ModelCache<SystemClock> {
    fn default() -> Self {
        Self::with_ttl(Duration::minutes(DEFAULT_MODEL_TTL_MINUTES))
    }
}

impl<C: Clock> ModelCache<C> {
    pub fn new(clock: C, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_build(
        &self,
        key: &TrainingSet,
        records: &[MatchRecord],
        cfg: &EngineConfig,
    ) -> Option<Arc<StrengthModel>> {
        let now = self.clock.now();
        if let Some(entry) = self.lock().get(key) {
            if now - entry.built_at < self.ttl {
                return entry.model.clone();
            }
        }

        // Fit without holding the lock; a concurrent build of the same key
        // just publishes last.
        let training = key.select(records);
        let model = strength::build_model(&training, cfg).map(Arc::new);
        debug!(?key, training = training.len(), fitted = model.is_some(), "model cache rebuild");

        self.lock().insert(
            key.clone(),
            CacheEntry {
                model: model.clone(),
                built_at: now,
            },
        );
        model
    }

    pub fn built_at(&self, key: &TrainingSet) -> Option<DateTime<Utc>> {
        self.lock().get(key).map(|entry| entry.built_at)
    }

    pub fn invalidate(&self, key: &TrainingSet) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrainingSet, CacheEntry>> {
        // Entries are only ever inserted whole, so a poisoned map is still consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serving layer: owns the match history and answers forecasts from a cached
/// model trained on all of it.
pub struct ForecastService<C: Clock = SystemClock> {
    records: Vec<MatchRecord>,
    cfg: EngineConfig,
    cache: ModelCache<C>,
}

impl<C: Clock> ForecastService<C> {
    pub fn new(records: Vec<MatchRecord>, cfg: EngineConfig, cache: ModelCache<C>) -> Self {
        Self { records, cfg, cache }
    }

    pub fn model_for(&self, key: &TrainingSet) -> Option<Arc<StrengthModel>> {
        self.cache.get_or_build(key, &self.records, &self.cfg)
    }

    pub fn forecast(&self, home: &str, away: &str) -> MatchForecast {
        let model = self.model_for(&TrainingSet::All);
        forecast::forecast_or_neutral(model.as_deref(), home, away, &self.cfg)
    }

    /// Swaps in a new match history and drops every cached model.
    pub fn replace_records(&mut self, records: Vec<MatchRecord>) {
        self.records = records;
        self.cache.clear();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &ModelCache<C> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for Arc<ManualClock> {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn records() -> Vec<MatchRecord> {
        let base = Utc.with_ymd_and_hms(2023, 8, 1, 15, 0, 0).unwrap();
        let pairs = [("Lark", "Wren"), ("Wren", "Lark"), ("Lark", "Kite"), ("Kite", "Wren")];
        pairs
            .iter()
            .enumerate()
            .map(|(i, (h, a))| MatchRecord {
                home: h.to_string(),
                away: a.to_string(),
                kickoff: Some(base + Duration::days(7 * i as i64)),
                home_goals: Some((i % 3) as u32),
                away_goals: Some(1),
                season: if i < 2 { "2023" } else { "2024" }.to_string(),
            })
            .collect()
    }

    #[test]
    fn reuses_model_until_ttl_expires() {
        let clock = Arc::new(ManualClock::new());
        let cache = ModelCache::new(clock.clone(), Duration::minutes(10));
        let cfg = EngineConfig::default();
        let data = records();

        let first = cache.get_or_build(&TrainingSet::All, &data, &cfg).unwrap();
        clock.advance(Duration::minutes(9));
        let second = cache.get_or_build(&TrainingSet::All, &data, &cfg).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        clock.advance(Duration::minutes(2));
        let third = cache.get_or_build(&TrainingSet::All, &data, &cfg).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        // The old reader still sees its own model.
        assert_eq!(first.training_matches, 4);
    }

    #[test]
    fn keys_are_independent() {
        let cache = ModelCache::new(Arc::new(ManualClock::new()), Duration::minutes(10));
        let cfg = EngineConfig::default();
        let data = records();

        let all = cache.get_or_build(&TrainingSet::All, &data, &cfg).unwrap();
        let key = TrainingSet::ExcludeSeason("2024".to_string());
        let older = cache.get_or_build(&key, &data, &cfg).unwrap();
        assert_eq!(all.training_matches, 4);
        assert_eq!(older.training_matches, 2);
        assert_eq!(cache.len(), 2);

        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn empty_training_set_caches_absence() {
        let cache = ModelCache::new(Arc::new(ManualClock::new()), Duration::minutes(10));
        let cfg = EngineConfig::default();
        assert!(cache.get_or_build(&TrainingSet::All, &[], &cfg).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn service_falls_back_for_unknown_teams() {
        let cache = ModelCache::new(Arc::new(ManualClock::new()), Duration::minutes(10));
        let mut service = ForecastService::new(records(), EngineConfig::default(), cache);
        let known = service.forecast("Lark", "Wren");
        assert!((known.result.sum() - 1.0).abs() < 1e-9);
        let unknown = service.forecast("Lark", "Heron");
        assert!(!unknown.sufficient_sample);
        assert_eq!(unknown.expected_home_goals, forecast::NEUTRAL_HOME_XG);

        service.replace_records(Vec::new());
        assert!(service.cache().is_empty());
        assert!(!service.forecast("Lark", "Wren").sufficient_sample);
    }
}
