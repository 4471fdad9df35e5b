pub mod backtest;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod forecast;
pub mod matches;
pub mod metrics;
pub mod model_cache;
pub mod preprocess;
pub mod staking;
pub mod strength;
pub mod synthetic;
