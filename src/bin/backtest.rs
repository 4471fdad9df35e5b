use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use goalcast::backtest::{self, BacktestMode, BacktestOptions, BacktestReport};
use goalcast::config::EngineConfig;
use goalcast::dataset;
use goalcast::matches::{self, MatchRecord};
use goalcast::staking::Pricing;
use goalcast::synthetic::SyntheticLeague;

const DEFAULT_EV_THRESHOLD: f64 = 0.02;
const DEFAULT_PROB_THRESHOLD: f64 = 0.40;
const DEFAULT_MARGIN: f64 = 0.05;
const DEFAULT_SYNTHETIC_TEAMS: usize = 16;
const DEFAULT_SYNTHETIC_SEED: u64 = 2026;
const SYNTHETIC_SEASONS: [&str; 3] = ["2022/23", "2023/24", "2024/25"];

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cfg = EngineConfig::from_env().context("invalid FORECAST_* configuration")?;

    let (records, source) = if has_flag("--synthetic") {
        let seed = parse_u64_arg("--seed").unwrap_or(DEFAULT_SYNTHETIC_SEED);
        let teams = parse_u64_arg("--teams")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SYNTHETIC_TEAMS)
            .clamp(4, 40);
        let league = SyntheticLeague::random(teams, 0.45, seed);
        (
            league.generate(&SYNTHETIC_SEASONS, seed.wrapping_add(1)),
            format!("synthetic ({teams} teams, seed {seed})"),
        )
    } else {
        let path = parse_string_arg("--data")
            .map(PathBuf::from)
            .or_else(|| std::env::var("FORECAST_DATA").ok().map(PathBuf::from))
            .context("pass --data <file.json>, set FORECAST_DATA, or use --synthetic")?;
        let records = dataset::load_matches_json(&path)?;
        (records, path.display().to_string())
    };

    let season = parse_string_arg("--season")
        .or_else(|| matches::latest_season(&records))
        .ok_or_else(|| anyhow!("dataset has no played fixtures"))?;

    let mode = match parse_string_arg("--mode") {
        Some(raw) => raw.parse::<BacktestMode>()?,
        None if has_flag("--walk-forward") => BacktestMode::WalkForward,
        None => BacktestMode::Static,
    };
    let pricing = match parse_f64_arg("--fixed-odds") {
        Some(odds) => Pricing::Fixed {
            odds: odds.clamp(1.01, 1000.0),
        },
        None => Pricing::SyntheticMargin {
            margin: parse_f64_arg("--margin")
                .unwrap_or(DEFAULT_MARGIN)
                .clamp(0.0, 0.5),
        },
    };
    let opts = BacktestOptions {
        mode,
        ev_threshold: parse_f64_arg("--ev")
            .unwrap_or(DEFAULT_EV_THRESHOLD)
            .clamp(-1.0, 5.0),
        prob_threshold: parse_f64_arg("--min-prob")
            .unwrap_or(DEFAULT_PROB_THRESHOLD)
            .clamp(0.0, 1.0),
        pricing,
        commission: parse_f64_arg("--commission")
            .unwrap_or(0.0)
            .clamp(0.0, 0.5),
    };

    let report = backtest::evaluate(&records, &season, &opts, &cfg);

    if has_flag("--json") {
        let body = serde_json::to_string_pretty(&report).context("encode report")?;
        println!("{body}");
        return Ok(());
    }

    print_report(&report, &source, &records);
    Ok(())
}

fn print_report(report: &BacktestReport, source: &str, records: &[MatchRecord]) {
    println!("Pre-match backtest");
    println!("Data: {source} ({} records)", records.len());
    println!(
        "Season: {} mode={:?} training={} samples={} rebuilds={}",
        report.test_season, report.options.mode, report.training_matches, report.samples, report.rebuilds
    );
    println!();

    if report.samples == 0 {
        println!("No played fixtures in season {}.", report.test_season);
        return;
    }

    let r = &report.result;
    println!(
        "1x2      ll_model={:.4} ll_base={:.4} delta={:+.4} brier_model={:.4} brier_base={:.4} acc={:.3}",
        r.model.log_loss,
        r.baseline.log_loss,
        r.delta_log_loss,
        r.model.brier,
        r.baseline.brier,
        r.model.accuracy
    );
    for class in &r.reliability {
        println!("  ece[{:?}]={:.4}", class.outcome, class.ece);
    }

    for t in &report.totals {
        let cal = t
            .calibration_static
            .map(|p| format!("({:.2},{:+.2})", p.slope, p.intercept))
            .unwrap_or_else(|| "none".to_string());
        println!(
            "over{:<4} ll_raw={:.4} ll_cal={:.4} ll_base={:.4} delta={:+.4} ece_raw={:.4} ece_cal={:.4} calibration_static={}",
            format!("{}.5", t.threshold.saturating_sub(1)),
            t.raw.log_loss,
            t.calibrated.log_loss,
            t.baseline.log_loss,
            t.delta_log_loss,
            t.ece_raw,
            t.ece_calibrated,
            cal
        );
    }

    println!();
    println!(
        "pnl 1x2 bets={} hit={:.3} profit={:+.2} roi={:+.4}",
        r.pnl.bets,
        r.pnl.hit_rate(),
        r.pnl.profit,
        r.pnl.roi()
    );
    for t in &report.totals {
        println!(
            "pnl over{}.5 bets={} hit={:.3} profit={:+.2} roi={:+.4}",
            t.threshold.saturating_sub(1),
            t.pnl.bets,
            t.pnl.hit_rate(),
            t.pnl.profit,
            t.pnl.roi()
        );
    }
    let c = &report.combined_pnl;
    println!(
        "pnl combined bets={} hit={:.3} profit={:+.2} roi={:+.4}",
        c.bets,
        c.hit_rate(),
        c.profit,
        c.roi()
    );
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}=")) {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_f64_arg(name: &str) -> Option<f64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<f64>().ok())
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<u64>().ok())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
