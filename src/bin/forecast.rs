use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use goalcast::config::EngineConfig;
use goalcast::dataset;
use goalcast::model_cache::{ForecastService, ModelCache};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cfg = EngineConfig::from_env().context("invalid FORECAST_* configuration")?;
    let path = parse_string_arg("--data")
        .map(PathBuf::from)
        .or_else(|| std::env::var("FORECAST_DATA").ok().map(PathBuf::from))
        .context("pass --data <file.json> or set FORECAST_DATA")?;
    let home = parse_string_arg("--home").context("missing --home <team>")?;
    let away = parse_string_arg("--away").context("missing --away <team>")?;

    let records = dataset::load_matches_json(&path)?;
    let service = ForecastService::new(records, cfg, ModelCache::default());
    let f = service.forecast(&home, &away);

    if has_flag("--json") {
        println!("{}", serde_json::to_string_pretty(&f).context("encode forecast")?);
        return Ok(());
    }

    println!("{} vs {}", f.home, f.away);
    println!(
        "xG {:.2} - {:.2}{}",
        f.expected_home_goals,
        f.expected_away_goals,
        if f.sufficient_sample {
            ""
        } else {
            "  (thin sample)"
        }
    );
    println!(
        "home={:.1}% draw={:.1}% away={:.1}%",
        f.result.home * 100.0,
        f.result.draw * 100.0,
        f.result.away * 100.0
    );
    for t in &f.totals {
        println!(
            "over {}.5 raw={:.1}% calibrated={:.1}%",
            t.threshold.saturating_sub(1),
            t.raw * 100.0,
            t.calibrated * 100.0
        );
    }
    Ok(())
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

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
