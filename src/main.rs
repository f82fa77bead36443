use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use env_logger::Builder;
use log::LevelFilter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use statarb::config::{StopLossConfig, StrategyConfig};
use statarb::market::PriceTable;
use statarb::metrics::PositionSide;
use statarb::pairs::PairsStrategy;
use statarb::stop_loss::{StopLossManager, StopRequest, StopType};
use std::env;
use std::io::Write;
use std::str::FromStr;

fn main() -> anyhow::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "3600".to_string())
        .parse::<i32>()
        .expect("Invalid TIMEZONE_OFFSET");
    let offset = FixedOffset::east_opt(offset_seconds).expect("Invalid offset");
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    run_stop_loss_demo()?;
    run_pairs_demo()?;
    Ok(())
}

fn run_stop_loss_demo() -> anyhow::Result<()> {
    log::info!("=== Stop loss management demo ===");
    let cfg = StopLossConfig::from_env(100_000.0)?;
    let mut manager = StopLossManager::new(cfg)?;

    let fixed = manager.calculate_stop_loss(
        &StopRequest::new("AAPL", 150.0, 10_000.0, PositionSide::Long, StopType::FixedPct)
            .with_stop_pct(0.02),
    )?;
    log::info!(
        "AAPL fixed stop: ${:.2} ({}), risking ${:.2} ({:.2}% of account)",
        fixed.stop_price,
        fixed.rationale,
        fixed.risk_amount,
        fixed.account_risk_pct * 100.0
    );

    manager.calculate_stop_loss(&StopRequest::new(
        "NVDA",
        500.0,
        15_000.0,
        PositionSide::Long,
        StopType::Trailing,
    ))?;
    for price in [520.0, 545.0, 530.0] {
        let update = manager.update_trailing_stop("NVDA", price, None, false)?;
        log::info!(
            "NVDA at ${:.2}: stop ${:.2}, moved={}, profit locked ${:.2}",
            price,
            update.stop_price,
            update.stop_moved,
            update.profit_locked
        );
    }

    let report = manager.validate_100pct_coverage(&["AAPL", "NVDA", "TSLA"]);
    log::info!(
        "Stop coverage: {:.0}% ({} of {}), missing: {:?}",
        report.coverage_pct * 100.0,
        report.positions_with_stops,
        report.total_positions,
        report.missing_stops
    );

    let emergency = manager.emergency_stop_update("AAPL", 140.0, "macro shock")?;
    log::info!(
        "Emergency stop for AAPL: ${:.2} -> ${:.2} (violated never-downgrade: {})",
        emergency.old_stop_price,
        emergency.stop_price,
        emergency.violated_never_downgrade
    );
    Ok(())
}

fn run_pairs_demo() -> anyhow::Result<()> {
    log::info!("=== Pairs trading demo ===");
    let cfg = StrategyConfig::from_env()?;
    let mut strategy = PairsStrategy::new(cfg)?;
    let table = synthetic_prices(120);

    let pairs = strategy.screen_for_pairs(&["KO", "PEP", "XOM"], &table)?;
    log::info!("Screen found {} cointegrated pair(s)", pairs.len());
    for pair in &pairs {
        log::info!(
            "  {}/{}: p={:.3}, hedge={:.3}",
            pair.symbol_a,
            pair.symbol_b,
            pair.cointegration.p_value,
            pair.cointegration.hedge_ratio
        );
    }

    for signal in strategy.monitor_pairs(&table) {
        log::info!(
            "Signal {}/{}: {} at z={:.2} (confidence {:.0})",
            signal.symbol_a,
            signal.symbol_b,
            signal.kind.label(),
            signal.z_score,
            signal.confidence
        );
    }

    let results = strategy.validate_pairs(&pairs, &table, 100_000.0);
    for result in &results {
        log::info!(
            "Backtest {}: {} trades, win rate {:.0}%, return {:.2}%",
            result.pair,
            result.total_trades,
            result.win_rate * 100.0,
            result.return_pct
        );
        for trade in &result.trades {
            log::info!("  trade: {}", serde_json::to_string(trade)?);
        }
    }
    Ok(())
}

/// 120 days of synthetic closes: KO/PEP move together with a mean-reverting
/// spread, XOM wanders on its own.
fn synthetic_prices(n: usize) -> PriceTable {
    let mut rng = StdRng::seed_from_u64(20240101);
    let step = Normal::new(0.0, 0.4).unwrap();
    let noise = Normal::new(0.0, 0.8).unwrap();

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let index: Vec<NaiveDate> = (0..n).map(|i| start + Duration::days(i as i64)).collect();
    let mut table = PriceTable::new(index);

    let mut level: f64 = 60.0;
    let mut spread: f64 = 0.0;
    let mut other: f64 = 100.0;
    let mut ko = Vec::with_capacity(n);
    let mut pep = Vec::with_capacity(n);
    let mut xom = Vec::with_capacity(n);
    for _ in 0..n {
        level += step.sample(&mut rng);
        spread = 0.3 * spread + noise.sample(&mut rng);
        other += step.sample(&mut rng);
        pep.push(level);
        ko.push(0.4 * level + 0.1 * spread + 30.0);
        xom.push(other);
    }
    // insert_column only fails on a length mismatch, which cannot happen here
    table.insert_column("KO", ko).unwrap();
    table.insert_column("PEP", pep).unwrap();
    table.insert_column("XOM", xom).unwrap();
    table
}
