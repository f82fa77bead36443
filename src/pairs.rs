use crate::config::StrategyConfig;
use crate::market::PriceTable;
use crate::stats;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("insufficient data: need {needed} rows, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("insufficient observations: need {needed}, got {got}")]
    InsufficientObservations { needed: usize, got: usize },
    #[error("symbol {0} not present in price data")]
    MissingSymbol(String),
    #[error("series has no variance")]
    DegenerateSeries,
    #[error("initial capital must be positive, got {0}")]
    InvalidCapital(f64),
}

/// Lifecycle of a tracked pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairStatus {
    NoPosition,
    LongSpread,
    ShortSpread,
    CointegrationBroken,
}

impl PairStatus {
    pub fn label(self) -> &'static str {
        match self {
            PairStatus::NoPosition => "NO_POSITION",
            PairStatus::LongSpread => "LONG_SPREAD",
            PairStatus::ShortSpread => "SHORT_SPREAD",
            PairStatus::CointegrationBroken => "COINTEGRATION_BROKEN",
        }
    }

    pub fn has_position(self) -> bool {
        matches!(self, PairStatus::LongSpread | PairStatus::ShortSpread)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    EntryLong,
    EntryShort,
    Exit,
    #[serde(rename = "stop")]
    StopLoss,
}

impl SignalKind {
    pub fn label(self) -> &'static str {
        match self {
            SignalKind::EntryLong => "entry_long",
            SignalKind::EntryShort => "entry_short",
            SignalKind::Exit => "exit",
            SignalKind::StopLoss => "stop",
        }
    }
}

/// Result of a cointegration test on one candidate pair.
#[derive(Debug, Clone, Serialize)]
pub struct CointegrationTest {
    pub symbol_a: String,
    pub symbol_b: String,
    pub p_value: f64,
    pub test_statistic: f64,
    pub critical_value_5pct: f64,
    /// OLS hedge ratio, always positive.
    pub hedge_ratio: f64,
    pub is_cointegrated: bool,
    pub test_type: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of attempting a cointegration test, separating "not enough data"
/// and "test failed" from a completed test.
#[derive(Debug, Clone)]
pub enum CointegrationOutcome {
    Tested(CointegrationTest),
    InsufficientData { rows: usize },
    TestFailed { reason: String },
}

impl CointegrationOutcome {
    /// Materialize a [`CointegrationTest`], substituting a non-cointegrated
    /// placeholder (p = 1.0, hedge = 1.0) when no test completed.
    pub fn into_test(self, symbol_a: &str, symbol_b: &str) -> CointegrationTest {
        match self {
            CointegrationOutcome::Tested(test) => test,
            CointegrationOutcome::InsufficientData { .. }
            | CointegrationOutcome::TestFailed { .. } => CointegrationTest {
                symbol_a: symbol_a.to_string(),
                symbol_b: symbol_b.to_string(),
                p_value: 1.0,
                test_statistic: 0.0,
                critical_value_5pct: stats::ADF_CRIT_5PCT,
                hedge_ratio: 1.0,
                is_cointegrated: false,
                test_type: "adf",
                timestamp: Utc::now(),
            },
        }
    }
}

/// Rolling spread statistics at a point in time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpreadStatistics {
    pub spread: f64,
    pub mean: f64,
    pub std: f64,
    pub z_score: f64,
    pub hedge_ratio: f64,
    pub window: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairSignal {
    pub symbol_a: String,
    pub symbol_b: String,
    pub kind: SignalKind,
    pub z_score: f64,
    pub spread: f64,
    pub hedge_ratio: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// A pair under management with its cointegration evidence and position state.
#[derive(Debug, Clone, Serialize)]
pub struct TradingPair {
    pub symbol_a: String,
    pub symbol_b: String,
    pub cointegration: CointegrationTest,
    status: PairStatus,
    entry_z_score: Option<f64>,
    entry_spread: Option<f64>,
    entry_date: Option<DateTime<Utc>>,
    position_pnl: f64,
    last_update: DateTime<Utc>,
}

impl TradingPair {
    pub fn new(test: CointegrationTest) -> Self {
        Self {
            symbol_a: test.symbol_a.clone(),
            symbol_b: test.symbol_b.clone(),
            status: PairStatus::NoPosition,
            entry_z_score: None,
            entry_spread: None,
            entry_date: None,
            position_pnl: 0.0,
            last_update: Utc::now(),
            cointegration: test,
        }
    }

    pub fn status(&self) -> PairStatus {
        self.status
    }

    pub fn entry_z_score(&self) -> Option<f64> {
        self.entry_z_score
    }

    pub fn entry_spread(&self) -> Option<f64> {
        self.entry_spread
    }

    pub fn hedge_ratio(&self) -> f64 {
        self.cointegration.hedge_ratio
    }

    pub fn entry_date(&self) -> Option<DateTime<Utc>> {
        self.entry_date
    }

    pub fn position_pnl(&self) -> f64 {
        self.position_pnl
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn key(&self) -> (String, String) {
        (self.symbol_a.clone(), self.symbol_b.clone())
    }

    pub fn record_entry(&mut self, status: PairStatus, z_score: f64, spread: f64) {
        self.status = status;
        self.entry_z_score = Some(z_score);
        self.entry_spread = Some(spread);
        self.entry_date = Some(Utc::now());
        self.last_update = Utc::now();
    }

    pub fn clear_entry(&mut self) {
        self.status = PairStatus::NoPosition;
        self.entry_z_score = None;
        self.entry_spread = None;
        self.entry_date = None;
        self.last_update = Utc::now();
    }

    pub fn set_pnl(&mut self, pnl: f64) {
        self.position_pnl = pnl;
        self.last_update = Utc::now();
    }

    pub fn mark_broken(&mut self) {
        self.status = PairStatus::CointegrationBroken;
        self.last_update = Utc::now();
    }
}

/// Statistical arbitrage strategy over cointegrated pairs.
///
/// Screens a universe for cointegration, tracks spread z-scores, and emits
/// prioritized entry/exit/stop signals per pair.
pub struct PairsStrategy {
    cfg: StrategyConfig,
    active_pairs: HashMap<(String, String), TradingPair>,
}

impl PairsStrategy {
    pub fn new(cfg: StrategyConfig) -> Result<Self, crate::config::ConfigError> {
        let cfg = cfg.validated()?;
        info!(
            "PairsStrategy initialized: lookback={}d, window={}, entry_z={:.1}, exit_z={:.1}, stop_z={:.1}",
            cfg.min_lookback_days,
            cfg.z_score_window,
            cfg.entry_z_threshold,
            cfg.exit_z_threshold,
            cfg.stop_z_threshold
        );
        Ok(Self {
            cfg,
            active_pairs: HashMap::new(),
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.cfg
    }

    /// Test all unordered symbol combinations and register cointegrated pairs.
    ///
    /// Pairs that fail to test (too little overlap, degenerate series) are
    /// skipped with a log line rather than failing the screen.
    pub fn screen_for_pairs(
        &mut self,
        universe: &[&str],
        table: &PriceTable,
    ) -> Result<Vec<TradingPair>, StrategyError> {
        if table.len() < self.cfg.min_lookback_days {
            return Err(StrategyError::InsufficientData {
                needed: self.cfg.min_lookback_days,
                got: table.len(),
            });
        }

        let mut found = Vec::new();
        for i in 0..universe.len() {
            for j in (i + 1)..universe.len() {
                let (a, b) = (universe[i], universe[j]);
                match self.cointegration_outcome(a, b, table) {
                    CointegrationOutcome::Tested(test) => {
                        debug!(
                            "{}/{}: p={:.3}, t={:.2}, hedge={:.3}",
                            a, b, test.p_value, test.test_statistic, test.hedge_ratio
                        );
                        if test.is_cointegrated {
                            info!(
                                "Cointegrated pair found: {}/{} (p={:.3}, hedge={:.3})",
                                a, b, test.p_value, test.hedge_ratio
                            );
                            let pair = TradingPair::new(test);
                            self.active_pairs.insert(pair.key(), pair.clone());
                            found.push(pair);
                        }
                    }
                    CointegrationOutcome::InsufficientData { rows } => {
                        debug!("{}/{}: skipped, only {} overlapping rows", a, b, rows);
                    }
                    CointegrationOutcome::TestFailed { reason } => {
                        warn!("{}/{}: cointegration test failed: {}", a, b, reason);
                    }
                }
            }
        }
        info!(
            "Screen complete: {} cointegrated pairs from {} symbols",
            found.len(),
            universe.len()
        );
        Ok(found)
    }

    /// Cointegration attempt that never fails the caller.
    pub fn cointegration_outcome(
        &self,
        symbol_a: &str,
        symbol_b: &str,
        table: &PriceTable,
    ) -> CointegrationOutcome {
        let Some(rows) = table.joined(symbol_a, symbol_b) else {
            return CointegrationOutcome::TestFailed {
                reason: "missing price column".to_string(),
            };
        };
        if rows.len() < self.cfg.min_lookback_days {
            return CointegrationOutcome::InsufficientData { rows: rows.len() };
        }
        match self.run_adf(symbol_a, symbol_b, &rows) {
            Ok(test) => CointegrationOutcome::Tested(test),
            Err(e) => CointegrationOutcome::TestFailed {
                reason: e.to_string(),
            },
        }
    }

    /// Total variant that materializes a placeholder when no test completed.
    pub fn test_cointegration(
        &self,
        symbol_a: &str,
        symbol_b: &str,
        table: &PriceTable,
    ) -> CointegrationTest {
        self.cointegration_outcome(symbol_a, symbol_b, table)
            .into_test(symbol_a, symbol_b)
    }

    fn run_adf(
        &self,
        symbol_a: &str,
        symbol_b: &str,
        rows: &[(f64, f64)],
    ) -> Result<CointegrationTest, StrategyError> {
        let a: Vec<f64> = rows.iter().map(|(x, _)| *x).collect();
        let b: Vec<f64> = rows.iter().map(|(_, y)| *y).collect();
        let hedge_ratio = positive_hedge(stats::ols_beta(&a, &b));
        let spread: Vec<f64> = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| x - hedge_ratio * y)
            .collect();
        let adf = stats::adf_test(&spread)?;
        Ok(CointegrationTest {
            symbol_a: symbol_a.to_string(),
            symbol_b: symbol_b.to_string(),
            p_value: adf.p_value,
            test_statistic: adf.test_statistic,
            critical_value_5pct: adf.critical_value_5pct,
            hedge_ratio,
            is_cointegrated: adf.p_value < self.cfg.adf_p_value_threshold,
            test_type: "adf",
            timestamp: Utc::now(),
        })
    }

    /// Spread statistics for a pair over the full table.
    pub fn calculate_spread_statistics(
        &self,
        pair: &TradingPair,
        table: &PriceTable,
    ) -> Result<SpreadStatistics, StrategyError> {
        self.spread_statistics_at(pair, table, table.len())
    }

    /// Spread statistics using only rows `[0, end)` of the table. The z-score
    /// is computed over the trailing `z_score_window` observations; a flat
    /// window yields z = 0 rather than a division by zero.
    pub(crate) fn spread_statistics_at(
        &self,
        pair: &TradingPair,
        table: &PriceTable,
        end: usize,
    ) -> Result<SpreadStatistics, StrategyError> {
        let col_a = table
            .column(&pair.symbol_a)
            .ok_or_else(|| StrategyError::MissingSymbol(pair.symbol_a.clone()))?;
        let col_b = table
            .column(&pair.symbol_b)
            .ok_or_else(|| StrategyError::MissingSymbol(pair.symbol_b.clone()))?;
        let end = end.min(col_a.len()).min(col_b.len());

        let hedge = pair.cointegration.hedge_ratio;
        let spread: Vec<f64> = col_a[..end]
            .iter()
            .zip(col_b[..end].iter())
            .filter(|(x, y)| !x.is_nan() && !y.is_nan())
            .map(|(x, y)| x - hedge * y)
            .collect();
        if spread.len() < self.cfg.z_score_window {
            return Err(StrategyError::InsufficientObservations {
                needed: self.cfg.z_score_window,
                got: spread.len(),
            });
        }

        let window = &spread[spread.len() - self.cfg.z_score_window..];
        let (mean, std) = stats::mean_std(window).ok_or(StrategyError::DegenerateSeries)?;
        let current = spread[spread.len() - 1];
        let z_score = if std > 1e-9 { (current - mean) / std } else { 0.0 };

        Ok(SpreadStatistics {
            spread: current,
            mean,
            std,
            z_score,
            hedge_ratio: hedge,
            window: self.cfg.z_score_window,
            timestamp: Utc::now(),
        })
    }

    /// Signal for one pair given current prices, or None when nothing fires.
    pub fn generate_signals(
        &self,
        pair: &TradingPair,
        table: &PriceTable,
    ) -> Result<Option<PairSignal>, StrategyError> {
        let stats = self.calculate_spread_statistics(pair, table)?;
        Ok(self.signal_from_stats(pair, &stats))
    }

    /// Priority order: stop loss, then exit, then entry. Entries require a
    /// flat pair; a broken pair can still be stopped or exited but never
    /// re-entered.
    fn signal_from_stats(&self, pair: &TradingPair, stats: &SpreadStatistics) -> Option<PairSignal> {
        let z = stats.z_score;
        let flat = pair.status() == PairStatus::NoPosition;

        let kind = if !flat && z.abs() > self.cfg.stop_z_threshold {
            Some(SignalKind::StopLoss)
        } else if !flat && z.abs() < self.cfg.exit_z_threshold {
            Some(SignalKind::Exit)
        } else if flat && z > self.cfg.entry_z_threshold {
            // spread rich: short A, long B
            Some(SignalKind::EntryShort)
        } else if flat && z < -self.cfg.entry_z_threshold {
            Some(SignalKind::EntryLong)
        } else {
            None
        }?;

        let confidence = self.signal_confidence(kind, z);
        let mut metadata = HashMap::new();
        metadata.insert("spread".to_string(), format!("{:.6}", stats.spread));
        metadata.insert("spread_mean".to_string(), format!("{:.6}", stats.mean));
        metadata.insert("spread_std".to_string(), format!("{:.6}", stats.std));
        metadata.insert("pair_status".to_string(), pair.status().label().to_string());

        Some(PairSignal {
            symbol_a: pair.symbol_a.clone(),
            symbol_b: pair.symbol_b.clone(),
            kind,
            z_score: z,
            spread: stats.spread,
            hedge_ratio: stats.hedge_ratio,
            confidence,
            timestamp: Utc::now(),
            metadata,
        })
    }

    /// Confidence score (0-100) from the z-score magnitude and signal kind.
    fn signal_confidence(&self, kind: SignalKind, z_score: f64) -> f64 {
        let abs_z = z_score.abs();
        match kind {
            SignalKind::EntryLong | SignalKind::EntryShort => {
                if abs_z > 3.0 {
                    95.0
                } else if abs_z > 2.5 {
                    85.0
                } else if abs_z > 2.0 {
                    70.0
                } else {
                    50.0
                }
            }
            SignalKind::Exit => {
                if abs_z < 0.2 {
                    95.0
                } else if abs_z < 0.5 {
                    85.0
                } else {
                    70.0
                }
            }
            SignalKind::StopLoss => 95.0,
        }
    }

    /// Evaluate all tracked pairs, returning signals at or above the
    /// configured confidence floor. Pairs that fail to evaluate are logged
    /// and skipped.
    pub fn monitor_pairs(&self, table: &PriceTable) -> Vec<PairSignal> {
        let mut signals = Vec::new();
        for pair in self.active_pairs.values() {
            match self.generate_signals(pair, table) {
                Ok(Some(signal)) => {
                    if signal.confidence >= self.cfg.min_confidence {
                        signals.push(signal);
                    } else {
                        debug!(
                            "{}/{}: {} suppressed at confidence {:.0}",
                            signal.symbol_a,
                            signal.symbol_b,
                            signal.kind.label(),
                            signal.confidence
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "{}/{}: signal evaluation failed: {}",
                        pair.symbol_a, pair.symbol_b, e
                    );
                }
            }
        }
        signals
    }

    /// Apply a signal to the tracked pair's position state.
    pub fn apply_signal(&mut self, signal: &PairSignal) {
        let key = (signal.symbol_a.clone(), signal.symbol_b.clone());
        let Some(pair) = self.active_pairs.get_mut(&key) else {
            warn!(
                "apply_signal: {}/{} is not tracked",
                signal.symbol_a, signal.symbol_b
            );
            return;
        };
        match signal.kind {
            SignalKind::EntryLong => {
                pair.record_entry(PairStatus::LongSpread, signal.z_score, signal.spread)
            }
            SignalKind::EntryShort => {
                pair.record_entry(PairStatus::ShortSpread, signal.z_score, signal.spread)
            }
            SignalKind::Exit | SignalKind::StopLoss => pair.clear_entry(),
        }
    }

    pub fn active_pairs(&self) -> Vec<TradingPair> {
        self.active_pairs.values().cloned().collect()
    }

    pub fn get_pair(&self, symbol_a: &str, symbol_b: &str) -> Option<TradingPair> {
        self.active_pairs
            .get(&(symbol_a.to_string(), symbol_b.to_string()))
            .cloned()
    }

    pub fn remove_pair(&mut self, symbol_a: &str, symbol_b: &str) -> bool {
        self.active_pairs
            .remove(&(symbol_a.to_string(), symbol_b.to_string()))
            .is_some()
    }
}

/// Fall back to a unit hedge when OLS gives no usable slope.
fn positive_hedge(beta: f64) -> f64 {
    if beta > 0.0 {
        beta
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    // b is a slow ramp with noise; a tracks 1.5*b plus an AR(1) spread, so
    // the pair is cointegrated by construction.
    fn cointegrated_table(n: usize) -> PriceTable {
        let mut rng = StdRng::seed_from_u64(42);
        let mut table = PriceTable::new(dates(n));
        let mut b = Vec::with_capacity(n);
        let mut a = Vec::with_capacity(n);
        let mut level = 100.0;
        let mut spread = 0.0;
        for _ in 0..n {
            level += rng.gen_range(-0.5..0.5);
            spread = 0.2 * spread + rng.gen_range(-1.0..1.0);
            b.push(level);
            a.push(1.5 * level + spread);
        }
        table.insert_column("AAA", a).unwrap();
        table.insert_column("BBB", b).unwrap();
        table
    }

    // a runs away exponentially from a flat b, so the spread is explosive
    // and the ADF test cannot reject a unit root
    fn divergent_table(n: usize) -> PriceTable {
        let mut table = PriceTable::new(dates(n));
        let a: Vec<f64> = (0..n).map(|i| 100.0 + 0.01 * 1.05f64.powi(i as i32)).collect();
        let b: Vec<f64> = vec![100.0; n];
        table.insert_column("AAA", a).unwrap();
        table.insert_column("BBB", b).unwrap();
        table
    }

    fn strategy() -> PairsStrategy {
        PairsStrategy::new(StrategyConfig::default()).unwrap()
    }

    fn tracked_pair(hedge_ratio: f64) -> TradingPair {
        TradingPair::new(CointegrationTest {
            symbol_a: "AAA".to_string(),
            symbol_b: "BBB".to_string(),
            p_value: 0.01,
            test_statistic: -4.0,
            critical_value_5pct: stats::ADF_CRIT_5PCT,
            hedge_ratio,
            is_cointegrated: true,
            test_type: "adf",
            timestamp: Utc::now(),
        })
    }

    fn stats_with_z(z: f64) -> SpreadStatistics {
        SpreadStatistics {
            spread: z,
            mean: 0.0,
            std: 1.0,
            z_score: z,
            hedge_ratio: 1.5,
            window: 20,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn screen_finds_cointegrated_pair() {
        let mut strat = strategy();
        let table = cointegrated_table(120);
        let found = strat
            .screen_for_pairs(&["AAA", "BBB"], &table)
            .unwrap();
        assert_eq!(found.len(), 1);
        let pair = &found[0];
        assert!(pair.cointegration.is_cointegrated);
        assert!(pair.cointegration.p_value <= 0.05);
        assert!((pair.cointegration.hedge_ratio - 1.5).abs() < 0.1);
        assert_eq!(pair.status(), PairStatus::NoPosition);
        assert!(strat.get_pair("AAA", "BBB").is_some());
    }

    #[test]
    fn screen_rejects_divergent_pair() {
        let mut strat = strategy();
        let table = divergent_table(120);
        let found = strat
            .screen_for_pairs(&["AAA", "BBB"], &table)
            .unwrap();
        assert!(found.is_empty());
        assert!(strat.active_pairs().is_empty());
    }

    #[test]
    fn screen_handles_tiny_universes() {
        let mut strat = strategy();
        let table = cointegrated_table(120);
        assert!(strat.screen_for_pairs(&[], &table).unwrap().is_empty());
        assert!(strat.screen_for_pairs(&["AAA"], &table).unwrap().is_empty());
    }

    #[test]
    fn screen_requires_lookback_rows() {
        let mut strat = strategy();
        let table = cointegrated_table(30);
        let err = strat.screen_for_pairs(&["AAA", "BBB"], &table).unwrap_err();
        assert!(matches!(err, StrategyError::InsufficientData { .. }));
    }

    #[test]
    fn outcome_distinguishes_missing_symbol_and_short_overlap() {
        let strat = strategy();
        let table = cointegrated_table(120);
        assert!(matches!(
            strat.cointegration_outcome("AAA", "ZZZ", &table),
            CointegrationOutcome::TestFailed { .. }
        ));

        let short = cointegrated_table(10);
        assert!(matches!(
            strat.cointegration_outcome("AAA", "BBB", &short),
            CointegrationOutcome::InsufficientData { rows: 10 }
        ));
    }

    #[test]
    fn placeholder_test_is_not_cointegrated() {
        let strat = strategy();
        let short = cointegrated_table(10);
        let test = strat.test_cointegration("AAA", "BBB", &short);
        assert!(!test.is_cointegrated);
        assert!((test.p_value - 1.0).abs() < 1e-12);
        assert!((test.hedge_ratio - 1.0).abs() < 1e-12);
        assert_eq!(test.test_type, "adf");
    }

    #[test]
    fn spread_statistics_have_bounded_z_on_stationary_spread() {
        let strat = strategy();
        let table = cointegrated_table(120);
        let pair = tracked_pair(1.5);
        let s = strat.calculate_spread_statistics(&pair, &table).unwrap();
        assert!(s.std > 0.0);
        assert!(s.z_score.abs() < 5.0);
        assert!((s.hedge_ratio - 1.5).abs() < 1e-12);
    }

    #[test]
    fn spread_statistics_need_full_window() {
        let strat = strategy();
        let table = cointegrated_table(10);
        let pair = tracked_pair(1.5);
        let err = strat.calculate_spread_statistics(&pair, &table).unwrap_err();
        assert!(matches!(
            err,
            StrategyError::InsufficientObservations { needed: 20, got: 10 }
        ));
    }

    #[test]
    fn flat_spread_yields_zero_z() {
        let strat = strategy();
        let n = 40;
        let mut table = PriceTable::new(dates(n));
        table.insert_column("AAA", vec![150.0; n]).unwrap();
        table.insert_column("BBB", vec![100.0; n]).unwrap();
        let pair = tracked_pair(1.5);
        let s = strat.calculate_spread_statistics(&pair, &table).unwrap();
        assert_eq!(s.z_score, 0.0);
        assert!(s.std.abs() < 1e-12);
    }

    #[test]
    fn entry_signals_fire_beyond_threshold() {
        let strat = strategy();
        let pair = tracked_pair(1.5);

        let signal = strat.signal_from_stats(&pair, &stats_with_z(2.3)).unwrap();
        assert_eq!(signal.kind, SignalKind::EntryShort);
        assert!((signal.confidence - 70.0).abs() < 1e-12);

        let signal = strat.signal_from_stats(&pair, &stats_with_z(-2.7)).unwrap();
        assert_eq!(signal.kind, SignalKind::EntryLong);
        assert!((signal.confidence - 85.0).abs() < 1e-12);

        assert!(strat.signal_from_stats(&pair, &stats_with_z(1.0)).is_none());
    }

    #[test]
    fn extreme_z_without_position_is_still_an_entry() {
        let strat = strategy();
        let pair = tracked_pair(1.5);
        let signal = strat.signal_from_stats(&pair, &stats_with_z(4.0)).unwrap();
        assert_eq!(signal.kind, SignalKind::EntryShort);
        assert!((signal.confidence - 95.0).abs() < 1e-12);
    }

    #[test]
    fn stop_takes_priority_over_exit_and_entry() {
        let strat = strategy();
        let mut pair = tracked_pair(1.5);
        pair.record_entry(PairStatus::ShortSpread, 2.5, 2.5);

        let signal = strat.signal_from_stats(&pair, &stats_with_z(3.8)).unwrap();
        assert_eq!(signal.kind, SignalKind::StopLoss);
        assert!((signal.confidence - 95.0).abs() < 1e-12);

        let signal = strat.signal_from_stats(&pair, &stats_with_z(0.3)).unwrap();
        assert_eq!(signal.kind, SignalKind::Exit);
        assert!((signal.confidence - 85.0).abs() < 1e-12);

        // in-band z produces nothing while positioned
        assert!(strat.signal_from_stats(&pair, &stats_with_z(1.5)).is_none());
        // and no re-entry while positioned
        assert!(strat.signal_from_stats(&pair, &stats_with_z(2.6)).is_none());
    }

    #[test]
    fn exit_confidence_tiers() {
        let strat = strategy();
        let mut pair = tracked_pair(1.5);
        pair.record_entry(PairStatus::LongSpread, -2.5, -2.5);

        let s = strat.signal_from_stats(&pair, &stats_with_z(0.1)).unwrap();
        assert!((s.confidence - 95.0).abs() < 1e-12);
        let s = strat.signal_from_stats(&pair, &stats_with_z(0.4)).unwrap();
        assert!((s.confidence - 85.0).abs() < 1e-12);
    }

    #[test]
    fn monitor_filters_low_confidence() {
        let cfg = StrategyConfig {
            min_confidence: 80.0,
            ..StrategyConfig::default()
        };
        let mut strat = PairsStrategy::new(cfg).unwrap();
        let table = cointegrated_table(120);
        strat.screen_for_pairs(&["AAA", "BBB"], &table).unwrap();
        for signal in strat.monitor_pairs(&table) {
            assert!(signal.confidence >= 80.0);
        }
    }

    #[test]
    fn apply_signal_round_trip() {
        let mut strat = strategy();
        let table = cointegrated_table(120);
        strat.screen_for_pairs(&["AAA", "BBB"], &table).unwrap();

        let pair = strat.get_pair("AAA", "BBB").unwrap();
        let entry = strat
            .signal_from_stats(&pair, &stats_with_z(-2.4))
            .unwrap();
        strat.apply_signal(&entry);
        let pair = strat.get_pair("AAA", "BBB").unwrap();
        assert_eq!(pair.status(), PairStatus::LongSpread);
        assert_eq!(pair.entry_z_score(), Some(-2.4));
        assert_eq!(pair.entry_spread(), Some(-2.4));
        assert!(pair.entry_date().is_some());

        let exit = strat.signal_from_stats(&pair, &stats_with_z(0.1)).unwrap();
        strat.apply_signal(&exit);
        let pair = strat.get_pair("AAA", "BBB").unwrap();
        assert_eq!(pair.status(), PairStatus::NoPosition);
        assert_eq!(pair.entry_z_score(), None);
    }

    #[test]
    fn mark_broken_stops_position_tracking() {
        let mut pair = tracked_pair(1.5);
        pair.mark_broken();
        assert_eq!(pair.status(), PairStatus::CointegrationBroken);
        assert!(!pair.status().has_position());
    }

    #[test]
    fn broken_pair_never_re_enters() {
        let strat = strategy();
        let mut pair = tracked_pair(1.5);
        pair.mark_broken();

        // stretched z must not open a fresh position on a broken pair
        assert!(strat.signal_from_stats(&pair, &stats_with_z(2.6)).is_none());
        assert!(strat.signal_from_stats(&pair, &stats_with_z(-2.6)).is_none());

        // but stop and exit still fire so a lingering position gets closed
        let signal = strat.signal_from_stats(&pair, &stats_with_z(3.8)).unwrap();
        assert_eq!(signal.kind, SignalKind::StopLoss);
        let signal = strat.signal_from_stats(&pair, &stats_with_z(0.1)).unwrap();
        assert_eq!(signal.kind, SignalKind::Exit);
    }

    #[test]
    fn signal_kind_uses_short_stop_label() {
        assert_eq!(SignalKind::StopLoss.label(), "stop");
        let json = serde_json::to_value(SignalKind::StopLoss).unwrap();
        assert_eq!(json, serde_json::json!("stop"));
        assert_eq!(
            serde_json::to_value(SignalKind::EntryLong).unwrap(),
            serde_json::json!("entry_long")
        );
    }

    #[test]
    fn remove_pair_lifecycle() {
        let mut strat = strategy();
        let table = cointegrated_table(120);
        strat.screen_for_pairs(&["AAA", "BBB"], &table).unwrap();
        assert!(strat.remove_pair("AAA", "BBB"));
        assert!(!strat.remove_pair("AAA", "BBB"));
    }
}
