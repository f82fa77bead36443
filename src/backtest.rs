use crate::market::PriceTable;
use crate::pairs::{PairsStrategy, StrategyError, TradingPair};
use chrono::NaiveDate;
use log::{debug, info};
use serde::Serialize;

/// Direction of an open spread position in the backtester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionDirection {
    /// Long A, short hedge_ratio units of B.
    LongSpread,
    /// Short A, long hedge_ratio units of B.
    ShortSpread,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub direction: PositionDirection,
    pub entry_date: NaiveDate,
    pub entry_z: f64,
    pub entry_price_a: f64,
    pub entry_price_b: f64,
    pub exit_date: Option<NaiveDate>,
    pub exit_z: Option<f64>,
    pub pnl: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub pair: String,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub return_pct: f64,
    pub final_capital: f64,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Realized PnL of one unit of spread held from entry to exit.
fn spread_pnl(
    direction: PositionDirection,
    hedge_ratio: f64,
    entry_a: f64,
    entry_b: f64,
    exit_a: f64,
    exit_b: f64,
) -> f64 {
    let long_leg = (exit_a - entry_a) - hedge_ratio * (exit_b - entry_b);
    match direction {
        PositionDirection::LongSpread => long_leg,
        PositionDirection::ShortSpread => -long_leg,
    }
}

impl PairsStrategy {
    /// Single-pass historical simulation of the signal rules on one pair.
    ///
    /// Walks the table bar by bar re-deriving the rolling z-score from data up
    /// to that bar only, so no future observation leaks into a decision. A
    /// position still open at the end of the data stays unrealized and is not
    /// counted as a trade.
    pub fn backtest_pair(
        &self,
        pair: &TradingPair,
        table: &PriceTable,
        initial_capital: f64,
    ) -> Result<BacktestResult, StrategyError> {
        if initial_capital <= 0.0 {
            return Err(StrategyError::InvalidCapital(initial_capital));
        }
        let col_a = table
            .column(&pair.symbol_a)
            .ok_or_else(|| StrategyError::MissingSymbol(pair.symbol_a.clone()))?;
        let col_b = table
            .column(&pair.symbol_b)
            .ok_or_else(|| StrategyError::MissingSymbol(pair.symbol_b.clone()))?;
        let window = self.config().z_score_window;
        if table.len() <= window {
            // not enough warm-up data for a single bar: zero-trade result
            debug!(
                "{}/{}: only {} rows for window {}, no bars to simulate",
                pair.symbol_a,
                pair.symbol_b,
                table.len(),
                window
            );
            return Ok(BacktestResult {
                pair: format!("{}/{}", pair.symbol_a, pair.symbol_b),
                total_trades: 0,
                winning_trades: 0,
                losing_trades: 0,
                win_rate: 0.0,
                total_pnl: 0.0,
                return_pct: 0.0,
                final_capital: initial_capital,
                trades: Vec::new(),
                equity_curve: Vec::new(),
            });
        }

        let cfg = self.config();
        let index = table.index();
        let mut capital = initial_capital;
        let mut open: Option<TradeRecord> = None;
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(table.len() - window);

        for i in window..table.len() {
            let (price_a, price_b) = (col_a[i], col_b[i]);
            if price_a.is_nan() || price_b.is_nan() {
                continue;
            }
            let stats = match self.spread_statistics_at(pair, table, i + 1) {
                Ok(s) => s,
                Err(StrategyError::InsufficientObservations { .. }) => continue,
                Err(e) => return Err(e),
            };
            let z = stats.z_score;

            match open.take() {
                Some(mut trade) => {
                    if z.abs() > cfg.stop_z_threshold || z.abs() < cfg.exit_z_threshold {
                        let pnl = spread_pnl(
                            trade.direction,
                            pair.cointegration.hedge_ratio,
                            trade.entry_price_a,
                            trade.entry_price_b,
                            price_a,
                            price_b,
                        );
                        capital += pnl;
                        trade.exit_date = Some(index[i]);
                        trade.exit_z = Some(z);
                        trade.pnl = Some(pnl);
                        debug!(
                            "{}/{}: closed {:?} at z={:.2}, pnl={:.2}",
                            pair.symbol_a, pair.symbol_b, trade.direction, z, pnl
                        );
                        trades.push(trade);
                    } else {
                        open = Some(trade);
                    }
                }
                None => {
                    let direction = if z > cfg.entry_z_threshold {
                        Some(PositionDirection::ShortSpread)
                    } else if z < -cfg.entry_z_threshold {
                        Some(PositionDirection::LongSpread)
                    } else {
                        None
                    };
                    if let Some(direction) = direction {
                        open = Some(TradeRecord {
                            direction,
                            entry_date: index[i],
                            entry_z: z,
                            entry_price_a: price_a,
                            entry_price_b: price_b,
                            exit_date: None,
                            exit_z: None,
                            pnl: None,
                        });
                    }
                }
            }

            equity_curve.push(EquityPoint {
                date: index[i],
                equity: capital,
            });
        }

        let total_trades = trades.len();
        let winning_trades = trades
            .iter()
            .filter(|t| t.pnl.unwrap_or(0.0) > 0.0)
            .count();
        let losing_trades = total_trades - winning_trades;
        let total_pnl = capital - initial_capital;
        let result = BacktestResult {
            pair: format!("{}/{}", pair.symbol_a, pair.symbol_b),
            total_trades,
            winning_trades,
            losing_trades,
            win_rate: if total_trades > 0 {
                winning_trades as f64 / total_trades as f64
            } else {
                0.0
            },
            total_pnl,
            return_pct: total_pnl / initial_capital * 100.0,
            final_capital: capital,
            trades,
            equity_curve,
        };
        info!(
            "Backtest {}: {} trades, win rate {:.0}%, return {:.2}%",
            result.pair,
            result.total_trades,
            result.win_rate * 100.0,
            result.return_pct
        );
        Ok(result)
    }

    /// Backtest a set of candidate pairs and rank them by return. Pairs whose
    /// backtest fails are dropped with a log line.
    pub fn validate_pairs(
        &self,
        pairs: &[TradingPair],
        table: &PriceTable,
        initial_capital: f64,
    ) -> Vec<BacktestResult> {
        let mut results: Vec<BacktestResult> = pairs
            .iter()
            .filter_map(|pair| match self.backtest_pair(pair, table, initial_capital) {
                Ok(result) => Some(result),
                Err(e) => {
                    log::warn!(
                        "{}/{}: backtest failed: {}",
                        pair.symbol_a,
                        pair.symbol_b,
                        e
                    );
                    None
                }
            })
            .collect();
        results.sort_by(|x, y| y.return_pct.total_cmp(&x.return_pct));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::pairs::CointegrationTest;
    use crate::stats;
    use chrono::{NaiveDate, Utc};

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    fn pair(a: &str, b: &str, hedge_ratio: f64) -> TradingPair {
        TradingPair::new(CointegrationTest {
            symbol_a: a.to_string(),
            symbol_b: b.to_string(),
            p_value: 0.01,
            test_statistic: -4.0,
            critical_value_5pct: stats::ADF_CRIT_5PCT,
            hedge_ratio,
            is_cointegrated: true,
            test_type: "adf",
            timestamp: Utc::now(),
        })
    }

    fn strategy() -> PairsStrategy {
        let cfg = StrategyConfig {
            z_score_window: 10,
            ..StrategyConfig::default()
        };
        PairsStrategy::new(cfg).unwrap()
    }

    // b flat at 100, a flat at 100 except one dip and recovery; hedge 1 so
    // the spread equals a - 100 and the dip drives z negative
    fn dip_table() -> PriceTable {
        let mut a = vec![100.0; 30];
        // alternate small wobble so the rolling std never collapses to zero
        for (i, v) in a.iter_mut().enumerate() {
            if i % 2 == 1 {
                *v += 0.1;
            }
        }
        a[14] = 94.0; // deep dip: entry long
        let mut table = PriceTable::new(dates(30));
        table.insert_column("AAA", a).unwrap();
        table.insert_column("BBB", vec![100.0; 30]).unwrap();
        table
    }

    #[test]
    fn spread_pnl_signs() {
        let pnl = spread_pnl(PositionDirection::LongSpread, 1.5, 100.0, 50.0, 104.0, 51.0);
        // (104-100) - 1.5*(51-50) = 2.5
        assert!((pnl - 2.5).abs() < 1e-12);
        let pnl = spread_pnl(PositionDirection::ShortSpread, 1.5, 100.0, 50.0, 104.0, 51.0);
        assert!((pnl + 2.5).abs() < 1e-12);
    }

    #[test]
    fn backtest_enters_and_exits_on_dip() {
        let strat = strategy();
        let table = dip_table();
        let result = strat
            .backtest_pair(&pair("AAA", "BBB", 1.0), &table, 100_000.0)
            .unwrap();

        assert_eq!(result.total_trades, 1);
        let trade = &result.trades[0];
        assert_eq!(trade.direction, PositionDirection::LongSpread);
        assert!((trade.entry_price_a - 94.0).abs() < 1e-9);
        assert!(trade.entry_z < -2.0);
        let pnl = trade.pnl.unwrap();
        // bought the dip at 94, exited on recovery near 100
        assert!(pnl > 5.0);
        assert!((result.total_pnl - pnl).abs() < 1e-9);
        assert_eq!(result.winning_trades, 1);
        assert_eq!(result.losing_trades, 0);
        assert!((result.win_rate - 1.0).abs() < 1e-12);
        assert!((result.final_capital - (100_000.0 + pnl)).abs() < 1e-9);
        assert!((result.return_pct - pnl / 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn backtest_flat_market_trades_nothing() {
        let strat = strategy();
        let mut table = PriceTable::new(dates(30));
        table.insert_column("AAA", vec![100.0; 30]).unwrap();
        table.insert_column("BBB", vec![100.0; 30]).unwrap();
        let result = strat
            .backtest_pair(&pair("AAA", "BBB", 1.0), &table, 50_000.0)
            .unwrap();
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.win_rate, 0.0);
        assert!((result.final_capital - 50_000.0).abs() < 1e-9);
        assert_eq!(result.equity_curve.len(), 20);
    }

    #[test]
    fn backtest_validates_inputs() {
        let strat = strategy();
        let table = dip_table();
        assert!(matches!(
            strat.backtest_pair(&pair("AAA", "BBB", 1.0), &table, 0.0),
            Err(StrategyError::InvalidCapital(_))
        ));
        assert!(matches!(
            strat.backtest_pair(&pair("AAA", "ZZZ", 1.0), &table, 1_000.0),
            Err(StrategyError::MissingSymbol(_))
        ));
    }

    #[test]
    fn backtest_short_table_is_a_zero_trade_run() {
        let strat = strategy();
        let mut short = PriceTable::new(dates(3));
        short.insert_column("AAA", vec![1.0; 3]).unwrap();
        short.insert_column("BBB", vec![1.0; 3]).unwrap();

        let result = strat
            .backtest_pair(&pair("AAA", "BBB", 1.0), &short, 1_000.0)
            .unwrap();
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.return_pct, 0.0);
        assert!((result.final_capital - 1_000.0).abs() < 1e-9);
        assert!(result.trades.is_empty());
        assert!(result.equity_curve.is_empty());

        // and validate_pairs ranks it at 0% instead of dropping it
        let results = strat.validate_pairs(&[pair("AAA", "BBB", 1.0)], &short, 1_000.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].return_pct, 0.0);
    }

    #[test]
    fn validate_pairs_ranks_by_return_and_drops_failures() {
        let strat = strategy();
        let table = dip_table();
        let good = pair("AAA", "BBB", 1.0);
        let missing = pair("AAA", "ZZZ", 1.0);
        let results = strat.validate_pairs(&[missing, good.clone(), good], &table, 100_000.0);
        assert_eq!(results.len(), 2);
        assert!(results[0].return_pct >= results[1].return_pct);
        assert!(results.iter().all(|r| r.pair == "AAA/BBB"));
    }
}
