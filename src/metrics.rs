use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of the protected position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn label(self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            other => Err(format!(
                "invalid position side: {}. Must be 'long' or 'short'",
                other
            )),
        }
    }
}

/// Dollar and percentage risk implied by an entry/stop combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskMetrics {
    pub risk_amount: f64,
    pub risk_pct: f64,
    pub account_risk_pct: f64,
    pub stop_distance: f64,
}

/// Adverse per-share move from entry to stop. Positive for a protective stop.
pub fn price_risk(entry_price: f64, stop_price: f64, side: PositionSide) -> f64 {
    match side {
        PositionSide::Long => entry_price - stop_price,
        PositionSide::Short => stop_price - entry_price,
    }
}

/// Stop distance as a fraction of the entry price.
pub fn stop_distance(entry_price: f64, stop_price: f64, side: PositionSide) -> f64 {
    price_risk(entry_price, stop_price, side) / entry_price
}

pub fn risk_metrics(
    entry_price: f64,
    stop_price: f64,
    position_size: f64,
    side: PositionSide,
    account_balance: f64,
) -> RiskMetrics {
    let per_share = price_risk(entry_price, stop_price, side);
    let shares = position_size / entry_price;
    let risk_amount = shares * per_share;
    RiskMetrics {
        risk_amount,
        risk_pct: risk_amount / position_size,
        account_risk_pct: risk_amount / account_balance,
        stop_distance: per_share / entry_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_metrics_match_worked_example() {
        // entry 150, stop 147, size 10_000, balance 100_000
        let m = risk_metrics(150.0, 147.0, 10_000.0, PositionSide::Long, 100_000.0);
        assert!((m.risk_amount - 200.0).abs() < 1.0);
        assert!((m.risk_pct - 0.02).abs() < 1e-9);
        assert!((m.account_risk_pct - 0.002).abs() < 1e-9);
        assert!((m.stop_distance - 0.02).abs() < 1e-9);
    }

    #[test]
    fn short_metrics_mirror_long() {
        let m = risk_metrics(100.0, 102.0, 10_000.0, PositionSide::Short, 50_000.0);
        assert!((m.stop_distance - 0.02).abs() < 1e-9);
        assert!((m.risk_amount - 200.0).abs() < 1e-9);
        assert!((m.account_risk_pct - 0.004).abs() < 1e-9);
    }

    #[test]
    fn price_risk_negative_when_stop_unprotective() {
        assert!(price_risk(100.0, 105.0, PositionSide::Long) < 0.0);
        assert!(price_risk(100.0, 95.0, PositionSide::Short) < 0.0);
    }

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!("LONG".parse::<PositionSide>().unwrap(), PositionSide::Long);
        assert_eq!("short".parse::<PositionSide>().unwrap(), PositionSide::Short);
        assert!("sideways".parse::<PositionSide>().is_err());
    }
}
