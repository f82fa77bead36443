use crate::config::StopLossConfig;
use crate::metrics::{self, PositionSide};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported stop loss types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    /// Fixed percentage below (long) or above (short) entry.
    FixedPct,
    /// Distance derived from Average True Range (volatility).
    AtrBased,
    /// Seeded like a fixed stop, then ratchets with price.
    Trailing,
    /// Caller-supplied price, still subject to distance validation.
    Custom,
}

impl StopType {
    pub fn label(self) -> &'static str {
        match self {
            StopType::FixedPct => "fixed_pct",
            StopType::AtrBased => "atr_based",
            StopType::Trailing => "trailing",
            StopType::Custom => "custom",
        }
    }
}

impl fmt::Display for StopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StopType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_pct" => Ok(StopType::FixedPct),
            "atr_based" => Ok(StopType::AtrBased),
            "trailing" => Ok(StopType::Trailing),
            "custom" => Ok(StopType::Custom),
            other => Err(format!("invalid stop type: {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum StopLossError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("entry price must be positive, got {0}")]
    InvalidEntryPrice(f64),
    #[error("position size must be positive, got {0}")]
    InvalidPositionSize(f64),
    #[error("current price must be positive, got {0}")]
    InvalidCurrentPrice(f64),
    #[error("stop price must be positive, got {0}")]
    InvalidStopPrice(f64),
    #[error("account balance must be positive, got {0}")]
    InvalidAccountBalance(f64),
    #[error("ATR value required for ATR-based stops, got {0:?}")]
    MissingAtr(Option<f64>),
    #[error("custom stop type requires a custom stop price")]
    MissingCustomPrice,
    #[error("stop price ({stop:.2}) must be below entry ({entry:.2}) for long positions")]
    StopNotBelowEntry { stop: f64, entry: f64 },
    #[error("stop price ({stop:.2}) must be above entry ({entry:.2}) for short positions")]
    StopNotAboveEntry { stop: f64, entry: f64 },
    #[error("stop too tight: {distance:.4} < min {min:.4}")]
    StopTooTight { distance: f64, min: f64 },
    #[error("stop too wide: {distance:.4} > max {max:.4}")]
    StopTooWide { distance: f64, max: f64 },
    #[error("stop loss exceeds max account risk: {account_risk_pct:.4} > {max_risk:.4}; reduce position size or tighten stop")]
    ExceedsAccountRisk { account_risk_pct: f64, max_risk: f64 },
    #[error("no active stop for {0}")]
    NoActiveStop(String),
}

/// Active stop tracked per symbol, one record per open position.
#[derive(Debug, Clone, Serialize)]
pub struct StopRecord {
    pub stop_price: f64,
    pub entry_price: f64,
    pub side: PositionSide,
    pub stop_type: StopType,
    /// Highest price seen since entry (long tracking).
    pub highest_price: f64,
    /// Lowest price seen since entry (short tracking).
    pub lowest_price: f64,
}

/// Inputs for a stop calculation.
#[derive(Debug, Clone)]
pub struct StopRequest {
    pub symbol: String,
    pub entry_price: f64,
    pub position_size: f64,
    pub side: PositionSide,
    pub stop_type: StopType,
    pub stop_pct: Option<f64>,
    pub atr: Option<f64>,
    pub atr_multiplier: Option<f64>,
    pub custom_stop_price: Option<f64>,
}

impl StopRequest {
    pub fn new(
        symbol: &str,
        entry_price: f64,
        position_size: f64,
        side: PositionSide,
        stop_type: StopType,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_price,
            position_size,
            side,
            stop_type,
            stop_pct: None,
            atr: None,
            atr_multiplier: None,
            custom_stop_price: None,
        }
    }

    pub fn with_stop_pct(mut self, pct: f64) -> Self {
        self.stop_pct = Some(pct);
        self
    }

    pub fn with_atr(mut self, atr: f64) -> Self {
        self.atr = Some(atr);
        self
    }

    pub fn with_atr_multiplier(mut self, multiplier: f64) -> Self {
        self.atr_multiplier = Some(multiplier);
        self
    }

    pub fn with_custom_stop(mut self, price: f64) -> Self {
        self.custom_stop_price = Some(price);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResult {
    pub stop_price: f64,
    pub stop_type: StopType,
    pub risk_amount: f64,
    pub risk_pct: f64,
    pub account_risk_pct: f64,
    pub stop_distance: f64,
    pub shares: u64,
    pub rationale: String,
    pub warnings: Vec<String>,
    pub side: PositionSide,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrailingUpdate {
    pub stop_price: f64,
    pub old_stop_price: f64,
    pub stop_moved: bool,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub profit_locked: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyUpdate {
    pub stop_price: f64,
    pub old_stop_price: f64,
    pub violated_never_downgrade: bool,
    pub reason: String,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub total_positions: usize,
    pub positions_with_stops: usize,
    pub coverage_pct: f64,
    pub missing_stops: Vec<String>,
    pub has_100pct_coverage: bool,
}

/// Calculates and manages stop losses for all positions.
///
/// Every calculation either returns a valid, risk-bounded stop or fails, so an
/// unprotected trade can never be registered. Once registered, a stop only
/// moves in the position's favor unless the emergency path is invoked.
pub struct StopLossManager {
    cfg: StopLossConfig,
    active_stops: HashMap<String, StopRecord>,
}

impl StopLossManager {
    pub fn new(cfg: StopLossConfig) -> Result<Self, crate::config::ConfigError> {
        let cfg = cfg.validated()?;
        info!(
            "StopLossManager initialized: balance=${:.2}, max_risk={:.1}%, default_stop={:.1}%",
            cfg.account_balance,
            cfg.max_risk_per_trade * 100.0,
            cfg.default_stop_pct * 100.0
        );
        Ok(Self {
            cfg,
            active_stops: HashMap::new(),
        })
    }

    pub fn account_balance(&self) -> f64 {
        self.cfg.account_balance
    }

    /// Calculate a stop for a new (or re-entered) position and register it.
    ///
    /// Re-entry on a symbol replaces the prior record; this is the one path
    /// that bypasses never-downgrade, since it represents a fresh position.
    pub fn calculate_stop_loss(&mut self, req: &StopRequest) -> Result<StopResult, StopLossError> {
        validate_inputs(req)?;

        let (stop_price, stop_type_used, rationale) = if let Some(custom) = req.custom_stop_price {
            (
                custom,
                StopType::Custom,
                "Custom stop price provided".to_string(),
            )
        } else {
            match req.stop_type {
                StopType::FixedPct => {
                    let pct = req.stop_pct.unwrap_or(self.cfg.default_stop_pct);
                    (
                        fixed_pct_stop(req.entry_price, req.side, pct),
                        StopType::FixedPct,
                        format!("Fixed {:.1}% stop", pct * 100.0),
                    )
                }
                StopType::AtrBased => {
                    let atr = req
                        .atr
                        .filter(|a| *a > 0.0)
                        .ok_or(StopLossError::MissingAtr(req.atr))?;
                    let multiplier = req
                        .atr_multiplier
                        .unwrap_or(self.cfg.default_atr_multiplier);
                    (
                        atr_based_stop(req.entry_price, req.side, atr, multiplier),
                        StopType::AtrBased,
                        format!("ATR-based stop ({:.1}x ATR)", multiplier),
                    )
                }
                StopType::Trailing => {
                    let pct = req.stop_pct.unwrap_or(self.cfg.default_trailing_pct);
                    (
                        fixed_pct_stop(req.entry_price, req.side, pct),
                        StopType::Trailing,
                        format!("Trailing stop initialized ({:.1}% trail)", pct * 100.0),
                    )
                }
                StopType::Custom => return Err(StopLossError::MissingCustomPrice),
            }
        };

        self.validate_stop_distance(req.entry_price, stop_price, req.side)?;

        let m = metrics::risk_metrics(
            req.entry_price,
            stop_price,
            req.position_size,
            req.side,
            self.cfg.account_balance,
        );
        if m.account_risk_pct > self.cfg.max_risk_per_trade {
            return Err(StopLossError::ExceedsAccountRisk {
                account_risk_pct: m.account_risk_pct,
                max_risk: self.cfg.max_risk_per_trade,
            });
        }

        let mut warnings = Vec::new();
        if m.account_risk_pct > self.cfg.max_risk_per_trade * 0.8 {
            warnings.push(format!(
                "High account risk: {:.2}% (near max {:.2}%)",
                m.account_risk_pct * 100.0,
                self.cfg.max_risk_per_trade * 100.0
            ));
        }

        let shares = (req.position_size / req.entry_price) as u64;

        self.active_stops.insert(
            req.symbol.clone(),
            StopRecord {
                stop_price,
                entry_price: req.entry_price,
                side: req.side,
                stop_type: stop_type_used,
                highest_price: req.entry_price,
                lowest_price: req.entry_price,
            },
        );

        Ok(StopResult {
            stop_price,
            stop_type: stop_type_used,
            risk_amount: m.risk_amount,
            risk_pct: m.risk_pct,
            account_risk_pct: m.account_risk_pct,
            stop_distance: m.stop_distance,
            shares,
            rationale,
            warnings,
            side: req.side,
        })
    }

    /// Advance a trailing stop with a new price observation.
    ///
    /// The stop ratchets in the favorable direction only; an adverse candidate
    /// leaves the record unchanged unless `force_update` is set.
    pub fn update_trailing_stop(
        &mut self,
        symbol: &str,
        current_price: f64,
        trailing_pct: Option<f64>,
        force_update: bool,
    ) -> Result<TrailingUpdate, StopLossError> {
        if current_price <= 0.0 {
            return Err(StopLossError::InvalidCurrentPrice(current_price));
        }
        let trail_pct = trailing_pct.unwrap_or(self.cfg.default_trailing_pct);
        let record = self
            .active_stops
            .get_mut(symbol)
            .ok_or_else(|| StopLossError::NoActiveStop(symbol.to_string()))?;

        let old_stop = record.stop_price;
        let (new_stop, stop_moved, rationale) = match record.side {
            PositionSide::Long => {
                let highest = record.highest_price.max(current_price);
                record.highest_price = highest;
                let candidate = highest * (1.0 - trail_pct);
                if candidate > old_stop || force_update {
                    record.stop_price = candidate;
                    (
                        candidate,
                        true,
                        format!(
                            "Trailing stop raised to {:.2} (trailing {:.1}% from high ${:.2})",
                            candidate,
                            trail_pct * 100.0,
                            highest
                        ),
                    )
                } else {
                    (
                        old_stop,
                        false,
                        "Trailing stop unchanged (never-downgrade rule)".to_string(),
                    )
                }
            }
            PositionSide::Short => {
                let lowest = record.lowest_price.min(current_price);
                record.lowest_price = lowest;
                let candidate = lowest * (1.0 + trail_pct);
                if candidate < old_stop || force_update {
                    record.stop_price = candidate;
                    (
                        candidate,
                        true,
                        format!(
                            "Trailing stop lowered to {:.2} (trailing {:.1}% from low ${:.2})",
                            candidate,
                            trail_pct * 100.0,
                            lowest
                        ),
                    )
                } else {
                    (
                        old_stop,
                        false,
                        "Trailing stop unchanged (never-downgrade rule)".to_string(),
                    )
                }
            }
        };

        let profit_locked = match record.side {
            PositionSide::Long => (new_stop - record.entry_price).max(0.0),
            PositionSide::Short => (record.entry_price - new_stop).max(0.0),
        };

        Ok(TrailingUpdate {
            stop_price: new_stop,
            old_stop_price: old_stop,
            stop_moved,
            highest_price: record.highest_price,
            lowest_price: record.lowest_price,
            profit_locked,
            rationale,
        })
    }

    /// Pure check of the never-downgrade rule; no mutation.
    ///
    /// Returns true when the symbol has no active record (nothing to
    /// downgrade). For longs the new stop must not move down, for shorts it
    /// must not move up.
    pub fn validate_stop_never_downgrades(
        &self,
        symbol: &str,
        new_stop: f64,
    ) -> Result<bool, StopLossError> {
        let Some(record) = self.active_stops.get(symbol) else {
            return Ok(true);
        };
        if new_stop <= 0.0 {
            return Err(StopLossError::InvalidStopPrice(new_stop));
        }
        let is_valid = match record.side {
            PositionSide::Long => new_stop >= record.stop_price,
            PositionSide::Short => new_stop <= record.stop_price,
        };
        if !is_valid {
            warn!(
                "NEVER-DOWNGRADE VIOLATION: {} {} stop would move from ${:.2} to ${:.2}",
                symbol,
                record.side.label(),
                record.stop_price,
                new_stop
            );
        }
        Ok(is_valid)
    }

    /// Emergency stop update (e.g. market crash). Bypasses never-downgrade.
    ///
    /// Never fails solely because the move downgrades; the violation is
    /// evaluated first and reported so the caller can audit it.
    pub fn emergency_stop_update(
        &mut self,
        symbol: &str,
        emergency_stop_price: f64,
        reason: &str,
    ) -> Result<EmergencyUpdate, StopLossError> {
        if !self.active_stops.contains_key(symbol) {
            return Err(StopLossError::NoActiveStop(symbol.to_string()));
        }
        if emergency_stop_price <= 0.0 {
            return Err(StopLossError::InvalidStopPrice(emergency_stop_price));
        }

        let violated = !self.validate_stop_never_downgrades(symbol, emergency_stop_price)?;
        let record = self
            .active_stops
            .get_mut(symbol)
            .ok_or_else(|| StopLossError::NoActiveStop(symbol.to_string()))?;
        let old_stop = record.stop_price;
        record.stop_price = emergency_stop_price;

        let warning = if violated {
            warn!(
                "EMERGENCY STOP UPDATE: {} stop moved from ${:.2} to ${:.2} - VIOLATED \
                 NEVER-DOWNGRADE RULE. Reason: {}",
                symbol, old_stop, emergency_stop_price, reason
            );
            Some("Emergency stop violated never-downgrade rule".to_string())
        } else {
            info!(
                "Emergency stop update: {} stop moved from ${:.2} to ${:.2}. Reason: {}",
                symbol, old_stop, emergency_stop_price, reason
            );
            None
        };

        Ok(EmergencyUpdate {
            stop_price: emergency_stop_price,
            old_stop_price: old_stop,
            violated_never_downgrade: violated,
            reason: reason.to_string(),
            warning,
        })
    }

    pub fn get_active_stop(&self, symbol: &str) -> Option<StopRecord> {
        self.active_stops.get(symbol).cloned()
    }

    /// Remove the stop for a closed position. Returns false when none existed.
    pub fn remove_stop(&mut self, symbol: &str) -> bool {
        if self.active_stops.remove(symbol).is_some() {
            info!("Stop removed for {}", symbol);
            true
        } else {
            false
        }
    }

    /// Snapshot of all active stops (defensive copy).
    pub fn get_all_stops(&self) -> HashMap<String, StopRecord> {
        self.active_stops.clone()
    }

    /// Check that every open position has a registered stop.
    pub fn validate_100pct_coverage(&self, symbols: &[&str]) -> CoverageReport {
        let total = symbols.len();
        let covered = symbols
            .iter()
            .filter(|s| self.active_stops.contains_key(**s))
            .count();
        let missing_stops: Vec<String> = symbols
            .iter()
            .filter(|s| !self.active_stops.contains_key(**s))
            .map(|s| s.to_string())
            .collect();
        let coverage_pct = if total > 0 {
            covered as f64 / total as f64
        } else {
            1.0
        };
        let has_100pct_coverage = coverage_pct == 1.0;
        if !has_100pct_coverage {
            error!(
                "STOP COVERAGE VIOLATION: {} positions without stops: {:?}",
                missing_stops.len(),
                missing_stops
            );
        }
        CoverageReport {
            total_positions: total,
            positions_with_stops: covered,
            coverage_pct,
            missing_stops,
            has_100pct_coverage,
        }
    }

    pub fn update_account_balance(&mut self, new_balance: f64) -> Result<(), StopLossError> {
        if new_balance <= 0.0 {
            return Err(StopLossError::InvalidAccountBalance(new_balance));
        }
        let old_balance = self.cfg.account_balance;
        self.cfg.account_balance = new_balance;
        info!(
            "Account balance updated: ${:.2} -> ${:.2}",
            old_balance, new_balance
        );
        Ok(())
    }

    fn validate_stop_distance(
        &self,
        entry_price: f64,
        stop_price: f64,
        side: PositionSide,
    ) -> Result<(), StopLossError> {
        if stop_price <= 0.0 {
            return Err(StopLossError::InvalidStopPrice(stop_price));
        }
        match side {
            PositionSide::Long if stop_price >= entry_price => {
                return Err(StopLossError::StopNotBelowEntry {
                    stop: stop_price,
                    entry: entry_price,
                });
            }
            PositionSide::Short if stop_price <= entry_price => {
                return Err(StopLossError::StopNotAboveEntry {
                    stop: stop_price,
                    entry: entry_price,
                });
            }
            _ => {}
        }
        let distance = metrics::stop_distance(entry_price, stop_price, side);
        if distance < self.cfg.min_stop_distance {
            return Err(StopLossError::StopTooTight {
                distance,
                min: self.cfg.min_stop_distance,
            });
        }
        if distance > self.cfg.max_stop_distance {
            return Err(StopLossError::StopTooWide {
                distance,
                max: self.cfg.max_stop_distance,
            });
        }
        Ok(())
    }
}

fn fixed_pct_stop(entry_price: f64, side: PositionSide, stop_pct: f64) -> f64 {
    match side {
        PositionSide::Long => entry_price * (1.0 - stop_pct),
        PositionSide::Short => entry_price * (1.0 + stop_pct),
    }
}

fn atr_based_stop(entry_price: f64, side: PositionSide, atr: f64, atr_multiplier: f64) -> f64 {
    let stop_distance = atr * atr_multiplier;
    match side {
        PositionSide::Long => entry_price - stop_distance,
        PositionSide::Short => entry_price + stop_distance,
    }
}

fn validate_inputs(req: &StopRequest) -> Result<(), StopLossError> {
    if req.symbol.trim().is_empty() {
        return Err(StopLossError::EmptySymbol);
    }
    if req.entry_price <= 0.0 {
        return Err(StopLossError::InvalidEntryPrice(req.entry_price));
    }
    if req.position_size <= 0.0 {
        return Err(StopLossError::InvalidPositionSize(req.position_size));
    }
    Ok(())
}
