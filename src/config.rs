use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MAX_RISK_PER_TRADE: f64 = 0.02;
pub const DEFAULT_STOP_PCT: f64 = 0.02;
pub const DEFAULT_ATR_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_TRAILING_PCT: f64 = 0.05;
pub const DEFAULT_MIN_STOP_DISTANCE: f64 = 0.005;
pub const DEFAULT_MAX_STOP_DISTANCE: f64 = 0.10;

pub const DEFAULT_ADF_P_VALUE_THRESHOLD: f64 = 0.05;
pub const DEFAULT_MIN_LOOKBACK_DAYS: usize = 60;
pub const DEFAULT_Z_SCORE_WINDOW: usize = 20;
pub const DEFAULT_ENTRY_Z_THRESHOLD: f64 = 2.0;
pub const DEFAULT_EXIT_Z_THRESHOLD: f64 = 0.5;
pub const DEFAULT_STOP_Z_THRESHOLD: f64 = 3.5;
pub const DEFAULT_MAX_HOLDING_DAYS: usize = 30;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 60.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("account balance must be positive, got {0}")]
    InvalidAccountBalance(f64),
    #[error("max_risk_per_trade must be between 0 and 0.10, got {0}")]
    InvalidMaxRisk(f64),
    #[error("default_stop_pct must be between 0 and 1, got {0}")]
    InvalidDefaultStopPct(f64),
    #[error("default_atr_multiplier must be positive, got {0}")]
    InvalidAtrMultiplier(f64),
    #[error("default_trailing_pct must be between 0 and 1, got {0}")]
    InvalidTrailingPct(f64),
    #[error("invalid stop distance range: min={min}, max={max}")]
    InvalidStopDistanceRange { min: f64, max: f64 },
    #[error("{name} must be positive, got {value}")]
    NonPositiveThreshold { name: &'static str, value: f64 },
    #[error("z thresholds must satisfy exit < entry < stop, got exit={exit}, entry={entry}, stop={stop}")]
    UnorderedZThresholds { exit: f64, entry: f64, stop: f64 },
    #[error("z_score_window must be at least 2, got {0}")]
    WindowTooSmall(usize),
    #[error("min_lookback_days must be positive, got {0}")]
    InvalidLookback(usize),
    #[error("min_confidence must be between 0 and 100, got {0}")]
    InvalidMinConfidence(f64),
}

/// Risk parameters for the stop-loss manager. Only a validated value can be
/// handed to [`crate::stop_loss::StopLossManager`].
#[derive(Debug, Clone)]
pub struct StopLossConfig {
    pub account_balance: f64,
    pub max_risk_per_trade: f64,
    pub default_stop_pct: f64,
    pub default_atr_multiplier: f64,
    pub default_trailing_pct: f64,
    pub min_stop_distance: f64,
    pub max_stop_distance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct StopLossYaml {
    account_balance: f64,
    max_risk_per_trade: Option<f64>,
    default_stop_pct: Option<f64>,
    default_atr_multiplier: Option<f64>,
    default_trailing_pct: Option<f64>,
    min_stop_distance: Option<f64>,
    max_stop_distance: Option<f64>,
}

impl StopLossConfig {
    pub fn new(account_balance: f64) -> Result<Self, ConfigError> {
        Self {
            account_balance,
            max_risk_per_trade: DEFAULT_MAX_RISK_PER_TRADE,
            default_stop_pct: DEFAULT_STOP_PCT,
            default_atr_multiplier: DEFAULT_ATR_MULTIPLIER,
            default_trailing_pct: DEFAULT_TRAILING_PCT,
            min_stop_distance: DEFAULT_MIN_STOP_DISTANCE,
            max_stop_distance: DEFAULT_MAX_STOP_DISTANCE,
        }
        .validated()
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.account_balance <= 0.0 {
            return Err(ConfigError::InvalidAccountBalance(self.account_balance));
        }
        if !(self.max_risk_per_trade > 0.0 && self.max_risk_per_trade <= 0.10) {
            return Err(ConfigError::InvalidMaxRisk(self.max_risk_per_trade));
        }
        if !(self.default_stop_pct > 0.0 && self.default_stop_pct <= 1.0) {
            return Err(ConfigError::InvalidDefaultStopPct(self.default_stop_pct));
        }
        if self.default_atr_multiplier <= 0.0 {
            return Err(ConfigError::InvalidAtrMultiplier(self.default_atr_multiplier));
        }
        if !(self.default_trailing_pct > 0.0 && self.default_trailing_pct <= 1.0) {
            return Err(ConfigError::InvalidTrailingPct(self.default_trailing_pct));
        }
        if !(self.min_stop_distance > 0.0
            && self.min_stop_distance < self.max_stop_distance
            && self.max_stop_distance <= 1.0)
        {
            return Err(ConfigError::InvalidStopDistanceRange {
                min: self.min_stop_distance,
                max: self.max_stop_distance,
            });
        }
        Ok(self)
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open stop-loss config {}", path_ref.display()))?;
        let yaml: StopLossYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse stop-loss config {}", path_ref.display()))?;
        let cfg = Self {
            account_balance: yaml.account_balance,
            max_risk_per_trade: yaml.max_risk_per_trade.unwrap_or(DEFAULT_MAX_RISK_PER_TRADE),
            default_stop_pct: yaml.default_stop_pct.unwrap_or(DEFAULT_STOP_PCT),
            default_atr_multiplier: yaml
                .default_atr_multiplier
                .unwrap_or(DEFAULT_ATR_MULTIPLIER),
            default_trailing_pct: yaml.default_trailing_pct.unwrap_or(DEFAULT_TRAILING_PCT),
            min_stop_distance: yaml.min_stop_distance.unwrap_or(DEFAULT_MIN_STOP_DISTANCE),
            max_stop_distance: yaml.max_stop_distance.unwrap_or(DEFAULT_MAX_STOP_DISTANCE),
        };
        Ok(cfg.validated()?)
    }

    /// Environment overrides on top of the defaults, for deployments where no
    /// YAML file is mounted.
    pub fn from_env(account_balance: f64) -> Result<Self, ConfigError> {
        Self {
            account_balance: env_f64("ACCOUNT_BALANCE").unwrap_or(account_balance),
            max_risk_per_trade: env_f64("MAX_RISK_PER_TRADE").unwrap_or(DEFAULT_MAX_RISK_PER_TRADE),
            default_stop_pct: env_f64("DEFAULT_STOP_PCT").unwrap_or(DEFAULT_STOP_PCT),
            default_atr_multiplier: env_f64("DEFAULT_ATR_MULTIPLIER")
                .unwrap_or(DEFAULT_ATR_MULTIPLIER),
            default_trailing_pct: env_f64("DEFAULT_TRAILING_PCT").unwrap_or(DEFAULT_TRAILING_PCT),
            min_stop_distance: env_f64("MIN_STOP_DISTANCE").unwrap_or(DEFAULT_MIN_STOP_DISTANCE),
            max_stop_distance: env_f64("MAX_STOP_DISTANCE").unwrap_or(DEFAULT_MAX_STOP_DISTANCE),
        }
        .validated()
    }
}

/// Screening, signal, and backtest parameters for the pairs strategy.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub adf_p_value_threshold: f64,
    pub min_lookback_days: usize,
    pub z_score_window: usize,
    pub entry_z_threshold: f64,
    pub exit_z_threshold: f64,
    pub stop_z_threshold: f64,
    pub max_holding_days: usize,
    pub min_confidence: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct StrategyYaml {
    adf_p_value_threshold: Option<f64>,
    min_lookback_days: Option<usize>,
    z_score_window: Option<usize>,
    entry_z_threshold: Option<f64>,
    exit_z_threshold: Option<f64>,
    stop_z_threshold: Option<f64>,
    max_holding_days: Option<usize>,
    min_confidence: Option<f64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            adf_p_value_threshold: DEFAULT_ADF_P_VALUE_THRESHOLD,
            min_lookback_days: DEFAULT_MIN_LOOKBACK_DAYS,
            z_score_window: DEFAULT_Z_SCORE_WINDOW,
            entry_z_threshold: DEFAULT_ENTRY_Z_THRESHOLD,
            exit_z_threshold: DEFAULT_EXIT_Z_THRESHOLD,
            stop_z_threshold: DEFAULT_STOP_Z_THRESHOLD,
            max_holding_days: DEFAULT_MAX_HOLDING_DAYS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl StrategyConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.adf_p_value_threshold <= 0.0 {
            return Err(ConfigError::NonPositiveThreshold {
                name: "adf_p_value_threshold",
                value: self.adf_p_value_threshold,
            });
        }
        if self.min_lookback_days == 0 {
            return Err(ConfigError::InvalidLookback(self.min_lookback_days));
        }
        if self.z_score_window < 2 {
            return Err(ConfigError::WindowTooSmall(self.z_score_window));
        }
        for (name, value) in [
            ("entry_z_threshold", self.entry_z_threshold),
            ("exit_z_threshold", self.exit_z_threshold),
            ("stop_z_threshold", self.stop_z_threshold),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositiveThreshold { name, value });
            }
        }
        if !(self.exit_z_threshold < self.entry_z_threshold
            && self.entry_z_threshold < self.stop_z_threshold)
        {
            return Err(ConfigError::UnorderedZThresholds {
                exit: self.exit_z_threshold,
                entry: self.entry_z_threshold,
                stop: self.stop_z_threshold,
            });
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidMinConfidence(self.min_confidence));
        }
        Ok(self)
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open strategy config {}", path_ref.display()))?;
        let yaml: StrategyYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse strategy config {}", path_ref.display()))?;
        Ok(Self::from_yaml(yaml).validated()?)
    }

    fn from_yaml(yaml: StrategyYaml) -> Self {
        Self {
            adf_p_value_threshold: yaml
                .adf_p_value_threshold
                .unwrap_or(DEFAULT_ADF_P_VALUE_THRESHOLD),
            min_lookback_days: yaml.min_lookback_days.unwrap_or(DEFAULT_MIN_LOOKBACK_DAYS),
            z_score_window: yaml.z_score_window.unwrap_or(DEFAULT_Z_SCORE_WINDOW),
            entry_z_threshold: yaml.entry_z_threshold.unwrap_or(DEFAULT_ENTRY_Z_THRESHOLD),
            exit_z_threshold: yaml.exit_z_threshold.unwrap_or(DEFAULT_EXIT_Z_THRESHOLD),
            stop_z_threshold: yaml.stop_z_threshold.unwrap_or(DEFAULT_STOP_Z_THRESHOLD),
            max_holding_days: yaml.max_holding_days.unwrap_or(DEFAULT_MAX_HOLDING_DAYS),
            min_confidence: yaml.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self {
            adf_p_value_threshold: env_f64("ADF_P_VALUE_THRESHOLD")
                .unwrap_or(DEFAULT_ADF_P_VALUE_THRESHOLD),
            min_lookback_days: env_usize("MIN_LOOKBACK_DAYS").unwrap_or(DEFAULT_MIN_LOOKBACK_DAYS),
            z_score_window: env_usize("Z_SCORE_WINDOW").unwrap_or(DEFAULT_Z_SCORE_WINDOW),
            entry_z_threshold: env_f64("ENTRY_Z_THRESHOLD").unwrap_or(DEFAULT_ENTRY_Z_THRESHOLD),
            exit_z_threshold: env_f64("EXIT_Z_THRESHOLD").unwrap_or(DEFAULT_EXIT_Z_THRESHOLD),
            stop_z_threshold: env_f64("STOP_Z_THRESHOLD").unwrap_or(DEFAULT_STOP_Z_THRESHOLD),
            max_holding_days: env_usize("MAX_HOLDING_DAYS").unwrap_or(DEFAULT_MAX_HOLDING_DAYS),
            min_confidence: env_f64("MIN_CONFIDENCE").unwrap_or(DEFAULT_MIN_CONFIDENCE),
        }
        .validated()
    }
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
