// src/lib.rs
pub mod backtest;
pub mod config;
pub mod market;
pub mod metrics;
pub mod pairs;
pub mod stats;
pub mod stop_loss;
