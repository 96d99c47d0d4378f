//! Configuration management.
//!
//! Loads settings from environment variables and .env file.

use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::risk::position_sizer::DEFAULT_MAX_FRACTION;
use crate::strategies::equilibrium::{
    EquilibriumModel, DEFAULT_DAMPING, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE,
};
use crate::strategies::runner::{RunnerConfig, TradingWindow};
use crate::strategies::tiers::{BettingStrategyConfig, RiskTier};

/// Bounds for the cycle and file-poll intervals.
pub const MIN_INTERVAL_SECS: f64 = 0.001;
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Settings {
    // Trading
    pub trading_mode: TradingMode,
    pub initial_balance: Decimal,
    pub cycle_interval_secs: f64,
    pub trading_window_start_hour: Option<u32>,
    pub trading_window_end_hour: Option<u32>,

    // Risk tier and per-field overrides
    pub risk_tier: Result<RiskTier, String>,
    pub kelly_fraction: Option<Decimal>,
    pub max_bet_pct: Option<Decimal>,
    pub max_exposure_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub profit_target_pct: Option<Decimal>,
    pub max_daily_bets: Option<u32>,
    pub profit_target_hard_stop: bool,

    // Sizing
    pub kelly_max_fraction: Decimal,
    pub min_stake: Decimal,

    // Equilibrium search
    pub equilibrium_max_iterations: usize,
    pub equilibrium_tolerance: f64,
    pub equilibrium_damping: f64,

    // Files
    pub predictions_path: Option<PathBuf>,
    pub results_path: Option<PathBuf>,
    pub file_poll_interval_secs: f64,

    // Logging
    pub status_log_interval_secs: f64,
    pub log_level: String,
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Paper,
    Live,
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            _ => Err(format!("Invalid trading mode: {s}")),
        }
    }
}

impl Settings {
    /// Load settings from environment variables (and .env file).
    pub fn from_env() -> Self {
        // Try to load .env file (ignore if not found).
        let _ = dotenvy::dotenv();

        Self {
            trading_mode: env_str("TRADING_MODE", "paper")
                .parse()
                .unwrap_or(TradingMode::Paper),
            initial_balance: env_decimal("INITIAL_BALANCE", Decimal::new(1000, 0)),
            cycle_interval_secs: env_f64("CYCLE_INTERVAL_SECS", 600.0),
            trading_window_start_hour: env_opt("TRADING_WINDOW_START_HOUR"),
            trading_window_end_hour: env_opt("TRADING_WINDOW_END_HOUR"),

            risk_tier: env_str("RISK_TIER", "moderate").parse(),
            kelly_fraction: env_opt("RISK_KELLY_FRACTION"),
            max_bet_pct: env_opt("RISK_MAX_BET_PCT"),
            max_exposure_pct: env_opt("RISK_MAX_EXPOSURE_PCT"),
            stop_loss_pct: env_opt("RISK_STOP_LOSS_PCT"),
            profit_target_pct: env_opt("RISK_PROFIT_TARGET_PCT"),
            max_daily_bets: env_opt("RISK_MAX_DAILY_BETS"),
            profit_target_hard_stop: env_bool("RISK_PROFIT_TARGET_HARD_STOP", false),

            kelly_max_fraction: env_decimal("KELLY_MAX_FRACTION", DEFAULT_MAX_FRACTION),
            min_stake: env_decimal("MIN_STAKE", Decimal::ONE),

            equilibrium_max_iterations: env_usize("EQUILIBRIUM_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS),
            equilibrium_tolerance: env_f64("EQUILIBRIUM_TOLERANCE", DEFAULT_TOLERANCE),
            equilibrium_damping: env_f64("EQUILIBRIUM_DAMPING", DEFAULT_DAMPING),

            predictions_path: env_path("PREDICTIONS_PATH"),
            results_path: env_path("RESULTS_PATH"),
            file_poll_interval_secs: env_f64("FILE_POLL_INTERVAL_SECS", 30.0),

            status_log_interval_secs: env_f64("STATUS_LOG_INTERVAL_SECS", 300.0),
            log_level: env_str("LOG_LEVEL", "info"),
            log_json: env_bool("LOG_JSON", false),
        }
    }

    /// The selected tier with any per-field overrides applied.
    pub fn strategy_config(&self) -> BettingStrategyConfig {
        let tier = self.risk_tier.clone().unwrap_or(RiskTier::Moderate);
        let base = BettingStrategyConfig::for_tier(tier);
        BettingStrategyConfig {
            kelly_fraction: self.kelly_fraction.unwrap_or(base.kelly_fraction),
            max_bet_percentage: self.max_bet_pct.unwrap_or(base.max_bet_percentage),
            max_exposure_percentage: self.max_exposure_pct.unwrap_or(base.max_exposure_percentage),
            stop_loss_percentage: self.stop_loss_pct.unwrap_or(base.stop_loss_percentage),
            profit_target_percentage: self.profit_target_pct.unwrap_or(base.profit_target_percentage),
            max_daily_bets: self.max_daily_bets.unwrap_or(base.max_daily_bets),
            profit_target_hard_stop: self.profit_target_hard_stop,
            ..base
        }
    }

    pub fn equilibrium_model(&self) -> EquilibriumModel {
        EquilibriumModel {
            damping: self.equilibrium_damping,
            tolerance: self.equilibrium_tolerance,
            max_iterations: self.equilibrium_max_iterations,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let trading_window = match (self.trading_window_start_hour, self.trading_window_end_hour) {
            (Some(start_hour), Some(end_hour)) => Some(TradingWindow {
                start_hour,
                end_hour,
            }),
            _ => None,
        };
        RunnerConfig {
            cycle_interval: Duration::from_secs_f64(self.cycle_interval_secs),
            trading_window,
        }
    }

    /// Validate configuration for critical requirements.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading_mode == TradingMode::Live {
            errors.push("TRADING_MODE=live is not supported; only paper execution exists".to_string());
        }

        if let Err(e) = &self.risk_tier {
            errors.push(format!("RISK_TIER: {e}"));
        }

        if self.initial_balance <= Decimal::ZERO {
            errors.push("INITIAL_BALANCE must be positive".to_string());
        }

        if self.kelly_max_fraction <= Decimal::ZERO || self.kelly_max_fraction > Decimal::ONE {
            errors.push("KELLY_MAX_FRACTION must be in (0, 1]".to_string());
        }

        if self.min_stake <= Decimal::ZERO {
            errors.push("MIN_STAKE must be positive".to_string());
        }

        for (key, secs) in [
            ("CYCLE_INTERVAL_SECS", self.cycle_interval_secs),
            ("FILE_POLL_INTERVAL_SECS", self.file_poll_interval_secs),
            ("STATUS_LOG_INTERVAL_SECS", self.status_log_interval_secs),
        ] {
            if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&secs) {
                errors.push(format!(
                    "{key} must be within {MIN_INTERVAL_SECS}..={MAX_INTERVAL_SECS} seconds"
                ));
            }
        }

        match (self.trading_window_start_hour, self.trading_window_end_hour) {
            (Some(start), Some(end)) => {
                if start > 23 || end > 24 {
                    errors.push("TRADING_WINDOW hours must be within 0..=24".to_string());
                }
                // An empty window would never run a cycle.
                if start == end {
                    errors.push("TRADING_WINDOW_START_HOUR must differ from TRADING_WINDOW_END_HOUR".to_string());
                }
            }
            (None, None) => {}
            _ => errors.push(
                "TRADING_WINDOW_START_HOUR and TRADING_WINDOW_END_HOUR must be set together".to_string(),
            ),
        }

        if self.equilibrium_max_iterations == 0 {
            errors.push("EQUILIBRIUM_MAX_ITERATIONS must be at least 1".to_string());
        }
        if !(self.equilibrium_tolerance > 0.0) {
            errors.push("EQUILIBRIUM_TOLERANCE must be positive".to_string());
        }
        if !(self.equilibrium_damping > 0.0 && self.equilibrium_damping <= 1.0) {
            errors.push("EQUILIBRIUM_DAMPING must be in (0, 1]".to_string());
        }

        if let Err(tier_errors) = self.strategy_config().validate() {
            errors.extend(tier_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// =============================================================================
// Environment helpers
// =============================================================================

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    env_opt(key).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_opt(key).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).unwrap_or(default)
}

/// Parsed value if the variable is set and parses.
fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}
