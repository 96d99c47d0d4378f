//! Trading-day circuit breaker.
//!
//! States: OPEN, STOPPED_LOSS, PROFIT_LOCKED, CLOSED.
//!
//! - OPEN -> STOPPED_LOSS when the day is down by at least `stop_loss_percentage`
//!   of the current balance. Sticky until the next day reset.
//! - OPEN -> PROFIT_LOCKED when the day is up by at least
//!   `profit_target_percentage`. Advisory unless the tier asks for a hard stop.
//! - any -> CLOSED on emergency stop or bankroll corruption. A corruption
//!   halt survives day resets until an operator clears it.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

use crate::errors::RiskLimitExceeded;
use crate::state::bankroll::BankrollStatus;
use crate::strategies::tiers::BettingStrategyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingState {
    Open,
    StoppedLoss,
    ProfitLocked,
    Closed,
}

impl fmt::Display for TradingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::StoppedLoss => write!(f, "STOPPED_LOSS"),
            Self::ProfitLocked => write!(f, "PROFIT_LOCKED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Day-scoped state machine guarding approvals.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: TradingState,
    trip_reason: Option<String>,
    operator_required: bool,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: TradingState::Open,
            trip_reason: None,
            operator_required: false,
        }
    }

    pub fn state(&self) -> TradingState {
        self.state
    }

    pub fn trip_reason(&self) -> Option<&str> {
        self.trip_reason.as_deref()
    }

    pub fn operator_required(&self) -> bool {
        self.operator_required
    }

    /// Re-evaluate loss and profit thresholds against the bankroll.
    /// Sets the matching day flags on `status`.
    pub fn update(&mut self, status: &mut BankrollStatus, config: &BettingStrategyConfig) {
        if matches!(self.state, TradingState::StoppedLoss | TradingState::Closed) {
            return;
        }

        let loss_ratio = status.daily_loss_ratio();
        if loss_ratio > Decimal::ZERO && loss_ratio >= config.stop_loss_percentage {
            status.stop_loss_hit = true;
            self.trip(
                TradingState::StoppedLoss,
                format!(
                    "Daily stop-loss hit: {:.2}% >= {:.2}%",
                    loss_ratio * Decimal::ONE_HUNDRED,
                    config.stop_loss_percentage * Decimal::ONE_HUNDRED
                ),
            );
            return;
        }

        if self.state == TradingState::Open {
            let profit_ratio = status.daily_profit_ratio();
            if profit_ratio > Decimal::ZERO && profit_ratio >= config.profit_target_percentage {
                status.profit_target_hit = true;
                self.trip(
                    TradingState::ProfitLocked,
                    format!(
                        "Daily profit target hit: {:.2}% >= {:.2}%",
                        profit_ratio * Decimal::ONE_HUNDRED,
                        config.profit_target_percentage * Decimal::ONE_HUNDRED
                    ),
                );
            }
        }
    }

    /// Whether a new stake may be approved in the current state.
    pub fn can_trade(&self, config: &BettingStrategyConfig) -> Result<(), RiskLimitExceeded> {
        match self.state {
            TradingState::Open => Ok(()),
            TradingState::ProfitLocked if !config.profit_target_hard_stop => Ok(()),
            TradingState::ProfitLocked => Err(RiskLimitExceeded::ProfitLocked),
            TradingState::StoppedLoss => Err(RiskLimitExceeded::StoppedLoss),
            TradingState::Closed => Err(RiskLimitExceeded::Closed(
                self.trip_reason
                    .clone()
                    .unwrap_or_else(|| "closed".to_string()),
            )),
        }
    }

    /// Stake multiplier for the current state (advisory profit lock shrinks stakes).
    pub fn stake_multiplier(&self, config: &BettingStrategyConfig) -> Decimal {
        match self.state {
            TradingState::Open => Decimal::ONE,
            TradingState::ProfitLocked if !config.profit_target_hard_stop => {
                config.profit_lock_stake_multiplier
            }
            _ => Decimal::ZERO,
        }
    }

    /// Emergency stop: close for the rest of the day.
    pub fn emergency_stop(&mut self, reason: &str) {
        self.trip(TradingState::Closed, format!("Emergency stop: {reason}"));
    }

    /// Fatal halt: close and require operator intervention.
    pub fn halt(&mut self, reason: &str) {
        self.operator_required = true;
        self.state = TradingState::Closed;
        self.trip_reason = Some(reason.to_string());
        error!(reason, "Trading HALTED, operator intervention required");
    }

    /// Reopen for a new trading day. Returns false if a fatal halt is latched.
    pub fn reset_day(&mut self) -> bool {
        if self.operator_required {
            warn!("Day reset refused: operator intervention required");
            return false;
        }
        self.state = TradingState::Open;
        self.trip_reason = None;
        info!("Circuit breaker reset for new trading day");
        true
    }

    /// Operator clears a fatal halt.
    pub fn operator_reset(&mut self) {
        self.operator_required = false;
        self.state = TradingState::Open;
        self.trip_reason = None;
        warn!("Circuit breaker cleared by operator");
    }

    fn trip(&mut self, next: TradingState, reason: String) {
        warn!(from = %self.state, to = %next, reason = %reason, "Circuit breaker transition");
        self.state = next;
        self.trip_reason = Some(reason);
    }
}
