//! Bankroll risk manager.
//!
//! Owns the single `BankrollStatus` together with the circuit breaker, the
//! decision ledger and the active tier config, all behind one mutex. Every
//! approval and settlement runs start to finish inside that critical
//! section, so two concurrent approvals can never both pass an exposure check
//! against the same stale exposure value.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::data::models::SettlementReport;
use crate::errors::{EngineError, RiskLimitExceeded, SettlementConflict};
use crate::state::bankroll::{BankrollStatus, DecisionLedger};
use crate::strategies::tiers::BettingStrategyConfig;

use super::circuit_breaker::{CircuitBreaker, TradingState};

/// A stake proposed for approval.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub decision_id: String,
    pub opportunity_id: String,
    pub stake: Decimal,
    /// Loss per unit staked in the chosen action's worst outcome (zero for a
    /// guaranteed-payoff position).
    pub worst_case_loss_per_unit: Decimal,
}

impl ApprovalRequest {
    /// Request for a plain back bet, which loses the full stake in the worst case.
    pub fn back_bet(
        decision_id: impl Into<String>,
        opportunity_id: impl Into<String>,
        stake: Decimal,
    ) -> Self {
        Self {
            decision_id: decision_id.into(),
            opportunity_id: opportunity_id.into(),
            stake,
            worst_case_loss_per_unit: Decimal::ONE,
        }
    }
}

/// Result of a settlement callback that did not hit a fatal condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied,
    /// Duplicate or contradictory callback, logged and ignored.
    Ignored(SettlementConflict),
}

/// Consistent snapshot of the limits the engine sizes against.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeLimits {
    pub balance: Decimal,
    pub max_bet: Decimal,
    pub exposure_headroom: Decimal,
    pub decisions_remaining: u32,
    pub stake_multiplier: Decimal,
    pub blocked: Option<RiskLimitExceeded>,
}

impl StakeLimits {
    pub fn can_trade(&self) -> bool {
        self.blocked.is_none() && self.decisions_remaining > 0
    }
}

#[derive(Debug)]
struct Inner {
    config: Arc<BettingStrategyConfig>,
    status: BankrollStatus,
    breaker: CircuitBreaker,
    ledger: DecisionLedger,
}

impl Inner {
    fn max_bet(&self) -> Decimal {
        self.config.max_bet_percentage * self.status.current_balance
    }

    fn max_exposure(&self) -> Decimal {
        self.config.max_exposure_percentage * self.status.current_balance
    }

    /// Stop-loss budget left for the day.
    fn loss_budget(&self) -> Decimal {
        let spent = (-self.status.daily_pnl).max(Decimal::ZERO);
        (self.config.stop_loss_percentage * self.status.current_balance - spent).max(Decimal::ZERO)
    }

    fn check(&self, request: &ApprovalRequest) -> Result<(), RiskLimitExceeded> {
        let stake = request.stake;
        if stake <= Decimal::ZERO {
            return Err(RiskLimitExceeded::NonPositiveStake(stake));
        }

        self.breaker.can_trade(&self.config)?;

        if self.ledger.has_opportunity(&request.opportunity_id) {
            return Err(RiskLimitExceeded::DuplicateOpportunity(
                request.opportunity_id.clone(),
            ));
        }

        if self.status.decisions_today >= self.config.max_daily_bets {
            return Err(RiskLimitExceeded::MaxDailyBets(self.config.max_daily_bets));
        }

        let max_bet = self.max_bet();
        if stake > max_bet {
            return Err(RiskLimitExceeded::MaxBet {
                stake,
                limit: max_bet,
            });
        }

        let max_exposure = self.max_exposure();
        if self.status.open_exposure + stake > max_exposure {
            return Err(RiskLimitExceeded::MaxExposure {
                current: self.status.open_exposure,
                stake,
                limit: max_exposure,
            });
        }

        let loss = stake * request.worst_case_loss_per_unit.max(Decimal::ZERO);
        let budget = self.loss_budget();
        if loss > budget {
            return Err(RiskLimitExceeded::LossBudget { loss, budget });
        }

        Ok(())
    }
}

/// Thread-safe risk manager; share it as `Arc<RiskManager>`.
#[derive(Debug)]
pub struct RiskManager {
    inner: Mutex<Inner>,
}

impl RiskManager {
    pub fn new(config: BettingStrategyConfig, initial_balance: Decimal) -> Result<Self, EngineError> {
        Self::with_trading_day(config, initial_balance, Utc::now().date_naive())
    }

    pub fn with_trading_day(
        config: BettingStrategyConfig,
        initial_balance: Decimal,
        trading_day: NaiveDate,
    ) -> Result<Self, EngineError> {
        let status = BankrollStatus::new(initial_balance, trading_day);
        status.check_integrity()?;

        info!(
            tier = %config.tier,
            initial_balance = %initial_balance,
            max_bet_pct = %config.max_bet_percentage,
            max_exposure_pct = %config.max_exposure_percentage,
            stop_loss_pct = %config.stop_loss_percentage,
            kelly_fraction = %config.kelly_fraction,
            "RiskManager initialized"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                config: Arc::new(config),
                status,
                breaker: CircuitBreaker::new(),
                ledger: DecisionLedger::default(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Active tier config.
    pub fn config(&self) -> Arc<BettingStrategyConfig> {
        self.lock().config.clone()
    }

    pub fn status(&self) -> BankrollStatus {
        self.lock().status.clone()
    }

    pub fn state(&self) -> TradingState {
        self.lock().breaker.state()
    }

    pub fn is_halted(&self) -> bool {
        self.lock().breaker.operator_required()
    }

    pub fn limits(&self) -> StakeLimits {
        let inner = self.lock();
        StakeLimits {
            balance: inner.status.current_balance,
            max_bet: inner.max_bet(),
            exposure_headroom: (inner.max_exposure() - inner.status.open_exposure)
                .max(Decimal::ZERO),
            decisions_remaining: inner
                .config
                .max_daily_bets
                .saturating_sub(inner.status.decisions_today),
            stake_multiplier: inner.breaker.stake_multiplier(&inner.config),
            blocked: inner.breaker.can_trade(&inner.config).err(),
        }
    }

    // =========================================================================
    // Approval and settlement
    // =========================================================================

    /// Approve or reject a stake. Approval commits the stake to open exposure
    /// and the day's decision count in the same critical section as the checks.
    pub fn approve(&self, request: &ApprovalRequest) -> Result<(), RiskLimitExceeded> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        inner.breaker.update(&mut inner.status, &inner.config);

        if let Err(reason) = inner.check(request) {
            debug!(
                decision_id = %request.decision_id,
                opportunity_id = %request.opportunity_id,
                stake = %request.stake,
                reason = %reason,
                "Stake rejected"
            );
            return Err(reason);
        }

        inner.status.commit(request.stake);
        inner
            .ledger
            .record(&request.decision_id, &request.opportunity_id, request.stake);

        info!(
            decision_id = %request.decision_id,
            opportunity_id = %request.opportunity_id,
            stake = %request.stake,
            open_exposure = %inner.status.open_exposure,
            decisions_today = inner.status.decisions_today,
            "Stake approved"
        );
        Ok(())
    }

    /// Apply a settlement report. Idempotent per decision id: only the first
    /// report changes the bankroll. A report that drives the bankroll into an
    /// invalid state halts trading and returns `BankrollCorrupted`.
    pub fn settle(&self, report: &SettlementReport) -> Result<SettleOutcome, EngineError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let stake = match inner
            .ledger
            .settle(
                &report.decision_id,
                report.realized_pnl,
                inner.status.trading_day,
            )
        {
            Ok(stake) => stake,
            Err(conflict) => {
                warn!(
                    decision_id = %report.decision_id,
                    conflict = %conflict,
                    "Settlement ignored"
                );
                return Ok(SettleOutcome::Ignored(conflict));
            }
        };

        inner.status.apply_settlement(stake, report.realized_pnl);

        if let Err(e) = inner.status.check_integrity() {
            inner.breaker.halt(&e.to_string());
            return Err(e);
        }

        inner.breaker.update(&mut inner.status, &inner.config);

        info!(
            decision_id = %report.decision_id,
            status = ?report.status,
            pnl = %report.realized_pnl,
            balance = %inner.status.current_balance,
            daily_pnl = %inner.status.daily_pnl,
            open_exposure = %inner.status.open_exposure,
            state = %inner.breaker.state(),
            "Decision settled"
        );
        Ok(SettleOutcome::Applied)
    }

    // =========================================================================
    // Operational controls
    // =========================================================================

    /// Replace the active tier. Applies to approvals made after the switch.
    pub fn switch_tier(&self, config: BettingStrategyConfig) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        info!(from = %inner.config.tier, to = %config.tier, "Switching risk tier");
        inner.config = Arc::new(config);
        inner.breaker.update(&mut inner.status, &inner.config);
    }

    /// Close trading for the rest of the day.
    pub fn emergency_stop(&self, reason: &str) {
        self.lock().breaker.emergency_stop(reason);
    }

    /// Reset daily counters and reopen. Refused while a fatal halt is latched.
    pub fn start_new_day(&self, trading_day: NaiveDate) -> Result<(), EngineError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if !inner.breaker.reset_day() {
            return Err(EngineError::BankrollCorrupted(
                "operator intervention required before reopening".to_string(),
            ));
        }
        inner.status.reset_day(trading_day);
        let pruned = inner.ledger.start_new_day(trading_day);
        info!(
            trading_day = %trading_day,
            balance = %inner.status.current_balance,
            open_exposure = %inner.status.open_exposure,
            open_decisions = inner.ledger.open_count(),
            pruned_decisions = pruned,
            ledger_entries = inner.ledger.len(),
            "New trading day"
        );
        Ok(())
    }

    /// Operator restates the balance after a fatal halt and reopens.
    pub fn operator_reset(&self, balance: Decimal) -> Result<(), EngineError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.status.restate(balance);
        inner.status.check_integrity()?;
        inner.breaker.operator_reset();
        Ok(())
    }
}
