//! Error taxonomy for the decision engine.
//!
//! Input errors skip a single opportunity, risk rejections are ordinary
//! control flow, and only `BankrollCorrupted` halts the engine.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid probability vector: {0}")]
    InvalidProbability(String),

    #[error("Invalid odds: {0}")]
    InvalidOdds(String),

    #[error("Invalid payoff matrix: {0}")]
    InvalidPayoffMatrix(String),

    #[error("Malformed prediction record {opportunity_id}: {reason}")]
    InvalidRecord {
        opportunity_id: String,
        reason: String,
    },

    #[error("Bankroll state corrupted: {0}")]
    BankrollCorrupted(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EngineError {
    /// Whether the engine must stop and wait for an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BankrollCorrupted(_))
    }
}

/// Why a proposed stake was not approved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskLimitExceeded {
    #[error("stake must be positive (got ${0:.2})")]
    NonPositiveStake(Decimal),

    #[error("per-bet cap: ${stake:.2} > ${limit:.2}")]
    MaxBet { stake: Decimal, limit: Decimal },

    #[error("exposure cap: ${current:.2} + ${stake:.2} > ${limit:.2}")]
    MaxExposure {
        current: Decimal,
        stake: Decimal,
        limit: Decimal,
    },

    #[error("daily decision limit reached ({0})")]
    MaxDailyBets(u32),

    #[error("worst-case loss ${loss:.2} exceeds remaining stop-loss budget ${budget:.2}")]
    LossBudget { loss: Decimal, budget: Decimal },

    #[error("stop-loss hit for the day")]
    StoppedLoss,

    #[error("profit target locked (hard stop)")]
    ProfitLocked,

    #[error("trading closed: {0}")]
    Closed(String),

    #[error("opportunity {0} already has an approved decision today")]
    DuplicateOpportunity(String),
}

/// Duplicate or contradictory settlement callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementConflict {
    #[error("unknown decision {0}")]
    UnknownDecision(String),

    #[error("decision {0} already settled")]
    AlreadySettled(String),

    #[error("decision {decision_id} already settled with pnl ${recorded:.2}, got ${received:.2}")]
    Contradictory {
        decision_id: String,
        recorded: Decimal,
        received: Decimal,
    },
}
