//! Core data models for the decision engine.
//!
//! `GameState` is the validated snapshot of one wagering opportunity,
//! `BettingDecision` is the unit handed to the execution collaborator and
//! `SettlementReport` is what comes back once the event resolves.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::EngineError;

/// Tolerance for a probability vector summing to one.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Actions
// =============================================================================

/// One discrete action in the wagering game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetAction {
    /// Back the outcome at this index.
    Back(usize),
    Abstain,
}

impl BetAction {
    pub fn is_abstain(&self) -> bool {
        matches!(self, Self::Abstain)
    }

    pub fn outcome(&self) -> Option<usize> {
        match self {
            Self::Back(i) => Some(*i),
            Self::Abstain => None,
        }
    }
}

impl fmt::Display for BetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Back(i) => write!(f, "BACK#{i}"),
            Self::Abstain => write!(f, "ABSTAIN"),
        }
    }
}

// =============================================================================
// Game State
// =============================================================================

/// Optional per-outcome multiplicative adjustments (1.0 is neutral).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    #[serde(default)]
    pub form: Option<Vec<f64>>,
    #[serde(default)]
    pub injury: Option<Vec<f64>>,
    #[serde(default)]
    pub venue: Option<Vec<f64>>,
}

impl Adjustments {
    pub fn is_empty(&self) -> bool {
        self.form.is_none() && self.injury.is_none() && self.venue.is_none()
    }

    fn factors(&self) -> impl Iterator<Item = (&'static str, &Vec<f64>)> {
        [
            ("form", self.form.as_ref()),
            ("injury", self.injury.as_ref()),
            ("venue", self.venue.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name, v)))
    }

    /// Combined factor for one outcome.
    fn combined(&self, outcome: usize) -> f64 {
        self.factors()
            .map(|(_, v)| v.get(outcome).copied().unwrap_or(1.0))
            .product()
    }
}

/// Immutable, validated snapshot of one wagering opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct GameState {
    pub opportunity_id: String,
    pub outcome_labels: Vec<String>,
    pub outcome_probabilities: Vec<f64>,
    pub market_odds: Vec<Decimal>,
    pub confidence: f64,
    pub starts_at: Option<DateTime<Utc>>,
    pub adjustments: Adjustments,
}

impl GameState {
    /// Build a game state, rejecting malformed probabilities or odds.
    pub fn new(
        opportunity_id: impl Into<String>,
        outcome_labels: Vec<String>,
        outcome_probabilities: Vec<f64>,
        market_odds: Vec<Decimal>,
    ) -> Result<Self, EngineError> {
        let confidence = outcome_probabilities
            .iter()
            .copied()
            .fold(0.0_f64, f64::max);
        let state = Self {
            opportunity_id: opportunity_id.into(),
            outcome_labels,
            outcome_probabilities,
            market_odds,
            confidence,
            starts_at: None,
            adjustments: Adjustments::default(),
        };
        state.validate()?;
        Ok(state)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self, EngineError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::InvalidRecord {
                opportunity_id: self.opportunity_id.clone(),
                reason: format!("confidence {confidence} outside [0, 1]"),
            });
        }
        self.confidence = confidence;
        Ok(self)
    }

    pub fn with_start(mut self, starts_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self
    }

    pub fn with_adjustments(mut self, adjustments: Adjustments) -> Result<Self, EngineError> {
        self.adjustments = adjustments;
        self.validate_adjustments()?;
        Ok(self)
    }

    pub fn outcome_count(&self) -> usize {
        self.outcome_labels.len()
    }

    fn validate(&self) -> Result<(), EngineError> {
        let n = self.outcome_labels.len();
        if !(2..=3).contains(&n) {
            return Err(EngineError::InvalidRecord {
                opportunity_id: self.opportunity_id.clone(),
                reason: format!("expected 2 or 3 outcomes, got {n}"),
            });
        }
        if self.market_odds.len() != n {
            return Err(EngineError::InvalidOdds(format!(
                "{}: {} odds for {} outcomes",
                self.opportunity_id,
                self.market_odds.len(),
                n
            )));
        }
        for odds in &self.market_odds {
            // Implied probability 1/odds must land strictly inside (0, 1).
            if *odds <= Decimal::ONE {
                return Err(EngineError::InvalidOdds(format!(
                    "{}: decimal odds {} must exceed 1.0",
                    self.opportunity_id, odds
                )));
            }
        }
        validate_probabilities(&self.outcome_probabilities, n)
            .map_err(|e| match e {
                EngineError::InvalidProbability(msg) => {
                    EngineError::InvalidProbability(format!("{}: {}", self.opportunity_id, msg))
                }
                other => other,
            })?;
        self.validate_adjustments()
    }

    fn validate_adjustments(&self) -> Result<(), EngineError> {
        let n = self.outcome_count();
        for (name, factors) in self.adjustments.factors() {
            if factors.len() != n {
                return Err(EngineError::InvalidRecord {
                    opportunity_id: self.opportunity_id.clone(),
                    reason: format!("{name} adjustment has {} values for {n} outcomes", factors.len()),
                });
            }
            if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
                return Err(EngineError::InvalidRecord {
                    opportunity_id: self.opportunity_id.clone(),
                    reason: format!("{name} adjustment factors must be finite and positive"),
                });
            }
        }
        Ok(())
    }

    /// Decimal odds as floats for the payoff math.
    pub fn odds_f64(&self) -> Vec<f64> {
        self.market_odds
            .iter()
            .map(|o| o.to_f64().unwrap_or(1.0))
            .collect()
    }

    /// Raw implied probabilities (1 / odds), including the bookmaker margin.
    pub fn implied_probabilities(&self) -> Vec<f64> {
        self.odds_f64().iter().map(|o| 1.0 / o).collect()
    }

    /// Sum of implied probabilities; above 1.0 is the bookmaker margin.
    pub fn overround(&self) -> f64 {
        self.implied_probabilities().iter().sum()
    }

    /// Estimated probabilities after form/injury/venue adjustments, renormalized.
    pub fn adjusted_probabilities(&self) -> Vec<f64> {
        if self.adjustments.is_empty() {
            return self.outcome_probabilities.clone();
        }
        let raw: Vec<f64> = self
            .outcome_probabilities
            .iter()
            .enumerate()
            .map(|(i, p)| p * self.adjustments.combined(i))
            .collect();
        let total: f64 = raw.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return self.outcome_probabilities.clone();
        }
        raw.iter().map(|p| p / total).collect()
    }

    /// Human-readable label for an action in this game.
    pub fn action_label(&self, action: BetAction) -> String {
        match action {
            BetAction::Back(i) => match self.outcome_labels.get(i) {
                Some(label) => format!("back:{label}"),
                None => format!("back:#{i}"),
            },
            BetAction::Abstain => "abstain".to_string(),
        }
    }
}

/// Check a probability vector: expected length, every value in (0, 1),
/// sum equal to one within `PROBABILITY_SUM_TOLERANCE`.
pub fn validate_probabilities(probabilities: &[f64], expected_len: usize) -> Result<(), EngineError> {
    if probabilities.len() != expected_len {
        return Err(EngineError::InvalidProbability(format!(
            "expected {} probabilities, got {}",
            expected_len,
            probabilities.len()
        )));
    }
    if let Some(bad) = probabilities
        .iter()
        .find(|p| !p.is_finite() || **p <= 0.0 || **p >= 1.0)
    {
        return Err(EngineError::InvalidProbability(format!(
            "value {bad} outside (0, 1)"
        )));
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        return Err(EngineError::InvalidProbability(format!(
            "probabilities sum to {sum:.8}, expected 1"
        )));
    }
    Ok(())
}

// =============================================================================
// Decisions and Settlement
// =============================================================================

/// An approved wager, immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BettingDecision {
    pub decision_id: String,
    pub opportunity_id: String,
    pub strategy: String,
    pub action: BetAction,
    pub odds: Decimal,
    pub stake: Decimal,
    pub expected_value: f64,
    pub confidence: f64,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl BettingDecision {
    /// Net profit if the backed outcome wins.
    pub fn potential_profit(&self) -> Decimal {
        self.stake * (self.odds - Decimal::ONE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Won,
    Lost,
    Void,
    /// Order never placed; only the exposure is released.
    Rejected,
}

/// Asynchronous report from the execution collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub decision_id: String,
    pub status: SettlementStatus,
    pub realized_pnl: Decimal,
}

impl SettlementReport {
    pub fn new(decision_id: impl Into<String>, status: SettlementStatus, realized_pnl: Decimal) -> Self {
        Self {
            decision_id: decision_id.into(),
            status,
            realized_pnl,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
