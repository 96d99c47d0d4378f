//! Equilibrium strategy over the discrete action set
//! {back outcome 0, back outcome 1, (back draw), abstain}.
//!
//! The primary search is a damped iterative best response: starting from a
//! uniform mix over actions, each step computes every action's expected
//! payoff against the assumed outcome distribution and moves
//! `damping` of the probability mass onto the best action:
//!
//! ```text
//!     x_{k+1} = (1 - d) * x_k + d * e_best
//! ```
//!
//! The search stops when no weight moves by more than `tolerance`, or at
//! `max_iterations`, in which case the last mix is returned with a
//! `ConvergenceWarning` and a reduced confidence factor.
//!
//! A minimax companion independently computes the action whose worst-case
//! payoff across outcomes is highest. It is a conservative cross-check for
//! the risk manager, never the primary decision driver.

use tracing::{debug, warn};

use crate::data::models::{validate_probabilities, BetAction, GameState};
use crate::errors::EngineError;

pub const DEFAULT_DAMPING: f64 = 0.1;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Expected payoff above this is LOW risk.
const LOW_RISK_PAYOFF: f64 = 0.10;
/// z-score for the 95% payoff interval.
const INTERVAL_Z: f64 = 1.96;
/// Confidence factor applied when the search hit its iteration cap.
const UNCONVERGED_CONFIDENCE: f64 = 0.5;

// =============================================================================
// Types
// =============================================================================

/// Net return per unit staked for each action (rows) under each outcome (columns).
#[derive(Debug, Clone, PartialEq)]
pub struct PayoffMatrix {
    actions: Vec<BetAction>,
    rows: Vec<Vec<f64>>,
}

impl PayoffMatrix {
    pub fn new(actions: Vec<BetAction>, rows: Vec<Vec<f64>>) -> Result<Self, EngineError> {
        if actions.is_empty() || actions.len() != rows.len() {
            return Err(EngineError::InvalidPayoffMatrix(format!(
                "{} actions for {} rows",
                actions.len(),
                rows.len()
            )));
        }
        let cols = rows[0].len();
        if cols == 0 {
            return Err(EngineError::InvalidPayoffMatrix("no outcome columns".to_string()));
        }
        if rows.iter().any(|r| r.len() != cols) {
            return Err(EngineError::InvalidPayoffMatrix("ragged rows".to_string()));
        }
        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidPayoffMatrix("non-finite payoff".to_string()));
        }
        Ok(Self { actions, rows })
    }

    /// Standard wagering matrix: backing outcome i pays `odds_i - 1` if i
    /// occurs and loses the stake otherwise; abstaining pays nothing.
    pub fn for_game(game: &GameState) -> Self {
        let odds = game.odds_f64();
        let n = odds.len();
        let mut actions = Vec::with_capacity(n + 1);
        let mut rows = Vec::with_capacity(n + 1);
        for (i, o) in odds.iter().enumerate() {
            actions.push(BetAction::Back(i));
            rows.push(
                (0..n)
                    .map(|j| if i == j { o - 1.0 } else { -1.0 })
                    .collect(),
            );
        }
        actions.push(BetAction::Abstain);
        rows.push(vec![0.0; n]);
        Self { actions, rows }
    }

    pub fn actions(&self) -> &[BetAction] {
        &self.actions
    }

    pub fn outcome_count(&self) -> usize {
        self.rows[0].len()
    }

    pub fn row(&self, action: BetAction) -> Option<&[f64]> {
        self.actions
            .iter()
            .position(|a| *a == action)
            .map(|i| self.rows[i].as_slice())
    }

    /// Expected payoff of each action against an outcome distribution.
    fn action_payoffs(&self, outcome_probs: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(outcome_probs).map(|(v, p)| v * p).sum())
            .collect()
    }

    /// Payoff of a mixed strategy under each single outcome.
    fn outcome_payoffs(&self, weights: &[f64]) -> Vec<f64> {
        (0..self.outcome_count())
            .map(|j| {
                self.rows
                    .iter()
                    .zip(weights)
                    .map(|(row, w)| row[j] * w)
                    .sum()
            })
            .collect()
    }
}

/// Probability distribution over actions. Weights always sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDistribution {
    entries: Vec<(BetAction, f64)>,
}

impl StrategyDistribution {
    fn uniform(actions: &[BetAction]) -> Self {
        let w = 1.0 / actions.len() as f64;
        Self {
            entries: actions.iter().map(|a| (*a, w)).collect(),
        }
    }

    fn pure(actions: &[BetAction], chosen: BetAction) -> Self {
        Self {
            entries: actions
                .iter()
                .map(|a| (*a, if *a == chosen { 1.0 } else { 0.0 }))
                .collect(),
        }
    }

    fn from_weights(actions: &[BetAction], weights: &[f64]) -> Self {
        let total: f64 = weights.iter().sum();
        Self {
            entries: actions
                .iter()
                .zip(weights)
                .map(|(a, w)| (*a, w / total))
                .collect(),
        }
    }

    fn weights(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, w)| *w).collect()
    }

    pub fn entries(&self) -> &[(BetAction, f64)] {
        &self.entries
    }

    pub fn probability(&self, action: BetAction) -> f64 {
        self.entries
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    /// Highest-weighted action; abstain wins ties.
    pub fn dominant(&self) -> BetAction {
        let mut best = (BetAction::Abstain, f64::NEG_INFINITY);
        for (action, w) in &self.entries {
            if *w > best.1 || (*w == best.1 && action.is_abstain()) {
                best = (*action, *w);
            }
        }
        best.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLabel {
    Low,
    Medium,
    High,
}

impl RiskLabel {
    pub fn from_expected_payoff(payoff: f64) -> Self {
        if payoff > LOW_RISK_PAYOFF {
            Self::Low
        } else if payoff >= 0.0 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// The best-response search hit its iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceWarning {
    pub iterations: usize,
}

/// Worst-case companion to the primary result.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimaxResult {
    pub action: BetAction,
    pub distribution: StrategyDistribution,
    /// Payoff guaranteed whatever the outcome.
    pub guaranteed_payoff: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquilibriumResult {
    pub distribution: StrategyDistribution,
    pub expected_payoff: f64,
    pub confidence_interval: (f64, f64),
    pub risk: RiskLabel,
    pub iterations: usize,
    pub warning: Option<ConvergenceWarning>,
    pub minimax: MinimaxResult,
}

impl EquilibriumResult {
    pub fn chosen_action(&self) -> BetAction {
        self.distribution.dominant()
    }

    pub fn converged(&self) -> bool {
        self.warning.is_none()
    }

    /// Multiplier to apply to downstream confidence.
    pub fn confidence_factor(&self) -> f64 {
        if self.converged() {
            1.0
        } else {
            UNCONVERGED_CONFIDENCE
        }
    }
}

// =============================================================================
// Model
// =============================================================================

#[derive(Debug, Clone)]
pub struct EquilibriumModel {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for EquilibriumModel {
    fn default() -> Self {
        Self {
            damping: DEFAULT_DAMPING,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl EquilibriumModel {
    pub fn new(damping: f64, tolerance: f64, max_iterations: usize) -> Self {
        Self {
            damping,
            tolerance,
            max_iterations,
        }
    }

    /// Solve for the equilibrium mix given outcome probabilities.
    pub fn solve(
        &self,
        matrix: &PayoffMatrix,
        outcome_probabilities: &[f64],
    ) -> Result<EquilibriumResult, EngineError> {
        validate_probabilities(outcome_probabilities, matrix.outcome_count())?;

        let actions = matrix.actions();
        let payoffs = matrix.action_payoffs(outcome_probabilities);
        let best = best_response(actions, &payoffs);

        let mut weights = StrategyDistribution::uniform(actions).weights();
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let mut max_shift: f64 = 0.0;
            for (i, w) in weights.iter_mut().enumerate() {
                let target = if i == best { 1.0 } else { 0.0 };
                let next = (1.0 - self.damping) * *w + self.damping * target;
                max_shift = max_shift.max((next - *w).abs());
                *w = next;
            }
            if max_shift < self.tolerance {
                converged = true;
                break;
            }
        }

        let distribution = StrategyDistribution::from_weights(actions, &weights);
        let weights = distribution.weights();

        // Exact expectation and spread of the final mix.
        let per_outcome = matrix.outcome_payoffs(&weights);
        let expected_payoff: f64 = per_outcome
            .iter()
            .zip(outcome_probabilities)
            .map(|(v, p)| v * p)
            .sum();
        let variance: f64 = per_outcome
            .iter()
            .zip(outcome_probabilities)
            .map(|(v, p)| p * (v - expected_payoff).powi(2))
            .sum();
        let half_width = INTERVAL_Z * variance.sqrt();

        let warning = if converged {
            None
        } else {
            warn!(
                iterations,
                tolerance = self.tolerance,
                "Equilibrium search hit iteration cap, using best distribution found"
            );
            Some(ConvergenceWarning { iterations })
        };

        let result = EquilibriumResult {
            distribution,
            expected_payoff,
            confidence_interval: (expected_payoff - half_width, expected_payoff + half_width),
            risk: RiskLabel::from_expected_payoff(expected_payoff),
            iterations,
            warning,
            minimax: minimax(matrix),
        };

        debug!(
            chosen = %result.chosen_action(),
            expected_payoff = result.expected_payoff,
            iterations,
            risk = ?result.risk,
            "Equilibrium solved"
        );

        Ok(result)
    }
}

/// Index of the best action; abstain (or the earliest) wins exact ties.
fn best_response(actions: &[BetAction], payoffs: &[f64]) -> usize {
    let mut best = 0;
    for i in 1..payoffs.len() {
        if payoffs[i] > payoffs[best] || (payoffs[i] == payoffs[best] && actions[i].is_abstain()) {
            best = i;
        }
    }
    best
}

/// Worst payoff of one action across all outcomes.
pub fn worst_case_payoff(matrix: &PayoffMatrix, action: BetAction) -> Option<f64> {
    matrix
        .row(action)
        .map(|row| row.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Action maximizing the worst-case payoff across outcomes.
pub fn minimax(matrix: &PayoffMatrix) -> MinimaxResult {
    let actions = matrix.actions();
    let mut best: Option<(BetAction, f64)> = None;

    for (action, row) in actions.iter().zip(&matrix.rows) {
        let worst = row.iter().copied().fold(f64::INFINITY, f64::min);
        let better = match best {
            None => true,
            Some((a, w)) => worst > w || (worst == w && action.is_abstain() && !a.is_abstain()),
        };
        if better {
            best = Some((*action, worst));
        }
    }

    // Matrix construction guarantees at least one row.
    let (action, guaranteed_payoff) = best.unwrap_or((BetAction::Abstain, 0.0));
    MinimaxResult {
        action,
        distribution: StrategyDistribution::pure(actions, action),
        guaranteed_payoff,
    }
}

// =============================================================================
// Tests
// =============================================================================
