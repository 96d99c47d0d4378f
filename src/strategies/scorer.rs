//! Opportunity ranking.
//!
//! Each game is scored on its best single back bet:
//!
//! ```text
//!     score = 0.4 * EV + 0.3 * confidence + 0.3 * stability
//! ```
//!
//! where EV = p * D - 1 for the outcome with the highest EV, and stability is
//! a Sharpe-like ratio EV / sd clamped to [-1, 1], with
//! sd = D * sqrt(p * (1 - p)) the spread of the unit-stake return.
//!
//! Games under the tier's confidence or EV floor are dropped before ranking.
//! Ties break on higher confidence, then earlier start time.

use std::cmp::Ordering;
use tracing::debug;

use crate::data::models::GameState;
use crate::strategies::tiers::BettingStrategyConfig;

const EV_WEIGHT: f64 = 0.4;
const CONFIDENCE_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct ScoredOpportunity {
    pub game: GameState,
    pub best_outcome: usize,
    pub expected_value: f64,
    pub confidence: f64,
    pub stability: f64,
    pub score: f64,
}

/// Expected value per unit staked for each outcome.
pub fn outcome_expected_values(probabilities: &[f64], odds: &[f64]) -> Vec<f64> {
    probabilities
        .iter()
        .zip(odds)
        .map(|(p, d)| p * d - 1.0)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct OpportunityScorer;

impl OpportunityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score one game, or None if it has no outcomes.
    pub fn score(&self, game: &GameState) -> Option<ScoredOpportunity> {
        let probabilities = game.adjusted_probabilities();
        let odds = game.odds_f64();
        let evs = outcome_expected_values(&probabilities, &odds);

        let (best_outcome, expected_value) = evs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))?;

        let p = probabilities[best_outcome];
        let sd = odds[best_outcome] * (p * (1.0 - p)).sqrt();
        let stability = if sd > 0.0 {
            (expected_value / sd).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let confidence = game.confidence;
        let score =
            EV_WEIGHT * expected_value + CONFIDENCE_WEIGHT * confidence + STABILITY_WEIGHT * stability;

        Some(ScoredOpportunity {
            game: game.clone(),
            best_outcome,
            expected_value,
            confidence,
            stability,
            score,
        })
    }

    /// Filter by the tier's floors and rank best first.
    pub fn rank(&self, games: &[GameState], config: &BettingStrategyConfig) -> Vec<ScoredOpportunity> {
        let mut ranked: Vec<ScoredOpportunity> = games
            .iter()
            .filter_map(|g| self.score(g))
            .filter(|o| {
                let keep = o.confidence >= config.min_confidence_threshold
                    && o.expected_value >= config.min_expected_value;
                if !keep {
                    debug!(
                        opportunity_id = %o.game.opportunity_id,
                        confidence = o.confidence,
                        expected_value = o.expected_value,
                        "Opportunity below thresholds, filtered"
                    );
                }
                keep
            })
            .collect();

        ranked.sort_by(compare_ranked);
        ranked
    }
}

fn compare_ranked(a: &ScoredOpportunity, b: &ScoredOpportunity) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| match (a.game.starts_at, b.game.starts_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}
