//! Strategy engine: runs one decision cycle.
//!
//! Ranked opportunities are evaluated in order: equilibrium solve, Kelly
//! sizing on the chosen outcome, resize to the current limits, then risk
//! approval. Approved decisions are forwarded to the execution collaborator.
//! Each opportunity is isolated: an input error skips that opportunity only.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data::models::{BetAction, BettingDecision, GameState};
use crate::data::predictions::{ingest, PredictionBatch};
use crate::errors::{EngineError, RiskLimitExceeded};
use crate::risk::position_sizer::KellySizer;
use crate::risk::risk_manager::{ApprovalRequest, RiskManager, StakeLimits};
use crate::strategies::tiers::BettingStrategyConfig;

use super::equilibrium::{worst_case_payoff, EquilibriumModel, PayoffMatrix};
use super::scorer::{OpportunityScorer, ScoredOpportunity};

/// Decimal places kept when a probability crosses into money math.
const PROBABILITY_DP: u32 = 6;

/// Summary of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub decisions: Vec<BettingDecision>,
    pub evaluated: usize,
    pub abstained: usize,
    pub rejected: Vec<(String, RiskLimitExceeded)>,
    pub failed: Vec<(String, EngineError)>,
    pub stopped_early: bool,
}

/// What the pure part of an evaluation proposes.
#[derive(Debug)]
enum Proposal {
    Abstain(&'static str),
    Stake(BettingDecision, ApprovalRequest),
}

/// The strategy engine orchestrates scoring, solving, sizing and approval.
pub struct StrategyEngine {
    risk: Arc<RiskManager>,
    model: EquilibriumModel,
    sizer: KellySizer,
    scorer: OpportunityScorer,
    min_stake: Decimal,
    decision_tx: Option<mpsc::UnboundedSender<BettingDecision>>,
}

impl StrategyEngine {
    pub fn new(
        risk: Arc<RiskManager>,
        model: EquilibriumModel,
        sizer: KellySizer,
        min_stake: Decimal,
    ) -> Self {
        Self {
            risk,
            model,
            sizer,
            scorer: OpportunityScorer::new(),
            min_stake,
            decision_tx: None,
        }
    }

    /// Forward approved decisions to an execution collaborator.
    pub fn with_decision_sink(mut self, tx: mpsc::UnboundedSender<BettingDecision>) -> Self {
        self.decision_tx = Some(tx);
        self
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    /// Validate a prediction batch and run a cycle over it.
    /// Fails only when the bankroll is halted.
    pub fn run_cycle(&self, batch: impl Into<PredictionBatch>) -> Result<CycleReport, EngineError> {
        if self.risk.is_halted() {
            return Err(EngineError::BankrollCorrupted(
                "risk manager halted, cycle refused".to_string(),
            ));
        }

        let ingested = ingest(batch);
        let mut report = self.evaluate_games(&ingested.games);
        report.failed.extend(ingested.rejected);

        info!(
            decisions = report.decisions.len(),
            evaluated = report.evaluated,
            abstained = report.abstained,
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            stopped_early = report.stopped_early,
            "Decision cycle complete"
        );
        Ok(report)
    }

    /// Rank and evaluate already-validated games.
    pub fn evaluate_games(&self, games: &[GameState]) -> CycleReport {
        let config = self.risk.config();
        let ranked = self.scorer.rank(games, &config);
        let mut report = CycleReport::default();

        for opportunity in &ranked {
            let id = opportunity.game.opportunity_id.clone();

            let limits = self.risk.limits();
            if !limits.can_trade() {
                debug!(blocked = ?limits.blocked, remaining = limits.decisions_remaining, "Trading blocked, ending cycle");
                report.stopped_early = true;
                break;
            }
            if limits.exposure_headroom < self.min_stake {
                debug!(headroom = %limits.exposure_headroom, "Exposure headroom exhausted, ending cycle");
                report.stopped_early = true;
                break;
            }

            report.evaluated += 1;
            match self.propose(opportunity, &config, &limits) {
                Ok(Proposal::Abstain(reason)) => {
                    debug!(opportunity_id = %id, reason, "Abstaining");
                    report.abstained += 1;
                }
                Ok(Proposal::Stake(decision, request)) => match self.risk.approve(&request) {
                    Ok(()) => {
                        info!(
                            decision_id = %decision.decision_id,
                            opportunity_id = %id,
                            strategy = %decision.strategy,
                            odds = %decision.odds,
                            stake = %decision.stake,
                            expected_value = decision.expected_value,
                            "Decision emitted"
                        );
                        if let Some(tx) = &self.decision_tx {
                            if tx.send(decision.clone()).is_err() {
                                warn!(decision_id = %decision.decision_id, "Execution channel closed");
                            }
                        }
                        report.decisions.push(decision);
                    }
                    Err(reason) => {
                        debug!(opportunity_id = %id, reason = %reason, "Decision rejected by risk manager");
                        report.rejected.push((id, reason));
                    }
                },
                Err(e) => {
                    warn!(opportunity_id = %id, error = %e, "Opportunity evaluation failed, skipping");
                    report.failed.push((id, e));
                }
            }
        }

        report
    }

    fn propose(
        &self,
        opportunity: &ScoredOpportunity,
        config: &BettingStrategyConfig,
        limits: &StakeLimits,
    ) -> Result<Proposal, EngineError> {
        let game = &opportunity.game;
        let probabilities = game.adjusted_probabilities();
        let matrix = PayoffMatrix::for_game(game);
        let equilibrium = self.model.solve(&matrix, &probabilities)?;

        let action = equilibrium.chosen_action();
        let Some(outcome) = action.outcome() else {
            return Ok(Proposal::Abstain("equilibrium favours abstaining"));
        };

        let odds = game.market_odds[outcome];
        let win_probability = to_decimal(probabilities[outcome])?;
        let fraction = self.sizer.size(win_probability, odds, config.kelly_fraction)?;
        if fraction <= Decimal::ZERO {
            return Ok(Proposal::Abstain("no positive edge"));
        }

        let stake = (fraction * limits.balance * limits.stake_multiplier)
            .min(limits.max_bet)
            .min(limits.exposure_headroom)
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if stake < self.min_stake || stake <= Decimal::ZERO {
            return Ok(Proposal::Abstain("stake below minimum"));
        }

        let worst = worst_case_payoff(&matrix, action).unwrap_or(-1.0);
        let worst_case_loss_per_unit = to_decimal((-worst).max(0.0))?;

        let odds_f = odds.to_f64().unwrap_or(1.0);
        let expected_value = probabilities[outcome] * odds_f - 1.0;
        let confidence = opportunity.confidence * equilibrium.confidence_factor();
        let strategy = game.action_label(action);
        let minimax = &equilibrium.minimax;

        let rationale = format!(
            "{strategy} @ {odds}: p={:.3} vs implied {:.3}, EV {:+.3}/unit, kelly {:.4} x{}, \
             risk {:?}, CI [{:+.3}, {:+.3}], minimax {} ({:+.3}){}",
            probabilities[outcome],
            1.0 / odds_f,
            expected_value,
            fraction,
            limits.stake_multiplier,
            equilibrium.risk,
            equilibrium.confidence_interval.0,
            equilibrium.confidence_interval.1,
            game.action_label(minimax.action),
            minimax.guaranteed_payoff,
            if equilibrium.converged() { "" } else { ", not converged" },
        );

        let decision_id = Uuid::new_v4().to_string();
        let request = ApprovalRequest {
            decision_id: decision_id.clone(),
            opportunity_id: game.opportunity_id.clone(),
            stake,
            worst_case_loss_per_unit,
        };
        let decision = BettingDecision {
            decision_id,
            opportunity_id: game.opportunity_id.clone(),
            strategy,
            action: BetAction::Back(outcome),
            odds,
            stake,
            expected_value,
            confidence,
            rationale,
            created_at: Utc::now(),
        };

        Ok(Proposal::Stake(decision, request))
    }
}

fn to_decimal(value: f64) -> Result<Decimal, EngineError> {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp(PROBABILITY_DP))
        .ok_or_else(|| EngineError::InvalidProbability(format!("{value} is not representable")))
}
