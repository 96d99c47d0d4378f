//! Paper (simulated) execution collaborator.
//!
//! Receives approved decisions, records them without placing real bets, and
//! settles them from an event results file. Settlement reports flow back to
//! the risk manager over a channel.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::models::{BettingDecision, SettlementReport, SettlementStatus};
use crate::errors::EngineError;

/// Final result of one event, as written to the results file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventResult {
    pub opportunity_id: String,
    /// Index of the winning outcome.
    #[serde(default)]
    pub winning_outcome: Option<usize>,
    #[serde(default)]
    pub void: bool,
}

impl EventResult {
    fn is_final(&self) -> bool {
        self.void || self.winning_outcome.is_some()
    }
}

pub fn parse_results(json: &str) -> Result<Vec<EventResult>, EngineError> {
    serde_json::from_str(json).map_err(|e| EngineError::Parse(format!("results: {e}")))
}

pub fn load_results(path: &Path) -> Result<Vec<EventResult>, EngineError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("{}: {e}", path.display())))?;
    parse_results(&raw)
}

/// Settlement of one decision against a final event result.
pub fn settlement_for(decision: &BettingDecision, result: &EventResult) -> SettlementReport {
    let (status, pnl) = if result.void {
        (SettlementStatus::Void, Decimal::ZERO)
    } else if result.winning_outcome.is_some() && result.winning_outcome == decision.action.outcome() {
        (SettlementStatus::Won, decision.potential_profit())
    } else {
        (SettlementStatus::Lost, -decision.stake)
    };
    SettlementReport::new(decision.decision_id.clone(), status, pnl)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaperPerformance {
    pub decisions: u64,
    pub open_decisions: usize,
    pub wins: u64,
    pub losses: u64,
    pub voids: u64,
    pub total_staked: Decimal,
    pub realized_pnl: Decimal,
}

impl PaperPerformance {
    pub fn win_rate(&self) -> f64 {
        let settled = self.wins + self.losses;
        if settled == 0 {
            0.0
        } else {
            self.wins as f64 / settled as f64
        }
    }
}

/// Paper executor that records decisions and settles them from results.
pub struct PaperExecutor {
    open: HashMap<String, Vec<BettingDecision>>,
    settlement_tx: mpsc::UnboundedSender<SettlementReport>,
    stats: PaperPerformance,
}

impl PaperExecutor {
    pub fn new(settlement_tx: mpsc::UnboundedSender<SettlementReport>) -> Self {
        Self {
            open: HashMap::new(),
            settlement_tx,
            stats: PaperPerformance::default(),
        }
    }

    /// Record a decision as placed.
    pub fn execute(&mut self, decision: BettingDecision) {
        info!(
            decision_id = %decision.decision_id,
            opportunity_id = %decision.opportunity_id,
            strategy = %decision.strategy,
            odds = %decision.odds,
            stake = %decision.stake,
            potential_profit = %decision.potential_profit(),
            "[PAPER] Bet placed"
        );
        self.stats.decisions += 1;
        self.stats.total_staked += decision.stake;
        self.open
            .entry(decision.opportunity_id.clone())
            .or_default()
            .push(decision);
    }

    /// Settle every open decision whose event has a final result. Returns the
    /// reports, which are also sent on the settlement channel.
    pub fn apply_results(&mut self, results: &[EventResult]) -> Vec<SettlementReport> {
        let mut reports = Vec::new();
        for result in results.iter().filter(|r| r.is_final()) {
            let Some(decisions) = self.open.remove(&result.opportunity_id) else {
                continue;
            };
            for decision in &decisions {
                let report = settlement_for(decision, result);
                match report.status {
                    SettlementStatus::Won => self.stats.wins += 1,
                    SettlementStatus::Lost => self.stats.losses += 1,
                    SettlementStatus::Void | SettlementStatus::Rejected => self.stats.voids += 1,
                }
                self.stats.realized_pnl += report.realized_pnl;
                info!(
                    decision_id = %report.decision_id,
                    opportunity_id = %result.opportunity_id,
                    status = ?report.status,
                    pnl = %report.realized_pnl,
                    "[PAPER] Bet settled"
                );
                if self.settlement_tx.send(report.clone()).is_err() {
                    warn!(decision_id = %report.decision_id, "Settlement channel closed");
                }
                reports.push(report);
            }
        }
        reports
    }

    /// Record every decision already queued on the channel.
    pub fn drain(&mut self, decisions_rx: &mut mpsc::UnboundedReceiver<BettingDecision>) -> usize {
        let mut count = 0;
        while let Ok(decision) = decisions_rx.try_recv() {
            self.execute(decision);
            count += 1;
        }
        count
    }

    pub fn performance(&self) -> PaperPerformance {
        PaperPerformance {
            open_decisions: self.open.values().map(Vec::len).sum(),
            ..self.stats.clone()
        }
    }

    /// Run until cancelled or the decision channel closes, polling the results
    /// file (when configured) every `poll_interval`.
    pub fn spawn(
        mut self,
        mut decisions_rx: mpsc::UnboundedReceiver<BettingDecision>,
        results_path: Option<PathBuf>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<PaperPerformance> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,
                    decision = decisions_rx.recv() => match decision {
                        Some(decision) => self.execute(decision),
                        None => break,
                    },
                    _ = ticker.tick() => {
                        let Some(path) = results_path.as_deref() else { continue };
                        if self.open.is_empty() {
                            continue;
                        }
                        match load_results(path) {
                            Ok(results) => {
                                self.apply_results(&results);
                            }
                            Err(e) => debug!(error = %e, "Results not available"),
                        }
                    }
                }
            }
            let drained = self.drain(&mut decisions_rx);
            if drained > 0 {
                info!(drained, "[PAPER] Recorded decisions queued at shutdown");
            }
            let perf = self.performance();
            info!(performance = ?perf, win_rate = perf.win_rate(), "[PAPER] Executor stopped");
            perf
        })
    }
}
