//! Scheduled decision loop and operational controls.
//!
//! A single long-lived task runs one engine cycle per interval tick while
//! inside the trading window. Prediction batches and settlement reports
//! arrive on channels. Cancellation is observed only between cycles, so a
//! stop never aborts a decision halfway.

use chrono::{NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data::models::SettlementReport;
use crate::data::predictions::PredictionBatch;
use crate::errors::EngineError;
use crate::risk::circuit_breaker::TradingState;
use crate::risk::risk_manager::{RiskManager, SettleOutcome};
use crate::state::bankroll::BankrollStatus;
use crate::strategies::tiers::{BettingStrategyConfig, RiskTier};

use super::engine::StrategyEngine;

/// UTC hours during which cycles run. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TradingWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub cycle_interval: Duration,
    pub trading_window: Option<TradingWindow>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(600),
            trading_window: None,
        }
    }
}

/// Status snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub bankroll: BankrollStatus,
    pub trading_state: TradingState,
    pub tier: RiskTier,
    pub running: bool,
    pub cycles: u64,
}

/// Cloneable control surface for a running loop.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    risk: Arc<RiskManager>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
}

impl EngineHandle {
    /// Graceful stop: the in-flight cycle finishes, no new cycle starts.
    pub fn stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Close trading for the rest of the day; the loop keeps running.
    pub fn emergency_stop(&self, reason: &str) {
        self.risk.emergency_stop(reason);
    }

    /// Close the day, then stop the loop.
    pub fn terminate(&self, reason: &str) {
        self.emergency_stop(reason);
        self.stop();
    }

    pub fn switch_tier(&self, config: BettingStrategyConfig) {
        self.risk.switch_tier(config);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            bankroll: self.risk.status(),
            trading_state: self.risk.state(),
            tier: self.risk.config().tier,
            running: self.is_running(),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }

    /// Log a status line every `every` until the loop stops. Returns the
    /// number of lines written.
    pub async fn log_status(self, every: Duration) -> u64 {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reports = 0;
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    let status = self.status();
                    info!(
                        balance = %status.bankroll.current_balance,
                        daily_pnl = %status.bankroll.daily_pnl,
                        open_exposure = %status.bankroll.open_exposure,
                        decisions_today = status.bankroll.decisions_today,
                        state = %status.trading_state,
                        tier = %status.tier,
                        cycles = status.cycles,
                        "Engine status"
                    );
                    reports += 1;
                }
            }
        }
        reports
    }
}

/// Owns the engine and its input channels.
pub struct StrategyRunner {
    engine: StrategyEngine,
    config: RunnerConfig,
    predictions_rx: mpsc::Receiver<PredictionBatch>,
    settlements_rx: mpsc::UnboundedReceiver<SettlementReport>,
}

impl StrategyRunner {
    pub fn new(
        engine: StrategyEngine,
        config: RunnerConfig,
        predictions_rx: mpsc::Receiver<PredictionBatch>,
        settlements_rx: mpsc::UnboundedReceiver<SettlementReport>,
    ) -> Self {
        Self {
            engine,
            config,
            predictions_rx,
            settlements_rx,
        }
    }

    /// Spawn the loop. The join handle resolves when the loop exits; it is an
    /// error only when a fatal bankroll condition stopped it.
    pub fn start(self) -> (EngineHandle, JoinHandle<Result<(), EngineError>>) {
        let handle = EngineHandle {
            risk: self.engine.risk().clone(),
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(true)),
            cycles: Arc::new(AtomicU64::new(0)),
        };
        let task_handle = handle.clone();
        let join = tokio::spawn(async move {
            let result = self.run(&task_handle).await;
            task_handle.running.store(false, Ordering::SeqCst);
            result
        });
        (handle, join)
    }

    async fn run(mut self, handle: &EngineHandle) -> Result<(), EngineError> {
        let risk = self.engine.risk().clone();
        let mut ticker = tokio::time::interval(self.config.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pending: Option<PredictionBatch> = None;
        let mut trading_day = risk.status().trading_day;

        info!(
            cycle_interval_s = self.config.cycle_interval.as_secs_f64(),
            trading_window = ?self.config.trading_window,
            "Strategy loop starting"
        );

        loop {
            tokio::select! {
                biased;

                _ = handle.cancel.cancelled() => {
                    info!("Strategy loop received shutdown signal");
                    break;
                }
                Some(report) = self.settlements_rx.recv() => {
                    match risk.settle(&report) {
                        Ok(SettleOutcome::Applied) | Ok(SettleOutcome::Ignored(_)) => {}
                        Err(e) => {
                            error!(error = %e, "Fatal settlement, stopping strategy loop");
                            return Err(e);
                        }
                    }
                }
                Some(batch) = self.predictions_rx.recv() => {
                    debug!(records = batch.len(), "Prediction batch received");
                    pending = Some(batch);
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    roll_day(&risk, &mut trading_day, now.date_naive())?;

                    if let Some(window) = self.config.trading_window {
                        if !window.contains(now.hour()) {
                            debug!(hour = now.hour(), "Outside trading window, skipping cycle");
                            continue;
                        }
                    }

                    let Some(batch) = pending.take() else {
                        debug!("No new predictions, skipping cycle");
                        continue;
                    };

                    match self.engine.run_cycle(batch) {
                        Ok(_) => {
                            handle.cycles.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Fatal cycle error, stopping strategy loop");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "Cycle failed"),
                    }
                }
            }
        }

        info!(status = ?handle.status().bankroll, "Strategy loop stopped");
        Ok(())
    }
}

fn roll_day(
    risk: &RiskManager,
    trading_day: &mut NaiveDate,
    today: NaiveDate,
) -> Result<(), EngineError> {
    if today != *trading_day {
        risk.start_new_day(today)?;
        *trading_day = today;
    }
    Ok(())
}
