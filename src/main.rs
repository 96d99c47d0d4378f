//! Strategic Wagering Decision Engine
//!
//! Turns externally supplied outcome probabilities and market odds into
//! risk-bounded staking decisions.
//!
//! Architecture:
//! - Tokio async runtime with one scheduled decision loop
//! - Damped best-response equilibrium search with a minimax companion
//! - Fractional Kelly sizing under tiered bankroll limits and circuit breakers
//! - Paper execution settled from an event results file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wager_engine::config::{Settings, TradingMode};
use wager_engine::data::predictions::{load_predictions, PredictionBatch};
use wager_engine::execution::paper_executor::PaperExecutor;
use wager_engine::risk::position_sizer::KellySizer;
use wager_engine::risk::risk_manager::RiskManager;
use wager_engine::strategies::engine::StrategyEngine;
use wager_engine::strategies::runner::StrategyRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration.
    let settings = Settings::from_env();

    // Initialize logging.
    init_logging(&settings);

    info!("=== Strategic Wagering Decision Engine ===");

    // Validate settings.
    if let Err(errors) = settings.validate() {
        for e in &errors {
            error!(error = %e, "Configuration error");
        }
        anyhow::bail!("Configuration validation failed");
    }
    let is_paper = settings.trading_mode == TradingMode::Paper;
    info!(
        trading_mode = ?settings.trading_mode,
        initial_balance = %settings.initial_balance,
        predictions_path = ?settings.predictions_path,
        results_path = ?settings.results_path,
        "Configuration loaded"
    );

    // Risk manager owns the bankroll.
    let strategy_config = settings.strategy_config();
    let risk = Arc::new(RiskManager::new(strategy_config, settings.initial_balance)?);

    // Channels between the loop and its collaborators.
    let (decision_tx, decision_rx) = mpsc::unbounded_channel();
    let (settlement_tx, settlement_rx) = mpsc::unbounded_channel();
    let (predictions_tx, predictions_rx) = mpsc::channel::<PredictionBatch>(4);

    let engine = StrategyEngine::new(
        risk.clone(),
        settings.equilibrium_model(),
        KellySizer::new(settings.kelly_max_fraction),
        settings.min_stake,
    )
    .with_decision_sink(decision_tx);

    let runner = StrategyRunner::new(
        engine,
        settings.runner_config(),
        predictions_rx,
        settlement_rx,
    );
    let (handle, loop_task) = runner.start();

    // =========================================================================
    // Collaborators
    // =========================================================================
    let poll_interval = Duration::from_secs_f64(settings.file_poll_interval_secs);
    let cancel = CancellationToken::new();

    if is_paper {
        info!("Paper executor initialized (NO real bets will be placed)");
    }
    let executor_task = PaperExecutor::new(settlement_tx).spawn(
        decision_rx,
        settings.results_path.clone(),
        poll_interval,
        cancel.clone(),
    );

    let poller_task = match settings.predictions_path.clone() {
        Some(path) => Some(tokio::spawn(poll_predictions(
            path,
            poll_interval,
            predictions_tx,
            cancel.clone(),
        ))),
        None => {
            warn!("PREDICTIONS_PATH not set, no predictions will be ingested");
            drop(predictions_tx);
            None
        }
    };

    // Periodic status line.
    tokio::spawn(
        handle
            .clone()
            .log_status(Duration::from_secs_f64(settings.status_log_interval_secs)),
    );

    // Shutdown signals: ctrl-c stops gracefully, SIGTERM also closes the day.
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl+c");
            return;
        }
        info!("Shutdown signal received");
        shutdown_handle.stop();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let terminate_handle = handle.clone();
                tokio::spawn(async move {
                    if sigterm.recv().await.is_some() {
                        warn!("SIGTERM received, emergency stop");
                        terminate_handle.terminate("SIGTERM");
                    }
                });
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    }

    // Wait for the decision loop to finish.
    let loop_result = loop_task.await;

    info!("Shutting down...");
    cancel.cancel();
    if let Some(task) = poller_task {
        let _ = task.await;
    }
    match executor_task.await {
        Ok(perf) => info!(performance = ?perf, "Final paper performance"),
        Err(e) => warn!(error = %e, "Paper executor task failed"),
    }
    info!(status = ?handle.status(), "Final engine status");

    match loop_result {
        Ok(Ok(())) => {
            info!("Engine shutdown complete.");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(e.into()),
    }
}

/// Reload the predictions file whenever it changes and hand the batch to the loop.
async fn poll_predictions(
    path: PathBuf,
    interval: Duration,
    tx: mpsc::Sender<PredictionBatch>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_modified: Option<SystemTime> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                if modified.is_none() || modified == last_modified {
                    continue;
                }
                match load_predictions(&path) {
                    Ok(batch) => {
                        debug!(records = batch.len(), path = %path.display(), "Predictions loaded");
                        last_modified = modified;
                        if tx.send(batch).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to load predictions"),
                }
            }
        }
    }
}

fn init_logging(settings: &Settings) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    if settings.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
