//! Decision engine tests.
//!
//! Every sizing and limit test carries a hand-calculated expected value
//! comment so that any formula regression is caught before it stakes money.
//!
//! Modules under test:
//!   1. Kelly sizer                    (src/risk/position_sizer.rs)
//!   2. Equilibrium model              (src/strategies/equilibrium.rs)
//!   3. Opportunity scorer             (src/strategies/scorer.rs)
//!   4. Risk manager + circuit breaker (src/risk/risk_manager.rs)
//!   5. Strategy engine end to end     (src/strategies/engine.rs)
//!   6. Runner loop                    (src/strategies/runner.rs)

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

use wager_engine::data::models::{
    Adjustments, BetAction, GameState, SettlementReport, SettlementStatus,
};
use wager_engine::data::predictions::{PredictionBatch, PredictionRecord};
use wager_engine::errors::{EngineError, RiskLimitExceeded, SettlementConflict};
use wager_engine::risk::circuit_breaker::TradingState;
use wager_engine::risk::position_sizer::KellySizer;
use wager_engine::risk::risk_manager::{ApprovalRequest, RiskManager, SettleOutcome};
use wager_engine::strategies::engine::StrategyEngine;
use wager_engine::strategies::equilibrium::{
    minimax, worst_case_payoff, EquilibriumModel, PayoffMatrix, RiskLabel,
};
use wager_engine::strategies::runner::{RunnerConfig, StrategyRunner};
use wager_engine::strategies::scorer::OpportunityScorer;
use wager_engine::strategies::tiers::{BettingStrategyConfig, RiskTier};

// =============================================================================
// Helpers
// =============================================================================

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 9).unwrap()
}

fn labels(n: usize) -> Vec<String> {
    ["home", "away", "draw"][..n].iter().map(|s| s.to_string()).collect()
}

fn game(id: &str, probs: &[f64], odds: &[Decimal]) -> GameState {
    GameState::new(id, labels(probs.len()), probs.to_vec(), odds.to_vec()).unwrap()
}

fn record(id: &str, probs: &[f64], odds: &[Decimal]) -> PredictionRecord {
    PredictionRecord {
        opportunity_id: id.to_string(),
        outcome_labels: labels(probs.len()),
        outcome_probabilities: probs.to_vec(),
        market_odds: odds.to_vec(),
        confidence: None,
        starts_at: None,
        adjustments: Adjustments::default(),
    }
}

fn manager(config: BettingStrategyConfig, balance: Decimal) -> RiskManager {
    RiskManager::with_trading_day(config, balance, day()).unwrap()
}

fn approve(rm: &RiskManager, id: &str, stake: Decimal) -> Result<(), RiskLimitExceeded> {
    rm.approve(&ApprovalRequest::back_bet(
        format!("d-{id}"),
        format!("g-{id}"),
        stake,
    ))
}

fn settle(rm: &RiskManager, id: &str, pnl: Decimal) -> Result<SettleOutcome, EngineError> {
    let status = if pnl > Decimal::ZERO {
        SettlementStatus::Won
    } else {
        SettlementStatus::Lost
    };
    rm.settle(&SettlementReport::new(format!("d-{id}"), status, pnl))
}

/// Moderate tier with the quarter-Kelly multiplier used in the worked examples.
fn quarter_kelly() -> BettingStrategyConfig {
    BettingStrategyConfig {
        kelly_fraction: dec!(0.25),
        ..BettingStrategyConfig::moderate()
    }
}

fn engine(risk: Arc<RiskManager>) -> StrategyEngine {
    StrategyEngine::new(
        risk,
        EquilibriumModel::default(),
        KellySizer::default(),
        dec!(1),
    )
}

// =============================================================================
// 1. Kelly sizer
// =============================================================================

#[test]
fn test_kelly_even_money_edge() {
    // p = 0.6, D = 2.0: b = 1, f* = (1*0.6 - 0.4) / 1 = 0.2
    let f = KellySizer::full_kelly(dec!(0.6), dec!(2.0)).unwrap();
    assert_eq!(f, dec!(0.2));

    // quarter Kelly: 0.2 * 0.25 = 0.05
    let sized = KellySizer::default().size(dec!(0.6), dec!(2.0), dec!(0.25)).unwrap();
    assert_eq!(sized, dec!(0.05));
}

#[test]
fn test_kelly_short_odds() {
    // p = 0.6, D = 1.8: b = 0.8, f* = (0.48 - 0.4) / 0.8 = 0.1
    // quarter Kelly: 0.1 * 0.25 = 0.025
    let sized = KellySizer::default().size(dec!(0.6), dec!(1.8), dec!(0.25)).unwrap();
    assert_eq!(sized, dec!(0.025));
}

#[test]
fn test_kelly_no_edge_sizes_zero() {
    // p = 0.5, D = 1.9: b = 0.9, f* = (0.45 - 0.5) / 0.9 < 0 -> 0
    let sized = KellySizer::default().size(dec!(0.5), dec!(1.9), dec!(1)).unwrap();
    assert_eq!(sized, Decimal::ZERO);

    // Fair price, zero edge: p = 0.5, D = 2.0 -> f* = 0
    let sized = KellySizer::default().size(dec!(0.5), dec!(2.0), dec!(1)).unwrap();
    assert_eq!(sized, Decimal::ZERO);
}

#[test]
fn test_kelly_hard_ceiling() {
    // p = 0.9, D = 3.0: b = 2, f* = (1.8 - 0.1) / 2 = 0.85, full Kelly
    // clamped to the 10% ceiling.
    let sized = KellySizer::default().size(dec!(0.9), dec!(3.0), dec!(1)).unwrap();
    assert_eq!(sized, dec!(0.10));

    // A tighter ceiling wins over any multiplier.
    let sized = KellySizer::new(dec!(0.05)).size(dec!(0.9), dec!(3.0), dec!(0.75)).unwrap();
    assert_eq!(sized, dec!(0.05));
}

#[test]
fn test_kelly_rejects_invalid_odds() {
    let sizer = KellySizer::default();
    assert!(matches!(
        sizer.size(dec!(0.6), dec!(1.0), dec!(0.5)),
        Err(EngineError::InvalidOdds(_))
    ));
    assert!(matches!(
        sizer.size(dec!(0.6), dec!(0.5), dec!(0.5)),
        Err(EngineError::InvalidOdds(_))
    ));
    assert!(matches!(
        sizer.size(dec!(1.2), dec!(2.0), dec!(0.5)),
        Err(EngineError::InvalidProbability(_))
    ));
}

// =============================================================================
// 2. Equilibrium model
// =============================================================================

#[test]
fn test_equilibrium_backs_positive_edge() {
    // EV(back home) = 0.6*1.8 - 1 = +0.08, EV(back away) = 0.4*2.2 - 1 = -0.12
    let g = game("g1", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]);
    let matrix = PayoffMatrix::for_game(&g);
    let result = EquilibriumModel::default().solve(&matrix, &[0.6, 0.4]).unwrap();

    assert_eq!(result.chosen_action(), BetAction::Back(0));
    assert!(result.converged());
    assert!(result.iterations < 100);
    assert!((result.distribution.total() - 1.0).abs() < 1e-9);
    assert!(result.distribution.probability(BetAction::Back(0)) > 0.99);

    // Nearly pure back: expected payoff just under 0.08, MEDIUM risk.
    assert!(result.expected_payoff > 0.07 && result.expected_payoff < 0.08 + 1e-9);
    assert_eq!(result.risk, RiskLabel::Medium);
    let (lo, hi) = result.confidence_interval;
    assert!(lo < result.expected_payoff && result.expected_payoff < hi);
}

#[test]
fn test_equilibrium_abstains_without_edge() {
    // EV(home) = 0.45*2.0 - 1 = -0.10, EV(away) = 0.55*1.7 - 1 = -0.065
    let g = game("g1", &[0.45, 0.55], &[dec!(2.0), dec!(1.7)]);
    let matrix = PayoffMatrix::for_game(&g);
    let result = EquilibriumModel::default().solve(&matrix, &[0.45, 0.55]).unwrap();

    assert_eq!(result.chosen_action(), BetAction::Abstain);
    assert!((result.distribution.total() - 1.0).abs() < 1e-9);
}

#[test]
fn test_equilibrium_three_way_market() {
    // EVs: 0.5*2.2 - 1 = 0.10, 0.3*3.0 - 1 = -0.10, 0.2*4.0 - 1 = -0.20
    let g = game("g3", &[0.5, 0.3, 0.2], &[dec!(2.2), dec!(3.0), dec!(4.0)]);
    let matrix = PayoffMatrix::for_game(&g);
    assert_eq!(matrix.actions().len(), 4);

    let result = EquilibriumModel::default()
        .solve(&matrix, &[0.5, 0.3, 0.2])
        .unwrap();
    assert_eq!(result.chosen_action(), BetAction::Back(0));
    assert_eq!(result.distribution.entries().len(), 4);
    assert!((result.distribution.total() - 1.0).abs() < 1e-9);
}

#[test]
fn test_equilibrium_iteration_cap_returns_warning() {
    let g = game("g1", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]);
    let matrix = PayoffMatrix::for_game(&g);
    let model = EquilibriumModel::new(0.1, 1e-4, 5);
    let result = model.solve(&matrix, &[0.6, 0.4]).unwrap();

    // After 5 steps the best action holds 1 - (2/3)*0.9^5 = 0.606 of the mass.
    assert!(!result.converged());
    assert_eq!(result.warning.map(|w| w.iterations), Some(5));
    assert_eq!(result.confidence_factor(), 0.5);
    assert_eq!(result.chosen_action(), BetAction::Back(0));
    assert!((result.distribution.probability(BetAction::Back(0)) - 0.606).abs() < 1e-3);
    assert!((result.distribution.total() - 1.0).abs() < 1e-9);
}

#[test]
fn test_equilibrium_rejects_bad_probabilities() {
    let g = game("g1", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]);
    let matrix = PayoffMatrix::for_game(&g);
    let model = EquilibriumModel::default();

    assert!(matches!(
        model.solve(&matrix, &[0.7, 0.4]),
        Err(EngineError::InvalidProbability(_))
    ));
    assert!(matches!(
        model.solve(&matrix, &[0.5, 0.3, 0.2]),
        Err(EngineError::InvalidProbability(_))
    ));
    assert!(matches!(
        model.solve(&matrix, &[1.0, 0.0]),
        Err(EngineError::InvalidProbability(_))
    ));
}

#[test]
fn test_minimax_finds_guaranteed_row() {
    // A hedged position that pays in every outcome beats abstaining.
    let matrix = PayoffMatrix::new(
        vec![BetAction::Back(0), BetAction::Back(1), BetAction::Abstain],
        vec![vec![0.05, 0.02], vec![0.8, -1.0], vec![0.0, 0.0]],
    )
    .unwrap();
    let mm = minimax(&matrix);
    assert_eq!(mm.action, BetAction::Back(0));
    assert!((mm.guaranteed_payoff - 0.02).abs() < 1e-12);
    assert_eq!(mm.distribution.probability(BetAction::Back(0)), 1.0);
    assert_eq!(worst_case_payoff(&matrix, BetAction::Back(1)), Some(-1.0));
}

// =============================================================================
// 3. Opportunity scorer
// =============================================================================

#[test]
fn test_scorer_ranks_and_filters() {
    let config = BettingStrategyConfig::moderate();
    let games = vec![
        // EV 0.08, confidence 0.6:
        //   sd = 1.8*sqrt(0.24) = 0.8818, stability = 0.0907
        //   score = 0.032 + 0.18 + 0.0272 = 0.2392
        game("a", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]),
        // EV 0.12, confidence 0.7:
        //   sd = 1.6*sqrt(0.21) = 0.7332, stability = 0.1637
        //   score = 0.048 + 0.21 + 0.0491 = 0.3071
        game("b", &[0.7, 0.3], &[dec!(1.6), dec!(3.5)]),
        // Best EV -0.065: below the floor.
        game("c", &[0.45, 0.55], &[dec!(2.0), dec!(1.7)]),
    ];

    let ranked = OpportunityScorer::new().rank(&games, &config);
    let ids: Vec<&str> = ranked.iter().map(|o| o.game.opportunity_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert!((ranked[0].score - 0.3071).abs() < 1e-3);
    assert!((ranked[1].score - 0.2392).abs() < 1e-3);
    assert_eq!(ranked[1].best_outcome, 0);
}

#[test]
fn test_scorer_confidence_floor() {
    // EV 0.10 but supplied confidence 0.5 < 0.60 floor.
    let g = game("a", &[0.55, 0.45], &[dec!(2.0), dec!(2.0)])
        .with_confidence(0.5)
        .unwrap();
    let ranked = OpportunityScorer::new().rank(&[g], &BettingStrategyConfig::moderate());
    assert!(ranked.is_empty());
}

#[test]
fn test_scorer_ties_break_on_start_time() {
    let early = Utc.with_ymd_and_hms(2026, 2, 9, 18, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2026, 2, 9, 21, 0, 0).unwrap();
    let games = vec![
        game("none", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]),
        game("late", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]).with_start(late),
        game("early", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]).with_start(early),
    ];
    let ranked = OpportunityScorer::new().rank(&games, &BettingStrategyConfig::moderate());
    let ids: Vec<&str> = ranked.iter().map(|o| o.game.opportunity_id.as_str()).collect();
    assert_eq!(ids, vec!["early", "late", "none"]);
}

// =============================================================================
// 4. Risk manager
// =============================================================================

#[test]
fn test_rejects_non_positive_stake() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    assert_eq!(
        approve(&rm, "1", Decimal::ZERO),
        Err(RiskLimitExceeded::NonPositiveStake(Decimal::ZERO))
    );
    assert_eq!(rm.status().decisions_today, 0);
}

#[test]
fn test_max_bet_cap() {
    // Moderate: 5% of $1000 = $50.
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    assert!(matches!(
        approve(&rm, "1", dec!(60)),
        Err(RiskLimitExceeded::MaxBet { .. })
    ));
    assert!(approve(&rm, "2", dec!(50)).is_ok());
    assert_eq!(rm.status().open_exposure, dec!(50));
}

#[test]
fn test_max_exposure_cap() {
    // Moderate: 20% of $1000 = $200 total open exposure.
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    for i in 0..4 {
        approve(&rm, &i.to_string(), dec!(50)).unwrap();
    }
    // 200 + 50 > 200
    assert!(matches!(
        approve(&rm, "4", dec!(50)),
        Err(RiskLimitExceeded::MaxExposure { .. })
    ));
    assert_eq!(rm.status().open_exposure, dec!(200));
    assert_eq!(rm.limits().exposure_headroom, Decimal::ZERO);
}

#[test]
fn test_duplicate_opportunity_rejected() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(10)).unwrap();
    let second = rm.approve(&ApprovalRequest::back_bet("d-other", "g-1", dec!(10)));
    assert_eq!(
        second,
        Err(RiskLimitExceeded::DuplicateOpportunity("g-1".to_string()))
    );
}

#[test]
fn test_daily_decision_limit() {
    let config = BettingStrategyConfig {
        max_daily_bets: 2,
        ..BettingStrategyConfig::moderate()
    };
    let rm = manager(config, dec!(1000));
    approve(&rm, "1", dec!(10)).unwrap();
    approve(&rm, "2", dec!(10)).unwrap();
    assert_eq!(approve(&rm, "3", dec!(10)), Err(RiskLimitExceeded::MaxDailyBets(2)));
    assert_eq!(rm.limits().decisions_remaining, 0);
}

#[test]
fn test_loss_budget_cross_check() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(50)).unwrap();
    settle(&rm, "1", dec!(-50)).unwrap();

    // Balance 950, daily loss 50 (5.26% < 10%, still OPEN).
    // Budget = 10% * 950 - 50 = 45; max bet = 5% * 950 = 47.50.
    assert_eq!(rm.state(), TradingState::Open);
    assert_eq!(
        approve(&rm, "2", dec!(47)),
        Err(RiskLimitExceeded::LossBudget {
            loss: dec!(47),
            budget: dec!(45),
        })
    );

    // A hedged position with no worst-case loss passes.
    let hedged = ApprovalRequest {
        worst_case_loss_per_unit: Decimal::ZERO,
        ..ApprovalRequest::back_bet("d-3", "g-3", dec!(47))
    };
    assert!(rm.approve(&hedged).is_ok());
}

#[test]
fn test_stop_loss_trips_and_blocks() {
    // Conservative: max bet 2% = $20, stop-loss 5%.
    let rm = manager(BettingStrategyConfig::conservative(), dec!(1000));
    for id in ["1", "2", "3"] {
        approve(&rm, id, dec!(20)).unwrap();
    }
    settle(&rm, "1", dec!(-20)).unwrap(); // 20/980 = 2.04%
    settle(&rm, "2", dec!(-20)).unwrap(); // 40/960 = 4.17%
    assert_eq!(rm.state(), TradingState::Open);
    settle(&rm, "3", dec!(-20)).unwrap(); // 60/940 = 6.38% >= 5%

    assert_eq!(rm.state(), TradingState::StoppedLoss);
    let status = rm.status();
    assert!(status.stop_loss_hit);
    assert_eq!(status.current_balance, dec!(940));
    assert_eq!(status.daily_pnl, dec!(-60));
    assert_eq!(status.open_exposure, Decimal::ZERO);
    assert_eq!(approve(&rm, "4", dec!(5)), Err(RiskLimitExceeded::StoppedLoss));

    // Next day reopens.
    rm.start_new_day(day().succ_opt().unwrap()).unwrap();
    assert_eq!(rm.state(), TradingState::Open);
    assert!(approve(&rm, "4", dec!(5)).is_ok());
}

#[test]
fn test_profit_lock_is_advisory_by_default() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(50)).unwrap();
    // +250 -> balance 1250, ratio 250/1250 = 20% >= 20%
    settle(&rm, "1", dec!(250)).unwrap();

    assert_eq!(rm.state(), TradingState::ProfitLocked);
    assert!(rm.status().profit_target_hit);
    let limits = rm.limits();
    assert!(limits.can_trade());
    assert_eq!(limits.stake_multiplier, dec!(0.5));
    assert!(approve(&rm, "2", dec!(10)).is_ok());
}

#[test]
fn test_profit_lock_hard_stop() {
    let config = BettingStrategyConfig {
        profit_target_hard_stop: true,
        ..BettingStrategyConfig::moderate()
    };
    let rm = manager(config, dec!(1000));
    approve(&rm, "1", dec!(50)).unwrap();
    settle(&rm, "1", dec!(250)).unwrap();

    assert_eq!(rm.state(), TradingState::ProfitLocked);
    assert_eq!(approve(&rm, "2", dec!(10)), Err(RiskLimitExceeded::ProfitLocked));
    assert!(!rm.limits().can_trade());
}

#[test]
fn test_settlement_is_idempotent() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(25)).unwrap();

    // Won at 1.8: 25 * 0.8 = 20
    assert_eq!(settle(&rm, "1", dec!(20)).unwrap(), SettleOutcome::Applied);
    assert_eq!(
        settle(&rm, "1", dec!(20)).unwrap(),
        SettleOutcome::Ignored(SettlementConflict::AlreadySettled("d-1".to_string()))
    );
    assert!(matches!(
        settle(&rm, "1", dec!(-25)).unwrap(),
        SettleOutcome::Ignored(SettlementConflict::Contradictory { .. })
    ));
    assert_eq!(
        settle(&rm, "nope", dec!(5)).unwrap(),
        SettleOutcome::Ignored(SettlementConflict::UnknownDecision("d-nope".to_string()))
    );

    let status = rm.status();
    assert_eq!(status.current_balance, dec!(1020));
    assert_eq!(status.total_pnl, dec!(20));
    assert_eq!(status.open_exposure, Decimal::ZERO);
}

#[test]
fn test_void_settlement_releases_exposure() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(30)).unwrap();
    let report = SettlementReport::new("d-1", SettlementStatus::Void, Decimal::ZERO);
    assert_eq!(rm.settle(&report).unwrap(), SettleOutcome::Applied);
    let status = rm.status();
    assert_eq!(status.open_exposure, Decimal::ZERO);
    assert_eq!(status.current_balance, dec!(1000));
}

#[test]
fn test_corrupted_bankroll_halts() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(50)).unwrap();

    let err = settle(&rm, "1", dec!(-2000)).unwrap_err();
    assert!(matches!(err, EngineError::BankrollCorrupted(_)));
    assert!(err.is_fatal());
    assert!(rm.is_halted());
    assert_eq!(rm.state(), TradingState::Closed);
    assert!(matches!(approve(&rm, "2", dec!(10)), Err(RiskLimitExceeded::Closed(_))));

    // Day reset alone cannot clear a fatal halt.
    assert!(rm.start_new_day(day().succ_opt().unwrap()).is_err());

    rm.operator_reset(dec!(500)).unwrap();
    rm.start_new_day(day().succ_opt().unwrap()).unwrap();
    assert!(!rm.is_halted());
    assert!(approve(&rm, "2", dec!(10)).is_ok());
}

#[test]
fn test_emergency_stop_closes_for_the_day() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    rm.emergency_stop("operator request");
    assert_eq!(rm.state(), TradingState::Closed);
    assert!(!rm.is_halted());
    assert!(matches!(approve(&rm, "1", dec!(10)), Err(RiskLimitExceeded::Closed(_))));

    rm.start_new_day(day().succ_opt().unwrap()).unwrap();
    assert_eq!(rm.state(), TradingState::Open);
}

#[test]
fn test_new_day_carries_open_exposure() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(50)).unwrap();
    rm.start_new_day(day().succ_opt().unwrap()).unwrap();

    let status = rm.status();
    assert_eq!(status.decisions_today, 0);
    assert_eq!(status.daily_pnl, Decimal::ZERO);
    assert_eq!(status.open_exposure, dec!(50));
    assert_eq!(status.trading_day, day().succ_opt().unwrap());

    // Yesterday's decision still settles.
    settle(&rm, "1", dec!(40)).unwrap();
    assert_eq!(rm.status().open_exposure, Decimal::ZERO);
    assert_eq!(rm.status().daily_pnl, dec!(40));
}

#[test]
fn test_switch_tier_applies_to_next_approval() {
    let rm = manager(BettingStrategyConfig::moderate(), dec!(1000));
    approve(&rm, "1", dec!(30)).unwrap();
    rm.switch_tier(BettingStrategyConfig::for_tier(RiskTier::Conservative));
    assert_eq!(rm.config().tier, RiskTier::Conservative);
    // Conservative cap: 2% of $1000 = $20.
    assert!(matches!(
        approve(&rm, "2", dec!(30)),
        Err(RiskLimitExceeded::MaxBet { .. })
    ));
}

#[test]
fn test_concurrent_approvals_respect_exposure() {
    // Moderate: $200 exposure cap. Stakes of $30 -> at most 6 approvals.
    let rm = Arc::new(manager(BettingStrategyConfig::moderate(), dec!(1000)));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let rm = rm.clone();
            thread::spawn(move || {
                (0..10)
                    .filter(|i| approve(&rm, &format!("{t}-{i}"), dec!(30)).is_ok())
                    .count()
            })
        })
        .collect();
    let approved: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(approved, 6);
    let status = rm.status();
    assert_eq!(status.open_exposure, dec!(180));
    assert_eq!(status.decisions_today, 6);
}

// =============================================================================
// 5. Strategy engine end to end
// =============================================================================

#[test]
fn test_engine_stakes_quarter_kelly() {
    // p = 0.6, D = 1.8, quarter Kelly on $1000:
    //   f* = 0.1, 0.1 * 0.25 = 0.025 -> $25.00
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    let report = engine(risk.clone())
        .run_cycle(vec![record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)])])
        .unwrap();

    assert_eq!(report.decisions.len(), 1);
    let decision = &report.decisions[0];
    assert_eq!(decision.stake, dec!(25.00));
    assert_eq!(decision.action, BetAction::Back(0));
    assert_eq!(decision.odds, dec!(1.8));
    assert_eq!(decision.strategy, "back:home");
    assert!((decision.expected_value - 0.08).abs() < 1e-9);
    assert!(!decision.rationale.is_empty());
    assert_eq!(decision.potential_profit(), dec!(20.000));
    assert_eq!(risk.status().open_exposure, dec!(25));
}

#[test]
fn test_engine_abstains_without_edge() {
    // Floors relaxed so the game reaches the equilibrium step.
    let config = BettingStrategyConfig {
        min_confidence_threshold: 0.0,
        min_expected_value: -1.0,
        ..BettingStrategyConfig::moderate()
    };
    let risk = Arc::new(manager(config, dec!(1000)));
    let report = engine(risk.clone())
        .run_cycle(vec![record("no-edge", &[0.45, 0.55], &[dec!(2.0), dec!(1.7)])])
        .unwrap();

    assert!(report.decisions.is_empty());
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.abstained, 1);
    assert_eq!(risk.status().open_exposure, Decimal::ZERO);

    // Default floors drop it before evaluation.
    let risk = Arc::new(manager(BettingStrategyConfig::moderate(), dec!(1000)));
    let report = engine(risk)
        .run_cycle(vec![record("no-edge", &[0.45, 0.55], &[dec!(2.0), dec!(1.7)])])
        .unwrap();
    assert_eq!(report.evaluated, 0);
}

#[test]
fn test_engine_stops_after_stop_loss() {
    let risk = Arc::new(manager(BettingStrategyConfig::conservative(), dec!(1000)));
    for id in ["1", "2", "3"] {
        approve(&risk, id, dec!(20)).unwrap();
    }
    for id in ["1", "2", "3"] {
        settle(&risk, id, dec!(-20)).unwrap();
    }
    assert_eq!(risk.state(), TradingState::StoppedLoss);

    let report = engine(risk)
        .run_cycle(vec![record("g", &[0.7, 0.3], &[dec!(1.6), dec!(3.5)])])
        .unwrap();
    assert!(report.decisions.is_empty());
    assert!(report.stopped_early);
}

#[test]
fn test_engine_isolates_bad_records() {
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    let report = engine(risk)
        .run_cycle(vec![
            record("bad-sum", &[0.7, 0.5], &[dec!(1.8), dec!(2.2)]),
            record("bad-odds", &[0.6, 0.4], &[dec!(1.0), dec!(2.2)]),
            record("good", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]),
        ])
        .unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.failed.len(), 2);
    assert!(report
        .failed
        .iter()
        .any(|(id, e)| id == "bad-sum" && matches!(e, EngineError::InvalidProbability(_))));
    assert!(report
        .failed
        .iter()
        .any(|(id, e)| id == "bad-odds" && matches!(e, EngineError::InvalidOdds(_))));
}

#[test]
fn test_engine_does_not_rebet_same_opportunity() {
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    let engine = engine(risk.clone());
    let batch = vec![record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)])];

    assert_eq!(engine.run_cycle(batch.clone()).unwrap().decisions.len(), 1);
    let second = engine.run_cycle(batch).unwrap();
    assert!(second.decisions.is_empty());
    assert!(matches!(
        second.rejected.as_slice(),
        [(_, RiskLimitExceeded::DuplicateOpportunity(_))]
    ));
    assert_eq!(risk.status().decisions_today, 1);
}

#[test]
fn test_engine_forwards_decisions() {
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = engine(risk).with_decision_sink(tx);
    engine
        .run_cycle(vec![record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)])])
        .unwrap();
    let sent = rx.try_recv().unwrap();
    assert_eq!(sent.opportunity_id, "det-cha");
    assert_eq!(sent.stake, dec!(25));
}

#[test]
fn test_engine_scales_stake_when_profit_locked() {
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    approve(&risk, "1", dec!(50)).unwrap();
    // +250 -> balance 1250, 250/1250 = 20% -> PROFIT_LOCKED, multiplier 0.5
    settle(&risk, "1", dec!(250)).unwrap();
    assert_eq!(risk.state(), TradingState::ProfitLocked);

    // 0.025 * 1250 * 0.5 = 15.625 -> 15.62 (max bet 62.50, headroom 250)
    let report = engine(risk.clone())
        .run_cycle(vec![record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)])])
        .unwrap();
    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].stake, dec!(15.62));
    assert!(report.decisions[0].rationale.contains("x0.5"));
    assert_eq!(risk.status().open_exposure, dec!(15.62));
}

#[test]
fn test_engine_resizes_to_exposure_headroom() {
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    // 4 * 45 = 180 open, cap 20% of 1000 = 200 -> headroom 20
    for id in ["1", "2", "3", "4"] {
        approve(&risk, id, dec!(45)).unwrap();
    }

    // Kelly wants 25.00, max bet 50, headroom 20 -> 20.00
    let report = engine(risk.clone())
        .run_cycle(vec![record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)])])
        .unwrap();
    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].stake, dec!(20.00));
    assert!(report.rejected.is_empty());
    assert_eq!(risk.status().open_exposure, dec!(200));
}

#[test]
fn test_engine_stops_when_headroom_below_min_stake() {
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    // 4 * 50 = 200 open -> headroom 0 < min stake 1
    for id in ["1", "2", "3", "4"] {
        approve(&risk, id, dec!(50)).unwrap();
    }

    let report = engine(risk.clone())
        .run_cycle(vec![
            record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]),
            record("bos-nyr", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)]),
        ])
        .unwrap();
    assert!(report.stopped_early);
    assert_eq!(report.evaluated, 0);
    assert!(report.decisions.is_empty());
    assert!(report.rejected.is_empty());
    assert_eq!(risk.status().decisions_today, 4);
}

#[test]
fn test_engine_halves_confidence_without_convergence() {
    let batch = vec![record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)])];

    let converged = engine(Arc::new(manager(quarter_kelly(), dec!(1000))))
        .run_cycle(batch.clone())
        .unwrap();
    let baseline = &converged.decisions[0];
    assert!(!baseline.rationale.contains("not converged"));

    // Five damped steps leave 0.606 on back:home, short of the tolerance.
    let capped = StrategyEngine::new(
        Arc::new(manager(quarter_kelly(), dec!(1000))),
        EquilibriumModel::new(0.1, 1e-4, 5),
        KellySizer::default(),
        dec!(1),
    );
    let report = capped.run_cycle(batch).unwrap();
    assert_eq!(report.decisions.len(), 1);
    let decision = &report.decisions[0];
    assert_eq!(decision.action, BetAction::Back(0));
    // Sizing ignores the warning: still 0.025 * 1000 = 25.00
    assert_eq!(decision.stake, dec!(25.00));
    assert!((decision.confidence - baseline.confidence * 0.5).abs() < 1e-12);
    assert!(decision.rationale.contains("not converged"));
}

#[test]
fn test_engine_refuses_cycle_when_halted() {
    let risk = Arc::new(manager(quarter_kelly(), dec!(1000)));
    approve(&risk, "1", dec!(50)).unwrap();
    assert!(settle(&risk, "1", dec!(-5000)).is_err());

    let err = engine(risk).run_cycle(PredictionBatch::default()).unwrap_err();
    assert!(err.is_fatal());
}

// =============================================================================
// 6. Runner loop
// =============================================================================

fn runner_setup(
    risk: Arc<RiskManager>,
) -> (
    StrategyRunner,
    mpsc::Sender<PredictionBatch>,
    mpsc::UnboundedSender<SettlementReport>,
    mpsc::UnboundedReceiver<wager_engine::data::models::BettingDecision>,
) {
    let (decision_tx, decision_rx) = mpsc::unbounded_channel();
    let (settlement_tx, settlement_rx) = mpsc::unbounded_channel();
    let (predictions_tx, predictions_rx) = mpsc::channel(4);
    let runner = StrategyRunner::new(
        engine(risk).with_decision_sink(decision_tx),
        RunnerConfig {
            cycle_interval: Duration::from_millis(20),
            trading_window: None,
        },
        predictions_rx,
        settlement_rx,
    );
    (runner, predictions_tx, settlement_tx, decision_rx)
}

#[tokio::test]
async fn test_runner_cycle_settle_and_stop() {
    let risk = Arc::new(RiskManager::new(quarter_kelly(), dec!(1000)).unwrap());
    let (runner, predictions_tx, settlement_tx, mut decision_rx) = runner_setup(risk);
    let (handle, join) = runner.start();
    assert!(handle.is_running());

    predictions_tx
        .send(vec![record("det-cha", &[0.6, 0.4], &[dec!(1.8), dec!(2.2)])].into())
        .await
        .unwrap();
    let decision = tokio::time::timeout(Duration::from_secs(2), decision_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.stake, dec!(25));

    settlement_tx
        .send(SettlementReport::new(
            decision.decision_id.clone(),
            SettlementStatus::Won,
            decision.potential_profit(),
        ))
        .unwrap();

    let mut settled = false;
    for _ in 0..100 {
        if handle.status().bankroll.current_balance == dec!(1020) {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled);

    let status = handle.status();
    assert_eq!(status.trading_state, TradingState::Open);
    assert_eq!(status.tier, RiskTier::Moderate);
    assert!(status.cycles >= 1);

    handle.stop();
    join.await.unwrap().unwrap();
    assert!(!handle.is_running());
}

#[tokio::test]
async fn test_runner_stops_on_corrupted_bankroll() {
    let risk = Arc::new(RiskManager::new(quarter_kelly(), dec!(1000)).unwrap());
    approve(&risk, "1", dec!(50)).unwrap();
    let (runner, _predictions_tx, settlement_tx, _decision_rx) = runner_setup(risk);
    let (handle, join) = runner.start();

    settlement_tx
        .send(SettlementReport::new("d-1", SettlementStatus::Lost, dec!(-5000)))
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(EngineError::BankrollCorrupted(_))));
    assert!(!handle.is_running());
    assert_eq!(handle.status().trading_state, TradingState::Closed);
}

#[tokio::test]
async fn test_runner_rolls_trading_day() {
    let today = Utc::now().date_naive();
    let yesterday = today.pred_opt().unwrap();
    let risk = Arc::new(RiskManager::with_trading_day(quarter_kelly(), dec!(1000), yesterday).unwrap());
    approve(&risk, "1", dec!(50)).unwrap();
    assert_eq!(risk.status().decisions_today, 1);

    let (runner, _predictions_tx, _settlement_tx, _decision_rx) = runner_setup(risk);
    let (handle, join) = runner.start();

    // The first tick fires immediately and sees the date change.
    let mut rolled = false;
    for _ in 0..100 {
        if handle.status().bankroll.trading_day == today {
            rolled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rolled);

    let status = handle.status().bankroll;
    assert_eq!(status.decisions_today, 0);
    assert_eq!(status.daily_pnl, Decimal::ZERO);
    assert_eq!(status.open_exposure, dec!(50));

    handle.stop();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_terminate_closes_day_and_stops_loop() {
    let risk = Arc::new(RiskManager::new(quarter_kelly(), dec!(1000)).unwrap());
    let (runner, _predictions_tx, _settlement_tx, _decision_rx) = runner_setup(risk.clone());
    let (handle, join) = runner.start();
    let reporter = tokio::spawn(handle.clone().log_status(Duration::from_millis(10)));

    // At least one status line before shutdown.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.terminate("SIGTERM");

    join.await.unwrap().unwrap();
    let reports = tokio::time::timeout(Duration::from_secs(2), reporter)
        .await
        .unwrap()
        .unwrap();
    assert!(reports >= 1);
    assert!(!handle.is_running());
    assert_eq!(handle.status().trading_state, TradingState::Closed);
    assert!(matches!(
        approve(&risk, "1", dec!(10)),
        Err(RiskLimitExceeded::Closed(_))
    ));
}
