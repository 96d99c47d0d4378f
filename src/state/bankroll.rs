//! Bankroll state and the per-decision ledger.
//!
//! Both live inside the risk manager's critical section; mutators are
//! crate-private so nothing else can change them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::errors::{EngineError, SettlementConflict};

// =============================================================================
// Bankroll
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankrollStatus {
    pub current_balance: Decimal,
    /// Balance at the start of the trading day.
    pub day_start_balance: Decimal,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    /// Sum of unsettled stakes.
    pub open_exposure: Decimal,
    pub decisions_today: u32,
    pub stop_loss_hit: bool,
    pub profit_target_hit: bool,
    pub trading_day: NaiveDate,
}

impl BankrollStatus {
    pub(crate) fn new(balance: Decimal, trading_day: NaiveDate) -> Self {
        Self {
            current_balance: balance,
            day_start_balance: balance,
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            open_exposure: Decimal::ZERO,
            decisions_today: 0,
            stop_loss_hit: false,
            profit_target_hit: false,
            trading_day,
        }
    }

    pub(crate) fn commit(&mut self, stake: Decimal) {
        self.open_exposure += stake;
        self.decisions_today += 1;
    }

    pub(crate) fn apply_settlement(&mut self, stake: Decimal, pnl: Decimal) {
        self.open_exposure -= stake;
        self.daily_pnl += pnl;
        self.total_pnl += pnl;
        self.current_balance += pnl;
    }

    /// Start a new trading day. Unsettled exposure carries over.
    pub(crate) fn reset_day(&mut self, trading_day: NaiveDate) {
        self.day_start_balance = self.current_balance;
        self.daily_pnl = Decimal::ZERO;
        self.decisions_today = 0;
        self.stop_loss_hit = false;
        self.profit_target_hit = false;
        self.trading_day = trading_day;
    }

    /// Operator restatement after a fatal halt.
    pub(crate) fn restate(&mut self, balance: Decimal) {
        self.current_balance = balance;
        self.day_start_balance = balance;
        self.open_exposure = self.open_exposure.max(Decimal::ZERO);
    }

    /// Fatal invariants: balance must stay positive, exposure non-negative.
    pub(crate) fn check_integrity(&self) -> Result<(), EngineError> {
        if self.current_balance <= Decimal::ZERO {
            return Err(EngineError::BankrollCorrupted(format!(
                "balance ${:.2} is not positive",
                self.current_balance
            )));
        }
        if self.open_exposure < Decimal::ZERO {
            return Err(EngineError::BankrollCorrupted(format!(
                "open exposure ${:.2} is negative",
                self.open_exposure
            )));
        }
        Ok(())
    }

    /// Loss ratio |daily_pnl| / balance when the day is down, else zero.
    pub fn daily_loss_ratio(&self) -> Decimal {
        if self.daily_pnl >= Decimal::ZERO || self.current_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        -self.daily_pnl / self.current_balance
    }

    /// Profit ratio daily_pnl / balance when the day is up, else zero.
    pub fn daily_profit_ratio(&self) -> Decimal {
        if self.daily_pnl <= Decimal::ZERO || self.current_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.daily_pnl / self.current_balance
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone)]
struct LedgerEntry {
    stake: Decimal,
    settlement: Option<Settlement>,
}

#[derive(Debug, Clone, Copy)]
struct Settlement {
    pnl: Decimal,
    trading_day: NaiveDate,
}

/// Approved decisions keyed by decision id, used for idempotent settlement
/// and to refuse a second approval on the same opportunity within a day.
#[derive(Debug, Default)]
pub(crate) struct DecisionLedger {
    entries: HashMap<String, LedgerEntry>,
    opportunities_today: HashSet<String>,
}

impl DecisionLedger {
    pub(crate) fn has_opportunity(&self, opportunity_id: &str) -> bool {
        self.opportunities_today.contains(opportunity_id)
    }

    pub(crate) fn record(&mut self, decision_id: &str, opportunity_id: &str, stake: Decimal) {
        self.opportunities_today.insert(opportunity_id.to_string());
        self.entries.insert(
            decision_id.to_string(),
            LedgerEntry {
                stake,
                settlement: None,
            },
        );
    }

    /// Mark a decision settled on `trading_day` and return its stake.
    /// Duplicate and contradictory callbacks leave the ledger untouched.
    pub(crate) fn settle(
        &mut self,
        decision_id: &str,
        pnl: Decimal,
        trading_day: NaiveDate,
    ) -> Result<Decimal, SettlementConflict> {
        let entry = self
            .entries
            .get_mut(decision_id)
            .ok_or_else(|| SettlementConflict::UnknownDecision(decision_id.to_string()))?;

        match entry.settlement {
            Some(settled) if settled.pnl == pnl => {
                Err(SettlementConflict::AlreadySettled(decision_id.to_string()))
            }
            Some(settled) => Err(SettlementConflict::Contradictory {
                decision_id: decision_id.to_string(),
                recorded: settled.pnl,
                received: pnl,
            }),
            None => {
                entry.settlement = Some(Settlement { pnl, trading_day });
                Ok(entry.stake)
            }
        }
    }

    /// Clear the day's opportunities and drop entries settled before the
    /// previous trading day. Open entries are always kept. Returns the
    /// number of entries dropped.
    pub(crate) fn start_new_day(&mut self, trading_day: NaiveDate) -> usize {
        self.opportunities_today.clear();
        let keep_from = trading_day.pred_opt().unwrap_or(trading_day);
        let before = self.entries.len();
        self.entries.retain(|_, e| match e.settlement {
            Some(settled) => settled.trading_day >= keep_from,
            None => true,
        });
        before - self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.entries.values().filter(|e| e.settlement.is_none()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    #[test]
    fn test_new_day_prunes_old_settlements() {
        let mut ledger = DecisionLedger::default();
        ledger.record("d-old", "g-old", dec!(10));
        ledger.record("d-prev", "g-prev", dec!(10));
        ledger.record("d-open", "g-open", dec!(10));
        ledger.settle("d-old", dec!(-10), day(9)).unwrap();
        ledger.settle("d-prev", dec!(8), day(10)).unwrap();

        // Day 11: settled on day 9 goes, settled on day 10 stays for late duplicates.
        assert_eq!(ledger.start_new_day(day(11)), 1);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.open_count(), 1);
        assert!(!ledger.has_opportunity("g-prev"));
        assert_eq!(
            ledger.settle("d-prev", dec!(8), day(11)),
            Err(SettlementConflict::AlreadySettled("d-prev".to_string()))
        );
        assert_eq!(
            ledger.settle("d-old", dec!(-10), day(11)),
            Err(SettlementConflict::UnknownDecision("d-old".to_string()))
        );

        // Open entries survive any number of rollovers.
        assert_eq!(ledger.start_new_day(day(20)), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.settle("d-open", dec!(5), day(20)), Ok(dec!(10)));
    }
}
