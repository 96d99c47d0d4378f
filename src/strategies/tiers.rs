//! Named risk tiers.
//!
//! A tier is an immutable `BettingStrategyConfig`. Switching tiers replaces
//! the whole record; nothing mutates a config in place.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Conservative,
    Moderate,
    Aggressive,
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "moderate" => Ok(Self::Moderate),
            "aggressive" => Ok(Self::Aggressive),
            _ => Err(format!("Invalid risk tier: {s}")),
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Moderate => write!(f, "moderate"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Risk parameters for one tier. Percentages are fractions of the current balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BettingStrategyConfig {
    pub tier: RiskTier,
    pub max_bet_percentage: Decimal,
    pub min_confidence_threshold: f64,
    pub min_expected_value: f64,
    pub max_daily_bets: u32,
    pub max_exposure_percentage: Decimal,
    pub kelly_fraction: Decimal,
    pub stop_loss_percentage: Decimal,
    pub profit_target_percentage: Decimal,
    /// Treat the profit target as a hard stop instead of an advisory lock.
    pub profit_target_hard_stop: bool,
    /// Stake multiplier while the advisory profit lock is active.
    pub profit_lock_stake_multiplier: Decimal,
}

impl BettingStrategyConfig {
    pub fn for_tier(tier: RiskTier) -> Self {
        match tier {
            RiskTier::Conservative => Self::conservative(),
            RiskTier::Moderate => Self::moderate(),
            RiskTier::Aggressive => Self::aggressive(),
        }
    }

    pub fn conservative() -> Self {
        Self {
            tier: RiskTier::Conservative,
            max_bet_percentage: Decimal::new(2, 2),
            min_confidence_threshold: 0.65,
            min_expected_value: 0.05,
            max_daily_bets: 5,
            max_exposure_percentage: Decimal::new(10, 2),
            kelly_fraction: Decimal::new(25, 2),
            stop_loss_percentage: Decimal::new(5, 2),
            profit_target_percentage: Decimal::new(10, 2),
            profit_target_hard_stop: false,
            profit_lock_stake_multiplier: Decimal::new(5, 1),
        }
    }

    pub fn moderate() -> Self {
        Self {
            tier: RiskTier::Moderate,
            max_bet_percentage: Decimal::new(5, 2),
            min_confidence_threshold: 0.60,
            min_expected_value: 0.03,
            max_daily_bets: 10,
            max_exposure_percentage: Decimal::new(20, 2),
            kelly_fraction: Decimal::new(50, 2),
            stop_loss_percentage: Decimal::new(10, 2),
            profit_target_percentage: Decimal::new(20, 2),
            profit_target_hard_stop: false,
            profit_lock_stake_multiplier: Decimal::new(5, 1),
        }
    }

    pub fn aggressive() -> Self {
        Self {
            tier: RiskTier::Aggressive,
            max_bet_percentage: Decimal::new(10, 2),
            min_confidence_threshold: 0.55,
            min_expected_value: 0.02,
            max_daily_bets: 20,
            max_exposure_percentage: Decimal::new(35, 2),
            kelly_fraction: Decimal::new(75, 2),
            stop_loss_percentage: Decimal::new(15, 2),
            profit_target_percentage: Decimal::new(30, 2),
            profit_target_hard_stop: false,
            profit_lock_stake_multiplier: Decimal::new(5, 1),
        }
    }

    /// Validate ranges; returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let unit = |v: Decimal| v > Decimal::ZERO && v <= Decimal::ONE;

        if !unit(self.max_bet_percentage) {
            errors.push(format!("{}: max_bet_percentage must be in (0, 1]", self.tier));
        }
        if !unit(self.max_exposure_percentage) {
            errors.push(format!("{}: max_exposure_percentage must be in (0, 1]", self.tier));
        }
        if self.max_bet_percentage > self.max_exposure_percentage {
            errors.push(format!(
                "{}: max_bet_percentage exceeds max_exposure_percentage",
                self.tier
            ));
        }
        if !unit(self.kelly_fraction) {
            errors.push(format!("{}: kelly_fraction must be in (0, 1]", self.tier));
        }
        if !unit(self.stop_loss_percentage) {
            errors.push(format!("{}: stop_loss_percentage must be in (0, 1]", self.tier));
        }
        if self.profit_target_percentage <= Decimal::ZERO {
            errors.push(format!("{}: profit_target_percentage must be positive", self.tier));
        }
        if !unit(self.profit_lock_stake_multiplier) {
            errors.push(format!(
                "{}: profit_lock_stake_multiplier must be in (0, 1]",
                self.tier
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            errors.push(format!("{}: min_confidence_threshold must be in [0, 1]", self.tier));
        }
        if !self.min_expected_value.is_finite() {
            errors.push(format!("{}: min_expected_value must be finite", self.tier));
        }
        if self.max_daily_bets == 0 {
            errors.push(format!("{}: max_daily_bets must be at least 1", self.tier));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for BettingStrategyConfig {
    fn default() -> Self {
        Self::moderate()
    }
}
