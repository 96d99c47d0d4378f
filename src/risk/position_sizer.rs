//! Fractional Kelly position sizing for decimal-odds wagers.
//!
//! For decimal odds D, the net odds are b = D - 1. With win probability p
//! and q = 1 - p, the full Kelly fraction is
//!
//! ```text
//!     f* = (b*p - q) / b
//! ```
//!
//! No edge (f* <= 0) sizes to zero. Otherwise the fraction is scaled by the
//! tier's Kelly multiplier and clamped to a hard ceiling that no multiplier
//! can lift.

use rust_decimal::Decimal;
use tracing::debug;

use crate::errors::EngineError;

/// Default hard ceiling: 10% of bankroll on any single wager.
pub const DEFAULT_MAX_FRACTION: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// Kelly sizer with a hard ceiling on the returned fraction.
#[derive(Debug, Clone)]
pub struct KellySizer {
    pub max_fraction: Decimal,
}

impl Default for KellySizer {
    fn default() -> Self {
        Self {
            max_fraction: DEFAULT_MAX_FRACTION,
        }
    }
}

impl KellySizer {
    pub fn new(max_fraction: Decimal) -> Self {
        Self { max_fraction }
    }

    /// Full (unscaled) Kelly fraction; may be negative.
    pub fn full_kelly(win_probability: Decimal, decimal_odds: Decimal) -> Result<Decimal, EngineError> {
        if decimal_odds <= Decimal::ONE {
            return Err(EngineError::InvalidOdds(format!(
                "decimal odds {decimal_odds} must exceed 1.0"
            )));
        }
        if win_probability < Decimal::ZERO || win_probability > Decimal::ONE {
            return Err(EngineError::InvalidProbability(format!(
                "win probability {win_probability} outside [0, 1]"
            )));
        }
        let b = decimal_odds - Decimal::ONE;
        let p = win_probability;
        let q = Decimal::ONE - p;
        Ok((b * p - q) / b)
    }

    /// Stake as a fraction of bankroll, in [0, max_fraction].
    pub fn size(
        &self,
        win_probability: Decimal,
        decimal_odds: Decimal,
        kelly_fraction_multiplier: Decimal,
    ) -> Result<Decimal, EngineError> {
        let kelly = Self::full_kelly(win_probability, decimal_odds)?;
        if kelly <= Decimal::ZERO {
            debug!(
                win_probability = %win_probability,
                decimal_odds = %decimal_odds,
                kelly = %kelly,
                "No edge, zero stake"
            );
            return Ok(Decimal::ZERO);
        }

        let scaled = (kelly * kelly_fraction_multiplier)
            .max(Decimal::ZERO)
            .min(self.max_fraction);
        Ok(scaled)
    }
}
