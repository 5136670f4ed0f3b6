//! # Discount Calculator
//!
//! One global discount applied once to the cart's aggregate subtotal, never
//! per item. Pure functions over `Money`; no side effects.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

/// Maximum percentage discount in basis points (100%).
pub const MAX_DISCOUNT_BPS: u32 = 10_000;

// =============================================================================
// Discount
// =============================================================================

/// A sale-wide discount.
///
/// Percentages are held in basis points (1000 bps = 10%) and computed with
/// integer math, rounding half up to the centavo. Fixed amounts are clamped
/// to the subtotal, so the payable total never goes negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discount {
    Percentage { bps: u32 },
    FixedAmount { amount_cents: i64 },
}

impl Discount {
    /// Percentage discount from basis points, capped at 100%.
    pub fn percentage_bps(bps: u32) -> Self {
        Discount::Percentage {
            bps: bps.min(MAX_DISCOUNT_BPS),
        }
    }

    /// Percentage discount from a whole/fractional percent, capped at 100%.
    pub fn percentage(pct: f64) -> Self {
        let bps = (pct.max(0.0) * 100.0).round() as u32;
        Self::percentage_bps(bps)
    }

    /// Fixed-amount discount. Negative magnitudes are treated as zero.
    pub fn fixed(amount: Money) -> Self {
        Discount::FixedAmount {
            amount_cents: amount.cents().max(0),
        }
    }

    /// The discount value for a given subtotal.
    ///
    /// Always within `[0, subtotal]`.
    pub fn computed_amount(&self, subtotal: Money) -> Money {
        let raw = match *self {
            Discount::Percentage { bps } => subtotal.percent_bps(bps.min(MAX_DISCOUNT_BPS)),
            Discount::FixedAmount { amount_cents } => Money::from_cents(amount_cents.max(0)),
        };
        raw.min(subtotal)
    }

    /// Applies the discount: `payable = subtotal - computed_amount`.
    pub fn apply(&self, subtotal: Money) -> Money {
        subtotal - self.computed_amount(subtotal)
    }
}

/// Payable total for an optional discount.
pub fn payable_total(subtotal: Money, discount: Option<&Discount>) -> Money {
    match discount {
        Some(d) => d.apply(subtotal),
        None => subtotal,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
