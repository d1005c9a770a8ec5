//! Line and cart aggregates.
//!
//! Aggregates are never stored; they are recomputed from the lines whenever
//! they are read.

use bazaar_core::Price;
use serde::Serialize;

use crate::models::CartLine;

/// Grand totals of a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    /// Sum of line quantities.
    pub total_items: u64,
    /// Sum of line totals.
    pub total_amount: Price,
}

/// Total of a single line: `quantity × unit_price`.
#[must_use]
pub fn line_total(quantity: u32, unit_price: Price) -> Price {
    unit_price.times(quantity)
}

/// Totals over a set of lines.
#[must_use]
pub fn cart_totals<'a>(lines: impl IntoIterator<Item = &'a CartLine>) -> CartTotals {
    lines
        .into_iter()
        .fold(CartTotals::default(), |acc, line| CartTotals {
            total_items: acc.total_items.saturating_add(u64::from(line.quantity())),
            total_amount: acc.total_amount + line.line_total(),
        })
}
