//! Conflict detection between a candidate line and an existing cart.
//!
//! A cart is meant to describe one booking: either automatically assigned
//! (`Basic`) work, or work with exactly one chosen provider (`Direct`).
//! [`check_conflict`] reports when adding a candidate would break that. It
//! is advisory: the store never consults it on its own, callers decide
//! whether to merge anyway, reset the cart, or refuse.

use crate::models::{CartLine, LineInput};

/// Whether adding `candidate` to `lines` would mix fulfillment contexts.
///
/// True when the cart is non-empty and some existing line has a different
/// fulfillment mode, or the candidate is `Direct` and some existing `Direct`
/// line has a different provider.
#[must_use]
pub fn check_conflict(lines: &[CartLine], candidate: &LineInput) -> bool {
    lines.iter().any(|line| {
        line.fulfillment_mode() != candidate.fulfillment_mode
            || (candidate.fulfillment_mode.is_direct()
                && line.effective_provider() != candidate.effective_provider())
    })
}
