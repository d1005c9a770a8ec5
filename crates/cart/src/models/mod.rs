//! Domain models for the cart.
//!
//! - [`line`] - caller input and stored cart lines

pub mod line;

pub use line::{CartLine, LineInput, stored_quantity};
