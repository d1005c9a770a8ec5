//! Integration tests for the Bazaar cart.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p bazaar-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart_cross_context` - Several contexts of one origin converging
//! - `cart_persistence` - Snapshots surviving a restart on the file store
//!
//! The helpers below build origins and line inputs shared by both suites.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use bazaar_cart::{CartContext, KeyValueStore, LineInput, MemoryStore, StorageOrigin};
use bazaar_core::Price;

/// Storage key used by every test cart.
pub const CART_KEY: &str = "bazaar_cart";

/// Debounce window used by every test cart.
pub const WINDOW: Duration = Duration::from_millis(300);

/// A fresh in-memory origin.
#[must_use]
pub fn memory_origin() -> StorageOrigin {
    origin_over(Arc::new(MemoryStore::new()))
}

/// An origin over an arbitrary backend.
#[must_use]
pub fn origin_over(backend: Arc<dyn KeyValueStore>) -> StorageOrigin {
    StorageOrigin::new(backend, 64)
}

/// Open a cart context ("tab") on `origin`.
#[must_use]
pub fn open_tab(origin: &StorageOrigin) -> CartContext {
    CartContext::open(origin, CART_KEY, WINDOW)
}

/// Price from whole currency units.
///
/// # Panics
///
/// Panics if `units` is negative.
#[must_use]
pub fn units(units: i64) -> Price {
    Price::from_cents(units.saturating_mul(100)).unwrap_or_else(|e| panic!("bad test price: {e}"))
}

/// A basic line for `service`.
#[must_use]
pub fn basic(service: &str, quantity: i64, unit_price: i64) -> LineInput {
    LineInput::basic(service, service.to_uppercase(), units(unit_price), quantity)
}

/// A direct line for `service` booked with `provider`.
#[must_use]
pub fn direct(service: &str, provider: &str, quantity: i64, unit_price: i64) -> LineInput {
    LineInput::direct(
        service,
        service.to_uppercase(),
        units(unit_price),
        quantity,
        provider,
    )
}

/// Let debounce timers and synchronizers run to quiescence.
pub async fn settle() {
    tokio::time::sleep(WINDOW * 2).await;
    tokio::task::yield_now().await;
}
