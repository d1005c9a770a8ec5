//! Bazaar cart library.
//!
//! The client-side cart of the Bazaar services marketplace: an ordered set of
//! service lines with derived totals, persisted to host key-value storage
//! with debounced writes and kept consistent across every execution context
//! ("tab") of the same origin.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bazaar_cart::{CartContext, CartConfig, LineInput, MemoryStore, StorageOrigin};
//! use bazaar_core::Price;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CartConfig::default();
//! let origin = StorageOrigin::new(Arc::new(MemoryStore::new()), config.broadcast_capacity);
//! let tab = CartContext::from_config(&origin, &config);
//!
//! let price = Price::from_cents(4_500)?;
//! tab.store().upsert(LineInput::basic("deep-clean", "Deep clean", price, 2));
//! println!("{}", tab.store().totals().total_amount);
//! tab.close().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod conflict;
pub mod context;
pub mod error;
pub mod key;
pub mod models;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod totals;

pub use config::{CartConfig, ConfigError};
pub use context::CartContext;
pub use error::{CartError, DecodeError};
pub use models::{CartLine, LineInput};
pub use storage::{
    BrowsingContext, CartStorage, ContextId, FileStore, KeyValueStore, MemoryStore, StorageError,
    StorageEvent, StorageEvents, StorageOrigin,
};
pub use store::{CartStore, CartView, HydrationState, TransitionOrigin, WeakCartStore};
pub use sync::CartSynchronizer;
pub use totals::CartTotals;
