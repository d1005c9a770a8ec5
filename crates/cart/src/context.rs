//! One execution context's cart, fully wired.
//!
//! [`CartContext`] is what an application opens per tab: a
//! [`BrowsingContext`] on the shared origin, a hydrated [`CartStore`]
//! persisting through it, and a [`CartSynchronizer`] keeping the store in
//! step with every other context of the origin.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::CartConfig;
use crate::storage::{BrowsingContext, CartStorage, ContextId, StorageOrigin};
use crate::store::CartStore;
use crate::sync::CartSynchronizer;

/// A cart store attached to one execution context.
#[derive(Debug)]
pub struct CartContext {
    context: BrowsingContext,
    store: CartStore,
    sync: CartSynchronizer,
}

impl CartContext {
    /// Open a context on `origin` and hydrate its cart from `storage_key`.
    ///
    /// Must be called from within a tokio runtime. The event subscription is
    /// taken before hydrating so no write made in between is missed.
    #[must_use]
    pub fn open(origin: &StorageOrigin, storage_key: &str, debounce: Duration) -> Self {
        let context = origin.open_context();
        let events = context.subscribe();
        let storage = CartStorage::new(Arc::new(context.clone()), storage_key);
        let store = CartStore::open(storage, debounce);
        let sync = CartSynchronizer::spawn(&store, events);
        debug!(context = %context.id(), key = storage_key, "Opened cart context");
        Self {
            context,
            store,
            sync,
        }
    }

    /// Open a context using the key and debounce window from `config`.
    #[must_use]
    pub fn from_config(origin: &StorageOrigin, config: &CartConfig) -> Self {
        Self::open(origin, &config.storage_key, config.debounce)
    }

    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.context.id()
    }

    /// The cart store of this context.
    #[must_use]
    pub const fn store(&self) -> &CartStore {
        &self.store
    }

    #[must_use]
    pub const fn context(&self) -> &BrowsingContext {
        &self.context
    }

    /// Whether the synchronizer is still running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync.is_running()
    }

    /// Flush any pending write and stop listening to other contexts.
    pub async fn close(self) {
        self.store.flush();
        self.sync.shutdown().await;
        debug!(context = %self.context.id(), "Closed cart context");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bazaar_core::Price;

    use crate::models::LineInput;
    use crate::storage::{KeyValueStore, MemoryStore};

    const WINDOW: Duration = Duration::from_millis(300);

    fn origin() -> StorageOrigin {
        StorageOrigin::new(Arc::new(MemoryStore::new()), 16)
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_context_hydrates_from_first() {
        let origin = origin();
        let a = CartContext::open(&origin, "cart", WINDOW);
        a.store()
            .upsert(LineInput::basic("s", "S", Price::from_cents(100).unwrap(), 2));
        a.close().await;

        let b = CartContext::open(&origin, "cart", WINDOW);
        assert!(b.store().is_hydrated());
        assert_eq!(b.store().totals().total_items, 2);
        assert!(b.is_syncing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_pending_write() {
        let origin = origin();
        let a = CartContext::open(&origin, "cart", WINDOW);
        let reader = origin.open_context();
        a.store()
            .upsert(LineInput::basic("s", "S", Price::from_cents(100).unwrap(), 1));
        assert!(reader.get_item("cart").unwrap().is_none());

        a.close().await;
        assert!(reader.get_item("cart").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_from_config_uses_key() {
        let origin = origin();
        let config = CartConfig {
            storage_key: "custom".to_string(),
            ..CartConfig::default()
        };
        let ctx = CartContext::from_config(&origin, &config);
        assert_eq!(ctx.store().storage_key(), "custom");
        assert_ne!(ctx.id(), origin.open_context().id());
    }
}
