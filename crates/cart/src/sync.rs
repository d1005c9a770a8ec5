//! Cross-context synchronization.
//!
//! [`CartSynchronizer`] listens to the storage events of one execution
//! context and feeds writes of the cart key, made by *other* contexts, into
//! the context's [`CartStore`] via [`CartStore::apply_broadcast`]. Adopted
//! snapshots are never written back, so two contexts cannot ping-pong.
//!
//! If the listener falls behind and events are dropped, the store re-reads
//! the durable snapshot instead.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{StorageEvent, StorageEvents};
use crate::store::{CartStore, WeakCartStore};

/// Background task applying foreign cart writes to a store.
///
/// Holds the store weakly: once every [`CartStore`] handle is gone the task
/// ends on its own. Dropping the synchronizer stops the task.
#[derive(Debug)]
pub struct CartSynchronizer {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CartSynchronizer {
    /// Start forwarding `events` into `store`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(store: &CartStore, events: StorageEvents) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sync_loop(store.downgrade(), events, shutdown_rx));
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Whether the background task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background task and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for CartSynchronizer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn sync_loop(
    store: WeakCartStore,
    mut events: StorageEvents,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Cart synchronizer shutting down");
                    break;
                }
            }
            received = events.recv() => {
                let Some(store) = store.upgrade() else {
                    debug!("Cart store dropped; stopping synchronizer");
                    break;
                };
                match received {
                    Ok(event) => handle_event(&store, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, key = store.storage_key(), "Missed storage events; reloading cart");
                        store.reload();
                    }
                    Err(RecvError::Closed) => {
                        debug!("Storage origin closed; stopping synchronizer");
                        break;
                    }
                }
            }
        }
    }
}

fn handle_event(store: &CartStore, event: &StorageEvent) {
    if event.key != store.storage_key() {
        return;
    }
    debug!(source = %event.source, removed = event.new_value.is_none(), "Applying cart write from another context");
    store.apply_broadcast(event.new_value.as_deref());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use bazaar_core::Price;

    use crate::models::LineInput;
    use crate::storage::{CartStorage, KeyValueStore, MemoryStore, StorageOrigin, encode_snapshot};

    const KEY: &str = "bazaar_cart";

    fn line_json(service: &str, qty: i64) -> String {
        let input = LineInput::basic(service, service, Price::from_cents(500).unwrap(), qty);
        encode_snapshot(&[crate::models::CartLine::from_input(input).unwrap()]).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_foreign_writes_of_cart_key() {
        let origin = StorageOrigin::new(Arc::new(MemoryStore::new()), 8);
        let mine = origin.open_context();
        let theirs = origin.open_context();

        let events = mine.subscribe();
        let store = CartStore::open(CartStorage::new(Arc::new(mine), KEY), Duration::from_millis(300));
        let sync = CartSynchronizer::spawn(&store, events);

        theirs.set_item("unrelated", "x").unwrap();
        theirs.set_item(KEY, &line_json("a", 2)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.lines().len(), 1);
        assert_eq!(store.totals().total_items, 2);
        assert!(sync.is_running());

        theirs.remove_item(KEY).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.lines().is_empty());

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_triggers_reload() {
        let origin = StorageOrigin::new(Arc::new(MemoryStore::new()), 1);
        let mine = origin.open_context();
        let theirs = origin.open_context();

        let events = mine.subscribe();
        let store = CartStore::open(CartStorage::new(Arc::new(mine), KEY), Duration::from_millis(300));

        // Overflow the channel before the synchronizer gets to run.
        theirs.set_item(KEY, &line_json("a", 1)).unwrap();
        theirs.set_item(KEY, &line_json("b", 1)).unwrap();
        theirs.set_item(KEY, &line_json("c", 3)).unwrap();

        let _sync = CartSynchronizer::spawn(&store, events);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lines = store.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].service_id().as_str(), "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_store_dropped() {
        let origin = StorageOrigin::new(Arc::new(MemoryStore::new()), 8);
        let mine = origin.open_context();
        let theirs = origin.open_context();

        let events = mine.subscribe();
        let store = CartStore::open(CartStorage::new(Arc::new(mine), KEY), Duration::from_millis(300));
        let sync = CartSynchronizer::spawn(&store, events);
        drop(store);

        theirs.set_item(KEY, "[]").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!sync.is_running());
    }
}
