//! Storage origins and execution contexts.
//!
//! A [`StorageOrigin`] is everything that shares one storage area: a single
//! backend and a broadcast channel. Each [`BrowsingContext`] opened on it
//! reads and writes that backend directly, and every successful write or
//! removal is broadcast as a [`StorageEvent`]. A context's own
//! [`StorageEvents`] stream skips the events it caused, so a context only
//! ever hears about *other* contexts' writes.
//!
//! Writes and their broadcasts are serialized per origin: events are
//! delivered in the same order the backend applied the writes, so the last
//! event a context sees always matches what storage holds.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{KeyValueStore, StorageError, StorageEvent};

/// Identity of one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Generate a fresh random context id.
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A storage area shared by several execution contexts.
///
/// Cheaply cloneable; clones refer to the same backend and channel.
#[derive(Clone)]
pub struct StorageOrigin {
    inner: Arc<OriginInner>,
}

struct OriginInner {
    backend: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<StorageEvent>,
    /// Held from reading the old value until the event is sent.
    write_lock: Mutex<()>,
}

impl StorageOrigin {
    /// Create an origin over `backend`.
    ///
    /// `capacity` bounds how many events a slow context may fall behind
    /// before it starts missing them (it is told via `Lagged`).
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(OriginInner {
                backend,
                events,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Open a new execution context on this origin.
    #[must_use]
    pub fn open_context(&self) -> BrowsingContext {
        BrowsingContext {
            id: ContextId::new_random(),
            origin: self.clone(),
        }
    }

    /// Number of live event subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.inner
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: StorageEvent) {
        // No receivers just means no other context is listening.
        let _ = self.inner.events.send(event);
    }
}

impl fmt::Debug for StorageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageOrigin")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// One execution context ("tab") of a [`StorageOrigin`].
#[derive(Clone, Debug)]
pub struct BrowsingContext {
    id: ContextId,
    origin: StorageOrigin,
}

impl BrowsingContext {
    /// This context's identity.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// The origin this context belongs to.
    #[must_use]
    pub const fn origin(&self) -> &StorageOrigin {
        &self.origin
    }

    /// Subscribe to writes made by other contexts of the same origin.
    ///
    /// Only events sent after this call are delivered.
    #[must_use]
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            own: self.id,
            rx: self.origin.inner.events.subscribe(),
        }
    }

    fn backend(&self) -> &dyn KeyValueStore {
        self.origin.inner.backend.as_ref()
    }
}

impl KeyValueStore for BrowsingContext {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend().get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.origin.lock_writes();
        let old_value = self.backend().get_item(key).ok().flatten();
        self.backend().set_item(key, value)?;
        self.origin.publish(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: Some(value.to_string()),
            source: self.id,
        });
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.origin.lock_writes();
        let old_value = self.backend().get_item(key).ok().flatten();
        self.backend().remove_item(key)?;
        self.origin.publish(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: None,
            source: self.id,
        });
        Ok(())
    }
}

/// Storage events from other contexts, as seen by one context.
#[derive(Debug)]
pub struct StorageEvents {
    own: ContextId,
    rx: broadcast::Receiver<StorageEvent>,
}

impl StorageEvents {
    /// Wait for the next event written by another context.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged` if events were dropped because this
    /// subscriber fell behind, and `RecvError::Closed` once the origin is gone.
    pub async fn recv(&mut self) -> Result<StorageEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.source != self.own {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    ///
    /// # Errors
    ///
    /// Returns `TryRecvError::Empty` when no foreign event is queued.
    pub fn try_recv(&mut self) -> Result<StorageEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if event.source != self.own {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tokio::sync::broadcast::error::TryRecvError;

    fn origin() -> StorageOrigin {
        StorageOrigin::new(Arc::new(MemoryStore::new()), 8)
    }

    #[test]
    fn test_contexts_share_backend() {
        let origin = origin();
        let a = origin.open_context();
        let b = origin.open_context();

        a.set_item("cart", "[]").unwrap();
        assert_eq!(b.get_item("cart").unwrap().as_deref(), Some("[]"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_writes_reach_other_contexts_only() {
        let origin = origin();
        let a = origin.open_context();
        let b = origin.open_context();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.set_item("cart", "[1]").unwrap();

        let event = b_events.try_recv().unwrap();
        assert_eq!(event.key, "cart");
        assert_eq!(event.old_value, None);
        assert_eq!(event.new_value.as_deref(), Some("[1]"));
        assert_eq!(event.source, a.id());

        assert!(matches!(a_events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_remove_broadcasts_none() {
        let origin = origin();
        let a = origin.open_context();
        let b = origin.open_context();
        let mut b_events = b.subscribe();

        a.set_item("cart", "[1]").unwrap();
        a.remove_item("cart").unwrap();

        let _ = b_events.try_recv().unwrap();
        let removal = b_events.try_recv().unwrap();
        assert_eq!(removal.old_value.as_deref(), Some("[1]"));
        assert_eq!(removal.new_value, None);
    }

    #[test]
    fn test_failed_write_is_not_broadcast() {
        let origin = StorageOrigin::new(Arc::new(MemoryStore::with_quota(4)), 8);
        let a = origin.open_context();
        let b = origin.open_context();
        let mut b_events = b.subscribe();

        assert!(a.set_item("cart", "too long").is_err());
        assert!(matches!(b_events.try_recv(), Err(TryRecvError::Empty)));
    }

    /// Backend that stalls after storing `"slow"`, widening the window
    /// between a write and its broadcast.
    struct StallingStore {
        inner: MemoryStore,
    }

    impl KeyValueStore for StallingStore {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set_item(key, value)?;
            if value == "slow" {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            Ok(())
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove_item(key)
        }
    }

    #[test]
    fn test_concurrent_writes_broadcast_in_storage_order() {
        let origin = StorageOrigin::new(
            Arc::new(StallingStore {
                inner: MemoryStore::new(),
            }),
            8,
        );
        let a = origin.open_context();
        let c = origin.open_context();
        let observer = origin.open_context();
        let mut events = observer.subscribe();

        let slow_writer = std::thread::spawn(move || a.set_item("cart", "slow").unwrap());
        std::thread::sleep(std::time::Duration::from_millis(50));
        c.set_item("cart", "fast").unwrap();
        slow_writer.join().unwrap();

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = event.new_value;
        }
        assert_eq!(last, observer.get_item("cart").unwrap());
    }

    #[test]
    fn test_subscriber_count() {
        let origin = origin();
        let a = origin.open_context();
        assert_eq!(origin.subscriber_count(), 0);
        let events = a.subscribe();
        assert_eq!(origin.subscriber_count(), 1);
        drop(events);
        assert_eq!(origin.subscriber_count(), 0);
    }
}
