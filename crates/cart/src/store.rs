//! The cart store.
//!
//! [`CartStore`] holds the ordered cart lines for one execution context. All
//! mutations apply to memory synchronously; persistence follows from the
//! [`TransitionOrigin`] of each state change:
//!
//! | origin                | persistence                                   |
//! |-----------------------|-----------------------------------------------|
//! | `LocalMutation`       | debounced write (restarts the window)         |
//! | `SyncedFromBroadcast` | none; any pending write is dropped as stale   |
//! | `Cleared`             | pending write dropped, immediate write        |
//!
//! The store starts `Uninitialized` and must be hydrated from durable
//! storage before its contents mean anything. [`CartStore::open`] does both.
//! Consumers should gate on [`CartView::is_hydrated`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bazaar_core::LineKey;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::conflict;
use crate::error::{CartError, DecodeError};
use crate::models::{CartLine, LineInput, stored_quantity};
use crate::scheduler::PersistTimer;
use crate::storage::{CartStorage, decode_snapshot};
use crate::totals::{CartTotals, cart_totals};

/// Hydration progress of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationState {
    /// Constructed, durable storage not read yet.
    #[default]
    Uninitialized,
    /// Reading durable storage.
    Loading,
    /// Durable storage has been read (successfully or not).
    Hydrated,
}

/// Where a state transition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionOrigin {
    /// A caller mutated the cart in this context.
    LocalMutation,
    /// Another context wrote the durable snapshot and this context adopted it.
    SyncedFromBroadcast,
    /// A caller cleared the cart.
    Cleared,
}

impl fmt::Display for TransitionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LocalMutation => "local_mutation",
            Self::SyncedFromBroadcast => "synced_from_broadcast",
            Self::Cleared => "cleared",
        })
    }
}

/// Read-only view of a store at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    /// Lines in insertion order.
    pub lines: Vec<CartLine>,
    /// Aggregates over `lines`.
    #[serde(flatten)]
    pub totals: CartTotals,
    /// Hydration progress; contents are provisional until `Hydrated`.
    pub hydration: HydrationState,
    /// Incremented on every state transition.
    pub revision: u64,
}

impl CartView {
    /// Whether the contents reflect durable storage.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.hydration == HydrationState::Hydrated
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Look up a line by key.
    #[must_use]
    pub fn get(&self, key: &LineKey) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.line_key() == key)
    }
}

/// Cart state for one execution context.
///
/// Cheaply cloneable: clones share the same state, timer and storage. When
/// the last clone is dropped any pending write is flushed.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<StoreInner>,
}

/// Non-owning handle to a [`CartStore`].
#[derive(Clone)]
pub struct WeakCartStore {
    inner: Weak<StoreInner>,
}

impl WeakCartStore {
    /// Get the store back if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<CartStore> {
        self.inner.upgrade().map(|inner| CartStore { inner })
    }
}

struct StoreInner {
    storage: CartStorage,
    state: Mutex<CartState>,
    timer: PersistTimer,
    view_tx: watch::Sender<CartView>,
}

#[derive(Default)]
struct CartState {
    lines: Vec<CartLine>,
    hydration: HydrationState,
    revision: u64,
}

impl CartState {
    fn view(&self) -> CartView {
        CartView {
            lines: self.lines.clone(),
            totals: cart_totals(&self.lines),
            hydration: self.hydration,
            revision: self.revision,
        }
    }
}

impl CartStore {
    /// Create an `Uninitialized` store. Call [`hydrate`](Self::hydrate)
    /// before trusting its contents.
    ///
    /// Lines added before hydration are never persisted and are replaced by
    /// the durable snapshot once [`hydrate`](Self::hydrate) runs.
    #[must_use]
    pub fn new(storage: CartStorage, debounce: Duration) -> Self {
        let state = CartState::default();
        let (view_tx, _) = watch::channel(state.view());
        Self {
            inner: Arc::new(StoreInner {
                storage,
                state: Mutex::new(state),
                timer: PersistTimer::new(debounce),
                view_tx,
            }),
        }
    }

    /// Create a store and hydrate it from durable storage.
    #[must_use]
    pub fn open(storage: CartStorage, debounce: Duration) -> Self {
        let store = Self::new(storage, debounce);
        store.hydrate();
        store
    }

    /// Run the hydration state machine: `Uninitialized → Loading → Hydrated`.
    ///
    /// Always ends `Hydrated`; an unreadable snapshot hydrates as an empty
    /// cart. Hydration never schedules a write. Calling it again is a no-op.
    #[instrument(skip(self), fields(key = %self.inner.storage.key()))]
    pub fn hydrate(&self) {
        let mut state = self.inner.lock_state();
        if state.hydration != HydrationState::Uninitialized {
            return;
        }

        state.hydration = HydrationState::Loading;
        self.inner.publish(&state);

        if !state.lines.is_empty() {
            debug!(discarded = state.lines.len(), "Replacing lines added before hydration");
        }
        state.lines = self.inner.storage.load();
        state.hydration = HydrationState::Hydrated;
        state.revision += 1;
        self.inner.publish(&state);
        debug!(lines = state.lines.len(), "Cart hydrated");
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or overwrite the line derived from `input`.
    ///
    /// A quantity `<= 0` removes the line (no-op if absent). Existing lines
    /// are overwritten, not accumulated: upserting quantity 3 onto a line of
    /// quantity 1 leaves quantity 3.
    #[instrument(skip_all, fields(service = %input.service_id, qty = input.quantity))]
    pub fn upsert(&self, input: LineInput) {
        let key = input.line_key();
        match stored_quantity(input.quantity) {
            None => self
                .inner
                .transition(TransitionOrigin::LocalMutation, |lines| {
                    remove_line(lines, &key)
                }),
            Some(quantity) => self
                .inner
                .transition(TransitionOrigin::LocalMutation, |lines| {
                    if let Some(line) = lines.iter_mut().find(|line| *line.line_key() == key) {
                        line.overwrite(input, quantity);
                        return true;
                    }
                    CartLine::from_input(input).is_some_and(|line| {
                        lines.push(line);
                        true
                    })
                }),
        }
    }

    /// Replace the whole cart with a single line built from `input`.
    ///
    /// Use when the candidate belongs to a different fulfillment context
    /// (see [`check_conflict`](Self::check_conflict)). A quantity `<= 0`
    /// leaves the cart empty.
    #[instrument(skip_all, fields(service = %input.service_id, qty = input.quantity))]
    pub fn reset_and_add(&self, input: LineInput) {
        self.inner
            .transition(TransitionOrigin::LocalMutation, |lines| {
                let had_lines = !lines.is_empty();
                lines.clear();
                match CartLine::from_input(input) {
                    Some(line) => {
                        lines.push(line);
                        true
                    }
                    None => had_lines,
                }
            });
    }

    /// Change the quantity of an existing line; no-op if `key` is absent.
    ///
    /// A quantity `<= 0` removes the line.
    #[instrument(skip_all, fields(key = %key, quantity = quantity))]
    pub fn update_quantity(&self, key: &LineKey, quantity: i64) {
        self.inner
            .transition(TransitionOrigin::LocalMutation, |lines| {
                match stored_quantity(quantity) {
                    None => remove_line(lines, key),
                    Some(quantity) => lines
                        .iter_mut()
                        .find(|line| line.line_key() == key)
                        .is_some_and(|line| {
                            line.set_quantity(quantity);
                            true
                        }),
                }
            });
    }

    /// Remove a line; no-op if absent.
    #[instrument(skip_all, fields(key = %key))]
    pub fn remove(&self, key: &LineKey) {
        self.inner
            .transition(TransitionOrigin::LocalMutation, |lines| {
                remove_line(lines, key)
            });
    }

    /// Empty the cart and write the empty snapshot immediately.
    ///
    /// Any pending debounced write is cancelled first, so nothing can land
    /// after this call returns.
    #[instrument(skip(self))]
    pub fn clear(&self) {
        self.inner.transition(TransitionOrigin::Cleared, |lines| {
            lines.clear();
            true
        });
    }

    // =========================================================================
    // Cross-context updates
    // =========================================================================

    /// Adopt a snapshot written by another context.
    ///
    /// `raw = None` means the key was removed and adopts an empty cart; an
    /// undecodable payload also adopts an empty cart. The replacement is
    /// wholesale and never written back.
    pub fn apply_broadcast(&self, raw: Option<&str>) {
        let lines = match raw.map(decode_snapshot).transpose() {
            Ok(lines) => lines.unwrap_or_default(),
            Err(source) => {
                let err = CartError::BroadcastDecode {
                    key: self.inner.storage.key().to_string(),
                    source: DecodeError::Malformed(source),
                };
                warn!(error = %err, kind = err.kind(), "Replacing cart with empty snapshot");
                Vec::new()
            }
        };
        self.replace_synced(lines);
    }

    /// Re-read the durable snapshot and adopt it as if it had been broadcast.
    ///
    /// Used when broadcasts may have been missed.
    pub fn reload(&self) {
        let lines = self.inner.storage.load();
        self.replace_synced(lines);
    }

    fn replace_synced(&self, lines: Vec<CartLine>) {
        self.inner
            .transition(TransitionOrigin::SyncedFromBroadcast, |current| {
                *current = lines;
                true
            });
    }

    /// Write now if a debounced write is pending.
    pub fn flush(&self) {
        self.inner.flush();
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Whether adding `candidate` would mix fulfillment contexts.
    ///
    /// Advisory only; mutations never call this themselves.
    #[must_use]
    pub fn check_conflict(&self, candidate: &LineInput) -> bool {
        conflict::check_conflict(&self.inner.lock_state().lines, candidate)
    }

    /// Current lines, totals and hydration state.
    #[must_use]
    pub fn snapshot(&self) -> CartView {
        self.inner.lock_state().view()
    }

    /// Current lines in insertion order.
    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.inner.lock_state().lines.clone()
    }

    /// Current aggregates.
    #[must_use]
    pub fn totals(&self) -> CartTotals {
        cart_totals(&self.inner.lock_state().lines)
    }

    /// Look up a line by key.
    #[must_use]
    pub fn get(&self, key: &LineKey) -> Option<CartLine> {
        self.inner
            .lock_state()
            .lines
            .iter()
            .find(|line| line.line_key() == key)
            .cloned()
    }

    #[must_use]
    pub fn hydration(&self) -> HydrationState {
        self.inner.lock_state().hydration
    }

    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.hydration() == HydrationState::Hydrated
    }

    /// Whether a debounced write is waiting to fire.
    #[must_use]
    pub fn has_pending_write(&self) -> bool {
        self.inner.timer.is_pending()
    }

    /// Receive a fresh [`CartView`] after every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartView> {
        self.inner.view_tx.subscribe()
    }

    /// Wait until the store is `Hydrated`.
    pub async fn wait_hydrated(&self) {
        let mut views = self.subscribe();
        let _ = views.wait_for(CartView::is_hydrated).await;
    }

    /// Durable key this store persists under.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        self.inner.storage.key()
    }

    /// Non-owning handle, for tasks that must not keep the store alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakCartStore {
        WeakCartStore {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for CartStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("CartStore")
            .field("key", &self.inner.storage.key())
            .field("lines", &state.lines.len())
            .field("hydration", &state.hydration)
            .field("revision", &state.revision)
            .finish_non_exhaustive()
    }
}

impl StoreInner {
    fn lock_state(&self) -> MutexGuard<'_, CartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &CartState) {
        self.view_tx.send_replace(state.view());
    }

    /// Apply `apply` to the lines and persist according to `origin`.
    ///
    /// `apply` returns whether anything changed; unchanged local mutations
    /// are not transitions at all. The state lock is held throughout, so
    /// transitions (including the synchronous write of `Cleared`) are
    /// totally ordered with each other and with timer fires.
    fn transition(
        self: &Arc<Self>,
        origin: TransitionOrigin,
        apply: impl FnOnce(&mut Vec<CartLine>) -> bool,
    ) {
        let mut state = self.lock_state();
        let changed = apply(&mut state.lines);
        if !changed && origin == TransitionOrigin::LocalMutation {
            return;
        }

        state.revision += 1;
        self.publish(&state);
        debug!(%origin, revision = state.revision, lines = state.lines.len(), "Cart transition");

        match origin {
            TransitionOrigin::LocalMutation => self.schedule_write(&state),
            TransitionOrigin::SyncedFromBroadcast => {
                if self.timer.cancel() {
                    debug!("Dropped pending write superseded by another context");
                }
            }
            TransitionOrigin::Cleared => {
                self.timer.cancel();
                self.storage.save(&state.lines);
            }
        }
    }

    fn schedule_write(self: &Arc<Self>, state: &CartState) {
        if state.hydration != HydrationState::Hydrated {
            debug!(hydration = ?state.hydration, "Not persisting before hydration");
            return;
        }

        let weak = Arc::downgrade(self);
        let scheduled = self.timer.schedule(move |generation| {
            if let Some(inner) = weak.upgrade() {
                inner.fire(generation);
            }
        });
        if scheduled.is_none() {
            debug!("No async runtime; persisting immediately");
            self.storage.save(&state.lines);
        }
    }

    /// Timer callback: write the state as it is *now*, if still current.
    fn fire(&self, generation: u64) {
        let state = self.lock_state();
        if !self.timer.claim(generation) {
            debug!(generation, "Skipping superseded write");
            return;
        }
        self.storage.save(&state.lines);
    }

    fn flush(&self) {
        let state = self.lock_state();
        if self.timer.cancel() {
            self.storage.save(&state.lines);
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.flush();
    }
}

fn remove_line(lines: &mut Vec<CartLine>, key: &LineKey) -> bool {
    let before = lines.len();
    lines.retain(|line| line.line_key() != key);
    lines.len() != before
}
