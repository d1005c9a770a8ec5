//! Debounced persistence timer.
//!
//! [`PersistTimer`] owns at most one pending write. [`schedule`] replaces
//! whatever is pending with a fresh quiescence window, [`cancel`] drops it.
//! Every schedule and cancel bumps a generation counter, and a firing task
//! must [`claim`] its generation before writing: a task that was aborted
//! too late to stop it from running finds its generation stale and does
//! nothing.
//!
//! [`schedule`]: PersistTimer::schedule
//! [`cancel`]: PersistTimer::cancel
//! [`claim`]: PersistTimer::claim

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Default quiescence window before a scheduled write fires.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Timer for one pending durable write.
#[derive(Debug)]
pub struct PersistTimer {
    debounce: Duration,
    slot: Mutex<TimerSlot>,
}

#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl PersistTimer {
    /// Create an idle timer with the given quiescence window.
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            slot: Mutex::default(),
        }
    }

    /// The quiescence window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Schedule `fire` to run after the quiescence window, replacing any
    /// pending fire.
    ///
    /// `fire` receives the generation it was scheduled under and should pass
    /// it to [`claim`](Self::claim) before doing any work. Returns that
    /// generation, or `None` when called outside a tokio runtime (nothing is
    /// scheduled and the caller should write immediately).
    pub fn schedule<F>(&self, fire: F) -> Option<u64>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let runtime = Handle::try_current().ok()?;
        let mut slot = self.lock();
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        let debounce = self.debounce;
        slot.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            fire(generation);
        }));
        Some(generation)
    }

    /// Drop the pending fire, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        slot.generation = slot.generation.wrapping_add(1);
        slot.handle.take().is_some_and(|handle| {
            handle.abort();
            true
        })
    }

    /// Take ownership of the pending fire for `generation`.
    ///
    /// Returns `true` exactly once for the current generation; afterwards the
    /// timer is idle. Stale or already claimed generations return `false`.
    pub fn claim(&self, generation: u64) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        // Detach rather than abort: the claiming task is the one running.
        slot.handle.take().is_some()
    }

    /// Whether a fire is currently pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock().handle.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, TimerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PersistTimer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Drop for PersistTimer {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }
}
