//! Subscription registry — live realtime subscriptions keyed by token id.
//!
//! Each subscription is a pump task draining a [`ChangeStream`] into a
//! handler. The registry guarantees:
//! - at most one live subscription per key (`open` replaces),
//! - `close` is idempotent and runs the remote teardown at most once,
//! - once `close` returns, the handler of that subscription never runs again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::errors::GatewayError;
use crate::gateway::{ChangeStream, Teardown};

/// Caller-side view of one subscription.
///
/// The `gate` doubles as the active flag: the pump holds it while running the
/// handler, and `close` flips it under the same lock.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    key: Arc<str>,
    gate: Arc<Mutex<bool>>,
}

impl SubscriptionHandle {
    fn new(id: u64, key: &str) -> Self {
        Self {
            id,
            key: Arc::from(key),
            gate: Arc::new(Mutex::new(true)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        *self.lock_gate()
    }

    fn lock_gate(&self) -> MutexGuard<'_, bool> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deactivate(&self) -> bool {
        let mut active = self.lock_gate();
        std::mem::replace(&mut *active, false)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}

struct Entry {
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
    teardown: Option<Teardown>,
}

impl Entry {
    /// Close and wait out any handler call in flight.
    fn shutdown(self) {
        self.handle.deactivate();
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        // A pump dropping the last registry reference mid-handler still holds
        // its own gate; the abort below stops it either way.
        match self.handle.gate.try_lock() {
            Ok(mut active) => *active = false,
            Err(TryLockError::Poisoned(poisoned)) => *poisoned.into_inner() = false,
            Err(TryLockError::WouldBlock) => {}
        }
        self.task.abort();
        if let Some(teardown) = self.teardown.take() {
            if let Err(e) = teardown() {
                // the key is closed locally either way
                tracing::warn!(key = %self.handle.key, error = %e, "subscription teardown failed");
            }
        }
    }
}

/// Registry of live subscriptions. Cheap to clone; clones share state.
///
/// Pump tasks only hold a weak reference, so dropping the last clone closes
/// every subscription.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<DashMap<String, Entry>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start pumping `stream` into `on_event` under `key`.
    ///
    /// Any live subscription for `key` is closed first. Must be called from
    /// within a tokio runtime.
    pub fn open<T, F>(
        &self,
        key: impl Into<String>,
        stream: ChangeStream<T>,
        mut on_event: F,
    ) -> SubscriptionHandle
    where
        T: Send + 'static,
        F: FnMut(Result<T, GatewayError>) + Send + 'static,
    {
        let key = key.into();
        self.close(&key);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle::new(id, &key);
        let (mut events, teardown) = stream.into_parts();

        let pump = handle.clone();
        let entries = Arc::downgrade(&self.entries);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                {
                    let active = pump.lock_gate();
                    if !*active {
                        tracing::debug!(key = %pump.key, "dropping event delivered after close");
                        return;
                    }
                    on_event(event);
                }
            }

            tracing::debug!(key = %pump.key, "subscription stream ended");
            if pump.deactivate() {
                if let Some(entries) = entries.upgrade() {
                    // dropping the entry runs its teardown
                    entries.remove_if(&*pump.key, |_, e| e.handle.id == pump.id);
                }
            }
        });

        tracing::debug!(key = %key, subscription_id = id, "subscription opened");
        self.entries.insert(
            key,
            Entry {
                handle: handle.clone(),
                task,
                teardown,
            },
        );
        // the stream may have ended before the entry existed
        if !handle.is_active() {
            if let Some((_, entry)) = self.entries.remove_if(&handle.key[..], |_, e| e.handle.id == id) {
                entry.shutdown();
            }
        }
        handle
    }

    /// Close the subscription for `key`. Unknown or closed keys are a no-op.
    pub fn close(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                tracing::debug!(key, subscription_id = entry.handle.id, "subscription closed");
                entry.shutdown();
                true
            }
            None => false,
        }
    }

    /// Close every tracked subscription and clear the registry.
    pub fn close_all(&self) -> usize {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let closed = keys.iter().filter(|key| self.close(key)).count();
        if closed > 0 {
            tracing::info!(count = closed, "closed all subscriptions");
        }
        closed
    }

    /// True when `key` has a subscription that can still deliver events.
    pub fn is_open(&self, key: &str) -> bool {
        // release the shard guard before taking the gate
        let handle = self.entries.get(key).map(|e| e.handle.clone());
        handle.map(|h| h.is_active()).unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────
