//! Keyed one-shot waiter registry
//!
//! A process-level notification primitive: callers register interest in a
//! string key (a question id or a session id) and receive a one-shot channel
//! that fires when the key is notified. Delivery for `notify_first` is FIFO
//! in registration order; `notify_all` fans the payload out to every waiter
//! registered at notification time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// A single registered waiter
struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<T>,
}

/// Registry of waiters keyed by string identifier
pub struct WaiterRegistry<T> {
    waiters: Mutex<HashMap<String, Vec<Waiter<T>>>>,
    next_id: AtomicU64,
}

impl<T: Clone> WaiterRegistry<T> {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a waiter for `key`.
    ///
    /// Returns the waiter id (for `remove`) and the receiving end of the
    /// one-shot channel. Waiters are appended, so registration order is
    /// delivery order for `notify_first`.
    pub fn register(&self, key: &str) -> (u64, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut waiters = self.waiters.lock().unwrap();
        waiters
            .entry(key.to_string())
            .or_default()
            .push(Waiter { id, tx });

        (id, rx)
    }

    /// Remove a registered waiter without notifying it.
    ///
    /// No-op if the waiter already fired or was already removed.
    pub fn remove(&self, key: &str, waiter_id: u64) {
        let mut waiters = self.waiters.lock().unwrap();
        if let Some(list) = waiters.get_mut(key) {
            list.retain(|w| w.id != waiter_id);
            if list.is_empty() {
                waiters.remove(key);
            }
        }
    }

    /// Notify every waiter currently registered for `key`.
    ///
    /// The list is snapshotted under the lock, so waiters registered after
    /// this call starts are not notified. Returns the number of waiters that
    /// received the payload.
    pub fn notify_all(&self, key: &str, payload: T) -> usize {
        let snapshot = {
            let mut waiters = self.waiters.lock().unwrap();
            waiters.remove(key).unwrap_or_default()
        };

        let mut delivered = 0;
        for waiter in snapshot {
            // Receiver may have been dropped (e.g. a timed-out caller)
            if waiter.tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Notify the oldest surviving waiter for `key`, removing it.
    ///
    /// Waiters whose receiver was dropped (e.g. a timed-out caller that has
    /// not been removed yet) are discarded, so the payload always reaches a
    /// live waiter if one exists. Returns true if a waiter received it.
    pub fn notify_first(&self, key: &str, mut payload: T) -> bool {
        loop {
            let waiter = {
                let mut waiters = self.waiters.lock().unwrap();
                match waiters.get_mut(key) {
                    Some(list) if !list.is_empty() => {
                        let waiter = list.remove(0);
                        if list.is_empty() {
                            waiters.remove(key);
                        }
                        waiter
                    }
                    _ => return false,
                }
            };

            match waiter.tx.send(payload) {
                Ok(()) => return true,
                // Dead receiver: reclaim the payload and try the next waiter
                Err(returned) => payload = returned,
            }
        }
    }

    /// Remove all waiters for `key` without notifying them.
    ///
    /// Their receivers resolve with a channel-closed error.
    pub fn clear(&self, key: &str) {
        let mut waiters = self.waiters.lock().unwrap();
        waiters.remove(key);
    }

    /// Number of waiters currently registered for `key`
    #[cfg(test)]
    pub fn waiter_count(&self, key: &str) -> usize {
        let waiters = self.waiters.lock().unwrap();
        waiters.get(key).map(|l| l.len()).unwrap_or(0)
    }
}

impl<T: Clone> Default for WaiterRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
