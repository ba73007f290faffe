//! Subscription handles and the callback registry shared by every channel
//! implementation (spec.md §3 "Subscription", §4.2 "subscribe").

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::error;

pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    callback: Callback<T>,
}

/// Insertion-ordered list of callbacks registered on one channel or topic.
///
/// Dispatch happens in registration order; a panicking callback is caught
/// and logged rather than allowed to propagate (spec.md §4.2), and a
/// callback removed via its `Subscription` before a dispatch never sees
/// that dispatch (spec.md §8).
pub struct Registry<T> {
    entries: Mutex<Vec<Entry<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + 'static> Registry<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(self: &Arc<Self>, callback: Callback<T>) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().push(Entry { id, callback });
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    pub fn dispatch(&self, message: &T) {
        // Clone the callback list out from under the lock so a callback
        // that re-enters (subscribes/unsubscribes) can't deadlock.
        let callbacks: Vec<Callback<T>> = {
            let entries = self.entries.lock().unwrap();
            entries.iter().map(|e| Arc::clone(&e.callback)).collect()
        };
        for callback in callbacks {
            let message = message.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(message)));
            if let Err(panic) = result {
                let text = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".into());
                error!(panic = %text, "subscriber callback panicked");
            }
        }
    }

    fn remove(&self, id: u64) {
        self.entries.lock().unwrap().retain(|e| e.id != id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A handle representing one registered callback. Dropping it removes the
/// callback before any later dispatch observes it.
pub struct Subscription<T: Clone + Send + 'static> {
    id: u64,
    registry: std::sync::Weak<Registry<T>>,
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

pub type FrameCallback = Callback<devlink_wire::Frame>;
pub type FrameRegistry = Registry<devlink_wire::Frame>;
pub type FrameSubscription = Subscription<devlink_wire::Frame>;

pub type RawCallback = Callback<Vec<u8>>;
pub type RawRegistry = Registry<Vec<u8>>;
pub type RawSubscription = Subscription<Vec<u8>>;
