// ABOUTME: Concurrency-safe listener set keyed by Arc pointer identity
// ABOUTME: Mutations lock briefly; dispatch iterates over a snapshot taken outside the lock

use std::sync::{Arc, Mutex};

/// Set of shared listener handles.
///
/// Membership is by allocation identity, so registering the same `Arc` twice is
/// a no-op while two distinct listeners of the same type are both kept.
/// `snapshot` copies the handles out so callbacks run without the lock held and
/// may add or remove listeners themselves.
pub struct ListenerSet<L: ?Sized> {
    inner: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener. Returns false if it was already present.
    pub fn insert(&self, listener: Arc<L>) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        guard.push(listener);
        true
    }

    /// Remove a listener. Returns false if it was not present.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|l| !same_listener(l, listener));
        guard.len() != before
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().any(|l| same_listener(l, listener))
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

// Compare data pointers only; vtable pointers for the same object can differ
// across codegen units.
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
