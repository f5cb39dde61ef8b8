// src/bus/promise.rs
//! Single-assignment result cell
//!
//! The first `resolve` wins; later calls are ignored. Any number of
//! threads may block on `get` and are all woken by the resolving call.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Shared<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
    resolved: AtomicBool,
}

/// Handle to the eventual reply of a request
///
/// Clones share the same cell.
pub struct Promise<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                value: Mutex::new(None),
                ready: Condvar::new(),
                resolved: AtomicBool::new(false),
            }),
        }
    }

    /// Set the value if none is set yet
    ///
    /// Returns `false` when the promise was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let mut slot = self.inner.value.lock();
        if slot.is_some() {
            return false;
        }

        *slot = Some(value);
        self.inner.resolved.store(true, Ordering::Release);
        drop(slot);

        self.inner.ready.notify_all();
        true
    }

    /// Non-blocking snapshot
    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.load(Ordering::Acquire)
    }

    /// Number of live handles, including the broker's own
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T: Clone> Promise<T> {
    /// Block until resolved
    pub fn get(&self) -> T {
        let mut slot = self.inner.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.inner.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`
    ///
    /// `None` means the promise was still unresolved when the timeout
    /// elapsed; a late resolve is still accepted afterwards.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if self.inner.ready.wait_until(&mut slot, deadline).timed_out() {
                return (*slot).clone();
            }
        }
    }

    /// Current value without blocking
    pub fn try_get(&self) -> Option<T> {
        self.inner.value.lock().as_ref().cloned()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Type-erased view of a promise held in the broker's pending table
pub(crate) trait PendingSlot: Send + Sync {
    /// Resolve with a boxed value; hands the value back on type mismatch
    fn resolve_boxed(
        &self,
        value: Box<dyn Any + Send>,
    ) -> std::result::Result<bool, Box<dyn Any + Send>>;

    /// No handle outside the pending table remains
    fn is_orphaned(&self) -> bool;
}

impl<T: Send + 'static> PendingSlot for Promise<T> {
    fn resolve_boxed(
        &self,
        value: Box<dyn Any + Send>,
    ) -> std::result::Result<bool, Box<dyn Any + Send>> {
        let value = value.downcast::<T>()?;
        Ok(self.resolve(*value))
    }

    fn is_orphaned(&self) -> bool {
        self.handle_count() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_resolve_sets_result() {
        let promise = Promise::new();
        assert!(!promise.is_resolved());

        assert!(promise.resolve("result".to_string()));
        assert!(promise.is_resolved());
        assert_eq!(promise.get(), "result");
    }

    #[test]
    fn test_first_resolve_wins() {
        let promise = Promise::new();
        assert!(promise.resolve("A"));
        assert!(!promise.resolve("B"));
        assert_eq!(promise.get(), "A");
    }

    #[test]
    fn test_get_blocks_until_resolved() {
        let promise = Promise::new();
        let resolver = promise.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            resolver.resolve(42u32);
        });

        let start = Instant::now();
        assert_eq!(promise.get(), 42);
        assert!(start.elapsed() >= Duration::from_millis(100));
        handle.join().unwrap();
    }

    #[test]
    fn test_get_timeout_unresolved() {
        let promise: Promise<u32> = Promise::new();

        let start = Instant::now();
        assert_eq!(promise.get_timeout(Duration::from_millis(100)), None);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_get_timeout_resolved_in_time() {
        let promise = Promise::new();
        let resolver = promise.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            resolver.resolve("in time");
        });

        let start = Instant::now();
        assert_eq!(promise.get_timeout(Duration::from_millis(100)), Some("in time"));
        assert!(start.elapsed() < Duration::from_millis(90));
        handle.join().unwrap();
    }

    #[test]
    fn test_late_resolve_is_kept() {
        let promise = Promise::new();
        assert_eq!(promise.get_timeout(Duration::from_millis(10)), None);

        promise.resolve(7);
        assert_eq!(promise.try_get(), Some(7));
    }

    #[test]
    fn test_many_readers_are_woken() {
        let promise = Promise::new();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let p = promise.clone();
                thread::spawn(move || p.get())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        promise.resolve(5u8);

        for reader in readers {
            assert_eq!(reader.join().unwrap(), 5);
        }
    }

    #[test]
    fn test_concurrent_resolvers_single_winner() {
        let promise = Promise::new();
        let winners: usize = (0..8)
            .map(|i| {
                let p = promise.clone();
                thread::spawn(move || p.resolve(i))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
        assert!(promise.is_resolved());
    }

    #[test]
    fn test_pending_slot_type_mismatch() {
        let promise: Promise<u32> = Promise::new();
        let slot: &dyn PendingSlot = &promise;

        assert!(slot.resolve_boxed(Box::new("wrong")).is_err());
        assert!(!promise.is_resolved());

        assert_eq!(slot.resolve_boxed(Box::new(3u32)).ok(), Some(true));
        assert_eq!(promise.try_get(), Some(3));
    }

    #[test]
    fn test_orphan_detection() {
        let promise: Promise<u32> = Promise::new();
        let held = promise.clone();
        assert!(!PendingSlot::is_orphaned(&promise));

        drop(held);
        assert!(PendingSlot::is_orphaned(&promise));
    }
}
