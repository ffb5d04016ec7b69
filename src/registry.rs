//! Session handle registry
//!
//! Maps opaque integer handles to live sessions. A single mutex guards the
//! map and the handle counter, so allocation, lookup, and teardown are
//! linearized and every caller sees the same notion of handle validity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::BridgeError;

/// Opaque session handle passed across the bridge. `0` is never issued and
/// never valid.
pub type Handle = i64;

/// First handle ever issued; later handles count up and are never reused.
const FIRST_HANDLE: Handle = 1;

struct Inner<S> {
    sessions: HashMap<Handle, Arc<Mutex<S>>>,
    next_handle: Handle,
}

/// Thread-safe handle-to-session map with monotonic handle allocation.
///
/// Sessions are stored behind their own `Mutex`, so work on one session never
/// blocks work on another; the registry lock is held only for map accesses.
pub struct HandleRegistry<S> {
    inner: Mutex<Inner<S>>,
}

impl<S> HandleRegistry<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                next_handle: FIRST_HANDLE,
            }),
        }
    }

    /// Stores a session and returns its freshly allocated handle.
    pub fn insert(&self, session: S) -> Result<Handle, BridgeError> {
        let mut inner = self.inner.lock().map_err(|_| BridgeError::LockPoisoned {
            operation: "allocating a handle",
        })?;
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.sessions.insert(handle, Arc::new(Mutex::new(session)));
        Ok(handle)
    }

    /// Looks up a session, cloning its `Arc` so the registry lock is released
    /// before the caller starts working with the session.
    pub fn lookup(&self, handle: Handle) -> Result<Arc<Mutex<S>>, BridgeError> {
        let inner = self.inner.lock().map_err(|_| BridgeError::LockPoisoned {
            operation: "looking up a handle",
        })?;
        inner
            .sessions
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    /// Removes a session; returns whether anything was removed. Zero, unknown,
    /// and already-destroyed handles are a silent no-op, so this is safe to
    /// call any number of times from any thread.
    ///
    /// The session itself is freed when its last `Arc` drops, so destroying a
    /// handle mid-generation leaves the running call on valid memory.
    pub fn destroy(&self, handle: Handle) -> bool {
        // Teardown must not fail; recover the guard if a panic poisoned it.
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.sessions.remove(&handle).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S> Default for HandleRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_handles_start_at_one_and_increase() {
        let registry = HandleRegistry::new();
        assert_eq!(registry.insert("a").unwrap(), 1);
        assert_eq!(registry.insert("b").unwrap(), 2);
        assert_eq!(registry.insert("c").unwrap(), 3);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_zero_is_never_valid() {
        let registry: HandleRegistry<&str> = HandleRegistry::new();
        assert!(matches!(
            registry.lookup(0),
            Err(BridgeError::UnknownHandle(0))
        ));
        assert!(!registry.destroy(0));
    }

    #[test]
    fn test_lookup_unknown_handle() {
        let registry: HandleRegistry<&str> = HandleRegistry::new();
        assert!(matches!(
            registry.lookup(7),
            Err(BridgeError::UnknownHandle(7))
        ));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let registry = HandleRegistry::new();
        let handle = registry.insert(1u32).unwrap();
        assert!(registry.destroy(handle));
        assert!(!registry.destroy(handle));
        assert!(!registry.destroy(handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_are_never_reused() {
        let registry = HandleRegistry::new();
        let first = registry.insert(1u32).unwrap();
        assert!(registry.destroy(first));
        let second = registry.insert(2u32).unwrap();
        assert!(second > first);
        assert!(matches!(
            registry.lookup(first),
            Err(BridgeError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_concurrent_inserts_get_unique_handles() {
        let registry = Arc::new(HandleRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.insert(i).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handles in threads.into_iter().map(|t| t.join().unwrap()) {
            for handle in handles {
                assert!(handle >= 1);
                assert!(seen.insert(handle), "handle {handle} issued twice");
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(registry.len(), 400);
    }

    #[test]
    fn test_session_outlives_destroy() {
        let registry = HandleRegistry::new();
        let handle = registry.insert(String::from("live")).unwrap();
        let session = registry.lookup(handle).unwrap();
        assert!(registry.destroy(handle));
        // An Arc taken before destroy keeps the session usable.
        assert_eq!(*session.lock().unwrap(), "live");
        assert!(registry.is_empty());
    }
}
