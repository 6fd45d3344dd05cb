//! Per-entity lock arena with bounded acquisition.
//!
//! Graph mutations on the same entity key must be mutually exclusive while
//! mutations on disjoint keys proceed in parallel. The arena hands out one
//! lock per key, lazily; acquisition waits at most a configured timeout and
//! then fails with a retryable [`GraphError::Contention`] instead of
//! deadlocking.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::GraphError;
use crate::knowledge::GraphResult;

/// One slot in the arena: a busy flag guarded by a condvar.
#[derive(Debug, Default)]
struct KeyLock {
    busy: Mutex<bool>,
    released: Condvar,
}

/// Arena of per-key locks with bounded waits.
#[derive(Debug)]
pub struct LockArena {
    locks: DashMap<String, Arc<KeyLock>>,
    timeout: Duration,
}

impl LockArena {
    /// Create an arena with the given acquisition timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire the lock for an entity key, waiting at most the arena timeout.
    ///
    /// Returns a guard that releases the key on drop, so a cancelled caller
    /// can never leave a key locked.
    pub fn acquire(&self, key: &str) -> GraphResult<KeyGuard> {
        let slot = self
            .locks
            .entry(key.to_string())
            .or_default()
            .value()
            .clone();

        let deadline = Instant::now() + self.timeout;
        let mut busy = slot.busy.lock().unwrap_or_else(|e| e.into_inner());
        while *busy {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GraphError::Contention {
                    key: key.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            let (guard, result) = slot
                .released
                .wait_timeout(busy, remaining)
                .unwrap_or_else(|e| e.into_inner());
            busy = guard;
            if result.timed_out() && *busy {
                return Err(GraphError::Contention {
                    key: key.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }
        *busy = true;
        drop(busy);

        Ok(KeyGuard { slot })
    }
}

/// RAII guard for an acquired entity key.
#[derive(Debug)]
pub struct KeyGuard {
    slot: Arc<KeyLock>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut busy = self.slot.busy.lock().unwrap_or_else(|e| e.into_inner());
        *busy = false;
        self.slot.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn acquire_and_release() {
        let arena = LockArena::new(Duration::from_millis(50));
        let guard = arena.acquire("concept:tokio").unwrap();
        drop(guard);
        // Reacquire after release succeeds.
        let _guard = arena.acquire("concept:tokio").unwrap();
    }

    #[test]
    fn disjoint_keys_do_not_block() {
        let arena = LockArena::new(Duration::from_millis(50));
        let _a = arena.acquire("concept:a").unwrap();
        let _b = arena.acquire("concept:b").unwrap();
    }

    #[test]
    fn contended_key_times_out_with_retryable_error() {
        let arena = LockArena::new(Duration::from_millis(20));
        let _held = arena.acquire("hot").unwrap();

        let err = arena.acquire("hot").unwrap_err();
        assert!(matches!(err, GraphError::Contention { .. }));
    }

    #[test]
    fn waiter_proceeds_once_holder_releases() {
        let arena = Arc::new(LockArena::new(Duration::from_millis(500)));
        let guard = arena.acquire("shared").unwrap();

        let arena2 = Arc::clone(&arena);
        let waiter = thread::spawn(move || arena2.acquire("shared").map(|_| ()));

        thread::sleep(Duration::from_millis(30));
        drop(guard);

        waiter.join().unwrap().unwrap();
    }
}
