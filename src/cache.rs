//! Per-core cache store.
//!
//! Each core owns a small direct-mapped table of cache lines; the slot for
//! address `a` is `a mod cache_size`, with no tag bits beyond the stored
//! address. The table is shared between the core's executor and its snoop
//! agent, so it lives behind a mutex, paired with a condition variable
//! that the snoop agent signals whenever a read response is installed.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::main_memory::{Address, Value};

/// The current MESI state of a cache line.
///
/// MODIFIED lines are dirty: main memory is stale for their address until
/// the value is written back. EXCLUSIVE and SHARED lines are clean.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MesiState {
    Modified,
    Exclusive,
    Shared,
    Invalid,
}

impl MesiState {
    /// The fixed integer encoding used by the observation stream.
    pub fn encode(self) -> u8 {
        match self {
            MesiState::Invalid => 0,
            MesiState::Shared => 1,
            MesiState::Exclusive => 2,
            MesiState::Modified => 3,
        }
    }
}

/// One cache line. `address` and `value` are only meaningful while the
/// line is in a non-INVALID state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub address: Address,
    pub value: Value,
    pub state: MesiState,
}

impl CacheLine {
    /// An unused line.
    pub fn empty() -> CacheLine {
        CacheLine {
            address: Address(0),
            value: 0,
            state: MesiState::Invalid,
        }
    }

    /// Whether this line is a valid copy of `address`.
    pub fn holds(&self, address: Address) -> bool {
        self.state != MesiState::Invalid && self.address == address
    }
}

/// How a local access relates to the slot it maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The slot holds a valid copy of the requested address.
    Hit,
    /// The slot remembers the requested address but the line is INVALID.
    AddressMiss,
    /// The slot is occupied by a different address; installing the new
    /// line may require evicting the old one.
    ConflictMiss,
}

/// The direct-mapped line table of one core.
pub struct CacheStore {
    lines: Vec<CacheLine>,
}

impl CacheStore {
    pub fn new(cache_size: usize) -> CacheStore {
        assert!(cache_size > 0, "cache must have at least one line");
        CacheStore {
            lines: vec![CacheLine::empty(); cache_size],
        }
    }

    /// The slot index for `address`.
    pub fn index_of(&self, address: Address) -> usize {
        address.0 % self.lines.len()
    }

    pub fn slot(&self, address: Address) -> &CacheLine {
        &self.lines[self.index_of(address)]
    }

    pub fn slot_mut(&mut self, address: Address) -> &mut CacheLine {
        let index = self.index_of(address);
        &mut self.lines[index]
    }

    /// Classify a local access to `address` against its slot.
    pub fn classify(&self, address: Address) -> Lookup {
        let line = self.slot(address);
        if line.address != address {
            Lookup::ConflictMiss
        } else if line.state == MesiState::Invalid {
            Lookup::AddressMiss
        } else {
            Lookup::Hit
        }
    }

    /// Whether the slot for `address` holds a SHARED copy of it. This is
    /// what an executor waits for after broadcasting a read request.
    pub fn has_shared(&self, address: Address) -> bool {
        let line = self.slot(address);
        line.holds(address) && line.state == MesiState::Shared
    }

    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
}

/// The cache of one core, shared between its executor and snoop agent.
pub struct CoreCache {
    store: Mutex<CacheStore>,
    filled: Condvar,
}

impl CoreCache {
    pub fn new(cache_size: usize) -> CoreCache {
        CoreCache {
            store: Mutex::new(CacheStore::new(cache_size)),
            filled: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CacheStore> {
        self.store.lock().expect("cache lock poisoned")
    }

    /// Install a read response as a SHARED copy of `address` and wake the
    /// executor if it is waiting out its response window.
    pub fn install_shared(&self, address: Address, value: Value) {
        let mut store = self.lock();
        *store.slot_mut(address) = CacheLine {
            address,
            value,
            state: MesiState::Shared,
        };
        self.filled.notify_all();
    }

    /// Block until the slot for `address` holds a SHARED copy of it or
    /// `window` elapses, whichever comes first. The guard is released
    /// while waiting, which is what lets the snoop agent install the
    /// response.
    pub fn wait_for_share<'a>(
        &'a self,
        guard: MutexGuard<'a, CacheStore>,
        address: Address,
        window: Duration,
    ) -> MutexGuard<'a, CacheStore> {
        let (guard, _) = self
            .filled
            .wait_timeout_while(guard, window, |store| !store.has_shared(address))
            .expect("cache lock poisoned");
        guard
    }

    /// Copy of every line, for reports and invariant checks.
    pub fn snapshot(&self) -> Vec<CacheLine> {
        self.lock().lines().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn state_encoding_is_fixed() {
        assert_eq!(MesiState::Invalid.encode(), 0);
        assert_eq!(MesiState::Shared.encode(), 1);
        assert_eq!(MesiState::Exclusive.encode(), 2);
        assert_eq!(MesiState::Modified.encode(), 3);
    }

    #[test]
    fn classify_distinguishes_miss_kinds() {
        let mut store = CacheStore::new(2);
        // Fresh cache: slot 0 remembers address 0 but is invalid.
        assert_eq!(store.classify(Address(0)), Lookup::AddressMiss);
        assert_eq!(store.classify(Address(4)), Lookup::ConflictMiss);

        *store.slot_mut(Address(4)) = CacheLine {
            address: Address(4),
            value: 9,
            state: MesiState::Modified,
        };
        assert_eq!(store.classify(Address(4)), Lookup::Hit);
        // Address 6 maps to the same slot as 4.
        assert_eq!(store.classify(Address(6)), Lookup::ConflictMiss);

        store.slot_mut(Address(4)).state = MesiState::Invalid;
        assert_eq!(store.classify(Address(4)), Lookup::AddressMiss);
    }

    #[test]
    fn install_makes_line_shared() {
        let cache = CoreCache::new(2);
        cache.install_shared(Address(5), 11);
        let store = cache.lock();
        assert!(store.has_shared(Address(5)));
        assert_eq!(store.slot(Address(5)).value, 11);
    }

    #[test]
    fn wait_returns_early_when_line_already_shared() {
        let cache = CoreCache::new(2);
        cache.install_shared(Address(3), 1);
        let start = Instant::now();
        let guard = cache.lock();
        let guard = cache.wait_for_share(guard, Address(3), Duration::from_secs(5));
        assert!(guard.has_shared(Address(3)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_times_out_without_a_response() {
        let cache = CoreCache::new(2);
        let guard = cache.lock();
        let guard = cache.wait_for_share(guard, Address(3), Duration::from_millis(50));
        assert!(!guard.has_shared(Address(3)));
    }

    #[test]
    fn wait_observes_concurrent_install() {
        let cache = Arc::new(CoreCache::new(2));
        let installer = Arc::clone(&cache);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            installer.install_shared(Address(7), 42);
        });

        let guard = cache.lock();
        let guard = cache.wait_for_share(guard, Address(7), Duration::from_secs(5));
        assert!(guard.has_shared(Address(7)));
        assert_eq!(guard.slot(Address(7)).value, 42);
        drop(guard);
        handle.join().unwrap();
    }
}
