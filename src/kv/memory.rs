//! In-process interlock backed by a `dashmap`-based bounded cache of
//! last-acquired timestamps, matching the original program's LRU locker.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::kv::Interlock;

const CAPACITY: usize = 1024;

pub struct MemoryInterlock {
    lifetime: Duration,
    entries: DashMap<String, Instant>,
}

impl MemoryInterlock {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            entries: DashMap::with_capacity(CAPACITY),
        }
    }

    fn evict_if_over_capacity(&self) {
        if self.entries.len() <= CAPACITY {
            return;
        }
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|e| *e.value())
            .map(|e| e.key().clone())
        {
            self.entries.remove(&oldest_key);
        }
    }
}

impl Interlock for MemoryInterlock {
    fn try_begin_update(&self, key: &str) -> bool {
        let now = Instant::now();
        let acquired = match self.entries.get(key) {
            Some(existing) if now.duration_since(*existing) <= self.lifetime => false,
            _ => true,
        };
        if acquired {
            self.entries.insert(key.to_string(), now);
            self.evict_if_over_capacity();
        }
        acquired
    }

    fn release(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_within_lifetime_is_rejected() {
        let lock = MemoryInterlock::new(Duration::from_secs(300));
        assert!(lock.try_begin_update("obj-1"));
        assert!(!lock.try_begin_update("obj-1"));
    }

    #[test]
    fn release_allows_immediate_reacquire() {
        let lock = MemoryInterlock::new(Duration::from_secs(300));
        assert!(lock.try_begin_update("obj-1"));
        lock.release("obj-1");
        assert!(lock.try_begin_update("obj-1"));
    }

    #[test]
    fn distinct_keys_do_not_contend() {
        let lock = MemoryInterlock::new(Duration::from_secs(300));
        assert!(lock.try_begin_update("obj-1"));
        assert!(lock.try_begin_update("obj-2"));
    }
}
