//! The cross-process interlock: a keyed, TTL'd lease used by the engine to
//! stop two workers from processing the same object at once (§4.F).
//! Grounded on the original program's `updateLocker` dispatch between an
//! in-memory LRU lock and a Redis `SETNX`-style lock.

pub mod memory;
pub mod redis;

use std::time::Duration;

use crate::errors::StoreError;

/// `try_begin_update` returns `true` when the caller acquired the lease
/// (or refreshed an expired one) and should proceed; `false` means
/// another worker currently holds it.
pub trait Interlock: Send + Sync {
    fn try_begin_update(&self, key: &str) -> bool;

    /// Release the lease early (e.g. after a task batch completes well
    /// within the TTL). Best-effort; drivers that only support TTL
    /// expiry may no-op.
    fn release(&self, key: &str);
}

pub fn open_interlock(url: &str, lease: Duration) -> Result<Box<dyn Interlock>, StoreError> {
    if let Some(conn) = url.strip_prefix("redis://") {
        return Ok(Box::new(redis::RedisInterlock::new(format!("redis://{conn}"), lease)));
    }
    if url == "memory" || url.is_empty() {
        return Ok(Box::new(memory::MemoryInterlock::new(lease)));
    }
    Err(StoreError::Config(format!("invalid interlock option: {url}")))
}
