//! # Buffer Pool
//!
//! Recycles [`WireBuffer`]s so the send and receive paths do not allocate per
//! datagram.
//!
//! ## Layout
//! - **Thread-local free list**: `release` always lands here, and `acquire`
//!   checks it first without taking a lock
//! - **Global free list**: mutex-guarded overflow shared by all threads
//!
//! Buffers released on one thread stay local to it until [`BufferPool::merge`]
//! moves them into the global list. Call it at a quiescent point (end of a
//! poll burst, before a thread exits) instead of relying on thread teardown.
//!
//! ## Usage
//! ```rust
//! use tos_net::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(1500);
//! pool.preallocate(8);
//!
//! let mut buffer = pool.acquire();
//! buffer.write::<u32>(42);
//! pool.release(buffer);
//! pool.merge();
//! assert_eq!(pool.stats().pooled, 8);
//! ```

use crate::core::wire_buffer::WireBuffer;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static LOCAL: RefCell<HashMap<u64, Vec<WireBuffer>>> = RefCell::new(HashMap::new());
}

/// Counters reported by [`BufferPool::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated by the pool and not yet trimmed
    pub created: usize,
    /// Buffers currently sitting in a free list (any thread)
    pub pooled: usize,
}

struct PoolInner {
    id: u64,
    buffer_capacity: usize,
    global: Mutex<Vec<WireBuffer>>,
    created: AtomicUsize,
    pooled: AtomicUsize,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Other threads' caches for this id are released with their thread.
        let _ = LOCAL.try_with(|local| local.borrow_mut().remove(&self.id));
    }
}

/// Thread-aware pool of fixed-capacity buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create an empty pool handing out buffers of `buffer_capacity` bytes
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                buffer_capacity,
                global: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
                pooled: AtomicUsize::new(0),
            }),
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.inner.buffer_capacity
    }

    fn take_local(&self) -> Option<WireBuffer> {
        LOCAL
            .try_with(|local| {
                local
                    .borrow_mut()
                    .get_mut(&self.inner.id)
                    .and_then(Vec::pop)
            })
            .ok()
            .flatten()
    }

    fn take_global(&self) -> Option<WireBuffer> {
        self.inner.global.lock().ok().and_then(|mut g| g.pop())
    }

    /// Take a buffer: thread-local list, then global list, then a new allocation
    pub fn acquire(&self) -> WireBuffer {
        if let Some(buffer) = self.take_local().or_else(|| self.take_global()) {
            self.inner.pooled.fetch_sub(1, Ordering::Relaxed);
            return buffer;
        }

        self.inner.created.fetch_add(1, Ordering::Relaxed);
        trace!(
            capacity = self.inner.buffer_capacity,
            "buffer pool miss, allocating"
        );
        WireBuffer::with_capacity(self.inner.buffer_capacity)
    }

    /// Reset `buffer` and return it to this thread's free list
    ///
    /// Buffers of a different capacity are dropped instead.
    pub fn release(&self, mut buffer: WireBuffer) {
        if buffer.capacity() != self.inner.buffer_capacity {
            trace!(
                capacity = buffer.capacity(),
                "foreign buffer not pooled"
            );
            return;
        }
        buffer.reset();

        let stored = LOCAL.try_with(|local| {
            local
                .borrow_mut()
                .entry(self.inner.id)
                .or_default()
                .push(buffer)
        });

        // Fails only while thread-local storage is torn down; the buffer is dropped.
        if stored.is_ok() {
            self.inner.pooled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Move this thread's free list into the global list
    pub fn merge(&self) {
        let local: Vec<WireBuffer> = LOCAL
            .try_with(|local| {
                local
                    .borrow_mut()
                    .get_mut(&self.inner.id)
                    .map(std::mem::take)
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        if local.is_empty() {
            return;
        }

        let count = local.len();
        if let Ok(mut global) = self.inner.global.lock() {
            global.extend(local);
        }
        trace!(count, "merged local buffers into global pool");
    }

    /// Allocate `count` buffers up front and publish them to the global list
    pub fn preallocate(&self, count: usize) {
        let _ = LOCAL.try_with(|local| {
            let mut local = local.borrow_mut();
            let list = local.entry(self.inner.id).or_default();
            for _ in 0..count {
                list.push(WireBuffer::with_capacity(self.inner.buffer_capacity));
            }
        });
        self.inner.created.fetch_add(count, Ordering::Relaxed);
        self.inner.pooled.fetch_add(count, Ordering::Relaxed);
        self.merge();
        debug!(count, "buffer pool preallocated");
    }

    /// Free global buffers until at most `min_count` are pooled
    pub fn trim_excess(&self, min_count: usize) {
        self.merge();

        let Ok(mut global) = self.inner.global.lock() else {
            return;
        };

        let mut trimmed = 0usize;
        while self.inner.pooled.load(Ordering::Relaxed) > min_count {
            if global.pop().is_none() {
                break;
            }
            self.inner.created.fetch_sub(1, Ordering::Relaxed);
            self.inner.pooled.fetch_sub(1, Ordering::Relaxed);
            trimmed += 1;
        }
        global.shrink_to_fit();
        debug!(trimmed, "buffer pool trimmed");
    }

    /// Drop every buffer in the global list, returning how many were freed
    pub fn clear(&self) -> usize {
        let drained = self
            .inner
            .global
            .lock()
            .map(|mut g| std::mem::take(&mut *g).len())
            .unwrap_or(0);
        self.inner.pooled.fetch_sub(drained, Ordering::Relaxed);
        self.inner.created.fetch_sub(drained, Ordering::Relaxed);
        drained
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            pooled: self.inner.pooled.load(Ordering::Relaxed),
        }
    }

    /// Buffers in the global list
    pub fn global_available(&self) -> usize {
        self.inner.global.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Buffers in this thread's free list
    pub fn local_available(&self) -> usize {
        LOCAL
            .try_with(|local| local.borrow().get(&self.inner.id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(crate::core::wire_buffer::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_capacity", &self.inner.buffer_capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_allocates_when_empty() {
        let pool = BufferPool::new(64);
        let buf = pool.acquire();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(pool.stats(), PoolStats { created: 1, pooled: 0 });
    }

    #[test]
    fn test_release_goes_local_and_is_reset() {
        let pool = BufferPool::new(64);
        let mut buf = pool.acquire();
        buf.write::<u32>(7);
        pool.release(buf);

        assert_eq!(pool.local_available(), 1);
        assert_eq!(pool.global_available(), 0);

        let again = pool.acquire();
        assert!(again.is_empty());
        assert_eq!(again.position(), 0);
        assert_eq!(pool.stats(), PoolStats { created: 1, pooled: 0 });
    }

    #[test]
    fn test_merge_publishes_to_global() {
        let pool = BufferPool::new(64);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        pool.merge();
        assert_eq!(pool.local_available(), 0);
        assert_eq!(pool.global_available(), 2);
    }

    #[test]
    fn test_foreign_capacity_not_pooled() {
        let pool = BufferPool::new(64);
        pool.release(WireBuffer::with_capacity(32));
        assert_eq!(pool.stats().pooled, 0);
    }

    #[test]
    fn test_preallocate_trim_clear() {
        let pool = BufferPool::new(64);
        pool.preallocate(10);
        assert_eq!(pool.stats(), PoolStats { created: 10, pooled: 10 });
        assert_eq!(pool.global_available(), 10);

        pool.trim_excess(4);
        assert_eq!(pool.stats(), PoolStats { created: 4, pooled: 4 });

        assert_eq!(pool.clear(), 4);
        assert_eq!(pool.stats(), PoolStats { created: 0, pooled: 0 });
    }

    #[test]
    fn test_pools_do_not_share_local_lists() {
        let a = BufferPool::new(64);
        let b = BufferPool::new(64);
        a.release(a.acquire());
        assert_eq!(a.local_available(), 1);
        assert_eq!(b.local_available(), 0);
    }

    #[test]
    fn test_other_thread_sees_merged_buffers() {
        let pool = BufferPool::new(64);
        let worker = pool.clone();
        std::thread::spawn(move || {
            worker.preallocate(3);
        })
        .join()
        .ok();

        assert_eq!(pool.global_available(), 3);
        let _buf = pool.acquire();
        assert_eq!(pool.stats().created, 3);
        assert_eq!(pool.stats().pooled, 2);
    }
}
