//! Lock-free relay buffer pool
//!
//! Every relay direction borrows one buffer for its lifetime, so under N
//! concurrent connections the pool sees 2N checkouts. Buffers are reused
//! through a `crossbeam-queue::ArrayQueue` to avoid allocating a fresh
//! 32 KiB per direction; an empty pool allocates lazily and a full pool
//! drops returned buffers instead of blocking.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Default relay buffer size (matches the `proxy.buffer_size` default)
pub const DEFAULT_BUFFER_SIZE: usize = 32768;

/// Default pool capacity (number of retained buffers)
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Statistics for the buffer pool
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    /// New buffer allocations (pool was empty)
    allocations: AtomicU64,
    /// Buffer reuses from the pool
    reuses: AtomicU64,
    /// Buffers returned to the pool
    returns: AtomicU64,
    /// Buffers dropped because the pool was full
    drops: AtomicU64,
}

impl BufferPoolStats {
    /// Number of allocations
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of reuses
    #[must_use]
    pub fn reuses(&self) -> u64 {
        self.reuses.load(Ordering::Relaxed)
    }

    /// Number of returns
    #[must_use]
    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::Relaxed)
    }

    /// Number of drops
    #[must_use]
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

/// A pool of fixed-size relay buffers.
///
/// Buffers are returned automatically when the borrowing `PooledBuffer`
/// is dropped.
#[derive(Debug)]
pub struct RelayBufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    stats: BufferPoolStats,
}

impl RelayBufferPool {
    /// Create a pool with the given retention capacity and buffer size
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
            buffer_size,
            stats: BufferPoolStats::default(),
        }
    }

    /// Create a pool with default capacity for the given buffer size
    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, buffer_size)
    }

    /// Borrow a buffer, reusing a pooled one when available.
    ///
    /// Buffers stay at full length between uses; the relay read overwrites
    /// their contents, so no zeroing happens on reuse.
    #[must_use]
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buffer = if let Some(buf) = self.buffers.pop() {
            self.stats.reuses.fetch_add(1, Ordering::Relaxed);
            buf
        } else {
            self.stats.allocations.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.buffer_size]
        };

        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    /// Return a buffer; dropped if the pool is full
    fn return_buffer(&self, buffer: Vec<u8>) {
        match self.buffers.push(buffer) {
            Ok(()) => {
                self.stats.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Size of each buffer in bytes
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently available in the pool
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffers.len()
    }

    /// Pool statistics
    #[must_use]
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }
}

/// A buffer borrowed from the pool; returns on drop
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: Arc<RelayBufferPool>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buffer.take() {
            self.pool.return_buffer(buf);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref().map_or(&[], Vec::as_slice)
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.as_mut().map_or(&mut [], Vec::as_mut_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_allocates_then_reuses() {
        let pool = Arc::new(RelayBufferPool::new(10, 1024));

        let buf = pool.get();
        assert_eq!(buf.len(), 1024);
        assert_eq!(pool.stats().allocations(), 1);
        assert_eq!(pool.stats().reuses(), 0);

        drop(buf);
        assert_eq!(pool.stats().returns(), 1);
        assert_eq!(pool.available(), 1);

        let _buf = pool.get();
        assert_eq!(pool.stats().allocations(), 1);
        assert_eq!(pool.stats().reuses(), 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_full_pool_drops_returns() {
        let pool = Arc::new(RelayBufferPool::new(1, 64));

        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.stats().returns(), 1);
        assert_eq!(pool.stats().drops(), 1);
    }

    #[test]
    fn test_buffer_is_writable() {
        let pool = Arc::new(RelayBufferPool::new(4, 128));
        let mut buf = pool.get();
        buf[0] = 0xAB;
        buf[127] = 0xCD;
        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[127], 0xCD);
    }

    #[test]
    fn test_concurrent_checkout() {
        use std::thread;

        let pool = Arc::new(RelayBufferPool::new(64, 512));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.get();
                        buf[0] = 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.allocations() + stats.reuses(), 800);
    }
}
