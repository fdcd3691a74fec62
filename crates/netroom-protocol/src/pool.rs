//! Process-wide pool of byte buffers.
//!
//! Every encode leases a [`WriterLease`] and every inbound payload is
//! adopted into a [`ReaderLease`]. Dropping a lease hands its buffer back,
//! so buffers are reused on every exit path, early `?` returns and unwinds
//! included.
//!
//! A lease is the only owner of its buffer. Leases are not `Clone`.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::stream::{self, NetReader, NetWriter};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits for a [`StreamPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle buffers kept for reuse.
    pub max_pooled: usize,
    /// Buffers that grew beyond this many bytes are freed on return.
    pub max_retained_capacity: usize,
    /// Capacity of a freshly allocated buffer.
    pub initial_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pooled: 64,
            max_retained_capacity: 64 * 1024,
            initial_capacity: stream::CHUNK_SIZE,
        }
    }
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Leases handed out, readers and writers together.
    pub leases: u64,
    /// Leases that found the pool empty and had to allocate.
    pub misses: u64,
    /// Buffers put back for reuse.
    pub returns: u64,
    /// Buffers freed on return (too large, or pool already full).
    pub discarded: u64,
}

// ---------------------------------------------------------------------------
// StreamPool
// ---------------------------------------------------------------------------

/// A bounded free-list of byte buffers shared by every room.
#[derive(Debug)]
pub struct StreamPool {
    config: PoolConfig,
    idle: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
    leases: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    discarded: AtomicU64,
}

impl StreamPool {
    /// Growth step of pooled writers.
    pub const CHUNK_SIZE: usize = stream::CHUNK_SIZE;

    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::with_capacity(config.max_pooled)),
            outstanding: AtomicUsize::new(0),
            leases: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// The process-wide pool, created with default limits on first use.
    pub fn global() -> Arc<StreamPool> {
        static GLOBAL: OnceLock<Arc<StreamPool>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(StreamPool::new(PoolConfig::default())))
            .clone()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Leases an empty writer.
    pub fn writer(&self) -> WriterLease<'_> {
        let buf = self.acquire();
        WriterLease {
            pool: self,
            writer: NetWriter::from_buffer(buf),
        }
    }

    /// Adopts an inbound payload. Its buffer joins the pool once the lease
    /// is dropped.
    pub fn reader(&self, data: Vec<u8>) -> ReaderLease<'_> {
        self.leases.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        ReaderLease { pool: self, data }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            leases: self.leases.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Number of idle buffers.
    pub fn pooled(&self) -> usize {
        self.lock_idle().len()
    }

    /// Total capacity held by idle buffers, in bytes.
    pub fn retained_capacity(&self) -> usize {
        self.lock_idle().iter().map(Vec::capacity).sum()
    }

    /// Leases currently alive.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        // The free-list holds plain buffers; a panic elsewhere cannot leave
        // it inconsistent.
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self) -> Vec<u8> {
        self.leases.fetch_add(1, Ordering::Relaxed);
        let outstanding = self.outstanding.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(buf) = self.lock_idle().pop() {
            return buf;
        }
        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        if outstanding > self.config.max_pooled {
            tracing::warn!(
                outstanding,
                misses,
                max_pooled = self.config.max_pooled,
                "stream pool exhausted, allocating"
            );
        } else {
            tracing::trace!(outstanding, misses, "stream pool empty, allocating");
        }
        Vec::with_capacity(self.config.initial_capacity)
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if buf.capacity() > self.config.max_retained_capacity {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buf.clear();
        let mut idle = self.lock_idle();
        if idle.len() >= self.config.max_pooled {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        idle.push(buf);
        self.returns.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for StreamPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

/// A pooled [`NetWriter`]. Derefs to the writer.
#[derive(Debug)]
pub struct WriterLease<'p> {
    pool: &'p StreamPool,
    writer: NetWriter,
}

impl WriterLease<'_> {
    /// Copies the written bytes out. The buffer itself stays pooled.
    pub fn to_vec(&self) -> Vec<u8> {
        self.writer.as_slice().to_vec()
    }
}

impl Deref for WriterLease<'_> {
    type Target = NetWriter;

    fn deref(&self) -> &NetWriter {
        &self.writer
    }
}

impl DerefMut for WriterLease<'_> {
    fn deref_mut(&mut self) -> &mut NetWriter {
        &mut self.writer
    }
}

impl Drop for WriterLease<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.writer).into_inner();
        self.pool.release(buf);
    }
}

/// A pooled inbound payload.
#[derive(Debug)]
pub struct ReaderLease<'p> {
    pool: &'p StreamPool,
    data: Vec<u8>,
}

impl ReaderLease<'_> {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// A cursor over the whole payload.
    pub fn reader(&self) -> NetReader<'_> {
        NetReader::new(&self.data)
    }
}

impl Drop for ReaderLease<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.data);
        self.pool.release(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> StreamPool {
        StreamPool::new(PoolConfig {
            max_pooled: 2,
            max_retained_capacity: 4 * StreamPool::CHUNK_SIZE,
            initial_capacity: StreamPool::CHUNK_SIZE,
        })
    }

    #[test]
    fn test_writer_buffer_is_reused() {
        let pool = small_pool();
        {
            let mut w = pool.writer();
            w.put_u32(7);
        }
        assert_eq!(pool.pooled(), 1);
        let w = pool.writer();
        assert!(w.is_empty(), "leased writer must start empty");
        drop(w);

        let stats = pool.stats();
        assert_eq!(stats.leases, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.returns, 2);
    }

    #[test]
    fn test_oversized_buffers_are_discarded() {
        let pool = small_pool();
        {
            let mut w = pool.writer();
            w.put_bytes(&vec![0u8; 8 * StreamPool::CHUNK_SIZE]);
        }
        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn test_pool_keeps_at_most_max_pooled() {
        let pool = small_pool();
        let leases: Vec<_> = (0..4).map(|_| pool.writer()).collect();
        assert_eq!(pool.outstanding(), 4);
        drop(leases);
        assert_eq!(pool.pooled(), 2);
        assert_eq!(pool.stats().discarded, 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_lease_returns_on_error_path() {
        fn fails(pool: &StreamPool) -> Result<(), crate::SerdeError> {
            let mut w = pool.writer();
            w.put_length(usize::MAX)?;
            Ok(())
        }
        let pool = small_pool();
        assert!(fails(&pool).is_err());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_reader_lease_adopts_payload() {
        let pool = small_pool();
        {
            let lease = pool.reader(vec![9, 0]);
            let mut r = lease.reader();
            assert_eq!(r.take_u16().unwrap(), 9);
        }
        assert_eq!(pool.pooled(), 1);
        assert_eq!(pool.stats().returns, 1);
    }

    #[test]
    fn test_retained_capacity_is_bounded_over_many_cycles() {
        let pool = small_pool();
        for i in 0..1_000 {
            let mut w = pool.writer();
            w.put_bytes(&vec![1u8; (i % 3) * 700]);
        }
        assert!(pool.retained_capacity() <= 2 * 4 * StreamPool::CHUNK_SIZE);
        assert_eq!(pool.pooled(), 1);
    }
}
