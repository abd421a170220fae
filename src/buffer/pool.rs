// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-layout buffer pools
//!
//! A pool hands out buffers of a single layout. Each [`PooledBuffer`] owns
//! its memory until dropped, at which point its release callback runs
//! exactly once and the memory goes back to the pool (or is discarded when
//! the pool has moved on to a different layout).

use crate::errors::{MaskError, MaskResult};
use crate::geometry::BitmaskLayout;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Direction of a CPU cache synchronization around device-visible writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSync {
    /// CPU is about to access the buffer
    Start,
    /// CPU access is finished, the device may read the buffer
    End,
}

type ReleaseFn = Box<dyn FnOnce(Box<[u8]>) + Send + Sync>;
type SyncFn = Arc<dyn Fn(CacheSync) + Send + Sync>;

/// A buffer borrowed from a pool, returned automatically on drop
pub struct PooledBuffer {
    data: Option<Box<[u8]>>,
    layout: BitmaskLayout,
    release: Option<ReleaseFn>,
    cache_sync: Option<SyncFn>,
}

impl PooledBuffer {
    /// Wrap memory with a release callback invoked exactly once on drop
    pub fn new(
        data: Box<[u8]>,
        layout: BitmaskLayout,
        release: impl FnOnce(Box<[u8]>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            data: Some(data),
            layout,
            release: Some(Box::new(release)),
            cache_sync: None,
        }
    }

    /// Attach a cache synchronization hook for device-shared memory
    pub fn with_cache_sync(mut self, sync: impl Fn(CacheSync) + Send + Sync + 'static) -> Self {
        self.cache_sync = Some(Arc::new(sync));
        self
    }

    pub fn layout(&self) -> BitmaskLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Run `f` with CPU write access, bracketed by cache synchronization
    pub fn write_with<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        if let Some(sync) = &self.cache_sync {
            sync(CacheSync::Start);
        }
        let result = f(self.data.as_deref_mut().unwrap_or(&mut []));
        if let Some(sync) = &self.cache_sync {
            sync(CacheSync::End);
        }
        result
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let (Some(data), Some(release)) = (self.data.take(), self.release.take()) {
            release(data);
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("layout", &self.layout)
            .field("cache_sync", &self.cache_sync.is_some())
            .finish()
    }
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub depth: usize,
    /// Buffers currently held by callers
    pub outstanding: usize,
    /// Buffers ready for reuse
    pub free: usize,
    /// Successful acquisitions since the pool was created
    pub acquired_total: u64,
    /// Incremented on every reinitialization
    pub generation: u64,
}

/// Source of bitmask buffers for the blender
pub trait BufferPool: Send + std::fmt::Debug {
    /// Switch to a new buffer layout
    ///
    /// Buffers still held from the previous layout stay valid and are
    /// discarded when released. On error the pool keeps its previous layout.
    fn reinit(&mut self, layout: BitmaskLayout) -> MaskResult<()>;

    /// Layout of the buffers handed out by [`BufferPool::acquire`]
    fn layout(&self) -> BitmaskLayout;

    /// Take a buffer without blocking; fails when the pool is exhausted
    fn acquire(&self) -> MaskResult<PooledBuffer>;

    fn stats(&self) -> PoolStats;
}

#[derive(Debug)]
struct PoolInner {
    layout: BitmaskLayout,
    depth: usize,
    max_bytes: usize,
    generation: u64,
    free: Vec<Box<[u8]>>,
    outstanding: usize,
    acquired_total: u64,
}

/// Heap-backed pool with a fixed number of buffers
///
/// Stands in for a DMA heap on hosts without one; the acquisition and
/// release protocol is identical.
#[derive(Debug, Clone)]
pub struct HeapBufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl HeapBufferPool {
    /// Largest single buffer the pool will allocate by default (64 MiB)
    pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

    /// Create a pool of `depth` buffers; call [`BufferPool::reinit`] to set a layout
    pub fn new(depth: usize) -> Self {
        Self::with_max_bytes(depth, Self::DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(depth: usize, max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                layout: BitmaskLayout::default(),
                depth,
                max_bytes,
                generation: 0,
                free: Vec::with_capacity(depth),
                outstanding: 0,
                acquired_total: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<PoolInner>) -> MutexGuard<'_, PoolInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BufferPool for HeapBufferPool {
    fn reinit(&mut self, layout: BitmaskLayout) -> MaskResult<()> {
        let mut inner = self.lock();
        if inner.depth == 0 {
            return Err(MaskError::BufferAllocation("pool depth is zero".into()));
        }
        if layout.size() > inner.max_bytes {
            return Err(MaskError::BufferAllocation(format!(
                "bitmask of {} bytes exceeds pool limit of {} bytes",
                layout.size(),
                inner.max_bytes
            )));
        }

        inner.layout = layout;
        inner.generation += 1;
        inner.free.clear();

        info!(
            width = layout.width,
            height = layout.height,
            stride = layout.stride,
            depth = inner.depth,
            generation = inner.generation,
            "Reinitialized bitmask buffer pool"
        );
        Ok(())
    }

    fn layout(&self) -> BitmaskLayout {
        self.lock().layout
    }

    fn acquire(&self) -> MaskResult<PooledBuffer> {
        let mut inner = self.lock();
        if inner.layout.is_empty() {
            return Err(MaskError::BufferAllocation(
                "pool has no layout, reinit it first".into(),
            ));
        }
        if inner.outstanding >= inner.depth {
            return Err(MaskError::BufferAllocation(format!(
                "pool exhausted ({} of {} buffers in use)",
                inner.outstanding, inner.depth
            )));
        }

        let size = inner.layout.size();
        let data = inner
            .free
            .pop()
            .unwrap_or_else(|| vec![0u8; size].into_boxed_slice());
        inner.outstanding += 1;
        inner.acquired_total += 1;

        let generation = inner.generation;
        let layout = inner.layout;
        let shared = Arc::clone(&self.inner);
        trace!(generation, outstanding = inner.outstanding, "Acquired pool buffer");

        Ok(PooledBuffer::new(data, layout, move |data| {
            let mut inner = lock_inner(&shared);
            inner.outstanding = inner.outstanding.saturating_sub(1);
            if generation == inner.generation && inner.free.len() < inner.depth {
                inner.free.push(data);
            } else {
                debug!(generation, "Discarded buffer from superseded pool layout");
            }
        }))
    }

    fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            depth: inner.depth,
            outstanding: inner.outstanding,
            free: inner.free.len(),
            acquired_total: inner.acquired_total,
            generation: inner.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(depth: usize) -> HeapBufferPool {
        let mut pool = HeapBufferPool::new(depth);
        pool.reinit(BitmaskLayout::new(16, 4)).unwrap();
        pool
    }

    #[test]
    fn test_acquire_before_reinit_fails() {
        let pool = HeapBufferPool::new(1);
        assert!(matches!(pool.acquire(), Err(MaskError::BufferAllocation(_))));
    }

    #[test]
    fn test_exhaustion_and_release() {
        let pool = pool(1);
        let buffer = pool.acquire().unwrap();
        assert_eq!(buffer.len(), 8);
        assert!(matches!(pool.acquire(), Err(MaskError::BufferAllocation(_))));

        drop(buffer);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 1);
        assert!(pool.acquire().is_ok());
        assert_eq!(pool.stats().acquired_total, 2);
    }

    #[test]
    fn test_release_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let buffer = PooledBuffer::new(vec![0u8; 4].into_boxed_slice(), BitmaskLayout::new(8, 4), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let shared = Arc::new(buffer);
        let other = Arc::clone(&shared);
        drop(shared);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(other);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reinit_discards_old_generation() {
        let mut pool = pool(1);
        let old = pool.acquire().unwrap();
        pool.reinit(BitmaskLayout::new(4, 16)).unwrap();
        drop(old);

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 0);
        assert_eq!(stats.generation, 2);

        let fresh = pool.acquire().unwrap();
        assert_eq!(fresh.layout(), BitmaskLayout::new(4, 16));
        assert_eq!(fresh.len(), 16);
    }

    #[test]
    fn test_reinit_over_limit_keeps_layout() {
        let mut pool = HeapBufferPool::with_max_bytes(1, 16);
        pool.reinit(BitmaskLayout::new(8, 8)).unwrap();
        let result = pool.reinit(BitmaskLayout::new(64, 64));
        assert!(matches!(result, Err(MaskError::BufferAllocation(_))));
        assert_eq!(pool.layout(), BitmaskLayout::new(8, 8));
    }

    #[test]
    fn test_write_with_brackets_cache_sync() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&events);
        let mut buffer = PooledBuffer::new(vec![0u8; 2].into_boxed_slice(), BitmaskLayout::new(8, 2), |_| {})
            .with_cache_sync(move |sync| recorder.lock().unwrap().push(sync));

        buffer.write_with(|data| data.fill(0xAA));
        assert_eq!(buffer.as_slice(), &[0xAA, 0xAA]);
        assert_eq!(*events.lock().unwrap(), vec![CacheSync::Start, CacheSync::End]);
    }
}
