//! Fixed-size DMA buffer pool.
//!
//! The pool owns a statically sized, cache-line aligned memory region and
//! carves it into `count` buffers of `size` bytes each. Buffers are recycled
//! in ring order by the owning channel and never freed individually.
//!
//! The pool has no lock of its own: exclusivity is structural. A ring slot
//! is owned by exactly one side (producer, CPU or consumer) at a time, and
//! the channel bookkeeping that records that ownership lives behind the
//! channel's critical section.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::error::{ConfigError, ConfigResult};
use crate::internal::constants::{DMA_GRANULARITY, POOL_ALIGNMENT};

/// Backing storage aligned to the cache line.
#[repr(C, align(32))]
struct AlignedStorage<const BYTES: usize>([u8; BYTES]);

const _: () = assert!(core::mem::align_of::<AlignedStorage<0>>() == POOL_ALIGNMENT);

/// Buffer pool with `BYTES` bytes of DMA memory.
pub struct BufferPool<const BYTES: usize> {
    storage: UnsafeCell<AlignedStorage<BYTES>>,
    size: usize,
    count: usize,
}

impl<const BYTES: usize> BufferPool<BYTES> {
    /// Create an empty, unallocated pool. Const-compatible.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            storage: UnsafeCell::new(AlignedStorage([0u8; BYTES])),
            size: 0,
            count: 0,
        }
    }

    /// Total memory budget of the pool in bytes.
    #[must_use]
    pub const fn memory_usage() -> usize {
        BYTES
    }

    /// Lay out `count` buffers of `size` bytes.
    ///
    /// `size` must be a non-zero multiple of the DMA granularity (16 bytes).
    /// Fails with [`ConfigError::AllocationFailed`] when the buffers do not
    /// fit the memory budget. A `count` of zero is accepted and allocates
    /// nothing.
    pub fn allocate(&mut self, size: usize, count: usize) -> ConfigResult<()> {
        if size == 0 || size % DMA_GRANULARITY != 0 {
            return Err(ConfigError::BadArgument);
        }
        let total = size
            .checked_mul(count)
            .ok_or(ConfigError::AllocationFailed)?;
        if total > BYTES {
            return Err(ConfigError::AllocationFailed);
        }
        self.size = size;
        self.count = count;
        Ok(())
    }

    /// Invalidate every buffer of the pool.
    pub fn release(&mut self) {
        self.size = 0;
        self.count = 0;
    }

    /// Whether the pool currently has a layout.
    #[inline(always)]
    pub fn is_allocated(&self) -> bool {
        self.size != 0
    }

    /// Size of each buffer in bytes.
    #[inline(always)]
    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// Number of buffers in the pool.
    #[inline(always)]
    pub fn buffer_count(&self) -> usize {
        self.count
    }

    /// Address and capacity of buffer `index`.
    pub fn buffer(&self, index: usize) -> Option<(NonNull<u8>, usize)> {
        if index >= self.count {
            return None;
        }
        let base = self.storage.get().cast::<u8>();
        // SAFETY: index < count and count * size <= BYTES, so the offset
        // stays inside the storage array.
        let ptr = unsafe { base.add(index * self.size) };
        NonNull::new(ptr).map(|p| (p, self.size))
    }

    /// Mutable view of buffer `index`.
    ///
    /// # Safety
    ///
    /// The caller must own ring slot `index` (no other live reference to the
    /// same buffer may exist) and `index` must be below `buffer_count()`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slot_mut(&self, index: usize) -> &mut [u8] {
        debug_assert!(index < self.count);
        let base = self.storage.get().cast::<u8>();
        // SAFETY: bounds and exclusivity are guaranteed by the caller.
        unsafe { core::slice::from_raw_parts_mut(base.add(index * self.size), self.size) }
    }

    /// Shared view of buffer `index`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::slot_mut`]: no mutable reference to the slot
    /// may be live.
    pub(crate) unsafe fn slot(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.count);
        let base = self.storage.get().cast::<u8>().cast_const();
        // SAFETY: bounds and exclusivity are guaranteed by the caller.
        unsafe { core::slice::from_raw_parts(base.add(index * self.size), self.size) }
    }
}

impl<const BYTES: usize> Default for BufferPool<BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_unallocated() {
        let pool: BufferPool<1024> = BufferPool::new();
        assert!(!pool.is_allocated());
        assert_eq!(pool.buffer_count(), 0);
        assert!(pool.buffer(0).is_none());
    }

    #[test]
    fn allocate_rejects_unaligned_size() {
        let mut pool: BufferPool<1024> = BufferPool::new();
        assert_eq!(pool.allocate(100, 2), Err(ConfigError::BadArgument));
        assert_eq!(pool.allocate(0, 2), Err(ConfigError::BadArgument));
        assert!(!pool.is_allocated());
    }

    #[test]
    fn allocate_rejects_over_budget() {
        let mut pool: BufferPool<1024> = BufferPool::new();
        assert_eq!(pool.allocate(512, 3), Err(ConfigError::AllocationFailed));
        assert_eq!(
            pool.allocate(512, usize::MAX),
            Err(ConfigError::AllocationFailed)
        );
    }

    #[test]
    fn allocate_zero_count_is_override_only() {
        let mut pool: BufferPool<0> = BufferPool::new();
        assert_eq!(pool.allocate(512, 0), Ok(()));
        assert_eq!(pool.buffer_count(), 0);
        assert!(pool.buffer(0).is_none());
    }

    #[test]
    fn buffers_are_contiguous_and_aligned() {
        let mut pool: BufferPool<4096> = BufferPool::new();
        pool.allocate(1024, 4).unwrap();

        let (first, cap) = pool.buffer(0).unwrap();
        assert_eq!(cap, 1024);
        assert_eq!(first.as_ptr() as usize % POOL_ALIGNMENT, 0);

        for i in 1..4 {
            let (ptr, _) = pool.buffer(i).unwrap();
            assert_eq!(ptr.as_ptr() as usize - first.as_ptr() as usize, i * 1024);
        }
        assert!(pool.buffer(4).is_none());
    }

    #[test]
    fn release_invalidates_layout() {
        let mut pool: BufferPool<256> = BufferPool::new();
        pool.allocate(64, 4).unwrap();
        pool.release();
        assert!(!pool.is_allocated());
        assert!(pool.buffer(0).is_none());
    }

    #[test]
    fn slot_views_cover_whole_buffer() {
        let mut pool: BufferPool<128> = BufferPool::new();
        pool.allocate(64, 2).unwrap();
        unsafe {
            pool.slot_mut(1).fill(0xA5);
            assert_eq!(pool.slot(1).len(), 64);
            assert!(pool.slot(1).iter().all(|&b| b == 0xA5));
            assert!(pool.slot(0).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn memory_usage_reports_budget() {
        assert_eq!(BufferPool::<8192>::memory_usage(), 8192);
    }
}
