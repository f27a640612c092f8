// Heap Registry
//
// Maps small integer heap ids to pluggable allocators. MessageQ records the
// id in every message header and resolves it again on `free`, so both ends
// of a channel agree on heap identity by number rather than by pointer.
//
// Key responsibilities:
// - Bind and unbind allocators to heap ids
// - Resolve an id back to its allocator
// - Provide two concrete allocators: fixed-size blocks (`HeapBuf`) and a
//   byte-budget heap (`HeapMem`)
//
// Correctness and safety notes:
// - Registry and allocator state are protected by spinlocks
// - Unregistering a heap with outstanding blocks is the caller's problem;
//   blocks freed afterwards are rejected by `resolve`

use std::fmt;
use std::sync::Arc;

use ipcmgr::{log_debug, log_info, log_warn};
use spin::Mutex;

use crate::error::HeapError;

const LOG_ORIGIN: &str = "heap";

pub type HeapId = u16;

/// Memory handed out by a `Heap`
pub struct HeapBlock {
    data: Box<[u8]>,
    accounted: usize,
}

impl HeapBlock {
    fn new(len: usize, accounted: usize) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
            accounted,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for HeapBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapBlock")
            .field("len", &self.data.len())
            .field("accounted", &self.accounted)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub total_size: usize,
    pub total_free_size: usize,
    pub largest_free_size: usize,
}

/// Allocator collaborator
pub trait Heap: Send + Sync {
    /// Allocate `size` bytes, or `None` when the heap cannot satisfy it
    fn alloc(&self, size: usize) -> Option<HeapBlock>;
    fn free(&self, block: HeapBlock);
    fn stats(&self) -> HeapStats;
}

/// Fixed-size block pool
pub struct HeapBuf {
    block_size: usize,
    num_blocks: usize,
    free_blocks: Mutex<usize>,
}

impl HeapBuf {
    pub fn new(block_size: usize, num_blocks: usize) -> Self {
        Self {
            block_size,
            num_blocks,
            free_blocks: Mutex::new(num_blocks),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Heap for HeapBuf {
    fn alloc(&self, size: usize) -> Option<HeapBlock> {
        if size > self.block_size {
            log_debug!(LOG_ORIGIN, "HeapBuf: request {}B exceeds block size {}B", size, self.block_size);
            return None;
        }

        let mut free = self.free_blocks.lock();
        if *free == 0 {
            return None;
        }
        *free -= 1;
        Some(HeapBlock::new(size, self.block_size))
    }

    fn free(&self, block: HeapBlock) {
        let mut free = self.free_blocks.lock();
        if block.accounted != self.block_size || *free >= self.num_blocks {
            log_warn!(LOG_ORIGIN, "HeapBuf: rejected foreign block of {}B", block.accounted);
            return;
        }
        *free += 1;
    }

    fn stats(&self) -> HeapStats {
        let free = *self.free_blocks.lock();
        HeapStats {
            total_size: self.block_size * self.num_blocks,
            total_free_size: self.block_size * free,
            largest_free_size: if free > 0 { self.block_size } else { 0 },
        }
    }
}

/// Variable-size heap bounded by a byte budget
pub struct HeapMem {
    total_size: usize,
    used: Mutex<usize>,
}

impl HeapMem {
    /// Allocation granularity
    pub const ALIGN: usize = 8;

    pub fn new(total_size: usize) -> Self {
        Self {
            total_size,
            used: Mutex::new(0),
        }
    }
}

impl Heap for HeapMem {
    fn alloc(&self, size: usize) -> Option<HeapBlock> {
        let accounted = size.checked_add(Self::ALIGN - 1)? & !(Self::ALIGN - 1);
        let mut used = self.used.lock();
        if accounted > self.total_size - *used {
            return None;
        }
        *used += accounted;
        Some(HeapBlock::new(size, accounted))
    }

    fn free(&self, block: HeapBlock) {
        let mut used = self.used.lock();
        if block.accounted > *used {
            log_warn!(LOG_ORIGIN, "HeapMem: rejected foreign block of {}B", block.accounted);
            return;
        }
        *used -= block.accounted;
    }

    fn stats(&self) -> HeapStats {
        let free = self.total_size - *self.used.lock();
        HeapStats {
            total_size: self.total_size,
            total_free_size: free,
            largest_free_size: free,
        }
    }
}

/// heap id -> allocator binding
pub struct HeapRegistry {
    slots: Mutex<Vec<Option<Arc<dyn Heap>>>>,
}

impl HeapRegistry {
    pub fn new(num_heaps: u16) -> Self {
        log_info!(LOG_ORIGIN, "Heap registry with {} slots", num_heaps);
        Self {
            slots: Mutex::new(vec![None; num_heaps as usize]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Bind `heap` to `heap_id`.
    ///
    /// Returns `Ok(false)` without rebinding if the id is already bound.
    pub fn register(&self, heap: Arc<dyn Heap>, heap_id: HeapId) -> Result<bool, HeapError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(heap_id as usize).ok_or(HeapError::InvalidArgument)?;
        if slot.is_some() {
            log_debug!(LOG_ORIGIN, "heap id {} already bound", heap_id);
            return Ok(false);
        }
        *slot = Some(heap);
        log_debug!(LOG_ORIGIN, "registered heap id {}", heap_id);
        Ok(true)
    }

    pub fn unregister(&self, heap_id: HeapId) -> Result<(), HeapError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(heap_id as usize).ok_or(HeapError::InvalidArgument)?;
        match slot.take() {
            Some(_) => {
                log_debug!(LOG_ORIGIN, "unregistered heap id {}", heap_id);
                Ok(())
            }
            None => Err(HeapError::NotFound),
        }
    }

    pub fn resolve(&self, heap_id: HeapId) -> Result<Arc<dyn Heap>, HeapError> {
        let slots = self.slots.lock();
        match slots.get(heap_id as usize) {
            Some(Some(heap)) => Ok(heap.clone()),
            Some(None) => Err(HeapError::NotFound),
            None => Err(HeapError::InvalidArgument),
        }
    }

    /// Unbind every heap
    pub fn clear(&self) {
        self.slots.lock().iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_buf_accounting() {
        let heap = HeapBuf::new(64, 2);
        assert_eq!(heap.stats().total_free_size, 128);
        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(64).unwrap();
        assert_eq!(a.len(), 10);
        assert!(heap.alloc(1).is_none());
        assert!(heap.alloc(65).is_none());
        heap.free(a);
        heap.free(b);
        assert_eq!(heap.stats().total_free_size, 128);
    }

    #[test]
    fn test_heap_mem_rounds_and_restores() {
        let heap = HeapMem::new(64);
        let a = heap.alloc(3).unwrap();
        assert_eq!(heap.stats().total_free_size, 56);
        assert!(heap.alloc(57).is_none());
        heap.free(a);
        assert_eq!(heap.stats(), HeapStats { total_size: 64, total_free_size: 64, largest_free_size: 64 });
        assert!(heap.alloc(usize::MAX).is_none());
    }

    #[test]
    fn test_foreign_block_is_rejected() {
        let small = HeapBuf::new(16, 1);
        let big = HeapMem::new(1024);
        let block = big.alloc(200).unwrap();
        small.free(block);
        assert_eq!(small.stats().total_free_size, 16);
    }

    #[test]
    fn test_registry_bind_resolve_unbind() {
        let registry = HeapRegistry::new(4);
        let heap: Arc<dyn Heap> = Arc::new(HeapMem::new(256));
        assert_eq!(registry.register(heap.clone(), 1), Ok(true));
        assert_eq!(registry.register(heap.clone(), 1), Ok(false));
        assert_eq!(registry.register(heap, 4), Err(HeapError::InvalidArgument));

        assert_eq!(registry.resolve(1).unwrap().stats().total_size, 256);
        assert!(matches!(registry.resolve(0), Err(HeapError::NotFound)));
        assert!(matches!(registry.resolve(9), Err(HeapError::InvalidArgument)));

        assert_eq!(registry.unregister(1), Ok(()));
        assert_eq!(registry.unregister(1), Err(HeapError::NotFound));
    }
}
