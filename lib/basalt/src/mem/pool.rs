//! A pool allocator for uniformly sized elements.
//!
//! The pool owns a page-aligned arena divided into equally sized cells with
//! an intrusive free list threaded through them. The only bookkeeping outside
//! the arena is the head of that list, so allocation is a single pointer read
//! and deallocation is two pointer writes. The arena never grows, and cell
//! addresses are stable until the pool is dropped.

use crate::mem::{nearest_multiple, page_size, MemError};

use std::alloc::{alloc, dealloc, Layout};
use std::mem;
use std::ptr::NonNull;

pub struct PoolAllocator {
    arena: NonNull<u8>,
    layout: Layout,
    element_size: usize,
    capacity: usize,
    head: *mut FreeCell,
}

struct FreeCell {
    next: *mut FreeCell,
}

impl PoolAllocator {
    /// Creates a pool of `size` bytes (rounded up to a page multiple) carved
    /// into `element_size` cells.
    ///
    /// `element_size` must be at least pointer-sized; free cells hold the
    /// link to the next free cell.
    pub fn create(element_size: usize, size: usize) -> Result<PoolAllocator, MemError> {
        if element_size < mem::size_of::<*mut FreeCell>() {
            return Err(MemError::ElementTooSmall);
        }

        // Cells double as free-list links, so keep them pointer aligned.
        let element_size = nearest_multiple(element_size, mem::align_of::<*mut FreeCell>());
        let pool_size = nearest_multiple(size, page_size());
        let capacity = pool_size / element_size;

        let layout =
            Layout::from_size_align(pool_size, page_size()).map_err(|_| MemError::Reserve)?;
        let arena = unsafe { alloc(layout) };
        let arena = NonNull::new(arena).ok_or(MemError::Reserve)?;

        // Thread the free list through the cells, front to back.
        let mut head: *mut FreeCell = std::ptr::null_mut();
        for index in (0..capacity).rev() {
            let cell = unsafe { arena.as_ptr().add(index * element_size) } as *mut FreeCell;
            unsafe { (*cell).next = head };
            head = cell;
        }

        Ok(PoolAllocator {
            arena,
            layout,
            element_size,
            capacity,
            head,
        })
    }

    /// Pops the next free cell. Returns `None` when the pool is exhausted.
    #[inline]
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let cell = NonNull::new(self.head)?;
        self.head = unsafe { cell.as_ref().next };
        Some(cell.cast())
    }

    /// Pushes a cell back onto the free list.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `alloc` on this pool and must not be
    /// freed twice.
    #[inline]
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let cell = ptr.cast::<FreeCell>().as_ptr();
        (*cell).next = self.head;
        self.head = cell;
    }

    /// Size of each cell after alignment.
    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Total number of cells in the arena.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The cell index backing `ptr`.
    #[inline]
    pub fn index_of(&self, ptr: NonNull<u8>) -> usize {
        let offset = ptr.as_ptr() as usize - self.arena.as_ptr() as usize;
        offset / self.element_size
    }

    /// The cell at `index`. Panics when the index is out of bounds.
    #[inline]
    pub fn cell_at(&self, index: usize) -> NonNull<u8> {
        assert!(index < self.capacity, "cell index out of bounds");
        unsafe { NonNull::new_unchecked(self.arena.as_ptr().add(index * self.element_size)) }
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        unsafe { dealloc(self.arena.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    #[test]
    fn test_element_too_small() {
        let result = PoolAllocator::create(1, 4096);
        assert_eq!(result.err().unwrap(), MemError::ElementTooSmall);
    }

    #[test]
    fn test_capacity_rounded_to_page() {
        let pool = PoolAllocator::create(64, 100).unwrap();
        assert_eq!(pool.capacity(), page_size() / 64);
    }

    #[test]
    fn test_alloc_until_exhausted() {
        let mut pool = PoolAllocator::create(64, 4096).unwrap();
        let capacity = pool.capacity();

        let mut seen = HashSet::new();
        for _ in 0..capacity {
            let ptr = pool.alloc().unwrap();
            // Every allocation is distinct.
            assert!(seen.insert(ptr.as_ptr() as usize));
        }

        assert!(pool.alloc().is_none());
    }

    #[test]
    fn test_free_makes_cell_reusable() {
        let mut pool = PoolAllocator::create(64, 4096).unwrap();
        let capacity = pool.capacity();

        let mut held: Vec<_> = (0..capacity).map(|_| pool.alloc().unwrap()).collect();
        assert!(pool.alloc().is_none());

        let released = held.pop().unwrap();
        unsafe { pool.free(released) };

        let again = pool.alloc().unwrap();
        assert_eq!(again, released);
    }

    #[test]
    fn test_index_roundtrip() {
        let mut pool = PoolAllocator::create(64, 4096).unwrap();

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();

        assert_eq!(pool.cell_at(pool.index_of(a)), a);
        assert_eq!(pool.cell_at(pool.index_of(b)), b);
        assert_ne!(pool.index_of(a), pool.index_of(b));
    }

    #[test]
    fn test_randomized_alloc_free() {
        let mut pool = PoolAllocator::create(32, 4096).unwrap();
        let mut rng = rand::thread_rng();
        let mut live: Vec<NonNull<u8>> = Vec::new();

        for _ in 0..10_000 {
            if live.is_empty() || (live.len() < pool.capacity() && rng.gen_bool(0.55)) {
                if let Some(ptr) = pool.alloc() {
                    // No live allocation may alias another.
                    assert!(!live.contains(&ptr));
                    live.push(ptr);
                }
            } else {
                let index = rng.gen_range(0..live.len());
                let ptr = live.swap_remove(index);
                unsafe { pool.free(ptr) };
            }
        }

        // Draining everything leaves the full capacity allocatable again.
        for ptr in live.drain(..) {
            unsafe { pool.free(ptr) };
        }
        for _ in 0..pool.capacity() {
            assert!(pool.alloc().is_some());
        }
        assert!(pool.alloc().is_none());
    }
}
