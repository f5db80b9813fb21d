//! Memory primitives: a fixed-element pool allocator and an alias-mapped
//! ring buffer with a read/write cursor view.

pub mod pool;
pub mod ring;

pub use pool::PoolAllocator;
pub use ring::{RingBuffer, RwBuffer};

use std::fmt;

/// Failure modes of the memory primitives.
#[derive(Debug, Eq, PartialEq)]
pub enum MemError {
    /// The element size cannot hold the intrusive free-list link.
    ElementTooSmall,
    /// The arena or address-region reservation failed.
    Reserve,
    /// Creating the backing memory object failed.
    BackingCreate,
    /// Sizing the backing memory object failed.
    BackingTruncate,
    /// Mapping one of the aliased slices failed.
    SliceMap,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemError::ElementTooSmall => write!(f, "pool element size below link size"),
            MemError::Reserve => write!(f, "address region reservation failed"),
            MemError::BackingCreate => write!(f, "backing object creation failed"),
            MemError::BackingTruncate => write!(f, "backing object truncation failed"),
            MemError::SliceMap => write!(f, "ring slice mapping failed"),
        }
    }
}

impl std::error::Error for MemError {}

/// Rounds `size` up to the nearest multiple of `multiple`.
#[inline]
pub(crate) fn nearest_multiple(size: usize, multiple: usize) -> usize {
    (size + multiple - 1) / multiple * multiple
}

/// The system page size.
#[inline]
pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
