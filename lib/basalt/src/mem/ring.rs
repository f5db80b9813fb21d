//! An alias-mapped ring buffer.
//!
//! The ring maps the same physical pages repeatedly over a contiguous virtual
//! address range, so a buffer of size 4096 with count 1 guarantees
//! `data[0]` and `data[4096]` are the same byte. Readers and writers can
//! treat any window of up to `size` bytes, starting anywhere in the ring, as
//! flat memory. That removes every wrap-around branch and copy from the hot
//! receive path.
//!
//! `RwBuffer` layers monotonically increasing read and write cursors on top,
//! exposing the readable span and the writable span as contiguous slices.

use crate::mem::{nearest_multiple, page_size, MemError};

use std::slice;

pub struct RingBuffer {
    data: *mut u8,
    size: usize,
    count: usize,
}

impl RingBuffer {
    /// Allocates a ring of at least `min_size` bytes whose address range is
    /// repeated `count` times past the first mapping.
    ///
    /// The actual size is rounded up to a page multiple. The same anonymous
    /// backing object is mapped at every multiple of `size` inside the
    /// reserved region, so all the views alias the same pages.
    pub fn alloc(min_size: usize, count: usize) -> Result<RingBuffer, MemError> {
        let size = nearest_multiple(min_size.max(1), page_size());
        let total = size * (count + 1);

        // Reserve the full region first so the aliased views land at fixed
        // addresses inside it.
        let data = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if data == libc::MAP_FAILED {
            return Err(MemError::Reserve);
        }
        let data = data as *mut u8;

        let fd = unsafe {
            libc::memfd_create(b"basalt_ring\0".as_ptr() as *const libc::c_char, 0)
        };
        if fd < 0 {
            unsafe { libc::munmap(data as *mut libc::c_void, total) };
            return Err(MemError::BackingCreate);
        }

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            unsafe {
                libc::munmap(data as *mut libc::c_void, total);
                libc::close(fd);
            }
            return Err(MemError::BackingTruncate);
        }

        for slot in 0..=count {
            let slice = unsafe {
                libc::mmap(
                    data.add(slot * size) as *mut libc::c_void,
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_FIXED | libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if slice == libc::MAP_FAILED {
                // Tearing down the whole reservation also unmaps the slices
                // already placed inside it.
                unsafe {
                    libc::munmap(data as *mut libc::c_void, total);
                    libc::close(fd);
                }
                return Err(MemError::SliceMap);
            }
        }

        unsafe { libc::close(fd) };

        Ok(RingBuffer { data, size, count })
    }

    /// Size of one repetition in bytes. Always a page multiple.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// How many times the address range repeats past the first mapping.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Base address of the mapping, valid for `size * (count + 1)` bytes.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.data
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(
                self.data as *mut libc::c_void,
                self.size * (self.count + 1),
            )
        };
    }
}

/// A ring buffer with producer and consumer cursors.
///
/// The cursors only ever advance; positions inside the mapping are taken
/// modulo the ring size. The readable span starts at the read cursor and the
/// writable span follows it immediately, both contiguous in virtual memory
/// thanks to the alias mapping.
pub struct RwBuffer {
    ring: RingBuffer,
    read: u64,
    write: u64,
}

impl RwBuffer {
    #[inline]
    pub fn new(ring: RingBuffer) -> RwBuffer {
        RwBuffer {
            ring,
            read: 0,
            write: 0,
        }
    }

    /// Allocates a fresh ring and wraps it.
    pub fn alloc(min_size: usize, count: usize) -> Result<RwBuffer, MemError> {
        Ok(RwBuffer::new(RingBuffer::alloc(min_size, count)?))
    }

    /// Bytes available to read.
    #[inline]
    pub fn len(&self) -> usize {
        self.write.wrapping_sub(self.read) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of free space available to write.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.ring.size() - self.len()
    }

    /// Start of the readable data.
    #[inline]
    pub fn read_ptr(&self) -> *mut u8 {
        let offset = (self.read % self.ring.size() as u64) as usize;
        unsafe { self.ring.base().add(offset) }
    }

    /// Start of the writable space. Follows the readable data directly.
    #[inline]
    pub fn write_ptr(&self) -> *mut u8 {
        unsafe { self.read_ptr().add(self.len()) }
    }

    /// Consume `count` readable bytes.
    #[inline]
    pub fn advance_read(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.read = self.read.wrapping_add(count as u64);
    }

    /// Commit `count` written bytes.
    #[inline]
    pub fn advance_write(&mut self, count: usize) {
        debug_assert!(count <= self.free_capacity());
        self.write = self.write.wrapping_add(count as u64);
    }

    /// The readable span as one contiguous slice.
    #[inline]
    pub fn readable(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.read_ptr(), self.len()) }
    }

    /// The writable span as one contiguous slice.
    #[inline]
    pub fn writable(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.write_ptr(), self.free_capacity()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_rounded_to_page() {
        let ring = RingBuffer::alloc(100, 1).unwrap();
        assert_eq!(ring.size(), page_size());
        assert_eq!(ring.count(), 1);
    }

    #[test]
    fn test_addresses_alias() {
        let ring = RingBuffer::alloc(4096, 2).unwrap();
        let size = ring.size();

        unsafe {
            for offset in [0usize, 1, size / 2, size - 1] {
                ring.base().add(offset).write(0xA5);
                assert_eq!(ring.base().add(offset + size).read(), 0xA5);
                assert_eq!(ring.base().add(offset + 2 * size).read(), 0xA5);
            }
        }
    }

    #[test]
    fn test_write_through_alias_visible_at_base() {
        let ring = RingBuffer::alloc(4096, 1).unwrap();
        let size = ring.size();

        unsafe {
            ring.base().add(size + 7).write(0x3C);
            assert_eq!(ring.base().add(7).read(), 0x3C);
        }
    }

    #[test]
    fn test_cursor_accounting() {
        let mut buf = RwBuffer::alloc(4096, 1).unwrap();
        let size = buf.ring.size();

        assert_eq!(buf.len(), 0);
        assert_eq!(buf.free_capacity(), size);

        buf.writable()[..5].copy_from_slice(b"hello");
        buf.advance_write(5);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf.free_capacity(), size - 5);
        assert_eq!(buf.readable(), b"hello");

        buf.advance_read(3);
        assert_eq!(buf.readable(), b"lo");
        assert_eq!(buf.free_capacity(), size - 2);
    }

    #[test]
    fn test_contiguous_read_across_wrap() {
        let mut buf = RwBuffer::alloc(4096, 1).unwrap();
        let size = buf.ring.size();

        // Park the cursors three bytes before the wrap point.
        let fill = size - 3;
        buf.advance_write(fill);
        buf.advance_read(fill);
        assert!(buf.is_empty());

        let payload: Vec<u8> = (0u8..10).collect();
        buf.writable()[..payload.len()].copy_from_slice(&payload);
        buf.advance_write(payload.len());

        // The span straddles the physical end of the ring yet reads flat.
        assert_eq!(buf.readable(), &payload[..]);
    }

    #[test]
    fn test_write_read_equality_holds_at_any_offset() {
        let mut buf = RwBuffer::alloc(4096, 1).unwrap();
        let size = buf.ring.size();

        for round in 0..8usize {
            let chunk = size / 2 + round * 13;
            let data: Vec<u8> = (0..chunk).map(|i| (i % 251) as u8).collect();

            buf.writable()[..chunk].copy_from_slice(&data);
            buf.advance_write(chunk);
            assert_eq!(buf.readable(), &data[..]);
            buf.advance_read(chunk);
        }
    }
}
