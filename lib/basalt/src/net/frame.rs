//! Frames describe in-flight kernel operations.
//!
//! Every submitted operation carries exactly one frame, allocated from a
//! fixed arena. The frame's cell index is stamped on the submission as its
//! user data, so a completion leads straight back to the operation's
//! bookkeeping without any pointer round-trips. A frame lives from submit
//! until its completion has been fully consumed.

use crate::mem::{MemError, PoolAllocator};
use crate::net::session::SessionId;

use std::mem;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrameKind {
    Accept,
    Receive,
    Send,
    Close,
}

impl FrameKind {
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Accept => "ACCEPT",
            FrameKind::Receive => "RECEIVE",
            FrameKind::Send => "SEND",
            FrameKind::Close => "CLOSE",
        }
    }
}

/// Kind-specific payload of a frame.
pub enum FrameOp {
    /// The kernel fills in the remote address on completion.
    Accept {
        address: libc::sockaddr_in,
        address_length: libc::socklen_t,
    },
    /// Destination region and how much of it has been filled so far.
    Receive {
        buffer: *mut u8,
        buffer_size: usize,
        bytes_in: usize,
    },
    /// The frame owns the outgoing bytes until they are fully on the wire.
    Send { buffer: Box<[u8]>, bytes_out: usize },
    Close,
}

impl FrameOp {
    pub fn kind(&self) -> FrameKind {
        match self {
            FrameOp::Accept { .. } => FrameKind::Accept,
            FrameOp::Receive { .. } => FrameKind::Receive,
            FrameOp::Send { .. } => FrameKind::Send,
            FrameOp::Close => FrameKind::Close,
        }
    }
}

pub struct Frame {
    /// Monotonic id, for diagnostics only.
    pub trace: u64,
    /// Owning session. Absent for pre-assignment accepts and for the
    /// listener close.
    pub session: Option<SessionId>,
    pub op: FrameOp,
}

/// Stable arena index of a frame. Travels as the completion's user data.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FrameHandle(u32);

impl FrameHandle {
    #[inline]
    pub fn user_data(self) -> u64 {
        self.0 as u64
    }

    #[inline]
    pub fn from_user_data(value: u64) -> FrameHandle {
        FrameHandle(value as u32)
    }
}

/// The typed arena all frames come from.
pub struct FrameArena {
    pool: PoolAllocator,
    trace_counter: u64,
}

impl FrameArena {
    /// Creates an arena of `bytes` (rounded up to a page multiple).
    pub fn create(bytes: usize) -> Result<FrameArena, MemError> {
        debug_assert!(mem::align_of::<Frame>() <= mem::align_of::<usize>());
        let pool = PoolAllocator::create(mem::size_of::<Frame>(), bytes)?;
        Ok(FrameArena {
            pool,
            trace_counter: 0,
        })
    }

    /// How many frames can be in flight at once.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    fn create_frame(&mut self, session: Option<SessionId>, op: FrameOp) -> Option<FrameHandle> {
        let cell = self.pool.alloc()?;
        self.trace_counter += 1;
        let frame = Frame {
            trace: self.trace_counter,
            session,
            op,
        };
        unsafe { (cell.as_ptr() as *mut Frame).write(frame) };
        Some(FrameHandle(self.pool.index_of(cell) as u32))
    }

    pub fn create_accept(&mut self) -> Option<FrameHandle> {
        self.create_frame(
            None,
            FrameOp::Accept {
                address: unsafe { mem::zeroed() },
                address_length: mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            },
        )
    }

    pub fn create_receive(
        &mut self,
        session: SessionId,
        buffer: *mut u8,
        buffer_size: usize,
        bytes_in: usize,
    ) -> Option<FrameHandle> {
        self.create_frame(
            Some(session),
            FrameOp::Receive {
                buffer,
                buffer_size,
                bytes_in,
            },
        )
    }

    pub fn create_send(&mut self, session: SessionId, buffer: Box<[u8]>) -> Option<FrameHandle> {
        self.create_frame(
            Some(session),
            FrameOp::Send {
                buffer,
                bytes_out: 0,
            },
        )
    }

    pub fn create_close(&mut self, session: Option<SessionId>) -> Option<FrameHandle> {
        self.create_frame(session, FrameOp::Close)
    }

    /// The frame behind `handle`. Panics on an out-of-range handle.
    #[inline]
    pub fn get(&mut self, handle: FrameHandle) -> &mut Frame {
        let cell = self.pool.cell_at(handle.0 as usize);
        unsafe { &mut *(cell.as_ptr() as *mut Frame) }
    }

    /// Returns the frame's cell to the arena.
    ///
    /// Exactly one completion handler releases any given frame.
    pub fn release(&mut self, handle: FrameHandle) {
        let cell = self.pool.cell_at(handle.0 as usize);
        unsafe {
            std::ptr::drop_in_place(cell.as_ptr() as *mut Frame);
            self.pool.free(cell);
        }
    }
}
