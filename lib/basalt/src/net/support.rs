//! Error plumbing for the networking core.

use crate::mem::MemError;

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum EngineError {
    /// Socket or queue setup failed.
    Io(io::Error),
    /// The frame arena has no free cells; the operation was not submitted.
    FramePoolExhausted,
    /// The kernel submission queue is full; the operation was not submitted.
    SubmissionQueueFull,
    /// A memory primitive could not be set up.
    Memory(MemError),
}

impl From<io::Error> for EngineError {
    fn from(io_error: io::Error) -> Self {
        EngineError::Io(io_error)
    }
}

impl From<MemError> for EngineError {
    fn from(mem_error: MemError) -> Self {
        EngineError::Memory(mem_error)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::Io(err) => write!(f, "{}", err),
            EngineError::FramePoolExhausted => write!(f, "frame pool exhausted"),
            EngineError::SubmissionQueueFull => write!(f, "submission queue full"),
            EngineError::Memory(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;
