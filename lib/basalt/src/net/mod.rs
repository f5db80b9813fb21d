//! The networking core: a completion-based engine over io_uring.
//!
//! The main components:
//!
//! - `Engine`, which owns the kernel submission and completion queues, the
//!   session table and the frame arena, and drives everything from a single
//!   thread.
//! - `Session`, the per-connection record: socket, remote endpoint, protocol
//!   status and the read ring, plus the packet state machine.
//! - `Frame`, the record describing one in-flight kernel operation. Every
//!   submission carries exactly one frame; the frame's arena index rides
//!   along as the completion's user data.
//!
//! The flow: a standing accept is always in flight on the listener. An
//! accepted connection claims a session row and arms a receive into its read
//! ring. Completed receives feed the decoder; decoded packets either produce
//! replies (handshake, login, heartbeat), close the session, or are queued
//! for the embedding gameplay layer to drain.

pub mod engine;
pub mod frame;
pub mod listener;
pub mod session;
pub mod support;

pub use engine::{Engine, EngineParams};
pub use listener::Listener;
pub use session::{Session, SessionId, SessionStatus};
pub use support::{EngineError, EngineResult};
