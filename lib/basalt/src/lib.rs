//! The core of the basalt server: memory primitives, the wire codec for the
//! legacy Minecraft protocol, and a completion-based I/O engine.
//!
//! The main components are:
//!
//! - `mem`, the fixed-element pool allocator and the alias-mapped ring buffer
//!   that backs every per-connection read pipeline.
//! - `protocol`, pure encoders and decoders for the packet family. No I/O.
//! - `net`, the io_uring engine: a standing accept, per-session receive
//!   pipelines, frame bookkeeping and the protocol state machine.
//!
//! The engine is single-threaded. One `Engine` owns the kernel queues, the
//! session table and the frame arena; completion handlers run to completion
//! in arrival order, so per-session effects are totally ordered.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod mem;
pub mod net;
pub mod protocol;
