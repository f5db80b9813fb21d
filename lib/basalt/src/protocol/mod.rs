//! The legacy Minecraft wire protocol.
//!
//! Packets are framed by a single leading tag byte; there is no length
//! prefix. All multi-byte integers travel big-endian, floats as their
//! big-endian IEEE-754 bit patterns, and strings as a big-endian u16 length
//! followed by UTF-8 bytes.
//!
//! The codec is pure: decoders and encoders touch only byte slices and never
//! perform I/O.

pub mod codec;
pub mod packet;

pub use codec::{decode_client_packet, encode_server_packet, Decode};
pub use packet::{ClientPacket, ServerPacket};

/// Longest username the protocol accepts.
pub const USERNAME_MAX: usize = 16;

/// Longest password the protocol accepts.
pub const PASSWORD_MAX: usize = 32;

/// The protocol generation this server speaks.
pub const PROTOCOL_VERSION: i32 = 1;
