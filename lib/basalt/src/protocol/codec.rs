//! Encoders and decoders for the packet family.
//!
//! Decoders work on the raw readable span of a connection and report one of
//! three outcomes: a packet together with the bytes it consumed, the exact
//! number of additional bytes required to finish the packet currently at the
//! front of the buffer, or a structural error. Structural errors are fatal
//! for the connection that produced them.
//!
//! Encoders are sized up front with `encoded_len` and require a buffer at
//! least that large.

use crate::protocol::packet::{tags, ClientPacket, ServerPacket};
use crate::protocol::{PASSWORD_MAX, USERNAME_MAX};

use byteorder::{BigEndian, ByteOrder};

/// Outcome of a decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decode<T> {
    /// A complete item and the number of bytes it occupied.
    Consumed(T, usize),
    /// The buffer ends mid-packet; this many more bytes are required.
    Need(usize),
    /// The data is structurally invalid and cannot be resumed.
    Invalid,
}

macro_rules! need {
    ($buf:expr, $want:expr) => {
        if $buf.len() < $want {
            return Decode::Need($want - $buf.len());
        }
    };
}

/// Reads a length-prefixed UTF-8 string at `cursor`, enforcing `cap`.
///
/// The caller must have checked that the two length bytes are present.
fn decode_string(buf: &[u8], cursor: &mut usize, cap: usize) -> Decode<String> {
    let length = BigEndian::read_u16(&buf[*cursor..*cursor + 2]) as usize;
    if length > cap {
        return Decode::Invalid;
    }
    need!(buf, *cursor + 2 + length);

    let bytes = &buf[*cursor + 2..*cursor + 2 + length];
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => return Decode::Invalid,
    };
    *cursor += 2 + length;
    Decode::Consumed(text, 2 + length)
}

fn encode_string(buf: &mut [u8], cursor: &mut usize, text: &str) {
    debug_assert!(text.len() <= u16::max_value() as usize);
    BigEndian::write_u16(&mut buf[*cursor..*cursor + 2], text.len() as u16);
    *cursor += 2;
    buf[*cursor..*cursor + text.len()].copy_from_slice(text.as_bytes());
    *cursor += text.len();
}

fn decode_heartbeat(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 1);
    if buf[0] != tags::HEARTBEAT {
        return Decode::Invalid;
    }
    Decode::Consumed(ClientPacket::Heartbeat, 1)
}

fn decode_login(buf: &[u8]) -> Decode<ClientPacket> {
    // Tag, protocol version, and the username length prefix.
    need!(buf, 7);
    if buf[0] != tags::LOGIN {
        return Decode::Invalid;
    }
    let protocol_version = BigEndian::read_i32(&buf[1..5]);

    let mut cursor = 5;
    let username = match decode_string(buf, &mut cursor, USERNAME_MAX) {
        Decode::Consumed(text, _) => text,
        Decode::Need(more) => return Decode::Need(more),
        Decode::Invalid => return Decode::Invalid,
    };

    need!(buf, cursor + 2);
    let password = match decode_string(buf, &mut cursor, PASSWORD_MAX) {
        Decode::Consumed(text, _) => text,
        Decode::Need(more) => return Decode::Need(more),
        Decode::Invalid => return Decode::Invalid,
    };

    Decode::Consumed(
        ClientPacket::Login {
            protocol_version,
            username,
            password,
        },
        cursor,
    )
}

fn decode_handshake(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 3);
    if buf[0] != tags::HANDSHAKE {
        return Decode::Invalid;
    }

    let mut cursor = 1;
    let username = match decode_string(buf, &mut cursor, USERNAME_MAX) {
        Decode::Consumed(text, _) => text,
        Decode::Need(more) => return Decode::Need(more),
        Decode::Invalid => return Decode::Invalid,
    };

    Decode::Consumed(ClientPacket::Handshake { username }, cursor)
}

fn decode_player_grounded(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 2);
    if buf[0] != tags::PLAYER_GROUNDED {
        return Decode::Invalid;
    }
    Decode::Consumed(
        ClientPacket::PlayerGrounded {
            grounded: buf[1] != 0,
        },
        2,
    )
}

fn decode_player_position(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 34);
    if buf[0] != tags::PLAYER_POSITION {
        return Decode::Invalid;
    }
    Decode::Consumed(
        ClientPacket::PlayerPosition {
            x: BigEndian::read_f64(&buf[1..9]),
            y: BigEndian::read_f64(&buf[9..17]),
            head_y: BigEndian::read_f64(&buf[17..25]),
            z: BigEndian::read_f64(&buf[25..33]),
            grounded: buf[33] != 0,
        },
        34,
    )
}

fn decode_player_rotation(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 10);
    if buf[0] != tags::PLAYER_ROTATION {
        return Decode::Invalid;
    }
    Decode::Consumed(
        ClientPacket::PlayerRotation {
            yaw: BigEndian::read_f32(&buf[1..5]),
            pitch: BigEndian::read_f32(&buf[5..9]),
            grounded: buf[9] != 0,
        },
        10,
    )
}

fn decode_player_transform(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 42);
    if buf[0] != tags::PLAYER_TRANSFORM {
        return Decode::Invalid;
    }
    Decode::Consumed(
        ClientPacket::PlayerTransform {
            x: BigEndian::read_f64(&buf[1..9]),
            y: BigEndian::read_f64(&buf[9..17]),
            head_y: BigEndian::read_f64(&buf[17..25]),
            z: BigEndian::read_f64(&buf[25..33]),
            yaw: BigEndian::read_f32(&buf[33..37]),
            pitch: BigEndian::read_f32(&buf[37..41]),
            grounded: buf[41] != 0,
        },
        42,
    )
}

fn decode_disconnect(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 3);
    if buf[0] != tags::DISCONNECT {
        return Decode::Invalid;
    }

    let mut cursor = 1;
    let message = match decode_string(buf, &mut cursor, u16::max_value() as usize) {
        Decode::Consumed(text, _) => text,
        Decode::Need(more) => return Decode::Need(more),
        Decode::Invalid => return Decode::Invalid,
    };

    Decode::Consumed(ClientPacket::Disconnect { message }, cursor)
}

/// Decodes the packet at the front of `buf`.
///
/// Dispatches on the tag byte. An unknown tag is a structural error.
pub fn decode_client_packet(buf: &[u8]) -> Decode<ClientPacket> {
    need!(buf, 1);
    match buf[0] {
        tags::HEARTBEAT => decode_heartbeat(buf),
        tags::LOGIN => decode_login(buf),
        tags::HANDSHAKE => decode_handshake(buf),
        tags::PLAYER_GROUNDED => decode_player_grounded(buf),
        tags::PLAYER_POSITION => decode_player_position(buf),
        tags::PLAYER_ROTATION => decode_player_rotation(buf),
        tags::PLAYER_TRANSFORM => decode_player_transform(buf),
        tags::DISCONNECT => decode_disconnect(buf),
        _ => Decode::Invalid,
    }
}

impl ServerPacket {
    /// Exact number of bytes `encode_server_packet` will write.
    pub fn encoded_len(&self) -> usize {
        match self {
            ServerPacket::Heartbeat => 1,
            ServerPacket::Login {
                unknown0, unknown1, ..
            } => 1 + 4 + 2 + unknown0.len() + 2 + unknown1.len(),
            ServerPacket::Handshake { hash } => 1 + 2 + hash.len(),
            ServerPacket::Time { .. } => 1 + 8,
            ServerPacket::PlayerTransform { .. } => 1 + 8 * 4 + 4 * 2 + 1,
            ServerPacket::Chunk { .. } => 1 + 4 + 4 + 1,
            ServerPacket::ChunkData { data, .. } => 1 + 4 + 2 + 4 + 3 + 4 + data.len(),
            ServerPacket::Disconnect { message } => 1 + 2 + message.len(),
        }
    }
}

/// Encodes `packet` into `buf` and returns the number of bytes written.
///
/// `buf` must be at least `packet.encoded_len()` bytes.
pub fn encode_server_packet(packet: &ServerPacket, buf: &mut [u8]) -> usize {
    let needed = packet.encoded_len();
    assert!(
        buf.len() >= needed,
        "output buffer too small: {} < {}",
        buf.len(),
        needed
    );

    let mut cursor = 0;
    buf[cursor] = packet.tag();
    cursor += 1;

    match packet {
        ServerPacket::Heartbeat => {}
        ServerPacket::Login {
            entity_id,
            unknown0,
            unknown1,
        } => {
            BigEndian::write_i32(&mut buf[cursor..cursor + 4], *entity_id);
            cursor += 4;
            encode_string(buf, &mut cursor, unknown0);
            encode_string(buf, &mut cursor, unknown1);
        }
        ServerPacket::Handshake { hash } => {
            encode_string(buf, &mut cursor, hash);
        }
        ServerPacket::Time { ticks } => {
            BigEndian::write_i64(&mut buf[cursor..cursor + 8], *ticks);
            cursor += 8;
        }
        ServerPacket::PlayerTransform {
            x,
            y,
            head_y,
            z,
            yaw,
            pitch,
            grounded,
        } => {
            BigEndian::write_f64(&mut buf[cursor..cursor + 8], *x);
            cursor += 8;
            // The client expects head_y before y here, the reverse of the
            // order it sends them in.
            BigEndian::write_f64(&mut buf[cursor..cursor + 8], *head_y);
            cursor += 8;
            BigEndian::write_f64(&mut buf[cursor..cursor + 8], *y);
            cursor += 8;
            BigEndian::write_f64(&mut buf[cursor..cursor + 8], *z);
            cursor += 8;
            BigEndian::write_f32(&mut buf[cursor..cursor + 4], *yaw);
            cursor += 4;
            BigEndian::write_f32(&mut buf[cursor..cursor + 4], *pitch);
            cursor += 4;
            buf[cursor] = *grounded as u8;
            cursor += 1;
        }
        ServerPacket::Chunk { x, z, initialize } => {
            BigEndian::write_i32(&mut buf[cursor..cursor + 4], *x);
            cursor += 4;
            BigEndian::write_i32(&mut buf[cursor..cursor + 4], *z);
            cursor += 4;
            buf[cursor] = *initialize as u8;
            cursor += 1;
        }
        ServerPacket::ChunkData {
            x,
            y,
            z,
            x_size,
            y_size,
            z_size,
            data,
        } => {
            BigEndian::write_i32(&mut buf[cursor..cursor + 4], *x);
            cursor += 4;
            BigEndian::write_i16(&mut buf[cursor..cursor + 2], *y);
            cursor += 2;
            BigEndian::write_i32(&mut buf[cursor..cursor + 4], *z);
            cursor += 4;
            buf[cursor] = *x_size;
            buf[cursor + 1] = *y_size;
            buf[cursor + 2] = *z_size;
            cursor += 3;
            BigEndian::write_i32(&mut buf[cursor..cursor + 4], data.len() as i32);
            cursor += 4;
            buf[cursor..cursor + data.len()].copy_from_slice(data);
            cursor += data.len();
        }
        ServerPacket::Disconnect { message } => {
            encode_string(buf, &mut cursor, message);
        }
    }

    debug_assert_eq!(cursor, needed);
    cursor
}
