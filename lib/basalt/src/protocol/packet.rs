//! Packet definitions for both directions of the connection.

/// Wire tags, one byte at the front of every packet.
pub mod tags {
    pub const HEARTBEAT: u8 = 0x00;
    pub const LOGIN: u8 = 0x01;
    pub const HANDSHAKE: u8 = 0x02;
    pub const TIME: u8 = 0x04;
    pub const PLAYER_GROUNDED: u8 = 0x0A;
    pub const PLAYER_POSITION: u8 = 0x0B;
    pub const PLAYER_ROTATION: u8 = 0x0C;
    pub const PLAYER_TRANSFORM: u8 = 0x0D;
    pub const CHUNK: u8 = 0x32;
    pub const CHUNK_DATA: u8 = 0x33;
    pub const DISCONNECT: u8 = 0xFF;
}

/// Packets the client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// Keepalive. The server mirrors it back.
    Heartbeat,
    /// Second packet of the join sequence.
    Login {
        protocol_version: i32,
        username: String,
        password: String,
    },
    /// First packet of the join sequence.
    Handshake { username: String },
    /// Whether the player is standing on the ground or falling.
    PlayerGrounded { grounded: bool },
    /// Player position update. `head_y` is the camera height.
    PlayerPosition {
        x: f64,
        y: f64,
        head_y: f64,
        z: f64,
        grounded: bool,
    },
    /// Player look update.
    PlayerRotation {
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    /// Combined position and look update.
    PlayerTransform {
        x: f64,
        y: f64,
        head_y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    /// Client-initiated disconnect notice.
    Disconnect { message: String },
}

impl ClientPacket {
    pub fn tag(&self) -> u8 {
        match self {
            ClientPacket::Heartbeat => tags::HEARTBEAT,
            ClientPacket::Login { .. } => tags::LOGIN,
            ClientPacket::Handshake { .. } => tags::HANDSHAKE,
            ClientPacket::PlayerGrounded { .. } => tags::PLAYER_GROUNDED,
            ClientPacket::PlayerPosition { .. } => tags::PLAYER_POSITION,
            ClientPacket::PlayerRotation { .. } => tags::PLAYER_ROTATION,
            ClientPacket::PlayerTransform { .. } => tags::PLAYER_TRANSFORM,
            ClientPacket::Disconnect { .. } => tags::DISCONNECT,
        }
    }
}

/// Packets the server sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// Keepalive reply.
    Heartbeat,
    /// Login acknowledgement. The official server sends empty strings for
    /// the two trailing fields; their meaning is unknown.
    Login {
        entity_id: i32,
        unknown0: String,
        unknown1: String,
    },
    /// Handshake acknowledgement. The string is "-" in offline mode.
    Handshake { hash: String },
    /// World time in ticks since creation.
    Time { ticks: i64 },
    /// Authoritative position and look for the player.
    PlayerTransform {
        x: f64,
        y: f64,
        head_y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    /// Announces a chunk column before data arrives for it.
    Chunk { x: i32, z: i32, initialize: bool },
    /// A block of compressed chunk data.
    ChunkData {
        x: i32,
        y: i16,
        z: i32,
        x_size: u8,
        y_size: u8,
        z_size: u8,
        data: Vec<u8>,
    },
    /// Server-initiated disconnect with a reason shown to the player.
    Disconnect { message: String },
}

impl ServerPacket {
    pub fn tag(&self) -> u8 {
        match self {
            ServerPacket::Heartbeat => tags::HEARTBEAT,
            ServerPacket::Login { .. } => tags::LOGIN,
            ServerPacket::Handshake { .. } => tags::HANDSHAKE,
            ServerPacket::Time { .. } => tags::TIME,
            ServerPacket::PlayerTransform { .. } => tags::PLAYER_TRANSFORM,
            ServerPacket::Chunk { .. } => tags::CHUNK,
            ServerPacket::ChunkData { .. } => tags::CHUNK_DATA,
            ServerPacket::Disconnect { .. } => tags::DISCONNECT,
        }
    }
}
