//! Per-connection sessions and the protocol state machine.
//!
//! A session row is free while its socket is 0. Rows are claimed by the
//! accept path, walked through HANDSHAKING, AUTHENTICATING and CONNECTED by
//! the packet handlers, and released once the close for their socket has
//! completed. Handlers address sessions by `(index, generation)`; the
//! generation is bumped on release so a late completion aimed at a recycled
//! row is rejected instead of touching the wrong connection.

use crate::mem::RwBuffer;
use crate::protocol::{
    decode_client_packet, ClientPacket, Decode, ServerPacket, PROTOCOL_VERSION, USERNAME_MAX,
};

use std::fmt;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionStatus {
    Disconnected,
    Handshaking,
    Authenticating,
    Connected,
    Disconnecting,
}

/// Stable handle for a session row.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl SessionId {
    #[inline]
    pub fn new(index: u32, generation: u32) -> SessionId {
        SessionId { index, generation }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// What the state machine wants done with a decoded packet.
#[derive(Debug, PartialEq)]
pub enum PacketAction {
    /// Encode and send this reply.
    Reply(ServerPacket),
    /// Tear the connection down.
    Close,
    /// Hand the packet to the gameplay layer.
    Forward(ClientPacket),
}

/// How the receive pipeline should continue after a drain pass.
#[derive(Debug, Eq, PartialEq)]
pub enum RecvNext {
    /// Everything readable was consumed; arm a fresh receive.
    Fresh,
    /// A packet is cut short; extend the capture, keeping `tail` unconsumed
    /// bytes in place at the front.
    Resume { tail: usize },
    /// A close is underway; do not arm another receive.
    Closed,
    /// The stream is unparseable and the session must go away.
    Corrupt,
}

pub struct DrainResult {
    pub actions: Vec<PacketAction>,
    pub next: RecvNext,
}

pub struct Session {
    /// Socket descriptor. 0 marks the row as free.
    fd: RawFd,
    generation: u32,
    status: SessionStatus,
    username: [u8; USERNAME_MAX],
    username_length: usize,
    /// Remote endpoint, host byte order, cached on accept.
    address: u32,
    port: u16,
    /// Read staging ring. Present while the row is in use.
    rx: Option<RwBuffer>,
    total_in: u64,
    total_out: u64,
    last_ingress: Instant,
}

impl Session {
    fn vacant(now: Instant) -> Session {
        Session {
            fd: 0,
            generation: 0,
            status: SessionStatus::Disconnected,
            username: [0; USERNAME_MAX],
            username_length: 0,
            address: 0,
            port: 0,
            rx: None,
            total_in: 0,
            total_out: 0,
            last_ingress: now,
        }
    }

    pub(crate) fn open(&mut self, fd: RawFd, address: u32, port: u16, rx: RwBuffer, now: Instant) {
        debug_assert_eq!(self.fd, 0);
        self.fd = fd;
        self.status = SessionStatus::Handshaking;
        self.address = address;
        self.port = port;
        self.rx = Some(rx);
        self.total_in = 0;
        self.total_out = 0;
        self.last_ingress = now;
    }

    fn reset(&mut self) {
        self.fd = 0;
        self.generation = self.generation.wrapping_add(1);
        self.status = SessionStatus::Disconnected;
        self.username = [0; USERNAME_MAX];
        self.username_length = 0;
        self.address = 0;
        self.port = 0;
        self.rx = None;
        self.total_in = 0;
        self.total_out = 0;
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.fd == 0
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn set_disconnecting(&mut self) {
        self.status = SessionStatus::Disconnecting;
    }

    #[inline]
    pub fn username(&self) -> &str {
        std::str::from_utf8(&self.username[..self.username_length]).unwrap_or("")
    }

    /// Remote endpoint as accepted.
    #[inline]
    pub fn peer(&self) -> (Ipv4Addr, u16) {
        (Ipv4Addr::from(self.address), self.port)
    }

    #[inline]
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    #[inline]
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    #[inline]
    pub fn last_ingress(&self) -> Instant {
        self.last_ingress
    }

    #[inline]
    pub(crate) fn rx_mut(&mut self) -> Option<&mut RwBuffer> {
        self.rx.as_mut()
    }

    /// Accounts for `count` bytes landing in the read ring.
    pub(crate) fn record_ingress(&mut self, count: usize, now: Instant) {
        if let Some(rx) = self.rx.as_mut() {
            rx.advance_write(count);
        }
        self.total_in += count as u64;
        self.last_ingress = now;
    }

    /// Accounts for `count` bytes leaving on the wire.
    pub(crate) fn record_egress(&mut self, count: usize) {
        self.total_out += count as u64;
    }

    /// Runs the state machine for one decoded packet.
    pub fn handle_packet(&mut self, packet: ClientPacket, log: &tuff::logging::Logger) -> PacketAction {
        use tuff::logging::{debug, info, warn};

        match packet {
            ClientPacket::Heartbeat => {
                debug!(log, "heartbeat";
                       "username" => self.username(),
                       "peer" => %Ipv4Addr::from(self.address),
                       "port" => self.port);
                PacketAction::Reply(ServerPacket::Heartbeat)
            }
            ClientPacket::Handshake { username } => {
                if self.status != SessionStatus::Handshaking {
                    warn!(log, "handshake outside the handshaking phase, disconnecting";
                          "status" => ?self.status,
                          "peer" => %Ipv4Addr::from(self.address),
                          "port" => self.port);
                    return PacketAction::Close;
                }

                let length = username.len().min(USERNAME_MAX);
                self.username[..length].copy_from_slice(&username.as_bytes()[..length]);
                self.username_length = length;
                self.status = SessionStatus::Authenticating;

                info!(log, "player is joining the game";
                      "username" => self.username(),
                      "peer" => %Ipv4Addr::from(self.address),
                      "port" => self.port);

                PacketAction::Reply(ServerPacket::Handshake {
                    hash: "-".to_owned(),
                })
            }
            ClientPacket::Login {
                protocol_version, ..
            } => {
                if self.status != SessionStatus::Authenticating {
                    warn!(log, "login outside the authenticating phase, disconnecting";
                          "status" => ?self.status,
                          "peer" => %Ipv4Addr::from(self.address),
                          "port" => self.port);
                    return PacketAction::Close;
                }
                if protocol_version != PROTOCOL_VERSION {
                    info!(log, "incompatible protocol version, disconnecting";
                          "username" => self.username(),
                          "version" => protocol_version);
                    return PacketAction::Close;
                }

                self.status = SessionStatus::Connected;
                info!(log, "player has joined the game";
                      "username" => self.username(),
                      "peer" => %Ipv4Addr::from(self.address),
                      "port" => self.port);

                PacketAction::Reply(ServerPacket::Login {
                    entity_id: 0,
                    unknown0: String::new(),
                    unknown1: String::new(),
                })
            }
            other => {
                debug!(log, "packet left to the gameplay layer";
                       "tag" => other.tag(),
                       "username" => self.username());
                PacketAction::Forward(other)
            }
        }
    }

    /// Decodes every complete packet in the readable span.
    ///
    /// The session's read cursor is the single source of truth here: it
    /// advances by exactly the bytes each decoded packet occupied.
    pub fn drain(&mut self, log: &tuff::logging::Logger) -> DrainResult {
        use tuff::logging::{error, trace};

        let mut actions = Vec::new();

        loop {
            let decoded = match self.rx.as_ref() {
                Some(rx) if rx.len() > 0 => decode_client_packet(rx.readable()),
                Some(_) => {
                    return DrainResult {
                        actions,
                        next: RecvNext::Fresh,
                    }
                }
                None => {
                    return DrainResult {
                        actions,
                        next: RecvNext::Closed,
                    }
                }
            };

            match decoded {
                Decode::Consumed(packet, count) => {
                    trace!(log, "decoded packet";
                           "tag" => packet.tag(),
                           "bytes" => count);
                    if let Some(rx) = self.rx.as_mut() {
                        rx.advance_read(count);
                    }

                    let action = self.handle_packet(packet, log);
                    let closing = action == PacketAction::Close;
                    actions.push(action);
                    if closing {
                        return DrainResult {
                            actions,
                            next: RecvNext::Closed,
                        };
                    }
                }
                Decode::Need(missing) => {
                    let tail = self.rx.as_ref().map(|rx| rx.len()).unwrap_or(0);
                    trace!(log, "incomplete packet, waiting for more data";
                           "missing" => missing,
                           "buffered" => tail);
                    return DrainResult {
                        actions,
                        next: RecvNext::Resume { tail },
                    };
                }
                Decode::Invalid => {
                    error!(log, "unparseable data from client, disconnecting";
                           "peer" => %Ipv4Addr::from(self.address),
                           "port" => self.port);
                    return DrainResult {
                        actions,
                        next: RecvNext::Corrupt,
                    };
                }
            }
        }
    }
}

/// Fixed-capacity table of session rows.
pub struct SessionTable {
    rows: Vec<Session>,
}

impl SessionTable {
    pub fn new(max_connections: usize) -> SessionTable {
        let now = Instant::now();
        SessionTable {
            rows: (0..max_connections).map(|_| Session::vacant(now)).collect(),
        }
    }

    /// Claims the first free row for a fresh connection. Returns `None` when
    /// the server is full.
    pub fn claim(
        &mut self,
        fd: RawFd,
        address: u32,
        port: u16,
        rx: RwBuffer,
        now: Instant,
    ) -> Option<SessionId> {
        let index = self.rows.iter().position(Session::is_free)?;
        let row = &mut self.rows[index];
        row.open(fd, address, port, rx, now);
        Some(SessionId::new(index as u32, row.generation))
    }

    fn live(&self, id: SessionId) -> bool {
        match self.rows.get(id.index()) {
            Some(row) => !row.is_free() && row.generation == id.generation,
            None => false,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        if self.live(id) {
            Some(&self.rows[id.index()])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        if self.live(id) {
            Some(&mut self.rows[id.index()])
        } else {
            None
        }
    }

    /// Frees the row and its ring. The generation is bumped so outstanding
    /// handles to the old connection go stale.
    pub fn release(&mut self, id: SessionId) -> bool {
        if !self.live(id) {
            return false;
        }
        self.rows[id.index()].reset();
        true
    }

    /// Number of rows currently in use.
    pub fn active(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_free()).count()
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    /// All rows currently in use, with their handles.
    pub fn iter_active(&self) -> impl Iterator<Item = (SessionId, &Session)> {
        self.rows.iter().enumerate().filter_map(|(index, row)| {
            if row.is_free() {
                None
            } else {
                Some((SessionId::new(index as u32, row.generation), row))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuff::logging;

    fn table_with_session() -> (SessionTable, SessionId) {
        let mut table = SessionTable::new(4);
        let rx = RwBuffer::alloc(4096, 1).unwrap();
        let id = table
            .claim(7, u32::from(Ipv4Addr::LOCALHOST), 50000, rx, Instant::now())
            .unwrap();
        (table, id)
    }

    fn feed(session: &mut Session, bytes: &[u8]) {
        let rx = session.rx_mut().unwrap();
        rx.writable()[..bytes.len()].copy_from_slice(bytes);
        session.record_ingress(bytes.len(), Instant::now());
    }

    #[test]
    fn test_claim_and_release_recycles_generation() {
        let (mut table, id) = table_with_session();

        assert!(table.get(id).is_some());
        assert!(table.release(id));
        assert!(table.get(id).is_none());
        assert!(!table.release(id));

        let rx = RwBuffer::alloc(4096, 1).unwrap();
        let next = table
            .claim(9, 0, 1, rx, Instant::now())
            .unwrap();

        assert_eq!(next.index(), id.index());
        assert_ne!(next, id);
        assert!(table.get(id).is_none());
        assert!(table.get(next).is_some());
    }

    #[test]
    fn test_table_full() {
        let mut table = SessionTable::new(2);
        let now = Instant::now();

        for fd in 1..=2 {
            let rx = RwBuffer::alloc(4096, 1).unwrap();
            assert!(table.claim(fd + 2, 0, 0, rx, now).is_some());
        }

        let rx = RwBuffer::alloc(4096, 1).unwrap();
        assert!(table.claim(9, 0, 0, rx, now).is_none());
        assert_eq!(table.active(), 2);
    }

    #[test]
    fn test_handshake_advances_to_authenticating() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        let action = session.handle_packet(
            ClientPacket::Handshake {
                username: "Steve".to_owned(),
            },
            &log,
        );

        assert_eq!(
            action,
            PacketAction::Reply(ServerPacket::Handshake {
                hash: "-".to_owned()
            })
        );
        assert_eq!(session.status(), SessionStatus::Authenticating);
        assert_eq!(session.username(), "Steve");
    }

    #[test]
    fn test_handshake_in_wrong_state_closes() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        session.status = SessionStatus::Connected;

        let action = session.handle_packet(
            ClientPacket::Handshake {
                username: "Steve".to_owned(),
            },
            &log,
        );

        assert_eq!(action, PacketAction::Close);
    }

    #[test]
    fn test_login_version_mismatch_closes() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        session.status = SessionStatus::Authenticating;

        let action = session.handle_packet(
            ClientPacket::Login {
                protocol_version: 2,
                username: "Steve".to_owned(),
                password: String::new(),
            },
            &log,
        );

        assert_eq!(action, PacketAction::Close);
    }

    #[test]
    fn test_login_success_connects() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        session.status = SessionStatus::Authenticating;

        let action = session.handle_packet(
            ClientPacket::Login {
                protocol_version: 1,
                username: "Steve".to_owned(),
                password: String::new(),
            },
            &log,
        );

        assert_eq!(
            action,
            PacketAction::Reply(ServerPacket::Login {
                entity_id: 0,
                unknown0: String::new(),
                unknown1: String::new(),
            })
        );
        assert_eq!(session.status(), SessionStatus::Connected);
    }

    #[test]
    fn test_heartbeat_mirrors_in_any_state() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        for status in [
            SessionStatus::Handshaking,
            SessionStatus::Authenticating,
            SessionStatus::Connected,
        ] {
            session.status = status;
            let action = session.handle_packet(ClientPacket::Heartbeat, &log);
            assert_eq!(action, PacketAction::Reply(ServerPacket::Heartbeat));
        }
    }

    #[test]
    fn test_gameplay_packets_are_forwarded() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        session.status = SessionStatus::Connected;

        let packet = ClientPacket::PlayerGrounded { grounded: true };
        let action = session.handle_packet(packet.clone(), &log);

        assert_eq!(action, PacketAction::Forward(packet));
    }

    #[test]
    fn test_drain_split_packet_resumes() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        // First half of a handshake for "Steve".
        feed(session, &[0x02, 0x00, 0x05]);

        let result = session.drain(&log);
        assert!(result.actions.is_empty());
        assert_eq!(result.next, RecvNext::Resume { tail: 3 });

        // The rest arrives; exactly one packet must come out and the read
        // cursor must land at the packet boundary.
        feed(session, b"Steve");

        let result = session.drain(&log);
        assert_eq!(result.actions.len(), 1);
        assert_eq!(
            result.actions[0],
            PacketAction::Reply(ServerPacket::Handshake {
                hash: "-".to_owned()
            })
        );
        assert_eq!(result.next, RecvNext::Fresh);
        assert_eq!(session.rx_mut().unwrap().len(), 0);
        assert_eq!(session.status(), SessionStatus::Authenticating);
    }

    #[test]
    fn test_drain_multiple_packets_per_read() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        feed(session, &[0x00, 0x00]);

        let result = session.drain(&log);
        assert_eq!(result.actions.len(), 2);
        assert!(result
            .actions
            .iter()
            .all(|action| *action == PacketAction::Reply(ServerPacket::Heartbeat)));
        assert_eq!(result.next, RecvNext::Fresh);
    }

    #[test]
    fn test_drain_corrupt_stream() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        feed(session, &[0x5A, 0x01, 0x02]);

        let result = session.drain(&log);
        assert!(result.actions.is_empty());
        assert_eq!(result.next, RecvNext::Corrupt);
    }

    #[test]
    fn test_drain_stops_after_close_action() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();
        let log = logging::discard();

        // Handshake is out of place once connected; the heartbeat behind it
        // must not be processed.
        session.status = SessionStatus::Connected;
        feed(session, &[0x02, 0x00, 0x05]);
        feed(session, b"Steve");
        feed(session, &[0x00]);

        let result = session.drain(&log);
        assert_eq!(result.actions, vec![PacketAction::Close]);
        assert_eq!(result.next, RecvNext::Closed);
        assert_eq!(session.rx_mut().unwrap().len(), 1);
    }

    #[test]
    fn test_byte_totals() {
        let (mut table, id) = table_with_session();
        let session = table.get_mut(id).unwrap();

        feed(session, &[0x00]);
        session.record_egress(9);

        assert_eq!(session.total_in(), 1);
        assert_eq!(session.total_out(), 9);
    }
}
