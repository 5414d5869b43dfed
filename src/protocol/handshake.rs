//! RTMP handshake implementation
//!
//! The RTMP handshake consists of three phases:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! Flash-era clients sign C1 with an HMAC-SHA256 digest ("complex"
//! handshake) and expect a signed S1/S2 back. The digest sits in one of two
//! 764-byte blocks:
//!
//! ```text
//! schema 0: time(4) version(4) key block(764) digest block(764)
//! schema 1: time(4) version(4) digest block(764) key block(764)
//!
//! digest block: offset(4) random(offset % 728) digest(32) random(...)
//! ```
//!
//! When no valid digest is found the server falls back to the simple
//! handshake (S2 echoes C1).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

type HmacSha256 = Hmac<Sha256>;

const DIGEST_LEN: usize = 32;

/// Length of each key/digest block in C1/S1
const BLOCK_LEN: usize = 764;

/// "Genuine Adobe Flash Player 001" followed by 32 constant bytes
const GENUINE_FP_KEY: [u8; 62] = [
    0x47, 0x65, 0x6E, 0x75, 0x69, 0x6E, 0x65, 0x20, 0x41, 0x64, 0x6F, 0x62, 0x65, 0x20, 0x46,
    0x6C, 0x61, 0x73, 0x68, 0x20, 0x50, 0x6C, 0x61, 0x79, 0x65, 0x72, 0x20, 0x30, 0x30, 0x31,
    0xF0, 0xEE, 0xC2, 0x4A, 0x80, 0x68, 0xBE, 0xE8, 0x2E, 0x00, 0xD0, 0xD1, 0x02, 0x9E, 0x7E,
    0x57, 0x6E, 0xEC, 0x5D, 0x2D, 0x29, 0x80, 0x6F, 0xAB, 0x93, 0xB8, 0xE6, 0x36, 0xCF, 0xEB,
    0x31, 0xAE,
];

/// "Genuine Adobe Flash Media Server 001" followed by 32 constant bytes
const GENUINE_FMS_KEY: [u8; 68] = [
    0x47, 0x65, 0x6E, 0x75, 0x69, 0x6E, 0x65, 0x20, 0x41, 0x64, 0x6F, 0x62, 0x65, 0x20, 0x46,
    0x6C, 0x61, 0x73, 0x68, 0x20, 0x4D, 0x65, 0x64, 0x69, 0x61, 0x20, 0x53, 0x65, 0x72, 0x76,
    0x65, 0x72, 0x20, 0x30, 0x30, 0x31, 0xF0, 0xEE, 0xC2, 0x4A, 0x80, 0x68, 0xBE, 0xE8, 0x2E,
    0x00, 0xD0, 0xD1, 0x02, 0x9E, 0x7E, 0x57, 0x6E, 0xEC, 0x5D, 0x2D, 0x29, 0x80, 0x6F, 0xAB,
    0x93, 0xB8, 0xE6, 0x36, 0xCF, 0xEB, 0x31, 0xAE,
];

/// Version field written into a signed S1
const SERVER_VERSION: [u8; 4] = [0x04, 0x05, 0x00, 0x01];

/// Version field written into a signed C1
const CLIENT_VERSION: [u8; 4] = [0x80, 0x00, 0x07, 0x02];

/// Handshake role (client or server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

/// Position of the digest block within C1/S1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestSchema {
    /// Key block first, digest block second
    Schema0,
    /// Digest block first, key block second
    Schema1,
}

impl DigestSchema {
    fn block_start(self) -> usize {
        match self {
            DigestSchema::Schema0 => 8 + BLOCK_LEN,
            DigestSchema::Schema1 => 8,
        }
    }

    /// Absolute offset of the 32-byte digest inside the packet
    fn digest_offset(self, packet: &[u8; HANDSHAKE_SIZE]) -> usize {
        let start = self.block_start();
        let sum: usize = packet[start..start + 4].iter().map(|b| *b as usize).sum();
        start + 4 + sum % (BLOCK_LEN - DIGEST_LEN - 4)
    }
}

/// Handshake state machine
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
    /// Client only: sign C1 with a digest
    sign: bool,
    /// Digest schema negotiated with the peer, if any
    schema: Option<DigestSchema>,
    /// Our C1/S1 packet (saved for verification)
    our_packet: Option<[u8; HANDSHAKE_SIZE]>,
    /// Peer's C1/S1 packet (saved for echo in C2/S2)
    peer_packet: Option<[u8; HANDSHAKE_SIZE]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Initial state - need to send C0C1/S0S1
    Initial,
    /// Waiting for peer's C0C1/S0S1
    WaitingForPeerPacket,
    /// Waiting for peer's C2/S2
    WaitingForPeerResponse,
    /// Handshake complete
    Done,
}

impl Handshake {
    /// Create a new handshake state machine
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            state: HandshakeState::Initial,
            sign: false,
            schema: None,
            our_packet: None,
            peer_packet: None,
        }
    }

    /// Client only: send a digest-signed C1
    pub fn with_digest(mut self) -> Self {
        self.sign = true;
        self
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Digest schema in use, `None` for the simple handshake
    pub fn schema(&self) -> Option<DigestSchema> {
        self.schema
    }

    /// Get bytes needed before next state transition
    pub fn bytes_needed(&self) -> usize {
        match (self.state, self.role) {
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => {
                1 + HANDSHAKE_SIZE * 2
            }
            (HandshakeState::WaitingForPeerResponse, _) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Generate initial packet (C0C1 for client, nothing for server initially)
    ///
    /// For client: returns C0+C1 (1 + 1536 bytes)
    /// For server: returns None (server waits for C0C1 first)
    pub fn generate_initial(&mut self) -> Option<Bytes> {
        if self.state != HandshakeState::Initial {
            return None;
        }

        self.state = HandshakeState::WaitingForPeerPacket;
        match self.role {
            HandshakeRole::Client => {
                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);

                let mut c1 = generate_packet();
                if self.sign {
                    c1[4..8].copy_from_slice(&CLIENT_VERSION);
                    sign_packet(&mut c1, DigestSchema::Schema1, &GENUINE_FP_KEY[..30]);
                    self.schema = Some(DigestSchema::Schema1);
                }
                self.our_packet = Some(c1);
                buf.put_slice(&c1);
                Some(buf.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Process received data and return response if ready
    ///
    /// For server receiving C0C1: returns S0+S1+S2
    /// For client receiving S0S1S2: returns C2
    /// For server receiving C2: returns None (handshake done)
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        match self.state {
            HandshakeState::WaitingForPeerPacket => self.process_peer_packet(data),
            HandshakeState::WaitingForPeerResponse => self.process_peer_response(data),
            _ => Ok(None),
        }
    }

    /// Process peer's initial packet (C0C1 or S0S1S2)
    fn process_peer_packet(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if data.remaining() < self.bytes_needed() {
            return Ok(None);
        }

        // Be lenient - accept versions above 3 (some encoders send other values)
        let version = data.get_u8();
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        let mut peer = [0u8; HANDSHAKE_SIZE];
        data.copy_to_slice(&mut peer);
        self.peer_packet = Some(peer);

        match self.role {
            HandshakeRole::Server => {
                let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
                response.put_u8(RTMP_VERSION);

                match find_digest(&peer, &GENUINE_FP_KEY[..30]) {
                    Some((schema, c1_digest)) => {
                        tracing::trace!(schema = ?schema, "Complex handshake");
                        self.schema = Some(schema);

                        let mut s1 = generate_packet();
                        s1[4..8].copy_from_slice(&SERVER_VERSION);
                        sign_packet(&mut s1, schema, &GENUINE_FMS_KEY[..36]);
                        self.our_packet = Some(s1);
                        response.put_slice(&s1);
                        response.put_slice(&generate_signed_echo(&c1_digest, &GENUINE_FMS_KEY));
                    }
                    None => {
                        tracing::trace!("Simple handshake");
                        let s1 = generate_packet();
                        self.our_packet = Some(s1);
                        response.put_slice(&s1);
                        response.put_slice(&generate_echo(&peer));
                    }
                }

                self.state = HandshakeState::WaitingForPeerResponse;
                Ok(Some(response.freeze()))
            }
            HandshakeRole::Client => {
                // S2 is not verified; servers disagree on what they echo
                data.advance(HANDSHAKE_SIZE);

                let c2 = match self.schema {
                    Some(schema) => {
                        let s1_digest = &peer[schema.digest_offset(&peer)..][..DIGEST_LEN];
                        generate_signed_echo(s1_digest, &GENUINE_FP_KEY)
                    }
                    None => generate_echo(&peer),
                };

                self.state = HandshakeState::Done;
                Ok(Some(Bytes::copy_from_slice(&c2)))
            }
        }
    }

    /// Process peer's response (C2 for server)
    fn process_peer_response(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if data.remaining() < HANDSHAKE_SIZE {
            return Ok(None);
        }

        // C2 is accepted without verification
        data.advance(HANDSHAKE_SIZE);
        self.state = HandshakeState::Done;
        Ok(None)
    }
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return out;
    };
    for part in parts {
        mac.update(part);
    }
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Digest over the packet with the digest bytes themselves left out
fn packet_digest(packet: &[u8; HANDSHAKE_SIZE], offset: usize, key: &[u8]) -> [u8; DIGEST_LEN] {
    hmac_sha256(key, &[&packet[..offset], &packet[offset + DIGEST_LEN..]])
}

/// Locate a valid digest in C1, trying schema 1 before schema 0
fn find_digest(
    packet: &[u8; HANDSHAKE_SIZE],
    key: &[u8],
) -> Option<(DigestSchema, [u8; DIGEST_LEN])> {
    [DigestSchema::Schema1, DigestSchema::Schema0]
        .into_iter()
        .find_map(|schema| {
            let offset = schema.digest_offset(packet);
            let expected = packet_digest(packet, offset, key);
            (packet[offset..offset + DIGEST_LEN] == expected).then_some((schema, expected))
        })
}

/// Write a digest into `packet` at the schema's position
fn sign_packet(packet: &mut [u8; HANDSHAKE_SIZE], schema: DigestSchema, key: &[u8]) {
    let offset = schema.digest_offset(packet);
    let digest = packet_digest(packet, offset, key);
    packet[offset..offset + DIGEST_LEN].copy_from_slice(&digest);
}

/// Random packet whose trailing 32 bytes sign the peer's digest (S2/C2)
fn generate_signed_echo(peer_digest: &[u8], key: &[u8]) -> [u8; HANDSHAKE_SIZE] {
    let mut packet = generate_packet();
    let temp_key = hmac_sha256(key, &[peer_digest]);
    let split = HANDSHAKE_SIZE - DIGEST_LEN;
    let signature = hmac_sha256(&temp_key, &[&packet[..split]]);
    packet[split..].copy_from_slice(&signature);
    packet
}

/// Generate a handshake packet (C1 or S1)
///
/// Format (1536 bytes):
/// - Bytes 0-3: Timestamp (32-bit, big-endian)
/// - Bytes 4-7: Zero (for simple handshake) or version (for complex)
/// - Bytes 8-1535: Random data
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let timestamp = now.as_millis() as u32;
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // Random data - simple PRNG, the handshake does not need secrecy
    let mut seed = now.as_nanos() as u64 | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        let len = chunk.len();
        chunk.copy_from_slice(&bytes[..len]);
    }

    packet
}

/// Generate echo packet (C2 or S2)
///
/// Format:
/// - Bytes 0-3: Peer's timestamp (from their C1/S1)
/// - Bytes 4-7: Our timestamp
/// - Bytes 8-1535: Copy of peer's random data
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);

    echo[4..8].copy_from_slice(&timestamp.to_be_bytes());

    echo
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_handshake(mut client: Handshake) -> (Handshake, Handshake, Bytes) {
        let mut server = Handshake::new(HandshakeRole::Server);
        assert!(server.generate_initial().is_none());

        let mut c0c1 = client.generate_initial().unwrap();
        let s0s1s2 = server.process(&mut c0c1).unwrap().unwrap();
        assert_eq!(s0s1s2.len(), 1 + HANDSHAKE_SIZE * 2);

        let mut s = s0s1s2.clone();
        let mut c2 = client.process(&mut s).unwrap().unwrap();
        assert!(client.is_done());

        assert!(server.process(&mut c2).unwrap().is_none());
        assert!(server.is_done());
        (client, server, s0s1s2)
    }

    #[test]
    fn test_simple_handshake() {
        let (_, server, s0s1s2) = run_handshake(Handshake::new(HandshakeRole::Client));
        assert_eq!(server.schema(), None);
        assert_eq!(s0s1s2[0], RTMP_VERSION);
    }

    #[test]
    fn test_simple_s2_echoes_c1() {
        let mut client = Handshake::new(HandshakeRole::Client);
        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();

        let c0c1 = client.generate_initial().unwrap();
        let mut input = c0c1.clone();
        let response = server.process(&mut input).unwrap().unwrap();

        let s2 = &response[1 + HANDSHAKE_SIZE..];
        assert_eq!(&s2[8..], &c0c1[1 + 8..]);
        assert_eq!(&s2[0..4], &c0c1[1..5]);
    }

    #[test]
    fn test_complex_handshake() {
        let client = Handshake::new(HandshakeRole::Client).with_digest();
        let (client, server, s0s1s2) = run_handshake(client);
        assert_eq!(server.schema(), Some(DigestSchema::Schema1));
        assert_eq!(client.schema(), Some(DigestSchema::Schema1));

        // S1 carries a valid FMS digest
        let mut s1 = [0u8; HANDSHAKE_SIZE];
        s1.copy_from_slice(&s0s1s2[1..1 + HANDSHAKE_SIZE]);
        assert!(find_digest(&s1, &GENUINE_FMS_KEY[..36]).is_some());
        assert_eq!(&s1[4..8], &SERVER_VERSION);
    }

    #[test]
    fn test_complex_s2_signature() {
        let mut client = Handshake::new(HandshakeRole::Client).with_digest();
        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();

        let c0c1 = client.generate_initial().unwrap();
        let mut c1 = [0u8; HANDSHAKE_SIZE];
        c1.copy_from_slice(&c0c1[1..]);
        let (_, c1_digest) = find_digest(&c1, &GENUINE_FP_KEY[..30]).unwrap();

        let mut input = c0c1;
        let response = server.process(&mut input).unwrap().unwrap();
        let s2 = &response[1 + HANDSHAKE_SIZE..];

        let temp_key = hmac_sha256(&GENUINE_FMS_KEY, &[&c1_digest]);
        let expected = hmac_sha256(&temp_key, &[&s2[..HANDSHAKE_SIZE - DIGEST_LEN]]);
        assert_eq!(&s2[HANDSHAKE_SIZE - DIGEST_LEN..], &expected);
    }

    #[test]
    fn test_schema0_digest_found() {
        let mut c1 = generate_packet();
        c1[4..8].copy_from_slice(&CLIENT_VERSION);
        sign_packet(&mut c1, DigestSchema::Schema0, &GENUINE_FP_KEY[..30]);

        let (schema, _) = find_digest(&c1, &GENUINE_FP_KEY[..30]).unwrap();
        assert_eq!(schema, DigestSchema::Schema0);
    }

    #[test]
    fn test_unsigned_packet_has_no_digest() {
        let c1 = generate_packet();
        assert!(find_digest(&c1, &GENUINE_FP_KEY[..30]).is_none());
    }

    #[test]
    fn test_digest_offset_in_bounds() {
        let mut packet = [0xFFu8; HANDSHAKE_SIZE];
        for schema in [DigestSchema::Schema0, DigestSchema::Schema1] {
            let offset = schema.digest_offset(&packet);
            assert!(offset + DIGEST_LEN <= schema.block_start() + BLOCK_LEN);
        }
        packet[8..12].copy_from_slice(&[0, 0, 0, 0]);
        assert_eq!(DigestSchema::Schema1.digest_offset(&packet), 12);
    }

    #[test]
    fn test_bytes_needed() {
        let mut client = Handshake::new(HandshakeRole::Client);
        assert_eq!(client.bytes_needed(), 0);
        client.generate_initial();
        assert_eq!(client.bytes_needed(), 1 + HANDSHAKE_SIZE * 2);

        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();
        assert_eq!(server.bytes_needed(), 1 + HANDSHAKE_SIZE);
    }

    #[test]
    fn test_incomplete_c0c1() {
        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();

        let mut incomplete = Bytes::from(vec![RTMP_VERSION; 100]);
        assert!(server.process(&mut incomplete).unwrap().is_none());
        assert_eq!(incomplete.len(), 100);
    }

    #[test]
    fn test_invalid_version_rejected() {
        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();

        let mut invalid = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        invalid.put_u8(2);
        invalid.put_slice(&[0u8; HANDSHAKE_SIZE]);

        let mut buf = invalid.freeze();
        assert!(server.process(&mut buf).is_err());
    }

    #[test]
    fn test_lenient_version_acceptance() {
        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();

        let mut valid = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        valid.put_u8(31);
        valid.put_slice(&generate_packet());

        let mut buf = valid.freeze();
        assert!(server.process(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_process_in_wrong_state() {
        let mut client = Handshake::new(HandshakeRole::Client);
        let mut buf = Bytes::from(vec![0u8; 3073]);
        assert!(client.process(&mut buf).unwrap().is_none());
    }
}
