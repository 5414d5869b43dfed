//! Chunk stream codec
//!
//! Messages are split into chunks no larger than the negotiated chunk size
//! and multiplexed over chunk stream ids. Each chunk starts with a basic
//! header (fmt + csid) followed by a message header whose size depends on
//! fmt:
//!
//! ```text
//! fmt 0: timestamp(3) length(3) type(1) stream_id(4, LE)   absolute time
//! fmt 1: delta(3) length(3) type(1)                         same stream
//! fmt 2: delta(3)                                           same length/type
//! fmt 3: (none)                                             continuation
//! ```
//!
//! A 24-bit time field of 0xFFFFFF means a 4-byte extended timestamp
//! follows the message header.
//!
//! The decoder only consumes a chunk from the input buffer once the whole
//! chunk is available, so an interrupted read never loses state.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use super::constants::*;
use super::message::RawMessage;
use crate::error::ProtocolError;

/// Last header seen on a chunk stream
#[derive(Debug, Clone, Copy, Default)]
struct ChannelHeader {
    timestamp: u32,
    delta: u32,
    length: u32,
    message_type: u8,
    stream_id: u32,
    /// Whether the time field of the last full header was extended
    extended: bool,
    /// Raw value of the last extended timestamp field
    extended_value: u32,
}

/// Per chunk stream reassembly state
#[derive(Debug, Default)]
struct ChunkChannel {
    header: Option<ChannelHeader>,
    partial: Option<BytesMut>,
}

/// Parsed chunk header prior to committing it
struct PendingChunk {
    fmt: u8,
    csid: u32,
    header_len: usize,
    time_field: u32,
    length: Option<u32>,
    message_type: Option<u8>,
    stream_id: Option<u32>,
    extended: bool,
}

enum ChunkOutcome {
    /// Chunk not fully buffered yet, nothing consumed
    Incomplete,
    /// Chunk consumed, message still in flight
    Consumed,
    Message(RawMessage),
}

/// Incremental chunk decoder
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    max_message_size: u32,
    channels: HashMap<u32, ChunkChannel>,
}

impl ChunkDecoder {
    /// Create a decoder using the protocol default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            channels: HashMap::new(),
        }
    }

    /// Reject messages whose declared length exceeds `size`
    pub fn with_max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Largest accepted message length
    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    /// Inbound chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a Set Chunk Size received from the peer
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Drop the partially received message on a chunk stream (Abort)
    pub fn abort(&mut self, csid: u32) {
        if let Some(channel) = self.channels.get_mut(&csid) {
            channel.partial = None;
        }
    }

    /// Decode chunks from `buf` until a message completes
    ///
    /// Returns `Ok(None)` when more bytes are needed. Complete chunks are
    /// consumed even if the message they belong to is not finished yet.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>, ProtocolError> {
        loop {
            let Some(pending) = self.parse_header(buf)? else {
                return Ok(None);
            };
            match self.commit_chunk(pending, buf) {
                ChunkOutcome::Incomplete => return Ok(None),
                ChunkOutcome::Consumed if buf.is_empty() => return Ok(None),
                ChunkOutcome::Consumed => {}
                ChunkOutcome::Message(message) => return Ok(Some(message)),
            }
        }
    }

    /// Parse the header of the next chunk without consuming anything
    fn parse_header(&self, buf: &BytesMut) -> Result<Option<PendingChunk>, ProtocolError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let fmt = buf[0] >> 6;
        let (csid, basic_len) = match buf[0] & 0x3F {
            0 => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                (64 + buf[1] as u32, 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                (64 + buf[1] as u32 + ((buf[2] as u32) << 8), 3)
            }
            id => (id as u32, 1),
        };

        let channel = self.channels.get(&csid);
        let previous = channel.and_then(|c| c.header);
        let in_flight = channel.map_or(false, |c| c.partial.is_some());

        if previous.is_none() && fmt >= CHUNK_FMT_2 {
            return Err(ProtocolError::MissingChunkHeader(csid));
        }
        if in_flight && fmt != CHUNK_FMT_3 {
            return Err(ProtocolError::ChannelCollision(csid));
        }

        let message_header_len = match fmt {
            CHUNK_FMT_0 => 11,
            CHUNK_FMT_1 => 7,
            CHUNK_FMT_2 => 3,
            _ => 0,
        };
        let mut header_len = basic_len + message_header_len;
        if buf.len() < header_len {
            return Ok(None);
        }

        let header = &buf[basic_len..header_len];
        let mut pending = PendingChunk {
            fmt,
            csid,
            header_len,
            time_field: 0,
            length: None,
            message_type: None,
            stream_id: None,
            extended: false,
        };

        if fmt <= CHUNK_FMT_2 {
            pending.time_field = read_u24(&header[0..3]);
            pending.extended = pending.time_field >= EXTENDED_TIMESTAMP_THRESHOLD;
        }
        if fmt <= CHUNK_FMT_1 {
            let length = read_u24(&header[3..6]);
            if length > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge(length));
            }
            pending.length = Some(length);
            pending.message_type = Some(header[6]);
        }
        if fmt == CHUNK_FMT_0 {
            pending.stream_id = Some(u32::from_le_bytes([
                header[7], header[8], header[9], header[10],
            ]));
        }

        let extended = match fmt {
            CHUNK_FMT_3 => previous.map_or(false, |p| p.extended),
            _ => pending.extended,
        };
        if extended {
            if buf.len() < header_len + 4 {
                return Ok(None);
            }
            let value = read_u32(&buf[header_len..header_len + 4]);
            match (fmt, previous) {
                // Some peers omit the repeated extended field on
                // continuation chunks; only consume it when it matches.
                (CHUNK_FMT_3, Some(prev)) if in_flight && value != prev.extended_value => {}
                _ => {
                    pending.time_field = value;
                    pending.extended = true;
                    header_len += 4;
                }
            }
            pending.header_len = header_len;
        }

        Ok(Some(pending))
    }

    /// Commit a parsed chunk if its payload is fully buffered
    fn commit_chunk(&mut self, pending: PendingChunk, buf: &mut BytesMut) -> ChunkOutcome {
        let chunk_size = self.chunk_size as usize;
        let channel = self.channels.entry(pending.csid).or_default();
        let previous = channel.header.unwrap_or_default();

        let length = pending.length.unwrap_or(previous.length) as usize;
        let received = channel.partial.as_ref().map_or(0, |p| p.len());
        let payload_len = (length - received).min(chunk_size);

        if buf.len() < pending.header_len + payload_len {
            return ChunkOutcome::Incomplete;
        }

        // Whole chunk is available: update channel state and consume
        let starts_message = channel.partial.is_none();
        let mut header = previous;
        match pending.fmt {
            CHUNK_FMT_0 => {
                header.timestamp = pending.time_field;
                header.delta = 0;
            }
            CHUNK_FMT_1 | CHUNK_FMT_2 => {
                header.delta = pending.time_field;
                header.timestamp = previous.timestamp.wrapping_add(pending.time_field);
            }
            _ => {
                if starts_message {
                    header.timestamp = previous.timestamp.wrapping_add(previous.delta);
                }
            }
        }
        if pending.fmt != CHUNK_FMT_3 {
            header.extended = pending.extended;
            if pending.extended {
                header.extended_value = pending.time_field;
            }
        }
        if let Some(length) = pending.length {
            header.length = length;
        }
        if let Some(message_type) = pending.message_type {
            header.message_type = message_type;
        }
        if let Some(stream_id) = pending.stream_id {
            header.stream_id = stream_id;
        }
        channel.header = Some(header);

        buf.advance(pending.header_len);
        // Grows as chunks arrive; the declared length is not trusted
        let partial = channel
            .partial
            .get_or_insert_with(|| BytesMut::with_capacity(length.min(chunk_size)));
        partial.extend_from_slice(&buf[..payload_len]);
        buf.advance(payload_len);

        if partial.len() < length {
            return ChunkOutcome::Consumed;
        }

        let payload = channel.partial.take().unwrap_or_default().freeze();
        ChunkOutcome::Message(RawMessage {
            csid: pending.csid,
            timestamp: header.timestamp,
            message_type: header.message_type,
            stream_id: header.stream_id,
            payload,
        })
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk encoder
///
/// Every message is written with a fmt 0 header followed by fmt 3
/// continuation chunks.
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    /// Create an encoder using the protocol default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Outbound chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Change the outbound chunk size (after announcing it to the peer)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Encode a message into chunks appended to `buf`
    pub fn encode(&self, message: &RawMessage, buf: &mut BytesMut) {
        let extended = message.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
        let time_field = if extended {
            EXTENDED_TIMESTAMP_THRESHOLD
        } else {
            message.timestamp
        };

        let chunk_size = self.chunk_size as usize;
        let payload = &message.payload;
        buf.reserve(payload.len() + 16 + (payload.len() / chunk_size) * 8);

        write_basic_header(buf, CHUNK_FMT_0, message.csid);
        write_u24(buf, time_field);
        write_u24(buf, payload.len() as u32);
        buf.put_u8(message.message_type);
        buf.put_u32_le(message.stream_id);
        if extended {
            buf.put_u32(message.timestamp);
        }

        let mut chunks = payload.chunks(chunk_size);
        if let Some(first) = chunks.next() {
            buf.put_slice(first);
        }
        for chunk in chunks {
            write_basic_header(buf, CHUNK_FMT_3, message.csid);
            if extended {
                buf.put_u32(message.timestamp);
            }
            buf.put_slice(chunk);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        2..=63 => buf.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            buf.put_u8(fmt << 6);
            buf.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid.saturating_sub(64).min(0xFFFF);
            buf.put_u8((fmt << 6) | 1);
            buf.put_u8((id & 0xFF) as u8);
            buf.put_u8((id >> 8) as u8);
        }
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn write_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(message: &RawMessage, chunk_size: u32) -> BytesMut {
        let mut encoder = ChunkEncoder::new();
        encoder.set_chunk_size(chunk_size);
        let mut buf = BytesMut::new();
        encoder.encode(message, &mut buf);
        buf
    }

    #[test]
    fn test_single_chunk_roundtrip() {
        let msg = RawMessage::new(3, 1000, MSG_COMMAND_AMF0, 0, vec![1, 2, 3, 4]);
        let mut buf = encode(&msg, 128);

        let mut decoder = ChunkDecoder::new();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multi_chunk_reassembly() {
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let msg = RawMessage::new(CSID_VIDEO, 40, MSG_VIDEO, 1, payload);
        let mut buf = encode(&msg, 128);

        // 1000 bytes in 128-byte chunks: 8 chunks, 7 continuation headers
        assert_eq!(buf.len(), 12 + 1000 + 7);

        let mut decoder = ChunkDecoder::new();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_partial_input_consumes_nothing_mid_chunk() {
        let msg = RawMessage::new(3, 0, MSG_COMMAND_AMF0, 0, vec![7u8; 100]);
        let full = encode(&msg, 128);

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&full[..50]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 50);

        buf.extend_from_slice(&full[50..]);
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload.len(), 100);
    }

    #[test]
    fn test_interleaved_channels() {
        let audio = RawMessage::new(CSID_AUDIO, 10, MSG_AUDIO, 1, vec![0xAA; 200]);
        let video = RawMessage::new(CSID_VIDEO, 20, MSG_VIDEO, 1, vec![0xBB; 200]);
        let a = encode(&audio, 128);
        let v = encode(&video, 128);

        // First chunk of each (12 + 128), then the continuations (1 + 72)
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a[..140]);
        buf.extend_from_slice(&v[..140]);
        buf.extend_from_slice(&v[140..]);
        buf.extend_from_slice(&a[140..]);

        let mut decoder = ChunkDecoder::new();
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, video);
        assert_eq!(second, audio);
    }

    #[test]
    fn test_header_compression_timestamps() {
        let mut buf = BytesMut::new();
        // fmt 0: ts=100, len=1, type=8, stream=1
        buf.extend_from_slice(&[0x04, 0, 0, 100, 0, 0, 1, MSG_AUDIO, 1, 0, 0, 0, 0xA1]);
        // fmt 1: delta=20, len=2, type=8
        buf.extend_from_slice(&[0x44, 0, 0, 20, 0, 0, 2, MSG_AUDIO, 0xA2, 0xA2]);
        // fmt 2: delta=30
        buf.extend_from_slice(&[0x84, 0, 0, 30, 0xA3, 0xA3]);
        // fmt 3 new message: repeats last delta
        buf.extend_from_slice(&[0xC4, 0xA4, 0xA4]);

        let mut decoder = ChunkDecoder::new();
        let timestamps: Vec<u32> = (0..4)
            .map(|_| decoder.decode(&mut buf).unwrap().unwrap().timestamp)
            .collect();
        assert_eq!(timestamps, vec![100, 120, 150, 180]);
    }

    #[test]
    fn test_fmt0_then_fmt3_keeps_timestamp() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x04, 0, 0, 50, 0, 0, 1, MSG_AUDIO, 1, 0, 0, 0, 0x01]);
        buf.extend_from_slice(&[0xC4, 0x02]);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().timestamp, 50);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().timestamp, 50);
    }

    #[test]
    fn test_extended_timestamp() {
        let msg = RawMessage::new(CSID_VIDEO, 0x0100_0000, MSG_VIDEO, 1, vec![5u8; 300]);
        let mut buf = encode(&msg, 128);

        let mut decoder = ChunkDecoder::new();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.timestamp, 0x0100_0000);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn test_extended_timestamp_not_repeated_on_continuation() {
        let mut buf = BytesMut::new();
        // fmt 0 with extended ts, len=4, chunk size 2
        buf.extend_from_slice(&[0x06, 0xFF, 0xFF, 0xFF, 0, 0, 4, MSG_VIDEO, 1, 0, 0, 0]);
        buf.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        buf.extend_from_slice(&[0xAA, 0xBB]);
        // continuation without the extended field, then an unrelated message
        buf.extend_from_slice(&[0xC6, 0xCC, 0xDD]);
        buf.extend_from_slice(&[0x03, 0, 0, 0, 0, 0, 1, MSG_COMMAND_AMF0, 0, 0, 0, 0, 0x05]);

        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(2);
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.timestamp, 0x0100_0000);
        assert_eq!(&decoded.payload[..], &[0xAA, 0xBB, 0xCC, 0xDD]);

        let next = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.csid, 3);
    }

    #[test]
    fn test_missing_header_is_error() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&[0xC5u8, 0x00][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::MissingChunkHeader(5))
        ));
    }

    #[test]
    fn test_fmt1_on_fresh_channel_tolerated() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&[0x45u8, 0, 0, 10, 0, 0, 1, MSG_AUDIO, 0x7F][..]);
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.timestamp, 10);
        assert_eq!(msg.stream_id, 0);
    }

    #[test]
    fn test_channel_collision() {
        let mut buf = BytesMut::new();
        // fmt 0 declaring 200 bytes, only first 128 sent
        buf.extend_from_slice(&[0x04, 0, 0, 0, 0, 0, 200, MSG_AUDIO, 1, 0, 0, 0]);
        buf.extend_from_slice(&[0u8; 128]);
        // a new fmt 0 header on the same channel
        buf.extend_from_slice(&[0x04, 0, 0, 0, 0, 0, 1, MSG_AUDIO, 1, 0, 0, 0, 0]);

        let mut decoder = ChunkDecoder::new();
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::ChannelCollision(4))
        ));
    }

    #[test]
    fn test_abort_drops_partial() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x04, 0, 0, 0, 0, 0, 200, MSG_AUDIO, 1, 0, 0, 0]);
        buf.extend_from_slice(&[0u8; 128]);

        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        decoder.abort(4);

        buf.extend_from_slice(&[0x04, 0, 0, 9, 0, 0, 1, MSG_AUDIO, 1, 0, 0, 0, 0x33]);
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.timestamp, 9);
        assert_eq!(&msg.payload[..], &[0x33]);
    }

    #[test]
    fn test_message_too_large() {
        let length = MAX_MESSAGE_SIZE + 1;
        let [_, hi, mid, lo] = length.to_be_bytes();
        let mut buf = BytesMut::from(&[0x06, 0, 0, 0, hi, mid, lo, MSG_VIDEO, 1, 0, 0, 0][..]);

        let mut decoder = ChunkDecoder::new();
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::MessageTooLarge(l)) if l == length
        ));
    }

    #[test]
    fn test_custom_message_limit() {
        let mut decoder = ChunkDecoder::new().with_max_message_size(1000);
        assert_eq!(decoder.max_message_size(), 1000);

        let fits = RawMessage::new(CSID_VIDEO, 0, MSG_VIDEO, 1, vec![0u8; 1000]);
        let mut buf = encode(&fits, 128);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().payload.len(), 1000);

        // fmt 1 on the same channel declaring one byte more
        let mut buf = BytesMut::from(&[0x46u8, 0, 0, 40, 0, 0x03, 0xE9, MSG_VIDEO][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::MessageTooLarge(1001))
        ));
    }

    #[test]
    fn test_declared_length_not_preallocated() {
        let [_, hi, mid, lo] = MAX_MESSAGE_SIZE.to_be_bytes();
        let mut buf = BytesMut::new();
        for csid in 3u8..40 {
            buf.extend_from_slice(&[csid, 0, 0, 0, hi, mid, lo, MSG_VIDEO, 1, 0, 0, 0]);
            buf.extend_from_slice(&[0u8; 128]);
        }

        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
        assert_eq!(decoder.channels.len(), 37);
        for channel in decoder.channels.values() {
            let partial = channel.partial.as_ref().unwrap();
            assert_eq!(partial.len(), 128);
            assert!(partial.capacity() < 64 * 1024);
        }
    }

    #[test]
    fn test_zero_length_message() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&[0x03u8, 0, 0, 0, 0, 0, 0, MSG_COMMAND_AMF0, 0, 0, 0, 0][..]);
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_large_csid_forms() {
        for csid in [64u32, 319, 320, 1000] {
            let msg = RawMessage::new(csid, 5, MSG_DATA_AMF0, 1, Bytes::from_static(b"meta"));
            let mut buf = encode(&msg, 128);
            let mut decoder = ChunkDecoder::new();
            let decoded = decoder.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded.csid, csid);
        }
    }

    #[test]
    fn test_chunk_size_change() {
        let msg = RawMessage::new(CSID_VIDEO, 0, MSG_VIDEO, 1, vec![1u8; 5000]);
        let mut buf = encode(&msg, 4096);

        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(4096);
        assert_eq!(decoder.chunk_size(), 4096);
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload.len(), 5000);
    }
}
