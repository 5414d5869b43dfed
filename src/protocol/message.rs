//! Logical RTMP messages
//!
//! A message is what the chunk layer reassembles: a type id, a timestamp,
//! the message stream id and the opaque payload. Interpretation of the
//! payload belongs to [`packet`](super::packet) (commands and control) or to
//! the media engine (audio, video, data).

use bytes::Bytes;

use super::constants::*;

/// A complete message as carried over one chunk stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Chunk stream the message arrived on (or should be sent on)
    pub csid: u32,

    /// Absolute timestamp in milliseconds
    pub timestamp: u32,

    /// Message type id (MSG_* constants)
    pub message_type: u8,

    /// Message stream id (0 for NetConnection, 1.. for NetStreams)
    pub stream_id: u32,

    /// Message payload
    pub payload: Bytes,
}

impl RawMessage {
    /// Create a new message
    pub fn new(
        csid: u32,
        timestamp: u32,
        message_type: u8,
        stream_id: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload: payload.into(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.message_type == MSG_AUDIO
    }

    pub fn is_video(&self) -> bool {
        self.message_type == MSG_VIDEO
    }

    /// AMF0 or AMF3 command message
    pub fn is_command(&self) -> bool {
        matches!(self.message_type, MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3)
    }

    /// AMF0 or AMF3 data message (metadata)
    pub fn is_data(&self) -> bool {
        matches!(self.message_type, MSG_DATA_AMF0 | MSG_DATA_AMF3)
    }

    pub fn is_aggregate(&self) -> bool {
        self.message_type == MSG_AGGREGATE
    }

    /// Protocol control message handled by the transport itself
    pub fn is_protocol_control(&self) -> bool {
        matches!(
            self.message_type,
            MSG_SET_CHUNK_SIZE
                | MSG_ABORT
                | MSG_ACKNOWLEDGEMENT
                | MSG_WINDOW_ACK_SIZE
                | MSG_SET_PEER_BANDWIDTH
        )
    }

    pub fn is_user_control(&self) -> bool {
        self.message_type == MSG_USER_CONTROL
    }

    /// Payload as a command/data AMF0 body
    ///
    /// AMF3 commands and data carry a leading format byte before AMF0
    /// content; it is skipped here.
    pub fn amf0_body(&self) -> Bytes {
        match self.message_type {
            MSG_COMMAND_AMF3 | MSG_DATA_AMF3 if !self.payload.is_empty() => {
                self.payload.slice(1..)
            }
            _ => self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_classification() {
        let msg = RawMessage::new(CSID_VIDEO, 0, MSG_VIDEO, 1, Bytes::new());
        assert!(msg.is_video());
        assert!(!msg.is_audio());
        assert!(!msg.is_command());

        let msg = RawMessage::new(CSID_OVER_CONNECTION, 0, MSG_COMMAND_AMF3, 0, Bytes::new());
        assert!(msg.is_command());

        let msg = RawMessage::new(CSID_PROTOCOL_CONTROL, 0, MSG_WINDOW_ACK_SIZE, 0, Bytes::new());
        assert!(msg.is_protocol_control());
        assert!(!msg.is_user_control());
    }

    #[test]
    fn test_amf3_body_skips_format_byte() {
        let msg = RawMessage::new(3, 0, MSG_COMMAND_AMF3, 0, vec![0x00, 0x05]);
        assert_eq!(&msg.amf0_body()[..], &[0x05]);

        let msg = RawMessage::new(3, 0, MSG_COMMAND_AMF0, 0, vec![0x05]);
        assert_eq!(&msg.amf0_body()[..], &[0x05]);

        let empty = RawMessage::new(3, 0, MSG_COMMAND_AMF3, 0, Bytes::new());
        assert!(empty.amf0_body().is_empty());
    }
}
