//! Stream identity and the media messages fanned out to consumers

use bytes::Bytes;

use crate::media::flv;
use crate::protocol::constants::{
    CSID_AUDIO, CSID_OVER_STREAM, CSID_VIDEO, MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO,
};
use crate::protocol::message::RawMessage;

/// Unique identifier for a stream (vhost + app + stream name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    /// Virtual host (e.g., "example.com")
    pub vhost: String,
    /// Application name (e.g., "live")
    pub app: String,
    /// Stream name without query parameters
    pub stream: String,
}

impl StreamIdentity {
    pub fn new(
        vhost: impl Into<String>,
        app: impl Into<String>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            vhost: vhost.into(),
            app: app.into(),
            stream: stream.into(),
        }
    }
}

impl std::fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.vhost, self.app, self.stream)
    }
}

/// Kind of media message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    /// `onMetaData`, already normalized
    Metadata,
}

/// A media message as stored in consumer queues
///
/// Cheap to clone: the payload is reference counted and shared by every
/// consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMessage {
    pub kind: MediaKind,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    pub payload: Bytes,
    /// Video keyframe
    pub is_keyframe: bool,
    /// Codec configuration record
    pub is_header: bool,
}

impl MediaMessage {
    /// Create an audio message, classifying AAC sequence headers
    pub fn audio(timestamp: u32, payload: Bytes) -> Self {
        Self {
            kind: MediaKind::Audio,
            timestamp,
            is_keyframe: false,
            is_header: flv::is_audio_sequence_header(&payload),
            payload,
        }
    }

    /// Create a video message, classifying keyframes and sequence headers
    pub fn video(timestamp: u32, payload: Bytes) -> Self {
        Self {
            kind: MediaKind::Video,
            timestamp,
            is_keyframe: flv::is_video_keyframe(&payload),
            is_header: flv::is_video_sequence_header(&payload),
            payload,
        }
    }

    /// Create a metadata message from an encoded `onMetaData` payload
    pub fn metadata(timestamp: u32, payload: Bytes) -> Self {
        Self {
            kind: MediaKind::Metadata,
            timestamp,
            payload,
            is_keyframe: false,
            is_header: false,
        }
    }

    /// Messages that must survive queue overflow
    pub fn is_droppable(&self) -> bool {
        self.kind != MediaKind::Metadata && !self.is_header && !self.is_keyframe
    }

    /// Wrap for sending on the given message stream
    pub fn to_message(&self, stream_id: u32) -> RawMessage {
        let (csid, message_type) = match self.kind {
            MediaKind::Audio => (CSID_AUDIO, MSG_AUDIO),
            MediaKind::Video => (CSID_VIDEO, MSG_VIDEO),
            MediaKind::Metadata => (CSID_OVER_STREAM, MSG_DATA_AMF0),
        };
        RawMessage::new(
            csid,
            self.timestamp,
            message_type,
            stream_id,
            self.payload.clone(),
        )
    }
}
