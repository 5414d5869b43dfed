//! FLV media payload classification
//!
//! RTMP audio and video message payloads are FLV tag bodies. The server
//! never decodes media; it only needs to recognize keyframes and codec
//! configuration records (sequence headers) so that late joiners can be
//! fast-started and queue overflow can spare decodable frames.
//!
//! RTMP Video Data:
//! ```text
//! +----------+----------+-------------+
//! | FrameType| CodecID  | PacketType  | CodecData...
//! | (4 bits) | (4 bits) | (8 bits)    |
//! +----------+----------+-------------+
//!
//! Enhanced RTMP (IsExHeader set):
//! +---+-----------+------------+-----------+
//! | 1 | FrameType | PacketType | FourCC(4) | ...
//! |bit| (3 bits)  | (4 bits)   |           |
//! +---+-----------+------------+-----------+
//! ```
//!
//! RTMP Audio Data:
//! ```text
//! +-----------+---------+----------+----------+-------------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AACPacketType | AudioData...
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  | (8 bits)      |
//! +-----------+---------+----------+----------+-------------+
//! ```

use bytes::Bytes;

use crate::error::ProtocolError;

/// Enhanced RTMP extended video header flag
const EX_HEADER_FLAG: u8 = 0x80;

/// Enhanced RTMP packet type carrying the decoder configuration
const EX_PACKET_SEQUENCE_START: u8 = 0;

/// Video frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    /// Frame type of the first payload byte, legacy or enhanced layout
    pub fn from_byte(b: u8) -> Option<Self> {
        let bits = if b & EX_HEADER_FLAG != 0 {
            (b >> 4) & 0x07
        } else {
            (b >> 4) & 0x0F
        };
        match bits {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Legacy video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265), non-standard legacy id used by several encoders
    Hevc = 12,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        if b & EX_HEADER_FLAG != 0 {
            return None;
        }
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            _ => None,
        }
    }

    /// Codecs that carry a packet type byte after the header
    fn has_packet_type(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc)
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }
}

/// One tag embedded in an aggregate message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds, rebased onto the aggregate
    pub timestamp: u32,
    pub data: Bytes,
}

/// Length of an FLV tag header
const TAG_HEADER_LEN: usize = 11;

/// Length of the back pointer following each tag
const BACK_POINTER_LEN: usize = 4;

impl FlvTag {
    /// Split an aggregate message body into its tags
    ///
    /// ```text
    /// +--------+---------+-------+--------+-----------+------+------------+
    /// | Type(1)| Size(3) | TS(3) | TSx(1) | Stream(3) | Data | BackPtr(4) | ...
    /// +--------+---------+-------+--------+-----------+------+------------+
    /// ```
    ///
    /// Timestamps are rebased so the first tag lands on `base_timestamp`.
    /// Tags of unknown type are skipped.
    pub fn split_aggregate(payload: &Bytes, base_timestamp: u32) -> Result<Vec<FlvTag>, ProtocolError> {
        let mut tags = Vec::new();
        let mut offset = 0;
        let mut first_timestamp = None;

        while offset < payload.len() {
            let header = payload
                .get(offset..offset + TAG_HEADER_LEN)
                .ok_or(ProtocolError::MalformedMessage("aggregate"))?;
            let size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
            let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);

            let start = offset + TAG_HEADER_LEN;
            let end = start + size;
            if end + BACK_POINTER_LEN > payload.len() {
                return Err(ProtocolError::MalformedMessage("aggregate"));
            }

            let first = *first_timestamp.get_or_insert(timestamp);
            if let Some(tag_type) = FlvTagType::from_byte(header[0]) {
                tags.push(FlvTag {
                    tag_type,
                    timestamp: base_timestamp.wrapping_add(timestamp.wrapping_sub(first)),
                    data: payload.slice(start..end),
                });
            }
            offset = end + BACK_POINTER_LEN;
        }
        Ok(tags)
    }
}

/// Video payload is a keyframe (legacy or enhanced header)
pub fn is_video_keyframe(data: &[u8]) -> bool {
    data.first()
        .and_then(|b| VideoFrameType::from_byte(*b))
        .map(|ft| ft.is_keyframe())
        .unwrap_or(false)
}

/// Video payload is a decoder configuration record
///
/// AVC/HEVC with packet type 0, or an enhanced header with
/// `SequenceStart`.
pub fn is_video_sequence_header(data: &[u8]) -> bool {
    let Some(&first) = data.first() else {
        return false;
    };
    if first & EX_HEADER_FLAG != 0 {
        return first & 0x0F == EX_PACKET_SEQUENCE_START;
    }
    match VideoCodec::from_byte(first) {
        Some(codec) if codec.has_packet_type() => data.get(1) == Some(&0),
        _ => false,
    }
}

/// Audio payload is an AAC AudioSpecificConfig
pub fn is_audio_sequence_header(data: &[u8]) -> bool {
    data.len() >= 2 && AudioFormat::from_byte(data[0]) == Some(AudioFormat::Aac) && data[1] == 0
}
