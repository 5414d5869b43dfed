//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)
//! Reference: RFC 7425 - Adobe's RTMP (Informational)

/// RTMP version number (always 3 for standard RTMP)
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Handshake packet sizes
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size both directions start with before any Set Chunk Size
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Outbound chunk size announced by the server unless a vhost overrides it
pub const RECOMMENDED_CHUNK_SIZE: u32 = 4096;

/// Maximum chunk size the server will use or accept
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// Default limit on inbound message length
///
/// The 24-bit length field allows messages just under 16MB; keyframes of
/// live streams stay well below this.
pub const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024; // 4MB

/// Extended timestamp threshold
/// Timestamps >= this value require extended timestamp field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

// ============================================================================
// Chunk Stream IDs (CSID)
// Preferred channels for outgoing messages
// ============================================================================

/// Protocol control messages (Set Chunk Size, Window Ack, User Control)
pub const CSID_PROTOCOL_CONTROL: u32 = 2;

/// NetConnection command responses (connect/createStream results)
pub const CSID_OVER_CONNECTION: u32 = 3;

/// Secondary NetConnection channel (onBWDone, FMLE start results)
pub const CSID_OVER_CONNECTION2: u32 = 4;

/// NetStream messages (onStatus, metadata)
pub const CSID_OVER_STREAM: u32 = 5;

/// Video data
pub const CSID_VIDEO: u32 = 6;

/// Audio data
pub const CSID_AUDIO: u32 = 7;

// ============================================================================
// Message Type IDs
// RTMP spec section 5.4
// ============================================================================

/// Set Chunk Size (1) - protocol control
pub const MSG_SET_CHUNK_SIZE: u8 = 1;

/// Abort Message (2) - protocol control
pub const MSG_ABORT: u8 = 2;

/// Acknowledgement (3) - protocol control
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;

/// User Control Message (4) - protocol control
pub const MSG_USER_CONTROL: u8 = 4;

/// Window Acknowledgement Size (5) - protocol control
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;

/// Set Peer Bandwidth (6) - protocol control
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;

/// Audio Message (8)
pub const MSG_AUDIO: u8 = 8;

/// Video Message (9)
pub const MSG_VIDEO: u8 = 9;

/// AMF3 Data Message (15)
pub const MSG_DATA_AMF3: u8 = 15;

/// AMF3 Command Message (17)
pub const MSG_COMMAND_AMF3: u8 = 17;

/// AMF0 Data Message (18) - @setDataFrame, onMetaData
pub const MSG_DATA_AMF0: u8 = 18;

/// AMF0 Command Message (20) - connect, play, publish, etc.
pub const MSG_COMMAND_AMF0: u8 = 20;

/// Aggregate Message (22)
pub const MSG_AGGREGATE: u8 = 22;

// ============================================================================
// User Control Event Types
// RTMP spec section 5.4.1
// ============================================================================

/// Stream Begin - server sends when stream becomes functional
pub const UC_STREAM_BEGIN: u16 = 0;

/// Stream EOF - server sends when playback ends
pub const UC_STREAM_EOF: u16 = 1;

/// Set Buffer Length - client tells server buffer size
pub const UC_SET_BUFFER_LENGTH: u16 = 3;

/// Ping Request - server pings client
pub const UC_PING_REQUEST: u16 = 6;

/// Ping Response - client responds to ping
pub const UC_PING_RESPONSE: u16 = 7;

// ============================================================================
// Peer Bandwidth Limit Types
// RTMP spec section 5.4.5
// ============================================================================

/// Hard limit - peer should limit output to this bandwidth
pub const BANDWIDTH_LIMIT_HARD: u8 = 0;

/// Soft limit - peer can exceed if it has excess bandwidth
pub const BANDWIDTH_LIMIT_SOFT: u8 = 1;

/// Dynamic - can be hard or soft depending on prior state
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// ============================================================================
// Common Command Names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PAUSE: &str = "pause";

/// Response commands
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";

/// Status notification
pub const CMD_ON_STATUS: &str = "onStatus";

/// Bandwidth check completion
pub const CMD_ON_BW_DONE: &str = "onBWDone";

// FMLE/OBS extended commands
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_ON_FC_PUBLISH: &str = "onFCPublish";
pub const CMD_ON_FC_UNPUBLISH: &str = "onFCUnpublish";

// Data commands
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";
pub const CMD_SAMPLE_ACCESS: &str = "|RtmpSampleAccess";

// ============================================================================
// Status object fields and values
// ============================================================================

pub const STATUS_LEVEL_STATUS: &str = "status";
pub const STATUS_LEVEL_ERROR: &str = "error";

// ============================================================================
// NetConnection Status Codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";

// ============================================================================
// NetStream Status Codes
// ============================================================================

pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_RESET: &str = "NetStream.Play.Reset";
pub const NS_DATA_START: &str = "NetStream.Data.Start";
pub const NS_PAUSE_NOTIFY: &str = "NetStream.Pause.Notify";
pub const NS_UNPAUSE_NOTIFY: &str = "NetStream.Unpause.Notify";

// ============================================================================
// Default Server Settings
// ============================================================================

/// Default window acknowledgement size sent at connect
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 1_000_000;

/// Default peer bandwidth sent at connect
pub const DEFAULT_PEER_BANDWIDTH: u32 = 1_000_000;

/// Transaction id every connect command must carry
pub const CONNECT_TRANSACTION_ID: f64 = 1.0;

/// Message stream id handed out by createStream
pub const DEFAULT_STREAM_ID: u32 = 1;

/// Object encoding the server reports when the client sends none
pub const DEFAULT_OBJECT_ENCODING: f64 = 0.0;

/// Server name reported in connect results and metadata
pub const SERVER_NAME: &str = concat!("rtmp-live/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Chunk Header Format Types (fmt field)
// RTMP spec section 5.3.1.2
// ============================================================================

/// Type 0: Full header (11 bytes) - timestamp, length, type, stream ID
pub const CHUNK_FMT_0: u8 = 0;

/// Type 1: No stream ID (7 bytes) - timestamp delta, length, type
pub const CHUNK_FMT_1: u8 = 1;

/// Type 2: No stream ID, length, type (3 bytes) - timestamp delta only
pub const CHUNK_FMT_2: u8 = 2;

/// Type 3: No header (0 bytes) - use previous chunk's values
pub const CHUNK_FMT_3: u8 = 3;
