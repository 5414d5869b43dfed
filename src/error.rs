//! Error types for rtmp-live
//!
//! Every layer has its own error enum; all of them convert into [`Error`]
//! so that `?` carries a failure unchanged up to the connection driver,
//! which logs it and closes the connection.

use std::io;

use thiserror::Error;

use crate::registry::RegistryError;
use crate::server::hooks::HookError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level failure, always fatal to the connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed chunk stream or command sequence
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handshake failure
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Value codec failure
    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    /// Source/consumer engine failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Stream identification produced an empty stream name
    #[error("empty stream name not allowed")]
    EmptyStreamName,

    /// The connect target URL is missing or cannot be parsed
    #[error("unresolved target: {0}")]
    UnresolvedTarget(String),

    /// The client is neither a player nor a publisher
    #[error("unsupported client intent")]
    UnsupportedIntent,

    /// A webhook rejected the session transition
    #[error("hook failed: {0}")]
    Hook(#[from] HookError),

    /// Read or write did not complete within the idle timeout
    #[error("I/O timed out")]
    Timeout,
}

impl Error {
    /// Whether this error is an ordinary end of connection (peer went away)
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Chunk stream and command sequencing violations
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// fmt 2/3 chunk on a channel that never carried a full header
    #[error("chunk stream {0} has no previous header")]
    MissingChunkHeader(u32),

    /// A new message header arrived while another message was in flight
    #[error("chunk stream {0} received a new message while one is in flight")]
    ChannelCollision(u32),

    /// Declared message length exceeds the sanity limit
    #[error("message of {0} bytes exceeds maximum")]
    MessageTooLarge(u32),

    /// Peer announced an unusable chunk size
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),

    /// Control message payload too short or inconsistent
    #[error("malformed {0} message")]
    MalformedMessage(&'static str),

    /// Command carried a transaction id other than the mandated one
    #[error("unexpected transaction id {0}")]
    UnexpectedTransactionId(f64),

    /// Expected a specific command, received another one
    #[error("unexpected command '{0}'")]
    UnexpectedCommand(String),

    /// Command message could not be decoded into its packet schema
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] AmfError),

    /// Client sent too many messages without revealing its intent
    #[error("client intent not identified after {0} messages")]
    IdentifyLimit(usize),

    /// createStream nested too deeply during identification
    #[error("too many nested createStream requests")]
    CreateStreamDepth,
}

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// C0 carried an unsupported protocol version
    #[error("invalid RTMP version {0}")]
    InvalidVersion(u8),
}

/// Value codec errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmfError {
    /// Input ended before the value was complete
    #[error("malformed value: unexpected end of input")]
    UnexpectedEof,

    /// Leading type marker is not a supported AMF0 type
    #[error("malformed value: unknown marker 0x{0:02x}")]
    UnknownMarker(u8),

    /// Object or ECMA array without its end-of-object sentinel
    #[error("malformed value: missing object end")]
    MissingObjectEnd,

    /// String bytes are not valid UTF-8
    #[error("malformed value: invalid UTF-8")]
    InvalidUtf8,

    /// Nested objects beyond the supported depth
    #[error("malformed value: nesting too deep")]
    NestingTooDeep,

    /// Field tag does not match the expected schema
    #[error("unexpected value type: expected {expected}, found {found}")]
    UnexpectedValueType {
        expected: &'static str,
        found: &'static str,
    },

    /// Named property is absent
    #[error("property '{0}' not found")]
    NotFound(String),
}

impl AmfError {
    /// Whether this is one of the malformed-input errors
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            AmfError::UnexpectedValueType { .. } | AmfError::NotFound(_)
        )
    }
}
