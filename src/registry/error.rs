//! Registry error types

use thiserror::Error;

use super::frame::StreamIdentity;

/// Error type for source and consumer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Stream already has a publisher
    #[error("stream already has a publisher: {0}")]
    AlreadyPublishing(StreamIdentity),

    /// Source was removed from the registry; fetch it again
    #[error("stream source was retired: {0}")]
    SourceRetired(StreamIdentity),

    /// Consumer was detached from its source
    #[error("consumer closed")]
    ConsumerClosed,

    /// Consumer fell too far behind and was disconnected
    #[error("consumer queue overflow")]
    ConsumerOverflow,
}
