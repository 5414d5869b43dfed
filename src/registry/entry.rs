//! Per-stream source
//!
//! A source holds the publish flag, the cached sequence headers replayed to
//! late joiners, and the queues of every attached consumer. All fan-out
//! happens under the source's write lock, so every consumer observes
//! messages in publisher order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::media::flv::{FlvTag, FlvTagType};
use crate::protocol::constants::{MSG_DATA_AMF0, SERVER_NAME};
use crate::protocol::message::RawMessage;
use crate::protocol::packet::{OnMetaData, Packet};

use super::config::RegistryConfig;
use super::consumer::{Consumer, ConsumerFilter, ConsumerQueue};
use super::error::RegistryError;
use super::frame::{MediaKind, MediaMessage, StreamIdentity};

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct SourceState {
    /// A publisher holds the stream
    publishing: bool,
    /// Removed from the registry; refuses new publishers and consumers
    retired: bool,
    /// Last normalized `onMetaData`
    metadata: Option<MediaMessage>,
    /// Last video decoder configuration
    video_header: Option<MediaMessage>,
    /// Last audio decoder configuration
    audio_header: Option<MediaMessage>,
    consumers: Vec<Arc<ConsumerQueue>>,
}

/// Snapshot of a source for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub publishing: bool,
    pub retired: bool,
    pub consumer_count: usize,
    pub has_metadata: bool,
    pub has_video_header: bool,
    pub has_audio_header: bool,
}

/// One live stream: at most one publisher, any number of consumers
#[derive(Debug)]
pub struct Source {
    identity: StreamIdentity,
    config: RegistryConfig,
    state: RwLock<SourceState>,
}

impl Source {
    pub(super) fn new(identity: StreamIdentity, config: RegistryConfig) -> Self {
        Self {
            identity,
            config,
            state: RwLock::new(SourceState::default()),
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Admit a publisher
    ///
    /// Fails fast if another publisher holds the stream. Cached headers of
    /// a previous publisher are discarded.
    pub async fn on_publish(&self) -> std::result::Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if state.retired {
            return Err(RegistryError::SourceRetired(self.identity.clone()));
        }
        if state.publishing {
            return Err(RegistryError::AlreadyPublishing(self.identity.clone()));
        }

        state.publishing = true;
        state.metadata = None;
        state.video_header = None;
        state.audio_header = None;

        tracing::info!(
            stream = %self.identity,
            consumers = state.consumers.len(),
            "Publisher attached"
        );
        Ok(())
    }

    /// Release the publisher slot
    pub async fn on_unpublish(&self) {
        let mut state = self.state.write().await;
        if state.publishing {
            state.publishing = false;
            tracing::info!(stream = %self.identity, "Publisher detached");
        }
    }

    /// Ingest an audio message
    pub async fn on_audio(&self, message: &RawMessage) {
        self.dispatch(MediaMessage::audio(message.timestamp, message.payload.clone()))
            .await;
    }

    /// Ingest a video message
    pub async fn on_video(&self, message: &RawMessage) {
        self.dispatch(MediaMessage::video(message.timestamp, message.payload.clone()))
            .await;
    }

    /// Ingest stream metadata
    ///
    /// The `@setDataFrame` wrapper is already stripped by the decoder; the
    /// payload is re-encoded as a plain `onMetaData` carrying our server
    /// name.
    pub async fn on_metadata(&self, message: &RawMessage, mut metadata: OnMetaData) {
        metadata.metadata.remove("server");
        metadata.metadata.set("server", SERVER_NAME);
        self.dispatch(MediaMessage::metadata(message.timestamp, metadata.encode()))
            .await;
    }

    /// Ingest an aggregate message by splitting it into its tags
    pub async fn on_aggregate(&self, message: &RawMessage) -> Result<()> {
        for tag in FlvTag::split_aggregate(&message.payload, message.timestamp)? {
            match tag.tag_type {
                FlvTagType::Audio => self.dispatch(MediaMessage::audio(tag.timestamp, tag.data)).await,
                FlvTagType::Video => self.dispatch(MediaMessage::video(tag.timestamp, tag.data)).await,
                FlvTagType::Script => {
                    let data = RawMessage::new(0, tag.timestamp, MSG_DATA_AMF0, 0, tag.data);
                    if let Some(metadata) = OnMetaData::decode(&data)? {
                        self.on_metadata(&data, metadata).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Update caches, then enqueue into every live consumer
    async fn dispatch(&self, message: MediaMessage) {
        let mut state = self.state.write().await;

        match message.kind {
            MediaKind::Metadata => state.metadata = Some(message.clone()),
            MediaKind::Video if message.is_header => state.video_header = Some(message.clone()),
            MediaKind::Audio if message.is_header => state.audio_header = Some(message.clone()),
            _ => {}
        }

        state.consumers.retain(|queue| !queue.is_closed());
        for queue in &state.consumers {
            queue.enqueue(&message);
        }
    }

    /// Attach a consumer, seeded with the cached headers it wants
    pub async fn create_consumer(
        &self,
        want_audio: bool,
        want_video: bool,
        want_metadata: bool,
    ) -> std::result::Result<Consumer, RegistryError> {
        let mut state = self.state.write().await;
        if state.retired {
            return Err(RegistryError::SourceRetired(self.identity.clone()));
        }

        let filter = ConsumerFilter {
            audio: want_audio,
            video: want_video,
            metadata: want_metadata,
        };
        let queue = Arc::new(ConsumerQueue::new(
            NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed),
            filter,
            self.config.consumer_capacity,
            self.config.overflow_policy,
        ));

        for cached in [&state.metadata, &state.video_header, &state.audio_header]
            .into_iter()
            .flatten()
        {
            queue.enqueue(cached);
        }

        state.consumers.retain(|queue| !queue.is_closed());
        state.consumers.push(Arc::clone(&queue));

        tracing::info!(
            stream = %self.identity,
            consumer_id = queue.id(),
            consumers = state.consumers.len(),
            "Consumer attached"
        );
        Ok(Consumer::new(self.identity.clone(), queue))
    }

    /// Detach and close every consumer
    pub async fn remove_consumers(&self) {
        let mut state = self.state.write().await;
        let count = state.consumers.len();
        for queue in state.consumers.drain(..) {
            queue.close();
        }
        if count > 0 {
            tracing::info!(stream = %self.identity, consumers = count, "Consumers released");
        }
    }

    /// Number of consumers still attached
    pub async fn consumer_count(&self) -> usize {
        let state = self.state.read().await;
        state.consumers.iter().filter(|q| !q.is_closed()).count()
    }

    pub async fn is_publishing(&self) -> bool {
        self.state.read().await.publishing
    }

    pub async fn is_retired(&self) -> bool {
        self.state.read().await.retired
    }

    pub async fn stats(&self) -> SourceStats {
        let state = self.state.read().await;
        SourceStats {
            publishing: state.publishing,
            retired: state.retired,
            consumer_count: state.consumers.iter().filter(|q| !q.is_closed()).count(),
            has_metadata: state.metadata.is_some(),
            has_video_header: state.video_header.is_some(),
            has_audio_header: state.audio_header.is_some(),
        }
    }

    /// Retire the source if it has neither publisher nor consumers
    pub(super) async fn retire_if_idle(&self) -> bool {
        let mut state = self.state.write().await;
        state.consumers.retain(|queue| !queue.is_closed());
        if state.publishing || !state.consumers.is_empty() {
            return false;
        }
        state.retired = true;
        true
    }

    /// Retire unconditionally, closing all consumers
    pub(super) async fn retire(&self) {
        let mut state = self.state.write().await;
        state.retired = true;
        state.publishing = false;
        for queue in state.consumers.drain(..) {
            queue.close();
        }
    }
}
