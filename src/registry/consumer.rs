//! Per-player message queue
//!
//! The owning [`Source`](super::Source) is the only producer; the playing
//! connection is the only consumer. A plain mutex guards the queue for the
//! few instructions a push or drain takes, and a [`Notify`] wakes the
//! waiting connection.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::config::OverflowPolicy;
use super::error::RegistryError;
use super::frame::{MediaKind, MediaMessage, StreamIdentity};

/// Why a queue stopped accepting messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Source detached all consumers
    Detached,
    /// Queue overflowed under [`OverflowPolicy::Disconnect`]
    Overflow,
    /// The [`Consumer`] handle was dropped
    Dropped,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<MediaMessage>,
    closed: Option<CloseReason>,
    dropped: u64,
}

/// Which message kinds a consumer receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerFilter {
    pub audio: bool,
    pub video: bool,
    pub metadata: bool,
}

impl ConsumerFilter {
    fn accepts(&self, message: &MediaMessage) -> bool {
        match message.kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
            MediaKind::Metadata => self.metadata,
        }
    }
}

/// Queue shared between a source and one consumer handle
#[derive(Debug)]
pub(super) struct ConsumerQueue {
    id: u64,
    filter: ConsumerFilter,
    capacity: usize,
    policy: OverflowPolicy,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ConsumerQueue {
    pub(super) fn new(
        id: u64,
        filter: ConsumerFilter,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            id,
            filter,
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the queue inconsistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Append a message, applying the filter and the overflow policy
    pub(super) fn enqueue(&self, message: &MediaMessage) {
        if !self.filter.accepts(message) {
            return;
        }

        {
            let mut state = self.lock();
            if state.closed.is_some() {
                return;
            }

            if state.messages.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        let victim = state
                            .messages
                            .iter()
                            .position(MediaMessage::is_droppable)
                            .unwrap_or(0);
                        state.messages.remove(victim);
                        state.dropped += 1;
                        if state.dropped == 1 || state.dropped % 1024 == 0 {
                            tracing::warn!(
                                consumer_id = self.id,
                                dropped = state.dropped,
                                "Consumer lagging, dropping messages"
                            );
                        }
                    }
                    OverflowPolicy::Disconnect => {
                        tracing::warn!(consumer_id = self.id, "Consumer queue overflow, disconnecting");
                        state.messages.clear();
                        state.closed = Some(CloseReason::Overflow);
                        drop(state);
                        self.notify.notify_one();
                        return;
                    }
                }
            }

            state.messages.push_back(message.clone());
        }
        self.notify.notify_one();
    }

    /// Detach from the source, waking a pending wait
    pub(super) fn close(&self) {
        self.close_with(CloseReason::Detached);
    }

    fn close_with(&self, reason: CloseReason) {
        {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason);
            }
        }
        self.notify.notify_one();
    }
}

/// Subscriber handle owned by a playing connection
///
/// Dropping the handle detaches it from the source.
#[derive(Debug)]
pub struct Consumer {
    identity: StreamIdentity,
    queue: std::sync::Arc<ConsumerQueue>,
}

impl Consumer {
    pub(super) fn new(identity: StreamIdentity, queue: std::sync::Arc<ConsumerQueue>) -> Self {
        Self { identity, queue }
    }

    /// Identifier unique within the process
    pub fn id(&self) -> u64 {
        self.queue.id
    }

    /// Stream this consumer is attached to
    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.queue.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages discarded by the overflow policy so far
    pub fn dropped(&self) -> u64 {
        self.queue.lock().dropped
    }

    /// Whether the source detached this consumer
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Wait until at least `min_messages` are queued or `timeout` elapses
    ///
    /// Returns everything queued at that point, possibly nothing on timeout.
    /// Once the source has detached the consumer, messages still queued are
    /// returned first and the following call fails with
    /// [`RegistryError::ConsumerClosed`]. An overflow under the disconnect
    /// policy fails immediately with [`RegistryError::ConsumerOverflow`].
    ///
    /// Cancel-safe: no message leaves the queue unless the call returns.
    pub async fn wait(
        &self,
        min_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<MediaMessage>, RegistryError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.queue.lock();
                match state.closed {
                    Some(CloseReason::Overflow) => return Err(RegistryError::ConsumerOverflow),
                    Some(_) if state.messages.is_empty() => {
                        return Err(RegistryError::ConsumerClosed)
                    }
                    Some(_) => return Ok(state.messages.drain(..).collect()),
                    None if state.messages.len() >= min_messages => {
                        return Ok(state.messages.drain(..).collect())
                    }
                    None => {}
                }
            }

            if tokio::time::timeout_at(deadline, self.queue.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.queue.lock().messages.drain(..).collect());
            }
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.queue.close_with(CloseReason::Dropped);
        tracing::debug!(
            consumer_id = self.queue.id,
            stream = %self.identity,
            "Consumer handle dropped"
        );
    }
}
