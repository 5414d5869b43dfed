//! Connection driver
//!
//! Runs one accepted connection through its whole life:
//!
//! ```text
//! handshake -> connect -> identify -> resolve target
//!                                         │
//!                     ┌───────────────────┴───────────────────┐
//!                     ▼                                       ▼
//!              publish: hook, admit,                   play: hook, attach consumer,
//!              acknowledge, ingest media               acknowledge, forward batches
//!                     │                                       │
//!                     ▼                                       ▼
//!              unpublish, release consumers,           drop consumer,
//!              remove source, hook                     remove idle source, hook
//! ```
//!
//! Teardown runs whatever ended the session: a close command, an I/O
//! error or cancellation by the server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::message::RawMessage;
use crate::protocol::packet::{CallRes, Command, OnMetaData};
use crate::protocol::Transport;
use crate::registry::{Consumer, RegistryError, Source, SourceRegistry, StreamIdentity};
use crate::server::config::ServerConfig;
use crate::server::hooks::{self, HookDispatcher, HookEvent};
use crate::session::{ConnType, Request, RtmpSession, SessionPhase, SessionState};

/// Attempts to get a live source when the fetched one was just retired
const MAX_SOURCE_ATTEMPTS: usize = 3;

/// One client connection
pub struct Connection<S> {
    session: RtmpSession<S>,
    state: SessionState,
    request: Request,
    config: Arc<ServerConfig>,
    registry: Arc<SourceRegistry>,
    hooks: Arc<dyn HookDispatcher>,
    cancel: CancellationToken,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a new connection handler
    pub fn new(
        session_id: u64,
        stream: S,
        peer_addr: SocketAddr,
        config: Arc<ServerConfig>,
        registry: Arc<SourceRegistry>,
        hooks: Arc<dyn HookDispatcher>,
        cancel: CancellationToken,
    ) -> Self {
        let transport = Transport::new(stream)
            .with_timeout(config.idle_timeout)
            .with_max_message_size(config.max_message_size);
        Self {
            session: RtmpSession::new(transport),
            state: SessionState::new(session_id, peer_addr),
            request: Request::new(peer_addr.ip().to_string()),
            config,
            registry,
            hooks,
            cancel,
        }
    }

    /// Resolved request, once identification has happened
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Run the connection to completion
    pub async fn run(mut self) -> Result<()> {
        let session_id = self.state.id;
        tracing::debug!(session_id = session_id, peer = %self.state.peer_addr, "Connection started");

        let result = self.serve().await;
        self.state.close();
        // The peer may already be gone
        let _ = self.session.shutdown().await;

        match &result {
            Ok(()) => tracing::debug!(
                session_id = session_id,
                duration = ?self.state.duration(),
                "Connection closed"
            ),
            Err(e) if e.is_disconnect() => tracing::debug!(
                session_id = session_id,
                duration = ?self.state.duration(),
                "Peer disconnected"
            ),
            Err(e) => tracing::warn!(session_id = session_id, error = %e, "Connection failed"),
        }
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let cancel = self.cancel.clone();
        let timeout = self.config.connection_timeout;

        let conn_type = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(timeout, self.establish()) => {
                result.map_err(|_| Error::Timeout)??
            }
        };

        match conn_type {
            ConnType::Play => self.play().await,
            ConnType::FmlePublish | ConnType::FlashPublish | ConnType::HaivisionPublish => {
                self.publish(conn_type).await
            }
            ConnType::Unknown => Err(Error::UnsupportedIntent),
        }
    }

    /// Handshake, connect and identification
    async fn establish(&mut self) -> Result<ConnType> {
        self.state.advance(SessionPhase::Handshaking);
        self.session.handshake().await?;

        let connect = self.session.connect_app().await?;
        self.request.apply_connect(&connect)?;

        let chunk_size = self.config.chunk_size_for(self.request.provisional_vhost());
        self.session.set_window_ack_size(self.config.window_ack_size).await?;
        self.session
            .set_peer_bandwidth(self.config.peer_bandwidth, self.config.peer_bandwidth_limit)
            .await?;
        self.session.set_chunk_size(chunk_size).await?;
        self.session.response_connect_app(&connect).await?;
        self.session.on_bw_done().await?;
        self.state.advance(SessionPhase::Connected);

        tracing::debug!(
            session_id = self.state.id,
            tc_url = %self.request.tc_url,
            chunk_size = chunk_size,
            "Client connected"
        );

        let identified = self.session.identify_client().await?;
        self.request
            .resolve(&identified.stream_name, identified.conn_type, identified.duration)?;
        self.state.advance(SessionPhase::StreamIdentified);

        tracing::info!(
            session_id = self.state.id,
            stream = %self.request.identity(),
            conn_type = ?identified.conn_type,
            "Client identified"
        );
        Ok(identified.conn_type)
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    async fn publish(&mut self, conn_type: ConnType) -> Result<()> {
        self.call_hook(HookEvent::Publish).await?;

        let source = self.acquire_publish(&self.request.identity()).await?;
        let result = self.publishing(&source, conn_type).await;

        source.on_unpublish().await;
        source.remove_consumers().await;
        self.registry.remove_source(&source).await;

        if let Err(e) = self.call_hook(HookEvent::Unpublish).await {
            tracing::warn!(session_id = self.state.id, error = %e, "Unpublish hook failed");
        }
        result
    }

    async fn acquire_publish(&self, identity: &StreamIdentity) -> Result<Arc<Source>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let source = self.registry.fetch_or_create(identity).await;
            match source.on_publish().await {
                Ok(()) => return Ok(source),
                Err(RegistryError::SourceRetired(_)) if attempt < MAX_SOURCE_ATTEMPTS => {
                    tracing::debug!(stream = %identity, "Source retired, fetching again");
                }
                Err(e) => {
                    tracing::warn!(session_id = self.state.id, stream = %identity, error = %e, "Publish rejected");
                    return Err(e.into());
                }
            }
        }
    }

    async fn publishing(&mut self, source: &Source, conn_type: ConnType) -> Result<()> {
        match conn_type {
            ConnType::FmlePublish => self.session.start_fmle_publish().await?,
            ConnType::HaivisionPublish => self.session.start_haivision_publish().await?,
            _ => self.session.start_flash_publish().await?,
        }
        self.state.advance(SessionPhase::Publishing);

        let cancel = self.cancel.clone();
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = self.session.recv_message() => message?,
            };

            if !self.process_publish_message(source, &message).await? {
                return Ok(());
            }
        }
    }

    /// Feed one publisher message into the source; false ends publishing
    async fn process_publish_message(&mut self, source: &Source, message: &RawMessage) -> Result<bool> {
        if message.is_audio() {
            source.on_audio(message).await;
        } else if message.is_video() {
            source.on_video(message).await;
        } else if message.is_aggregate() {
            source.on_aggregate(message).await?;
        } else if message.is_data() {
            if let Some(metadata) = OnMetaData::decode(message)? {
                source.on_metadata(message, metadata).await;
            }
        } else if message.is_command() {
            match Command::decode(message)? {
                Command::FmleStart(start) if start.is_unpublish() => {
                    self.session.fmle_unpublish(start.transaction_id).await?;
                    tracing::info!(session_id = self.state.id, stream = %source.identity(), "Publisher unpublished");
                    return Ok(false);
                }
                Command::CloseStream(close) => {
                    tracing::debug!(session_id = self.state.id, command = %close.command_name, "Publisher closed stream");
                    return Ok(false);
                }
                Command::Call(call) if call.transaction_id > 0.0 => {
                    self.session
                        .send_packet(&CallRes { transaction_id: call.transaction_id }, 0)
                        .await?;
                }
                other => {
                    tracing::trace!(command = other.name(), "Ignoring command while publishing");
                }
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Play
    // ------------------------------------------------------------------

    async fn play(&mut self) -> Result<()> {
        self.call_hook(HookEvent::Play).await?;

        let (source, consumer) = self.acquire_consumer(&self.request.identity()).await?;
        let result = self.playing(&consumer).await;

        drop(consumer);
        self.registry.remove_source(&source).await;

        if let Err(e) = self.call_hook(HookEvent::Stop).await {
            tracing::warn!(session_id = self.state.id, error = %e, "Stop hook failed");
        }
        result
    }

    async fn acquire_consumer(&self, identity: &StreamIdentity) -> Result<(Arc<Source>, Consumer)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let source = self.registry.fetch_or_create(identity).await;
            match source.create_consumer(true, true, true).await {
                Ok(consumer) => return Ok((source, consumer)),
                Err(RegistryError::SourceRetired(_)) if attempt < MAX_SOURCE_ATTEMPTS => {
                    tracing::debug!(stream = %identity, "Source retired, fetching again");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn playing(&mut self, consumer: &Consumer) -> Result<()> {
        self.session.start_play().await?;
        self.state.advance(SessionPhase::Playing);
        // Players send little; liveness is judged by writes
        self.session.transport_mut().set_read_timeout(None);

        let cancel = self.cancel.clone();
        let min_messages = self.config.consumer_min_messages;
        let wait_timeout = self.config.consumer_wait_timeout;
        let stream_id = self.session.stream_id();
        let mut paused = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = self.session.recv_message() => {
                    if !self.process_play_control(&message?, &mut paused).await? {
                        return Ok(());
                    }
                }
                batch = consumer.wait(min_messages, wait_timeout), if !paused => {
                    let batch = match batch {
                        Ok(batch) => batch,
                        Err(RegistryError::ConsumerClosed) => {
                            tracing::info!(session_id = self.state.id, stream = %consumer.identity(), "Source released player");
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if batch.is_empty() {
                        continue;
                    }
                    let messages: Vec<RawMessage> =
                        batch.iter().map(|m| m.to_message(stream_id)).collect();
                    self.session.send_messages(&messages).await?;
                }
            }
        }
    }

    /// Handle one message from a player; false ends playback
    async fn process_play_control(&mut self, message: &RawMessage, paused: &mut bool) -> Result<bool> {
        if !message.is_command() {
            return Ok(true);
        }

        match Command::decode(message)? {
            Command::Pause(pause) => {
                self.session.on_play_client_pause(pause.is_pause).await?;
                *paused = pause.is_pause;
                tracing::debug!(session_id = self.state.id, paused = pause.is_pause, "Player pause");
            }
            Command::CloseStream(close) => {
                tracing::debug!(session_id = self.state.id, command = %close.command_name, "Player closed stream");
                return Ok(false);
            }
            Command::Call(call) if call.transaction_id > 0.0 => {
                self.session
                    .send_packet(&CallRes { transaction_id: call.transaction_id }, 0)
                    .await?;
            }
            other => {
                tracing::trace!(command = other.name(), "Ignoring command while playing");
            }
        }
        Ok(true)
    }

    /// Call the hook for `event` if the vhost configures one
    async fn call_hook(&self, event: HookEvent) -> Result<()> {
        let Some(url) = self.config.hook_url(&self.request.vhost, event) else {
            return Ok(());
        };

        hooks::dispatch(self.hooks.as_ref(), event, url, &self.request)
            .await
            .map_err(|e| {
                tracing::warn!(session_id = self.state.id, event = %event, error = %e, "Hook failed");
                Error::Hook(e)
            })
    }
}
