//! Server-side session protocol engine
//!
//! [`RtmpSession`] speaks the command dialogue of one connection: the
//! handshake, `connect`, identification of the client intent, and the
//! acknowledgements each intent expects before media flows. It knows
//! nothing about sources or consumers; the connection driver sequences the
//! calls and moves the media.
//!
//! # Identification
//!
//! ```text
//! top level                          after createStream (depth <= 3)
//! ─────────                          ───────────────────
//! createStream  -> _result, nest     createStream -> _result, nest
//! releaseStream -> FMLE publish      play         -> play
//! FCPublish     -> FMLE publish      publish      -> Flash publish
//! play          -> play              anything else ignored
//! publish       -> Haivision publish
//! other call    -> _result
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakeRole};
use crate::protocol::message::RawMessage;
use crate::protocol::packet::{
    CallRes, Command, ConnectApp, ConnectAppRes, ControlMessage, CreateStreamRes, FmleStartRes,
    OnBwDone, OnStatusCall, OnStatusData, Packet, SampleAccess, UserControl,
};
use crate::protocol::transport::Transport;
use crate::session::request::ConnType;

/// Messages ignored while identifying before the client is dropped
pub const MAX_IDENTIFY_MESSAGES: usize = 128;

/// Deepest nesting of createStream requests
pub const MAX_CREATE_STREAM_DEPTH: usize = 3;

/// Outcome of client identification
#[derive(Debug, Clone, PartialEq)]
pub struct Identified {
    pub conn_type: ConnType,
    /// Stream name as sent, possibly with a `?query`
    pub stream_name: String,
    /// Play duration in seconds, -1 for publishers and live play
    pub duration: f64,
}

impl Identified {
    fn new(conn_type: ConnType, stream_name: String, duration: f64) -> Self {
        Self {
            conn_type,
            stream_name,
            duration,
        }
    }
}

/// Counter of messages that did not advance a dialogue
struct IgnoreBudget(usize);

impl IgnoreBudget {
    fn spend(&mut self, message: &RawMessage, reason: &str) -> Result<()> {
        self.0 += 1;
        tracing::debug!(
            message_type = message.message_type,
            ignored = self.0,
            reason = reason,
            "Ignoring message"
        );
        if self.0 >= MAX_IDENTIFY_MESSAGES {
            return Err(ProtocolError::IdentifyLimit(self.0).into());
        }
        Ok(())
    }
}

/// Server side of one RTMP connection
pub struct RtmpSession<S> {
    transport: Transport<S>,
    /// Message stream id handed out by createStream
    stream_id: u32,
}

impl<S> RtmpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: Transport<S>) -> Self {
        Self {
            transport,
            stream_id: DEFAULT_STREAM_ID,
        }
    }

    /// Message stream id media and status messages travel on
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn transport(&self) -> &Transport<S> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<S> {
        &mut self.transport
    }

    /// Run the server side of the handshake
    pub async fn handshake(&mut self) -> Result<()> {
        let mut handshake = Handshake::new(HandshakeRole::Server);
        handshake.generate_initial();

        let mut c0c1 = self.transport.read_raw(handshake.bytes_needed()).await?;
        if let Some(s0s1s2) = handshake.process(&mut c0c1)? {
            self.transport.write_raw(&s0s1s2).await?;
        }

        let mut c2 = self.transport.read_raw(handshake.bytes_needed()).await?;
        handshake.process(&mut c2)?;

        tracing::debug!(complex = handshake.schema().is_some(), "Handshake complete");
        Ok(())
    }

    /// Receive the `connect` request
    ///
    /// Non-command messages before it are skipped; any other command is a
    /// protocol violation.
    pub async fn connect_app(&mut self) -> Result<ConnectApp> {
        loop {
            let message = self.transport.read_message().await?;
            if !message.is_command() {
                tracing::trace!(message_type = message.message_type, "Skipping before connect");
                continue;
            }
            return match Command::decode(&message)? {
                Command::Connect(connect) => Ok(connect),
                other => Err(ProtocolError::UnexpectedCommand(other.name().to_string()).into()),
            };
        }
    }

    pub async fn set_window_ack_size(&mut self, size: u32) -> Result<()> {
        self.transport
            .send_packet(&ControlMessage::WindowAckSize(size), 0)
            .await
    }

    pub async fn set_peer_bandwidth(&mut self, size: u32, limit_type: u8) -> Result<()> {
        self.transport
            .send_packet(&ControlMessage::SetPeerBandwidth { size, limit_type }, 0)
            .await
    }

    /// Announce and switch to a new outbound chunk size
    pub async fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.transport.set_out_chunk_size(size).await
    }

    pub async fn response_connect_app(&mut self, connect: &ConnectApp) -> Result<()> {
        self.transport
            .send_packet(&ConnectAppRes::new(connect.object_encoding()), 0)
            .await
    }

    pub async fn on_bw_done(&mut self) -> Result<()> {
        self.transport.send_packet(&OnBwDone, 0).await
    }

    /// Read commands until the client reveals its intent and stream name
    pub async fn identify_client(&mut self) -> Result<Identified> {
        let mut budget = IgnoreBudget(0);
        let mut depth = 0;

        loop {
            let message = self.transport.read_message().await?;
            if !message.is_command() {
                budget.spend(&message, "not a command")?;
                continue;
            }

            match Command::decode(&message)? {
                Command::CreateStream(create) => {
                    if depth >= MAX_CREATE_STREAM_DEPTH {
                        return Err(ProtocolError::CreateStreamDepth.into());
                    }
                    depth += 1;
                    self.response_create_stream(create.transaction_id).await?;
                }
                Command::Play(play) => {
                    return Ok(Identified::new(ConnType::Play, play.stream_name, play.duration));
                }
                Command::Publish(publish) => {
                    let conn_type = if depth == 0 {
                        ConnType::HaivisionPublish
                    } else {
                        ConnType::FlashPublish
                    };
                    return Ok(Identified::new(conn_type, publish.stream_name, -1.0));
                }
                Command::FmleStart(start) if depth == 0 && !start.is_unpublish() => {
                    self.transport
                        .send_packet(&FmleStartRes { transaction_id: start.transaction_id }, 0)
                        .await?;
                    return Ok(Identified::new(ConnType::FmlePublish, start.stream_name, -1.0));
                }
                Command::Call(call) if depth == 0 => {
                    if call.transaction_id > 0.0 {
                        self.transport
                            .send_packet(&CallRes { transaction_id: call.transaction_id }, 0)
                            .await?;
                    }
                    budget.spend(&message, "call before intent")?;
                }
                other => {
                    tracing::warn!(command = other.name(), "Unexpected command while identifying");
                    budget.spend(&message, "out of order")?;
                }
            }
        }
    }

    async fn response_create_stream(&mut self, transaction_id: f64) -> Result<()> {
        let response = CreateStreamRes {
            transaction_id,
            stream_id: self.stream_id,
        };
        self.transport.send_packet(&response, 0).await
    }

    /// Acknowledge a play request
    pub async fn start_play(&mut self) -> Result<()> {
        let stream_id = self.stream_id;
        self.transport
            .send_packet(&UserControl::StreamBegin(stream_id), 0)
            .await?;
        self.transport
            .send_packet(
                &OnStatusCall::status(NS_PLAY_RESET, "Playing and resetting stream."),
                stream_id,
            )
            .await?;
        self.transport
            .send_packet(&OnStatusCall::status(NS_PLAY_START, "Started playing stream."), stream_id)
            .await?;
        self.transport
            .send_packet(&SampleAccess { video: true, audio: true }, stream_id)
            .await?;
        self.transport
            .send_packet(&OnStatusData::code(NS_DATA_START), stream_id)
            .await
    }

    /// Finish the FMLE publish dialogue after `releaseStream`
    ///
    /// Answers `FCPublish` and `createStream` until `publish` arrives.
    pub async fn start_fmle_publish(&mut self) -> Result<()> {
        let mut budget = IgnoreBudget(0);
        loop {
            let message = self.transport.read_message().await?;
            if !message.is_command() {
                budget.spend(&message, "not a command")?;
                continue;
            }

            match Command::decode(&message)? {
                Command::FmleStart(start) if !start.is_unpublish() => {
                    self.transport
                        .send_packet(&FmleStartRes { transaction_id: start.transaction_id }, 0)
                        .await?;
                }
                Command::CreateStream(create) => {
                    self.response_create_stream(create.transaction_id).await?;
                }
                Command::Publish(_) => return self.acknowledge_publish(true).await,
                other => {
                    tracing::debug!(command = other.name(), "Ignoring command before publish");
                    budget.spend(&message, "before publish")?;
                }
            }
        }
    }

    /// Finish the Haivision publish dialogue after `publish`
    ///
    /// These encoders follow up with `FCPublish` and `createStream`.
    pub async fn start_haivision_publish(&mut self) -> Result<()> {
        let mut budget = IgnoreBudget(0);
        let mut fc_publish = false;
        let mut create_stream = false;

        while !(fc_publish && create_stream) {
            let message = self.transport.read_message().await?;
            if !message.is_command() {
                budget.spend(&message, "not a command")?;
                continue;
            }

            match Command::decode(&message)? {
                Command::FmleStart(start) if !start.is_unpublish() => {
                    self.transport
                        .send_packet(&FmleStartRes { transaction_id: start.transaction_id }, 0)
                        .await?;
                    fc_publish |= start.command_name == CMD_FC_PUBLISH;
                }
                Command::CreateStream(create) => {
                    self.response_create_stream(create.transaction_id).await?;
                    create_stream = true;
                }
                other => {
                    tracing::debug!(command = other.name(), "Ignoring command before publish");
                    budget.spend(&message, "before publish")?;
                }
            }
        }

        self.acknowledge_publish(true).await
    }

    /// Acknowledge a Flash `publish`
    pub async fn start_flash_publish(&mut self) -> Result<()> {
        self.acknowledge_publish(false).await
    }

    async fn acknowledge_publish(&mut self, fc_publish: bool) -> Result<()> {
        let stream_id = self.stream_id;
        if fc_publish {
            self.transport
                .send_packet(
                    &OnStatusCall::named(CMD_ON_FC_PUBLISH, NS_PUBLISH_START, "Started publishing stream."),
                    stream_id,
                )
                .await?;
        }
        self.transport
            .send_packet(
                &OnStatusCall::status(NS_PUBLISH_START, "Started publishing stream."),
                stream_id,
            )
            .await
    }

    /// Answer `FCUnpublish`
    pub async fn fmle_unpublish(&mut self, transaction_id: f64) -> Result<()> {
        let stream_id = self.stream_id;
        self.transport
            .send_packet(
                &OnStatusCall::named(
                    CMD_ON_FC_UNPUBLISH,
                    NS_UNPUBLISH_SUCCESS,
                    "Stop publishing stream.",
                ),
                stream_id,
            )
            .await?;
        self.transport
            .send_packet(&FmleStartRes { transaction_id }, 0)
            .await?;
        self.transport
            .send_packet(
                &OnStatusCall::status(NS_UNPUBLISH_SUCCESS, "Stream is now unpublished."),
                stream_id,
            )
            .await
    }

    /// Answer a player's `pause`
    pub async fn on_play_client_pause(&mut self, is_pause: bool) -> Result<()> {
        let stream_id = self.stream_id;
        if is_pause {
            self.transport
                .send_packet(&OnStatusCall::status(NS_PAUSE_NOTIFY, "Paused stream."), stream_id)
                .await?;
            self.transport
                .send_packet(&UserControl::StreamEof(stream_id), 0)
                .await
        } else {
            self.transport
                .send_packet(&OnStatusCall::status(NS_UNPAUSE_NOTIFY, "Unpaused stream."), stream_id)
                .await?;
            self.transport
                .send_packet(&UserControl::StreamBegin(stream_id), 0)
                .await
        }
    }

    /// Send a batch of media messages with a single flush
    pub async fn send_messages(&mut self, messages: &[RawMessage]) -> Result<()> {
        self.transport.write_messages(messages).await
    }

    /// Send one packet
    pub async fn send_packet<P: Packet + ?Sized>(&mut self, packet: &P, stream_id: u32) -> Result<()> {
        self.transport.send_packet(packet, stream_id).await
    }

    /// Next message that is not protocol control; cancel-safe
    pub async fn recv_message(&mut self) -> Result<RawMessage> {
        self.transport.read_message().await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.transport.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::{duplex, DuplexStream};

    use super::*;
    use crate::amf::AmfObject;
    use crate::error::Error;
    use crate::protocol::packet::{CreateStream, FmleStart, Play, Publish};

    type Peer = Transport<DuplexStream>;

    fn pair() -> (RtmpSession<DuplexStream>, Peer) {
        let (server, client) = duplex(256 * 1024);
        (RtmpSession::new(Transport::new(server)), Transport::new(client))
    }

    async fn next_command(peer: &mut Peer) -> Command {
        loop {
            let message = peer.read_message().await.unwrap();
            if message.is_command() {
                return Command::decode(&message).unwrap();
            }
        }
    }

    async fn next_status(peer: &mut Peer) -> (String, String) {
        match next_command(peer).await {
            Command::Call(call) => {
                let code = match &call.arguments[0] {
                    crate::amf::AmfValue::Object(o) => o.get_string("code").unwrap().to_string(),
                    other => panic!("unexpected status {other:?}"),
                };
                (call.command_name, code)
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_with_client() {
        let (mut session, mut peer) = pair();

        let client = tokio::spawn(async move {
            let mut hs = Handshake::new(HandshakeRole::Client).with_digest();
            let c0c1 = hs.generate_initial().unwrap();
            peer.write_raw(&c0c1).await.unwrap();
            let mut s0s1s2 = peer.read_raw(hs.bytes_needed()).await.unwrap();
            let c2 = hs.process(&mut s0s1s2).unwrap().unwrap();
            peer.write_raw(&c2).await.unwrap();
            assert!(hs.is_done());
        });

        session.handshake().await.unwrap();
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_app() {
        let (mut session, mut peer) = pair();
        let connect = ConnectApp::new(AmfObject::new().with("tcUrl", "rtmp://host/live"));
        peer.send_packet(&connect, 0).await.unwrap();

        let received = session.connect_app().await.unwrap();
        assert_eq!(received.tc_url().unwrap(), "rtmp://host/live");
    }

    #[tokio::test]
    async fn test_connect_app_rejects_other_command() {
        let (mut session, mut peer) = pair();
        peer.send_packet(&Play::new("s1"), 1).await.unwrap();

        let err = session.connect_app().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnexpectedCommand(_))));
    }

    #[tokio::test]
    async fn test_connect_app_rejects_wrong_transaction() {
        let (mut session, mut peer) = pair();
        let mut connect = ConnectApp::new(AmfObject::new().with("tcUrl", "rtmp://host/live"));
        connect.transaction_id = 2.0;
        peer.send_packet(&connect, 0).await.unwrap();

        let err = session.connect_app().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnexpectedTransactionId(_))));
    }

    #[tokio::test]
    async fn test_connect_responses() {
        let (mut session, mut peer) = pair();
        let connect = ConnectApp::new(AmfObject::new().with("tcUrl", "rtmp://host/live"));

        session.set_window_ack_size(DEFAULT_WINDOW_ACK_SIZE).await.unwrap();
        session
            .set_peer_bandwidth(DEFAULT_PEER_BANDWIDTH, BANDWIDTH_LIMIT_DYNAMIC)
            .await
            .unwrap();
        session.set_chunk_size(4096).await.unwrap();
        session.response_connect_app(&connect).await.unwrap();
        session.on_bw_done().await.unwrap();

        // Control messages are applied by the peer transport
        match next_command(&mut peer).await {
            Command::Call(call) => assert_eq!(call.command_name, CMD_RESULT),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(peer.in_chunk_size(), 4096);
        assert_eq!(peer.window().window_size, DEFAULT_WINDOW_ACK_SIZE);

        match next_command(&mut peer).await {
            Command::Call(call) => assert_eq!(call.command_name, CMD_ON_BW_DONE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identify_play() {
        let (mut session, mut peer) = pair();
        peer.send_packet(&CreateStream { transaction_id: 2.0 }, 0).await.unwrap();
        let mut play = Play::new("stream1");
        play.duration = 30.0;
        peer.send_packet(&play, 1).await.unwrap();

        let identified = session.identify_client().await.unwrap();
        assert_eq!(identified.conn_type, ConnType::Play);
        assert_eq!(identified.stream_name, "stream1");
        assert_eq!(identified.duration, 30.0);

        match next_command(&mut peer).await {
            Command::Call(call) => {
                assert_eq!(call.command_name, CMD_RESULT);
                assert_eq!(call.transaction_id, 2.0);
                assert_eq!(call.arguments, vec![crate::amf::AmfValue::Number(1.0)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identify_fmle_publish() {
        let (mut session, mut peer) = pair();
        peer.send_packet(&FmleStart::new(CMD_RELEASE_STREAM, 2.0, "live1"), 0)
            .await
            .unwrap();

        let identified = session.identify_client().await.unwrap();
        assert_eq!(identified.conn_type, ConnType::FmlePublish);
        assert_eq!(identified.stream_name, "live1");
    }

    #[tokio::test]
    async fn test_identify_flash_and_haivision_publish() {
        let (mut session, mut peer) = pair();
        peer.send_packet(&CreateStream { transaction_id: 2.0 }, 0).await.unwrap();
        peer.send_packet(&Publish::new("flash"), 1).await.unwrap();
        let identified = session.identify_client().await.unwrap();
        assert_eq!(identified.conn_type, ConnType::FlashPublish);

        let (mut session, mut peer) = pair();
        peer.send_packet(&Publish::new("haivision"), 1).await.unwrap();
        let identified = session.identify_client().await.unwrap();
        assert_eq!(identified.conn_type, ConnType::HaivisionPublish);
        assert_eq!(identified.stream_name, "haivision");
    }

    #[tokio::test]
    async fn test_identify_ignores_unknown_then_limits() {
        let (mut session, mut peer) = pair();
        for _ in 0..MAX_IDENTIFY_MESSAGES {
            let message = RawMessage::new(CSID_AUDIO, 0, MSG_AUDIO, 1, Bytes::from_static(&[0xAF]));
            peer.write_message(&message).await.unwrap();
        }

        let err = session.identify_client().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::IdentifyLimit(_))));
    }

    #[tokio::test]
    async fn test_identify_create_stream_depth() {
        let (mut session, mut peer) = pair();
        for txn in 0..4 {
            peer.send_packet(&CreateStream { transaction_id: 2.0 + txn as f64 }, 0)
                .await
                .unwrap();
        }

        let err = session.identify_client().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::CreateStreamDepth)));
    }

    #[tokio::test]
    async fn test_start_play_sequence() {
        let (mut session, mut peer) = pair();
        session.start_play().await.unwrap();

        assert_eq!(next_status(&mut peer).await.1, NS_PLAY_RESET);
        assert_eq!(next_status(&mut peer).await.1, NS_PLAY_START);

        let sample_access = peer.read_message().await.unwrap();
        assert!(sample_access.is_data());
        let data_start = peer.read_message().await.unwrap();
        assert!(data_start.is_data());
        assert_eq!(data_start.stream_id, DEFAULT_STREAM_ID);
    }

    #[tokio::test]
    async fn test_start_fmle_publish() {
        let (mut session, mut peer) = pair();
        peer.send_packet(&FmleStart::new(CMD_FC_PUBLISH, 3.0, "live1"), 0)
            .await
            .unwrap();
        peer.send_packet(&CreateStream { transaction_id: 4.0 }, 0).await.unwrap();
        peer.send_packet(&Publish::new("live1"), 1).await.unwrap();

        session.start_fmle_publish().await.unwrap();

        for txn in [3.0, 4.0] {
            match next_command(&mut peer).await {
                Command::Call(call) => assert_eq!(call.transaction_id, txn),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            next_status(&mut peer).await,
            (CMD_ON_FC_PUBLISH.to_string(), NS_PUBLISH_START.to_string())
        );
        assert_eq!(
            next_status(&mut peer).await,
            (CMD_ON_STATUS.to_string(), NS_PUBLISH_START.to_string())
        );
    }

    #[tokio::test]
    async fn test_fmle_unpublish() {
        let (mut session, mut peer) = pair();
        session.fmle_unpublish(5.0).await.unwrap();

        assert_eq!(
            next_status(&mut peer).await,
            (CMD_ON_FC_UNPUBLISH.to_string(), NS_UNPUBLISH_SUCCESS.to_string())
        );
        match next_command(&mut peer).await {
            Command::Call(call) => assert_eq!(call.transaction_id, 5.0),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next_status(&mut peer).await.1, NS_UNPUBLISH_SUCCESS);
    }

    #[tokio::test]
    async fn test_pause_notifications() {
        let (mut session, mut peer) = pair();
        session.on_play_client_pause(true).await.unwrap();
        session.on_play_client_pause(false).await.unwrap();

        assert_eq!(next_status(&mut peer).await.1, NS_PAUSE_NOTIFY);
        assert_eq!(next_status(&mut peer).await.1, NS_UNPAUSE_NOTIFY);
    }
}
