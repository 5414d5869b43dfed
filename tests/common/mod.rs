//! In-memory test harness: a server-side `Connection` on one end of a
//! duplex pipe and a minimal RTMP client on the other.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{duplex, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rtmp_live::amf::{Amf0Encoder, AmfObject, AmfValue};
use rtmp_live::protocol::constants::*;
use rtmp_live::protocol::packet::{Command, ConnectApp, CreateStream, FmleStart, Play, Publish};
use rtmp_live::protocol::{Handshake, HandshakeRole, Packet, RawMessage, Transport};
use rtmp_live::server::{Connection, HookDispatcher, NoopHooks};
use rtmp_live::{ServerConfig, SourceRegistry};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SourceRegistry>,
    pub hooks: Arc<dyn HookDispatcher>,
    pub cancel: CancellationToken,
    next_id: AtomicU64,
}

impl TestServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_hooks(config, Arc::new(NoopHooks))
    }

    pub fn with_hooks(config: ServerConfig, hooks: Arc<dyn HookDispatcher>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SourceRegistry::new()),
            hooks,
            cancel: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawn a server connection and return the client end
    pub fn accept(&self) -> (TestClient, JoinHandle<rtmp_live::Result<()>>) {
        let (server, client) = duplex(256 * 1024);
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::new(
            session_id,
            server,
            SocketAddr::from(([127, 0, 0, 1], 40000 + session_id as u16)),
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.hooks),
            self.cancel.child_token(),
        );
        let task = tokio::spawn(connection.run());
        (TestClient::new(client), task)
    }
}

pub struct TestClient {
    transport: Transport<DuplexStream>,
}

impl TestClient {
    fn new(stream: DuplexStream) -> Self {
        Self {
            transport: Transport::new(stream),
        }
    }

    pub async fn handshake(&mut self) {
        let mut hs = Handshake::new(HandshakeRole::Client).with_digest();
        let c0c1 = hs.generate_initial().unwrap();
        self.transport.write_raw(&c0c1).await.unwrap();
        let mut s0s1s2 = self.transport.read_raw(hs.bytes_needed()).await.unwrap();
        let c2 = hs.process(&mut s0s1s2).unwrap().unwrap();
        self.transport.write_raw(&c2).await.unwrap();
    }

    /// Handshake and connect, waiting for the connect result
    pub async fn connect(&mut self, tc_url: &str) {
        self.handshake().await;
        let connect = ConnectApp::new(AmfObject::new().with("app", "live").with("tcUrl", tc_url));
        self.send(&connect, 0).await;

        loop {
            if let Command::Call(call) = self.next_command().await {
                if call.command_name == CMD_RESULT && call.transaction_id == 1.0 {
                    return;
                }
            }
        }
    }

    /// createStream + play, waiting for NetStream.Play.Start
    pub async fn play(&mut self, stream: &str) {
        self.send(&CreateStream { transaction_id: 2.0 }, 0).await;
        self.send(&Play::new(stream), DEFAULT_STREAM_ID).await;
        self.expect_status(NS_PLAY_START).await;
    }

    /// Send the FMLE publish sequence without waiting for an answer
    pub async fn send_fmle_publish(&mut self, stream: &str) {
        self.send(&FmleStart::new(CMD_RELEASE_STREAM, 2.0, stream), 0).await;
        self.send(&FmleStart::new(CMD_FC_PUBLISH, 3.0, stream), 0).await;
        self.send(&CreateStream { transaction_id: 4.0 }, 0).await;
        self.send(&Publish::new(stream), DEFAULT_STREAM_ID).await;
    }

    /// FMLE publish, waiting for NetStream.Publish.Start
    pub async fn publish(&mut self, stream: &str) {
        self.send_fmle_publish(stream).await;
        loop {
            let (name, code) = self.next_status().await;
            if name == CMD_ON_STATUS && code == NS_PUBLISH_START {
                return;
            }
        }
    }

    pub async fn unpublish(&mut self, stream: &str) {
        self.send(&FmleStart::new(CMD_FC_UNPUBLISH, 5.0, stream), 0).await;
        self.expect_status(NS_UNPUBLISH_SUCCESS).await;
    }

    pub async fn send<P: Packet>(&mut self, packet: &P, stream_id: u32) {
        self.transport.send_packet(packet, stream_id).await.unwrap();
    }

    pub async fn send_video(&mut self, timestamp: u32, payload: &'static [u8]) {
        let message = RawMessage::new(CSID_VIDEO, timestamp, MSG_VIDEO, DEFAULT_STREAM_ID, Bytes::from_static(payload));
        self.transport.write_message(&message).await.unwrap();
    }

    pub async fn send_audio(&mut self, timestamp: u32, payload: &'static [u8]) {
        let message = RawMessage::new(CSID_AUDIO, timestamp, MSG_AUDIO, DEFAULT_STREAM_ID, Bytes::from_static(payload));
        self.transport.write_message(&message).await.unwrap();
    }

    /// `@setDataFrame` metadata, the way encoders send it
    pub async fn send_metadata(&mut self, metadata: AmfObject) {
        let mut encoder = Amf0Encoder::new();
        encoder.encode_all(&[
            AmfValue::from(CMD_SET_DATA_FRAME),
            AmfValue::from(CMD_ON_METADATA),
            AmfValue::EcmaArray(metadata),
        ]);
        let message = RawMessage::new(CSID_OVER_STREAM, 0, MSG_DATA_AMF0, DEFAULT_STREAM_ID, encoder.finish());
        self.transport.write_message(&message).await.unwrap();
    }

    pub async fn read_message(&mut self) -> rtmp_live::Result<RawMessage> {
        tokio::time::timeout(STEP_TIMEOUT, self.transport.read_message())
            .await
            .expect("timed out waiting for a message")
    }

    pub async fn next_command(&mut self) -> Command {
        loop {
            let message = self.read_message().await.unwrap();
            if message.is_command() {
                return Command::decode(&message).unwrap();
            }
        }
    }

    /// Next status notification as (command name, code)
    pub async fn next_status(&mut self) -> (String, String) {
        loop {
            if let Command::Call(call) = self.next_command().await {
                let code = call
                    .arguments
                    .first()
                    .and_then(|arg| arg.get_string("code"))
                    .map(str::to_string);
                if let Some(code) = code {
                    return (call.command_name, code);
                }
            }
        }
    }

    pub async fn expect_status(&mut self, expected: &str) {
        loop {
            if self.next_status().await.1 == expected {
                return;
            }
        }
    }

    /// Next audio, video or metadata message
    pub async fn next_media(&mut self) -> RawMessage {
        loop {
            let message = self.read_message().await.unwrap();
            if message.is_audio() || message.is_video() {
                return message;
            }
            if message.is_data() && message_is_metadata(&message) {
                return message;
            }
        }
    }

    /// Wait for the server to close the connection
    pub async fn expect_closed(&mut self) {
        loop {
            if self.read_message().await.is_err() {
                return;
            }
        }
    }
}

fn message_is_metadata(message: &RawMessage) -> bool {
    matches!(
        rtmp_live::protocol::packet::OnMetaData::decode(message),
        Ok(Some(_))
    )
}

/// Poll `check` until it holds or the step timeout runs out
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
