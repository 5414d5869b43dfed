//! Chunked message transport over an async byte stream
//!
//! Owns the socket, the chunk codec state of both directions and the
//! acknowledgement window. Protocol control and user control messages are
//! applied here and never reach the caller.
//!
//! Reads are cancel-safe: bytes are only removed from the read buffer once a
//! whole chunk is available. Outgoing bytes are staged in a write buffer and
//! drained incrementally, so a cancelled write never leaves a torn chunk on
//! the wire.

use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::chunk::{ChunkDecoder, ChunkEncoder};
use super::constants::*;
use super::message::RawMessage;
use super::packet::{ControlMessage, Packet, UserControl};
use crate::error::{Error, Result};

/// Acknowledgement window accounting
#[derive(Debug, Default, Clone, Copy)]
pub struct AckWindow {
    /// Window announced by the peer (0 = no acknowledgements requested)
    pub window_size: u32,
    /// Total bytes read from the peer
    pub bytes_received: u64,
    /// bytes_received value at the last acknowledgement we sent
    pub last_ack_sent: u64,
    /// Sequence number of the last acknowledgement the peer sent
    pub peer_acked: u32,
    /// Bandwidth limit announced by the peer
    pub peer_bandwidth: u32,
}

/// Chunked message transport
pub struct Transport<S> {
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    window: AckWindow,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected byte stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_buf: BytesMut::with_capacity(64 * 1024),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            window: AckWindow::default(),
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Fail reads and writes that stall longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self.write_timeout = Some(timeout);
        self
    }

    /// Reject inbound messages longer than `size`
    pub fn with_max_message_size(mut self, size: u32) -> Self {
        self.decoder = std::mem::take(&mut self.decoder).with_max_message_size(size);
        self
    }

    /// Change the read timeout; players idle on the read side
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Inbound chunk size
    pub fn in_chunk_size(&self) -> u32 {
        self.decoder.chunk_size()
    }

    /// Outbound chunk size
    pub fn out_chunk_size(&self) -> u32 {
        self.encoder.chunk_size()
    }

    /// Acknowledgement window state
    pub fn window(&self) -> AckWindow {
        self.window
    }

    /// Announce and apply a new outbound chunk size
    pub async fn set_out_chunk_size(&mut self, size: u32) -> Result<()> {
        let size = size.clamp(1, MAX_CHUNK_SIZE);
        self.send_packet(&ControlMessage::SetChunkSize(size), 0)
            .await?;
        self.encoder.set_chunk_size(size);
        Ok(())
    }

    /// Read exactly `len` raw bytes (handshake phase)
    pub async fn read_raw(&mut self, len: usize) -> Result<Bytes> {
        while self.read_buf.len() < len {
            self.fill().await?;
        }
        Ok(self.read_buf.split_to(len).freeze())
    }

    /// Write raw bytes (handshake phase)
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.write_buf.extend_from_slice(data);
        self.drain().await
    }

    /// Read the next message that is not a protocol/user control message
    pub async fn read_message(&mut self) -> Result<RawMessage> {
        loop {
            if !self.write_buf.is_empty() {
                self.drain().await?;
            }

            match self.decoder.decode(&mut self.read_buf)? {
                Some(message) => {
                    if !self.intercept(&message)? {
                        return Ok(message);
                    }
                }
                None => self.fill().await?,
            }
        }
    }

    /// Chunk and write one message
    pub async fn write_message(&mut self, message: &RawMessage) -> Result<()> {
        self.encoder.encode(message, &mut self.write_buf);
        self.drain().await
    }

    /// Chunk and write several messages with a single flush
    pub async fn write_messages(&mut self, messages: &[RawMessage]) -> Result<()> {
        for message in messages {
            self.encoder.encode(message, &mut self.write_buf);
        }
        self.drain().await
    }

    /// Encode and write a packet on the given message stream
    pub async fn send_packet<P: Packet + ?Sized>(&mut self, packet: &P, stream_id: u32) -> Result<()> {
        self.write_message(&packet.to_message(stream_id)).await
    }

    /// Apply a control message; returns true when it was consumed
    fn intercept(&mut self, message: &RawMessage) -> Result<bool> {
        let Some(control) = ControlMessage::decode(message)? else {
            return Ok(false);
        };

        match control {
            ControlMessage::SetChunkSize(size) => {
                tracing::trace!(size = size, "Peer set chunk size");
                self.decoder.set_chunk_size(size);
            }
            ControlMessage::Abort(csid) => {
                tracing::trace!(csid = csid, "Peer aborted message");
                self.decoder.abort(csid);
            }
            ControlMessage::Acknowledgement(sequence) => {
                self.window.peer_acked = sequence;
            }
            ControlMessage::WindowAckSize(size) => {
                tracing::trace!(size = size, "Peer set window ack size");
                self.window.window_size = size;
            }
            ControlMessage::SetPeerBandwidth { size, .. } => {
                self.window.peer_bandwidth = size;
            }
            ControlMessage::UserControl(UserControl::PingRequest(timestamp)) => {
                self.queue(&ControlMessage::UserControl(UserControl::PingResponse(
                    timestamp,
                )));
            }
            ControlMessage::UserControl(event) => {
                tracing::trace!(event = ?event, "User control");
            }
        }
        Ok(true)
    }

    /// Stage a packet for the next drain
    fn queue<P: Packet>(&mut self, packet: &P) {
        self.encoder
            .encode(&packet.to_message(0), &mut self.write_buf);
    }

    /// Read more bytes from the socket into the read buffer
    async fn fill(&mut self) -> Result<()> {
        let timeout = self.read_timeout;
        let n = with_timeout(timeout, self.stream.read_buf(&mut self.read_buf)).await??;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }

        self.window.bytes_received += n as u64;
        let window_size = self.window.window_size as u64;
        if window_size > 0 && self.window.bytes_received - self.window.last_ack_sent >= window_size {
            self.window.last_ack_sent = self.window.bytes_received;
            // Sequence number wraps at 32 bits
            let sequence = self.window.bytes_received as u32;
            self.queue(&ControlMessage::Acknowledgement(sequence));
        }
        Ok(())
    }

    /// Write out everything staged in the write buffer
    async fn drain(&mut self) -> Result<()> {
        let timeout = self.write_timeout;
        while !self.write_buf.is_empty() {
            let n = with_timeout(timeout, self.stream.write_buf(&mut self.write_buf)).await??;
            if n == 0 {
                return Err(Error::Io(std::io::ErrorKind::WriteZero.into()));
            }
        }
        with_timeout(timeout, self.stream.flush()).await??;
        Ok(())
    }

    /// Shut down the write half of the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Consume the transport and return the stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| Error::Timeout),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_message_roundtrip() {
        let (a, b) = duplex(64 * 1024);
        let mut client = Transport::new(a);
        let mut server = Transport::new(b);

        let msg = RawMessage::new(CSID_VIDEO, 33, MSG_VIDEO, 1, vec![9u8; 1000]);
        client.write_message(&msg).await.unwrap();

        let received = server.read_message().await.unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_set_chunk_size_intercepted() {
        let (a, b) = duplex(64 * 1024);
        let mut client = Transport::new(a);
        let mut server = Transport::new(b);

        client.set_out_chunk_size(4096).await.unwrap();
        let msg = RawMessage::new(CSID_VIDEO, 0, MSG_VIDEO, 1, vec![1u8; 3000]);
        client.write_message(&msg).await.unwrap();

        // Control message is applied, only the video message surfaces
        let received = server.read_message().await.unwrap();
        assert_eq!(received.payload.len(), 3000);
        assert_eq!(server.in_chunk_size(), 4096);
    }

    #[tokio::test]
    async fn test_ping_request_answered() {
        let (a, b) = duplex(64 * 1024);
        let mut client = Transport::new(a);
        let mut server = Transport::new(b);

        client
            .send_packet(&ControlMessage::UserControl(UserControl::PingRequest(77)), 0)
            .await
            .unwrap();
        client
            .send_packet(&ControlMessage::Acknowledgement(1), 0)
            .await
            .unwrap();
        let msg = RawMessage::new(CSID_AUDIO, 0, MSG_AUDIO, 1, vec![0xAF, 0x01]);
        client.write_message(&msg).await.unwrap();

        assert_eq!(server.read_message().await.unwrap(), msg);
        assert_eq!(server.window().peer_acked, 1);

        // The ping response was flushed before the audio message surfaced
        let mut stream = client.into_inner();
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let response = loop {
            if let Some(m) = decoder.decode(&mut buf).unwrap() {
                break m;
            }
            stream.read_buf(&mut buf).await.unwrap();
        };
        assert_eq!(
            ControlMessage::decode(&response).unwrap(),
            Some(ControlMessage::UserControl(UserControl::PingResponse(77)))
        );
    }

    #[tokio::test]
    async fn test_acknowledgement_sent_after_window() {
        let (a, b) = duplex(64 * 1024);
        let mut client = Transport::new(a);
        let mut server = Transport::new(b);

        client
            .send_packet(&ControlMessage::WindowAckSize(500), 0)
            .await
            .unwrap();
        let small = RawMessage::new(CSID_AUDIO, 0, MSG_AUDIO, 1, vec![0u8; 4]);
        client.write_message(&small).await.unwrap();
        server.read_message().await.unwrap();
        assert_eq!(server.window().window_size, 500);

        let msg = RawMessage::new(CSID_VIDEO, 0, MSG_VIDEO, 1, vec![0u8; 1000]);
        client.write_message(&msg).await.unwrap();
        client.write_message(&msg).await.unwrap();
        server.read_message().await.unwrap();
        server.read_message().await.unwrap();
        assert!(server.window().bytes_received >= 2000);
        assert!(server.window().last_ack_sent > 0);
    }

    #[tokio::test]
    async fn test_eof_is_io_error() {
        let (a, b) = duplex(1024);
        let mut server = Transport::new(b);
        drop(a);

        let err = server.read_message().await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (_a, b) = duplex(1024);
        let mut server = Transport::new(b).with_timeout(Duration::from_millis(20));

        let err = server.read_message().await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn test_protocol_violation_surfaces() {
        let (mut a, b) = duplex(1024);
        let mut server = Transport::new(b);

        // fmt 3 on a fresh chunk stream
        a.write_all(&[0xC3, 0x00]).await.unwrap();
        let err = server.read_message().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MissingChunkHeader(3))
        ));
    }

    #[tokio::test]
    async fn test_raw_then_chunked() {
        let (a, b) = duplex(64 * 1024);
        let mut client = Transport::new(a);
        let mut server = Transport::new(b);

        client.write_raw(&[1, 2, 3]).await.unwrap();
        let msg = RawMessage::new(3, 0, MSG_COMMAND_AMF0, 0, vec![0x05]);
        client.write_message(&msg).await.unwrap();

        assert_eq!(&server.read_raw(3).await.unwrap()[..], &[1, 2, 3]);
        assert_eq!(server.read_message().await.unwrap(), msg);
    }
}
