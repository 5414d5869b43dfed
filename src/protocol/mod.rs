//! RTMP wire protocol
//!
//! Layered bottom-up:
//! - [`handshake`]: C0/C1/C2 exchange over the raw socket
//! - [`chunk`]: chunk stream codec (header compression, reassembly)
//! - [`message`]: reassembled logical messages
//! - [`packet`]: typed command and control packets
//! - [`transport`]: chunked message I/O with control message interception

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;
pub mod packet;
pub mod transport;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use handshake::{Handshake, HandshakeRole};
pub use message::RawMessage;
pub use packet::{Command, ControlMessage, Packet, UserControl};
pub use transport::Transport;
