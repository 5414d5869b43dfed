//! Live RTMP media server
//!
//! Accepts RTMP publishers (OBS, FFmpeg, FMLE, Haivision and Flash style
//! encoders) and players, and relays each published stream to every player
//! of the same stream.
//!
//! # Layers
//!
//! - [`amf`]: AMF0 value codec
//! - [`protocol`]: handshake, chunk streams, command and control packets
//! - [`session`]: the command dialogue of one connection
//! - [`registry`]: sources and their consumers (publish/subscribe)
//! - [`media`]: FLV tag inspection (keyframes, sequence headers, aggregates)
//! - [`server`]: TCP listener, connection driver, configuration and hooks
//!
//! # Example
//!
//! ```no_run
//! use rtmp_live::{RtmpServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtmpServer::new(ServerConfig::default());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use registry::{RegistryConfig, SourceRegistry, StreamIdentity};
pub use server::{HookDispatcher, RtmpServer, ServerConfig, VhostConfig};
