//! RTMP server
//!
//! - [`listener`]: TCP accept loop
//! - [`connection`]: per-connection driver
//! - [`connections`]: server-wide set of live connections
//! - [`config`]: server and virtual host configuration
//! - [`hooks`]: lifecycle webhooks

pub mod config;
pub mod connection;
pub mod connections;
pub mod hooks;
pub mod listener;

pub use config::{HttpHooksConfig, ServerConfig, VhostConfig};
pub use connection::Connection;
pub use connections::{ConnectionInfo, ConnectionSet};
pub use hooks::{HookDispatcher, HookError, HookEvent, NoopHooks};
pub use listener::RtmpServer;
