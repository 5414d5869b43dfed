//! Per-connection session layer
//!
//! - [`engine`]: the command dialogue of one connection
//! - [`request`]: who the client is and which stream it targets
//! - [`state`]: lifecycle phases

pub mod engine;
pub mod request;
pub mod state;

pub use engine::{Identified, RtmpSession};
pub use request::{ConnType, Request, TcUrl};
pub use state::{SessionPhase, SessionState};
