//! Source registry for pub/sub routing
//!
//! The registry maps stream identities to sources. A source admits one
//! publisher and fans every media message out to the bounded queues of its
//! consumers.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<SourceRegistry>
//!                     ┌─────────────────────────┐
//!                     │ sources: HashMap<Id,    │
//!                     │   Arc<Source {          │
//!                     │     cached headers,     │
//!                     │     consumer queues,    │
//!                     │   }>                    │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Publisher]             [Consumer]              [Consumer]
//!    on_video()              wait()                  wait()
//!         │                       │                       │
//!         └──► Source::dispatch() ──► VecDeque ──► send ──► TCP
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all consumers share the same
//! payload allocation; enqueueing clones only the handle.

pub mod config;
pub mod consumer;
pub mod entry;
pub mod error;
pub mod frame;
pub mod store;

pub use config::{OverflowPolicy, RegistryConfig};
pub use consumer::Consumer;
pub use entry::{Source, SourceStats};
pub use error::RegistryError;
pub use frame::{MediaKind, MediaMessage, StreamIdentity};
pub use store::SourceRegistry;
