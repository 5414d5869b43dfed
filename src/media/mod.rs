//! Media payload handling
//!
//! The server relays FLV tag bodies untouched; this module only classifies
//! them (keyframes, sequence headers) and unpacks aggregate messages.

pub mod flv;

pub use flv::{FlvTag, FlvTagType};
