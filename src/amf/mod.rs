//! Action Message Format value codec
//!
//! RTMP command and data messages are sequences of AMF0 values: the command
//! name first, the transaction id second, then command-specific arguments.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfValue};
