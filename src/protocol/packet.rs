//! Command and control packets
//!
//! Every packet knows its message type and the chunk stream it prefers to
//! travel on, and encodes its full wire payload. Command packets are
//! decoded by [`Command::decode`], which reads the command name and the
//! transaction id first and then lets the selected packet read its own
//! fields.
//!
//! ```text
//! AMF0 command payload:
//!   name (string) | transaction id (number) | command object | args...
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use super::message::RawMessage;
use crate::amf::{Amf0Decoder, Amf0Encoder, AmfObject, AmfValue};
use crate::error::{AmfError, ProtocolError};

/// Wire-encodable packet
pub trait Packet {
    /// Message type id used for the outgoing message
    fn message_type(&self) -> u8 {
        MSG_COMMAND_AMF0
    }

    /// Chunk stream the packet is sent on
    fn prefer_csid(&self) -> u32;

    /// Full payload including command name and transaction id
    fn encode(&self) -> Bytes;

    /// Wrap into a message for the given message stream
    fn to_message(&self, stream_id: u32) -> RawMessage {
        RawMessage::new(
            self.prefer_csid(),
            0,
            self.message_type(),
            stream_id,
            self.encode(),
        )
    }
}

/// Sequential reader over the AMF0 values of a command body
pub struct ArgReader {
    buf: Bytes,
    decoder: Amf0Decoder,
}

impl ArgReader {
    pub fn new(buf: Bytes) -> Self {
        Self {
            buf,
            decoder: Amf0Decoder::new(),
        }
    }

    /// Whether any values remain
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next value, which must exist
    pub fn value(&mut self) -> Result<AmfValue, AmfError> {
        self.decoder.decode(&mut self.buf)
    }

    /// Next value if any remain
    pub fn optional(&mut self) -> Result<Option<AmfValue>, AmfError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        self.value().map(Some)
    }

    pub fn string(&mut self) -> Result<String, AmfError> {
        match self.value()? {
            AmfValue::String(s) => Ok(s),
            other => Err(AmfError::UnexpectedValueType {
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    pub fn number(&mut self) -> Result<f64, AmfError> {
        self.value()?.try_number()
    }

    /// Null or undefined placeholder (command object of most requests)
    pub fn null(&mut self) -> Result<(), AmfError> {
        let value = self.value()?;
        if value.is_null_or_undefined() {
            Ok(())
        } else {
            Err(AmfError::UnexpectedValueType {
                expected: "null",
                found: value.kind(),
            })
        }
    }

    /// Object or ECMA array
    pub fn object(&mut self) -> Result<AmfObject, AmfError> {
        match self.value()? {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Ok(o),
            other => Err(AmfError::UnexpectedValueType {
                expected: "object",
                found: other.kind(),
            }),
        }
    }

    /// Everything left, as raw values
    pub fn rest(&mut self) -> Result<Vec<AmfValue>, AmfError> {
        self.decoder.decode_all(&mut self.buf)
    }
}

fn amf_payload(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

fn status_object(level: &str, code: &str, description: &str) -> AmfObject {
    AmfObject::new()
        .with("level", level)
        .with("code", code)
        .with("description", description)
}

// ============================================================================
// Requests (client -> server)
// ============================================================================

/// `connect` request
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectApp {
    pub transaction_id: f64,
    pub command_object: AmfObject,
    /// Optional user arguments following the command object
    pub args: Option<AmfValue>,
}

impl ConnectApp {
    pub fn new(command_object: AmfObject) -> Self {
        Self {
            transaction_id: CONNECT_TRANSACTION_ID,
            command_object,
            args: None,
        }
    }

    fn decode(transaction_id: f64, reader: &mut ArgReader) -> Result<Self, ProtocolError> {
        if transaction_id != CONNECT_TRANSACTION_ID {
            return Err(ProtocolError::UnexpectedTransactionId(transaction_id));
        }
        let command_object = reader.object()?;
        let args = reader.optional()?;
        Ok(Self {
            transaction_id,
            command_object,
            args,
        })
    }

    /// Target URL, mandatory
    pub fn tc_url(&self) -> Result<&str, AmfError> {
        self.command_object.get_string("tcUrl")
    }

    pub fn page_url(&self) -> Option<&str> {
        self.command_object.get_string("pageUrl").ok()
    }

    pub fn swf_url(&self) -> Option<&str> {
        self.command_object.get_string("swfUrl").ok()
    }

    /// AMF encoding announced by the client (0 when absent)
    pub fn object_encoding(&self) -> f64 {
        self.command_object
            .get_number("objectEncoding")
            .unwrap_or(DEFAULT_OBJECT_ENCODING)
    }
}

impl Packet for ConnectApp {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        let mut values = vec![
            AmfValue::from(CMD_CONNECT),
            AmfValue::Number(self.transaction_id),
            AmfValue::Object(self.command_object.clone()),
        ];
        values.extend(self.args.clone());
        amf_payload(&values)
    }
}

/// `createStream` request
#[derive(Debug, Clone, PartialEq)]
pub struct CreateStream {
    pub transaction_id: f64,
}

impl CreateStream {
    fn decode(transaction_id: f64, reader: &mut ArgReader) -> Result<Self, ProtocolError> {
        // Command object is null, but some clients leave it out
        if !reader.is_empty() {
            reader.null()?;
        }
        Ok(Self { transaction_id })
    }
}

impl Packet for CreateStream {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_CREATE_STREAM.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
        ])
    }
}

/// `releaseStream`, `FCPublish` or `FCUnpublish` from FMLE-style encoders
#[derive(Debug, Clone, PartialEq)]
pub struct FmleStart {
    pub command_name: String,
    pub transaction_id: f64,
    pub stream_name: String,
}

impl FmleStart {
    pub fn new(command_name: &str, transaction_id: f64, stream_name: impl Into<String>) -> Self {
        Self {
            command_name: command_name.to_string(),
            transaction_id,
            stream_name: stream_name.into(),
        }
    }

    fn decode(
        command_name: String,
        transaction_id: f64,
        reader: &mut ArgReader,
    ) -> Result<Self, ProtocolError> {
        reader.null()?;
        let stream_name = reader.string()?;
        Ok(Self {
            command_name,
            transaction_id,
            stream_name,
        })
    }

    pub fn is_unpublish(&self) -> bool {
        self.command_name == CMD_FC_UNPUBLISH
    }
}

impl Packet for FmleStart {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            self.command_name.as_str().into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
            self.stream_name.as_str().into(),
        ])
    }
}

/// `publish` request
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub transaction_id: f64,
    pub stream_name: String,
    /// "live", "record" or "append"
    pub publish_type: String,
}

impl Publish {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            transaction_id: 0.0,
            stream_name: stream_name.into(),
            publish_type: "live".to_string(),
        }
    }

    fn decode(transaction_id: f64, reader: &mut ArgReader) -> Result<Self, ProtocolError> {
        reader.null()?;
        let stream_name = reader.string()?;
        let publish_type = match reader.optional()? {
            Some(AmfValue::String(t)) => t,
            _ => "live".to_string(),
        };
        Ok(Self {
            transaction_id,
            stream_name,
            publish_type,
        })
    }
}

impl Packet for Publish {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_PUBLISH.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
            self.stream_name.as_str().into(),
            self.publish_type.as_str().into(),
        ])
    }
}

/// `play` request
#[derive(Debug, Clone, PartialEq)]
pub struct Play {
    pub transaction_id: f64,
    pub stream_name: String,
    /// Start position in seconds (-2 live or recorded, -1 live only)
    pub start: f64,
    /// Duration in seconds (-1 until end)
    pub duration: f64,
    pub reset: bool,
}

impl Play {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            transaction_id: 0.0,
            stream_name: stream_name.into(),
            start: -2.0,
            duration: -1.0,
            reset: true,
        }
    }

    fn decode(transaction_id: f64, reader: &mut ArgReader) -> Result<Self, ProtocolError> {
        reader.null()?;
        let mut play = Self::new(reader.string()?);
        play.transaction_id = transaction_id;

        if let Some(value) = reader.optional()? {
            play.start = value.try_number()?;
        }
        if let Some(value) = reader.optional()? {
            play.duration = value.try_number()?;
        }
        // reset is a boolean, though older clients send a number
        match reader.optional()? {
            Some(AmfValue::Boolean(b)) => play.reset = b,
            Some(AmfValue::Number(n)) => play.reset = n != 0.0,
            Some(other) => {
                return Err(AmfError::UnexpectedValueType {
                    expected: "boolean",
                    found: other.kind(),
                }
                .into())
            }
            None => {}
        }
        Ok(play)
    }
}

impl Packet for Play {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_PLAY.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
            self.stream_name.as_str().into(),
            AmfValue::Number(self.start),
            AmfValue::Number(self.duration),
            AmfValue::Boolean(self.reset),
        ])
    }
}

/// `pause` request
#[derive(Debug, Clone, PartialEq)]
pub struct Pause {
    pub transaction_id: f64,
    pub is_pause: bool,
    /// Stream position in milliseconds
    pub time_ms: f64,
}

impl Pause {
    fn decode(transaction_id: f64, reader: &mut ArgReader) -> Result<Self, ProtocolError> {
        reader.null()?;
        let is_pause = reader.value()?.try_bool()?;
        let time_ms = match reader.optional()? {
            Some(value) => value.try_number()?,
            None => 0.0,
        };
        Ok(Self {
            transaction_id,
            is_pause,
            time_ms,
        })
    }
}

impl Packet for Pause {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_PAUSE.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
            AmfValue::Boolean(self.is_pause),
            AmfValue::Number(self.time_ms),
        ])
    }
}

/// `closeStream` or `deleteStream`
#[derive(Debug, Clone, PartialEq)]
pub struct CloseStream {
    pub command_name: String,
    pub transaction_id: f64,
}

impl Packet for CloseStream {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            self.command_name.as_str().into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
        ])
    }
}

/// Any other command carrying a transaction id
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub command_name: String,
    pub transaction_id: f64,
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
}

impl Call {
    fn decode(
        command_name: String,
        transaction_id: f64,
        reader: &mut ArgReader,
    ) -> Result<Self, ProtocolError> {
        let command_object = reader.optional()?.unwrap_or(AmfValue::Null);
        let arguments = reader.rest()?;
        Ok(Self {
            command_name,
            transaction_id,
            command_object,
            arguments,
        })
    }
}

impl Packet for Call {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        let mut values = vec![
            self.command_name.as_str().into(),
            AmfValue::Number(self.transaction_id),
            self.command_object.clone(),
        ];
        values.extend(self.arguments.iter().cloned());
        amf_payload(&values)
    }
}

/// A decoded command message
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect(ConnectApp),
    CreateStream(CreateStream),
    FmleStart(FmleStart),
    Publish(Publish),
    Play(Play),
    Pause(Pause),
    CloseStream(CloseStream),
    Call(Call),
}

impl Command {
    /// Decode an AMF0/AMF3 command message
    pub fn decode(message: &RawMessage) -> Result<Self, ProtocolError> {
        let mut reader = ArgReader::new(message.amf0_body());
        let name = reader.string()?;
        // Some clients omit the transaction id on stream commands
        let transaction_id = match reader.optional()? {
            Some(value) => value.try_number()?,
            None => 0.0,
        };

        let command = match name.as_str() {
            CMD_CONNECT => Command::Connect(ConnectApp::decode(transaction_id, &mut reader)?),
            CMD_CREATE_STREAM => {
                Command::CreateStream(CreateStream::decode(transaction_id, &mut reader)?)
            }
            CMD_RELEASE_STREAM | CMD_FC_PUBLISH | CMD_FC_UNPUBLISH => {
                Command::FmleStart(FmleStart::decode(name, transaction_id, &mut reader)?)
            }
            CMD_PUBLISH => Command::Publish(Publish::decode(transaction_id, &mut reader)?),
            CMD_PLAY => Command::Play(Play::decode(transaction_id, &mut reader)?),
            CMD_PAUSE => Command::Pause(Pause::decode(transaction_id, &mut reader)?),
            CMD_CLOSE_STREAM | CMD_DELETE_STREAM => Command::CloseStream(CloseStream {
                command_name: name,
                transaction_id,
            }),
            _ => Command::Call(Call::decode(name, transaction_id, &mut reader)?),
        };
        Ok(command)
    }

    /// Command name as sent on the wire
    pub fn name(&self) -> &str {
        match self {
            Command::Connect(_) => CMD_CONNECT,
            Command::CreateStream(_) => CMD_CREATE_STREAM,
            Command::FmleStart(p) => &p.command_name,
            Command::Publish(_) => CMD_PUBLISH,
            Command::Play(_) => CMD_PLAY,
            Command::Pause(_) => CMD_PAUSE,
            Command::CloseStream(p) => &p.command_name,
            Command::Call(p) => &p.command_name,
        }
    }
}

/// Stream metadata carried by `@setDataFrame` or `onMetaData`
#[derive(Debug, Clone, PartialEq)]
pub struct OnMetaData {
    pub metadata: AmfObject,
}

impl OnMetaData {
    pub fn new(metadata: AmfObject) -> Self {
        Self { metadata }
    }

    /// Decode a data message; `Ok(None)` if it is not metadata
    pub fn decode(message: &RawMessage) -> Result<Option<Self>, ProtocolError> {
        let mut reader = ArgReader::new(message.amf0_body());
        let mut name = reader.string()?;
        if name == CMD_SET_DATA_FRAME {
            name = reader.string()?;
        }
        if name != CMD_ON_METADATA {
            return Ok(None);
        }
        let metadata = match reader.optional()? {
            Some(AmfValue::Object(o)) | Some(AmfValue::EcmaArray(o)) => o,
            Some(AmfValue::Null) | Some(AmfValue::Undefined) | None => AmfObject::new(),
            Some(other) => {
                return Err(AmfError::UnexpectedValueType {
                    expected: "object",
                    found: other.kind(),
                }
                .into())
            }
        };
        Ok(Some(Self { metadata }))
    }
}

impl Packet for OnMetaData {
    fn message_type(&self) -> u8 {
        MSG_DATA_AMF0
    }

    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_ON_METADATA.into(),
            AmfValue::EcmaArray(self.metadata.clone()),
        ])
    }
}

// ============================================================================
// Responses (server -> client)
// ============================================================================

/// `_result` for `connect`
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectAppRes {
    pub transaction_id: f64,
    pub props: AmfObject,
    pub info: AmfObject,
}

impl ConnectAppRes {
    pub fn new(object_encoding: f64) -> Self {
        let props = AmfObject::new()
            .with("fmsVer", "FMS/3,5,3,888")
            .with("capabilities", 127.0)
            .with("mode", 1.0);
        let data = AmfObject::new()
            .with("version", env!("CARGO_PKG_VERSION"))
            .with("server", SERVER_NAME);
        let info = status_object(STATUS_LEVEL_STATUS, NC_CONNECT_SUCCESS, "Connection succeeded")
            .with("objectEncoding", object_encoding)
            .with("data", AmfValue::EcmaArray(data));
        Self {
            transaction_id: CONNECT_TRANSACTION_ID,
            props,
            info,
        }
    }
}

impl Packet for ConnectAppRes {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_RESULT.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Object(self.props.clone()),
            AmfValue::Object(self.info.clone()),
        ])
    }
}

/// `_result` for `createStream`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateStreamRes {
    pub transaction_id: f64,
    pub stream_id: u32,
}

impl Packet for CreateStreamRes {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_RESULT.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
            AmfValue::Number(self.stream_id as f64),
        ])
    }
}

/// `_result` for `releaseStream`/`FCPublish`/`FCUnpublish`
#[derive(Debug, Clone, PartialEq)]
pub struct FmleStartRes {
    pub transaction_id: f64,
}

impl Packet for FmleStartRes {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_RESULT.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
            AmfValue::Undefined,
        ])
    }
}

/// `_result` for an unrecognized call
#[derive(Debug, Clone, PartialEq)]
pub struct CallRes {
    pub transaction_id: f64,
}

impl Packet for CallRes {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_RESULT.into(),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
        ])
    }
}

/// Status notification in command form (`onStatus`, `onFCPublish`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct OnStatusCall {
    pub command_name: String,
    pub data: AmfObject,
}

impl OnStatusCall {
    /// `onStatus` with level "status"
    pub fn status(code: &str, description: &str) -> Self {
        Self::named(CMD_ON_STATUS, code, description)
    }

    /// Status notification with another command name
    pub fn named(command_name: &str, code: &str, description: &str) -> Self {
        Self {
            command_name: command_name.to_string(),
            data: status_object(STATUS_LEVEL_STATUS, code, description),
        }
    }

    /// Add a property to the status object
    pub fn with(mut self, name: &str, value: impl Into<AmfValue>) -> Self {
        self.data.set(name, value);
        self
    }
}

impl Packet for OnStatusCall {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            self.command_name.as_str().into(),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::Object(self.data.clone()),
        ])
    }
}

/// `onStatus` in data form (`NetStream.Data.Start`)
#[derive(Debug, Clone, PartialEq)]
pub struct OnStatusData {
    pub data: AmfObject,
}

impl OnStatusData {
    pub fn code(code: &str) -> Self {
        Self {
            data: AmfObject::new().with("code", code),
        }
    }
}

impl Packet for OnStatusData {
    fn message_type(&self) -> u8 {
        MSG_DATA_AMF0
    }

    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[CMD_ON_STATUS.into(), AmfValue::Object(self.data.clone())])
    }
}

/// `|RtmpSampleAccess` data message
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAccess {
    pub video: bool,
    pub audio: bool,
}

impl Packet for SampleAccess {
    fn message_type(&self) -> u8 {
        MSG_DATA_AMF0
    }

    fn prefer_csid(&self) -> u32 {
        CSID_OVER_STREAM
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[
            CMD_SAMPLE_ACCESS.into(),
            AmfValue::Boolean(self.video),
            AmfValue::Boolean(self.audio),
        ])
    }
}

/// `onBWDone`, sent after the connect result
#[derive(Debug, Clone, PartialEq)]
pub struct OnBwDone;

impl Packet for OnBwDone {
    fn prefer_csid(&self) -> u32 {
        CSID_OVER_CONNECTION2
    }

    fn encode(&self) -> Bytes {
        amf_payload(&[CMD_ON_BW_DONE.into(), AmfValue::Number(0.0), AmfValue::Null])
    }
}

// ============================================================================
// Protocol control
// ============================================================================

/// User Control event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControl {
    StreamBegin(u32),
    StreamEof(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    PingRequest(u32),
    PingResponse(u32),
    Other(u16),
}

impl UserControl {
    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 2 {
            return Err(ProtocolError::MalformedMessage("user control"));
        }
        let event = u16::from_be_bytes([payload[0], payload[1]]);
        let word = |offset: usize| -> Result<u32, ProtocolError> {
            payload
                .get(offset..offset + 4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or(ProtocolError::MalformedMessage("user control"))
        };
        Ok(match event {
            UC_STREAM_BEGIN => UserControl::StreamBegin(word(2)?),
            UC_STREAM_EOF => UserControl::StreamEof(word(2)?),
            UC_SET_BUFFER_LENGTH => UserControl::SetBufferLength {
                stream_id: word(2)?,
                buffer_ms: word(6)?,
            },
            UC_PING_REQUEST => UserControl::PingRequest(word(2)?),
            UC_PING_RESPONSE => UserControl::PingResponse(word(2)?),
            other => UserControl::Other(other),
        })
    }
}

impl Packet for UserControl {
    fn message_type(&self) -> u8 {
        MSG_USER_CONTROL
    }

    fn prefer_csid(&self) -> u32 {
        CSID_PROTOCOL_CONTROL
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10);
        match *self {
            UserControl::StreamBegin(id) => {
                buf.put_u16(UC_STREAM_BEGIN);
                buf.put_u32(id);
            }
            UserControl::StreamEof(id) => {
                buf.put_u16(UC_STREAM_EOF);
                buf.put_u32(id);
            }
            UserControl::SetBufferLength {
                stream_id,
                buffer_ms,
            } => {
                buf.put_u16(UC_SET_BUFFER_LENGTH);
                buf.put_u32(stream_id);
                buf.put_u32(buffer_ms);
            }
            UserControl::PingRequest(ts) => {
                buf.put_u16(UC_PING_REQUEST);
                buf.put_u32(ts);
            }
            UserControl::PingResponse(ts) => {
                buf.put_u16(UC_PING_RESPONSE);
                buf.put_u32(ts);
            }
            UserControl::Other(event) => buf.put_u16(event),
        }
        buf.freeze()
    }
}

/// Protocol control message (message types 1-6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    UserControl(UserControl),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
}

impl ControlMessage {
    /// Decode a control message; `Ok(None)` for other message types
    pub fn decode(message: &RawMessage) -> Result<Option<Self>, ProtocolError> {
        let p = &message.payload[..];
        let word = |name: &'static str| -> Result<u32, ProtocolError> {
            p.get(0..4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or(ProtocolError::MalformedMessage(name))
        };

        let control = match message.message_type {
            MSG_SET_CHUNK_SIZE => {
                let size = word("set chunk size")? & 0x7FFF_FFFF;
                if size == 0 {
                    return Err(ProtocolError::InvalidChunkSize(size));
                }
                ControlMessage::SetChunkSize(size)
            }
            MSG_ABORT => ControlMessage::Abort(word("abort")?),
            MSG_ACKNOWLEDGEMENT => ControlMessage::Acknowledgement(word("acknowledgement")?),
            MSG_USER_CONTROL => ControlMessage::UserControl(UserControl::decode(p)?),
            MSG_WINDOW_ACK_SIZE => ControlMessage::WindowAckSize(word("window ack size")?),
            MSG_SET_PEER_BANDWIDTH => ControlMessage::SetPeerBandwidth {
                size: word("set peer bandwidth")?,
                limit_type: p.get(4).copied().unwrap_or(BANDWIDTH_LIMIT_DYNAMIC),
            },
            _ => return Ok(None),
        };
        Ok(Some(control))
    }
}

impl Packet for ControlMessage {
    fn message_type(&self) -> u8 {
        match self {
            ControlMessage::SetChunkSize(_) => MSG_SET_CHUNK_SIZE,
            ControlMessage::Abort(_) => MSG_ABORT,
            ControlMessage::Acknowledgement(_) => MSG_ACKNOWLEDGEMENT,
            ControlMessage::UserControl(_) => MSG_USER_CONTROL,
            ControlMessage::WindowAckSize(_) => MSG_WINDOW_ACK_SIZE,
            ControlMessage::SetPeerBandwidth { .. } => MSG_SET_PEER_BANDWIDTH,
        }
    }

    fn prefer_csid(&self) -> u32 {
        CSID_PROTOCOL_CONTROL
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        match *self {
            ControlMessage::SetChunkSize(v)
            | ControlMessage::Abort(v)
            | ControlMessage::Acknowledgement(v)
            | ControlMessage::WindowAckSize(v) => buf.put_u32(v),
            ControlMessage::UserControl(uc) => return uc.encode(),
            ControlMessage::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(size);
                buf.put_u8(limit_type);
            }
        }
        buf.freeze()
    }
}
