//! Per-connection request identity
//!
//! A [`Request`] starts empty, picks up the `connect` parameters, and is
//! resolved once the client names its stream. From then on it identifies
//! the stream the connection publishes or plays.
//!
//! Virtual host resolution happens in one place, [`Request::resolve`],
//! with this precedence:
//!
//! 1. `vhost` query parameter on the stream name (`stream?vhost=a.com`)
//! 2. `vhost` query parameter on the tcUrl (`rtmp://ip/live?vhost=a.com`)
//! 3. tcUrl host
//!
//! The connect-time lookup ([`Request::provisional_vhost`]) only serves to
//! pick the chunk size before the stream name is known.

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::constants::RTMP_PORT;
use crate::protocol::packet::ConnectApp;
use crate::registry::StreamIdentity;

/// Query parameter naming the virtual host
const VHOST_PARAM: &str = "vhost";

/// Client intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnType {
    #[default]
    Unknown,
    Play,
    /// releaseStream/FCPublish/createStream/publish (FMLE, OBS, ffmpeg)
    FmlePublish,
    /// createStream/publish (Flash NetStream)
    FlashPublish,
    /// publish without createStream (Haivision encoders)
    HaivisionPublish,
}

impl ConnType {
    pub fn is_publish(&self) -> bool {
        matches!(
            self,
            ConnType::FmlePublish | ConnType::FlashPublish | ConnType::HaivisionPublish
        )
    }

    pub fn is_play(&self) -> bool {
        *self == ConnType::Play
    }
}

/// Components of a parsed tcUrl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcUrl {
    pub schema: String,
    pub host: String,
    pub port: u16,
    pub app: String,
    /// Stream name embedded in the path, if any
    pub stream: Option<String>,
    /// `vhost` query parameter
    pub vhost: Option<String>,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
}

impl TcUrl {
    /// Parse `rtmp://host[:port]/app[/stream][?query]`
    pub fn parse(tc_url: &str) -> Result<Self> {
        let url = Url::parse(tc_url)
            .map_err(|e| Error::UnresolvedTarget(format!("{tc_url}: {e}")))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::UnresolvedTarget(format!("{tc_url}: missing host")))?
            .to_string();

        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());
        let app = segments
            .next()
            .ok_or_else(|| Error::UnresolvedTarget(format!("{tc_url}: missing app")))?
            .to_string();
        let stream = segments.next().map(str::to_string);

        Ok(Self {
            schema: url.scheme().to_string(),
            host,
            port: url.port().unwrap_or(RTMP_PORT),
            app,
            stream,
            vhost: query_vhost(url.query()),
            query: url.query().map(str::to_string),
        })
    }
}

fn query_vhost(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == VHOST_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|v| !v.is_empty())
}

/// Resolved identity of one connection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    /// Client address
    pub ip: String,
    pub tc_url: String,
    pub page_url: Option<String>,
    pub swf_url: Option<String>,
    pub object_encoding: f64,

    pub schema: String,
    pub host: String,
    pub vhost: String,
    pub port: u16,
    pub app: String,
    pub stream: String,
    /// Query string of the stream name, else of the tcUrl (with `?`)
    pub param: String,

    pub conn_type: ConnType,
    /// Play duration in seconds, -1 for live
    pub duration: f64,
}

impl Request {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            duration: -1.0,
            ..Default::default()
        }
    }

    /// Take over the `connect` parameters
    ///
    /// A missing or unparsable tcUrl is fatal.
    pub fn apply_connect(&mut self, connect: &ConnectApp) -> Result<()> {
        let tc_url = connect
            .tc_url()
            .map_err(|e| Error::UnresolvedTarget(format!("tcUrl: {e}")))?;
        let parsed = TcUrl::parse(tc_url)?;

        self.tc_url = tc_url.to_string();
        self.page_url = connect.page_url().map(str::to_string);
        self.swf_url = connect.swf_url().map(str::to_string);
        self.object_encoding = connect.object_encoding();

        self.schema = parsed.schema;
        self.host = parsed.host;
        self.port = parsed.port;
        self.app = parsed.app;
        self.vhost = parsed.vhost.unwrap_or_else(|| self.host.clone());
        Ok(())
    }

    /// Virtual host known at connect time
    pub fn provisional_vhost(&self) -> &str {
        &self.vhost
    }

    /// Resolve the stream name reported during identification
    ///
    /// Splits the name at the first `?`; a `vhost` parameter there wins
    /// over the tcUrl.
    pub fn resolve(&mut self, stream_name: &str, conn_type: ConnType, duration: f64) -> Result<()> {
        let parsed = TcUrl::parse(&self.tc_url)?;

        let stream_name = stream_name.split('#').next().unwrap_or_default();
        let (stream, stream_query) = match stream_name.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (stream_name, None),
        };
        if stream.is_empty() {
            return Err(Error::EmptyStreamName);
        }

        self.schema = parsed.schema;
        self.host = parsed.host;
        self.port = parsed.port;
        self.app = parsed.app;
        self.stream = stream.to_string();
        self.vhost = query_vhost(stream_query)
            .or(parsed.vhost)
            .unwrap_or_else(|| self.host.clone());
        self.param = stream_query
            .or(parsed.query.as_deref())
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        self.conn_type = conn_type;
        self.duration = duration;
        Ok(())
    }

    /// Stream identity used as the registry key
    pub fn identity(&self) -> StreamIdentity {
        StreamIdentity::new(&self.vhost, &self.app, &self.stream)
    }

    /// Full stream URL, for logs and hooks
    pub fn stream_url(&self) -> String {
        format!("{}/{}/{}", self.vhost, self.app, self.stream)
    }
}
