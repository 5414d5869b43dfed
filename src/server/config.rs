//! Server configuration
//!
//! Everything is configured in code through builder methods; the per-vhost
//! table answers the two lookups the session engine needs (chunk size and
//! webhook URLs).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;
use crate::server::hooks::HookEvent;

/// Webhook URLs of one virtual host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHooksConfig {
    /// Master switch; disabled hooks are never called
    pub enabled: bool,
    pub on_publish: Option<String>,
    pub on_unpublish: Option<String>,
    pub on_play: Option<String>,
    pub on_stop: Option<String>,
}

impl HttpHooksConfig {
    /// Enabled hooks with no URLs yet
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn on_publish(mut self, url: impl Into<String>) -> Self {
        self.on_publish = Some(url.into());
        self
    }

    pub fn on_unpublish(mut self, url: impl Into<String>) -> Self {
        self.on_unpublish = Some(url.into());
        self
    }

    pub fn on_play(mut self, url: impl Into<String>) -> Self {
        self.on_play = Some(url.into());
        self
    }

    pub fn on_stop(mut self, url: impl Into<String>) -> Self {
        self.on_stop = Some(url.into());
        self
    }

    /// URL to call for `event`, if hooks are enabled and one is set
    pub fn url(&self, event: HookEvent) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        match event {
            HookEvent::Publish => self.on_publish.as_deref(),
            HookEvent::Unpublish => self.on_unpublish.as_deref(),
            HookEvent::Play => self.on_play.as_deref(),
            HookEvent::Stop => self.on_stop.as_deref(),
        }
    }
}

/// Per-virtual-host overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VhostConfig {
    /// Outbound chunk size (server default when unset)
    pub chunk_size: Option<u32>,

    pub http_hooks: Option<HttpHooksConfig>,
}

impl VhostConfig {
    /// Set chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = Some(size.clamp(1, MAX_CHUNK_SIZE));
        self
    }

    /// Set webhooks
    pub fn http_hooks(mut self, hooks: HttpHooksConfig) -> Self {
        self.http_hooks = Some(hooks);
        self
    }
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Chunk size to negotiate with clients
    pub chunk_size: u32,

    /// Longest inbound message accepted from a client
    pub max_message_size: u32,

    /// Window acknowledgement size
    pub window_ack_size: u32,

    /// Peer bandwidth limit
    pub peer_bandwidth: u32,

    /// Peer bandwidth limit type (hard, soft, dynamic)
    pub peer_bandwidth_limit: u8,

    /// Handshake, connect and identification must complete within this time
    pub connection_timeout: Duration,

    /// Idle timeout (disconnect if no data received)
    pub idle_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Messages a player waits for before flushing a batch
    pub consumer_min_messages: usize,

    /// Longest a player waits for a batch
    pub consumer_wait_timeout: Duration,

    /// Virtual host table
    pub vhosts: HashMap<String, VhostConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], RTMP_PORT)),
            max_connections: 0, // Unlimited
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth: DEFAULT_PEER_BANDWIDTH,
            peer_bandwidth_limit: BANDWIDTH_LIMIT_DYNAMIC,
            connection_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            tcp_nodelay: true, // Important for low latency
            consumer_min_messages: 1,
            consumer_wait_timeout: Duration::from_millis(350),
            vhosts: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Set the inbound message size limit
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the player batching parameters
    pub fn consumer_wait(mut self, min_messages: usize, timeout: Duration) -> Self {
        self.consumer_min_messages = min_messages;
        self.consumer_wait_timeout = timeout;
        self
    }

    /// Add or replace a virtual host
    pub fn with_vhost(mut self, name: impl Into<String>, vhost: VhostConfig) -> Self {
        self.vhosts.insert(name.into(), vhost);
        self
    }

    /// Configuration of a virtual host
    pub fn vhost(&self, name: &str) -> Option<&VhostConfig> {
        self.vhosts.get(name)
    }

    /// Chunk size for a virtual host
    pub fn chunk_size_for(&self, vhost: &str) -> u32 {
        self.vhost(vhost)
            .and_then(|v| v.chunk_size)
            .unwrap_or(self.chunk_size)
    }

    /// Webhook URL for `event` on a virtual host
    pub fn hook_url(&self, vhost: &str, event: HookEvent) -> Option<&str> {
        self.vhost(vhost)?.http_hooks.as_ref()?.url(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 1935);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.chunk_size, RECOMMENDED_CHUNK_SIZE);
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
        assert_eq!(config.window_ack_size, DEFAULT_WINDOW_ACK_SIZE);
        assert_eq!(config.peer_bandwidth, DEFAULT_PEER_BANDWIDTH);
        assert_eq!(config.peer_bandwidth_limit, BANDWIDTH_LIMIT_DYNAMIC);
        assert!(config.tcp_nodelay);
        assert!(config.vhosts.is_empty());
    }

    #[test]
    fn test_builder_chunk_size_capped() {
        let config = ServerConfig::default().chunk_size(u32::MAX);
        assert_eq!(config.chunk_size, MAX_CHUNK_SIZE);

        let config = ServerConfig::default().chunk_size(0);
        assert_eq!(config.chunk_size, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 1936));
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .chunk_size(8192)
            .max_message_size(1024 * 1024)
            .connection_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(30))
            .consumer_wait(10, Duration::from_millis(100));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.consumer_min_messages, 10);
        assert_eq!(config.consumer_wait_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_chunk_size_lookup() {
        let config = ServerConfig::default()
            .chunk_size(4096)
            .with_vhost("big.com", VhostConfig::default().chunk_size(60000))
            .with_vhost("plain.com", VhostConfig::default());

        assert_eq!(config.chunk_size_for("big.com"), 60000);
        assert_eq!(config.chunk_size_for("plain.com"), 4096);
        assert_eq!(config.chunk_size_for("unknown.com"), 4096);
    }

    #[test]
    fn test_hook_lookup() {
        let hooks = HttpHooksConfig::enabled()
            .on_publish("http://hooks/publish")
            .on_stop("http://hooks/stop");
        let config = ServerConfig::default()
            .with_vhost("a.com", VhostConfig::default().http_hooks(hooks.clone()))
            .with_vhost(
                "b.com",
                VhostConfig::default().http_hooks(HttpHooksConfig {
                    enabled: false,
                    ..hooks
                }),
            );

        assert_eq!(
            config.hook_url("a.com", HookEvent::Publish),
            Some("http://hooks/publish")
        );
        assert_eq!(config.hook_url("a.com", HookEvent::Play), None);
        assert_eq!(config.hook_url("b.com", HookEvent::Publish), None);
        assert_eq!(config.hook_url("c.com", HookEvent::Publish), None);
    }
}
