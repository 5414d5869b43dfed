//! Simple live RTMP server
//!
//! Run with: cargo run --example simple_server -- [OPTIONS] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_server                          # binds to 0.0.0.0:1935
//!   cargo run --example simple_server -- localhost             # binds to 127.0.0.1:1935
//!   cargo run --example simple_server -- 127.0.0.1:1936        # binds to 127.0.0.1:1936
//!   cargo run --example simple_server -- --hooks-vhost localhost
//!
//! ## Publishing (send stream)
//!
//! With OBS:
//!   Server: rtmp://localhost/live
//!   Stream Key: test
//!
//! With ffmpeg:
//!   ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test
//!
//! ## Playing (receive stream)
//!
//! With ffplay:
//!   ffplay rtmp://localhost/live/test
//!
//! Virtual hosts are picked from a `vhost` query parameter, else the host
//! of the URL: `rtmp://127.0.0.1/live/test?vhost=example.com`.

use std::net::SocketAddr;

use async_trait::async_trait;
use clap::Parser;

use rtmp_live::registry::OverflowPolicy;
use rtmp_live::server::{HookError, HttpHooksConfig};
use rtmp_live::session::Request;
use rtmp_live::{HookDispatcher, RegistryConfig, RtmpServer, ServerConfig, VhostConfig};

/// Live RTMP relay server
#[derive(Debug, Parser)]
#[command(name = "simple_server")]
struct Args {
    /// Address to bind to (IP:PORT, IP or localhost)
    #[arg(default_value = "0.0.0.0:1935", value_parser = parse_bind_addr)]
    bind_addr: SocketAddr,

    /// Outbound chunk size
    #[arg(long, default_value_t = 4096)]
    chunk_size: u32,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,

    /// Messages buffered per player
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// Disconnect players that fall behind instead of dropping old frames
    #[arg(long)]
    disconnect_slow_players: bool,

    /// Virtual host whose lifecycle hooks are logged
    #[arg(long)]
    hooks_vhost: Option<String>,
}

/// Logs every lifecycle hook and accepts it
struct LoggingHooks;

#[async_trait]
impl HookDispatcher for LoggingHooks {
    async fn on_publish(&self, url: &str, req: &Request) -> Result<(), HookError> {
        tracing::info!(url = url, stream = %req.stream_url(), ip = %req.ip, "on_publish");
        Ok(())
    }

    async fn on_unpublish(&self, url: &str, req: &Request) -> Result<(), HookError> {
        tracing::info!(url = url, stream = %req.stream_url(), "on_unpublish");
        Ok(())
    }

    async fn on_play(&self, url: &str, req: &Request) -> Result<(), HookError> {
        tracing::info!(url = url, stream = %req.stream_url(), ip = %req.ip, "on_play");
        Ok(())
    }

    async fn on_stop(&self, url: &str, req: &Request) -> Result<(), HookError> {
        tracing::info!(url = url, stream = %req.stream_url(), "on_stop");
        Ok(())
    }
}

/// Parse bind address from command line argument
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:1935
/// - "localhost:1936" -> 127.0.0.1:1936
/// - "127.0.0.1" -> 127.0.0.1:1935
/// - "0.0.0.0:1935" -> 0.0.0.0:1935
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 1935;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_live=debug".parse()?)
                .add_directive("simple_server=debug".parse()?),
        )
        .init();

    let mut config = ServerConfig::with_addr(args.bind_addr)
        .chunk_size(args.chunk_size)
        .max_connections(args.max_connections);

    if let Some(vhost) = &args.hooks_vhost {
        let hooks = HttpHooksConfig::enabled()
            .on_publish("log://on_publish")
            .on_unpublish("log://on_unpublish")
            .on_play("log://on_play")
            .on_stop("log://on_stop");
        config = config.with_vhost(vhost.clone(), VhostConfig::default().http_hooks(hooks));
    }

    let policy = if args.disconnect_slow_players {
        OverflowPolicy::Disconnect
    } else {
        OverflowPolicy::DropOldest
    };
    let registry_config = RegistryConfig::default()
        .consumer_capacity(args.queue_capacity)
        .overflow_policy(policy);

    println!("Starting RTMP server on {}", config.bind_addr);
    println!();
    println!("=== Publish a stream ===");
    println!("OBS:    Server: rtmp://localhost/live  Stream Key: test");
    println!("ffmpeg: ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test");
    println!();
    println!("=== Play a stream ===");
    println!("ffplay: ffplay rtmp://localhost/live/test");
    println!();

    let server = RtmpServer::with_registry_config(config, registry_config).with_hooks(LoggingHooks);

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    if let Err(e) = result {
        eprintln!("Server error: {}", e);
    }
    Ok(())
}
