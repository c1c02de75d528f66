//! MountProxy - Main entry point
//!
//! A host and path-prefix rewriting HTTP reverse proxy

use anyhow::Result;
use clap::Parser;
use mountproxy::{ProxyConfig, ProxyServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// MountProxy - expose one upstream origin under a public host and path prefix
#[derive(Parser, Debug)]
#[command(name = "mountproxy")]
#[command(author = "MountProxy Contributors")]
#[command(version = "1.0.0")]
#[command(about = "A host and path-prefix rewriting HTTP reverse proxy")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:7070")]
    listen: String,

    /// Host name clients use to reach the proxy
    #[arg(long, env = "PUBLIC_HOST")]
    public_host: String,

    /// Scheme clients use to reach the proxy
    #[arg(long, env = "PUBLIC_SCHEME", default_value = "https")]
    public_scheme: String,

    /// Path prefix under which the proxy is exposed (empty for root)
    #[arg(long, env = "PATH_PREFIX", default_value = "")]
    path_prefix: String,

    /// Upstream base URL (e.g. https://vritjobs.com/)
    #[arg(long, env = "UPSTREAM_URL")]
    upstream: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting MountProxy v1.0.0");

    // Malformed upstream URL is fatal: the process does not start
    let config = ProxyConfig::new(
        &args.public_host,
        &args.public_scheme,
        &args.path_prefix,
        &args.upstream,
        &args.listen,
    )?;

    info!("Public host: {} ({})", config.public_host, config.public_scheme);
    if config.path_prefix.is_empty() {
        info!("Path prefix: (root)");
    } else {
        info!("Path prefix: {}", config.path_prefix);
    }
    info!("Upstream: {}", config.upstream);
    info!("Listen: {}", config.listen_addr);

    let server = Arc::new(ProxyServer::new(config));
    server.run().await?;

    Ok(())
}
