//! Relay Chat: real-time multi-channel chat relay.
//!
//! A single-process server that relays JSON chat commands between WebSocket
//! clients. Connections join named channels, exchange messages, and can
//! silently restore their session after a reconnect.
//!
//! Usage:
//!   relay-chat                                   # Default port 6060
//!   relay-chat --port 8080                       # Custom port
//!   relay-chat --admin-trip AbCdEf --trip-salt s # Grant admin to a trip
//!   relay-chat --moderator XyZ123 --moderator Q1w2E3

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use relay_server::{RelayServer, Roster, ServerConfig};
use relay_transport::{TransportConfig, TransportServer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Parser, Debug)]
#[command(name = "relay-chat", about = "Relay Chat — real-time chat relay server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "6060")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Heartbeat ping interval in ms (0 disables)
    #[arg(long, default_value = "30000")]
    heartbeat_ms: u64,

    /// Trip granted admin level
    #[arg(long)]
    admin_trip: Option<String>,

    /// Trip granted moderator level (repeatable)
    #[arg(long = "moderator")]
    moderator: Vec<String>,

    /// Salt for trip derivation (random per boot if not provided)
    #[arg(long)]
    trip_salt: Option<String>,

    /// HMAC secret for session tokens (random per boot if not provided)
    #[arg(long)]
    session_secret: Option<String>,

    /// Session token lifetime in days
    #[arg(long, default_value = "7")]
    session_ttl_days: u64,

    /// Rate-limit score halflife in ms
    #[arg(long, default_value = "30000")]
    rate_halflife_ms: u64,

    /// Rate-limit score at or above which an origin is throttled
    #[arg(long, default_value = "25")]
    rate_threshold: f64,

    /// Trust the first X-Forwarded-For hop as the client address
    #[arg(long)]
    trust_proxy: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (writer, ansi) = match &cli.log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
            {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("Failed to open log file {}: {e}", log_path.display());
                    std::process::exit(1);
                }
            };
            eprintln!("Logging to {}", log_path.display());
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi && !cli.log_json);

    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let trip_salt = cli.trip_salt.clone().unwrap_or_else(|| {
        warn!("No --trip-salt given; trips will change on every restart");
        hex::encode(rand::rng().random::<[u8; 16]>())
    });
    if cli.session_secret.is_none() {
        info!("No --session-secret given; session tokens expire on restart");
    }

    let roster = Roster::new(cli.admin_trip.clone(), cli.moderator.clone());
    let config = ServerConfig {
        rate_halflife_ms: cli.rate_halflife_ms,
        rate_threshold: cli.rate_threshold,
        session_ttl: Duration::from_secs(cli.session_ttl_days.saturating_mul(24 * 60 * 60)),
        session_secret: cli.session_secret.clone().map(String::into_bytes),
        trip_salt,
        ..ServerConfig::default()
    };

    let server = Arc::new(RelayServer::new(config, Arc::new(roster), relay_commands::all));
    if let Err(e) = server.reload() {
        error!("Failed to load commands: {e}");
        std::process::exit(1);
    }

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        max_connections: Some(cli.max_connections),
        heartbeat_interval_ms: cli.heartbeat_ms,
        trust_proxy: cli.trust_proxy,
        verbose_logging: cli.verbose,
    };

    let mut transport = match TransportServer::start(transport_config, server.clone()).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    let ws_url = format!("ws://{}:{}/ws", cli.hostname, transport.port());

    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Relay running!");
    println!();
    println!("  WebSocket endpoint:");
    println!("    {ws_url}");
    println!();
    println!("  Commands loaded: {}", server.commands().len());
    println!();
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    println!();
    println!("  Shutting down...");
    transport.stop().await;
    println!("  Relay stopped.");
}
