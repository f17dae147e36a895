//! Scoria server daemon.
//!
//! Binds the reactor on a configurable address, registers the demo routes,
//! and runs until SIGINT/SIGTERM.
//!
//! ```bash
//! # Serve on the default port
//! scoria-node
//!
//! # Full address, bigger pool, debug logging
//! scoria-node --address 0.0.0.0:8080 --max-connections 256 --verbosity debug
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use mio::net::TcpStream;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scoria::{Headers, HttpMsg, Server, ServerConfig, response};

/// Scoria - minimal single-threaded HTTP/1.1 reactor.
#[derive(Parser)]
#[command(name = "scoria-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to (port only: 8000, or full: 127.0.0.1:8000).
    #[arg(short, long, default_value = "8000")]
    address: String,

    /// Connection pool capacity (overrides the config file).
    #[arg(short, long)]
    max_connections: Option<usize>,

    /// Log verbosity.
    #[arg(short, long, value_enum, default_value_t = Verbosity::Normal)]
    verbosity: Verbosity,

    /// Optional TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Verbosity {
    /// No output at all.
    None,
    /// Errors and warnings only.
    Minimal,
    /// Per-request logging.
    Normal,
    /// Everything, including per-connection lifecycle events.
    Debug,
}

impl Verbosity {
    fn filter(self) -> &'static str {
        match self {
            Self::None => "off",
            Self::Minimal => "warn",
            Self::Normal => "info",
            Self::Debug => "debug",
        }
    }
}

/// On-disk configuration, all optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ServerSection {
    max_connections: usize,
    backlog: i32,
    idle_timeout_secs: u64,
    max_age_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            max_connections: scoria::config::DEFAULT_MAX_CONNECTIONS,
            backlog: scoria::config::DEFAULT_BACKLOG,
            idle_timeout_secs: scoria::config::DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_age_secs: scoria::config::DEFAULT_MAX_AGE.as_secs(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.verbosity.filter())),
        )
        .init();

    let file = load_config(args.config.as_deref())?;
    let addr = parse_address(&args.address)?;

    let config = ServerConfig::new(addr)
        .with_max_connections(args.max_connections.unwrap_or(file.server.max_connections))
        .with_backlog(file.server.backlog)
        .with_idle_timeout(Duration::from_secs(file.server.idle_timeout_secs))
        .with_max_age(Duration::from_secs(file.server.max_age_secs));

    println!();
    println!("scoria - minimal HTTP/1.1 reactor");
    println!();
    println!("  Bind address:   {addr}");
    println!("  Pool capacity:  {}", config.max_connections);
    println!("  Idle timeout:   {}s", config.idle_timeout.as_secs());

    let mut server = new_server(config).context("Failed to create server")?;
    register_routes(&mut server);

    println!();
    println!("Server is ready. Press Ctrl+C to stop.");
    println!();

    server.run().context("Server error during operation")?;

    println!();
    println!("Server stopped gracefully.");
    Ok(())
}

#[cfg(unix)]
fn new_server(config: ServerConfig) -> scoria::ServerResult<Server> {
    Server::with_signal_handling(config)
}

#[cfg(not(unix))]
fn new_server(config: ServerConfig) -> scoria::ServerResult<Server> {
    Server::new(config)
}

/// Registers the demo endpoints.
fn register_routes(server: &mut Server) {
    server.bind_exact(
        "/",
        |stream: &mut TcpStream, _msg: HttpMsg, _headers: Headers| {
            let _ = response::send_with_content_type(
                stream,
                200,
                "OK",
                "text/plain",
                "scoria is running\n",
                &Headers::new(),
            );
        },
    );

    server.bind_exact(
        "/health",
        |stream: &mut TcpStream, _msg: HttpMsg, _headers: Headers| {
            let _ = response::send_with_content_type(
                stream,
                200,
                "OK",
                "application/json",
                "{\"status\":\"ok\"}",
                &Headers::new(),
            );
        },
    );

    server.bind_prefix(
        "/echo",
        |stream: &mut TcpStream, msg: HttpMsg, headers: Headers| {
            let mut body = format!("{} {}\n", msg.method, msg.uri);
            for line in headers.iter() {
                body.push_str(line);
                body.push('\n');
            }
            let _ = response::send_with_content_type(
                stream,
                200,
                "OK",
                "text/plain",
                &body,
                &Headers::new(),
            );
        },
    );
}

/// Loads the optional TOML configuration file.
fn load_config(path: Option<&std::path::Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!("loaded configuration from {}", path.display());
    Ok(config)
}

/// Parses an address string into a `SocketAddr`.
///
/// Accepts:
/// - Port only: "8000" -> "127.0.0.1:8000"
/// - Full address: "0.0.0.0:8080"
/// - IPv6: `[::1]:8080`
fn parse_address(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(port) = address.parse::<u16>() {
        return Ok(SocketAddr::from(([127, 0, 0, 1], port)));
    }

    bail!(
        "Invalid address '{address}'. Use a port (e.g., '8000') or full address (e.g., '127.0.0.1:8000')"
    );
}
