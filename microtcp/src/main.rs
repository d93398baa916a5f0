//! Entry point for `microtcp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! The server accepts one connection and copies everything it receives to
//! stdout (or a file); the client sends a message or a file and closes.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing, file I/O).

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use microtcp::{Config, Connection};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as a server, accepting one incoming connection.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Write received bytes here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run as a client, connecting to a remote server.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Local address to bind.
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Text to send.
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        message: Option<String>,
        /// File whose contents to send.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Args)]
struct Tuning {
    /// Receive buffer size in bytes (the largest window advertised).
    #[arg(long, global = true)]
    window: Option<usize>,
    /// Retransmission timeout in milliseconds.
    #[arg(long, global = true)]
    ack_timeout_ms: Option<u64>,
}

impl Tuning {
    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(window) = self.window {
            config.recv_buffer_len = window;
        }
        if let Some(ms) = self.ack_timeout_ms {
            config.ack_timeout = Duration::from_millis(ms);
            config.time_wait = config.ack_timeout * 2;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.config();

    match cli.mode {
        Mode::Server { bind, output } => run_server(bind, output, config).await,
        Mode::Client {
            server,
            bind,
            message,
            file,
        } => {
            let data = match (message, file) {
                (Some(text), _) => text.into_bytes(),
                (None, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => anyhow::bail!("nothing to send"),
            };
            run_client(bind, server, &data, config).await
        }
    }
}

async fn run_server(bind: SocketAddr, output: Option<PathBuf>, config: Config) -> Result<()> {
    log::info!(
        "Starting server on {bind} (window {} B)",
        config.initial_window()
    );
    let mut conn = Connection::bind(bind, config)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let peer = conn.accept().await.context("accepting connection")?;
    log::info!("Connection from {peer}");

    let mut sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    let mut buf = vec![0u8; 4096];
    let mut total = 0usize;
    loop {
        let n = conn.recv(&mut buf).await.context("receiving")?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])?;
        total += n;
    }
    sink.flush()?;

    conn.shutdown().await.context("closing connection")?;
    log::info!("Received {total} bytes from {peer}; {}", conn.stats());
    Ok(())
}

async fn run_client(bind: SocketAddr, server: SocketAddr, data: &[u8], config: Config) -> Result<()> {
    log::info!("Starting client, connecting to {server}");
    let mut conn = Connection::bind(bind, config)
        .await
        .with_context(|| format!("binding {bind}"))?;
    conn.connect(server)
        .await
        .with_context(|| format!("connecting to {server}"))?;

    let sent = conn.send(data).await.context("sending")?;
    conn.shutdown().await.context("closing connection")?;
    log::info!("Sent {sent} bytes to {server}; {}", conn.stats());
    Ok(())
}
