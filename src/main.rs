//! ENSIME Client
//!
//! Attaches to a running ENSIME server, performs the connection handshake and
//! optionally sends one request.
//!
//! ## Usage
//!
//! ```bash
//! # Check that a server on port 56123 answers the handshake
//! ensime-client --port 56123
//!
//! # Send one request and print every payload received
//! ensime-client --port 56123 --request '{"typehint": "ConnectionInfoReq"}'
//!
//! # Custom config file
//! ensime-client --config /path/to/config.toml --port 56123
//! ```
//!
//! Payloads are printed to stdout as one JSON object per line:
//! `{"callId": <id or null>, "payload": {...}}`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use ensime_client::{
    AttachedLauncher, ClientContext, Config, HandlerRegistry, SessionManager, SessionState,
};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ensime-client")]
#[command(about = "Session client for the ENSIME analysis server")]
struct Args {
    /// Path to config file (defaults to the user config dir when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host the server listens on
    #[arg(long, env = "ENSIME_HOST", default_value = "127.0.0.1")]
    host: String,

    /// HTTP/WebSocket port of the server
    #[arg(long, env = "ENSIME_PORT")]
    port: u16,

    /// JSON request to send once connected
    #[arg(long)]
    request: Option<String>,

    /// Seconds to wait for the response to --request
    #[arg(long)]
    timeout: Option<u64>,

    /// Connection attempts allowed for this session
    #[arg(long, env = "ENSIME_MAX_CONNECTION_ATTEMPTS")]
    max_connection_attempts: Option<u32>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries payloads
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("ensime_client={}", args.log_level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(args.config.as_ref())?;
    if let Some(attempts) = args.max_connection_attempts {
        config.max_connection_attempts = attempts;
    }
    if let Some(timeout) = args.timeout {
        config.response_timeout_secs = timeout;
    }
    config.validate()?;

    let request: Option<Value> = args
        .request
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--request is not valid JSON")?;

    info!(host = %args.host, port = args.port, "Starting ensime-client");

    let handler = HandlerRegistry::new().with_fallback(|call_id, payload| {
        println!("{}", json!({"callId": call_id, "payload": payload}));
    });
    let launcher = Arc::new(AttachedLauncher::new(args.host.clone(), args.port));
    let context = ClientContext::new(config.clone(), launcher).with_handler(Arc::new(handler));
    let session = SessionManager::new(context);

    let outcome = run(&session, &config, request.as_ref()).await;
    session.teardown().await;
    outcome
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let default_path = Config::default_path();
            if default_path.exists() {
                info!(path = %default_path.display(), "Using config file");
                Ok(Config::load(&default_path)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn run(session: &SessionManager, config: &Config, request: Option<&Value>) -> anyhow::Result<()> {
    if !session.setup().await {
        bail!("server could not be initialised");
    }

    let deadline = Instant::now()
        + config.connection_timeout()
        + config.handshake_timeout()
        + Duration::from_secs(1);
    wait_for_connection(session, deadline).await?;

    if let Some(request) = request {
        if !session.request(request, config.response_timeout()).await {
            bail!("no response to request within {:?}", config.response_timeout());
        }
    }
    Ok(())
}

async fn wait_for_connection(session: &SessionManager, deadline: Instant) -> anyhow::Result<()> {
    loop {
        if session.is_connected() {
            return Ok(());
        }
        match session.state() {
            SessionState::Unconnected | SessionState::Stopped => {
                bail!("could not connect to the server ({})", session.state())
            }
            _ => {}
        }
        if Instant::now() >= deadline {
            warn!("Gave up waiting for the connection");
            bail!("timed out waiting for the connection");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
