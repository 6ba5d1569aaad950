//! SubjectHub - realtime WebSocket session hub
//!
//! Accepts WebSocket clients over TCP and relays bus events to the sessions
//! subscribed to them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, warn};

use subjecthub::{Config, Hub, Metadata, Station, transport};

#[cfg(feature = "memory")]
use subjecthub::MemoryPubSub;

#[cfg(all(not(feature = "memory"), feature = "postgres"))]
use subjecthub::PostgresPubSub;

/// Response header carrying the session id assigned during the upgrade
const SESSION_ID_HEADER: &str = "x-session-id";

/// How long shutdown waits for sessions to finish teardown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "subjecthub")]
#[command(about = "Realtime WebSocket session hub with subject-pattern fan-out")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[cfg(feature = "memory")]
async fn start_station(config: &Config, hub: Arc<Hub>) -> anyhow::Result<Option<Station>> {
    if config.station_topics.is_empty() {
        info!("No station topics configured - station disabled");
        return Ok(None);
    }

    let pubsub = Arc::new(MemoryPubSub::new());
    info!("Memory pub/sub initialized (single-node only)");
    Station::start(pubsub, hub, &config.station_topics)
        .await
        .map(Some)
}

#[cfg(all(not(feature = "memory"), feature = "postgres"))]
async fn start_station(config: &Config, hub: Arc<Hub>) -> anyhow::Result<Option<Station>> {
    if config.station_topics.is_empty() {
        info!("No station topics configured - station disabled");
        return Ok(None);
    }

    let Some(ref db_url) = config.database_url else {
        warn!("No HUB_DATABASE_URL set - station disabled");
        return Ok(None);
    };

    let pubsub = Arc::new(PostgresPubSub::new(db_url).await?);
    info!("PostgreSQL pub/sub connected");
    Station::start(pubsub, hub, &config.station_topics)
        .await
        .map(Some)
}

/// Upgrade one TCP connection and hand it to the hub
async fn accept_connection(hub: Arc<Hub>, stream: TcpStream, remote: SocketAddr) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;

    let id = hub.register();
    let mut header = Metadata::new();

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        for (name, value) in request.headers() {
            if let Ok(value) = value.to_str() {
                header.insert(name.as_str().to_string(), value.to_string());
            }
        }
        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            hub.registry().remove(&id);
            return Err(e).with_context(|| format!("websocket upgrade from {} failed", remote));
        }
    };

    debug!(session_id = %id, remote = %remote, "connection upgraded");
    let (source, sink) = transport::split(ws);
    hub.spawn_session(id, header, source, sink);

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(&args.log_level)
        .init();

    info!("SubjectHub v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        addr = %config.listen_addr,
        heartbeat_secs = config.session.heartbeat.as_secs(),
        topics = ?config.station_topics,
        "Starting SubjectHub"
    );

    let hub = Arc::new(Hub::new(config.session.clone()));
    let station = start_station(&config, hub.clone()).await?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for WebSocket connections");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let hub = hub.clone();
                    tokio::spawn(async move {
                        if let Err(e) = accept_connection(hub, stream, remote).await {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    });
                }
                Err(e) => error!(error = %e, "Accept error"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    if let Some(station) = station {
        station.shutdown();
    }

    hub.close_all();
    let drain = async {
        while hub.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(remaining = hub.session_count(), "Sessions still open at shutdown");
    }

    info!("SubjectHub stopped");
    Ok(())
}
