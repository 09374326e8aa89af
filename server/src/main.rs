//! Seatbook HTTP server.
//!
//! Serves the booking and floor-plan API, the live seat-map WebSocket and a
//! Prometheus scrape endpoint.

use axum::{Router, routing::get};
use seatbook::{
    AppState, Config, InMemoryChangeFeed, StaticTokenIdentity, build_router, open_store,
};
use seatbook_core::environment::{Clock, SystemClock};
use seatbook_runtime::metrics::MetricsServer;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatbook=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting seatbook server");

    let config = Config::from_env()?;
    info!(
        backend = ?config.storage.backend,
        slot_minutes = config.booking.slot_minutes,
        max_party_size = config.booking.max_party_size,
        "Configuration loaded"
    );

    if config.server.metrics_port != 0 {
        spawn_metrics_listener(&config).await?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&config.storage, Arc::clone(&clock)).await?;
    let feed = Arc::new(InMemoryChangeFeed::new(config.feed.capacity));

    let identity = StaticTokenIdentity::parse(&config.auth.tokens)?;
    if identity.is_empty() {
        warn!("no bearer tokens configured; every request is anonymous");
    }

    let state = AppState::new(&config, store, feed, Arc::new(identity), clock);
    let sweep = config.booking.sweep_interval().map(|period| {
        info!(period_secs = period.as_secs(), "reservation sweep enabled");
        Arc::clone(&state.sweeper).spawn(period)
    });
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stopping_tx.send_replace(true);
        })
        .into_future();
    let grace = Duration::from_secs(config.server.shutdown_timeout);

    tokio::select! {
        result = server => result?,
        () = async {
            if stopping_rx.wait_for(|stopping| *stopping).await.is_ok() {
                tokio::time::sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(timeout_secs = grace.as_secs(), "shutdown timeout elapsed; closing open connections");
        },
    }

    if let Some(sweep) = sweep {
        sweep.abort();
    }
    info!("Server stopped");
    Ok(())
}

/// Install the Prometheus recorder and serve `GET /metrics` on its own port.
async fn spawn_metrics_listener(config: &Config) -> anyhow::Result<()> {
    let addr: SocketAddr =
        format!("{}:{}", config.server.metrics_host, config.server.metrics_port).parse()?;
    let mut metrics = MetricsServer::new(addr);
    metrics.start()?;

    let handle = metrics.handle().cloned();
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move {
                match handle {
                    Some(handle) => handle.render(),
                    None => String::new(),
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            warn!(%error, "metrics listener stopped");
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
