mod config;
mod dj;
mod error;
mod routes;
mod state;
mod youtube;
mod utils {
    pub mod clean;
    pub mod ids;
    pub mod realip;
}

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{Config, EVENT_CHANNEL_DEPTH},
    state::{EventHub, LobbyManager, Metadata},
    youtube::FallbackSource,
};

const BODY_LIMIT: usize = 16 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cancel = CancellationToken::new();
    let hub = EventHub::new(EVENT_CHANNEL_DEPTH);
    let manager = LobbyManager::start(cfg.manager.clone(), Arc::new(hub.clone()), cancel.clone());

    let client = youtube::http_client().context("building http client")?;
    let sources = FallbackSource::from_config(client, cfg.use_scrape, cfg.yt_api_key.clone());
    if sources.names().is_empty() {
        tracing::warn!("USE_SCRAPE disabled and YT_API_KEY not set, video submissions will fail");
    } else {
        tracing::info!(sources = ?sources.names(), "metadata lookup order");
    }
    let metadata: Metadata = Arc::new(sources);

    let app = routes::app(manager, hub.clone(), metadata)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(addr = %cfg.listen_addr, max_lobbies = cfg.manager.max_lobbies, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown(cancel.clone(), hub))
        .await?;

    cancel.cancel();
    tracing::info!("server stopped");
    Ok(())
}

/* ── wait for ctrl-c / SIGTERM, then stop lobby loops and close event streams ── */
async fn shutdown(cancel: CancellationToken, hub: EventHub) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutting down");
    cancel.cancel();
    hub.close_all();
}
