mod config;
mod prune;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use picit_api::AppStateInner;
use picit_crypto::{MessageCipher, MessageKey};
use picit_db::Database;
use picit_gateway::dispatcher::Dispatcher;
use picit_storage::Storage;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "picit=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            std::process::exit(1);
        }
    };

    // Init DB and storage
    let db = Arc::new(Database::open(&config.db_path)?);
    let storage = Storage::new(config.storage_dir.clone(), &config.public_url).await?;

    let db_fix = db.clone();
    let corrected = tokio::task::spawn_blocking(move || db_fix.reconcile_follow_counts()).await??;
    if corrected > 0 {
        warn!("Corrected follow counters for {} users", corrected);
    }

    let shutdown = CancellationToken::new();
    let prune_task = tokio::spawn(prune::run_prune_loop(
        db.clone(),
        config.session_prune_secs,
        shutdown.clone(),
    ));

    let state = Arc::new(AppStateInner {
        db,
        storage,
        cipher: MessageCipher::new(&MessageKey::derive(&config.message_key)),
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.clone(),
        session_days: config.session_days,
    });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let app = picit_api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("PicIt server listening on {}", addr);
    info!("Public object URLs under {}", config.public_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    if let Err(e) = prune_task.await {
        warn!("Prune task ended abnormally: {}", e);
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
