mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use vanish_api::auth::{IdentityProvider, Mailer};
use vanish_api::lifecycle::Lifecycle;
use vanish_api::{AppStateInner, reaper, router};
use vanish_db::Database;
use vanish_storage::{LocalBlobStore, UrlSigner};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vanish_server=debug,vanish_api=debug,vanish_db=info,vanish_storage=info,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Message store and object store
    let db = Arc::new(Database::open(&config.db_path)?);
    let signer = UrlSigner::new(
        config.service_key.as_bytes(),
        &format!("{}/blobs", config.site_url),
    )?;
    let blobs = Arc::new(LocalBlobStore::new(config.storage_dir.clone(), signer).await?);

    let lifecycle = Lifecycle::new(db, blobs, &config.site_url);
    let identity = IdentityProvider::new(
        &config.session_secret,
        &config.admin_email,
        &config.site_url,
        Mailer::from_webhook(config.mail_webhook_url.clone()),
    );

    if config.reap_interval_secs > 0 {
        info!("Reaping expired messages every {} seconds", config.reap_interval_secs);
        tokio::spawn(reaper::run_reaper_loop(lifecycle.clone(), config.reap_interval_secs));
    }
    if config.blob_sweep_secs > 0 {
        tokio::spawn(reaper::run_blob_sweep_loop(lifecycle.clone(), config.blob_sweep_secs));
    }
    if config.trust_proxy {
        info!("Trusting X-Forwarded-For for reader addresses");
    }

    let state = Arc::new(AppStateInner {
        lifecycle,
        identity,
        trust_proxy: config.trust_proxy,
    });

    // CORS: only the site itself talks to the API
    let origin: HeaderValue = config.site_url.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let app = router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("vanish listening on {} (public URL {})", addr, config.site_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
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
