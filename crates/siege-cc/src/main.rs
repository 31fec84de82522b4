//! siege command center
//!
//! Opens the catalog under `DATA_DIR`, bootstraps the admin account, builds
//! the shard directory and serves the CC API. SCV fail counts and the
//! directory are refreshed in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siege_catalog::RocksCatalog;
use siege_cc::{create_router, CcConfig, CcState, CommandCenter, HttpScvClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,siege=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting siege command center");

    let config = CcConfig::from_env();
    config.validate()?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        max_fails = config.max_fails,
        "CC configuration loaded"
    );

    let catalog_dir = config.catalog_dir();
    tracing::info!(path = %catalog_dir.display(), "Opening catalog");
    let catalog = Arc::new(RocksCatalog::open(&catalog_dir)?);
    let scvs = Arc::new(HttpScvClient::new(
        &config.scv_scheme,
        config.scv_connect_timeout(),
    )?);

    let cc = Arc::new(CommandCenter::new(config.clone(), catalog, scvs));

    if cc.bootstrap_admin().await? {
        tracing::info!("Bootstrapped admin account");
    }

    let targets = cc.refresh_directory().await?;
    tracing::info!(targets, "Shard directory loaded");

    let monitors = Arc::clone(&cc);
    tokio::spawn(async move {
        monitors.run_monitors().await;
    });
    tracing::info!("Started directory refresh and SCV ping loops");

    let app = create_router(CcState::new(cc));

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            let addr: SocketAddr = config.listen_addr.parse()?;
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
            tracing::info!(listen_addr = %addr, "Starting HTTPS server");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
            let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
