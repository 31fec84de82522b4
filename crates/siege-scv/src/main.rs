//! siege SCV - stream shard server
//!
//! Opens the stream index and stream store under `DATA_DIR`, reconciles them,
//! registers with the command center and serves the SCV API. TLS is
//! terminated in-process when `TLS_CERT_PATH` and `TLS_KEY_PATH` are set.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siege_catalog::RemoteCatalog;
use siege_scv::{create_router, index, ScvConfig, ScvService, ScvState, StreamFiles};
use siege_store::RocksKv;

const REGISTER_RETRY: Duration = Duration::from_secs(5);

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

    tracing::info!("Starting siege SCV");

    let config = ScvConfig::from_env();
    config.validate()?;
    tracing::info!(
        scv = %config.name,
        listen_addr = %config.listen_addr,
        external_host = %config.external_host,
        data_dir = %config.data_dir.display(),
        cc_url = %config.cc_url,
        "SCV configuration loaded"
    );

    // Stream index and stream store
    let index_dir = config.index_dir();
    tracing::info!(path = %index_dir.display(), "Opening stream index");
    let index = index::open(RocksKv::open(&index_dir)?)?;
    let files = StreamFiles::open(config.streams_dir()).await?;

    let catalog = Arc::new(RemoteCatalog::new(&config.cc_url, &config.cluster_secret)?);
    let service = Arc::new(ScvService::new(config.clone(), index, files, catalog));

    service.recover().await?;

    // Registration is retried until the command center is reachable
    while let Err(e) = service.register().await {
        tracing::warn!(error = %e, "Registration failed, retrying");
        tokio::time::sleep(REGISTER_RETRY).await;
    }

    let sweepers = Arc::clone(&service);
    tokio::spawn(async move {
        sweepers.run_sweepers().await;
    });
    tracing::info!("Started heartbeat and scruffy sweepers");

    let app = create_router(ScvState::new(service));

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
