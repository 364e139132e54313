use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use caravanshare::engine::BookingEngine;
use caravanshare::seed::{self, SeedCatalog};
use caravanshare::store::DurableStore;
use caravanshare::wire;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let metrics_port: Option<u16> = std::env::var("CARAVANSHARE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    caravanshare::observability::init(metrics_port);

    let port = std::env::var("CARAVANSHARE_PORT").unwrap_or_else(|_| "5433".into());
    let bind = std::env::var("CARAVANSHARE_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("CARAVANSHARE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("CARAVANSHARE_PASSWORD").unwrap_or_else(|_| "caravanshare".into());
    let max_connections: usize = std::env::var("CARAVANSHARE_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);
    let compact_threshold: u64 = std::env::var("CARAVANSHARE_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let seed_file = std::env::var("CARAVANSHARE_SEED_FILE").ok();
    let no_seed = env_flag("CARAVANSHARE_NO_SEED");

    let tls_cert = std::env::var("CARAVANSHARE_TLS_CERT").ok();
    let tls_key = std::env::var("CARAVANSHARE_TLS_KEY").ok();
    let tls_acceptor =
        caravanshare::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;
    let journal = PathBuf::from(&data_dir).join("caravanshare.wal");
    let store = Arc::new(DurableStore::open(journal.clone())?);
    let engine = Arc::new(BookingEngine::with_store(store.clone()));

    if !no_seed {
        let catalog = match &seed_file {
            Some(path) => seed::load_catalog(Path::new(path))?,
            None => SeedCatalog::default(),
        };
        seed::seed_if_empty(&engine, &catalog).await?;
    }

    tokio::spawn(caravanshare::compactor::run_compactor(store.clone(), compact_threshold));

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("caravanshare listening on {addr}");
    info!("  journal: {}", journal.display());
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(caravanshare::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(caravanshare::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(caravanshare::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let pw = password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, engine, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(caravanshare::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("caravanshare stopped");
    Ok(())
}
