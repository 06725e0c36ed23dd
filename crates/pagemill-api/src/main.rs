use clap::Parser;
use pagemill_api::{build_router, AppConfig, AppState, StorageHandles};
use pagemill_events::ConfigBus;
use pagemill_persistence::{DatabaseConfig, PgStorage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pagemill-api")]
#[command(about = "Pagemill spider-facing page generation edge")]
struct Args {
    #[arg(long, default_value = "0.0.0.0:8080", env = "PAGEMILL_BIND")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env();
    config.bind = args.bind;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        production = config.production,
        "Starting Pagemill API server"
    );

    let db_config = DatabaseConfig::from_env();
    let storage = Arc::new(PgStorage::connect(&db_config).await?);
    let storage = StorageHandles::from_pg(storage);

    let bus = match &config.redis_url {
        Some(url) => match ConfigBus::connect(url) {
            Ok(bus) => Some(Arc::new(bus)),
            Err(e) => {
                warn!(error = %e, "Config bus unavailable, hot reload disabled");
                None
            }
        },
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::build(config.clone(), storage, bus, shutdown_rx).await?;

    // Prime the file-cache aggregates off the startup path.
    {
        let html_cache = state.html_cache.clone();
        tokio::spawn(async move {
            if let Err(e) = html_cache.rescan().await {
                warn!(error = %e, "Initial HTML cache rescan failed");
            }
        });
    }

    let router = build_router(state);
    let addr: SocketAddr = config.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT/SIGTERM, flip the process-wide shutdown signal, then give
/// background tasks their grace period.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installs");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("signal handler installs")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, draining background tasks");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
}
