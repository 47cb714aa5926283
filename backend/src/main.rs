//! Accounts service entry-point: applies migrations, wires the Diesel and
//! Redis adapters, serves gRPC and runs the saga workers.

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use accounts::outbound::messaging::{
    RedisStreamsFeedbackSource, RedisStreamsPublisher, connect,
};
use accounts::outbound::persistence::{
    DbPool, DieselIdempotencyStore, DieselOutboxStore, DieselUserRepository, run_migrations,
};
use accounts::server::{AccountsSettings, RuntimePorts, build_runtime_components, spawn_workers};

/// Application bootstrap.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = AccountsSettings::load_from_iter(std::env::args_os())
        .wrap_err("failed to load accounts settings")?;

    let database_url = settings.database_url()?.to_owned();
    tokio::task::spawn_blocking(move || run_migrations(&database_url))
        .await
        .wrap_err("migration task panicked")??;

    let db_pool = DbPool::new(settings.pool_config()?).await?;
    let redis_pool = connect(settings.redis_url())
        .await
        .wrap_err("failed to connect to redis")?;

    let ports = RuntimePorts {
        users: Arc::new(DieselUserRepository::new(db_pool.clone())),
        outbox: Arc::new(DieselOutboxStore::new(db_pool.clone())),
        idempotency: Arc::new(DieselIdempotencyStore::new(db_pool)),
        publisher: Arc::new(RedisStreamsPublisher::new(redis_pool.clone())),
        feedback: Arc::new(RedisStreamsFeedbackSource::new(
            redis_pool,
            settings.stream_consumer_config(),
        )),
        clock: Arc::new(DefaultClock),
    };
    let components = build_runtime_components(&settings, ports);

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(components.dispatcher, components.consumer, shutdown.clone());

    let addr = settings.grpc_addr();
    info!(%addr, workers = workers.len(), "accounts service listening");
    let served = Server::builder()
        .timeout(settings.request_timeout())
        .add_service(components.grpc.into_server())
        .serve_with_shutdown(addr, wait_for_signal(shutdown.clone()))
        .await;

    // Stop the workers whether the server exited cleanly or not.
    shutdown.cancel();
    workers.shutdown().await;
    served.wrap_err("gRPC server failed")?;
    info!("accounts service stopped");
    Ok(())
}

/// Resolve on Ctrl-C, SIGTERM or external cancellation, then cancel `token`.
async fn wait_for_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("ctrl-c received; shutting down"),
        () = terminate => info!("SIGTERM received; shutting down"),
        () = token.cancelled() => {}
    }
    token.cancel();
}
