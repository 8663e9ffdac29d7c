//! Drain the login-event queue into anonymized `user_logins` rows.
use std::time::Duration;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use login_etl::config::Config;
use login_etl::metrics::{serve, setup_metrics_routes};
use login_etl::sink::LoginSink;
use login_etl::source::LoginQueue;
use login_etl::worker::LoginWorker;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "login etl service"
}

fn start_health_liveness_server(config: &Config, liveness: HealthRegistry) -> JoinHandle<()> {
    let bind = config.bind();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        );
    let router = setup_metrics_routes(router);

    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("starting login etl worker");

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness.register("worker".to_string(), Duration::from_secs(60));

    // Long-lived handles, built once and injected: the worker never
    // reconnects mid-flight.
    let queue = LoginQueue::new(config.queue_database_url(), config.max_pg_connections).await?;
    let sink = LoginSink::new(&config.database_url, config.max_pg_connections).await?;

    start_health_liveness_server(&config, liveness.clone());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, finishing current cycle");
        signal_token.cancel();
    });

    let worker = LoginWorker::new(
        queue,
        sink,
        config.max_batch_size,
        config.poll_interval.0,
        config.visibility_timeout(),
        worker_liveness,
    );
    worker.run(shutdown).await;

    Ok(())
}
