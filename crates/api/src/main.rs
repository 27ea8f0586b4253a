//! API server entry point.

use api::config::Config;
use event_store::{InMemoryPersistentStore, PersistentStore, PostgresPersistentStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaEvent;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Recovers pending sagas, then serves HTTP until shutdown.
async fn serve<P>(config: &Config, persistent_store: P, metrics_handle: PrometheusHandle)
where
    P: PersistentStore<SagaEvent> + 'static,
{
    let state = api::create_state(config, persistent_store).expect("failed to build transport");

    // Finish interrupted sagas before accepting new ones
    let outcomes = state
        .coordinator
        .reanimate()
        .await
        .expect("failed to read pending sagas");
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    metrics::gauge!("saga_reanimated_on_boot").set(outcomes.len() as f64);
    tracing::info!(
        reanimated = outcomes.len(),
        failed,
        "recovery finished"
    );

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the durable store and run
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresPersistentStore::<SagaEvent>::new(pool);
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("saga events persisted to Postgres");
            serve(&config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, saga events will not survive a restart");
            let store = InMemoryPersistentStore::<SagaEvent>::new();
            serve(&config, store, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
