//! HTTP API server for the saga coordinator.
//!
//! Provides REST endpoints to run sagas and inspect their event logs,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::{EventStore, InMemoryEventStore, PersistentStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{HttpTransport, SagaCoordinator, SagaError, SagaEvent, Transport};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::sagas::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, P, T>(state: Arc<AppState<S, P, T>>, metrics_handle: PrometheusHandle) -> Router
where
    S: EventStore<SagaEvent> + 'static,
    P: PersistentStore<SagaEvent> + 'static,
    T: Transport + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas", post(routes::sagas::create::<S, P, T>))
        .route("/sagas/{id}", get(routes::sagas::get::<S, P, T>))
        .route("/sagas/{id}/events", get(routes::sagas::events::<S, P, T>))
        .route("/events", get(routes::sagas::list_events::<S, P, T>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state: an in-memory event log backed by the given
/// persistent store, calling services over HTTP.
pub fn create_state<P>(
    config: &Config,
    persistent_store: P,
) -> Result<Arc<AppState<InMemoryEventStore<SagaEvent>, P, HttpTransport>>, SagaError>
where
    P: PersistentStore<SagaEvent> + 'static,
{
    let transport = HttpTransport::new(config.services.clone(), config.transport_timeout())?;
    let coordinator =
        SagaCoordinator::new(InMemoryEventStore::new(), persistent_store, transport)
            .with_retry_policy(config.retry_policy());

    Ok(Arc::new(AppState::new(coordinator)))
}
