//! Saga execution and inspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use event_store::{EventEnvelope, EventStore, PersistentStore};
use saga::{SagaCoordinator, SagaEvent, Transport};
use serde::Serialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, P, T> {
    pub coordinator: SagaCoordinator<S, P, T>,
}

impl<S, P, T> AppState<S, P, T> {
    pub fn new(coordinator: SagaCoordinator<S, P, T>) -> Self {
        Self { coordinator }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaRunResponse {
    pub saga_id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub state: String,
    pub last_event_id: i64,
    pub completed_requests: Vec<String>,
    pub compensated_requests: Vec<String>,
}

/// Response type for event envelope data.
#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: i64,
    pub saga_id: String,
    pub event_type: String,
    pub request_id: String,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

impl TryFrom<EventEnvelope<SagaEvent>> for EventEnvelopeResponse {
    type Error = ApiError;

    fn try_from(envelope: EventEnvelope<SagaEvent>) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: envelope.id.as_i64(),
            saga_id: envelope.saga_id.to_string(),
            event_type: envelope.event_type().to_string(),
            request_id: envelope.event.request().id().to_string(),
            timestamp: envelope.timestamp.to_rfc3339(),
            payload: serde_json::to_value(&envelope.event)
                .map_err(|e| ApiError::Internal(e.to_string()))?,
        })
    }
}

// -- Handlers --

/// POST /sagas — run the saga described by the request body.
#[tracing::instrument(skip(state, definition), fields(definition_len = definition.len()))]
pub async fn create<S, P, T>(
    State(state): State<Arc<AppState<S, P, T>>>,
    definition: String,
) -> Result<Json<SagaRunResponse>, ApiError>
where
    S: EventStore<SagaEvent> + 'static,
    P: PersistentStore<SagaEvent> + 'static,
    T: Transport + 'static,
{
    let saga_id = state.coordinator.run(&definition).await?;

    Ok(Json(SagaRunResponse {
        saga_id: saga_id.to_string(),
        status: "completed",
    }))
}

/// GET /sagas/{id} — fold a saga's events into its current status.
#[tracing::instrument(skip(state))]
pub async fn get<S, P, T>(
    State(state): State<Arc<AppState<S, P, T>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError>
where
    S: EventStore<SagaEvent> + 'static,
    P: PersistentStore<SagaEvent> + 'static,
    T: Transport + 'static,
{
    let saga_id = parse_saga_id(&id)?;

    let saga = state
        .coordinator
        .get_saga(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;

    Ok(Json(SagaStatusResponse {
        saga_id: saga_id.to_string(),
        state: saga.state().to_string(),
        last_event_id: saga.last_event_id().as_i64(),
        completed_requests: saga.completed_requests().map(String::from).collect(),
        compensated_requests: saga.compensated_requests().map(String::from).collect(),
    }))
}

/// GET /sagas/{id}/events — list one saga's events in order.
#[tracing::instrument(skip(state))]
pub async fn events<S, P, T>(
    State(state): State<Arc<AppState<S, P, T>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError>
where
    S: EventStore<SagaEvent> + 'static,
    P: PersistentStore<SagaEvent> + 'static,
    T: Transport + 'static,
{
    let saga_id = parse_saga_id(&id)?;

    let envelopes = state
        .coordinator
        .event_store()
        .events_for_saga(saga_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if envelopes.is_empty() {
        return Err(ApiError::NotFound(format!("Saga {id} not found")));
    }

    let responses = envelopes
        .into_iter()
        .map(EventEnvelopeResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(responses))
}

/// GET /events — list every recorded event in insertion order.
#[tracing::instrument(skip(state))]
pub async fn list_events<S, P, T>(
    State(state): State<Arc<AppState<S, P, T>>>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError>
where
    S: EventStore<SagaEvent> + 'static,
    P: PersistentStore<SagaEvent> + 'static,
    T: Transport + 'static,
{
    let envelopes = state
        .coordinator
        .event_store()
        .events()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let responses = envelopes
        .into_iter()
        .map(EventEnvelopeResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(responses))
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
