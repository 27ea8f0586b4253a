//! Saga coordinator: forward execution, compensation and recovery.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use common::SagaId;
use event_store::{EventEnvelope, EventId, EventStore, EventStoreExt, PersistentStore};
use futures_util::future::join_all;

use crate::aggregate::{Resume, SagaInstance};
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::interpreter::{JsonRequestInterpreter, RequestInterpreter};
use crate::recorder::EventRecorder;
use crate::request::SagaRequest;
use crate::task::{RetryPolicy, SagaTask, TaskContext};
use crate::transport::Transport;

/// Result of reanimating one pending saga.
#[derive(Debug)]
pub struct ReanimateOutcome {
    pub saga_id: SagaId,
    pub result: Result<()>,
}

/// Orchestrates saga execution.
///
/// Requests run strictly in order. When a transaction fails, every completed
/// transaction is compensated, last completed first, and the saga is closed
/// with SagaAborted. Every event is recorded durably before the remote call
/// it announces, so [`reanimate`](Self::reanimate) can resume any saga that
/// was interrupted.
pub struct SagaCoordinator<S, P, T, I = JsonRequestInterpreter> {
    recorder: EventRecorder<S, P>,
    transport: T,
    interpreter: I,
    retry: RetryPolicy,
    in_flight: Mutex<HashSet<SagaId>>,
}

impl<S, P, T> SagaCoordinator<S, P, T>
where
    S: EventStore<SagaEvent>,
    P: PersistentStore<SagaEvent>,
    T: Transport,
{
    /// Creates a coordinator that reads JSON saga definitions.
    pub fn new(event_store: S, persistent_store: P, transport: T) -> Self {
        Self {
            recorder: EventRecorder::new(event_store, persistent_store),
            transport,
            interpreter: JsonRequestInterpreter,
            retry: RetryPolicy::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }
}

impl<S, P, T, I> SagaCoordinator<S, P, T, I>
where
    S: EventStore<SagaEvent>,
    P: PersistentStore<SagaEvent>,
    T: Transport,
    I: RequestInterpreter,
{
    /// Replaces the definition interpreter.
    pub fn with_interpreter<I2: RequestInterpreter>(
        self,
        interpreter: I2,
    ) -> SagaCoordinator<S, P, T, I2> {
        SagaCoordinator {
            recorder: self.recorder,
            transport: self.transport,
            interpreter,
            retry: self.retry,
            in_flight: self.in_flight,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn event_store(&self) -> &S {
        self.recorder.event_store()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Executes a saga under a fresh id.
    ///
    /// Returns the saga id once every transaction completed. A saga that was
    /// rolled back yields [`SagaError::Aborted`].
    pub async fn run(&self, definition: &str) -> Result<SagaId> {
        self.run_with_id(SagaId::new(), definition).await
    }

    /// Executes a saga under a caller-chosen id.
    #[tracing::instrument(skip(self, definition))]
    pub async fn run_with_id(&self, saga_id: SagaId, definition: &str) -> Result<SagaId> {
        metrics::counter!("saga_executions_total").increment(1);

        let requests = self.interpreter.interpret(definition)?;
        let _guard = self.admit(saga_id)?;
        if self.event_store().last_event_id(saga_id).await?.is_some() {
            return Err(SagaError::DuplicateSaga(saga_id));
        }

        let started = Instant::now();
        let context = self.context(saga_id, definition);
        let resume = Resume::Forward {
            next: 0,
            started: false,
            completed: Vec::new(),
        };
        let result = self.drive(&context, &requests, resume).await;
        record_outcome(saga_id, started, &result);

        result.map(|()| saga_id)
    }

    /// Resumes every saga whose durable log lacks a terminal event.
    ///
    /// Recovered events are replayed into the event store without remote
    /// calls; execution then continues forward, or finishes compensation if
    /// the saga was aborting. Distinct sagas are resumed concurrently.
    #[tracing::instrument(skip(self))]
    pub async fn reanimate(&self) -> Result<Vec<ReanimateOutcome>> {
        let pending = self
            .recorder
            .persistent_store()
            .find_pending_saga_events()
            .await?;
        tracing::info!(count = pending.len(), "reanimating pending sagas");

        let mut outcomes = join_all(pending.into_iter().map(|(saga_id, envelopes)| async move {
            let result = self.reanimate_saga(saga_id, envelopes).await;
            if let Err(e) = &result {
                tracing::warn!(%saga_id, error = %e, "reanimated saga did not complete");
            }
            ReanimateOutcome { saga_id, result }
        }))
        .await;

        outcomes.sort_by_key(|outcome| outcome.saga_id);
        Ok(outcomes)
    }

    #[tracing::instrument(skip(self, envelopes), fields(events = envelopes.len()))]
    async fn reanimate_saga(
        &self,
        saga_id: SagaId,
        mut envelopes: Vec<EventEnvelope<SagaEvent>>,
    ) -> Result<()> {
        let _guard = self.admit(saga_id)?;

        envelopes.sort_by_key(|envelope| envelope.id);
        let saga = SagaInstance::from_envelopes(saga_id, &envelopes)?;
        let definition = saga
            .definition()
            .ok_or_else(|| SagaError::corrupt_log(saga_id, "log is empty"))?;
        let requests = self
            .interpreter
            .interpret(definition)
            .map_err(|e| SagaError::corrupt_log(saga_id, format!("recorded definition: {e}")))?;
        let resume = saga.resume_point(&requests)?;

        // Only replay what the event store has not seen yet.
        let known = self
            .event_store()
            .last_event_id(saga_id)
            .await?
            .unwrap_or_else(EventId::initial);
        if known > saga.last_event_id() {
            return Err(SagaError::corrupt_log(
                saga_id,
                format!(
                    "event store holds event {known} beyond durable event {}",
                    saga.last_event_id()
                ),
            ));
        }
        for envelope in envelopes.into_iter().filter(|envelope| envelope.id > known) {
            self.recorder.replay(envelope).await?;
        }

        metrics::counter!("saga_reanimated_total").increment(1);
        tracing::info!(%saga_id, state = %saga.state(), ?resume, "saga reanimated");

        let started = Instant::now();
        let context = self.context(saga_id, definition);
        let result = self.drive(&context, &requests, resume).await;
        record_outcome(saga_id, started, &result);

        result
    }

    /// Loads a saga from the event store.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let envelopes = self.event_store().events_for_saga(saga_id).await?;

        if envelopes.is_empty() {
            return Ok(None);
        }
        SagaInstance::from_envelopes(saga_id, &envelopes).map(Some)
    }

    fn context<'a>(&'a self, saga_id: SagaId, definition: &'a str) -> TaskContext<'a, S, P, T> {
        TaskContext {
            saga_id,
            definition,
            recorder: &self.recorder,
            transport: &self.transport,
            retry: self.retry,
        }
    }

    async fn drive(
        &self,
        context: &TaskContext<'_, S, P, T>,
        requests: &[SagaRequest],
        resume: Resume,
    ) -> Result<()> {
        let (next, started, mut completed) = match resume {
            Resume::Done => return Ok(()),
            Resume::Compensate { pending, failed } => {
                let failed_request = failed.map(|index| requests[index].id().to_string());
                return self
                    .compensate(context, requests, pending, failed_request)
                    .await;
            }
            Resume::Forward {
                next,
                started,
                completed,
            } => (next, started, completed),
        };

        for (index, request) in requests.iter().enumerate().skip(next) {
            let task = SagaTask::new(request, context);
            if !request.is_sentinel() {
                tracing::info!(saga_id = %context.saga_id, %request, "saga step started");
            }

            let outcome = if index == next && started {
                task.resume_transaction().await
            } else {
                task.run_transaction().await
            };

            match outcome {
                Ok(()) => completed.push(index),
                Err(SagaError::TransportFailure { reason, .. }) => {
                    tracing::warn!(
                        saga_id = %context.saga_id,
                        %request,
                        %reason,
                        "transaction failed, compensating"
                    );
                    let pending = completed.into_iter().rev().collect();
                    return self
                        .compensate(context, requests, pending, Some(request.id().to_string()))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Runs the compensations of `pending` in order, then reports the abort.
    ///
    /// A failed compensation is logged and collected; the cascade carries on
    /// with the remaining requests.
    async fn compensate(
        &self,
        context: &TaskContext<'_, S, P, T>,
        requests: &[SagaRequest],
        pending: Vec<usize>,
        failed_request: Option<String>,
    ) -> Result<()> {
        let mut compensation_failures = Vec::new();

        for index in pending {
            let request = &requests[index];
            match SagaTask::new(request, context).run_compensation().await {
                Ok(()) => {}
                Err(SagaError::TransportFailure { reason, .. }) => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::warn!(
                        saga_id = %context.saga_id,
                        %request,
                        %reason,
                        "compensation failed"
                    );
                    compensation_failures.push(request.id().to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Err(SagaError::Aborted {
            saga_id: context.saga_id,
            failed_request,
            compensation_failures,
        })
    }

    fn admit(&self, saga_id: SagaId) -> Result<InFlight<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(saga_id) {
            return Err(SagaError::AlreadyRunning(saga_id));
        }
        Ok(InFlight {
            registry: &self.in_flight,
            saga_id,
        })
    }
}

/// Marks a saga as executing until dropped.
struct InFlight<'a> {
    registry: &'a Mutex<HashSet<SagaId>>,
    saga_id: SagaId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.saga_id);
    }
}

fn record_outcome(saga_id: SagaId, started: Instant, result: &Result<()>) {
    let duration = started.elapsed().as_secs_f64();
    metrics::histogram!("saga_duration_seconds").record(duration);

    match result {
        Ok(()) => {
            metrics::counter!("saga_completed").increment(1);
            tracing::info!(%saga_id, duration, "saga completed successfully");
        }
        Err(SagaError::Aborted {
            failed_request,
            compensation_failures,
            ..
        }) => {
            metrics::counter!("saga_aborted").increment(1);
            tracing::warn!(
                %saga_id,
                duration,
                ?failed_request,
                ?compensation_failures,
                "saga aborted"
            );
        }
        Err(e) => {
            tracing::error!(%saga_id, error = %e, "saga halted");
        }
    }
}
