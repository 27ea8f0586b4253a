//! Saga tasks: one request bound to the transport and the event recorder.

use common::SagaId;
use event_store::{EventStore, PersistentStore};

use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::recorder::EventRecorder;
use crate::request::{Method, Operation, SagaRequest};
use crate::transport::Transport;

/// How often a failing remote call is attempted before it counts as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub transaction_attempts: u32,
    pub compensation_attempts: u32,
}

impl RetryPolicy {
    pub fn new(transaction_attempts: u32, compensation_attempts: u32) -> Self {
        Self {
            transaction_attempts: transaction_attempts.max(1),
            compensation_attempts: compensation_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Everything a task needs beyond its request, shared by all tasks of a saga.
pub struct TaskContext<'a, S, P, T> {
    pub saga_id: SagaId,
    pub definition: &'a str,
    pub recorder: &'a EventRecorder<S, P>,
    pub transport: &'a T,
    pub retry: RetryPolicy,
}

/// A request bound to its saga's context.
pub struct SagaTask<'a, S, P, T> {
    request: &'a SagaRequest,
    context: &'a TaskContext<'a, S, P, T>,
}

impl<'a, S, P, T> SagaTask<'a, S, P, T>
where
    S: EventStore<SagaEvent>,
    P: PersistentStore<SagaEvent>,
    T: Transport,
{
    pub fn new(request: &'a SagaRequest, context: &'a TaskContext<'a, S, P, T>) -> Self {
        Self { request, context }
    }

    pub fn request(&self) -> &SagaRequest {
        self.request
    }

    /// Executes the transaction.
    ///
    /// Records TransactionStarted durably before the remote call and
    /// TransactionEnded after it succeeds. The start sentinel records
    /// SagaStarted and the end sentinel SagaEnded, without calling out.
    pub async fn run_transaction(&self) -> Result<()> {
        match self.request {
            SagaRequest::SagaStart => {
                self.record(SagaEvent::saga_started(self.context.definition))
                    .await
            }
            SagaRequest::SagaEnd => self.record(SagaEvent::saga_ended()).await,
            SagaRequest::Step(_) => {
                self.record(SagaEvent::transaction_started(self.request.clone()))
                    .await?;
                self.resume_transaction().await
            }
        }
    }

    /// Executes the transaction of a request whose TransactionStarted is
    /// already recorded.
    pub async fn resume_transaction(&self) -> Result<()> {
        self.call(
            self.request.transaction(),
            self.context.retry.transaction_attempts,
        )
        .await?;
        self.record(SagaEvent::transaction_ended(self.request.clone()))
            .await
    }

    /// Executes the compensation and records TransactionCompensated.
    ///
    /// Compensating the start sentinel records SagaAborted; compensating the
    /// end sentinel does nothing.
    pub async fn run_compensation(&self) -> Result<()> {
        match self.request {
            SagaRequest::SagaStart => self.record(SagaEvent::saga_aborted()).await,
            SagaRequest::SagaEnd => Ok(()),
            SagaRequest::Step(_) => {
                self.call(
                    self.request.compensation(),
                    self.context.retry.compensation_attempts,
                )
                .await?;
                self.record(SagaEvent::transaction_compensated(self.request.clone()))
                    .await
            }
        }
    }

    async fn record(&self, event: SagaEvent) -> Result<()> {
        self.context
            .recorder
            .record(self.context.saga_id, event)
            .await?;
        Ok(())
    }

    async fn call(&self, operation: &Operation, attempts: u32) -> Result<()> {
        if operation.method == Method::Nop {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            let result = self
                .context
                .transport
                .with(
                    self.request.service_name(),
                    &operation.path,
                    operation.method,
                    &operation.params,
                )
                .await;

            match result {
                Err(SagaError::TransportFailure { ref reason, .. }) if attempt < attempts => {
                    tracing::warn!(
                        saga_id = %self.context.saga_id,
                        request = %self.request,
                        attempt,
                        %reason,
                        "remote call failed, retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
