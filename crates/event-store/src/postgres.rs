use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Event, EventEnvelope, EventId, EventStoreError, Result, SagaId,
    store::{PendingSagas, PersistentStore},
};

/// PostgreSQL-backed persistent store.
///
/// Events live in the `saga_events` table, one row per envelope, keyed by
/// `(saga_id, event_id)`. The `terminal` column is written from
/// [`Event::is_terminal`] so recovery never has to decode payloads to find
/// finished sagas.
pub struct PostgresPersistentStore<E> {
    pool: PgPool,
    _event: PhantomData<fn() -> E>,
}

impl<E> Clone for PostgresPersistentStore<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _event: PhantomData,
        }
    }
}

impl<E: Event> PostgresPersistentStore<E> {
    /// Creates a new PostgreSQL persistent store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _event: PhantomData,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_envelope(row: PgRow) -> Result<EventEnvelope<E>> {
        let payload: serde_json::Value = row.try_get("payload")?;

        Ok(EventEnvelope {
            id: EventId::new(row.try_get("event_id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            timestamp: row.try_get("recorded_at")?,
            event: serde_json::from_value(payload)?,
        })
    }
}

#[async_trait]
impl<E: Event> PersistentStore<E> for PostgresPersistentStore<E> {
    async fn append(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        let payload = serde_json::to_value(&envelope.event)?;

        sqlx::query(
            r#"
            INSERT INTO saga_events (saga_id, event_id, event_type, terminal, payload, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(envelope.saga_id.as_uuid())
        .bind(envelope.id.as_i64())
        .bind(envelope.event_type())
        .bind(envelope.is_terminal())
        .bind(payload)
        .bind(envelope.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return EventStoreError::DuplicateEvent {
                    saga_id: envelope.saga_id,
                    event_id: envelope.id,
                };
            }
            EventStoreError::Database(e)
        })?;

        Ok(())
    }

    async fn find_pending_saga_events(&self) -> Result<PendingSagas<E>> {
        let rows = sqlx::query(
            r#"
            SELECT e.saga_id, e.event_id, e.payload, e.recorded_at
            FROM saga_events e
            WHERE NOT EXISTS (
                SELECT 1 FROM saga_events t
                WHERE t.saga_id = e.saga_id AND t.terminal
            )
            ORDER BY e.saga_id, e.event_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending: PendingSagas<E> = HashMap::new();
        for row in rows {
            let envelope = Self::row_to_envelope(row)?;
            pending.entry(envelope.saga_id).or_default().push(envelope);
        }

        tracing::debug!(sagas = pending.len(), "loaded pending sagas");
        Ok(pending)
    }
}
