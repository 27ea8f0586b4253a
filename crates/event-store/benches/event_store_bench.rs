use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{Event, EventEnvelope, EventId, EventStore, InMemoryEventStore, SagaId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepEvent {
    step: u32,
}

impl Event for StepEvent {
    fn event_type(&self) -> &'static str {
        "Step"
    }

    fn is_terminal(&self) -> bool {
        false
    }
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .append(SagaId::new(), StepEvent { step: 1 })
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_saga_of_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_saga_of_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let saga_id = SagaId::new();
                for step in 0..10 {
                    store.append(saga_id, StepEvent { step }).await.unwrap();
                }
            });
        });
    });
}

fn bench_replay_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let saga_id = SagaId::new();
    let recovered: Vec<_> = (1..=100)
        .map(|n| EventEnvelope::new(EventId::new(n), saga_id, StepEvent { step: n as u32 }))
        .collect();

    c.bench_function("event_store/replay_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                for envelope in recovered.clone() {
                    store.replay(envelope).await.unwrap();
                }
            });
        });
    });
}

fn bench_events_for_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let saga_id = SagaId::new();

    // Interleave one saga's events with 9 others
    rt.block_on(async {
        for step in 0..100 {
            store.append(saga_id, StepEvent { step }).await.unwrap();
            for _ in 0..9 {
                store.append(SagaId::new(), StepEvent { step }).await.unwrap();
            }
        }
    });

    c.bench_function("event_store/events_for_saga_100_of_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.events_for_saga(saga_id).await.unwrap();
            });
        });
    });
}

fn bench_stream_all_events(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(async {
        for _ in 0..10 {
            let saga_id = SagaId::new();
            for step in 0..100 {
                store.append(saga_id, StepEvent { step }).await.unwrap();
            }
        }
    });

    c.bench_function("event_store/stream_1000_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store.stream_all_events().await.unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_saga_of_10,
    bench_replay_100,
    bench_events_for_saga,
    bench_stream_all_events,
);
criterion_main!(benches);
