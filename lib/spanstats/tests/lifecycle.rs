use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use spanstats::{
    eligibility::METRIC_TOP_LEVEL,
    now_nanos,
    trace::{ProcessedTrace, Span, TraceChunk},
    ChannelWriter, Concentrator, ConcentratorConfig, ConcentratorState, Input, StatsPayload, StatsWriter,
};

#[derive(Default)]
struct CollectingWriter {
    payloads: Mutex<Vec<StatsPayload>>,
}

impl CollectingWriter {
    fn take(&self) -> Vec<StatsPayload> {
        std::mem::take(&mut *self.payloads.lock().unwrap())
    }
}

#[async_trait]
impl StatsWriter for CollectingWriter {
    async fn write(&self, payload: StatsPayload) {
        self.payloads.lock().unwrap().push(payload);
    }
}

struct PanickingWriter;

#[async_trait]
impl StatsWriter for PanickingWriter {
    async fn write(&self, _payload: StatsPayload) {
        panic!("writer is broken");
    }
}

fn config(bucket_interval_secs: u64) -> ConcentratorConfig {
    ConcentratorConfig::default()
        .with_bucket_interval(bucket_interval_secs)
        .with_hostname("agent-host")
        .with_default_env("agent-env")
}

fn recent_input(services: &[&str]) -> Input {
    let end = now_nanos();
    let duration = 1_000_000;
    let spans = services
        .iter()
        .enumerate()
        .map(|(i, service)| {
            Span::new(*service, "op", "resource", "web", 1, i as u64 + 1, 0, end - duration, duration, 0)
                .with_metric(METRIC_TOP_LEVEL, 1.0)
        })
        .collect();

    Input::from_traces(vec![ProcessedTrace::new(TraceChunk::new(spans)).with_tracer_env("prod")])
}

fn hits(payload: &StatsPayload) -> u64 {
    payload
        .stats()
        .iter()
        .flat_map(|p| p.stats())
        .flat_map(|b| b.stats())
        .map(|g| g.hits())
        .sum()
}

#[tokio::test]
async fn stop_flushes_everything_once() {
    let (writer, mut rx) = ChannelWriter::new(8);
    let concentrator = Concentrator::new(&config(10), Arc::new(writer), now_nanos()).unwrap();
    concentrator.add(recent_input(&["a", "b", "c"]));

    let running = concentrator.start().unwrap();
    assert_eq!(running.concentrator().bucket_count(), 1);
    running.stop().await;

    let payload = rx.try_recv().unwrap();
    assert_eq!(payload.agent_hostname(), "agent-host");
    assert_eq!(payload.agent_env(), "agent-env");
    assert_eq!(hits(&payload), 3);
    assert!(rx.try_recv().is_err());

    assert_eq!(concentrator.state(), ConcentratorState::Stopped);
    assert_eq!(concentrator.bucket_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn ticks_write_even_when_nothing_is_due() {
    let writer = Arc::new(CollectingWriter::default());
    let concentrator = Concentrator::new(&config(1), writer.clone(), now_nanos()).unwrap();
    concentrator.add(recent_input(&["a"]));

    let running = concentrator.start().unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(concentrator.state(), ConcentratorState::Running);

    let ticked = writer.take();
    assert_eq!(ticked.len(), 3);

    running.stop().await;
    let drained = writer.take();
    assert_eq!(drained.len(), 1);

    // The span is flushed exactly once, by a tick or by the final drain.
    let total: u64 = ticked.iter().chain(drained.iter()).map(hits).sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn writer_panic_does_not_escape_the_task() {
    let concentrator = Concentrator::new(&config(10), Arc::new(PanickingWriter), now_nanos()).unwrap();
    concentrator.add(recent_input(&["a"]));

    let running = concentrator.start().unwrap();
    running.stop().await;

    assert_eq!(concentrator.state(), ConcentratorState::Stopped);
    // The final sweep happened before the write panicked.
    assert_eq!(concentrator.bucket_count(), 0);
}

#[tokio::test]
async fn ingestion_keeps_working_while_running() {
    let writer = Arc::new(CollectingWriter::default());
    let concentrator = Concentrator::new(&config(10), writer.clone(), now_nanos()).unwrap();
    let running = concentrator.start().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let concentrator = concentrator.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..25 {
                    concentrator.add(recent_input(&["a", "b"]));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    running.stop().await;
    let total: u64 = writer.take().iter().map(hits).sum();
    assert_eq!(total, 200);
}
