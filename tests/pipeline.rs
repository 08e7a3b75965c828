use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use wiith_lib::queue::{EventSender, OverflowPolicy};
use wiith_lib::source::{LineSource, ObservationSource};
use wiith_lib::trigger::{ChannelTriggers, Trigger};
use wiith_lib::{
    Error, FlushBatch, FlushCause, FlushPolicy, JsonlSink, MemorySink, Monitor, MonitorSettings,
    Observation, PersistenceSink, SnapshotReporter,
};

const DEVICE: &str = "aa:bb:cc:11:22:33";
const OTHER: &str = "00:11:22:33:44:55";

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

/// Forwards whatever the test pushes until the test drops its sender.
struct ChannelSource {
    rx: mpsc::Receiver<Observation>,
}

#[async_trait]
impl ObservationSource for ChannelSource {
    fn describe(&self) -> String {
        "test channel".into()
    }

    async fn run(self: Box<Self>, events: EventSender, cancel_token: CancellationToken) -> Result<()> {
        let mut rx = self.rx;
        loop {
            let next = tokio::select! {
                next = rx.recv() => next,
                _ = cancel_token.cancelled() => return Ok(()),
            };
            match next {
                Some(observation) => {
                    events.send(observation).await?;
                }
                None => return Ok(()),
            }
        }
    }
}

/// Emits a few events and then dies like a crashed capture process.
struct FailingSource {
    events: Vec<Observation>,
}

#[async_trait]
impl ObservationSource for FailingSource {
    fn describe(&self) -> String {
        "failing capture".into()
    }

    async fn run(self: Box<Self>, events: EventSender, _cancel_token: CancellationToken) -> Result<()> {
        for observation in self.events {
            events.send(observation).await?;
        }
        Err(anyhow!("capture process exited with status 2"))
    }
}

/// Holds each batch until the test lets it through.
struct GatedSink {
    inner: MemorySink,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl PersistenceSink for GatedSink {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn persist(&self, batch: &FlushBatch) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.persist(batch).await
    }
}

fn obs(raw: &str, secs: i64) -> Observation {
    Observation::new(raw.parse().unwrap(), DateTime::from_timestamp(secs, 0).unwrap())
}

fn settings(policy: FlushPolicy, interval: Duration) -> MonitorSettings {
    MonitorSettings {
        queue_capacity: 10,
        overflow: OverflowPolicy::Block,
        flush_interval: interval,
        flush_policy: policy,
        flush_on_exit: false,
    }
}

fn monitor(settings: MonitorSettings, sink: &MemorySink, out: &SharedBuffer) -> Monitor {
    Monitor::new(
        settings,
        Arc::new(sink.clone()),
        SnapshotReporter::new(Box::new(out.clone())),
    )
}

#[tokio::test]
async fn replayed_events_end_with_a_final_report() {
    let sink = MemorySink::new();
    let out = SharedBuffer::default();
    let monitor = monitor(
        settings(FlushPolicy::ClearOnFlush, Duration::from_secs(283)),
        &sink,
        &out,
    );
    let input: &'static [u8] =
        b"AA:BB:CC:11:22:33\t0.000000000\nAA:BB:CC:11:22:33\t5.000000000\nAA:BB:CC:11:22:33\t9.000000000\n";
    let (_trigger_tx, triggers) = ChannelTriggers::new(1);

    let summary = monitor
        .run(
            Box::new(LineSource::new(input, "replay")),
            Box::new(triggers),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.events_applied, 3);
    assert_eq!(summary.clients_at_exit, 1);
    assert_eq!(
        out.contents(),
        "MAC aa:bb:cc:11:22:33 {\n\
         \tFirst seen: 1970-01-01 00:00:00 UTC\n\
         \tLast seen:  1970-01-01 00:00:09 UTC\n\
         \tTimes seen: 3\n\
         }\n\
         Total: 1 clients\n"
    );
    assert!(sink.is_empty());
}

#[tokio::test]
async fn failing_source_still_reports_before_returning_error() {
    let sink = MemorySink::new();
    let out = SharedBuffer::default();
    let monitor = monitor(
        settings(FlushPolicy::ClearOnFlush, Duration::from_secs(283)),
        &sink,
        &out,
    );
    let (_trigger_tx, triggers) = ChannelTriggers::new(1);
    let source = FailingSource {
        events: vec![obs(DEVICE, 1), obs(DEVICE, 2), obs(OTHER, 3)],
    };

    let result = monitor
        .run(Box::new(source), Box::new(triggers), CancellationToken::new())
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::SourceTermination(_)));
    assert!(err.is_fatal());
    assert!(err.to_string().contains("status 2"));

    let report = out.contents();
    assert!(report.contains(&format!("MAC {DEVICE} {{")));
    assert!(report.contains("\tTimes seen: 2\n"));
    assert!(report.ends_with("Total: 2 clients\n"));
}

#[tokio::test(start_paused = true)]
async fn trigger_flush_matches_scheduled_flush() {
    let events = [obs(DEVICE, 0), obs(DEVICE, 5), obs(OTHER, 7), obs(DEVICE, 9)];

    // Scheduled flush after one interval.
    let scheduled_sink = MemorySink::new();
    let scheduled = monitor(
        settings(FlushPolicy::RetainOnFlush, Duration::from_secs(10)),
        &scheduled_sink,
        &SharedBuffer::default(),
    );
    let (event_tx, rx) = mpsc::channel(8);
    let (_trigger_tx, triggers) = ChannelTriggers::new(1);
    let run = tokio::spawn(async move {
        scheduled
            .run(Box::new(ChannelSource { rx }), Box::new(triggers), CancellationToken::new())
            .await
    });
    for event in events {
        event_tx.send(event).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(11)).await;
    drop(event_tx);
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.scheduled_flushes, 1);

    // Same events, flushed by trigger well before any scheduled flush.
    let triggered_sink = MemorySink::new();
    let triggered = monitor(
        settings(FlushPolicy::RetainOnFlush, Duration::from_secs(3600)),
        &triggered_sink,
        &SharedBuffer::default(),
    );
    let (event_tx, rx) = mpsc::channel(8);
    let (trigger_tx, triggers) = ChannelTriggers::new(1);
    let run = tokio::spawn(async move {
        triggered
            .run(Box::new(ChannelSource { rx }), Box::new(triggers), CancellationToken::new())
            .await
    });
    for event in events {
        event_tx.send(event).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    trigger_tx.send(Trigger::Flush).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(event_tx);
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.triggers.flushes, 1);
    assert_eq!(summary.scheduled_flushes, 0);

    let scheduled = scheduled_sink.batches();
    let triggered = triggered_sink.batches();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(triggered.len(), 1);
    assert_eq!(scheduled[0].cause, FlushCause::Scheduled);
    assert_eq!(triggered[0].cause, FlushCause::Trigger);
    assert_eq!(scheduled[0].snapshot.clients, triggered[0].snapshot.clients);
}

async fn two_triggered_flushes(policy: FlushPolicy) -> Vec<wiith_lib::FlushBatch> {
    let sink = MemorySink::new();
    let monitor = monitor(
        settings(policy, Duration::from_secs(3600)),
        &sink,
        &SharedBuffer::default(),
    );
    let (event_tx, rx) = mpsc::channel(8);
    let (trigger_tx, triggers) = ChannelTriggers::new(1);
    let run = tokio::spawn(async move {
        monitor
            .run(Box::new(ChannelSource { rx }), Box::new(triggers), CancellationToken::new())
            .await
    });

    event_tx.send(obs(DEVICE, 0)).await.unwrap();
    event_tx.send(obs(OTHER, 1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    trigger_tx.send(Trigger::Flush).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    event_tx.send(obs(DEVICE, 4)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    trigger_tx.send(Trigger::Flush).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    drop(event_tx);
    run.await.unwrap().unwrap();
    sink.batches()
}

#[tokio::test(start_paused = true)]
async fn clear_policy_batches_only_cover_the_last_window() {
    let batches = two_triggered_flushes(FlushPolicy::ClearOnFlush).await;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);

    assert_eq!(batches[1].len(), 1);
    let record = batches[1].snapshot.get(&DEVICE.parse().unwrap()).unwrap();
    assert_eq!(record.times_seen, 1);
    assert_eq!(record.first_seen.timestamp(), 4);
}

#[tokio::test(start_paused = true)]
async fn retain_policy_batches_are_cumulative() {
    let batches = two_triggered_flushes(FlushPolicy::RetainOnFlush).await;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].len(), 2);

    let record = batches[1].snapshot.get(&DEVICE.parse().unwrap()).unwrap();
    assert_eq!(record.times_seen, 2);
    assert_eq!(record.first_seen.timestamp(), 0);
    assert_eq!(record.last_seen.timestamp(), 4);
}

#[tokio::test(start_paused = true)]
async fn report_trigger_does_not_touch_the_table() {
    let sink = MemorySink::new();
    let out = SharedBuffer::default();
    let monitor = monitor(
        settings(FlushPolicy::ClearOnFlush, Duration::from_secs(3600)),
        &sink,
        &out,
    );
    let (event_tx, rx) = mpsc::channel(8);
    let (trigger_tx, triggers) = ChannelTriggers::new(1);
    let run = tokio::spawn(async move {
        monitor
            .run(Box::new(ChannelSource { rx }), Box::new(triggers), CancellationToken::new())
            .await
    });

    event_tx.send(obs(DEVICE, 0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    trigger_tx.send(Trigger::Report).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(event_tx);

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.triggers.reports, 1);
    assert_eq!(summary.clients_at_exit, 1);
    assert!(sink.is_empty());

    // One report from the trigger, one at exit, both listing the device.
    let report = out.contents();
    assert_eq!(report.matches("Total: 1 clients\n").count(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_token_runs_the_clean_exit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flushes.jsonl");
    let out = SharedBuffer::default();
    let monitor = Monitor::new(
        MonitorSettings {
            flush_on_exit: true,
            ..settings(FlushPolicy::ClearOnFlush, Duration::from_secs(3600))
        },
        Arc::new(JsonlSink::new(path.clone()).unwrap()),
        SnapshotReporter::new(Box::new(out.clone())),
    );
    let shutdown = CancellationToken::new();
    let (event_tx, rx) = mpsc::channel(8);
    let (_trigger_tx, triggers) = ChannelTriggers::new(1);
    let run = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            monitor
                .run(Box::new(ChannelSource { rx }), Box::new(triggers), shutdown)
                .await
        }
    });

    event_tx.send(obs(DEVICE, 0)).await.unwrap();
    event_tx.send(obs(DEVICE, 3)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.cancel();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.events_applied, 2);
    assert!(out.contents().ends_with("Total: 1 clients\n"));

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    let batch: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(batch["cause"], "shutdown");
    assert_eq!(batch["policy"], "clear-on-flush");
    assert_eq!(batch["snapshot"]["clients"][DEVICE]["timesSeen"], 2);
}

async fn flush_held_open_across_shutdown(cause: FlushCause) {
    let sink = MemorySink::new();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let interval = match cause {
        FlushCause::Scheduled => Duration::from_secs(10),
        _ => Duration::from_secs(3600),
    };
    let monitor = Monitor::new(
        settings(FlushPolicy::ClearOnFlush, interval),
        Arc::new(GatedSink {
            inner: sink.clone(),
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }),
        SnapshotReporter::new(Box::new(SharedBuffer::default())),
    );
    let shutdown = CancellationToken::new();
    let (event_tx, rx) = mpsc::channel(8);
    let (trigger_tx, triggers) = ChannelTriggers::new(1);
    let run = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            monitor
                .run(Box::new(ChannelSource { rx }), Box::new(triggers), shutdown)
                .await
        }
    });

    event_tx.send(obs(DEVICE, 0)).await.unwrap();
    event_tx.send(obs(DEVICE, 2)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    if cause == FlushCause::Trigger {
        trigger_tx.send(Trigger::Flush).await.unwrap();
    }
    entered.notified().await;

    shutdown.cancel();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!run.is_finished(), "run returned while a flush was still persisting");
    assert!(sink.is_empty());

    release.notify_one();
    let summary = run.await.unwrap().unwrap();

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].cause, cause);
    assert_eq!(batches[0].snapshot.get(&DEVICE.parse().unwrap()).unwrap().times_seen, 2);
    // The flush took the clients, so nothing was left for the exit report.
    assert_eq!(summary.clients_at_exit, 0);
    match cause {
        FlushCause::Scheduled => assert_eq!(summary.scheduled_flushes, 1),
        _ => assert_eq!(summary.triggers.flushes, 1),
    }
}

#[tokio::test(start_paused = true)]
async fn triggered_flush_in_progress_finishes_before_exit() {
    flush_held_open_across_shutdown(FlushCause::Trigger).await;
}

#[tokio::test(start_paused = true)]
async fn scheduled_flush_in_progress_finishes_before_exit() {
    flush_held_open_across_shutdown(FlushCause::Scheduled).await;
}
