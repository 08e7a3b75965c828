use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::{FlushPolicy, PresenceSnapshot};
use crate::queue::EventReceiver;

use super::table::PresenceTable;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

const REQUEST_QUEUE_CAPACITY: usize = 16;

enum Request {
    Snapshot {
        reply: oneshot::Sender<PresenceSnapshot>,
    },
    Flush {
        policy: FlushPolicy,
        reply: oneshot::Sender<PresenceSnapshot>,
    },
}

/// Cloneable access to the table owned by the ingestion loop. Requests are
/// serviced between two events, so a reply never sees a half-applied update.
#[derive(Clone)]
pub struct PresenceHandle {
    requests: mpsc::Sender<Request>,
}

impl PresenceHandle {
    pub async fn snapshot(&self) -> Result<PresenceSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Request::Snapshot { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| Error::IngestionStopped)
    }

    /// Takes a snapshot and applies `policy` to the table in the same step.
    pub async fn take_for_flush(&self, policy: FlushPolicy) -> Result<PresenceSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Request::Flush {
            policy,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| Error::IngestionStopped)
    }

    async fn submit(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| Error::IngestionStopped)
    }
}

/// What the ingestion loop hands back when it stops.
#[derive(Debug)]
pub struct IngestOutcome {
    pub table: PresenceTable,
    pub events_dropped: u64,
}

pub struct IngestTask {
    handle: JoinHandle<IngestOutcome>,
    cancel_token: CancellationToken,
}

impl IngestTask {
    /// Moves `table` into a new ingestion task fed by `events`.
    pub fn spawn(table: PresenceTable, events: EventReceiver) -> (Self, PresenceHandle) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(ingest_loop(
            table,
            events,
            request_rx,
            cancel_token.clone(),
        ));

        (
            Self {
                handle,
                cancel_token,
            },
            PresenceHandle {
                requests: request_tx,
            },
        )
    }

    /// Stops the loop, drains whatever is still buffered in the event queue and
    /// returns ownership of the table.
    pub async fn shutdown(self) -> anyhow::Result<IngestOutcome> {
        self.cancel_token.cancel();
        self.handle
            .await
            .context("ingestion task failed to join")
    }
}

async fn ingest_loop(
    mut table: PresenceTable,
    mut events: EventReceiver,
    mut requests: mpsc::Receiver<Request>,
    cancel_token: CancellationToken,
) -> IngestOutcome {
    let mut events_open = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => break,
            Some(request) = requests.recv() => serve(&mut table, request),
            event = events.recv(), if events_open => match event {
                Some(observation) => {
                    let record = table.observe(observation);
                    log_debug!(
                        "observed {} (times seen: {})",
                        observation.mac,
                        record.times_seen
                    );
                }
                None => {
                    events_open = false;
                    log_info!(
                        "event queue closed after {} events; still serving requests",
                        table.events_applied()
                    );
                }
            },
        }
    }

    events.close();
    let mut drained = 0u64;
    while let Some(observation) = events.recv().await {
        table.observe(observation);
        drained += 1;
    }

    log_info!(
        "ingestion loop stopped: {} events applied ({} drained at shutdown), {} clients in table",
        table.events_applied(),
        drained,
        table.len()
    );

    IngestOutcome {
        events_dropped: events.dropped(),
        table,
    }
}

fn serve(table: &mut PresenceTable, request: Request) {
    match request {
        Request::Snapshot { reply } => {
            let _ = reply.send(table.snapshot());
        }
        Request::Flush { policy, reply } => {
            let snapshot = table.flush(policy);
            log_debug!(
                "handed {} clients to flush ({})",
                snapshot.len(),
                policy.as_str()
            );
            // A flusher that went away has lost the snapshot; say so loudly.
            if reply.send(snapshot).is_err() {
                log_error!("flush requester dropped before receiving its snapshot");
            }
        }
    }
}
