//! Bounded dispatch of completed sessions
//!
//! Completed artifacts go onto a bounded channel. One consumer task starts a
//! dispatch per artifact, with at most `workers` dispatches (and therefore
//! decoder containers) running at once. A burst of completions, such as a
//! fleet rebooting after a bad update, queues up instead of fanning out.
//!
//! [`DispatchQueue::enqueue`] never waits: the transport loop must keep
//! polling the broker. An artifact that finds the channel full is handed to a
//! deferred sender task holding its own queue handle, so it still reaches the
//! consumer during shutdown.

use crate::models::AssembledArtifact;
use crate::services::dispatcher::{DispatchOutcome, IngestionDispatcher};
use crate::services::session_store::SessionStore;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<AssembledArtifact>,
}

impl DispatchQueue {
    /// Start the consumer; returns the queue handle and the consumer task
    ///
    /// On cancellation the consumer stops starting parallel dispatches and
    /// drains the channel one artifact at a time until every queue handle,
    /// deferred senders included, has been dropped. Callers must drop their
    /// own handles (the receiver owns one) for the consumer to finish.
    pub fn spawn(
        dispatcher: Arc<IngestionDispatcher>,
        sessions: Arc<SessionStore>,
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(consume(dispatcher, sessions, rx, workers.max(1), cancel));
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, artifact: AssembledArtifact) {
        match self.tx.try_send(artifact) {
            Ok(()) => {}
            Err(TrySendError::Full(artifact)) => {
                warn!(device_id = %artifact.device_id, "Dispatch queue full, deferring");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let device_id = artifact.device_id.clone();
                    if tx.send(artifact).await.is_err() {
                        error!(device_id = %device_id, "Dispatch queue closed, artifact dropped");
                    }
                });
            }
            Err(TrySendError::Closed(artifact)) => {
                error!(device_id = %artifact.device_id, "Dispatch queue closed, artifact dropped");
            }
        }
    }
}

async fn consume(
    dispatcher: Arc<IngestionDispatcher>,
    sessions: Arc<SessionStore>,
    mut rx: mpsc::Receiver<AssembledArtifact>,
    workers: usize,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut in_flight = JoinSet::new();

    loop {
        let artifact = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    error!(error = %e, "Dispatch task panicked");
                }
                continue;
            }
            artifact = rx.recv() => match artifact {
                Some(artifact) => artifact,
                None => break,
            },
        };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let dispatcher = Arc::clone(&dispatcher);
        let sessions = Arc::clone(&sessions);
        in_flight.spawn(async move {
            let _permit = permit;
            run_dispatch(&dispatcher, &sessions, artifact).await;
        });
    }

    // recv yields None once the last sender is gone
    let mut drained = 0usize;
    while let Some(artifact) = rx.recv().await {
        let Ok(_permit) = semaphore.acquire().await else {
            break;
        };
        run_dispatch(&dispatcher, &sessions, artifact).await;
        drained += 1;
    }
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Dispatch task panicked");
        }
    }
    info!(drained, "Dispatch queue stopped");
}

async fn run_dispatch(
    dispatcher: &IngestionDispatcher,
    sessions: &SessionStore,
    artifact: AssembledArtifact,
) {
    match dispatcher.dispatch(&artifact).await {
        Ok(DispatchOutcome::Registered {
            coredump_id,
            report_path,
            ..
        }) => {
            debug!(
                device_id = %artifact.device_id,
                coredump_id,
                has_report = report_path.is_some(),
                "Dispatch finished"
            );
        }
        Ok(DispatchOutcome::Unregistered { reason, .. }) => {
            debug!(device_id = %artifact.device_id, reason = ?reason, "Dispatch stopped early");
        }
        Err(e) => {
            error!(device_id = %artifact.device_id, error = %e, "Dispatch failed");
        }
    }
    sessions.finish(&artifact.device_id, artifact.session_id);
}
