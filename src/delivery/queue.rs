//! Delivery queue — runs deferred replies off the request path.
//!
//! Requests hand a `DeliveryJob` to the queue and return immediately. A single
//! dispatcher task spawns one run per job, holding at most `max_concurrent`
//! semaphore permits at a time.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::delivery::{DeliveryJob, Orchestrator};

enum Command {
    Run(DeliveryJob),
    Drain(oneshot::Sender<()>),
    Shutdown,
}

/// Submission handle. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl DeliveryQueue {
    /// Schedule a deferred run. Never blocks.
    ///
    /// After shutdown the job is dropped and its reply stays `queued`.
    pub fn submit(&self, job: DeliveryJob) {
        if let Err(mpsc::error::SendError(Command::Run(job))) = self.tx.send(Command::Run(job)) {
            warn!(
                reply_utterance_id = %job.reply_utterance_id,
                "Delivery worker stopped; job dropped"
            );
        }
    }

    /// Wait until every job submitted before this call has finished.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Drain(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

/// Owner handle for the dispatcher task.
pub struct DeliveryWorker {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl DeliveryWorker {
    /// Stop accepting jobs and wait for the ones already submitted.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Delivery dispatcher panicked");
        }
        info!("Delivery worker stopped");
    }
}

/// Start the dispatcher.
pub fn spawn_delivery_worker(
    orchestrator: Arc<Orchestrator>,
    max_concurrent: usize,
) -> (DeliveryQueue, DeliveryWorker) {
    let max_concurrent = max_concurrent.max(1);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(dispatch(orchestrator, rx, max_concurrent));
    info!(max_concurrent, "Delivery worker started");
    (
        DeliveryQueue { tx: tx.clone() },
        DeliveryWorker { tx, handle },
    )
}

async fn dispatch(
    orchestrator: Arc<Orchestrator>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    max_concurrent: usize,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let mut running: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            Some(finished) = running.join_next(), if !running.is_empty() => {
                log_finished(finished);
            }
            command = rx.recv() => match command {
                Some(Command::Run(job)) => {
                    // Waiting here applies back-pressure to the dispatcher only.
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };
                    let orchestrator = Arc::clone(&orchestrator);
                    debug!(reply_utterance_id = %job.reply_utterance_id, "Deferred run started");
                    running.spawn(async move {
                        let _permit = permit;
                        orchestrator.run_deferred(&job).await;
                    });
                }
                Some(Command::Drain(done)) => {
                    finish_all(&mut running).await;
                    let _ = done.send(());
                }
                Some(Command::Shutdown) | None => break,
            },
        }
    }

    rx.close();
    finish_all(&mut running).await;

    // Anything still buffered arrived after shutdown.
    while let Ok(command) = rx.try_recv() {
        match command {
            Command::Run(job) => warn!(
                reply_utterance_id = %job.reply_utterance_id,
                "Delivery worker stopped; job dropped"
            ),
            Command::Drain(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => {}
        }
    }
}

async fn finish_all(running: &mut JoinSet<()>) {
    while let Some(finished) = running.join_next().await {
        log_finished(finished);
    }
}

fn log_finished(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "Deferred run panicked");
    }
}
