//! Delivery orchestrator — the deferred half of a chat request.
//!
//! A run generates the reply, records its text, hands it to the outbound
//! channel and confirms delivery. Every store phase is its own short unit of
//! work so no write lock is held while the pipeline or the channel is busy.
//! Failures never escape: they are rendered onto the reply utterance.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channels::OutboundChannel;
use crate::conversation::UtteranceStatus;
use crate::conversation::ledger::{self, MAX_ERROR_LENGTH, truncate_chars};
use crate::error::{DeliveryError, Error, ValidationError};
use crate::pipeline::ReplyPipeline;
use crate::store::{Store, UnitOfWork};

/// Default ceiling on a single outbound call.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a deferred run needs to find its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryJob {
    pub user_id: String,
    pub source_utterance_id: String,
    pub reply_utterance_id: String,
}

pub struct Orchestrator {
    store: Store,
    pipeline: Arc<ReplyPipeline>,
    outbound: Arc<dyn OutboundChannel>,
    delivery_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        pipeline: Arc<ReplyPipeline>,
        outbound: Arc<dyn OutboundChannel>,
    ) -> Self {
        Self {
            store,
            pipeline,
            outbound,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Generate and deliver the reply for `job`.
    ///
    /// Never fails. On error the reply is marked `failed` if it is still
    /// `queued`; anything that prevents even that is logged.
    pub async fn run_deferred(&self, job: &DeliveryJob) {
        match self.process(job).await {
            Ok(()) => {
                info!(
                    user_id = %job.user_id,
                    reply_utterance_id = %job.reply_utterance_id,
                    channel = self.outbound.name(),
                    "Reply delivered"
                );
            }
            Err(e) => {
                warn!(
                    user_id = %job.user_id,
                    reply_utterance_id = %job.reply_utterance_id,
                    category = e.category(),
                    error = %e,
                    "Deferred reply failed"
                );
                self.record_failure(&job.reply_utterance_id, &e).await;
            }
        }
    }

    async fn process(&self, job: &DeliveryJob) -> Result<(), Error> {
        let uow = self.store.begin().await?;
        let source = ledger::fetch(&uow, &job.source_utterance_id)
            .await
            .map_err(Error::from);
        let source = settle(uow, source).await?;
        let text = source.text.ok_or_else(|| ValidationError::MissingText {
            id: source.id.clone(),
        })?;

        let reply = self.pipeline.run(&text).await?;

        let uow = self.store.begin().await?;
        let recorded = ledger::record_reply_text(&uow, &job.reply_utterance_id, &reply).await;
        settle(uow, recorded).await?;
        debug!(reply_utterance_id = %job.reply_utterance_id, "Reply text recorded");

        self.deliver(&job.user_id, &reply).await?;

        let uow = self.store.begin().await?;
        let sent = ledger::mark_sent(&uow, &job.reply_utterance_id).await;
        settle(uow, sent).await
    }

    async fn deliver(&self, user_id: &str, text: &str) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.delivery_timeout, self.outbound.deliver(user_id, text)).await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        }
    }

    /// Mark the reply `failed` in a fresh unit of work. Best effort.
    async fn record_failure(&self, reply_id: &str, failure: &Error) {
        let message = render_failure(&failure.to_string(), failure.category());

        let uow = match self.store.begin().await {
            Ok(uow) => uow,
            Err(e) => {
                error!(reply_utterance_id = reply_id, error = %e, "Cannot open unit of work to record failure");
                return;
            }
        };
        let marked = mark_failed_if_queued(&uow, reply_id, &message).await;
        match settle(uow, marked).await {
            Ok(true) => {
                debug!(reply_utterance_id = reply_id, "Reply marked failed");
            }
            Ok(false) => {
                warn!(reply_utterance_id = reply_id, "Reply missing or already settled; failure not recorded");
            }
            Err(e) => {
                error!(reply_utterance_id = reply_id, error = %e, "Failed to record reply failure");
            }
        }
    }
}

/// Commit on success, roll back on failure.
async fn settle<T>(uow: UnitOfWork, result: Result<T, Error>) -> Result<T, Error> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(e) => {
            uow.discard().await;
            Err(e)
        }
    }
}

async fn mark_failed_if_queued(
    uow: &UnitOfWork,
    reply_id: &str,
    message: &str,
) -> Result<bool, Error> {
    match ledger::find(uow, reply_id).await? {
        Some(reply) if reply.status == UtteranceStatus::Queued => {
            ledger::mark_failed(uow, reply_id, message).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Non-empty failure text, at most `MAX_ERROR_LENGTH` characters.
fn render_failure(message: &str, category: &str) -> String {
    let message = message.trim();
    let text = if message.is_empty() { category } else { message };
    truncate_chars(text, MAX_ERROR_LENGTH).to_string()
}
