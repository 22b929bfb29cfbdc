//! Reply pipeline — ingest → generate → contribute → qa.
//!
//! Plain sequential composition. Each stage consumes the previous stage's
//! output and the first failure short-circuits the rest. The returned error
//! always names the failing stage (`pipeline:<stage> failed: ...`). A stage
//! that panics is reported as a failure of that stage.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::config::MessageBounds;
use crate::error::{PipelineError, ValidationError};
use crate::pipeline::types::{
    EchoGenerator, ReplyContributor, ReplyGenerator, Stage, TrimContributor,
};

pub struct ReplyPipeline {
    generator: Arc<dyn ReplyGenerator>,
    contributor: Arc<dyn ReplyContributor>,
    bounds: MessageBounds,
}

impl ReplyPipeline {
    /// Create a pipeline with the given generator and the trim contributor.
    pub fn new(generator: Arc<dyn ReplyGenerator>, bounds: MessageBounds) -> Self {
        Self {
            generator,
            contributor: Arc::new(TrimContributor),
            bounds,
        }
    }

    /// Echo generator, for development and tests.
    pub fn echo(bounds: MessageBounds) -> Self {
        Self::new(Arc::new(EchoGenerator), bounds)
    }

    pub fn with_contributor(mut self, contributor: Arc<dyn ReplyContributor>) -> Self {
        self.contributor = contributor;
        self
    }

    /// Turn inbound text into a validated reply.
    pub async fn run(&self, text: &str) -> Result<String, PipelineError> {
        let ingested = guarded(Stage::Ingest, async { ingest(text) }).await?;
        let generated =
            guarded(Stage::Generate, self.generator.generate(&ingested)).await?;
        let contributed =
            guarded(Stage::Contribute, self.contributor.contribute(&generated)).await?;
        let reply = guarded(Stage::Qa, async { qa(contributed, self.bounds) }).await?;

        debug!(
            generator = self.generator.name(),
            chars = reply.chars().count(),
            "Reply pipeline complete"
        );
        Ok(reply)
    }
}

/// Run one stage, attaching the stage name to an error or a panic.
async fn guarded<T, E, F>(stage: Stage, fut: F) -> Result<T, PipelineError>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.map_err(|e| stage_failed(stage, format!("{e:#}"))),
        Err(payload) => Err(stage_failed(
            stage,
            format!("stage panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn stage_failed(stage: Stage, reason: String) -> PipelineError {
    warn!(stage = stage.as_str(), %reason, "Reply pipeline stage failed");
    PipelineError::StageFailed {
        stage: stage.as_str(),
        reason,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

fn ingest(text: &str) -> anyhow::Result<String> {
    Ok(text.trim().to_string())
}

/// Enforce the same length bounds used for inbound validation.
fn qa(reply: String, bounds: MessageBounds) -> Result<String, ValidationError> {
    let len = reply.chars().count();
    if len < bounds.min {
        return Err(ValidationError::EmptyReply);
    }
    if len > bounds.max {
        return Err(ValidationError::ReplyTooLong { max: bounds.max });
    }
    Ok(reply)
}
