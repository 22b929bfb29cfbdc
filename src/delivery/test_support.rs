//! Fakes shared by the delivery tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use crate::channels::OutboundChannel;
use crate::config::MessageBounds;
use crate::conversation::{Utterance, ledger, registry, speakers};
use crate::delivery::{DeliveryJob, Orchestrator};
use crate::error::DeliveryError;
use crate::pipeline::{ReplyGenerator, ReplyPipeline};
use crate::store::Store;

/// Accepts everything and remembers what it was given.
///
/// With a delay it also tracks how many deliveries overlapped.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
    pub delay: Duration,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl RecordingChannel {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, user_id: &str, text: &str) -> Result<(), DeliveryError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent.lock().await.push((user_id.into(), text.into()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails with a transport error.
pub struct FailingChannel {
    pub reason: String,
}

#[async_trait]
impl OutboundChannel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn deliver(&self, _user_id: &str, _text: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport {
            channel: "failing".into(),
            reason: self.reason.clone(),
        })
    }
}

/// Never finishes within any reasonable test timeout.
pub struct SlowChannel;

#[async_trait]
impl OutboundChannel for SlowChannel {
    fn name(&self) -> &str {
        "slow"
    }

    async fn deliver(&self, _user_id: &str, _text: &str) -> Result<(), DeliveryError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

/// Generator with a bug: panics instead of returning an error.
pub struct PanickingGenerator;

#[async_trait]
impl ReplyGenerator for PanickingGenerator {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn generate(&self, _text: &str) -> anyhow::Result<String> {
        panic!("generator bug")
    }
}

/// A store on a temporary file plus seeding helpers.
pub struct Harness {
    _tmp: tempfile::TempDir,
    pub store: Store,
}

impl Harness {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(&tmp.path().join("test.db")).await.unwrap();
        Self { _tmp: tmp, store }
    }

    pub fn orchestrator(&self, outbound: Arc<dyn OutboundChannel>) -> Orchestrator {
        self.orchestrator_with(outbound, MessageBounds::default())
    }

    pub fn orchestrator_with(
        &self,
        outbound: Arc<dyn OutboundChannel>,
        bounds: MessageBounds,
    ) -> Orchestrator {
        self.orchestrator_with_pipeline(outbound, ReplyPipeline::echo(bounds))
    }

    pub fn orchestrator_with_pipeline(
        &self,
        outbound: Arc<dyn OutboundChannel>,
        pipeline: ReplyPipeline,
    ) -> Orchestrator {
        Orchestrator::new(self.store.clone(), Arc::new(pipeline), outbound)
    }

    /// Insert a received message and its pending reply.
    pub async fn seed(&self, user_id: &str, text: &str) -> DeliveryJob {
        let uow = self.store.begin().await.unwrap();
        let user = speakers::resolve_user(&uow, user_id).await.unwrap();
        let bot = speakers::resolve_bot(&uow, user_id).await.unwrap();
        let conversation = registry::get_or_create_open(&uow, &user.id, json!({}))
            .await
            .unwrap();
        let received = ledger::append_received(&uow, &conversation.id, &user.id, text, None)
            .await
            .unwrap();
        let reply = ledger::append_pending(&uow, &conversation.id, &bot.id, Some(&received.id))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        DeliveryJob {
            user_id: user_id.into(),
            source_utterance_id: received.id,
            reply_utterance_id: reply.id,
        }
    }

    pub async fn utterance(&self, id: &str) -> Utterance {
        let uow = self.store.begin().await.unwrap();
        let utterance = ledger::fetch(&uow, id).await.unwrap();
        uow.commit().await.unwrap();
        utterance
    }
}
