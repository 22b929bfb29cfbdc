//! Chat request handling — the synchronous half of a chat turn.
//!
//! Validates the request, records the inbound message and a pending reply in
//! one unit of work, commits, then hands the reply to the delivery queue. The
//! reply text is never part of the response.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MessageBounds;
use crate::conversation::{Conversation, Utterance, UtteranceStatus, ledger, registry, speakers};
use crate::delivery::{DeliveryJob, DeliveryQueue};
use crate::error::{Error, ValidationError};
use crate::store::{Store, UnitOfWork};

/// Longest accepted user id, in characters.
pub const MAX_USER_ID_LENGTH: usize = 128;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

/// Acknowledgement returned once the turn is durably recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatQueued {
    pub conversation_id: String,
    pub reply_utterance_id: String,
    pub status: UtteranceStatus,
}

#[derive(Clone)]
pub struct ChatService {
    store: Store,
    queue: DeliveryQueue,
    bounds: MessageBounds,
}

impl ChatService {
    pub fn new(store: Store, queue: DeliveryQueue, bounds: MessageBounds) -> Self {
        Self {
            store,
            queue,
            bounds,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Record one inbound message and schedule its reply.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatQueued, Error> {
        let user_id = request.user_id.trim();
        let message = request.message.trim();
        check_length("user_id", user_id, MessageBounds::new(1, MAX_USER_ID_LENGTH))?;
        check_length("message", message, self.bounds)?;

        let uow = self.store.begin().await?;
        let (conversation, received, reply) = match accept(&uow, user_id, message).await {
            Ok(turn) => {
                uow.commit().await?;
                turn
            }
            Err(e) => {
                uow.discard().await;
                return Err(e);
            }
        };

        info!(
            user_id,
            conversation_id = %conversation.id,
            received_utterance_id = %received.id,
            reply_utterance_id = %reply.id,
            "Chat message accepted"
        );

        self.queue.submit(DeliveryJob {
            user_id: user_id.to_string(),
            source_utterance_id: received.id,
            reply_utterance_id: reply.id.clone(),
        });

        Ok(ChatQueued {
            conversation_id: conversation.id,
            reply_utterance_id: reply.id,
            status: reply.status,
        })
    }
}

async fn accept(
    uow: &UnitOfWork,
    user_id: &str,
    message: &str,
) -> Result<(Conversation, Utterance, Utterance), Error> {
    let user = speakers::resolve_user(uow, user_id).await?;
    let bot = speakers::resolve_bot(uow, user_id).await?;
    let conversation =
        registry::get_or_create_open(uow, &user.id, serde_json::json!({})).await?;
    let received = ledger::append_received(uow, &conversation.id, &user.id, message, None).await?;
    let reply =
        ledger::append_pending(uow, &conversation.id, &bot.id, Some(&received.id)).await?;
    Ok((conversation, received, reply))
}

/// Bounds are counted in characters. Empty counts as absent.
fn check_length(
    field: &'static str,
    value: &str,
    bounds: MessageBounds,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len == 0 {
        return Err(ValidationError::Missing { field });
    }
    if len < bounds.min {
        return Err(ValidationError::TooShort {
            field,
            min: bounds.min,
        });
    }
    if len > bounds.max {
        return Err(ValidationError::TooLong {
            field,
            max: bounds.max,
        });
    }
    Ok(())
}
