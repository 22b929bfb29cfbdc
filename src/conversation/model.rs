//! Speaker, conversation and utterance records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Mint a new opaque id: 32 lowercase hex characters.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A participant — a human user or the bot that answers them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Accepting new utterances. At most one per owner.
    Open,
    /// Reserved; nothing transitions here yet.
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = DatabaseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(DatabaseError::Integrity(format!(
                "unknown conversation status: {s}"
            ))),
        }
    }
}

/// A thread owned by one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_speaker_id: String,
    pub status: ConversationStatus,
    pub last_activity_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Status of an utterance.
///
/// `Received` is terminal at creation. A reply starts `Queued` and ends in
/// exactly one of `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceStatus {
    /// Inbound message from the user.
    Received,
    /// Reply accepted; text may still be pending generation.
    Queued,
    /// Reply handed to the outbound channel.
    Sent,
    /// Reply could not be produced or delivered.
    Failed,
}

impl UtteranceStatus {
    pub const ALL: [Self; 4] = [Self::Received, Self::Queued, Self::Sent, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// No further transitions are allowed out of this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl std::fmt::Display for UtteranceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UtteranceStatus {
    type Err = DatabaseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(DatabaseError::Integrity(format!(
                "unknown utterance status: {s}"
            ))),
        }
    }
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub id: String,
    pub conversation_id: String,
    pub speaker_id: String,
    /// `None` while a reply is waiting for generation.
    pub text: Option<String>,
    /// The utterance this one answers. Lookup only, no ownership.
    pub reply_to_id: Option<String>,
    pub status: UtteranceStatus,
    /// Bounded diagnostic, only set when `status` is `Failed`.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
