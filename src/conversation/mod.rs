//! Conversations — speakers, the open-conversation registry and the utterance
//! ledger.

pub mod ledger;
pub mod model;
pub mod registry;
pub mod speakers;

pub use model::{Conversation, ConversationStatus, Speaker, Utterance, UtteranceStatus, new_id};
pub use speakers::bot_id_for;
