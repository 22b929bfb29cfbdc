//! Outbound channel trait.

use async_trait::async_trait;

use crate::error::DeliveryError;

/// A transport that hands a finished reply to the end user.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Channel name for logging and error context.
    fn name(&self) -> &str;

    /// Deliver `text` to `user_id`. Returns once the transport has accepted it.
    async fn deliver(&self, user_id: &str, text: &str) -> Result<(), DeliveryError>;
}
