//! Outbound delivery channels.

pub mod channel;
pub mod sms;

pub use channel::OutboundChannel;
pub use sms::SmsWebhook;
