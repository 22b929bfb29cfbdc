//! Reply pipeline.
//!
//! Every reply flows through four fixed stages:
//! 1. `ingest` — trim the inbound text
//! 2. `generate` — pluggable `ReplyGenerator`
//! 3. `contribute` — pluggable `ReplyContributor`
//! 4. `qa` — enforce the configured length bounds
//!
//! The pipeline only runs on the deferred delivery path, so its errors are
//! recorded on the reply utterance and never reach a waiting client.

pub mod processor;
pub mod types;

pub use processor::ReplyPipeline;
pub use types::{EchoGenerator, ReplyContributor, ReplyGenerator, Stage, TrimContributor};
