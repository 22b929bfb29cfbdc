//! Shared types for the reply pipeline: stage names and the pluggable hooks.

use async_trait::async_trait;

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Generate,
    Contribute,
    Qa,
}

impl Stage {
    pub const ORDER: [Self; 4] = [Self::Ingest, Self::Generate, Self::Contribute, Self::Qa];

    /// Short label used in error messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Generate => "generate",
            Self::Contribute => "contribute",
            Self::Qa => "qa",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces a candidate reply for the ingested inbound text.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generator name for logging.
    fn name(&self) -> &str;

    async fn generate(&self, text: &str) -> anyhow::Result<String>;
}

/// Post-generation normalization hook.
#[async_trait]
pub trait ReplyContributor: Send + Sync {
    async fn contribute(&self, reply: &str) -> anyhow::Result<String>;
}

/// Placeholder generator: echoes the input behind a fixed marker.
#[derive(Debug, Clone, Default)]
pub struct EchoGenerator;

impl EchoGenerator {
    pub const PREFIX: &'static str = "echo:";
}

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, text: &str) -> anyhow::Result<String> {
        Ok(format!("{}{text}", Self::PREFIX))
    }
}

/// Placeholder contributor: trims surrounding whitespace.
#[derive(Debug, Clone, Default)]
pub struct TrimContributor;

#[async_trait]
impl ReplyContributor for TrimContributor {
    async fn contribute(&self, reply: &str) -> anyhow::Result<String> {
        Ok(reply.trim().to_string())
    }
}
