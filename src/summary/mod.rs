// src/summary/mod.rs
// Composite summary generation

mod openai;
mod types;

pub use openai::{OpenAiAdapter, DEFAULT_MODEL};
pub use types::GenerationError;

use async_trait::async_trait;

/// Request/response boundary to a text generation service
#[async_trait]
pub trait SummaryClient: Send + Sync {
    /// Produce the composite summary for an already assembled prompt
    async fn generate_composite(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Provider name
    fn name(&self) -> &str;
}
