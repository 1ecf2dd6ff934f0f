use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{PipelineRecord, UserType};

/// Single-shot model call: one prompt in, the raw completion text out.
pub trait Caller: Send + Sync + 'static {
    fn call(&self, prompt: String) -> BoxFuture<'_, Result<String>>;
}

/// Persistence backend for finished pipeline runs.
pub trait RecordStore: Send + Sync + 'static {
    /// Persist a record, returning its row id.
    fn save(&self, record: PipelineRecord) -> BoxFuture<'_, Result<i64>>;
}

/// Source of the forbidden word list used by input screening.
pub trait WordSource: Send + Sync + 'static {
    fn list_words(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Embeds text into dense vectors.
pub trait EmbeddingProvider: Send + Sync + 'static {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;

    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Nearest-neighbour lookup over labelled intent examples.
///
/// Each call ranks from scratch; the returned labels are ordered by
/// decreasing similarity and contain at most `k` entries.
pub trait SemanticRetriever: Send + Sync + 'static {
    fn top_k(
        &self,
        query_embedding: &[f32],
        user_type: UserType,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// A named capability the decision pipeline can invoke.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool selection).
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// Parameters that must be present in every call.
    fn required_params(&self) -> &[&str];

    /// Intents this tool serves (empty = all intents).
    fn intents(&self) -> &[&str] {
        &[]
    }

    /// Execute the tool with the given named parameters.
    fn execute(
        &self,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'_, Result<String>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}
