use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::models::{CompletionRequest, ImageResult};

/// Ordered text fragments of one response. Boundaries carry no meaning.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The AI completion service as seen by the editing core.
#[async_trait]
pub trait CompletionService: Send + Sync + 'static {
    /// Start a text response (`transform` / `generate` modes).
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream>;

    /// Produce an image (`image` mode).
    async fn generate_image(&self, request: &CompletionRequest) -> Result<ImageResult>;
}
