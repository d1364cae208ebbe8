//! The provider-neutral model interface.

use async_trait::async_trait;
use futures::stream::BoxStream;

use biograph_core::{MaxTokens, Prompt, Settings};

use crate::error::ModelError;

/// Raw chunk stream from a provider. Ends after the first error.
pub type ChunkStream = BoxStream<'static, Result<String, ModelError>>;

/// Sampling parameters passed verbatim to the provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: MaxTokens,
}

impl GenerationParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

/// A live client for one model.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    /// Cheap request proving the endpoint is reachable and accepts our credentials.
    async fn ping(&self) -> Result<(), ModelError>;

    /// Generate the whole answer in one response.
    async fn complete(&self, prompt: &Prompt, params: &GenerationParams)
        -> Result<String, ModelError>;

    /// Start a streamed generation. Errors before the first chunk are
    /// returned here; later failures arrive as the stream's last item.
    async fn stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<ChunkStream, ModelError>;

    /// Release client resources.
    async fn close(&self) {}
}
