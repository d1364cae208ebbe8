//! biograph-llm: Language model access for biograph.
//!
//! One [`ModelHandle`] trait with an implementation per provider, selected by
//! `Settings::provider`:
//! - [`openai::OpenAiModel`] for OpenAI-compatible chat completion APIs
//! - [`llamacpp::LlamaCppModel`] for a llama.cpp server hosting a local model
//!
//! [`AnswerGenerator`] adds the retry policy and timeouts on top of a handle
//! and hands streamed answers out as a [`TokenStream`].

pub mod error;
pub mod generator;
pub mod handle;
pub mod llamacpp;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod sse;
pub mod stream;

use std::sync::Arc;

use biograph_core::{ModelProvider, Settings};

pub use error::ModelError;
pub use generator::AnswerGenerator;
pub use handle::{ChunkStream, GenerationParams, ModelHandle};
pub use retry::RetryPolicy;
pub use stream::TokenStream;

/// Build the model handle for the configured provider.
pub fn connect_model(settings: &Settings) -> Result<Arc<dyn ModelHandle>, ModelError> {
    let handle: Arc<dyn ModelHandle> = match settings.provider {
        ModelProvider::OpenAi => Arc::new(openai::OpenAiModel::from_settings(settings)?),
        ModelProvider::LlamaCpp => Arc::new(llamacpp::LlamaCppModel::from_settings(settings)?),
    };
    tracing::info!(
        provider = %settings.provider,
        model = %settings.model_name,
        base_url = %settings.model_base_url,
        "Model client created"
    );
    Ok(handle)
}
