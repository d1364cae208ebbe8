//! Answer generation on top of a [`ModelHandle`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use biograph_core::{Prompt, Settings};

use crate::error::ModelError;
use crate::handle::{GenerationParams, ModelHandle};
use crate::retry::RetryPolicy;
use crate::stream::TokenStream;

/// Sends prompts to a model with the configured sampling parameters, retry
/// policy and timeouts.
///
/// The timeout bounds each attempt of a whole-answer request, and each gap
/// between chunks of a streamed answer. Only opening a stream is retried;
/// once chunks have been delivered a failure ends the stream.
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn ModelHandle>,
    params: GenerationParams,
    retry: RetryPolicy,
    timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(
        model: Arc<dyn ModelHandle>,
        params: GenerationParams,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            params,
            retry,
            timeout,
        }
    }

    pub fn from_settings(model: Arc<dyn ModelHandle>, settings: &Settings) -> Self {
        Self::new(
            model,
            GenerationParams::from_settings(settings),
            RetryPolicy::new(settings.max_retries),
            settings.model_timeout,
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &Arc<dyn ModelHandle> {
        &self.model
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Produce the complete answer for `prompt`.
    pub async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let start = Instant::now();
        let model = self.model.as_ref();
        let params = &self.params;
        let timeout = self.timeout;

        let answer = self
            .retry
            .run("generate", || async move {
                tokio::time::timeout(timeout, model.complete(prompt, params))
                    .await
                    .map_err(|_| ModelError::timed_out(timeout))?
            })
            .await?;

        tracing::info!(
            model = model.name(),
            chars = answer.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Answer generated"
        );
        Ok(answer)
    }

    /// Start a streamed answer for `prompt`.
    ///
    /// Failures before the first chunk are retried and returned here. Later
    /// failures arrive as the final item of the returned stream.
    pub async fn generate_stream(&self, prompt: &Prompt) -> Result<TokenStream, ModelError> {
        let model = self.model.as_ref();
        let params = &self.params;
        let timeout = self.timeout;

        let chunks = self
            .retry
            .run("generate_stream", || async move {
                tokio::time::timeout(timeout, model.stream(prompt, params))
                    .await
                    .map_err(|_| ModelError::timed_out(timeout))?
            })
            .await?;

        tracing::debug!(model = model.name(), "Answer stream opened");
        Ok(TokenStream::new(chunks, Some(timeout)))
    }
}

impl std::fmt::Debug for AnswerGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerGenerator")
            .field("model", &self.model.name())
            .field("params", &self.params)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}
