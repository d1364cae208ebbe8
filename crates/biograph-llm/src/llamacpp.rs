//! Client for a llama.cpp server (`llama-server`) hosting a local model.
//!
//! Uses the native `/completion` endpoint with the flattened prompt text.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use biograph_core::{Prompt, Settings};

use crate::error::{error_for_response, ModelError};
use crate::handle::{ChunkStream, GenerationParams, ModelHandle};
use crate::sse::{decode_stream, Delta};

pub struct LlamaCppModel {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest {
    prompt: String,
    /// -1 lets the server generate until the model stops.
    n_predict: i64,
    temperature: f32,
    stream: bool,
    cache_prompt: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

impl LlamaCppModel {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        connect_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ModelError::Unavailable(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ModelError> {
        Self::new(
            &settings.model_base_url,
            settings.api_key.as_deref(),
            &settings.model_name,
            settings.model_timeout,
        )
    }

    fn request_body(prompt: &Prompt, params: &GenerationParams, stream: bool) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.to_text(),
            n_predict: params.max_tokens.limit().map_or(-1, i64::from),
            temperature: params.temperature,
            stream,
            cache_prompt: true,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_completion(
        &self,
        body: &CompletionRequest,
    ) -> Result<reqwest::Response, ModelError> {
        let request = self
            .http
            .post(format!("{}/completion", self.base_url))
            .json(body);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(ModelError::from_transport)?;
        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelHandle for LlamaCppModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn ping(&self) -> Result<(), ModelError> {
        let request = self.http.get(format!("{}/health", self.base_url));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(ModelError::from_transport)?;
        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }
        Ok(())
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<String, ModelError> {
        let body = Self::request_body(prompt, params, false);
        let response = self.post_completion(&body).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::malformed("completion response", e))?;
        Ok(parsed.content)
    }

    async fn stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<ChunkStream, ModelError> {
        let body = Self::request_body(prompt, params, true);
        let response = self.post_completion(&body).await?;
        let bytes = response.bytes_stream().map_err(ModelError::from_transport);
        Ok(decode_stream(bytes, parse_stream_event))
    }
}

/// Streamed events end with a `stop: true` event carrying the timings.
fn parse_stream_event(payload: &str) -> Result<Delta, ModelError> {
    let chunk: CompletionResponse =
        serde_json::from_str(payload).map_err(|e| ModelError::malformed("stream event", e))?;
    if chunk.stop {
        return Ok(Delta::Done);
    }
    Ok(Delta::Text(chunk.content))
}
