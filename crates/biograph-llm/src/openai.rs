//! OpenAI-compatible chat completions client.
//!
//! Works against api.openai.com and any gateway exposing the same
//! `/chat/completions` and `/models` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use biograph_core::{Prompt, Settings};

use crate::error::{error_for_response, ModelError};
use crate::handle::{ChunkStream, GenerationParams, ModelHandle};
use crate::sse::{decode_stream, Delta};

pub struct OpenAiModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiModel {
    pub fn new(
        base_url: &str,
        api_key: &str,
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
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ModelError> {
        let api_key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::Authentication("no API key configured".to_string()))?;
        Self::new(
            &settings.model_base_url,
            api_key,
            &settings.model_name,
            settings.model_timeout,
        )
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a Prompt,
        params: &GenerationParams,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: prompt
                .messages()
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens.limit(),
            stream,
        }
    }

    async fn post_chat(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ModelError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ModelError::from_transport)?;

        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }
        Ok(response)
    }
}

/// Map one streamed event to a text delta.
pub(crate) fn parse_event(payload: &str) -> Result<Delta, ModelError> {
    if payload.trim() == "[DONE]" {
        return Ok(Delta::Done);
    }
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| ModelError::malformed("stream event", e))?;
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(ModelError::Unavailable(format!("stream aborted: {message}")));
    }
    let chunk: StreamChunk =
        serde_json::from_value(value).map_err(|e| ModelError::malformed("stream event", e))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .map(Delta::Text)
        .unwrap_or(Delta::Skip))
}

#[async_trait]
impl ModelHandle for OpenAiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn ping(&self) -> Result<(), ModelError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
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
        let body = self.request_body(prompt, params, false);
        let response = self.post_chat(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::malformed("completion response", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ModelError::malformed("completion response", "no choices"))
    }

    async fn stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<ChunkStream, ModelError> {
        let body = self.request_body(prompt, params, true);
        let response = self.post_chat(&body).await?;
        let bytes = response.bytes_stream().map_err(ModelError::from_transport);
        Ok(decode_stream(bytes, parse_event))
    }
}
