//! Chat generation models.
//!
//! - **[`GeminiChat`]**: `:generateContent` with a `systemInstruction` and
//!   the history mapped onto `user`/`model` roles.
//! - **[`OpenAIChat`]**: `POST /v1/chat/completions`.
//!
//! Both render `{context}` into the system prompt and treat an empty
//! completion as a fatal error.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use docqa_core::generation::{render_system_prompt, GenerationModel, GenerationRequest};
use docqa_core::models::Role;
use docqa_core::ProviderError;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::embedding::{gemini_model_path, GEMINI_BASE_URL, OPENAI_BASE_URL};
use crate::http::{build_client, resolve_api_key, send_json};

/// Create the configured generation model.
pub fn create_model(config: &GenerationConfig) -> Result<Arc<dyn GenerationModel>> {
    let api_key = resolve_api_key(&config.provider, config.api_key_env.as_deref())?;
    let client = build_client(config.timeout_secs)?;
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiChat {
            client,
            api_key,
            model: gemini_model_path(&config.model),
            base_url: base_url(config, GEMINI_BASE_URL),
            temperature: config.temperature,
        })),
        "openai" => Ok(Arc::new(OpenAIChat {
            client,
            api_key,
            model: config.model.clone(),
            base_url: base_url(config, OPENAI_BASE_URL),
            temperature: config.temperature,
        })),
        other => anyhow::bail!("Unknown generation provider: '{}'", other),
    }
}

fn base_url(config: &GenerationConfig, default: &str) -> String {
    config
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

fn non_empty(text: String, service: &str) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::fatal(format!("{} returned an empty completion", service)))
    } else {
        Ok(text)
    }
}

pub struct GeminiChat {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiChat {
    fn request_body(&self, request: &GenerationRequest<'_>) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": request.user_message }] }));

        json!({
            "systemInstruction": { "parts": [{ "text": render_system_prompt(request) }] },
            "contents": contents,
            "generationConfig": { "temperature": self.temperature },
        })
    }
}

#[async_trait]
impl GenerationModel for GeminiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, ProviderError> {
        let http = self
            .client
            .post(format!("{}/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(&request));
        let json = send_json(http, "Gemini").await?;
        non_empty(parse_gemini_text(&json)?, "Gemini")
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_text(json: &Value) -> Result<String, ProviderError> {
    if let Some(reason) = json
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(|r| r.as_str())
    {
        return Err(ProviderError::fatal(format!("Gemini blocked the prompt: {}", reason)));
    }
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| ProviderError::fatal("Invalid Gemini response: missing candidate parts"))?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

pub struct OpenAIChat {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAIChat {
    fn request_body(&self, request: &GenerationRequest<'_>) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": render_system_prompt(request) })];
        for m in request.history {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": m.content }));
        }
        messages.push(json!({ "role": "user", "content": request.user_message }));
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        })
    }
}

#[async_trait]
impl GenerationModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, ProviderError> {
        let http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request));
        let json = send_json(http, "OpenAI").await?;
        let text = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| ProviderError::fatal("Invalid OpenAI response: missing message content"))?;
        non_empty(text.to_string(), "OpenAI")
    }
}
