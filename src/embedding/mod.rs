//! Embedding provider implementations.
//!
//! Concrete backends for [`EmbeddingProvider`]:
//! - **[`GeminiEmbeddings`]**: Google Generative Language API
//!   (`:batchEmbedContents` for passages, `:embedContent` for queries).
//! - **[`OpenAIEmbeddings`]**: `POST /v1/embeddings` on OpenAI or any
//!   compatible server.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the configured provider. The API
//! key is read from the environment at construction time.
//!
//! # Failures
//!
//! Providers never retry. Every failure is a
//! [`ProviderError`](docqa_core::ProviderError) tagged transient or fatal
//! (see [`crate::http`]); retry policy lives in ingestion and the engine.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::ProviderError;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::EmbeddingConfig;
use crate::http::{build_client, resolve_api_key, send_json};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Create the configured embedding provider.
///
/// # Errors
///
/// Returns an error for an unknown provider name or a missing API key.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let api_key = resolve_api_key(&config.provider, config.api_key_env.as_deref())?;
    let client = build_client(config.timeout_secs)?;
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiEmbeddings::new(
            client,
            api_key,
            &config.model,
            config.base_url.as_deref(),
        ))),
        "openai" => Ok(Arc::new(OpenAIEmbeddings::new(
            client,
            api_key,
            &config.model,
            config.base_url.as_deref(),
        ))),
        other => anyhow::bail!("Unknown embedding provider: '{}'", other),
    }
}

/// Prefix bare Gemini model ids with `models/`.
pub(crate) fn gemini_model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn parse_values(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|vals| vals.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

fn check_count(vectors: &[Vec<f32>], expected: usize, service: &str) -> Result<(), ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::fatal(format!(
            "{} returned {} embeddings for {} inputs",
            service,
            vectors.len(),
            expected
        )));
    }
    Ok(())
}

// ============ Gemini ============

/// Embedding provider for Google's Generative Language API.
///
/// Passages are embedded with task type `RETRIEVAL_DOCUMENT`, queries with
/// `RETRIEVAL_QUERY`.
pub struct GeminiEmbeddings {
    client: Client,
    api_key: String,
    /// Full model path, e.g. `"models/text-embedding-004"`.
    model: String,
    base_url: String,
}

impl GeminiEmbeddings {
    pub fn new(client: Client, api_key: String, model: &str, base_url: Option<&str>) -> Self {
        Self {
            client,
            api_key,
            model: gemini_model_path(model),
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn request_body(&self, texts: &[String]) -> Value {
        let requests: Vec<Value> = texts
            .iter()
            .map(|t| {
                json!({
                    "model": self.model,
                    "content": { "parts": [{ "text": t }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                })
            })
            .collect();
        json!({ "requests": requests })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/{}:batchEmbedContents", self.base_url, self.model);
        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(texts));
        let json = send_json(request, "Gemini").await?;
        let vectors = parse_gemini_batch(&json)?;
        check_count(&vectors, texts.len(), "Gemini")?;
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/{}:embedContent", self.base_url, self.model);
        let body = json!({
            "model": self.model,
            "content": { "parts": [{ "text": text }] },
            "taskType": "RETRIEVAL_QUERY",
        });
        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let json = send_json(request, "Gemini").await?;
        json.get("embedding")
            .and_then(|e| e.get("values"))
            .and_then(parse_values)
            .ok_or_else(|| ProviderError::fatal("Invalid Gemini response: missing embedding.values"))
    }
}

/// Extract `embeddings[].values` from a `batchEmbedContents` response.
fn parse_gemini_batch(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::fatal("Invalid Gemini response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|item| {
            item.get("values")
                .and_then(parse_values)
                .ok_or_else(|| ProviderError::fatal("Invalid Gemini response: missing values"))
        })
        .collect()
}

// ============ OpenAI ============

/// Embedding provider for `POST /v1/embeddings`.
pub struct OpenAIEmbeddings {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIEmbeddings {
    pub fn new(client: Client, api_key: String, model: &str, base_url: Option<&str>) -> Self {
        Self {
            client,
            api_key,
            model: model.to_string(),
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": texts }));
        let json = send_json(request, "OpenAI").await?;
        let vectors = parse_openai_response(&json)?;
        check_count(&vectors, texts.len(), "OpenAI")?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::fatal("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .and_then(parse_values)
            .ok_or_else(|| ProviderError::fatal("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_model_path() {
        assert_eq!(gemini_model_path("text-embedding-004"), "models/text-embedding-004");
        assert_eq!(
            gemini_model_path("models/gemini-embedding-001"),
            "models/gemini-embedding-001"
        );
    }

    #[test]
    fn test_gemini_request_body() {
        let provider = GeminiEmbeddings::new(Client::new(), "k".into(), "text-embedding-004", None);
        let body = provider.request_body(&["a".to_string(), "b".to_string()]);
        let requests = body["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1]["content"]["parts"][0]["text"], "b");
        assert_eq!(requests[0]["model"], "models/text-embedding-004");
        assert_eq!(requests[0]["taskType"], "RETRIEVAL_DOCUMENT");
    }

    #[test]
    fn test_parse_gemini_batch() {
        let json = json!({
            "embeddings": [
                { "values": [0.1, 0.2] },
                { "values": [0.3, 0.4] }
            ]
        });
        let vectors = parse_gemini_batch(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_gemini_batch_malformed() {
        let err = parse_gemini_batch(&json!({ "something": [] })).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [2.0, 2.0] },
                { "index": 0, "embedding": [1.0, 1.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_check_count_mismatch_is_fatal() {
        let err = check_count(&[vec![1.0]], 2, "Gemini").unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message.contains("1 embeddings for 2 inputs"));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let provider = OpenAIEmbeddings::new(
            Client::new(),
            "k".into(),
            "text-embedding-3-small",
            Some("http://127.0.0.1:9"),
        );
        assert!(provider.embed(&[]).await.unwrap().is_empty());
    }
}
