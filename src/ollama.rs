//! Client for a local Ollama server.
//!
//! Two calls are used: `/api/embeddings` to turn text into a vector, and
//! `/api/generate` with streaming off for single-shot prompts.

use crate::config::OllamaConfig;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn generate(&self, prompt: &str, model: &str) -> Result<String>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    embed_model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            embed_model: config.embed_model.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl InferenceService for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = self.endpoint("/api/embeddings");
        let resp = self
            .client
            .post(&endpoint)
            .json(&EmbeddingRequest {
                model: &self.embed_model,
                prompt: text,
            })
            .send()
            .await
            .with_context(|| format!("Ollama request to {} failed", endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Ollama embeddings returned {}: {}", status, body);
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embeddings response")?;
        if parsed.embedding.is_empty() {
            bail!("Ollama returned an empty embedding for model {}", self.embed_model);
        }
        debug!("Embedded {} chars into {} dims", text.len(), parsed.embedding.len());
        Ok(parsed.embedding)
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        let endpoint = self.endpoint("/api/generate");
        let resp = self
            .client
            .post(&endpoint)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .with_context(|| format!("Ollama request to {} failed", endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Ollama generate ({}) returned {}: {}", model, status, body);
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama generate response")?;
        Ok(parsed.response)
    }
}
