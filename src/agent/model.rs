//! Text-completion backends for the reasoning loop.
//!
//! | Config Value | Backend | Endpoint |
//! |-------------|---------|----------|
//! | `"gemini"` | [`GeminiModel`] | `POST /v1beta/models/{model}:generateContent` |
//! | `"openai"` | [`OpenAIModel`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaModel`] | `POST /api/generate` |
//!
//! All backends share the retry policy in [`crate::http`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::http;

/// A model that continues a prompt, stopping at any of `stop`.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String>;
}

// ============ Gemini ============

/// Requires the `GOOGLE_API_KEY` environment variable.
pub struct GeminiModel {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiModel {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            model: config
                .model
                .strip_prefix("models/")
                .unwrap_or(&config.model)
                .to_string(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            api_key: http::api_key("GOOGLE_API_KEY")?,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ReasoningModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "stopSequences": stop,
            },
        });
        let endpoint = format!("{}/v1beta/models/{}:generateContent", self.url, self.model);

        let json = http::send_json_with_retry("Gemini API", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        parse_gemini_completion(&json)
    }
}

fn parse_gemini_completion(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidate parts"))?;

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI ============

/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIModel {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIModel {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key: http::api_key("OPENAI_API_KEY")?,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ReasoningModel for OpenAIModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "stop": stop,
        });
        let endpoint = format!("{}/v1/chat/completions", self.url);

        let json = http::send_json_with_retry("OpenAI API", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

pub struct OllamaModel {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ReasoningModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature, "stop": stop },
        });
        let endpoint = format!("{}/api/generate", self.url);

        let json = http::send_json_with_retry("Ollama API", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response"))
    }
}

/// Create the configured [`ReasoningModel`].
pub fn create_model(config: &AgentConfig) -> Result<Arc<dyn ReasoningModel>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => bail!("Unknown agent provider: {}", other),
    }
}
