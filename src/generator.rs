//! Text-generation backend.
//!
//! The pipeline talks to the model through the [`Generator`] trait so that
//! tests can script responses. [`OllamaGenerator`] is the production
//! implementation: one non-streaming `POST /api/generate` per call.
//!
//! Timeouts are enforced twice: by the HTTP client, and by the pipeline
//! around every call, so a generator that never answers still maps to
//! [`GeneratorError::Timeout`].

use async_trait::async_trait;
use std::time::Duration;

use crate::config::GeneratorConfig;
use crate::error::GeneratorError;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model's raw text for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;

    /// Identifier used in logs.
    fn model_name(&self) -> &str;
}

/// Generator backed by a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        tracing::info!(url = %config.url, model = %config.model, "ollama generator ready");
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout(self.timeout)
                } else {
                    GeneratorError::Unavailable(format!(
                        "connection error (is Ollama running at {}?): {}",
                        self.url, e
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Unavailable(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeneratorError::Unavailable(format!("invalid Ollama response: {}", e)))?;

        parse_generate_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Runs one generator call under `timeout`. Dropping the returned future
/// aborts the in-flight call.
pub async fn generate_with_timeout(
    generator: &dyn Generator,
    prompt: &str,
    timeout: Duration,
) -> Result<String, GeneratorError> {
    match tokio::time::timeout(timeout, generator.generate(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(GeneratorError::Timeout(timeout)),
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String, GeneratorError> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            GeneratorError::Unavailable("invalid Ollama response: missing response field".into())
        })
}
