use crate::traits::{LlmClient, LlmResponse};
use async_trait::async_trait;
use recap_common::{RecapError, Result};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

const OLLAMA_CONNECTION_ERROR: &str = "No running Ollama server detected. Start it with: `ollama serve` (after installing). Install instructions: https://github.com/ollama/ollama";

/// Ollama client for local model inference.
///
/// Expects a running Ollama server (see https://github.com/ollama/ollama).
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a new client and verify the server is reachable.
    pub async fn new(base_url: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RecapError::Llm(format!("Failed to create HTTP client: {e}")))?;

        let ollama = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        };
        ollama.probe_server().await?;
        Ok(ollama)
    }

    async fn probe_server(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| RecapError::Llm(OLLAMA_CONNECTION_ERROR.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(RecapError::Llm(OLLAMA_CONNECTION_ERROR.to_string()))
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<LlmResponse> {
        let url = format!("{}/api/generate", self.base_url);

        let mut options = serde_json::Map::new();
        if let Some(t) = temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = max_tokens {
            options.insert("num_predict".into(), json!(n));
        }

        let mut payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": JsonValue::Object(options),
        });
        if let Some(system) = system_prompt {
            payload["system"] = json!(system);
        }

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RecapError::Llm(format!("Ollama request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(RecapError::Llm(format!(
                "Ollama returned HTTP {}",
                resp.status()
            )));
        }

        let val: JsonValue = resp
            .json()
            .await
            .map_err(|e| RecapError::Llm(format!("Failed to parse Ollama response: {e}")))?;

        let text = val
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(LlmResponse {
            text,
            model: Some(self.model.clone()),
            tokens_used: val
                .get("eval_count")
                .and_then(|c| c.as_u64())
                .map(|c| c as u32),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.probe_server().await.is_ok())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
