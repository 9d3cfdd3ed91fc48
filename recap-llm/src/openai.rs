use crate::traits::{LlmClient, LlmResponse};
use async_trait::async_trait;
use recap_common::{RecapError, Result};
use recap_http::{HttpClient, HttpError};
use serde::{Deserialize, Serialize};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";

pub struct OpenAiClient {
    client: HttpClient,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ResponsesApiRequest {
    model: String,
    input: String,
    instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ResponsesApiResponse {
    pub model: String,
    #[serde(default)]
    pub output: Vec<ResponseMessage>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

/// One element in the `output` array.
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    pub content: Vec<ResponseContent>,
}

/// One part of the message `content`.
#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Self::with_base_url(api_key, model, OPENAI_API_BASE)
    }

    /// Point the client at a compatible endpoint (proxies, test servers).
    pub fn with_base_url(api_key: String, model: String, base_url: &str) -> Result<Self> {
        let client = HttpClient::new(base_url)
            .map_err(|e| RecapError::Llm(format!("HttpClient init failed: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<LlmResponse> {
        let instructions = system_prompt
            .unwrap_or("You are a precise API analyst. Output strict JSON only.")
            .to_string();

        let req = ResponsesApiRequest {
            model: self.model.clone(),
            input: prompt.to_string(),
            instructions,
            max_output_tokens: max_tokens,
            temperature,
        };

        let resp: ResponsesApiResponse = self
            .client
            .post_json("responses", Some(&self.api_key), &req)
            .await
            .map_err(http_to_recap)?;

        let text = resp
            .output
            .iter()
            .flat_map(|msg| &msg.content)
            .find(|c| c.kind == "output_text")
            .map(|c| c.text.clone())
            .unwrap_or_default();

        Ok(LlmResponse {
            text,
            model: Some(resp.model),
            tokens_used: resp.usage.and_then(|u| u.total_tokens),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        // Minimal round trip; failures degrade to "unavailable".
        match self
            .generate("Respond with just 'OK'", None, Some(5), Some(0.1))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {e}");
                Ok(false)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn http_to_recap(e: HttpError) -> RecapError {
    RecapError::Llm(format!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_empty_options() {
        let req = ResponsesApiRequest {
            model: "gpt-test".into(),
            input: "hi".into(),
            instructions: "sys".into(),
            max_output_tokens: None,
            temperature: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("max_output_tokens"));
        assert!(!json.contains("temperature"));
    }

    #[test]
    fn response_text_is_first_output_text() {
        let raw = r#"{
            "model": "gpt-test",
            "output": [
                {"content": [{"type": "reasoning", "text": "..."},
                             {"type": "output_text", "text": "{\"success\": true}"}]}
            ]
        }"#;
        let parsed: ResponsesApiResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .output
            .iter()
            .flat_map(|m| &m.content)
            .find(|c| c.kind == "output_text")
            .map(|c| c.text.clone())
            .unwrap();
        assert_eq!(text, "{\"success\": true}");
    }
}
