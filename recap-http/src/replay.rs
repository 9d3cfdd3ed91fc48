//! Direct-execution replay transport.
//!
//! Executes a concrete [`RecipeRequestSpec`] over plain HTTP. Every call
//! re-validates the URL against the SSRF rules and the spec's own domain
//! allowlist before any bytes leave the process; failures surface as a
//! [`ReplayOutcome`] with status 0 and an error, which the minimizer and
//! verifier treat as a non-2xx attempt.

use std::time::Duration;

use async_trait::async_trait;
use recap_artifacts::RecipeRequestSpec;
use recap_pipeline::{ReplayOutcome, ReplayTransport};
use reqwest::{Client, Method};

use crate::ssrf::{validate_domain_allowed, validate_url_safe};

/// Response bodies are capped to keep huge API responses from exhausting
/// memory; the tail is dropped, not streamed.
pub const MAX_RESPONSE_SIZE: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct HttpReplayConfig {
    pub timeout: Duration,
    pub max_response_bytes: usize,
    /// Skip the SSRF address checks. Only for tests driving local fixture
    /// servers; the domain allowlist still applies.
    pub allow_private_addresses: bool,
}

impl Default for HttpReplayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_response_bytes: MAX_RESPONSE_SIZE,
            allow_private_addresses: false,
        }
    }
}

pub struct HttpReplay {
    client: Client,
    config: HttpReplayConfig,
}

impl HttpReplay {
    pub fn new(config: HttpReplayConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, config })
    }

    async fn execute(&self, spec: &RecipeRequestSpec) -> Result<ReplayOutcome, String> {
        if !self.config.allow_private_addresses {
            validate_url_safe(&spec.url)
                .await
                .map_err(|e| format!("ssrf blocked: {e}"))?;
        }
        validate_domain_allowed(&spec.url, &spec.allowed_domains)
            .map_err(|e| format!("domain not allowed: {e}"))?;

        let method = Method::from_bytes(spec.method.to_uppercase().as_bytes())
            .map_err(|_| format!("unsupported method {:?}", spec.method))?;

        tracing::debug!(
            method = %method,
            url = %recap_sanitize::sanitize_url(&spec.url, recap_sanitize::DEFAULT_MAX_URL_LEN),
            headers = spec.headers.len(),
            "replay.start"
        );

        let mut request = self
            .client
            .request(method, &spec.url)
            .timeout(self.config.timeout);
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body_template {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;

        let truncated = bytes.len() > self.config.max_response_bytes;
        let slice = if truncated {
            &bytes[..self.config.max_response_bytes]
        } else {
            &bytes[..]
        };
        if truncated {
            tracing::warn!(
                cap = self.config.max_response_bytes,
                actual = bytes.len(),
                "replay.response_truncated"
            );
        }

        Ok(ReplayOutcome {
            http_status: status,
            body_text: String::from_utf8_lossy(slice).to_string(),
            error: None,
        })
    }
}

#[async_trait]
impl ReplayTransport for HttpReplay {
    async fn replay(&self, spec: &RecipeRequestSpec) -> ReplayOutcome {
        match self.execute(spec).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::debug!(url = %spec.url, %error, "replay.failed");
                ReplayOutcome {
                    http_status: 0,
                    body_text: String::new(),
                    error: Some(error),
                }
            }
        }
    }
}
