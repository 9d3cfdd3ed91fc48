//! Provider-agnostic LLM clients used by the recipe analyzer.
//!
//! The [`LlmClient`] trait exposes exactly what the analyzer needs: a single
//! prompt/response round trip. Concrete providers are feature-gated so
//! deployments compile only what they use.

pub mod traits;

#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use traits::{LlmClient, LlmError, LlmResponse};

#[cfg(feature = "ollama")]
pub use ollama::OllamaClient;
#[cfg(feature = "openai")]
pub use openai::OpenAiClient;
