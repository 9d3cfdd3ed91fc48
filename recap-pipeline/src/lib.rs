//! Baseline capture, request minimization, and verification.
//!
//! These stages are pure state machines over an injected [`ReplayTransport`]:
//! swapping in a fake transport makes the whole pipeline deterministic in
//! tests. Replays are paced, budgeted (attempts + wall clock), and memoized
//! by a per-spec signature so identical candidates never execute twice.

use std::collections::BTreeMap;

use async_trait::async_trait;
use recap_artifacts::{BaselineFingerprint, RecipeRequestSpec};
use recap_fingerprint::{Fingerprint, TypedJsonPath};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub mod baseline;
pub mod minimize;
pub mod session;
pub mod verify;

pub use baseline::{capture_baseline, BaselineError};
pub use minimize::{Minimizer, MinimizerConfig};
pub use session::{ReplayBudget, ReplayEvaluation, ReplaySession};
pub use verify::{Verifier, VerifierConfig};

/// What one replay of a request spec produced.
///
/// `http_status` 0 with a non-empty `error` means the replay did not produce
/// a server response at all (transport failure, SSRF refusal, timeout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub http_status: u16,
    pub body_text: String,
    pub error: Option<String>,
}

impl ReplayOutcome {
    pub fn is_2xx(&self) -> bool {
        (200..300).contains(&self.http_status)
    }
}

/// Injected transport executing a concrete request spec.
///
/// The pipeline assumes nothing about how the request is made, only that
/// `body_text` is UTF-8 decoded.
#[async_trait]
pub trait ReplayTransport: Send + Sync {
    async fn replay(&self, spec: &RecipeRequestSpec) -> ReplayOutcome;
}

/// Stable signature of a spec, used as the replay memo key and as the
/// notion of "distinct parameter set" during verification.
pub fn request_signature(spec: &RecipeRequestSpec) -> String {
    let headers: BTreeMap<&str, &str> = spec
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let payload = serde_json::json!({
        "url": spec.url,
        "method": spec.method,
        "headers": headers,
        "body_template": spec.body_template,
        "response_type": spec.response_type.as_str(),
        "extract_path": spec.extract_path,
        "html_selectors": spec.html_selectors,
    });
    let encoded = serde_json::to_string(&payload).unwrap_or_default();
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

/// Evaluate a JMESPath expression against a JSON value.
pub fn extract_data(value: &Value, expression: &str) -> Result<Value, String> {
    let compiled = jmespath::compile(expression).map_err(|e| e.to_string())?;
    let data = jmespath::Variable::from_serializable(value).map_err(|e| e.to_string())?;
    let result = compiled.search(data).map_err(|e| e.to_string())?;
    serde_json::to_value(&*result).map_err(|e| e.to_string())
}

/// Rebuild the set form of a persisted baseline fingerprint.
pub fn baseline_fingerprint(baseline: &BaselineFingerprint) -> Fingerprint {
    baseline.entries.iter().cloned().collect()
}

/// Sorted, deterministic entry list for persisting a fingerprint.
pub fn fingerprint_entries(fp: &Fingerprint) -> Vec<TypedJsonPath> {
    fp.iter().cloned().collect()
}
