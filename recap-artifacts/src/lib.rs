//! Typed artifacts for the recipe-learning pipeline.
//!
//! Artifacts are persisted to disk and moved between stages. They are:
//!
//! - Strictly typed and strict at the persistence boundary
//!   (`deny_unknown_fields` everywhere)
//! - Immutable value records; a stage only ever produces the next artifact
//! - Self-identifying through a stored schema hash, checked on every read
//!
//! Lineage is by embedding: `CandidateSet` embeds the `SignalSet` it came
//! from, and so on down the chain, so a single leaf artifact transitively
//! identifies its entire history. Never replace this with back-references.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod schema;
pub mod store;

pub use recap_fingerprint::{JsonValueType, TypedJsonPath};
pub use store::{ArtifactStore, ArtifactStoreError};

/// A persisted pipeline artifact, identified by its own schema hash.
pub trait Artifact: Serialize + DeserializeOwned + JsonSchema {
    /// The compile-time schema hash for this artifact type.
    fn computed_schema_hash() -> &'static str;

    /// The schema hash stored inside this instance.
    fn stored_schema_hash(&self) -> &str;
}

macro_rules! impl_artifact {
    ($ty:ty) => {
        impl Artifact for $ty {
            fn computed_schema_hash() -> &'static str {
                static HASH: OnceLock<String> = OnceLock::new();
                HASH.get_or_init(crate::schema::schema_hash_for::<$ty>)
            }

            fn stored_schema_hash(&self) -> &str {
                &self.schema_hash
            }
        }
    };
}

/// One captured outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub initiator_url: String,
}

/// One captured response, paired with its request by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NetworkResponse {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// UTF-8 body capped at 32 KiB by the recorder, when captured at all.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub byte_length: u64,
    #[serde(default)]
    pub ttfb_ms: Option<f64>,
    #[serde(default)]
    pub total_ms: Option<f64>,
    /// Bounded sample of top-level JSON keys, at most 200 chars.
    #[serde(default)]
    pub json_key_sample: Option<String>,
}

/// Captured browser session used as the learning input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SessionRecording {
    pub schema_hash: String,
    pub task: String,
    pub result: String,
    #[serde(default)]
    pub requests: Vec<NetworkRequest>,
    #[serde(default)]
    pub responses: Vec<NetworkResponse>,
    #[serde(default)]
    pub navigation_urls: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}
impl_artifact!(SessionRecording);

impl SessionRecording {
    pub fn new(
        task: impl Into<String>,
        result: impl Into<String>,
        requests: Vec<NetworkRequest>,
        responses: Vec<NetworkResponse>,
        navigation_urls: Vec<String>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            task: task.into(),
            result: result.into(),
            requests,
            responses,
            navigation_urls,
            start_time,
            end_time,
        }
    }

    /// Pair requests with responses by `request_id`.
    ///
    /// Responses without a matching request are dropped; a response is paired
    /// with at most one request.
    pub fn api_calls(&self) -> Vec<(&NetworkRequest, &NetworkResponse)> {
        let mut responses_by_id: BTreeMap<&str, &NetworkResponse> = BTreeMap::new();
        for resp in &self.responses {
            responses_by_id.entry(resp.request_id.as_str()).or_insert(resp);
        }
        self.requests
            .iter()
            .filter(|req| !req.request_id.is_empty())
            .filter_map(|req| {
                responses_by_id
                    .get(req.request_id.as_str())
                    .map(|resp| (req, *resp))
            })
            .collect()
    }
}

/// Per-request signals derived from a recording (sanitized, bounded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RequestSignal {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub content_type: String,
    pub response_size_bytes: u64,
    pub structural_summary: String,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    pub request_timestamp: f64,
    pub response_timestamp: f64,
    pub initiator_page_url: String,
    pub resource_type: String,
}

/// Signals extracted from a `SessionRecording`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SignalSet {
    pub schema_hash: String,
    pub recording: SessionRecording,
    #[serde(default)]
    pub signals: Vec<RequestSignal>,
}
impl_artifact!(SignalSet);

impl SignalSet {
    pub fn new(recording: SessionRecording, signals: Vec<RequestSignal>) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            recording,
            signals,
        }
    }
}

/// Coarse reason labels for why a request is a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CandidateReason {
    StatusOk,
    JsonResponse,
    LargeResponse,
    UrlMatch,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RequestCandidate {
    /// 1-based position after ranking.
    pub rank: u32,
    /// Clamped to [0, 1].
    pub score: f64,
    pub reason: CandidateReason,
    pub signal: RequestSignal,
    #[serde(default)]
    pub notes: String,
}

/// Ranked candidate requests likely to be the "money request".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CandidateSet {
    pub schema_hash: String,
    pub signals: SignalSet,
    #[serde(default)]
    pub candidates: Vec<RequestCandidate>,
}
impl_artifact!(CandidateSet);

impl CandidateSet {
    pub fn new(signals: SignalSet, candidates: Vec<RequestCandidate>) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            signals,
            candidates,
        }
    }
}

/// Expected response encoding for a recipe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Json,
    Html,
    Text,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Json => "json",
            ResponseType::Html => "html",
            ResponseType::Text => "text",
        }
    }
}

/// Portable representation of how to reproduce the money request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecipeRequestSpec {
    /// May contain `{param}` placeholders with identifier-only names.
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<String>,
    #[serde(default = "default_response_type")]
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_selectors: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_response_type() -> ResponseType {
    ResponseType::Json
}

/// Analyzer output for selecting/extracting the recipe request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResult {
    pub schema_hash: String,
    pub candidates: CandidateSet,
    #[serde(default)]
    pub selected_rank: Option<u32>,
    #[serde(default)]
    pub request_spec: Option<RecipeRequestSpec>,
    #[serde(default)]
    pub recipe_name_suggestion: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub raw_llm_output: String,
}
impl_artifact!(AnalysisResult);

impl AnalysisResult {
    pub fn new(candidates: CandidateSet) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            candidates,
            selected_rank: None,
            request_spec: None,
            recipe_name_suggestion: None,
            notes: String::new(),
            raw_llm_output: String::new(),
        }
    }
}

/// Closed error codes for analysis/request-spec validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorCode {
    MissingRequest,
    InvalidUrl,
    DisallowedDomain,
    UnsupportedMethod,
    InvalidSelectors,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ValidationIssue {
    pub code: ValidationErrorCode,
    pub message: String,
}

/// Deterministic validation of analysis output and request spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ValidationResult {
    pub schema_hash: String,
    pub analysis: AnalysisResult,
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<ValidationIssue>,
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,
}
impl_artifact!(ValidationResult);

impl ValidationResult {
    pub fn new(
        analysis: AnalysisResult,
        ok: bool,
        errors: Vec<ValidationIssue>,
        warnings: Vec<ValidationIssue>,
    ) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            analysis,
            ok,
            errors,
            warnings,
        }
    }
}

/// Baseline response fingerprint for later comparison during verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BaselineFingerprint {
    pub schema_hash: String,
    pub validation: ValidationResult,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub entries: Vec<TypedJsonPath>,
    /// Number of real responses folded into this baseline, at least 1.
    #[serde(default)]
    pub sample_count: u32,
}
impl_artifact!(BaselineFingerprint);

fn default_max_depth() -> u32 {
    6
}

impl BaselineFingerprint {
    pub fn new(
        validation: ValidationResult,
        max_depth: u32,
        entries: Vec<TypedJsonPath>,
        sample_count: u32,
    ) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            validation,
            max_depth,
            entries,
            sample_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MinimizationStep {
    pub description: String,
    #[serde(default)]
    pub changed: bool,
}

/// Minimized request spec and the steps taken to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MinimizationResult {
    pub schema_hash: String,
    pub baseline: BaselineFingerprint,
    pub original_request: RecipeRequestSpec,
    pub minimized_request: RecipeRequestSpec,
    #[serde(default)]
    pub steps: Vec<MinimizationStep>,
    #[serde(default)]
    pub notes: String,
}
impl_artifact!(MinimizationResult);

impl MinimizationResult {
    pub fn new(
        baseline: BaselineFingerprint,
        original_request: RecipeRequestSpec,
        minimized_request: RecipeRequestSpec,
        steps: Vec<MinimizationStep>,
        notes: String,
    ) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            baseline,
            original_request,
            minimized_request,
            steps,
            notes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VerificationAttempt {
    pub timestamp: DateTime<Utc>,
    pub ok: bool,
    #[serde(default)]
    pub http_status: Option<u16>,
    /// Jaccard similarity in [0, 1], when a comparison was possible.
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output_excerpt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Partial,
}

/// Final verification results for a minimized recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VerificationReport {
    pub schema_hash: String,
    pub minimization: MinimizationResult,
    pub status: VerificationStatus,
    #[serde(default)]
    pub attempts: Vec<VerificationAttempt>,
    #[serde(default)]
    pub notes: String,
}
impl_artifact!(VerificationReport);

impl VerificationReport {
    pub fn new(
        minimization: MinimizationResult,
        status: VerificationStatus,
        attempts: Vec<VerificationAttempt>,
        notes: String,
    ) -> Self {
        Self {
            schema_hash: Self::computed_schema_hash().to_string(),
            minimization,
            status,
            attempts,
            notes,
        }
    }
}
