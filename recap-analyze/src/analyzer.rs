//! LLM-backed analyzer with strict output validation.
//!
//! The model's reply is untrusted JSON: it is parsed into a closed
//! [`AnalysisDraft`] (unknown fields are an error), then validated against
//! the closed rule set. Every failure path produces an `AnalysisResult`
//! without a request spec; nothing is silently repaired beyond case and
//! whitespace normalization.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use recap_artifacts::{
    AnalysisResult, CandidateSet, RecipeRequestSpec, ResponseType, ValidationErrorCode,
    ValidationIssue, ValidationResult,
};
use recap_llm::LlmClient;
use recap_recipes::{
    is_valid_identifier, params::apply_public_parameter_allowlist, placeholder_names,
    AuthRecovery, ParameterSource, Recipe, RecipeParameter,
};
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::prompts::{build_analysis_prompt, ANALYSIS_SYSTEM_PROMPT};

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"))
}

/// Strictly-typed wire format of the model's reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisDraft {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub selected_rank: Option<u32>,
    #[serde(default)]
    pub request: Option<DraftRequest>,
    #[serde(default)]
    pub parameters: Option<Vec<DraftParameter>>,
    #[serde(default)]
    pub auth_recovery: Option<DraftAuthRecovery>,
    #[serde(default)]
    pub recipe_name_suggestion: Option<String>,
    #[serde(default)]
    pub recipe_description: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub extract_path: Option<String>,
    #[serde(default)]
    pub html_selectors: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftParameter {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub r#type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftAuthRecovery {
    #[serde(default)]
    pub trigger_on_status: Option<Vec<u16>>,
    #[serde(default)]
    pub trigger_on_body: Option<String>,
    #[serde(default)]
    pub recovery_page: Option<String>,
    #[serde(default)]
    pub success_indicator: Option<String>,
}

/// Analyzer driving one LLM round trip per candidate set.
pub struct RecipeAnalyzer {
    llm: Arc<dyn LlmClient>,
}

impl RecipeAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Ask the model to pick the money request and shape a request spec.
    ///
    /// Every outcome is an artifact: parse or validation failures leave
    /// `request_spec` empty and explain themselves in `notes`.
    pub async fn analyze(
        &self,
        candidates: CandidateSet,
        extract_candidates: &[String],
    ) -> AnalysisResult {
        let prompt = build_analysis_prompt(
            &candidates.signals.recording.task,
            &candidates.signals.recording.result,
            &candidates.candidates,
            extract_candidates,
        );

        let mut analysis = AnalysisResult::new(candidates);

        let response = match self
            .llm
            .generate(&prompt, Some(ANALYSIS_SYSTEM_PROMPT), Some(1200), Some(0.1))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "analyze.llm_call_failed");
                analysis.notes = format!("llm call failed: {e}");
                return analysis;
            }
        };
        analysis.raw_llm_output = response.text.clone();

        let draft = match parse_analysis_output(&response.text) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(error = %e, "analyze.parse_failed");
                analysis.notes = format!("failed to parse llm output: {e}");
                return analysis;
            }
        };

        if !draft.success {
            analysis.notes = draft
                .reason
                .unwrap_or_else(|| "analysis reported no suitable api call".into());
            return analysis;
        }

        let issues = validate_draft(&draft);
        if !issues.is_empty() {
            analysis.notes = issues
                .iter()
                .map(|i| i.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return analysis;
        }

        // Safe after validation.
        analysis.request_spec = draft.request.as_ref().map(build_request_spec);
        analysis.selected_rank = draft.selected_rank;
        analysis.recipe_name_suggestion = draft.recipe_name_suggestion.clone();
        if let Some(reason) = draft.reason {
            analysis.notes = reason;
        }
        analysis
    }
}

/// Locate the JSON object in the reply, tolerating markdown fences.
pub fn parse_analysis_output(text: &str) -> Result<AnalysisDraft, String> {
    let trimmed = text.trim();
    let json_str = fenced_json_re()
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);
    serde_json::from_str::<AnalysisDraft>(json_str).map_err(|e| e.to_string())
}

/// Closed validation rules for a draft (spec-side, pure).
pub fn validate_draft(draft: &AnalysisDraft) -> Vec<ValidationIssue> {
    let mut issues: Vec<ValidationIssue> = Vec::new();
    let mut push = |code: ValidationErrorCode, message: String| {
        issues.push(ValidationIssue { code, message });
    };

    let Some(request) = &draft.request else {
        push(
            ValidationErrorCode::MissingRequest,
            "missing 'request' section".into(),
        );
        return issues;
    };

    let url_l = request.url.to_lowercase();
    if !url_l.starts_with("http://") && !url_l.starts_with("https://") {
        push(
            ValidationErrorCode::InvalidUrl,
            format!(
                "url must start with http:// or https://, got {:?}",
                request.url.chars().take(50).collect::<String>()
            ),
        );
    } else if Url::parse(&request.url).is_err() {
        push(
            ValidationErrorCode::InvalidUrl,
            "url does not parse".into(),
        );
    }

    for name in placeholder_names(&request.url) {
        if !is_valid_identifier(&name) {
            push(
                ValidationErrorCode::InvalidUrl,
                format!("invalid url placeholder {{{name}}}, must be an identifier"),
            );
        }
    }

    let method = request
        .method
        .as_deref()
        .unwrap_or("GET")
        .trim()
        .to_uppercase();
    if !ALLOWED_METHODS.contains(&method.as_str()) {
        push(
            ValidationErrorCode::UnsupportedMethod,
            format!("method {method:?} not in {ALLOWED_METHODS:?}"),
        );
    }

    let response_type = request
        .response_type
        .as_deref()
        .unwrap_or("json")
        .trim()
        .to_lowercase();
    if !matches!(response_type.as_str(), "json" | "html" | "text") {
        push(
            ValidationErrorCode::Other,
            format!("response_type {response_type:?} not in [json, html, text]"),
        );
    }
    if response_type == "html"
        && request
            .html_selectors
            .as_ref()
            .map(|s| s.is_empty())
            .unwrap_or(true)
    {
        push(
            ValidationErrorCode::InvalidSelectors,
            "response_type html requires non-empty html_selectors".into(),
        );
    }

    if let (Some(domains), Ok(parsed)) = (&request.allowed_domains, Url::parse(&request.url)) {
        if !domains.is_empty() {
            if let Some(host) = parsed.host_str() {
                let host = host.to_lowercase();
                let allowed = domains.iter().any(|d| {
                    let d = d.to_lowercase();
                    host == d || host.ends_with(&format!(".{d}"))
                });
                if !allowed {
                    push(
                        ValidationErrorCode::DisallowedDomain,
                        format!("url host {host:?} is outside allowed_domains"),
                    );
                }
            }
        }
    }

    for param in draft.parameters.iter().flatten() {
        if param.name.trim().is_empty() || !is_valid_identifier(param.name.trim()) {
            push(
                ValidationErrorCode::Other,
                format!("parameter name {:?} is not a valid identifier", param.name),
            );
        }
    }

    issues
}

/// Deterministic validation stage producing the persisted artifact.
pub fn validate_analysis(analysis: AnalysisResult) -> ValidationResult {
    let mut errors: Vec<ValidationIssue> = Vec::new();
    let warnings: Vec<ValidationIssue> = Vec::new();

    match &analysis.request_spec {
        None => {
            errors.push(ValidationIssue {
                code: ValidationErrorCode::MissingRequest,
                message: "analysis produced no request spec".into(),
            });
        }
        Some(spec) => {
            match Url::parse(&spec.url) {
                Err(_) => errors.push(ValidationIssue {
                    code: ValidationErrorCode::InvalidUrl,
                    message: "request url does not parse".into(),
                }),
                Ok(parsed) => {
                    if !matches!(parsed.scheme(), "http" | "https") {
                        errors.push(ValidationIssue {
                            code: ValidationErrorCode::InvalidUrl,
                            message: format!("scheme {:?} is not http(s)", parsed.scheme()),
                        });
                    }
                    if !parsed.username().is_empty() || parsed.password().is_some() {
                        errors.push(ValidationIssue {
                            code: ValidationErrorCode::InvalidUrl,
                            message: "request url carries credentials".into(),
                        });
                    }
                }
            }
            if !ALLOWED_METHODS.contains(&spec.method.to_uppercase().as_str()) {
                errors.push(ValidationIssue {
                    code: ValidationErrorCode::UnsupportedMethod,
                    message: format!("method {:?} unsupported", spec.method),
                });
            }
            if spec.response_type == ResponseType::Html
                && spec.html_selectors.as_ref().map(|s| s.is_empty()).unwrap_or(true)
            {
                errors.push(ValidationIssue {
                    code: ValidationErrorCode::InvalidSelectors,
                    message: "html response without selectors".into(),
                });
            }
        }
    }

    let ok = errors.is_empty();
    ValidationResult::new(analysis, ok, errors, warnings)
}

fn build_request_spec(request: &DraftRequest) -> RecipeRequestSpec {
    let host = Url::parse(&request.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string));
    let allowed_domains = match &request.allowed_domains {
        Some(domains) if !domains.is_empty() => domains.clone(),
        _ => host.into_iter().collect(),
    };
    let response_type = match request
        .response_type
        .as_deref()
        .unwrap_or("json")
        .trim()
        .to_lowercase()
        .as_str()
    {
        "html" => ResponseType::Html,
        "text" => ResponseType::Text,
        _ => ResponseType::Json,
    };

    RecipeRequestSpec {
        url: request.url.trim().to_string(),
        method: request
            .method
            .as_deref()
            .unwrap_or("GET")
            .trim()
            .to_uppercase(),
        headers: request.headers.clone().unwrap_or_default(),
        body_template: request.body_template.clone(),
        response_type,
        extract_path: request.extract_path.clone(),
        html_selectors: request.html_selectors.clone(),
        allowed_domains,
    }
}

/// Build the final recipe from a passing validation, applying the public
/// parameter allowlist.
pub fn build_recipe_from_validation(validation: &ValidationResult) -> Option<Recipe> {
    if !validation.ok {
        return None;
    }
    let analysis = &validation.analysis;
    let spec = analysis.request_spec.clone()?;
    let recording = &analysis.candidates.signals.recording;

    let draft = parse_analysis_output(&analysis.raw_llm_output).ok();
    let parameters = draft
        .as_ref()
        .and_then(|d| d.parameters.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|p| RecipeParameter {
            name: p.name.trim().to_string(),
            r#type: p.r#type.unwrap_or_else(|| "string".into()),
            required: p.required.unwrap_or(false),
            default: p.default.map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            description: p.description.unwrap_or_default(),
            source: match p.source.as_deref() {
                Some("url") => ParameterSource::Url,
                Some("body") => ParameterSource::Body,
                Some("header") => ParameterSource::Header,
                _ => ParameterSource::Query,
            },
        })
        .collect();

    let auth_recovery = draft.as_ref().and_then(|d| d.auth_recovery.as_ref()).and_then(|a| {
        let recovery_page = a.recovery_page.clone()?;
        if recovery_page.trim().is_empty() {
            return None;
        }
        Some(AuthRecovery {
            trigger_on_status: a.trigger_on_status.clone().unwrap_or_else(|| vec![401, 403]),
            trigger_on_body: a.trigger_on_body.clone(),
            recovery_page,
            success_indicator: a.success_indicator.clone(),
        })
    });

    let name = analysis
        .recipe_name_suggestion
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| {
            recording
                .task
                .to_lowercase()
                .chars()
                .take(30)
                .map(|c| if c.is_alphanumeric() { c } else { '-' })
                .collect()
        });

    let description = draft
        .as_ref()
        .and_then(|d| d.recipe_description.clone())
        .unwrap_or_else(|| recording.task.clone());

    let mut recipe = Recipe::new(name, description, recording.task.clone(), spec, parameters);
    recipe.auth_recovery = auth_recovery;
    apply_public_parameter_allowlist(&mut recipe);
    Some(recipe)
}
