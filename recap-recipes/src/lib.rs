//! Recipe model and persistence.
//!
//! A recipe is the finalized output of the learning pipeline: one portable
//! request spec plus the metadata a runner needs to execute it directly.
//! Recipes are machine-generated from successful learning sessions, not
//! manually authored.
//!
//! - [`Recipe`]: identity, request spec, declared parameters, status, stats
//! - [`params`]: parameter merging and the public-parameter allowlist
//! - [`store`]: slug-keyed, atomically-persisted TOML records

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub mod params;
pub mod store;

pub use recap_artifacts::{RecipeRequestSpec, ResponseType};
pub use store::{RecipeStore, RecipeStoreError};

/// Percent-encoding for path parameter substitution: everything except
/// unreserved characters is escaped.
const PATH_PARAM_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'-');

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^}]+)\}").expect("valid regex"))
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Where a declared parameter is substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterSource {
    Url,
    Query,
    Body,
    Header,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeParameter {
    pub name: String,
    #[serde(default = "default_param_type")]
    pub r#type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_param_source")]
    pub source: ParameterSource,
}

fn default_param_type() -> String {
    "string".to_string()
}

fn default_param_source() -> ParameterSource {
    ParameterSource::Query
}

/// How a runner should recover when authentication has expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthRecovery {
    #[serde(default = "default_trigger_statuses")]
    pub trigger_on_status: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_on_body: Option<String>,
    pub recovery_page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_indicator: Option<String>,
}

fn default_trigger_statuses() -> Vec<u16> {
    vec![401, 403]
}

impl AuthRecovery {
    /// Whether a failed replay should trigger navigation to the recovery page.
    pub fn should_recover(&self, http_status: u16, body: Option<&str>) -> bool {
        if self.trigger_on_status.contains(&http_status) {
            return true;
        }
        if let (Some(needle), Some(haystack)) = (&self.trigger_on_body, body) {
            return haystack.to_lowercase().contains(&needle.to_lowercase());
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeStatus {
    Draft,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeDifficulty {
    Easy,
    Medium,
    Hard,
}

/// Finalized, persistable recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    /// Filesystem-safe slug; the store rewrites this on save.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub original_task: String,
    pub request: RecipeRequestSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_recovery: Option<AuthRecovery>,
    #[serde(default)]
    pub parameters: Vec<RecipeParameter>,
    #[serde(default = "default_status")]
    pub status: RecipeStatus,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: RecipeDifficulty,
    #[serde(default)]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_max_response_size")]
    pub max_response_size_bytes: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

fn default_status() -> RecipeStatus {
    RecipeStatus::Draft
}

fn default_category() -> String {
    "other".to_string()
}

fn default_difficulty() -> RecipeDifficulty {
    RecipeDifficulty::Medium
}

fn default_max_response_size() -> u64 {
    1_000_000
}

impl Recipe {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        original_task: impl Into<String>,
        request: RecipeRequestSpec,
        parameters: Vec<RecipeParameter>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            original_task: original_task.into(),
            request,
            auth_recovery: None,
            parameters,
            status: RecipeStatus::Draft,
            category: default_category(),
            subcategory: String::new(),
            tags: Vec::new(),
            difficulty: RecipeDifficulty::Medium,
            rate_limit_delay_ms: 0,
            max_response_size_bytes: default_max_response_size(),
            created_at: Utc::now(),
            last_used: None,
            success_count: 0,
            failure_count: 0,
        }
    }
}

/// List placeholder names appearing in a template string, in order.
pub fn placeholder_names(template: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

pub fn is_valid_identifier(name: &str) -> bool {
    identifier_re().is_match(name)
}

/// Whether a request spec still contains `{param}` placeholders.
pub fn request_has_placeholders(spec: &RecipeRequestSpec) -> bool {
    if placeholder_re().is_match(&spec.url) {
        return true;
    }
    spec.body_template
        .as_deref()
        .is_some_and(|b| placeholder_re().is_match(b))
}

/// Build a concrete URL from a template with proper encoding.
///
/// - Path parameters are percent-encoded: `/users/{id}` → `/users/a%20b`.
/// - Query parameters are substituted verbatim and then form-encoded.
///
/// Unknown placeholders are left in place so the caller can detect them.
pub fn build_url(template: &str, params: &BTreeMap<String, String>) -> Result<String, url::ParseError> {
    let parsed = Url::parse(template)?;

    // The URL parser percent-encodes braces in paths, so match both the raw
    // `{id}` form and the `%7Bid%7D` form it produces.
    let mut path = parsed.path().to_string();
    for (key, value) in params {
        let encoded = utf8_percent_encode(value, PATH_PARAM_ENCODE).to_string();
        for placeholder in [
            format!("{{{key}}}"),
            format!("%7B{key}%7D"),
            format!("%7b{key}%7d"),
        ] {
            if path.contains(&placeholder) {
                path = path.replace(&placeholder, &encoded);
            }
        }
    }

    let query: Option<String> = if parsed.query().is_some() {
        let mut out = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in parsed.query_pairs() {
            let mut value = v.to_string();
            for (pk, pv) in params {
                let placeholder = format!("{{{pk}}}");
                if value.contains(&placeholder) {
                    value = value.replace(&placeholder, pv);
                }
            }
            out.append_pair(&k, &value);
        }
        Some(out.finish())
    } else {
        None
    };

    let mut rebuilt = parsed;
    rebuilt.set_path(&path);
    rebuilt.set_query(query.as_deref());
    Ok(rebuilt.to_string())
}

/// Substitute placeholders into a concrete spec (URL and body template).
pub fn instantiate_spec(
    spec: &RecipeRequestSpec,
    params: &BTreeMap<String, String>,
) -> Result<RecipeRequestSpec, url::ParseError> {
    let mut out = spec.clone();
    out.url = build_url(&spec.url, params)?;
    if let Some(body) = &spec.body_template {
        let mut body = body.clone();
        for (k, v) in params {
            body = body.replace(&format!("{{{k}}}"), v);
        }
        out.body_template = Some(body);
    }
    Ok(out)
}
