//! Recipe request minimizer.
//!
//! Given a baseline response fingerprint, reduce a captured request spec to
//! the smallest header/query set that still produces a similar-shaped
//! response:
//!
//! - Phase A: drop volatile/noise headers deterministically, no replays.
//! - Phase B: single-pass header elimination, one replay per proposal.
//! - Phase C: single-pass query-param elimination, volatile keys first.
//!
//! Budget exhaustion stops elimination but never corrupts the output; when
//! no removal proved safe the minimized spec equals the original. The
//! minimizer only ever removes keys, it never rewrites surviving values.

use recap_artifacts::{
    BaselineFingerprint, MinimizationResult, MinimizationStep, RecipeRequestSpec, ResponseType,
};
use url::Url;

use crate::session::{ReplayBudget, ReplaySession};
use crate::{baseline_fingerprint, ReplayTransport};

pub const VOLATILE_QUERY_PARAM_NAMES: &[&str] =
    &["_t", "timestamp", "ts", "nonce", "cache", "cb", "rand", "_"];

pub const VOLATILE_HEADER_NAMES: &[&str] = &["if-none-match", "if-modified-since", "x-request-id"];

pub const NOISE_HEADER_PREFIXES: &[&str] = &["sec-fetch-", "sec-ch-ua"];

pub const NOISE_HEADER_NAMES: &[&str] = &[
    "accept-encoding",
    "connection",
    "host",
    "content-length",
    "pragma",
    "cache-control",
    "user-agent",
    "origin",
    "referer",
];

#[derive(Debug, Clone, Copy)]
pub struct MinimizerConfig {
    pub similarity_threshold: f64,
    pub budget: ReplayBudget,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: recap_fingerprint::DEFAULT_SIMILARITY_THRESHOLD,
            budget: ReplayBudget::default(),
        }
    }
}

fn canonical_header_name(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

pub fn is_noise_header(name: &str) -> bool {
    let canonical = canonical_header_name(name);
    NOISE_HEADER_NAMES.contains(&canonical.as_str())
        || NOISE_HEADER_PREFIXES
            .iter()
            .any(|prefix| canonical.starts_with(prefix))
}

pub fn is_volatile_header(name: &str) -> bool {
    let canonical = canonical_header_name(name);
    VOLATILE_HEADER_NAMES.contains(&canonical.as_str()) || canonical.starts_with("x-trace-")
}

pub fn is_volatile_query_param(name: &str) -> bool {
    let n = name.trim().to_lowercase();
    VOLATILE_QUERY_PARAM_NAMES.contains(&n.as_str())
}

/// Distinct query keys of a URL, in first-seen order.
fn query_keys(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for (k, _) in parsed.query_pairs() {
        if !out.iter().any(|seen| seen == k.as_ref()) {
            out.push(k.to_string());
        }
    }
    out
}

/// Drop every pair whose key is in `keys_to_drop`. Returns the rewritten URL
/// and whether anything changed.
fn drop_query_keys(url: &str, keys_to_drop: &[&str]) -> (String, bool) {
    let Ok(mut parsed) = Url::parse(url) else {
        return (url.to_string(), false);
    };
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if pairs.is_empty() {
        return (url.to_string(), false);
    }
    let filtered: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(k, _)| !keys_to_drop.contains(&k.as_str()))
        .collect();
    if filtered.len() == pairs.len() {
        return (url.to_string(), false);
    }

    if filtered.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &filtered {
            serializer.append_pair(k, v);
        }
        let query = serializer.finish();
        parsed.set_query(Some(&query));
    }
    (parsed.to_string(), true)
}

/// Deterministic volatility hints for a captured request spec, exposed for
/// debugging and prompt context.
pub fn volatility_hints(request: &RecipeRequestSpec) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut volatile_params: Vec<String> = query_keys(&request.url)
        .into_iter()
        .filter(|k| is_volatile_query_param(k))
        .collect();
    volatile_params.sort();

    let mut volatile_headers: Vec<String> = request
        .headers
        .keys()
        .filter(|k| is_volatile_header(k))
        .cloned()
        .collect();
    volatile_headers.sort();

    let mut noise_headers: Vec<String> = request
        .headers
        .keys()
        .filter(|k| is_noise_header(k))
        .cloned()
        .collect();
    noise_headers.sort();

    (volatile_params, volatile_headers, noise_headers)
}

pub struct Minimizer<'a> {
    session: ReplaySession<'a>,
    config: MinimizerConfig,
}

impl<'a> Minimizer<'a> {
    pub fn new(transport: &'a dyn ReplayTransport, config: MinimizerConfig) -> Self {
        Self {
            session: ReplaySession::new(transport, config.budget, config.similarity_threshold),
            config,
        }
    }

    pub async fn minimize(
        mut self,
        baseline: &BaselineFingerprint,
        request: &RecipeRequestSpec,
    ) -> MinimizationResult {
        let mut steps: Vec<MinimizationStep> = Vec::new();
        let baseline_fp = baseline_fingerprint(baseline);
        let max_depth = baseline.max_depth as usize;

        let mut working = request.clone();

        // Phase A: deterministic volatility/noise filtering.
        let drop_headers: Vec<String> = working
            .headers
            .keys()
            .filter(|k| is_volatile_header(k) || is_noise_header(k))
            .cloned()
            .collect();
        if drop_headers.is_empty() {
            steps.push(MinimizationStep {
                description: "no volatile/noise headers to drop".into(),
                changed: false,
            });
        } else {
            for name in &drop_headers {
                working.headers.remove(name);
            }
            steps.push(MinimizationStep {
                description: format!("dropped {} volatile/noise headers", drop_headers.len()),
                changed: true,
            });
        }

        // Phase B: single-pass header elimination.
        let header_names: Vec<String> = working.headers.keys().cloned().collect();
        for header_name in header_names {
            if self.session.budget_exhausted() {
                break;
            }
            let mut candidate = working.clone();
            candidate.headers.remove(&header_name);

            let evaluation = self.session.evaluate(&candidate, &baseline_fp, max_depth).await;
            if evaluation.ok {
                working = candidate;
                steps.push(MinimizationStep {
                    description: format!("removed header {header_name:?}"),
                    changed: true,
                });
            } else {
                steps.push(MinimizationStep {
                    description: format!("kept header {header_name:?}"),
                    changed: false,
                });
            }
        }

        // Phase C: single-pass query-param elimination, volatile keys first.
        let keys = query_keys(&working.url);
        let (volatile_keys, stable_keys): (Vec<String>, Vec<String>) =
            keys.into_iter().partition(|k| is_volatile_query_param(k));
        for key in volatile_keys.into_iter().chain(stable_keys) {
            if self.session.budget_exhausted() {
                break;
            }
            let (candidate_url, changed) = drop_query_keys(&working.url, &[key.as_str()]);
            if !changed {
                continue;
            }
            let mut candidate = working.clone();
            candidate.url = candidate_url;

            let evaluation = self.session.evaluate(&candidate, &baseline_fp, max_depth).await;
            if evaluation.ok {
                working = candidate;
                steps.push(MinimizationStep {
                    description: format!("removed query param {key:?}"),
                    changed: true,
                });
            } else {
                steps.push(MinimizationStep {
                    description: format!("kept query param {key:?}"),
                    changed: false,
                });
            }
        }

        let mut notes: Vec<&str> = Vec::new();
        if self.session.budget_exhausted() {
            notes.push("budget exhausted before full minimization pass");
        }
        if request.response_type != ResponseType::Json {
            notes.push("non-json response_type, similarity checks are status-only");
        }

        tracing::info!(
            attempts = self.session.attempts(),
            steps = steps.len(),
            threshold = self.config.similarity_threshold,
            "minimize.finished"
        );

        MinimizationResult::new(
            baseline.clone(),
            request.clone(),
            working,
            steps,
            notes.join("; "),
        )
    }
}
