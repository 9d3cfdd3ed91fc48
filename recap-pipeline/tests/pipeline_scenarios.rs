//! End-to-end minimizer and verifier behavior against a simulated endpoint.
//!
//! The fake transport stands in for a server that requires `Accept` and
//! `X-Requested-With` headers plus a non-empty `q` query param and otherwise
//! returns a stable JSON shape. Injecting it keeps every run deterministic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::TimeZone;
use recap_artifacts::{
    AnalysisResult, BaselineFingerprint, CandidateSet, RecipeRequestSpec, ResponseType,
    SessionRecording, SignalSet, ValidationResult, VerificationStatus,
};
use recap_pipeline::{
    capture_baseline, Minimizer, MinimizerConfig, ReplayBudget, ReplayOutcome, ReplayTransport,
    Verifier, VerifierConfig,
};
use recap_recipes::instantiate_spec;
use url::Url;

const STABLE_BODY: &str =
    r#"{"results":[{"title":"Python Engineer","company":"Acme"}],"count":1}"#;

/// Accepts only requests carrying the required headers and a non-empty `q`.
struct PickyServer {
    replays: AtomicU32,
}

impl PickyServer {
    fn new() -> Self {
        Self {
            replays: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ReplayTransport for PickyServer {
    async fn replay(&self, spec: &RecipeRequestSpec) -> ReplayOutcome {
        self.replays.fetch_add(1, Ordering::SeqCst);

        let has_accept = spec
            .headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("accept") && v == "application/json");
        let has_xrw = spec
            .headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("x-requested-with") && v == "XMLHttpRequest");
        let q_ok = Url::parse(&spec.url)
            .ok()
            .map(|u| {
                u.query_pairs()
                    .any(|(k, v)| k == "q" && !v.trim().is_empty())
            })
            .unwrap_or(false);

        if has_accept && has_xrw && q_ok {
            ReplayOutcome {
                http_status: 200,
                body_text: STABLE_BODY.to_string(),
                error: None,
            }
        } else {
            ReplayOutcome {
                http_status: 400,
                body_text: r#"{"error":"missing requirement"}"#.to_string(),
                error: None,
            }
        }
    }
}

/// A permissive endpoint that always answers with the stable shape.
struct StableServer;

#[async_trait]
impl ReplayTransport for StableServer {
    async fn replay(&self, _spec: &RecipeRequestSpec) -> ReplayOutcome {
        ReplayOutcome {
            http_status: 200,
            body_text: STABLE_BODY.to_string(),
            error: None,
        }
    }
}

fn validation_for(spec: &RecipeRequestSpec) -> ValidationResult {
    let recording = SessionRecording::new(
        "find python jobs",
        "found",
        vec![],
        vec![],
        vec![],
        chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        None,
    );
    let signals = SignalSet::new(recording, vec![]);
    let candidates = CandidateSet::new(signals, vec![]);
    let mut analysis = AnalysisResult::new(candidates);
    analysis.request_spec = Some(spec.clone());
    ValidationResult::new(analysis, true, vec![], vec![])
}

fn baseline_for(spec: &RecipeRequestSpec) -> BaselineFingerprint {
    capture_baseline(validation_for(spec), STABLE_BODY, 6).unwrap()
}

fn captured_spec() -> RecipeRequestSpec {
    let headers: BTreeMap<String, String> = [
        ("Accept", "application/json"),
        ("X-Requested-With", "XMLHttpRequest"),
        ("If-None-Match", "\"etag\""),
        ("Sec-Fetch-Site", "same-origin"),
        ("X-Extra", "debug"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    RecipeRequestSpec {
        url: "https://api.example.com/search?q=python&ts=1700000000&debug=1&_t=42".into(),
        method: "GET".into(),
        headers,
        body_template: None,
        response_type: ResponseType::Json,
        extract_path: None,
        html_selectors: None,
        allowed_domains: vec!["api.example.com".into()],
    }
}

fn fast_budget(max_attempts: u32) -> ReplayBudget {
    ReplayBudget {
        max_attempts,
        max_wall: std::time::Duration::from_secs(30),
        pacing: std::time::Duration::ZERO,
    }
}

#[tokio::test]
async fn minimizer_drops_noise_and_irrelevant_params() {
    let server = PickyServer::new();
    let spec = captured_spec();
    let baseline = baseline_for(&spec);

    let minimizer = Minimizer::new(
        &server,
        MinimizerConfig {
            budget: fast_budget(24),
            ..MinimizerConfig::default()
        },
    );
    let result = minimizer.minimize(&baseline, &spec).await;

    let minimized = &result.minimized_request;

    // Required header/param survive verbatim.
    assert_eq!(
        minimized.headers.get("Accept").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(
        minimized.headers.get("X-Requested-With").map(String::as_str),
        Some("XMLHttpRequest")
    );
    assert!(minimized.url.contains("q=python"));

    // Noise headers went in phase A, the extra header in phase B.
    assert!(!minimized.headers.contains_key("If-None-Match"));
    assert!(!minimized.headers.contains_key("Sec-Fetch-Site"));
    assert!(!minimized.headers.contains_key("X-Extra"));

    // Irrelevant query params are gone.
    assert!(!minimized.url.contains("ts="));
    assert!(!minimized.url.contains("debug="));
    assert!(!minimized.url.contains("_t="));

    // Invariant: method and response type never change.
    assert_eq!(minimized.method, result.original_request.method);
    assert_eq!(minimized.response_type, result.original_request.response_type);

    // Steps that removed something say so; steps that kept say the opposite.
    for step in &result.steps {
        if step.description.starts_with("removed") || step.description.starts_with("dropped") {
            assert!(step.changed, "{}", step.description);
        }
        if step.description.starts_with("kept") || step.description.starts_with("no ") {
            assert!(!step.changed, "{}", step.description);
        }
    }
}

#[tokio::test]
async fn minimizer_survives_budget_exhaustion() {
    let server = PickyServer::new();
    let spec = captured_spec();
    let baseline = baseline_for(&spec);

    let minimizer = Minimizer::new(
        &server,
        MinimizerConfig {
            budget: fast_budget(1),
            ..MinimizerConfig::default()
        },
    );
    let result = minimizer.minimize(&baseline, &spec).await;

    assert!(result.notes.contains("budget exhausted"));
    // Output stays coherent: the original q param is still present.
    assert!(result.minimized_request.url.contains("q=python"));
    assert_eq!(result.original_request, captured_spec());
}

#[tokio::test]
async fn verifier_passes_after_two_consecutive_successes() {
    let server = StableServer;
    let mut spec = captured_spec();
    spec.url = "https://api.example.com/search?q=python".into();
    let baseline = baseline_for(&spec);

    let minimization = recap_artifacts::MinimizationResult::new(
        baseline,
        spec.clone(),
        spec.clone(),
        vec![],
        String::new(),
    );

    let verifier = Verifier::new(
        &server,
        VerifierConfig {
            required_consecutive_successes: 2,
            budget: fast_budget(4),
            ..VerifierConfig::default()
        },
    );
    let report = verifier.verify(&minimization, None).await;

    assert_eq!(report.status, VerificationStatus::Passed);
    assert_eq!(report.attempts.len(), 2);
    assert!(report.attempts.iter().all(|a| a.ok));
}

#[tokio::test]
async fn verifier_fails_on_non_2xx() {
    let server = PickyServer::new();
    let mut spec = captured_spec();
    // Break the q requirement so the server rejects every replay.
    spec.url = "https://api.example.com/search?q=".into();
    let baseline = baseline_for(&spec);

    let minimization = recap_artifacts::MinimizationResult::new(
        baseline,
        spec.clone(),
        spec.clone(),
        vec![],
        String::new(),
    );

    let verifier = Verifier::new(
        &server,
        VerifierConfig {
            budget: fast_budget(4),
            ..VerifierConfig::default()
        },
    );
    let report = verifier.verify(&minimization, None).await;
    assert_eq!(report.status, VerificationStatus::Failed);
    assert!(!report.attempts.is_empty());
    assert!(report.attempts.iter().all(|a| !a.ok));
}

#[tokio::test]
async fn parameterized_verify_needs_two_distinct_examples() {
    let server = StableServer;
    let template = RecipeRequestSpec {
        url: "https://api.example.com/search?q={q}".into(),
        method: "GET".into(),
        headers: BTreeMap::new(),
        body_template: None,
        response_type: ResponseType::Json,
        extract_path: None,
        html_selectors: None,
        allowed_domains: vec!["api.example.com".into()],
    };
    let baseline = baseline_for(&template);
    let minimization = recap_artifacts::MinimizationResult::new(
        baseline,
        template.clone(),
        template.clone(),
        vec![],
        String::new(),
    );

    let one_set = {
        let mut params = BTreeMap::new();
        params.insert("q".to_string(), "hello".to_string());
        vec![instantiate_spec(&template, &params).unwrap()]
    };

    let verifier = Verifier::new(&server, VerifierConfig {
        budget: fast_budget(6),
        ..VerifierConfig::default()
    });
    let report = verifier.verify(&minimization, Some(&one_set)).await;
    assert_eq!(report.status, VerificationStatus::Partial);
    assert!(report.notes.contains("NEEDS_SECOND_EXAMPLE_FOR_VERIFY"));
    assert_eq!(report.attempts.len(), 1);

    // A second distinct set promotes the run to passed.
    let two_sets = {
        let mut sets = one_set.clone();
        let mut params = BTreeMap::new();
        params.insert("q".to_string(), "world".to_string());
        sets.push(instantiate_spec(&template, &params).unwrap());
        sets
    };

    let verifier = Verifier::new(&server, VerifierConfig {
        budget: fast_budget(6),
        ..VerifierConfig::default()
    });
    let report = verifier.verify(&minimization, Some(&two_sets)).await;
    assert_eq!(report.status, VerificationStatus::Passed);
    assert_eq!(report.attempts.len(), 2);
}

#[tokio::test]
async fn parameterized_verify_without_sets_is_partial() {
    let server = StableServer;
    let template = RecipeRequestSpec {
        url: "https://api.example.com/search?q={q}".into(),
        method: "GET".into(),
        headers: BTreeMap::new(),
        body_template: None,
        response_type: ResponseType::Json,
        extract_path: None,
        html_selectors: None,
        allowed_domains: vec![],
    };
    let baseline = baseline_for(&template);
    let minimization = recap_artifacts::MinimizationResult::new(
        baseline,
        template.clone(),
        template,
        vec![],
        String::new(),
    );

    let verifier = Verifier::new(&server, VerifierConfig::default());
    let report = verifier.verify(&minimization, None).await;
    assert_eq!(report.status, VerificationStatus::Partial);
    assert!(report.attempts.is_empty());
}
