//! Full pipeline runs over a recorded session with an injected transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeZone;
use recap_artifacts::{
    ArtifactStore, BaselineFingerprint, MinimizationResult, NetworkRequest, NetworkResponse,
    RecipeRequestSpec, SessionRecording, VerificationReport, VerificationStatus,
};
use recap_pipeline::{ReplayOutcome, ReplayTransport};
use recap_recipes::{RecipeStatus, RecipeStore};
use recap_runtime::{artifact_names, PipelineOptions, PipelineOutcome, PipelineRunner};
use url::Url;

const STABLE_BODY: &str = r#"{"results":[{"title":"Python Engineer","company":"Acme"},{"title":"Backend Developer","company":"Beta"}],"count":2}"#;

/// Serves the jobs-search API shape for any non-empty `q`.
struct JobsApi;

#[async_trait]
impl ReplayTransport for JobsApi {
    async fn replay(&self, spec: &RecipeRequestSpec) -> ReplayOutcome {
        let q_ok = Url::parse(&spec.url)
            .ok()
            .map(|u| u.query_pairs().any(|(k, v)| k == "q" && !v.is_empty()))
            .unwrap_or(false);
        if q_ok {
            ReplayOutcome {
                http_status: 200,
                body_text: STABLE_BODY.to_string(),
                error: None,
            }
        } else {
            ReplayOutcome {
                http_status: 400,
                body_text: r#"{"error":"q required"}"#.to_string(),
                error: None,
            }
        }
    }
}

fn jobs_recording() -> SessionRecording {
    let api_url = "https://api.example.com/search?q=python+jobs&limit=20";
    let nav_url = "https://example.com/jobs";

    let doc_req = NetworkRequest {
        url: nav_url.into(),
        method: "GET".into(),
        headers: BTreeMap::new(),
        post_data: None,
        resource_type: "Document".into(),
        timestamp: 1.0,
        request_id: "d1".into(),
        initiator_url: String::new(),
    };
    let search_req = NetworkRequest {
        url: api_url.into(),
        method: "GET".into(),
        headers: [("Accept".to_string(), "application/json".to_string())]
            .into_iter()
            .collect(),
        post_data: None,
        resource_type: "xhr".into(),
        timestamp: 2.0,
        request_id: "r1".into(),
        initiator_url: nav_url.into(),
    };
    let search_resp = NetworkResponse {
        url: api_url.into(),
        status: 200,
        headers: [("Content-Length".to_string(), STABLE_BODY.len().to_string())]
            .into_iter()
            .collect(),
        body: Some(STABLE_BODY.to_string()),
        mime_type: "application/json".into(),
        timestamp: 2.2,
        request_id: "r1".into(),
        content_type: "application/json".into(),
        byte_length: STABLE_BODY.len() as u64,
        ttfb_ms: None,
        total_ms: None,
        json_key_sample: None,
    };

    let analytics_req = NetworkRequest {
        url: "https://www.google-analytics.com/collect?v=1&t=event".into(),
        method: "POST".into(),
        headers: BTreeMap::new(),
        post_data: Some("v=1".into()),
        resource_type: "fetch".into(),
        timestamp: 2.1,
        request_id: "r2".into(),
        initiator_url: nav_url.into(),
    };
    let analytics_resp = NetworkResponse {
        url: analytics_req.url.clone(),
        status: 204,
        headers: [("Content-Length".to_string(), "0".to_string())]
            .into_iter()
            .collect(),
        body: None,
        mime_type: "image/gif".into(),
        timestamp: 2.15,
        request_id: "r2".into(),
        content_type: "image/gif".into(),
        byte_length: 0,
        ttfb_ms: None,
        total_ms: None,
        json_key_sample: None,
    };

    SessionRecording::new(
        "Find python jobs",
        "Found jobs matching python query",
        vec![doc_req, search_req, analytics_req],
        vec![search_resp, analytics_resp],
        vec![nav_url.into()],
        chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        Some(chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 5).unwrap()),
    )
}

fn fast_options() -> PipelineOptions {
    let mut options = PipelineOptions::default();
    options.minimizer.budget.pacing = std::time::Duration::ZERO;
    options.verifier.budget.pacing = std::time::Duration::ZERO;
    options
}

fn runner(dir: &std::path::Path) -> PipelineRunner {
    let artifacts = ArtifactStore::new(dir.join("artifacts"));
    let recipes = RecipeStore::new(dir.join("recipes")).unwrap();
    PipelineRunner::new(artifacts, recipes, Arc::new(JobsApi), None, fast_options())
}

#[tokio::test]
async fn heuristic_pipeline_persists_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path());

    let outcome: PipelineOutcome = runner
        .run("jobs-1", jobs_recording(), &[])
        .await
        .expect("pipeline runs");

    assert_eq!(outcome.stage_reached, artifact_names::VERIFICATION);

    let artifacts = ArtifactStore::new(dir.path().join("artifacts"));
    for name in [
        artifact_names::RECORDING,
        artifact_names::SIGNALS,
        artifact_names::CANDIDATES,
        artifact_names::ANALYSIS,
        artifact_names::VALIDATION,
        artifact_names::BASELINE,
        artifact_names::MINIMIZATION,
        artifact_names::VERIFICATION,
    ] {
        assert!(artifacts.exists("jobs-1", name).unwrap(), "{name} missing");
    }

    // The lineage chain is embedded: the verification report reaches back to
    // the original task.
    let report: VerificationReport = artifacts
        .read("jobs-1", artifact_names::VERIFICATION)
        .unwrap();
    assert_eq!(
        report
            .minimization
            .baseline
            .validation
            .analysis
            .candidates
            .signals
            .recording
            .task,
        "Find python jobs"
    );
}

#[tokio::test]
async fn heuristic_recipe_is_saved_with_template_and_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path());

    let outcome = runner.run("jobs-2", jobs_recording(), &[]).await.unwrap();
    let name = outcome.recipe_name.expect("recipe saved");

    let store = RecipeStore::new(dir.path().join("recipes")).unwrap();
    let recipe = store.load(&name).expect("recipe loads");

    assert_eq!(recipe.request.method, "GET");
    assert_eq!(recipe.request.allowed_domains, vec!["api.example.com"]);
    assert!(recipe.request.url.contains("q={query}"));
    assert_eq!(recipe.parameters.len(), 1);
    assert_eq!(recipe.parameters[0].name, "query");
    assert_eq!(recipe.parameters[0].default.as_deref(), Some("python jobs"));
    assert!(!recipe.request.url.contains("google-analytics"));

    // One concrete example only: partial, waiting on a second.
    assert_eq!(outcome.verification_status, Some(VerificationStatus::Partial));
    assert!(outcome.notes.contains("NEEDS_SECOND_EXAMPLE_FOR_VERIFY"));
    assert_eq!(recipe.status, RecipeStatus::Draft);
}

#[tokio::test]
async fn second_example_promotes_to_verified() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path());

    let mut second = BTreeMap::new();
    second.insert("query".to_string(), "rust jobs".to_string());

    let outcome = runner
        .run("jobs-3", jobs_recording(), &[second])
        .await
        .unwrap();

    assert_eq!(outcome.verification_status, Some(VerificationStatus::Passed));

    let store = RecipeStore::new(dir.path().join("recipes")).unwrap();
    let recipe = store.load(&outcome.recipe_name.unwrap()).unwrap();
    assert_eq!(recipe.status, RecipeStatus::Verified);
}

#[tokio::test]
async fn minimization_artifacts_show_dropped_params() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path());
    runner.run("jobs-4", jobs_recording(), &[]).await.unwrap();

    let artifacts = ArtifactStore::new(dir.path().join("artifacts"));
    let minimization: MinimizationResult = artifacts
        .read("jobs-4", artifact_names::MINIMIZATION)
        .unwrap();

    // The picky server only needs `q`; `limit` is dropped.
    assert!(minimization.minimized_request.url.contains("q="));
    assert!(!minimization.minimized_request.url.contains("limit="));
    assert!(minimization
        .steps
        .iter()
        .any(|s| s.changed && s.description.contains("limit")));

    let baseline: BaselineFingerprint =
        artifacts.read("jobs-4", artifact_names::BASELINE).unwrap();
    assert_eq!(baseline.sample_count, 1);
    assert!(!baseline.entries.is_empty());
}
