//! End-to-end recipe-learning pipeline driver.
//!
//! Stages run strictly in sequence and every artifact is persisted before
//! the next stage starts, so a run can be resumed and audited:
//!
//! `recording → signals → candidates → analysis → validation → baseline →
//! minimization → verification`
//!
//! The heuristic analyzer short-circuits the LLM when its confidence gates
//! pass. The pipeline downgrades wherever it can still produce a meaningful
//! artifact; it only errors when persisting would be unsafe.

use std::collections::BTreeMap;
use std::sync::Arc;

use recap_analyze::analyzer::validate_analysis;
use recap_analyze::heuristic::try_build_heuristic_draft_from_candidates;
use recap_analyze::RecipeAnalyzer;
use recap_artifacts::{
    AnalysisResult, ArtifactStore, ArtifactStoreError, CandidateSet, RecipeRequestSpec,
    SessionRecording, SignalSet, VerificationStatus,
};
use recap_common::AnalysisRoute;
use recap_fingerprint::assist::generate_extract_path_candidates;
use recap_llm::LlmClient;
use recap_pipeline::{
    capture_baseline, BaselineError, Minimizer, MinimizerConfig, ReplayTransport, Verifier,
    VerifierConfig,
};
use recap_recipes::{
    instantiate_spec, params::merge_params, placeholder_names, Recipe, RecipeStatus, RecipeStore,
    RecipeStoreError,
};
use recap_signals::{extract_request_signals, rank_candidates, SignalOptions, DEFAULT_TOP_K};
use url::Url;

/// Artifact names, one per stage, in pipeline order.
pub mod artifact_names {
    pub const RECORDING: &str = "recording";
    pub const SIGNALS: &str = "signals";
    pub const CANDIDATES: &str = "candidates";
    pub const ANALYSIS: &str = "analysis";
    pub const VALIDATION: &str = "validation";
    pub const BASELINE: &str = "baseline";
    pub const MINIMIZATION: &str = "minimization";
    pub const VERIFICATION: &str = "verification";
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] ArtifactStoreError),

    #[error(transparent)]
    RecipeStore(#[from] RecipeStoreError),

    #[error(transparent)]
    Baseline(#[from] BaselineError),
}

/// How far a run got and what it produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub task_id: String,
    pub stage_reached: &'static str,
    pub route: Option<AnalysisRoute>,
    pub verification_status: Option<VerificationStatus>,
    pub recipe_name: Option<String>,
    pub notes: String,
}

#[derive(Clone)]
pub struct PipelineOptions {
    pub top_k: usize,
    pub signals: SignalOptions,
    pub minimizer: MinimizerConfig,
    pub verifier: VerifierConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            signals: SignalOptions::default(),
            minimizer: MinimizerConfig::default(),
            verifier: VerifierConfig::default(),
        }
    }
}

pub struct PipelineRunner {
    artifacts: ArtifactStore,
    recipes: RecipeStore,
    transport: Arc<dyn ReplayTransport>,
    llm: Option<Arc<dyn LlmClient>>,
    options: PipelineOptions,
}

impl PipelineRunner {
    pub fn new(
        artifacts: ArtifactStore,
        recipes: RecipeStore,
        transport: Arc<dyn ReplayTransport>,
        llm: Option<Arc<dyn LlmClient>>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            artifacts,
            recipes,
            transport,
            llm,
            options,
        }
    }

    /// Run the full pipeline for one recording.
    ///
    /// `extra_parameter_sets` supplies additional concrete parameter values
    /// for verification of templated recipes (the "second example").
    pub async fn run(
        &self,
        task_id: &str,
        recording: SessionRecording,
        extra_parameter_sets: &[BTreeMap<String, String>],
    ) -> Result<PipelineOutcome, PipelineError> {
        self.artifacts
            .write(task_id, artifact_names::RECORDING, &recording)?;

        let signals = extract_request_signals(&recording, self.options.signals);
        let signal_set = SignalSet::new(recording.clone(), signals);
        self.artifacts
            .write(task_id, artifact_names::SIGNALS, &signal_set)?;

        let candidates = rank_candidates(&recording, self.options.top_k, self.options.signals);
        let candidate_set = CandidateSet::new(signal_set, candidates);
        self.artifacts
            .write(task_id, artifact_names::CANDIDATES, &candidate_set)?;

        if candidate_set.candidates.is_empty() {
            let analysis = {
                let mut a = AnalysisResult::new(candidate_set);
                a.notes = "no api call candidates in recording".into();
                a
            };
            self.artifacts
                .write(task_id, artifact_names::ANALYSIS, &analysis)?;
            let validation = validate_analysis(analysis);
            self.artifacts
                .write(task_id, artifact_names::VALIDATION, &validation)?;
            return Ok(PipelineOutcome {
                task_id: task_id.to_string(),
                stage_reached: artifact_names::VALIDATION,
                route: None,
                verification_status: None,
                recipe_name: None,
                notes: "no api call candidates in recording".into(),
            });
        }

        // Analysis: heuristic short-circuit, then LLM.
        let (analysis, mut recipe, route) = self.analyze(&recording, candidate_set).await;
        self.artifacts
            .write(task_id, artifact_names::ANALYSIS, &analysis)?;

        let validation = validate_analysis(analysis);
        self.artifacts
            .write(task_id, artifact_names::VALIDATION, &validation)?;
        if !validation.ok {
            let notes = validation
                .errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Ok(PipelineOutcome {
                task_id: task_id.to_string(),
                stage_reached: artifact_names::VALIDATION,
                route: Some(route),
                verification_status: None,
                recipe_name: None,
                notes,
            });
        }

        // A concrete spec (defaults substituted) drives baseline capture and
        // minimization; the template itself stays in the recipe.
        let Some(template_spec) = validation.analysis.request_spec.clone() else {
            return Ok(PipelineOutcome {
                task_id: task_id.to_string(),
                stage_reached: artifact_names::VALIDATION,
                route: Some(route),
                verification_status: None,
                recipe_name: None,
                notes: "validation passed without a request spec".into(),
            });
        };
        let default_params = recipe
            .as_ref()
            .map(|r| merge_params(r, &BTreeMap::new()))
            .unwrap_or_default();
        let concrete_spec = instantiate_spec(&template_spec, &default_params)
            .unwrap_or_else(|_| template_spec.clone());

        let outcome = self.transport.replay(&concrete_spec).await;
        if !outcome.is_2xx() {
            tracing::warn!(
                status = outcome.http_status,
                error = outcome.error.as_deref().unwrap_or(""),
                "pipeline.baseline_replay_failed"
            );
            return Ok(PipelineOutcome {
                task_id: task_id.to_string(),
                stage_reached: artifact_names::VALIDATION,
                route: Some(route),
                verification_status: None,
                recipe_name: None,
                notes: format!(
                    "baseline replay failed with status {} {}",
                    outcome.http_status,
                    outcome.error.unwrap_or_default()
                ),
            });
        }

        let baseline = capture_baseline(
            validation,
            &outcome.body_text,
            recap_fingerprint::DEFAULT_MAX_DEPTH,
        )?;
        self.artifacts
            .write(task_id, artifact_names::BASELINE, &baseline)?;

        let minimizer = Minimizer::new(self.transport.as_ref(), self.options.minimizer);
        let minimization = minimizer.minimize(&baseline, &concrete_spec).await;
        self.artifacts
            .write(task_id, artifact_names::MINIMIZATION, &minimization)?;

        // Re-apply the minimizer's removals to the template the recipe keeps.
        if let Some(recipe) = recipe.as_mut() {
            recipe.request = apply_minimization_to_template(
                &recipe.request,
                &minimization.original_request,
                &minimization.minimized_request,
            );
        }

        // Verification: the template is parameterized when placeholders
        // remain; concrete sets come from defaults plus caller examples.
        let verification_target = recipe
            .as_ref()
            .map(|r| r.request.clone())
            .unwrap_or_else(|| minimization.minimized_request.clone());
        let parameter_sets =
            self.build_parameter_sets(&verification_target, recipe.as_ref(), extra_parameter_sets);

        let verification_minimization = {
            let mut m = minimization.clone();
            m.minimized_request = verification_target;
            m
        };
        let verifier = Verifier::new(self.transport.as_ref(), self.options.verifier);
        let report = verifier
            .verify(
                &verification_minimization,
                if parameter_sets.is_empty() {
                    None
                } else {
                    Some(&parameter_sets)
                },
            )
            .await;
        self.artifacts
            .write(task_id, artifact_names::VERIFICATION, &report)?;

        let recipe_name = match recipe {
            Some(mut recipe) => {
                if report.status == VerificationStatus::Passed {
                    recipe.status = RecipeStatus::Verified;
                }
                self.recipes.save(&mut recipe, false)?;
                Some(recipe.name)
            }
            None => None,
        };

        Ok(PipelineOutcome {
            task_id: task_id.to_string(),
            stage_reached: artifact_names::VERIFICATION,
            route: Some(route),
            verification_status: Some(report.status),
            recipe_name,
            notes: report.notes,
        })
    }

    async fn analyze(
        &self,
        recording: &SessionRecording,
        candidate_set: CandidateSet,
    ) -> (AnalysisResult, Option<Recipe>, AnalysisRoute) {
        if let Some(draft) = try_build_heuristic_draft_from_candidates(
            recording,
            &candidate_set.candidates,
            recap_analyze::heuristic::HIGH_CONFIDENCE_MIN_SCORE,
            recap_analyze::heuristic::HIGH_CONFIDENCE_MIN_GAP,
        ) {
            tracing::info!(
                score = draft.chosen.score,
                gap = draft.score_gap,
                "pipeline.heuristic_draft"
            );
            let mut analysis = AnalysisResult::new(candidate_set);
            analysis.request_spec = Some(draft.recipe.request.clone());
            analysis.selected_rank = Some(draft.chosen.rank);
            analysis.recipe_name_suggestion = Some(draft.recipe.name.clone());
            analysis.notes = format!(
                "heuristic draft: score={:.2} gap={:.2}",
                draft.chosen.score, draft.score_gap
            );
            return (analysis, Some(draft.recipe), AnalysisRoute::Heuristic);
        }

        let Some(llm) = &self.llm else {
            let mut analysis = AnalysisResult::new(candidate_set);
            analysis.notes = "heuristic gates failed and no llm configured".into();
            return (analysis, None, AnalysisRoute::Llm);
        };

        // Extract-path candidates for the top candidate's captured body.
        let extract_candidates = top_candidate_body(recording, &candidate_set)
            .and_then(|body| serde_json::from_str::<serde_json::Value>(&body).ok())
            .map(|value| generate_extract_path_candidates(&value, 20, 6))
            .unwrap_or_default();

        let analyzer = RecipeAnalyzer::new(llm.clone());
        let analysis = analyzer.analyze(candidate_set, &extract_candidates).await;
        let validation_preview = validate_analysis(analysis.clone());
        let recipe = recap_analyze::build_recipe_from_validation(&validation_preview);
        (analysis, recipe, AnalysisRoute::Llm)
    }

    fn build_parameter_sets(
        &self,
        template: &RecipeRequestSpec,
        recipe: Option<&Recipe>,
        extra: &[BTreeMap<String, String>],
    ) -> Vec<RecipeRequestSpec> {
        if placeholder_names(&template.url).is_empty()
            && template
                .body_template
                .as_deref()
                .map(|b| placeholder_names(b).is_empty())
                .unwrap_or(true)
        {
            return Vec::new();
        }

        let mut sets: Vec<RecipeRequestSpec> = Vec::new();
        if let Some(recipe) = recipe {
            let defaults = merge_params(recipe, &BTreeMap::new());
            if !defaults.is_empty() {
                if let Ok(spec) = instantiate_spec(template, &defaults) {
                    sets.push(spec);
                }
            }
            for params in extra {
                let merged = merge_params(recipe, params);
                if let Ok(spec) = instantiate_spec(template, &merged) {
                    sets.push(spec);
                }
            }
        } else {
            for params in extra {
                if let Ok(spec) = instantiate_spec(template, params) {
                    sets.push(spec);
                }
            }
        }
        sets
    }
}

/// Carry the minimizer's removals over to the templated request.
///
/// Headers absent from the minimized spec are dropped; query keys the
/// minimizer removed are dropped from the template unless their value holds
/// a placeholder.
fn apply_minimization_to_template(
    template: &RecipeRequestSpec,
    original: &RecipeRequestSpec,
    minimized: &RecipeRequestSpec,
) -> RecipeRequestSpec {
    let mut out = template.clone();
    out.headers = minimized.headers.clone();

    let minimized_keys: Vec<String> = query_keys_of(&minimized.url);
    let removed: Vec<String> = query_keys_of(&original.url)
        .into_iter()
        .filter(|k| !minimized_keys.contains(k))
        .collect();

    if let Ok(mut parsed) = Url::parse(&template.url) {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, v)| !removed.contains(&k.to_string()) || v.contains('{'))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            let query = kept
                .iter()
                .map(|(k, v)| {
                    if v.contains('{') {
                        format!("{}={}", encode_query(k), v)
                    } else {
                        format!("{}={}", encode_query(k), encode_query(v))
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            parsed.set_query(Some(&query));
        }
        out.url = parsed.to_string();
    }
    out
}

fn encode_query(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn query_keys_of(url: &str) -> Vec<String> {
    Url::parse(url)
        .map(|u| {
            let mut keys: Vec<String> = Vec::new();
            for (k, _) in u.query_pairs() {
                if !keys.contains(&k.to_string()) {
                    keys.push(k.to_string());
                }
            }
            keys
        })
        .unwrap_or_default()
}

fn top_candidate_body(recording: &SessionRecording, candidates: &CandidateSet) -> Option<String> {
    let top = candidates.candidates.first()?;
    let method = top.signal.method.to_uppercase();
    recording
        .api_calls()
        .into_iter()
        .find(|(req, _)| {
            req.method.to_uppercase() == method
                && recap_sanitize_url(&req.url) == top.signal.url
        })
        .and_then(|(_, resp)| resp.body.clone())
}

fn recap_sanitize_url(url: &str) -> String {
    recap_sanitize::sanitize_url(url, recap_sanitize::DEFAULT_MAX_URL_LEN)
}
