//! `recap` binary: learn a replayable recipe from a captured session.
//!
//! Reads a `SessionRecording` JSON file (produced by an external recorder),
//! runs the full learning pipeline against live HTTP, and persists both the
//! per-stage artifacts and the final recipe.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use recap_artifacts::{ArtifactStore, SessionRecording};
use recap_common::observability::{init_logging, LogConfig};
use recap_config::{LlmConfig, RecapConfigLoader};
use recap_http::{HttpReplay, HttpReplayConfig};
use recap_llm::LlmClient;
use recap_pipeline::ReplayBudget;
use recap_recipes::RecipeStore;
use recap_runtime::{PipelineOptions, PipelineRunner};

#[derive(Parser, Debug)]
#[command(name = "recap", about = "Learn replayable API recipes from browser session recordings")]
struct Args {
    /// Path to a SessionRecording JSON file.
    #[arg(long)]
    recording: PathBuf,

    /// Task id under which artifacts are stored; generated when omitted.
    #[arg(long)]
    task_id: Option<String>,

    /// Optional config file (YAML); RECAP_ env vars override.
    #[arg(long, default_value = "recap.yaml")]
    config: PathBuf,

    /// Additional concrete parameter values for verification, as key=value.
    /// All occurrences combine into one extra example set.
    #[arg(long = "example", value_parser = parse_key_value)]
    examples: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = RecapConfigLoader::new().with_file(&args.config).load()?;
    init_logging(LogConfig::default())?;

    let artifacts_dir = cfg
        .artifacts_dir
        .clone()
        .unwrap_or_else(|| "./recap-artifacts".to_string());
    let recipes_dir = cfg
        .recipes_dir
        .clone()
        .unwrap_or_else(|| "./recap-recipes".to_string());

    let artifacts = ArtifactStore::new(&artifacts_dir);
    let recipes = RecipeStore::new(&recipes_dir)
        .with_context(|| format!("cannot open recipe directory {recipes_dir}"))?;

    let transport = Arc::new(HttpReplay::new(HttpReplayConfig::default())?);
    let llm = build_llm(&cfg).await?;

    let mut options = PipelineOptions::default();
    if let Some(budget) = cfg.minimizer {
        options.minimizer.budget = to_budget(budget);
    }
    if let Some(budget) = cfg.verifier {
        options.verifier.budget = to_budget(budget);
    }

    let raw = std::fs::read_to_string(&args.recording)
        .with_context(|| format!("cannot read {}", args.recording.display()))?;
    let recording: SessionRecording =
        serde_json::from_str(&raw).context("recording file does not match the expected schema")?;

    let extra_sets: Vec<BTreeMap<String, String>> = if args.examples.is_empty() {
        Vec::new()
    } else {
        vec![args.examples.iter().cloned().collect()]
    };

    let task_id = args
        .task_id
        .clone()
        .unwrap_or_else(|| format!("task-{}", uuid::Uuid::new_v4().simple()));

    let runner = PipelineRunner::new(artifacts, recipes, transport, llm, options);
    let outcome = runner.run(&task_id, recording, &extra_sets).await?;

    tracing::info!(
        task_id = %outcome.task_id,
        stage = outcome.stage_reached,
        status = ?outcome.verification_status,
        recipe = outcome.recipe_name.as_deref().unwrap_or("-"),
        "pipeline.done"
    );
    println!(
        "stage={} status={:?} recipe={} notes={}",
        outcome.stage_reached,
        outcome.verification_status,
        outcome.recipe_name.as_deref().unwrap_or("-"),
        outcome.notes
    );
    Ok(())
}

fn to_budget(cfg: recap_config::BudgetConfig) -> ReplayBudget {
    ReplayBudget {
        max_attempts: cfg.max_attempts,
        max_wall: std::time::Duration::from_secs(cfg.max_wall_seconds),
        pacing: std::time::Duration::from_millis(cfg.pacing_ms),
    }
}

async fn build_llm(cfg: &recap_config::RecapConfig) -> Result<Option<Arc<dyn LlmClient>>> {
    match &cfg.llm {
        None => Ok(None),
        Some(LlmConfig::Openai {
            model,
            auth_token,
            endpoint,
            ..
        }) => {
            let client = recap_llm::OpenAiClient::with_base_url(
                auth_token.clone(),
                model.clone(),
                &format!("{}/", endpoint.trim_end_matches('/')),
            )
            .map_err(|e| anyhow::anyhow!("openai client init failed: {e}"))?;
            Ok(Some(Arc::new(client)))
        }
        Some(LlmConfig::Ollama {
            model, endpoint, ..
        }) => {
            let client = recap_llm::OllamaClient::new(endpoint.clone(), model.clone())
                .await
                .map_err(|e| anyhow::anyhow!("ollama client init failed: {e}"))?;
            Ok(Some(Arc::new(client)))
        }
    }
}
