//! Shared replay bookkeeping for the minimizer and verifier.
//!
//! A session owns the attempt/wall-clock budget, the pacing sleep between
//! live replays, and the per-signature memo cache. Budget exhaustion is a
//! soft outcome: callers receive an evaluation with `budget_exhausted` set
//! as the error, never a panic or an `Err`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use recap_artifacts::{RecipeRequestSpec, ResponseType};
use recap_fingerprint::{fingerprint, fingerprint_similarity, Fingerprint};

use crate::{extract_data, request_signature, ReplayTransport};

pub const BUDGET_EXHAUSTED: &str = "budget_exhausted";

/// Attempt and wall-clock limits applied across every phase of a run.
#[derive(Debug, Clone, Copy)]
pub struct ReplayBudget {
    pub max_attempts: u32,
    pub max_wall: Duration,
    pub pacing: Duration,
}

impl Default for ReplayBudget {
    fn default() -> Self {
        Self {
            max_attempts: 24,
            max_wall: Duration::from_secs(30),
            pacing: Duration::from_millis(250),
        }
    }
}

/// Outcome of evaluating one candidate spec against the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEvaluation {
    pub ok: bool,
    pub http_status: u16,
    pub similarity: Option<f64>,
    pub error: Option<String>,
    pub excerpt: String,
}

pub struct ReplaySession<'a> {
    transport: &'a dyn ReplayTransport,
    budget: ReplayBudget,
    similarity_threshold: f64,
    cache: HashMap<String, ReplayEvaluation>,
    attempts: u32,
    started: Instant,
}

impl<'a> ReplaySession<'a> {
    pub fn new(
        transport: &'a dyn ReplayTransport,
        budget: ReplayBudget,
        similarity_threshold: f64,
    ) -> Self {
        Self {
            transport,
            budget,
            similarity_threshold,
            cache: HashMap::new(),
            attempts: 0,
            started: Instant::now(),
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.attempts >= self.budget.max_attempts || self.started.elapsed() >= self.budget.max_wall
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Replay a spec and compare its response shape against the baseline.
    ///
    /// Memoized by [`request_signature`]; a cache hit costs nothing against
    /// the budget. Non-JSON specs pass on any 2xx (status-only check).
    pub async fn evaluate(
        &mut self,
        spec: &RecipeRequestSpec,
        baseline_fp: &Fingerprint,
        max_depth: usize,
    ) -> ReplayEvaluation {
        let sig = request_signature(spec);
        if let Some(cached) = self.cache.get(&sig) {
            return cached.clone();
        }

        if self.budget_exhausted() {
            let evaluation = ReplayEvaluation {
                ok: false,
                http_status: 0,
                similarity: None,
                error: Some(BUDGET_EXHAUSTED.to_string()),
                excerpt: String::new(),
            };
            self.cache.insert(sig, evaluation.clone());
            return evaluation;
        }

        if self.attempts > 0 && !self.budget.pacing.is_zero() {
            tokio::time::sleep(self.budget.pacing).await;
        }

        self.attempts += 1;
        let outcome = self.transport.replay(spec).await;
        let evaluation = self.judge(spec, outcome, baseline_fp, max_depth);
        self.cache.insert(sig, evaluation.clone());
        evaluation
    }

    fn judge(
        &self,
        spec: &RecipeRequestSpec,
        outcome: crate::ReplayOutcome,
        baseline_fp: &Fingerprint,
        max_depth: usize,
    ) -> ReplayEvaluation {
        let excerpt = recap_sanitize::truncate(&outcome.body_text, 160);

        if !outcome.is_2xx() {
            return ReplayEvaluation {
                ok: false,
                http_status: outcome.http_status,
                similarity: Some(0.0),
                error: outcome.error,
                excerpt,
            };
        }

        if spec.response_type != ResponseType::Json {
            return ReplayEvaluation {
                ok: true,
                http_status: outcome.http_status,
                similarity: Some(1.0),
                error: None,
                excerpt: String::new(),
            };
        }

        let mut data: serde_json::Value = match serde_json::from_str(&outcome.body_text) {
            Ok(v) => v,
            Err(e) => {
                return ReplayEvaluation {
                    ok: false,
                    http_status: outcome.http_status,
                    similarity: Some(0.0),
                    error: Some(format!("json_parse_failed: {e}")),
                    excerpt,
                };
            }
        };

        if let Some(path) = &spec.extract_path {
            // Extraction mismatch must not sink the comparison; fall back to
            // the full body fingerprint.
            match extract_data(&data, path) {
                Ok(extracted) => data = extracted,
                Err(e) => {
                    tracing::debug!(error = %e, "replay.extract_failed");
                }
            }
        }

        let current_fp = fingerprint(&data, max_depth);
        let similarity = fingerprint_similarity(baseline_fp, &current_fp);
        ReplayEvaluation {
            ok: similarity >= self.similarity_threshold,
            http_status: outcome.http_status,
            similarity: Some(similarity),
            error: None,
            excerpt: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplayOutcome;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTransport {
        calls: AtomicU32,
        body: String,
        status: u16,
    }

    #[async_trait]
    impl ReplayTransport for CountingTransport {
        async fn replay(&self, _spec: &RecipeRequestSpec) -> ReplayOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ReplayOutcome {
                http_status: self.status,
                body_text: self.body.clone(),
                error: None,
            }
        }
    }

    fn spec(url: &str) -> RecipeRequestSpec {
        RecipeRequestSpec {
            url: url.into(),
            method: "GET".into(),
            headers: BTreeMap::new(),
            body_template: None,
            response_type: ResponseType::Json,
            extract_path: None,
            html_selectors: None,
            allowed_domains: vec![],
        }
    }

    fn fast_budget() -> ReplayBudget {
        ReplayBudget {
            max_attempts: 4,
            max_wall: Duration::from_secs(30),
            pacing: Duration::ZERO,
        }
    }

    fn baseline_of(body: &str) -> Fingerprint {
        fingerprint(&serde_json::from_str(body).unwrap(), 6)
    }

    #[tokio::test]
    async fn identical_specs_replay_once() {
        let transport = CountingTransport {
            calls: AtomicU32::new(0),
            body: r#"{"a": 1}"#.into(),
            status: 200,
        };
        let baseline = baseline_of(r#"{"a": 2}"#);
        let mut session = ReplaySession::new(&transport, fast_budget(), 0.85);

        let s = spec("https://e.com/x");
        let first = session.evaluate(&s, &baseline, 6).await;
        let second = session.evaluate(&s, &baseline, 6).await;

        assert_eq!(first, second);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(first.ok);
    }

    #[tokio::test]
    async fn exhausted_budget_yields_soft_failure() {
        let transport = CountingTransport {
            calls: AtomicU32::new(0),
            body: r#"{"a": 1}"#.into(),
            status: 200,
        };
        let baseline = baseline_of(r#"{"a": 1}"#);
        let mut session = ReplaySession::new(
            &transport,
            ReplayBudget {
                max_attempts: 1,
                ..fast_budget()
            },
            0.85,
        );

        session.evaluate(&spec("https://e.com/1"), &baseline, 6).await;
        let blocked = session.evaluate(&spec("https://e.com/2"), &baseline, 6).await;
        assert!(!blocked.ok);
        assert_eq!(blocked.error.as_deref(), Some(BUDGET_EXHAUSTED));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_2xx_scores_zero_similarity() {
        let transport = CountingTransport {
            calls: AtomicU32::new(0),
            body: "oops".into(),
            status: 503,
        };
        let baseline = baseline_of(r#"{"a": 1}"#);
        let mut session = ReplaySession::new(&transport, fast_budget(), 0.85);
        let eval = session.evaluate(&spec("https://e.com/x"), &baseline, 6).await;
        assert!(!eval.ok);
        assert_eq!(eval.similarity, Some(0.0));
        assert_eq!(eval.excerpt, "oops");
    }

    #[tokio::test]
    async fn malformed_json_is_a_failed_attempt() {
        let transport = CountingTransport {
            calls: AtomicU32::new(0),
            body: "<html>not json</html>".into(),
            status: 200,
        };
        let baseline = baseline_of(r#"{"a": 1}"#);
        let mut session = ReplaySession::new(&transport, fast_budget(), 0.85);
        let eval = session.evaluate(&spec("https://e.com/x"), &baseline, 6).await;
        assert!(!eval.ok);
        assert_eq!(eval.similarity, Some(0.0));
        assert!(eval.error.as_deref().unwrap().starts_with("json_parse_failed"));
    }

    #[tokio::test]
    async fn non_json_specs_pass_on_status_alone() {
        let transport = CountingTransport {
            calls: AtomicU32::new(0),
            body: "<html></html>".into(),
            status: 200,
        };
        let baseline = Fingerprint::new();
        let mut session = ReplaySession::new(&transport, fast_budget(), 0.85);
        let mut s = spec("https://e.com/x");
        s.response_type = ResponseType::Html;
        let eval = session.evaluate(&s, &baseline, 6).await;
        assert!(eval.ok);
        assert_eq!(eval.similarity, Some(1.0));
    }
}
