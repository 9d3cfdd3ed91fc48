//! Recipe verifier.
//!
//! Given a minimized request spec and the baseline fingerprint, replay the
//! request and decide whether the recipe can be promoted from draft to
//! verified:
//!
//! - Non-parameterized specs need N consecutive in-shape 2xx replays.
//! - Parameterized specs need at least two distinct concrete parameter sets
//!   (distinct by spec signature), one successful replay each; fewer sets
//!   yields `partial` with `NEEDS_SECOND_EXAMPLE_FOR_VERIFY`.

use std::collections::BTreeSet;

use chrono::Utc;
use recap_artifacts::{
    MinimizationResult, RecipeRequestSpec, VerificationAttempt, VerificationReport,
    VerificationStatus,
};
use recap_fingerprint::DEFAULT_MAX_DEPTH;
use recap_recipes::request_has_placeholders;

use crate::session::{ReplayBudget, ReplayEvaluation, ReplaySession};
use crate::{baseline_fingerprint, request_signature, ReplayTransport};

pub const NEEDS_SECOND_EXAMPLE_NOTE: &str = "error_code=NEEDS_SECOND_EXAMPLE_FOR_VERIFY";

#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    pub similarity_threshold: f64,
    pub required_consecutive_successes: u32,
    pub budget: ReplayBudget,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: recap_fingerprint::DEFAULT_SIMILARITY_THRESHOLD,
            required_consecutive_successes: 2,
            budget: ReplayBudget {
                max_attempts: 6,
                ..ReplayBudget::default()
            },
        }
    }
}

pub struct Verifier<'a> {
    session: ReplaySession<'a>,
    config: VerifierConfig,
}

impl<'a> Verifier<'a> {
    pub fn new(transport: &'a dyn ReplayTransport, config: VerifierConfig) -> Self {
        Self {
            session: ReplaySession::new(transport, config.budget, config.similarity_threshold),
            config,
        }
    }

    /// Verify a minimized spec, optionally with concrete parameter sets for
    /// templated requests.
    pub async fn verify(
        mut self,
        minimization: &MinimizationResult,
        parameter_sets: Option<&[RecipeRequestSpec]>,
    ) -> VerificationReport {
        let baseline = &minimization.baseline;
        let baseline_fp = baseline_fingerprint(baseline);
        let max_depth = if baseline.max_depth > 0 {
            baseline.max_depth as usize
        } else {
            DEFAULT_MAX_DEPTH
        };

        let primary = &minimization.minimized_request;

        if request_has_placeholders(primary) {
            return self
                .verify_parameterized(minimization, parameter_sets, &baseline_fp, max_depth)
                .await;
        }

        let mut attempts: Vec<VerificationAttempt> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut consecutive_ok = 0u32;

        while consecutive_ok < self.config.required_consecutive_successes
            && !self.session.budget_exhausted()
        {
            let live_before = self.session.attempts();
            let evaluation = self.session.evaluate(primary, &baseline_fp, max_depth).await;
            let was_live = self.session.attempts() > live_before;
            attempts.push(attempt_record(&evaluation));
            if evaluation.ok {
                consecutive_ok += 1;
            } else {
                consecutive_ok = 0;
                if !was_live {
                    // A memoized failure never changes; retrying would only
                    // spin until the wall clock runs out.
                    break;
                }
            }
        }

        let status = if consecutive_ok >= self.config.required_consecutive_successes {
            VerificationStatus::Passed
        } else {
            if self.session.budget_exhausted() {
                notes.push("budget exhausted before reaching consecutive success threshold".into());
            }
            VerificationStatus::Failed
        };

        VerificationReport::new(minimization.clone(), status, attempts, notes.join("; "))
    }

    async fn verify_parameterized(
        &mut self,
        minimization: &MinimizationResult,
        parameter_sets: Option<&[RecipeRequestSpec]>,
        baseline_fp: &recap_fingerprint::Fingerprint,
        max_depth: usize,
    ) -> VerificationReport {
        let mut attempts: Vec<VerificationAttempt> = Vec::new();
        let mut notes: Vec<String> = Vec::new();

        // Templated specs need concrete instantiations to replay.
        let concrete: Vec<&RecipeRequestSpec> = parameter_sets
            .unwrap_or_default()
            .iter()
            .filter(|spec| !request_has_placeholders(spec))
            .collect();
        let distinct: BTreeSet<String> =
            concrete.iter().map(|spec| request_signature(spec)).collect();

        if distinct.len() < 2 {
            notes.push(NEEDS_SECOND_EXAMPLE_NOTE.to_string());
        }
        if concrete.is_empty() {
            let notes = if notes.is_empty() {
                "missing concrete parameter sets".to_string()
            } else {
                notes.join("; ")
            };
            return VerificationReport::new(
                minimization.clone(),
                VerificationStatus::Partial,
                attempts,
                notes,
            );
        }

        let mut all_ok = true;
        for spec in &concrete {
            let evaluation = self.session.evaluate(spec, baseline_fp, max_depth).await;
            attempts.push(attempt_record(&evaluation));
            if !evaluation.ok {
                all_ok = false;
                break;
            }
        }

        let status = if all_ok && distinct.len() >= 2 && notes.is_empty() {
            VerificationStatus::Passed
        } else if all_ok {
            VerificationStatus::Partial
        } else {
            VerificationStatus::Failed
        };

        VerificationReport::new(minimization.clone(), status, attempts, notes.join("; "))
    }
}

fn attempt_record(evaluation: &ReplayEvaluation) -> VerificationAttempt {
    VerificationAttempt {
        timestamp: Utc::now(),
        ok: evaluation.ok,
        http_status: if evaluation.http_status != 0 {
            Some(evaluation.http_status)
        } else {
            None
        },
        similarity: evaluation.similarity,
        error: evaluation.error.clone(),
        output_excerpt: evaluation.excerpt.clone(),
    }
}
