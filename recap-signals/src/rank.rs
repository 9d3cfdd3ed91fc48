//! Candidate ranking for recipe learning.
//!
//! Produces a small set of best-guess API call candidates from a recording.
//! Intentionally heuristic and deterministic: no I/O, no LLM calls. Calling
//! [`rank_candidates`] twice on the same recording yields identical URLs,
//! scores, and ranks.

use recap_artifacts::{CandidateReason, RequestCandidate, RequestSignal, SessionRecording};
use url::Url;

use crate::{extract_request_signals, SignalOptions};

pub const DEFAULT_TOP_K: usize = 5;

const TRACKER_HOST_SUBSTRINGS: &[&str] = &[
    "google-analytics.com",
    "doubleclick.net",
    "googletagmanager.com",
    "segment.com",
    "sentry.io",
    "datadoghq.com",
    "mixpanel.com",
    "amplitude.com",
    "hotjar.com",
];

/// Rank candidate API calls for recipe extraction.
pub fn rank_candidates(
    recording: &SessionRecording,
    top_k: usize,
    options: SignalOptions,
) -> Vec<RequestCandidate> {
    let signals = extract_request_signals(recording, options);
    let mut scored: Vec<(f64, RequestSignal, String)> = signals
        .into_iter()
        .map(|sig| {
            let (score, notes) = score_signal(&sig);
            (score, sig, notes)
        })
        .collect();

    // Higher score first; ties go to the most recent response. Fully equal
    // entries fall back to the shorter URL so cache-busted duplicates never
    // displace the clean call, then lexicographic order for determinism.
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.1.response_timestamp
                    .partial_cmp(&a.1.response_timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.1.url.len().cmp(&b.1.url.len()))
            .then_with(|| a.1.url.cmp(&b.1.url))
    });

    if top_k > 0 {
        scored.truncate(top_k);
    }

    scored
        .into_iter()
        .enumerate()
        .map(|(idx, (score, signal, notes))| RequestCandidate {
            rank: (idx + 1) as u32,
            score,
            reason: primary_reason(&signal),
            signal,
            notes,
        })
        .collect()
}

fn primary_reason(sig: &RequestSignal) -> CandidateReason {
    let ct = sig.content_type.to_lowercase();
    if ct.contains("json") || ct.contains("graphql") {
        return CandidateReason::JsonResponse;
    }
    if sig.response_size_bytes > 256 * 1024 {
        return CandidateReason::LargeResponse;
    }
    if (200..=299).contains(&sig.status) {
        return CandidateReason::StatusOk;
    }
    CandidateReason::Heuristic
}

fn score_signal(sig: &RequestSignal) -> (f64, String) {
    let mut notes: Vec<&str> = Vec::new();
    let mut score = 0.0f64;

    // Status
    if (200..=299).contains(&sig.status) {
        score += 0.40;
        notes.push("2xx");
    } else if (300..=399).contains(&sig.status) {
        score += 0.05;
        notes.push("3xx");
    } else {
        score -= 0.40;
        notes.push("non-2xx");
    }

    // Method
    let method = sig.method.to_uppercase();
    if method == "GET" {
        score += 0.10;
        notes.push("GET");
    } else if !method.is_empty() {
        score += 0.02;
        notes.push("method");
    }

    // Content type preference
    let ct = sig.content_type.to_lowercase();
    if ct.contains("json") || ct.contains("graphql") {
        score += 0.30;
        notes.push("json");
    } else if ct.contains("html") {
        score += 0.10;
        notes.push("html");
    } else if !ct.is_empty() {
        score += 0.02;
        notes.push("ct");
    }

    // Resource type
    let rt = sig.resource_type.to_lowercase();
    if rt == "xhr" || rt == "fetch" {
        score += 0.10;
        notes.push("api_rt");
    } else if !rt.is_empty() {
        score += 0.01;
        notes.push("rt");
    }

    // Body size: avoid tiny/no-body and huge payloads.
    let size = sig.response_size_bytes;
    if size < 200 {
        score -= 0.20;
        notes.push("tiny");
    } else if size > 256 * 1024 {
        score -= 0.20;
        notes.push("huge");
    } else {
        score += 0.05;
        notes.push("size_ok");
    }

    // Tracker/telemetry penalties.
    let host = Url::parse(&sig.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default();
    if !host.is_empty()
        && TRACKER_HOST_SUBSTRINGS
            .iter()
            .any(|substr| host.contains(substr))
    {
        score -= 0.40;
        notes.push("tracker");
    }
    if sig.url.contains("/collect") {
        score -= 0.20;
        notes.push("collect");
    }

    // Clamp to [0, 1] for easier downstream thresholds.
    (score.clamp(0.0, 1.0), notes.join(","))
}
