//! Signals: turning raw session recordings into safe, bounded request features.
//!
//! This crate is intentionally pure:
//! - No I/O, no logging, no global state.
//! - Inputs are recording artifacts.
//! - Outputs are safe summaries suitable for candidate ranking and LLM
//!   analysis prompts.
//!
//! [`extract_request_signals`] projects request/response pairs into
//! [`RequestSignal`]s; [`rank`] scores them into a bounded candidate list.

use std::collections::BTreeMap;

use recap_artifacts::{NetworkRequest, NetworkResponse, RequestSignal, SessionRecording};
use recap_sanitize::{sanitize_url, summarize_response_structure, truncate};

pub mod rank;

pub use rank::{rank_candidates, DEFAULT_TOP_K};

pub const DEFAULT_MAX_CALLS: usize = 200;
pub const DEFAULT_MAX_URL_LEN: usize = 2048;
pub const DEFAULT_MAX_STRUCTURAL_SUMMARY_LEN: usize = 500;

/// Extraction knobs, all bounded by defaults matching the pipeline contract.
#[derive(Debug, Clone, Copy)]
pub struct SignalOptions {
    pub max_calls: usize,
    pub max_url_len: usize,
    pub max_structural_summary_len: usize,
}

impl Default for SignalOptions {
    fn default() -> Self {
        Self {
            max_calls: DEFAULT_MAX_CALLS,
            max_url_len: DEFAULT_MAX_URL_LEN,
            max_structural_summary_len: DEFAULT_MAX_STRUCTURAL_SUMMARY_LEN,
        }
    }
}

/// Extract sanitized per-request features for API calls in a recording.
///
/// Pairs by `request_id`, keeps only XHR/Fetch-like entries, sorts by
/// request timestamp, truncates to `max_calls`, and sanitizes every URL.
pub fn extract_request_signals(
    recording: &SessionRecording,
    options: SignalOptions,
) -> Vec<RequestSignal> {
    let initiator_by_request_id = build_initiator_url_map(recording);

    let mut pairs: Vec<(&NetworkRequest, &NetworkResponse)> = recording
        .api_calls()
        .into_iter()
        .filter(|(req, _)| is_api_resource_type(&req.resource_type))
        .collect();
    pairs.sort_by(|a, b| {
        a.0.timestamp
            .partial_cmp(&b.0.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if options.max_calls > 0 {
        pairs.truncate(options.max_calls);
    }

    pairs
        .into_iter()
        .map(|(req, resp)| {
            let initiator = initiator_by_request_id
                .get(req.request_id.as_str())
                .map(String::as_str)
                .unwrap_or("");
            let initiator_s = if initiator.is_empty() {
                String::new()
            } else {
                sanitize_url(initiator, options.max_url_len)
            };

            let content_type = extract_content_type(resp);
            let structural_summary = summarize_response_structure(
                &content_type,
                resp.body.as_deref(),
                options.max_structural_summary_len,
            );

            RequestSignal {
                url: sanitize_url(&req.url, options.max_url_len),
                method: if req.method.is_empty() {
                    "GET".to_string()
                } else {
                    req.method.to_uppercase()
                },
                status: resp.status,
                content_type,
                response_size_bytes: extract_response_size_bytes(resp),
                structural_summary,
                duration_ms: compute_duration_ms(req, resp),
                request_timestamp: req.timestamp,
                response_timestamp: resp.timestamp,
                initiator_page_url: initiator_s,
                resource_type: req.resource_type.to_lowercase(),
            }
        })
        .collect()
}

fn is_api_resource_type(resource_type: &str) -> bool {
    matches!(resource_type.to_lowercase().as_str(), "xhr" | "fetch")
}

fn extract_content_type(resp: &NetworkResponse) -> String {
    if !resp.mime_type.is_empty() {
        return truncate(&resp.mime_type.to_lowercase(), 200);
    }
    for (k, v) in &resp.headers {
        if k.eq_ignore_ascii_case("content-type") {
            return truncate(&v.to_lowercase(), 200);
        }
    }
    String::new()
}

fn extract_response_size_bytes(resp: &NetworkResponse) -> u64 {
    // Prefer Content-Length if present, fall back to captured body length.
    for (k, v) in &resp.headers {
        if k.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = v.trim().parse::<i64>() {
                if n >= 0 {
                    return n as u64;
                }
            }
        }
    }
    resp.body.as_deref().map(|b| b.len() as u64).unwrap_or(0)
}

fn compute_duration_ms(req: &NetworkRequest, resp: &NetworkResponse) -> Option<f64> {
    if req.timestamp <= 0.0 || resp.timestamp <= 0.0 {
        return None;
    }
    if resp.timestamp < req.timestamp {
        return None;
    }
    Some((resp.timestamp - req.timestamp) * 1000.0)
}

/// Initiator resolution: the most recent Document-type request URL at or
/// before each request's timestamp. Never a guess from the navigation list —
/// prefer empty over misleading.
fn build_initiator_url_map(recording: &SessionRecording) -> BTreeMap<&str, String> {
    let mut reqs: Vec<&NetworkRequest> = recording.requests.iter().collect();
    reqs.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut current_doc = String::new();
    let mut out: BTreeMap<&str, String> = BTreeMap::new();
    for req in reqs {
        if req.resource_type.eq_ignore_ascii_case("document") && !req.url.is_empty() {
            current_doc = req.url.clone();
        }
        if !req.request_id.is_empty() {
            out.insert(req.request_id.as_str(), current_doc.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn request(
        id: &str,
        url: &str,
        resource_type: &str,
        timestamp: f64,
    ) -> NetworkRequest {
        NetworkRequest {
            url: url.into(),
            method: "GET".into(),
            headers: BTreeMap::new(),
            post_data: None,
            resource_type: resource_type.into(),
            timestamp,
            request_id: id.into(),
            initiator_url: String::new(),
        }
    }

    fn response(id: &str, url: &str, timestamp: f64, body: Option<&str>) -> NetworkResponse {
        NetworkResponse {
            url: url.into(),
            status: 200,
            headers: BTreeMap::new(),
            body: body.map(String::from),
            mime_type: "application/json".into(),
            timestamp,
            request_id: id.into(),
            content_type: String::new(),
            byte_length: 0,
            ttfb_ms: None,
            total_ms: None,
            json_key_sample: None,
        }
    }

    fn recording(requests: Vec<NetworkRequest>, responses: Vec<NetworkResponse>) -> SessionRecording {
        SessionRecording::new(
            "task",
            "result",
            requests,
            responses,
            vec![],
            chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            None,
        )
    }

    #[test]
    fn only_xhr_and_fetch_survive() {
        let rec = recording(
            vec![
                request("r1", "https://api.example.com/a", "xhr", 1.0),
                request("r2", "https://example.com/style.css", "stylesheet", 2.0),
                request("r3", "https://api.example.com/b", "Fetch", 3.0),
            ],
            vec![
                response("r1", "https://api.example.com/a", 1.5, Some("{}")),
                response("r2", "https://example.com/style.css", 2.5, None),
                response("r3", "https://api.example.com/b", 3.5, Some("{}")),
            ],
        );
        let signals = extract_request_signals(&rec, SignalOptions::default());
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].resource_type, "xhr");
        assert_eq!(signals[1].resource_type, "fetch");
    }

    #[test]
    fn signals_are_sorted_and_capped() {
        let rec = recording(
            vec![
                request("r2", "https://api.example.com/b", "xhr", 5.0),
                request("r1", "https://api.example.com/a", "xhr", 1.0),
            ],
            vec![
                response("r2", "https://api.example.com/b", 5.5, None),
                response("r1", "https://api.example.com/a", 1.5, None),
            ],
        );
        let signals = extract_request_signals(&rec, SignalOptions::default());
        assert_eq!(signals[0].url, "https://api.example.com/a");

        let capped = extract_request_signals(
            &rec,
            SignalOptions {
                max_calls: 1,
                ..Default::default()
            },
        );
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn duration_handles_bad_timestamps() {
        let rec = recording(
            vec![
                request("r1", "https://api.example.com/a", "xhr", 2.0),
                request("r2", "https://api.example.com/b", "xhr", 0.0),
                request("r3", "https://api.example.com/c", "xhr", 5.0),
            ],
            vec![
                response("r1", "https://api.example.com/a", 2.25, None),
                response("r2", "https://api.example.com/b", 3.0, None),
                response("r3", "https://api.example.com/c", 4.0, None),
            ],
        );
        let signals = extract_request_signals(&rec, SignalOptions::default());
        // Sorted by request timestamp: r2 (0.0), r1 (2.0), r3 (5.0).
        assert_eq!(signals[0].duration_ms, None); // non-positive request timestamp
        assert_eq!(signals[1].duration_ms, Some(250.0));
        assert_eq!(signals[2].duration_ms, None); // response precedes request
    }

    #[test]
    fn content_length_header_wins_over_body() {
        let mut resp = response("r1", "https://api.example.com/a", 1.5, Some("{}"));
        resp.headers.insert("Content-Length".into(), "4096".into());
        let rec = recording(
            vec![request("r1", "https://api.example.com/a", "xhr", 1.0)],
            vec![resp],
        );
        let signals = extract_request_signals(&rec, SignalOptions::default());
        assert_eq!(signals[0].response_size_bytes, 4096);
    }

    #[test]
    fn initiator_is_last_document_before_request() {
        let rec = recording(
            vec![
                request("d1", "https://example.com/jobs", "Document", 1.0),
                request("r1", "https://api.example.com/search", "xhr", 2.0),
                request("d2", "https://example.com/other", "Document", 3.0),
                request("r2", "https://api.example.com/more", "xhr", 4.0),
            ],
            vec![
                response("r1", "https://api.example.com/search", 2.5, None),
                response("r2", "https://api.example.com/more", 4.5, None),
            ],
        );
        let signals = extract_request_signals(&rec, SignalOptions::default());
        assert_eq!(signals[0].initiator_page_url, "https://example.com/jobs");
        assert_eq!(signals[1].initiator_page_url, "https://example.com/other");
    }

    #[test]
    fn urls_are_sanitized() {
        let rec = recording(
            vec![request(
                "r1",
                "https://api.example.com/search?q=rust&token=shhh#frag",
                "xhr",
                1.0,
            )],
            vec![response("r1", "https://api.example.com/search", 1.5, None)],
        );
        let signals = extract_request_signals(&rec, SignalOptions::default());
        assert!(!signals[0].url.contains("shhh"));
        assert!(!signals[0].url.contains("#frag"));
        assert!(signals[0].url.contains("q=rust"));
    }

    #[test]
    fn structural_summary_is_body_free_and_bounded() {
        let body = r#"{"items":[{"name":"secret-widget"}],"total":1}"#;
        let rec = recording(
            vec![request("r1", "https://api.example.com/a", "xhr", 1.0)],
            vec![response("r1", "https://api.example.com/a", 1.5, Some(body))],
        );
        let signals = extract_request_signals(
            &rec,
            SignalOptions {
                max_structural_summary_len: 80,
                ..Default::default()
            },
        );
        assert!(signals[0].structural_summary.chars().count() <= 80);
        assert!(!signals[0].structural_summary.contains("secret-widget"));
    }
}
