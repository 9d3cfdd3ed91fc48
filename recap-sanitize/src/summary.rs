//! Bounded, body-free structural summaries of response bodies.
//!
//! Summaries never echo raw values; sensitive key names are replaced with
//! the shared `[REDACTED_KEY]` marker and output is always length-bounded.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::truncate;

/// Coarse classification of a captured body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Html,
    Text,
    Unknown,
    NoBody,
}

const SENSITIVE_KEY_SUBSTRINGS: &[&str] = &[
    "token",
    "secret",
    "password",
    "passwd",
    "authorization",
    "cookie",
    "session",
    "csrf",
    "xsrf",
    "api_key",
    "apikey",
];

const JSON_PARSE_CAP: usize = 50_000;

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\s*([a-zA-Z0-9]+)[\s>]").expect("valid regex"))
}

/// Return a bounded, secret-safe structural summary of a response body.
///
/// Never returns raw body content. JSON bodies above 50 KiB are tagged
/// `not_parsed` instead of being parsed.
pub fn summarize_response_structure(content_type: &str, body: Option<&str>, max_len: usize) -> String {
    let body = match body {
        None | Some("") => return truncate("no_body", max_len),
        Some(b) => b,
    };

    match classify_content_kind(content_type, body) {
        ContentKind::Json => truncate(&summarize_json_body(body), max_len),
        ContentKind::Html => truncate(&summarize_html_body(body), max_len),
        ContentKind::Text => truncate(&summarize_text_body(body), max_len),
        _ => truncate(&format!("unknown chars={}", body.chars().count()), max_len),
    }
}

/// Classify a body from its content type and a bounded prefix.
pub fn classify_content_kind(content_type: &str, body: &str) -> ContentKind {
    let ct = content_type.to_lowercase();
    let body_prefix: String = body.trim_start().chars().take(200).collect::<String>().to_lowercase();

    if ct.contains("json") || body_prefix.starts_with('{') || body_prefix.starts_with('[') {
        return ContentKind::Json;
    }
    if ct.contains("html") || body_prefix.contains("<html") || body_prefix.contains("<!doctype html")
    {
        return ContentKind::Html;
    }
    let head: String = body.chars().take(4000).collect();
    if ct.starts_with("text/") || head.contains('\n') {
        return ContentKind::Text;
    }
    ContentKind::Unknown
}

fn summarize_json_body(body: &str) -> String {
    // Avoid parsing huge bodies and summarizing appended truncation markers.
    if body.len() > JSON_PARSE_CAP {
        return format!("json chars={} (not_parsed)", body.chars().count());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) => summarize_json_value(&value, 0, 3, 25, 25),
        Err(_) => format!("json chars={} (parse_error)", body.chars().count()),
    }
}

fn summarize_json_value(
    value: &Value,
    depth: usize,
    max_depth: usize,
    max_keys: usize,
    max_items: usize,
) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(n) => {
            if n.is_f64() {
                "float".to_string()
            } else {
                "int".to_string()
            }
        }
        Value::String(s) => format!("string(len={})", s.chars().count()),
        Value::Array(items) => {
            if depth >= max_depth {
                return format!("array(len={})", items.len());
            }
            let mut elem_kinds: Vec<String> = Vec::new();
            for item in items.iter().take(max_items) {
                let kind = summarize_json_value(item, depth + 1, max_depth, max_keys, max_items);
                if !elem_kinds.contains(&kind) {
                    elem_kinds.push(kind);
                }
                if elem_kinds.len() >= 5 {
                    break;
                }
            }
            format!("array(len={}) elems=[{}]", items.len(), elem_kinds.join(", "))
        }
        Value::Object(map) => {
            if depth >= max_depth {
                return format!("object(keys={})", map.len().min(max_keys));
            }
            // serde_json maps iterate in sorted key order by default.
            let keys: Vec<&String> = map.keys().collect();
            let safe_keys: Vec<String> =
                keys.iter().take(max_keys).map(|k| sanitize_key_name(k)).collect();
            let nested: Vec<String> = keys
                .iter()
                .take(8)
                .map(|k| {
                    let child =
                        summarize_json_value(&map[k.as_str()], depth + 1, max_depth, max_keys, max_items);
                    format!("{}:{}", sanitize_key_name(k), child)
                })
                .collect();
            format!(
                "object(keys=[{}]) sample={{ {} }}",
                safe_keys.join(", "),
                nested.join(", ")
            )
        }
    }
}

fn summarize_html_body(body: &str) -> String {
    // Summarize by tag frequency on a bounded prefix.
    let prefix: String = body.chars().take(20_000).collect();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for cap in html_tag_re().captures_iter(&prefix) {
        let tag = cap[1].to_lowercase();
        *counts.entry(tag).or_insert(0) += 1;
    }
    let mut top: Vec<(&String, &usize)> = counts.iter().collect();
    top.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let top_str: Vec<String> = top
        .iter()
        .take(8)
        .map(|(tag, n)| format!("{tag}:{n}"))
        .collect();
    format!(
        "html chars={} tags={} top=[{}]",
        body.chars().count(),
        counts.len(),
        top_str.join(",")
    )
}

fn summarize_text_body(body: &str) -> String {
    // Do not echo content, only count.
    let prefix: String = body.chars().take(20_000).collect();
    format!(
        "text chars={} lines~{}",
        body.chars().count(),
        prefix.lines().count()
    )
}

fn sanitize_key_name(key: &str) -> String {
    let kl = key.to_lowercase();
    if SENSITIVE_KEY_SUBSTRINGS.iter().any(|sub| kl.contains(sub)) {
        return crate::REDACTED_KEY.to_string();
    }
    truncate(key, 64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_body_is_labelled() {
        assert_eq!(summarize_response_structure("application/json", None, 500), "no_body");
        assert_eq!(summarize_response_structure("", Some(""), 500), "no_body");
    }

    #[test]
    fn json_object_summary_lists_keys_not_values() {
        let body = r#"{"items":[{"name":"a"},{"name":"b"}],"total":2}"#;
        let out = summarize_response_structure("application/json", Some(body), 500);
        assert!(out.starts_with("object(keys=[items, total])"));
        assert!(!out.contains("\"a\""));
    }

    #[test]
    fn sensitive_keys_are_masked_in_summaries() {
        let body = r#"{"access_token":"abc123","data":[1,2]}"#;
        let out = summarize_response_structure("application/json", Some(body), 500);
        assert!(out.contains("[REDACTED_KEY]"));
        assert!(!out.contains("access_token"));
        assert!(!out.contains("abc123"));
    }

    #[test]
    fn huge_json_is_not_parsed() {
        let body = format!("{{\"k\":\"{}\"}}", "x".repeat(60_000));
        let out = summarize_response_structure("application/json", Some(&body), 500);
        assert!(out.contains("not_parsed"));
    }

    #[test]
    fn html_summary_counts_tags() {
        let body = "<html><body><div></div><div></div><p>hi</p></body></html>";
        let out = summarize_response_structure("text/html", Some(body), 500);
        assert!(out.starts_with("html chars="));
        assert!(out.contains("div:2"));
        assert!(!out.contains("hi"));
    }

    #[test]
    fn text_summary_counts_lines() {
        let out = summarize_response_structure("text/plain", Some("a\nb\nc"), 500);
        assert!(out.starts_with("text chars=5"));
        assert!(out.contains("lines~3"));
    }

    #[test]
    fn binary_like_body_is_unknown() {
        let out = summarize_response_structure("application/octet-stream", Some("abcdef"), 500);
        assert!(out.starts_with("unknown chars=6"));
    }

    #[test]
    fn summary_respects_max_len() {
        let body = r#"{"a":{"b":{"c":{"d":[1,2,3,4,5]}}},"e":1,"f":2,"g":3}"#;
        let out = summarize_response_structure("application/json", Some(body), 40);
        assert!(out.chars().count() <= 40);
    }
}
