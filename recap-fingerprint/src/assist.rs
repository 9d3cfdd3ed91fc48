//! JMESPath extraction assist for JSON responses.
//!
//! Generates deterministic, bounded candidate JMESPath expressions
//! (`extract_path`) from a JSON response shape. The candidates are shown to
//! the LLM analyzer for selection or small edits, so the model never has to
//! invent JMESPath from scratch.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::ARRAY_WILDCARD;

pub const DEFAULT_MAX_DEPTH: usize = 6;
pub const DEFAULT_MAX_CANDIDATES: usize = 20;

const MAX_VISITED_NODES: usize = 750;
const MAX_LIST_SAMPLE: usize = 6;
const MAX_FIELDS_PER_LIST: usize = 6;

/// A candidate expression with its ranking score (internal).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    expression: String,
    score: i64,
    reason: &'static str,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

fn collection_key_weight(key: &str) -> Option<i64> {
    // Common API response list container keys.
    Some(match key {
        "items" => 120,
        "results" => 115,
        "data" => 90,
        "value" | "values" | "records" => 80,
        "rows" | "hits" => 75,
        "list" | "entries" => 70,
        "elements" | "documents" => 65,
        "edges" | "nodes" => 85,
        _ => return None,
    })
}

fn wrapper_key_weight(key: &str) -> Option<i64> {
    // Common wrapper keys that often contain the "real" data.
    Some(match key {
        "data" => 70,
        "payload" => 55,
        "response" | "result" => 45,
        "body" => 40,
        _ => return None,
    })
}

/// Generate candidate JMESPath expressions for extracting useful data.
///
/// Deterministic: object keys traversed in sorted order; results ordered by
/// score descending, then expression ascending. Bounded: traversal is
/// depth-limited, visits at most 750 nodes, samples at most 6 list elements,
/// and returns at most `max_candidates` expressions.
pub fn generate_extract_path_candidates(
    value: &Value,
    max_candidates: usize,
    max_depth: usize,
) -> Vec<String> {
    let mut acc: BTreeMap<String, Candidate> = BTreeMap::new();

    // Root lists get an explicit projection; `@` alone is too vague.
    if value.is_array() {
        add_candidate(
            &mut acc,
            Candidate {
                expression: "[*]".to_string(),
                score: 200,
                reason: "root_list",
            },
        );
    }

    let mut visited = 0usize;
    walk(value, &mut Vec::new(), 0, max_depth, &mut visited, &mut acc);

    let mut all: Vec<Candidate> = acc.into_values().collect();
    all.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.expression.cmp(&b.expression)));
    all.truncate(max_candidates.max(1));
    all.into_iter().map(|c| c.expression).collect()
}

fn add_candidate(acc: &mut BTreeMap<String, Candidate>, candidate: Candidate) {
    match acc.get(&candidate.expression) {
        Some(existing) if existing.score >= candidate.score => {}
        _ => {
            acc.insert(candidate.expression.clone(), candidate);
        }
    }
}

fn walk(
    node: &Value,
    path: &mut Vec<String>,
    depth: usize,
    max_depth: usize,
    visited: &mut usize,
    acc: &mut BTreeMap<String, Candidate>,
) {
    *visited += 1;
    if *visited > MAX_VISITED_NODES || depth > max_depth {
        return;
    }

    match node {
        Value::Object(map) => {
            maybe_add_wrapper_candidate(acc, path);
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, depth + 1, max_depth, visited, acc);
                path.pop();
            }
        }
        Value::Array(items) => {
            add_list_candidates(acc, items, path);
            for child in items.iter().take(MAX_LIST_SAMPLE) {
                path.push(ARRAY_WILDCARD.to_string());
                walk(child, path, depth + 1, max_depth, visited, acc);
                path.pop();
            }
        }
        _ => {}
    }
}

fn maybe_add_wrapper_candidate(acc: &mut BTreeMap<String, Candidate>, path: &[String]) {
    let Some(last) = path.last() else { return };
    if last == ARRAY_WILDCARD {
        return;
    }
    let Some(weight) = wrapper_key_weight(&last.to_lowercase()) else {
        return;
    };
    add_candidate(
        acc,
        Candidate {
            expression: path_to_jmespath(path),
            score: weight,
            reason: "wrapper",
        },
    );
}

fn add_list_candidates(acc: &mut BTreeMap<String, Candidate>, node: &[Value], path: &[String]) {
    let base_score = score_list_path(path, node);
    if !path.is_empty() {
        add_candidate(
            acc,
            Candidate {
                expression: path_to_jmespath(path),
                score: base_score,
                reason: "list",
            },
        );
    }

    let analysis = analyze_list_items(node);
    if analysis.common_object_keys.is_empty() {
        return;
    }

    // Field projections (`items[*].name`) rank below the raw container.
    for (key, key_score) in &analysis.top_field_keys {
        let mut projected = path.to_vec();
        projected.push(ARRAY_WILDCARD.to_string());
        projected.push(key.clone());
        add_candidate(
            acc,
            Candidate {
                expression: path_to_jmespath(&projected),
                score: base_score - 60 + key_score,
                reason: "field",
            },
        );
    }

    // GraphQL-ish edges[*].node and node.<field>.
    if !analysis.node_child_keys.is_empty() {
        let mut node_path = path.to_vec();
        node_path.push(ARRAY_WILDCARD.to_string());
        node_path.push("node".to_string());
        add_candidate(
            acc,
            Candidate {
                expression: path_to_jmespath(&node_path),
                score: base_score + 60,
                reason: "graphql_node",
            },
        );

        for (key, key_score) in &analysis.top_node_field_keys {
            let mut field_path = node_path.clone();
            field_path.push(key.clone());
            add_candidate(
                acc,
                Candidate {
                    expression: path_to_jmespath(&field_path),
                    score: base_score + 60 + key_score,
                    reason: "graphql_node_field",
                },
            );
        }
    }

    if let Some(hash_expr) = maybe_build_multiselect_hash(path, &analysis) {
        add_candidate(
            acc,
            Candidate {
                expression: hash_expr,
                score: base_score - 20,
                reason: "hash",
            },
        );
    }
}

fn score_list_path(path: &[String], node: &[Value]) -> i64 {
    let mut base = 40i64;
    if path.is_empty() {
        return base;
    }

    if let Some(last_key) = path.iter().rev().find(|seg| seg.as_str() != ARRAY_WILDCARD) {
        base += collection_key_weight(&last_key.to_lowercase()).unwrap_or(0);
    }

    if node.len() >= 2 {
        base += 10;
    }
    if node.len() >= 10 {
        base += 10;
    }
    if node.iter().take(MAX_LIST_SAMPLE).any(Value::is_object) {
        base += 10;
    }

    // Prefer shorter, higher-level paths when otherwise equal.
    (base - (path.len() as i64) * 2).max(0)
}

#[derive(Debug, Default)]
struct ListAnalysis {
    common_object_keys: Vec<String>,
    top_field_keys: Vec<(String, i64)>,
    node_child_keys: Vec<String>,
    top_node_field_keys: Vec<(String, i64)>,
}

fn analyze_list_items(node: &[Value]) -> ListAnalysis {
    let dict_items: Vec<&serde_json::Map<String, Value>> = node
        .iter()
        .take(MAX_LIST_SAMPLE)
        .filter_map(Value::as_object)
        .collect();

    if dict_items.is_empty() {
        return ListAnalysis::default();
    }

    let mut key_counts: BTreeMap<&str, i64> = BTreeMap::new();
    for item in &dict_items {
        for k in item.keys() {
            *key_counts.entry(k).or_insert(0) += 1;
        }
    }

    // Stable ordering: most frequent keys first, then lexicographically.
    let mut keys_by_freq: Vec<(&str, i64)> = key_counts.iter().map(|(k, n)| (*k, *n)).collect();
    keys_by_freq.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let common_keys: Vec<String> = keys_by_freq.iter().take(20).map(|(k, _)| k.to_string()).collect();

    let top_field_keys = rank_fields(&common_keys, &key_counts);

    let node_children: Vec<&serde_json::Map<String, Value>> = dict_items
        .iter()
        .filter_map(|item| item.get("node").and_then(Value::as_object))
        .collect();

    let mut node_key_counts: BTreeMap<&str, i64> = BTreeMap::new();
    for child in &node_children {
        for k in child.keys() {
            *node_key_counts.entry(k).or_insert(0) += 1;
        }
    }
    let mut node_keys_by_freq: Vec<(&str, i64)> =
        node_key_counts.iter().map(|(k, n)| (*k, *n)).collect();
    node_keys_by_freq.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let node_child_keys: Vec<String> =
        node_keys_by_freq.iter().take(20).map(|(k, _)| k.to_string()).collect();

    let top_node_field_keys = rank_fields(&node_child_keys, &node_key_counts);

    ListAnalysis {
        common_object_keys: common_keys,
        top_field_keys,
        node_child_keys,
        top_node_field_keys,
    }
}

fn rank_fields(keys: &[String], counts: &BTreeMap<&str, i64>) -> Vec<(String, i64)> {
    let mut scored: Vec<(i64, &String)> = keys
        .iter()
        .map(|k| {
            (
                field_score(k) + counts.get(k.as_str()).copied().unwrap_or(0) * 3,
                k,
            )
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_FIELDS_PER_LIST)
        .map(|(score, k)| (k.clone(), score))
        .collect()
}

fn field_score(key: &str) -> i64 {
    let kl = key.to_lowercase();

    if kl == "node" {
        return 55;
    }

    // IDs.
    if matches!(kl.as_str(), "id" | "uuid" | "gid") {
        return 50;
    }
    if kl.ends_with("_id") || kl.ends_with("id") {
        return 42;
    }

    // Human-facing labels.
    if matches!(kl.as_str(), "name" | "title" | "label") {
        return 45;
    }
    if kl.contains("name") {
        return 35;
    }
    if kl.contains("title") {
        return 33;
    }

    // Links.
    if matches!(kl.as_str(), "url" | "html_url" | "link" | "href") {
        return 30;
    }
    if kl.contains("url") || kl.contains("link") || kl.contains("href") {
        return 22;
    }

    // Descriptions.
    if matches!(kl.as_str(), "description" | "summary" | "desc") {
        return 26;
    }

    // Counts.
    if matches!(kl.as_str(), "count" | "total" | "size") {
        return 20;
    }
    if kl.contains("count") || kl.contains("total") {
        return 16;
    }

    // Timestamps.
    if kl.contains("created") || kl.contains("updated") || kl.contains("date") || kl.contains("time")
    {
        return 12;
    }

    5
}

fn maybe_build_multiselect_hash(path: &[String], analysis: &ListAnalysis) -> Option<String> {
    // Only identifier-like keys, so output object keys are stable and valid.
    let chosen: Vec<&String> = analysis
        .top_field_keys
        .iter()
        .map(|(k, _)| k)
        .filter(|k| is_identifier(k))
        .take(4)
        .collect();

    if chosen.len() < 2 {
        return None;
    }

    let pairs: Vec<String> = chosen.iter().map(|k| format!("{k}: {k}")).collect();
    let pairs = pairs.join(", ");
    if path.is_empty() {
        return Some(format!("[*].{{{pairs}}}"));
    }
    Some(format!("{}[*].{{{pairs}}}", path_to_jmespath(path)))
}

fn is_identifier(key: &str) -> bool {
    identifier_re().is_match(key)
}

fn escape_quoted_identifier(key: &str) -> String {
    // JMESPath quoted identifiers use JSON string escaping.
    let dumped = serde_json::to_string(key).unwrap_or_else(|_| format!("\"{key}\""));
    dumped[1..dumped.len() - 1].to_string()
}

fn path_to_jmespath(path: &[String]) -> String {
    if path.is_empty() {
        return "@".to_string();
    }

    let mut out = String::new();
    for seg in path {
        if seg == ARRAY_WILDCARD {
            out.push_str("[*]");
            continue;
        }

        if out.is_empty() {
            if is_identifier(seg) {
                out.push_str(seg);
            } else {
                out.push_str(&format!("\"{}\"", escape_quoted_identifier(seg)));
            }
            continue;
        }

        if is_identifier(seg) {
            out.push_str(&format!(".{seg}"));
        } else {
            out.push_str(&format!(".\"{}\"", escape_quoted_identifier(seg)));
        }
    }

    if out.is_empty() {
        "@".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_list_emits_projection_not_at() {
        let out = generate_extract_path_candidates(&json!([1, 2, 3]), 20, 6);
        assert!(out.contains(&"[*]".to_string()));
        assert!(!out.contains(&"@".to_string()));
    }

    #[test]
    fn wrapper_and_container_keys_rank_high() {
        let value = json!({
            "data": {
                "items": [
                    {"id": 1, "name": "a", "noise": true},
                    {"id": 2, "name": "b", "noise": false}
                ]
            }
        });
        let out = generate_extract_path_candidates(&value, 20, 6);
        assert_eq!(out[0], "data.items");
        assert!(out.contains(&"data".to_string()));
        assert!(out.iter().any(|e| e == "data.items[*].name"));
    }

    #[test]
    fn multiselect_hash_requires_two_identifier_keys() {
        let value = json!({"items": [{"id": 1, "name": "x"}, {"id": 2, "name": "y"}]});
        let out = generate_extract_path_candidates(&value, 20, 6);
        assert!(out.iter().any(|e| e.contains("[*].{") && e.contains("id: id")));

        let single = json!({"items": [{"only": 1}, {"only": 2}]});
        let out = generate_extract_path_candidates(&single, 20, 6);
        assert!(!out.iter().any(|e| e.contains('{')));
    }

    #[test]
    fn graphql_edges_produce_node_candidates() {
        let value = json!({
            "data": {
                "edges": [
                    {"node": {"id": "1", "title": "t1"}},
                    {"node": {"id": "2", "title": "t2"}}
                ]
            }
        });
        let out = generate_extract_path_candidates(&value, 20, 6);
        assert!(out.iter().any(|e| e == "data.edges[*].node"));
        assert!(out.iter().any(|e| e == "data.edges[*].node.id"));
    }

    #[test]
    fn non_identifier_keys_are_quoted() {
        let value = json!({"data": {"weird key": [{"id": 1}, {"id": 2}]}});
        let out = generate_extract_path_candidates(&value, 20, 6);
        assert!(out.iter().any(|e| e.contains("\"weird key\"")));
    }

    #[test]
    fn output_is_deterministic_and_bounded() {
        let value = json!({
            "results": [{"id": 1, "name": "a", "url": "u", "extra": 0, "more": 1}],
            "data": {"rows": [[1, 2], [3, 4]]},
            "misc": {"deep": {"deeper": {"items": [{"x": 1}]}}}
        });
        let a = generate_extract_path_candidates(&value, 5, 6);
        let b = generate_extract_path_candidates(&value, 5, 6);
        assert_eq!(a, b);
        assert!(a.len() <= 5);
    }
}
