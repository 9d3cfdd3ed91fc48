//! JSON shape fingerprinting for recipe learning.
//!
//! A fingerprint is a set of typed JSON paths (path + value type), compared
//! via Jaccard similarity. Design goals:
//!
//! - Stable across object key ordering
//! - Insensitive to list indices (arrays use the wildcard segment `[]`)
//! - Depth limited (default 6) to avoid overfitting and control cost
//!
//! The [`assist`] module generates bounded JMESPath candidates from the same
//! JSON values, for presentation to the LLM analyzer.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod assist;

pub const DEFAULT_MAX_DEPTH: usize = 6;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Wildcard path segment used for every array element.
pub const ARRAY_WILDCARD: &str = "[]";

/// Runtime type of a JSON value, as recorded in fingerprints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum JsonValueType {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
}

impl JsonValueType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonValueType::Null,
            Value::Bool(_) => JsonValueType::Boolean,
            Value::Number(_) => JsonValueType::Number,
            Value::String(_) => JsonValueType::String,
            Value::Array(_) => JsonValueType::Array,
            Value::Object(_) => JsonValueType::Object,
        }
    }
}

/// A JSON path annotated with the runtime value type at that path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TypedJsonPath {
    pub path: Vec<String>,
    pub value_type: JsonValueType,
}

pub type Fingerprint = BTreeSet<TypedJsonPath>;

/// Compute a typed JSON path fingerprint for a value.
///
/// - Paths for list items use the wildcard segment `[]`, never indices.
/// - All nodes (including objects/arrays) are recorded with their type.
/// - Traversal stops once `max_depth` is reached (depth counts segments).
pub fn fingerprint(value: &Value, max_depth: usize) -> Fingerprint {
    let mut out = Fingerprint::new();
    walk(value, &mut Vec::new(), 0, max_depth, &mut out);
    out
}

fn walk(
    node: &Value,
    path: &mut Vec<String>,
    depth: usize,
    max_depth: usize,
    out: &mut Fingerprint,
) {
    out.insert(TypedJsonPath {
        path: path.clone(),
        value_type: JsonValueType::of(node),
    });

    if depth >= max_depth {
        return;
    }

    match node {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, depth + 1, max_depth, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for child in items {
                path.push(ARRAY_WILDCARD.to_string());
                walk(child, path, depth + 1, max_depth, out);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Jaccard similarity between two sets. Two empty sets are similar (1.0).
pub fn jaccard_similarity<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

pub fn fingerprint_similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    jaccard_similarity(a, b)
}

pub fn fingerprints_similar(a: &Fingerprint, b: &Fingerprint, threshold: f64) -> bool {
    fingerprint_similarity(a, b) >= threshold
}

pub fn json_similarity(a: &Value, b: &Value, max_depth: usize) -> f64 {
    fingerprint_similarity(&fingerprint(a, max_depth), &fingerprint(b, max_depth))
}

pub fn json_similar(a: &Value, b: &Value, threshold: f64, max_depth: usize) -> bool {
    json_similarity(a, b, max_depth) >= threshold
}
