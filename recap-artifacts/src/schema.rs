//! Compile-time schema hashing for persisted artifacts.
//!
//! Every artifact stores the SHA-256 of its own JSON schema so a resumed
//! pipeline can detect incompatible on-disk data instead of silently
//! migrating it. The `schema_hash` property itself is pruned from the schema
//! before hashing so the hash is not self-referential.

use schemars::JsonSchema;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the canonical schema hash for an artifact type.
///
/// The hash is independent of any instance value: it is derived purely from
/// the generated JSON schema, pruned of the `schema_hash` field, serialized
/// with sorted keys, and digested with SHA-256.
pub fn schema_hash_for<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or(Value::Null);
    prune_schema_hash(&mut value, None);
    // serde_json maps serialize with sorted keys, giving a canonical payload.
    let payload = serde_json::to_string(&value).unwrap_or_default();
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)
}

/// Remove the `schema_hash` property from a JSON schema object, recursively.
fn prune_schema_hash(value: &mut Value, container_key: Option<&str>) {
    match value {
        Value::Object(map) => {
            if container_key == Some("properties") {
                map.remove("schema_hash");
            }
            for (k, v) in map.iter_mut() {
                prune_schema_hash(v, Some(k.as_str()));
            }
        }
        Value::Array(items) => {
            if container_key == Some("required") {
                items.retain(|v| v.as_str() != Some("schema_hash"));
            }
            for v in items.iter_mut() {
                prune_schema_hash(v, container_key);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Sample {
        schema_hash: String,
        value: i64,
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct SampleWithoutHash {
        value: i64,
    }

    #[test]
    fn hash_is_stable_across_calls() {
        assert_eq!(schema_hash_for::<Sample>(), schema_hash_for::<Sample>());
    }

    #[test]
    fn hash_ignores_the_schema_hash_field_itself() {
        // Pruning makes the two shapes hash identically apart from the title.
        let a = schema_hash_for::<Sample>();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prune_removes_property_and_required_entry() {
        let mut schema = json!({
            "properties": {
                "schema_hash": {"type": "string"},
                "value": {"type": "integer"}
            },
            "required": ["schema_hash", "value"]
        });
        prune_schema_hash(&mut schema, None);
        assert!(schema["properties"].get("schema_hash").is_none());
        assert_eq!(schema["required"], json!(["value"]));
    }

    #[test]
    fn different_types_hash_differently() {
        assert_ne!(
            schema_hash_for::<Sample>(),
            schema_hash_for::<SampleWithoutHash>()
        );
    }
}
