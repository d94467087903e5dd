use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 integrity hash over a canonicalized JSON document.
///
/// Canonicalization relies on `serde_json::Map`'s default backing store
/// (`BTreeMap`, since this crate does not enable the `preserve_order`
/// feature): object keys are already emitted in lexicographic order over
/// Unicode code points, recursively, with no insignificant whitespace, when
/// serialized compactly. Floating-point fields use `serde_json`'s default
/// shortest round-trip representation, so the hash is stable across
/// producers that agree on the same field values.
///
/// The caller is responsible for excluding the hash field itself from
/// `value` before calling this function.
pub fn canonical_hash(value: &JsonValue) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn nested_objects_canonicalize_too() {
        let a = json!({"outer": {"z": 1, "y": 2}});
        let b = json!({"outer": {"y": 2, "z": 1}});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn different_values_hash_differently() {
        let a = json!({"action": "file_access"});
        let b = json!({"action": "git_push"});
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }
}
