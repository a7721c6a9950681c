//! Deep merge of YAML trees
//!
//! Rules, applied recursively:
//! - mapping + mapping: keys merge, contribution wins on scalar conflicts
//! - sequence + sequence: the contribution is appended
//! - null or scalar base: replaced by the contribution
//! - container base + value of another shape: base kept, conflict logged

use serde_yaml::Value;

/// Merge `contribution` into `base`
pub fn deep_merge(base: &mut Value, contribution: Value) {
    merge_at(base, contribution, "");
}

fn merge_at(base: &mut Value, contribution: Value, path: &str) {
    match (base, contribution) {
        (Value::Mapping(base_map), Value::Mapping(contrib_map)) => {
            for (key, value) in contrib_map {
                let child = format!("{}/{}", path, key_label(&key));
                match base_map.get_mut(&key) {
                    Some(existing) => merge_at(existing, value, &child),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(contrib_seq)) => {
            base_seq.extend(contrib_seq);
        }
        (base @ (Value::Mapping(_) | Value::Sequence(_)), other) => {
            log::warn!(
                "merge conflict at {}: keeping {} over contributed {}",
                if path.is_empty() { "/" } else { path },
                shape(base),
                shape(&other)
            );
        }
        (base, other) => *base = other,
    }
}

/// Merge a hook contribution into the data tree
///
/// Only mapping contributions are merged; anything else is skipped.
/// Returns whether the contribution was applied.
pub fn merge_contribution(data: &mut Value, contribution: Value) -> bool {
    if !contribution.is_mapping() {
        log::debug!("skipping {} contribution, expected a mapping", shape(&contribution));
        return false;
    }
    if data.is_null() {
        *data = Value::Mapping(Default::default());
    }
    deep_merge(data, contribution);
    true
}

/// Null, an empty mapping or an empty sequence
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Mapping(m) => m.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        _ => false,
    }
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| "?".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_contribution_wins_on_scalars() {
        let mut base = yaml("a: {x: 1, y: 2}\nb: keep");
        deep_merge(&mut base, yaml("a: {y: 3, z: 4}"));
        assert_eq!(base, yaml("a: {x: 1, y: 3, z: 4}\nb: keep"));
    }

    #[test]
    fn test_sequences_concatenate() {
        let mut base = yaml("contexts: [session, user]");
        deep_merge(&mut base, yaml("contexts: [route]"));
        assert_eq!(base, yaml("contexts: [session, user, route]"));
    }

    #[test]
    fn test_container_survives_scalar_contribution() {
        let mut base = yaml("tags: [a]\nconf: {k: v}");
        deep_merge(&mut base, yaml("tags: oops\nconf: 3"));
        assert_eq!(base, yaml("tags: [a]\nconf: {k: v}"));
    }

    #[test]
    fn test_merge_law_for_disjoint_keys() {
        // merge(merge(D, A), B) == merge(D, A ∪ B) when A and B touch disjoint leaves
        let d = yaml("p: {a: 1, b: 2}");
        let a = yaml("p: {a: 10}");
        let b = yaml("p: {c: 30}\nq: [1]");

        let mut sequential = d.clone();
        deep_merge(&mut sequential, a);
        deep_merge(&mut sequential, b);

        let mut combined = d;
        deep_merge(&mut combined, yaml("p: {a: 10, c: 30}\nq: [1]"));
        assert_eq!(sequential, combined);
    }

    #[test]
    fn test_non_mapping_contribution_is_skipped() {
        let mut data = yaml("a: 1");
        assert!(!merge_contribution(&mut data, yaml("[1, 2]")));
        assert!(!merge_contribution(&mut data, Value::from("text")));
        assert_eq!(data, yaml("a: 1"));

        let mut empty = Value::Null;
        assert!(merge_contribution(&mut empty, yaml("a: 1")));
        assert_eq!(empty, yaml("a: 1"));
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(&Value::Null));
        assert!(is_empty(&yaml("{}")));
        assert!(is_empty(&yaml("[]")));
        assert!(!is_empty(&yaml("a: 1")));
        assert!(!is_empty(&Value::from(0)));
    }
}
