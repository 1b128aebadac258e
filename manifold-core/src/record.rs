//! Helpers for the opaque JSON records that travel along flow edges.
//!
//! Node executors address fields inside a payload with dot-separated paths
//! (`order.customer.id`). Paths never index into arrays; a mapper that needs
//! per-element work parses the array first.

use serde_json::Value;

/// Look up a dot-separated path inside a JSON record.
pub fn get_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dot-separated path inside a JSON record, creating intermediate
/// objects as needed. Replaces any non-object value on the way.
pub fn set_path(record: &mut Value, path: &str, value: Value) {
    if !record.is_object() {
        *record = Value::Object(serde_json::Map::new());
    }
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };
    let mut current = record;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            let entry = current
                .as_object_mut()
                .expect("object ensured above")
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(serde_json::Map::new());
            }
            current = entry;
        }
    }
    current
        .as_object_mut()
        .expect("object ensured above")
        .insert(leaf.to_string(), value);
}

/// Truthiness coercion for conditional routing.
///
/// `null`, `false`, `0`, the empty string, the empty array, and the empty
/// object are falsy. Everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Shallow-merge `overlay` into `base`. Object keys from `overlay` win;
/// non-object overlays replace the base entirely.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base.as_object_mut(), overlay) {
        (Some(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                base_map.insert(k, v);
            }
        }
        (_, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_walks_nested_objects() {
        let record = json!({"order": {"customer": {"id": "C-1"}}});
        assert_eq!(get_path(&record, "order.customer.id"), Some(&json!("C-1")));
        assert_eq!(get_path(&record, "order.missing"), None);
        assert_eq!(get_path(&record, "order.customer.id.too_deep"), None);
    }

    #[test]
    fn set_path_creates_intermediates() {
        let mut record = json!({});
        set_path(&mut record, "a.b.c", json!(7));
        assert_eq!(record, json!({"a": {"b": {"c": 7}}}));
    }

    #[test]
    fn set_path_replaces_scalars_on_the_way() {
        let mut record = json!({"a": 1});
        set_path(&mut record, "a.b", json!("x"));
        assert_eq!(record, json!({"a": {"b": "x"}}));
    }

    #[test]
    fn truthiness_table() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(0.5)));
        assert!(is_truthy(&json!("no")));
        assert!(is_truthy(&json!([0])));
    }

    #[test]
    fn merge_prefers_overlay_keys() {
        let mut base = json!({"a": 1, "b": 2});
        merge(&mut base, json!({"b": 3, "c": 4}));
        assert_eq!(base, json!({"a": 1, "b": 3, "c": 4}));
    }
}
