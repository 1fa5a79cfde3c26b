//! Strategies for combining partial results into one state object.
//!
//! - `Shallow`: later keys overwrite earlier ones
//! - `ErrorOnConflict`: a key written by two partials is an error
//! - `Deep`: objects merge recursively, arrays concatenate, anything else
//!   takes the later value
//!
//! Only JSON objects are merged structurally. Every other value is opaque and
//! simply replaced.

use crate::context::State;
use crate::errors::MergeConflictError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How partial results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Last writer wins.
    #[default]
    Shallow,
    /// Duplicate keys are rejected.
    ErrorOnConflict,
    /// Recursive merge with array concatenation.
    Deep,
}

/// Merges `partials` in positional order under `strategy`.
///
/// An empty input yields an empty state. Under
/// [`MergeStrategy::ErrorOnConflict`] nothing is returned when any key
/// collides.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stepflow::merge::{merge_all, MergeStrategy};
///
/// let a = json!({"items": [1]}).as_object().cloned().unwrap();
/// let b = json!({"items": [2]}).as_object().cloned().unwrap();
///
/// let merged = merge_all(vec![a, b], MergeStrategy::Deep).unwrap();
/// assert_eq!(merged["items"], json!([1, 2]));
/// ```
pub fn merge_all(
    partials: impl IntoIterator<Item = State>,
    strategy: MergeStrategy,
) -> Result<State, MergeConflictError> {
    let mut merged = State::new();
    for partial in partials {
        match strategy {
            MergeStrategy::Shallow => shallow_merge(&mut merged, partial),
            MergeStrategy::ErrorOnConflict => {
                for (key, value) in partial {
                    if merged.contains_key(&key) {
                        return Err(MergeConflictError::new(key));
                    }
                    merged.insert(key, value);
                }
            }
            MergeStrategy::Deep => deep_merge_maps(&mut merged, partial),
        }
    }
    Ok(merged)
}

/// Copies every key of `partial` into `target`, overwriting.
pub fn shallow_merge(target: &mut State, partial: State) {
    for (key, value) in partial {
        target.insert(key, value);
    }
}

/// Deep-merges `overlay` into `base`.
///
/// Objects recurse, arrays concatenate (base first), anything else is
/// replaced by the overlay, including `null`.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            deep_merge_maps(base_map, overlay_map);
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            base_items.extend(overlay_items);
        }
        (base, overlay) => *base = overlay,
    }
}

fn deep_merge_maps(base: &mut State, overlay: State) {
    for (key, overlay_value) in overlay {
        match base.get_mut(&key) {
            Some(base_value) => deep_merge(base_value, overlay_value),
            None => {
                base.insert(key, overlay_value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> State {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_shallow_last_writer_wins() {
        let merged = merge_all(
            vec![obj(json!({"x": 1, "a": true})), obj(json!({"x": 2}))],
            MergeStrategy::Shallow,
        )
        .unwrap();

        assert_eq!(Value::Object(merged), json!({"x": 2, "a": true}));
    }

    #[test]
    fn test_shallow_does_not_recurse() {
        let merged = merge_all(
            vec![obj(json!({"user": {"id": 1}})), obj(json!({"user": {"name": "ann"}}))],
            MergeStrategy::Shallow,
        )
        .unwrap();

        assert_eq!(merged["user"], json!({"name": "ann"}));
    }

    #[test]
    fn test_error_on_conflict_names_key() {
        let err = merge_all(
            vec![obj(json!({"x": 1})), obj(json!({"x": 2}))],
            MergeStrategy::ErrorOnConflict,
        )
        .unwrap_err();

        assert_eq!(err.key, "x");
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_error_on_conflict_disjoint_keys() {
        let merged = merge_all(
            vec![obj(json!({"a": 1})), obj(json!({"b": 2})), obj(json!({"c": 3}))],
            MergeStrategy::ErrorOnConflict,
        )
        .unwrap();

        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_deep_concatenates_arrays() {
        let merged = merge_all(
            vec![obj(json!({"items": [1]})), obj(json!({"items": [2]}))],
            MergeStrategy::Deep,
        )
        .unwrap();

        assert_eq!(merged["items"], json!([1, 2]));
    }

    #[test]
    fn test_deep_recurses_into_objects() {
        let merged = merge_all(
            vec![
                obj(json!({"user": {"id": 1, "tags": ["a"]}})),
                obj(json!({"user": {"name": "ann", "tags": ["b"]}})),
            ],
            MergeStrategy::Deep,
        )
        .unwrap();

        assert_eq!(
            merged["user"],
            json!({"id": 1, "name": "ann", "tags": ["a", "b"]})
        );
    }

    #[test]
    fn test_deep_type_mismatch_takes_new_value() {
        let merged = merge_all(
            vec![
                obj(json!({"a": [1], "b": {"x": 1}, "c": 1})),
                obj(json!({"a": {"k": 1}, "b": "flat", "c": null})),
            ],
            MergeStrategy::Deep,
        )
        .unwrap();

        assert_eq!(Value::Object(merged), json!({"a": {"k": 1}, "b": "flat", "c": null}));
    }

    #[test]
    fn test_merge_all_empty() {
        let merged = merge_all(Vec::new(), MergeStrategy::Deep).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn test_deep_merge_scalars() {
        let mut base = json!(1);
        deep_merge(&mut base, json!("two"));
        assert_eq!(base, json!("two"));
    }

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(
            serde_json::to_string(&MergeStrategy::ErrorOnConflict).unwrap(),
            "\"error-on-conflict\""
        );
        let parsed: MergeStrategy = serde_json::from_str("\"deep\"").unwrap();
        assert_eq!(parsed, MergeStrategy::Deep);
    }
}
