//! Raw value tree navigation.
//!
//! Documents keep their data as a `serde_json::Value` tree. These helpers read
//! and write that tree by [`Path`], creating intermediate objects on write the
//! same way a patch `Set` does.

use crate::error::{PathError, PathResult};
use crate::{Path, Seg};
use serde_json::{Map, Value};

/// Get a reference to the value at `path`.
///
/// Index segments that land on an object are looked up as string keys, so
/// map keys that look numeric (`"2024"`) stay addressable.
pub fn get_at<'a>(doc: &'a Value, path: &Path) -> Option<&'a Value> {
    path.iter().try_fold(doc, step)
}

fn step<'a>(current: &'a Value, seg: &Seg) -> Option<&'a Value> {
    match (current, seg) {
        (Value::Object(obj), seg) => obj.get(&seg.to_key()),
        (Value::Array(arr), Seg::Index(i)) => arr.get(*i),
        _ => None,
    }
}

/// Get a mutable reference to the value at `path`.
pub fn get_at_mut<'a>(doc: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    let mut current = doc;
    for seg in path.iter() {
        current = match (current, seg) {
            (Value::Object(obj), seg) => obj.get_mut(&seg.to_key())?,
            (Value::Array(arr), Seg::Index(i)) => arr.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set `value` at `path`, creating intermediate objects as needed.
///
/// Writing one past the end of an array appends. Any other out-of-bounds
/// index is an error, as is indexing into a scalar that is not replaceable.
pub fn set_at(doc: &mut Value, path: &Path, value: Value) -> PathResult<()> {
    set_segments(doc, path.segments(), value, path)
}

fn set_segments(current: &mut Value, segments: &[Seg], value: Value, full: &Path) -> PathResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        *current = value;
        return Ok(());
    };

    match head {
        Seg::Index(idx) if current.is_array() => {
            let arr = current.as_array_mut().ok_or_else(|| PathError::not_traversable(full.clone()))?;
            if *idx > arr.len() {
                return Err(PathError::index_out_of_bounds(full.clone(), *idx, arr.len()));
            }
            if *idx == arr.len() {
                arr.push(Value::Null);
            }
            set_segments(&mut arr[*idx], rest, value, full)
        }
        seg => {
            if !current.is_object() {
                if current.is_array() {
                    return Err(PathError::not_traversable(full.clone()));
                }
                *current = Value::Object(Map::new());
            }
            let obj = current
                .as_object_mut()
                .ok_or_else(|| PathError::not_traversable(full.clone()))?;
            let entry = obj.entry(seg.to_key()).or_insert(Value::Null);
            set_segments(entry, rest, value, full)
        }
    }
}

/// Remove the value at `path`, returning it. Array elements are removed
/// (shifting later elements); object keys are deleted.
pub fn remove_at(doc: &mut Value, path: &Path) -> Option<Value> {
    let (last, parent) = path.segments().split_last()?;
    let parent = get_at_mut(doc, &Path::from_segments(parent.to_vec()))?;
    match (parent, last) {
        (Value::Object(obj), seg) => obj.remove(&seg.to_key()),
        (Value::Array(arr), Seg::Index(i)) if *i < arr.len() => Some(arr.remove(*i)),
        _ => None,
    }
}

/// `null` and absent values are both nullish.
#[inline]
pub fn is_nullish(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Structural equality that compares numbers by value (`1 == 1.0`).
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| deep_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Equality over optional values; absent equals absent only.
pub fn deep_equal_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => deep_equal(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Recursively drop empty objects. Returns true if `value` itself ended up empty.
pub fn minimize(value: &mut Value) -> bool {
    match value {
        Value::Object(obj) => {
            obj.retain(|_, v| !minimize(v));
            obj.is_empty()
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                if let Value::Object(obj) = item {
                    obj.retain(|_, v| !minimize(v));
                }
            }
            false
        }
        _ => false,
    }
}

/// Get the type name of a JSON value.
#[inline]
pub fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_at_nested_and_indexed() {
        let doc = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(get_at(&doc, &Path::parse("items.1.name")), Some(&json!("b")));
        assert_eq!(get_at(&doc, &Path::parse("items.5.name")), None);
    }

    #[test]
    fn test_get_at_numeric_map_key() {
        let doc = json!({"years": {"2024": 1}});
        assert_eq!(get_at(&doc, &Path::parse("years.2024")), Some(&json!(1)));
    }

    #[test]
    fn test_set_at_creates_parents() {
        let mut doc = json!({});
        set_at(&mut doc, &Path::parse("a.b.c"), json!(42)).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 42}}}));
    }

    #[test]
    fn test_set_at_appends_at_len() {
        let mut doc = json!({"tags": ["x"]});
        set_at(&mut doc, &Path::parse("tags.1"), json!("y")).unwrap();
        assert_eq!(doc["tags"], json!(["x", "y"]));
    }

    #[test]
    fn test_set_at_out_of_bounds() {
        let mut doc = json!({"tags": []});
        let err = set_at(&mut doc, &Path::parse("tags.3"), json!("y")).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn test_remove_at() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "arr": [1, 2, 3]});
        assert_eq!(remove_at(&mut doc, &Path::parse("a.b")), Some(json!(1)));
        assert_eq!(remove_at(&mut doc, &Path::parse("arr.0")), Some(json!(1)));
        assert_eq!(doc, json!({"a": {"c": 2}, "arr": [2, 3]}));
        assert_eq!(remove_at(&mut doc, &Path::parse("missing.x")), None);
    }

    #[test]
    fn test_deep_equal_numbers() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(deep_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_minimize() {
        let mut v = json!({"a": {}, "b": {"c": {}}, "d": 1, "e": [{"f": {}}]});
        minimize(&mut v);
        assert_eq!(v, json!({"d": 1, "e": [{}]}));
    }

    #[test]
    fn test_value_type_name() {
        assert_eq!(value_type_name(&json!(null)), "null");
        assert_eq!(value_type_name(&json!(true)), "boolean");
        assert_eq!(value_type_name(&json!(42)), "number");
        assert_eq!(value_type_name(&json!("hello")), "string");
        assert_eq!(value_type_name(&json!([1, 2, 3])), "array");
        assert_eq!(value_type_name(&json!({"a": 1})), "object");
    }
}
