//! Changesets: the minimal writes that bring a stored record in line with a document.
//!
//! A changeset is an ordered list of [`Change`]s keyed by path. Storage
//! adapters either translate it to their own update language or replay it
//! against the stored record with [`apply_changeset`].

use crate::error::{PathError, PathResult};
use crate::schema::TypeTag;
use crate::value::{deep_equal, get_at_mut, remove_at, set_at};
use crate::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One write against a stored record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOp {
    /// Replace the value at the path.
    Set { value: Value },
    /// Remove the path.
    Unset,
    /// Append to the array at the path.
    Push { values: Vec<Value> },
    /// Remove matching elements from the array at the path.
    Pull { values: Vec<Value> },
}

/// A path plus the write to perform there.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: Path,
    #[serde(flatten)]
    pub op: ChangeOp,
    /// Declared type of the field, when the path is declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<TypeTag>,
}

impl Change {
    pub fn set(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            op: ChangeOp::Set {
                value: value.into(),
            },
            field_type: None,
        }
    }

    pub fn unset(path: impl Into<Path>) -> Self {
        Self {
            path: path.into(),
            op: ChangeOp::Unset,
            field_type: None,
        }
    }

    pub fn push(path: impl Into<Path>, values: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            op: ChangeOp::Push { values },
            field_type: None,
        }
    }

    pub fn pull(path: impl Into<Path>, values: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            op: ChangeOp::Pull { values },
            field_type: None,
        }
    }

    /// Attach the declared field type (builder pattern).
    pub fn with_type(mut self, tag: Option<TypeTag>) -> Self {
        self.field_type = tag;
        self
    }
}

/// An ordered list of changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    changes: Vec<Change>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a change (builder pattern).
    pub fn with_change(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// The change recorded for exactly `path`.
    pub fn get(&self, path: impl Into<Path>) -> Option<&Change> {
        let path = path.into();
        self.changes.iter().find(|c| c.path == path)
    }

    /// Changed paths as strings, in order.
    pub fn paths(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.path.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

impl IntoIterator for Changeset {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl FromIterator<Change> for Changeset {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

/// Apply a changeset to a stored record (pure function).
///
/// # Examples
///
/// ```
/// use docket_state::{apply_changeset, Change, Changeset};
/// use serde_json::json;
///
/// let stored = json!({"name": "a", "tags": ["x"]});
/// let changes = Changeset::new()
///     .with_change(Change::set("name", "b"))
///     .with_change(Change::push("tags", vec![json!("y")]));
///
/// let updated = apply_changeset(&stored, &changes).unwrap();
/// assert_eq!(updated, json!({"name": "b", "tags": ["x", "y"]}));
/// assert_eq!(stored["name"], "a");
/// ```
pub fn apply_changeset(doc: &Value, changeset: &Changeset) -> PathResult<Value> {
    let mut result = doc.clone();
    for change in changeset.iter() {
        apply_change(&mut result, change)?;
    }
    Ok(result)
}

/// Apply one change in place.
pub fn apply_change(doc: &mut Value, change: &Change) -> PathResult<()> {
    let path = &change.path;
    match &change.op {
        ChangeOp::Set { value } => set_at(doc, path, value.clone()),
        ChangeOp::Unset => {
            remove_at(doc, path);
            Ok(())
        }
        ChangeOp::Push { values } => {
            if get_at_mut(doc, path).map_or(true, |v| v.is_null()) {
                set_at(doc, path, Value::Array(Vec::new()))?;
            }
            match get_at_mut(doc, path) {
                Some(Value::Array(items)) => {
                    items.extend(values.iter().cloned());
                    Ok(())
                }
                _ => Err(PathError::wrong_shape(path.clone(), "an array")),
            }
        }
        ChangeOp::Pull { values } => match get_at_mut(doc, path) {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Array(items)) => {
                items.retain(|item| !values.iter().any(|v| pull_matches(item, v)));
                Ok(())
            }
            Some(_) => Err(PathError::wrong_shape(path.clone(), "an array")),
        },
    }
}

/// True if `candidate` selects `element` for removal: structurally equal,
/// or naming the same `_id`.
pub(crate) fn pull_matches(element: &Value, candidate: &Value) -> bool {
    if deep_equal(element, candidate) {
        return true;
    }
    let Some(id) = element.get("_id") else {
        return false;
    };
    match candidate {
        Value::Object(obj) => obj.get("_id").is_some_and(|c| deep_equal(id, c)),
        scalar => deep_equal(id, scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_serde_is_op_tagged() {
        let change = Change::set("address.city", "Oslo").with_type(Some(TypeTag::String));
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            json!({"path": ["address", "city"], "op": "set", "value": "Oslo", "field_type": "string"})
        );
        let back: Change = serde_json::from_value(json).unwrap();
        assert_eq!(back, change);
    }

    #[test]
    fn test_unset_missing_path_is_noop() {
        let doc = json!({"a": 1});
        let out = apply_changeset(&doc, &Changeset::new().with_change(Change::unset("b.c"))).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn test_push_creates_array() {
        let doc = json!({});
        let out = apply_changeset(
            &doc,
            &Changeset::new().with_change(Change::push("tags", vec![json!("a")])),
        )
        .unwrap();
        assert_eq!(out, json!({"tags": ["a"]}));
    }

    #[test]
    fn test_push_into_scalar_fails() {
        let doc = json!({"tags": 3});
        let err = apply_changeset(
            &doc,
            &Changeset::new().with_change(Change::push("tags", vec![json!("a")])),
        )
        .unwrap_err();
        assert!(matches!(err, PathError::WrongShape { .. }));
    }

    #[test]
    fn test_pull_by_value_and_by_id() {
        let doc = json!({
            "tags": ["a", "b", "a"],
            "lines": [{"_id": "l1", "qty": 1}, {"_id": "l2", "qty": 2}]
        });
        let out = apply_changeset(
            &doc,
            &Changeset::new()
                .with_change(Change::pull("tags", vec![json!("a")]))
                .with_change(Change::pull("lines", vec![json!("l1")])),
        )
        .unwrap();
        assert_eq!(out["tags"], json!(["b"]));
        assert_eq!(out["lines"], json!([{"_id": "l2", "qty": 2}]));
    }
}
