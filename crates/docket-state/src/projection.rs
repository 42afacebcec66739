//! Field projections of stored records.

use crate::value::{get_at, set_at};
use crate::Path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Which paths a read returned.
///
/// An inclusive projection always keeps `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Only these paths (and their subtrees).
    Include(BTreeSet<Path>),
    /// Everything except these paths.
    Exclude(BTreeSet<Path>),
}

impl Projection {
    pub fn include<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        Projection::Include(paths.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        Projection::Exclude(paths.into_iter().map(Into::into).collect())
    }

    /// True if `path` was (at least partly) returned by the read.
    pub fn is_selected(&self, path: &Path) -> bool {
        match self {
            Projection::Include(paths) => {
                path.first().is_some_and(|s| s.to_key() == "_id")
                    || paths
                        .iter()
                        .any(|p| p.is_prefix_of(path) || path.is_ancestor_of(p))
            }
            Projection::Exclude(paths) => !paths.iter().any(|p| p.is_prefix_of(path)),
        }
    }

    /// Project a raw record.
    pub fn apply(&self, record: &Value) -> Value {
        match self {
            Projection::Include(paths) => {
                let mut out = Value::Object(Map::new());
                let id = Path::root().key("_id");
                for path in paths.iter().chain(std::iter::once(&id)) {
                    if let Some(v) = get_at(record, path) {
                        // Paths come from an existing record, so the write cannot fail.
                        let _ = set_at(&mut out, path, v.clone());
                    }
                }
                out
            }
            Projection::Exclude(paths) => {
                let mut out = record.clone();
                for path in paths {
                    crate::value::remove_at(&mut out, path);
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inclusive_selection() {
        let proj = Projection::include(["name", "address.city"]);
        assert!(proj.is_selected(&Path::parse("name")));
        assert!(proj.is_selected(&Path::parse("address")));
        assert!(proj.is_selected(&Path::parse("_id")));
        assert!(!proj.is_selected(&Path::parse("address.zip")));
        assert!(!proj.is_selected(&Path::parse("age")));
    }

    #[test]
    fn exclusive_selection() {
        let proj = Projection::exclude(["secret"]);
        assert!(!proj.is_selected(&Path::parse("secret.key")));
        assert!(proj.is_selected(&Path::parse("name")));
    }

    #[test]
    fn apply_projects_records() {
        let record = json!({"_id": 1, "name": "a", "age": 3, "address": {"city": "x", "zip": "y"}});
        assert_eq!(
            Projection::include(["address.city"]).apply(&record),
            json!({"_id": 1, "address": {"city": "x"}})
        );
        assert_eq!(
            Projection::exclude(["age", "address"]).apply(&record),
            json!({"_id": 1, "name": "a"})
        );
    }
}
