//! Changesets, commit and rollback.

use super::Document;
use crate::changeset::{Change, Changeset};
use crate::schema::Resolution;
use crate::tracker::PathState;
use crate::value::{get_at, remove_at, set_at};
use crate::Path;
use serde_json::Value;
use std::collections::BTreeSet;

impl Document {
    /// The writes that bring the stored record in line with this document.
    ///
    /// Modified paths are listed with every path below a listed ancestor
    /// folded into the ancestor. Materialized defaults are included.
    /// Arrays that were only pushed to (or only pulled from) are emitted as
    /// incremental operations; anything more involved becomes a full `Set`.
    pub fn changeset(&self) -> Changeset {
        let mut raw: BTreeSet<Path> = self.tracker.paths_in(PathState::Modify).clone();
        raw.extend(
            self.tracker
                .paths_in(PathState::Default)
                .iter()
                .filter(|p| get_at(&self.doc, p).is_some_and(|v| !v.is_null()))
                .cloned(),
        );

        let mut changes = Changeset::new();
        for path in raw.iter().filter(|p| !raw.iter().any(|a| a.is_ancestor_of(p))) {
            let change = match self.incremental(path, &raw) {
                Some(change) => change,
                None => match get_at(&self.doc, path) {
                    Some(value) => Change::set(path.clone(), self.depopulated(path, value.clone())),
                    None => Change::unset(path.clone()),
                },
            };
            let field_type = match self.schema.resolve(path, &self.doc) {
                Resolution::Field(desc) => Some(desc.tag()),
                _ => None,
            };
            changes.push(change.with_type(field_type));
        }
        tracing::debug!(changes = changes.len(), "computed changeset");
        changes
    }

    /// A `Push` or `Pull` for `path`, when its pending array operations can
    /// be sent as such.
    fn incremental(&self, path: &Path, raw: &BTreeSet<Path>) -> Option<Change> {
        let atomics = self.atomics.get(path)?;
        let mixed = !atomics.pushed.is_empty() && !atomics.pulled.is_empty();
        let nested_write = raw.iter().any(|p| path.is_ancestor_of(p));
        if self.is_new || atomics.replaced || mixed || nested_write {
            return None;
        }
        if !atomics.pushed.is_empty() {
            Some(Change::push(path.clone(), atomics.pushed.clone()))
        } else if !atomics.pulled.is_empty() {
            Some(Change::pull(path.clone(), atomics.pulled.clone()))
        } else {
            None
        }
    }

    /// `value` (stored at `path`) with populated references put back to ids.
    fn depopulated(&self, path: &Path, mut value: Value) -> Value {
        for (populated, id) in &self.populated {
            let Some(rel) = populated.strip_prefix(path) else {
                continue;
            };
            if rel.is_empty() {
                return id.clone();
            }
            if let Err(e) = set_at(&mut value, &rel, id.clone()) {
                tracing::warn!(path = %populated, error = %e, "cannot depopulate reference");
            }
        }
        value
    }

    /// Accept the current state as persisted.
    ///
    /// Modified and defaulted paths become clean, every scope stops being
    /// new, and the rollback state is discarded.
    pub fn commit(&mut self) {
        let committed = self.tracker.paths_in(PathState::Modify).len();
        self.tracker.move_all(PathState::Modify, PathState::Init);
        self.tracker.move_all(PathState::Default, PathState::Init);
        for sub in self.arena.iter_mut() {
            sub.tracker.move_all(PathState::Modify, PathState::Init);
            sub.tracker.move_all(PathState::Default, PathState::Init);
            sub.is_new = false;
        }
        self.is_new = false;
        self.atomics.clear();
        self.snapshot.clear();
        self.backup = None;
        *self.errors_mut() = None;
        tracing::debug!(paths = committed, "committed document");
    }

    /// Undo every change since the last commit (or since construction).
    ///
    /// Calling it again without further writes does nothing.
    pub fn rollback(&mut self) {
        let Some(backup) = self.backup.take() else {
            return;
        };
        let snapshot = std::mem::take(&mut self.snapshot);
        let restored = snapshot.len();
        for (top, prior) in snapshot {
            match prior {
                Some(value) => {
                    if let Err(e) = set_at(&mut self.doc, &top, value) {
                        tracing::warn!(path = %top, error = %e, "cannot restore value");
                    }
                }
                None => {
                    remove_at(&mut self.doc, &top);
                }
            }
        }
        self.tracker = backup.tracker;
        self.arena = backup.arena;
        self.atomics = backup.atomics;
        self.populated = backup.populated;
        *self.errors_mut() = backup.errors;
        tracing::debug!(paths = restored, "rolled back document");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangeOp;
    use crate::schema::{FieldDescriptor, Schema, TypeTag};
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        let line = Schema::builder()
            .field("qty", FieldDescriptor::number())
            .build()
            .unwrap();
        Arc::new(
            Schema::builder()
                .id(false)
                .field("name", FieldDescriptor::string())
                .field("status", FieldDescriptor::string().default_value("open"))
                .field("address.city", FieldDescriptor::string())
                .field("tags", FieldDescriptor::array(FieldDescriptor::string()))
                .field("lines", FieldDescriptor::document_array(line))
                .field("owner", FieldDescriptor::reference("users"))
                .build()
                .unwrap(),
        )
    }

    fn hydrated() -> Document {
        Document::hydrate(
            schema(),
            json!({
                "name": "a",
                "status": "open",
                "address": {"city": "x"},
                "tags": ["t"],
                "lines": [{"_id": "l1", "qty": 1}, {"_id": "l2", "qty": 2}],
                "owner": "u1"
            }),
            None,
        )
        .unwrap()
    }

    #[test]
    fn descendants_fold_into_listed_ancestors() {
        let mut doc = hydrated();
        doc.set("address", json!({"city": "y"})).unwrap();
        doc.set("name", "b").unwrap();
        let changes = doc.changeset();
        assert_eq!(changes.paths(), vec!["address", "name"]);
        assert_eq!(
            changes.get("name").unwrap().field_type,
            Some(TypeTag::String)
        );
    }

    #[test]
    fn materialized_defaults_are_persisted() {
        let doc = Document::hydrate(schema(), json!({"name": "a"}), None).unwrap();
        let changes = doc.changeset();
        assert_eq!(changes.paths(), vec!["status"]);
        assert_eq!(
            changes.get("status").unwrap().op,
            ChangeOp::Set {
                value: json!("open")
            }
        );
    }

    #[test]
    fn cleared_values_are_unset() {
        let mut doc = hydrated();
        doc.set_with(
            "nope",
            1,
            crate::SetOptions {
                strict: Some(crate::StrictMode::Off),
                ..Default::default()
            },
        )
        .unwrap();
        doc.rollback();
        assert!(doc.get("nope").is_none());

        doc.mark_modified("gone");
        assert_eq!(doc.changeset().get("gone").unwrap().op, ChangeOp::Unset);
    }

    #[test]
    fn pure_push_and_pull_stay_incremental() {
        let mut doc = hydrated();
        doc.push("tags", vec![json!("u")]).unwrap();
        assert_eq!(
            doc.changeset().get("tags").unwrap().op,
            ChangeOp::Push {
                values: vec![json!("u")]
            }
        );

        let mut doc = hydrated();
        doc.pull("lines", json!("l1")).unwrap();
        assert_eq!(
            doc.changeset().get("lines").unwrap().op,
            ChangeOp::Pull {
                values: vec![json!("l1")]
            }
        );
    }

    #[test]
    fn mixed_array_operations_collapse_to_set() {
        let mut doc = hydrated();
        doc.push("tags", vec![json!("u")]).unwrap();
        doc.pull("tags", json!("t")).unwrap();
        assert_eq!(
            doc.changeset().get("tags").unwrap().op,
            ChangeOp::Set {
                value: json!(["u"])
            }
        );

        let mut doc = hydrated();
        doc.push("lines", vec![json!({"_id": "l3", "qty": 3})]).unwrap();
        doc.set("lines.0.qty", 7).unwrap();
        let changes = doc.changeset();
        assert_eq!(changes.paths(), vec!["lines"]);
        assert!(matches!(changes.get("lines").unwrap().op, ChangeOp::Set { .. }));
    }

    #[test]
    fn populated_references_are_written_as_ids() {
        let mut doc = hydrated();
        doc.populate("owner", json!({"_id": "u1", "name": "Ada"})).unwrap();
        assert!(!doc.is_dirty());
        assert_eq!(doc.populated("owner"), Some(&json!("u1")));

        doc.mark_modified("owner");
        assert_eq!(
            doc.changeset().get("owner").unwrap().op,
            ChangeOp::Set {
                value: json!("u1")
            }
        );
    }

    #[test]
    fn commit_cleans_every_scope() {
        let mut doc = Document::new(schema(), json!({"lines": [{"qty": 1}]})).unwrap();
        doc.commit();
        assert!(!doc.is_new());
        assert!(!doc.is_dirty());
        assert!(doc.arena.iter().all(|(_, s)| !s.is_new));

        doc.set("lines.0.qty", 2).unwrap();
        assert_eq!(doc.changeset().paths(), vec!["lines.0.qty"]);
    }

    #[test]
    fn rollback_restores_values_and_states() {
        let mut doc = hydrated();
        let before = doc.value().clone();
        doc.set("name", "b").unwrap();
        doc.set("address.city", "z").unwrap();
        doc.push("lines", vec![json!({"qty": 5})]).unwrap();
        doc.set("lines.0.qty", 9).unwrap();

        doc.rollback();
        assert_eq!(doc.value(), &before);
        assert!(!doc.is_dirty());
        assert!(doc.is_init("name"));
        assert_eq!(doc.arena.len(), 2);

        doc.rollback();
        assert_eq!(doc.value(), &before);
    }
}
