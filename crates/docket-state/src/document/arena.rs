//! Embedded documents, owned by index.
//!
//! Embedded documents and document-array elements do not hold their own
//! values: their data lives in the owning document's value tree at `root`.
//! What they do own is a schema scope, a new/persisted flag, and a path
//! state tracker keyed by paths relative to `root`. Parents are referenced
//! by [`SubdocKey`] (slot index plus generation), so a stale key to a
//! removed element can never alias a newer one.

use crate::schema::{FieldDescriptor, Schema, SchemaType};
use crate::tracker::{PathState, PathStateTracker};
use crate::value::get_at;
use crate::Path;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Generational handle to an embedded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SubdocKey {
    index: u32,
    generation: u32,
}

/// An embedded document scope.
#[derive(Debug, Clone)]
pub(crate) struct Subdoc {
    /// Absolute location in the owning value tree.
    pub root: Path,
    /// The (variant) schema governing this scope.
    pub schema: Arc<Schema>,
    /// Innermost owning embedded document, if any.
    pub parent: Option<SubdocKey>,
    /// States of paths relative to `root`.
    pub tracker: PathStateTracker,
    pub is_new: bool,
}

/// How freshly attached embedded documents start out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Seed {
    /// Loaded from storage: present paths are clean.
    Hydrated,
    /// Assigned by the caller: present paths are modified.
    Created,
}

impl Seed {
    fn state(self) -> PathState {
        match self {
            Seed::Hydrated => PathState::Init,
            Seed::Created => PathState::Modify,
        }
    }

    fn is_new(self) -> bool {
        matches!(self, Seed::Created)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Subdoc>,
}

/// Arena of embedded documents with a root-path index.
#[derive(Debug, Clone, Default)]
pub(crate) struct SubdocArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: BTreeMap<Path, SubdocKey>,
}

impl SubdocArena {
    pub fn insert(&mut self, subdoc: Subdoc) -> SubdocKey {
        let root = subdoc.root.clone();
        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.entry = Some(subdoc);
                SubdocKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(subdoc),
                });
                SubdocKey {
                    index,
                    generation: 0,
                }
            }
        };
        self.roots.insert(root, key);
        key
    }

    pub fn get(&self, key: SubdocKey) -> Option<&Subdoc> {
        self.slots
            .get(key.index as usize)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.entry.as_ref())
    }

    pub fn get_mut(&mut self, key: SubdocKey) -> Option<&mut Subdoc> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.entry.as_mut())
    }

    fn remove(&mut self, key: SubdocKey) -> Option<Subdoc> {
        let slot = self
            .slots
            .get_mut(key.index as usize)
            .filter(|s| s.generation == key.generation)?;
        let removed = slot.entry.take()?;
        self.free.push(key.index);
        self.roots.remove(&removed.root);
        Some(removed)
    }

    /// The embedded document rooted exactly at `root`.
    pub fn key_at(&self, root: &Path) -> Option<SubdocKey> {
        self.roots.get(root).copied()
    }

    /// Number of live embedded documents.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Live embedded documents in root order.
    pub fn iter(&self) -> impl Iterator<Item = (SubdocKey, &Subdoc)> {
        self.roots
            .values()
            .filter_map(|k| self.get(*k).map(|s| (*k, s)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subdoc> {
        self.slots.iter_mut().filter_map(|s| s.entry.as_mut())
    }

    /// Direct children of `parent` (`None` = the top-level document).
    pub fn children_of(&self, parent: Option<SubdocKey>) -> Vec<SubdocKey> {
        self.iter()
            .filter(|(_, s)| s.parent == parent)
            .map(|(k, _)| k)
            .collect()
    }

    /// The innermost embedded document strictly containing `path`.
    pub fn innermost_owner(&self, path: &Path) -> Option<SubdocKey> {
        let mut ancestors: Vec<Path> = path.ancestors().collect();
        ancestors.reverse();
        ancestors.iter().find_map(|a| self.key_at(a))
    }

    /// Owners of `path`, innermost first, following parent links.
    pub fn owners(&self, path: &Path) -> Vec<SubdocKey> {
        let mut chain = Vec::new();
        let mut current = self.innermost_owner(path);
        while let Some(key) = current {
            chain.push(key);
            current = self.get(key).and_then(|s| s.parent);
        }
        chain
    }

    /// Drop every embedded document rooted at or below `prefix`.
    pub fn remove_subtree(&mut self, prefix: &Path) {
        let doomed: Vec<SubdocKey> = self
            .roots
            .iter()
            .filter(|(root, _)| prefix.is_prefix_of(root))
            .map(|(_, k)| *k)
            .collect();
        for key in doomed {
            self.remove(key);
        }
    }

    /// Move every root at or below `old` to the same place below `new`.
    pub fn rekey(&mut self, old: &Path, new: &Path) {
        let moved: Vec<(Path, SubdocKey)> = self
            .roots
            .iter()
            .filter(|(root, _)| old.is_prefix_of(root))
            .map(|(r, k)| (r.clone(), *k))
            .collect();
        for (root, _) in &moved {
            self.roots.remove(root);
        }
        for (root, key) in moved {
            let Some(rebased) = root.rebase(old, new) else {
                continue;
            };
            if let Some(sub) = self.get_mut(key) {
                sub.root = rebased.clone();
            }
            self.roots.insert(rebased, key);
        }
    }

    /// Attach embedded documents found in `value`, the value of field `desc` at `root`.
    pub fn attach_field(
        &mut self,
        root: &Path,
        desc: &FieldDescriptor,
        value: Option<&Value>,
        parent: Option<SubdocKey>,
        seed: Seed,
    ) {
        match (desc.schema_type(), value) {
            (SchemaType::Embedded(sub), Some(v @ Value::Object(_))) => {
                let schema = sub.select(Some(v)).unwrap_or(sub.base()).clone();
                self.attach(root.clone(), schema, v, parent, seed);
            }
            (SchemaType::DocumentArray { sub, .. }, Some(Value::Array(items))) => {
                for (i, item) in items.iter().enumerate() {
                    if item.is_object() {
                        let schema = sub.select(Some(item)).unwrap_or(sub.base()).clone();
                        self.attach(root.clone().index(i), schema, item, parent, seed);
                    }
                }
            }
            _ => {}
        }
    }

    /// Attach one embedded document and, recursively, the ones inside it.
    pub fn attach(
        &mut self,
        root: Path,
        schema: Arc<Schema>,
        value: &Value,
        parent: Option<SubdocKey>,
        seed: Seed,
    ) -> SubdocKey {
        let tracker = seed_tracker(&schema, value, seed.state());
        let key = self.insert(Subdoc {
            root: root.clone(),
            schema: schema.clone(),
            parent,
            tracker,
            is_new: seed.is_new(),
        });
        for (rel, desc) in schema.fields() {
            self.attach_field(&root.join(rel), desc, get_at(value, rel), Some(key), seed);
        }
        key
    }
}

/// Initial tracker for a scope: present fields in `present`, absent
/// fields with a required rule in `Require`.
pub(crate) fn seed_tracker(schema: &Schema, value: &Value, present: PathState) -> PathStateTracker {
    let mut tracker = PathStateTracker::new();
    for (rel, desc) in schema.fields() {
        if get_at(value, rel).is_some() {
            tracker.transition(rel, present);
        } else if desc.has_required() && !crate::schema::blocked_by_scalar(value, rel) {
            // Conditional rules are evaluated when validating.
            tracker.transition(rel, PathState::Require);
        }
    }
    tracker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;
    use serde_json::json;

    fn line_schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .id(false)
                .field("sku", FieldDescriptor::string().required())
                .field("qty", FieldDescriptor::number())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn attach_document_array_elements() {
        let mut arena = SubdocArena::default();
        let desc = FieldDescriptor::document_array(line_schema());
        let value = json!([{"sku": "a"}, {"qty": 2}]);
        arena.attach_field(&Path::parse("lines"), &desc, Some(&value), None, Seed::Hydrated);

        assert_eq!(arena.len(), 2);
        let first = arena.key_at(&Path::parse("lines.0")).unwrap();
        let sub = arena.get(first).unwrap();
        assert!(sub.tracker.is_in_state(&Path::parse("sku"), PathState::Init));
        let second = arena.get(arena.key_at(&Path::parse("lines.1")).unwrap()).unwrap();
        assert!(second.tracker.is_in_state(&Path::parse("sku"), PathState::Require));
    }

    #[test]
    fn stale_keys_do_not_alias_reused_slots() {
        let mut arena = SubdocArena::default();
        let key = arena.attach(Path::parse("a"), line_schema(), &json!({}), None, Seed::Created);
        arena.remove_subtree(&Path::parse("a"));
        let reused = arena.attach(Path::parse("b"), line_schema(), &json!({}), None, Seed::Created);
        assert!(arena.get(key).is_none());
        assert_eq!(arena.get(reused).unwrap().root, Path::parse("b"));
    }

    #[test]
    fn owners_follow_parent_links() {
        let inner = Arc::new(
            Schema::builder()
                .id(false)
                .field("lines", FieldDescriptor::document_array(line_schema()))
                .build()
                .unwrap(),
        );
        let mut arena = SubdocArena::default();
        arena.attach(
            Path::parse("order"),
            inner,
            &json!({"lines": [{"sku": "x"}]}),
            None,
            Seed::Hydrated,
        );
        let owners = arena.owners(&Path::parse("order.lines.0.sku"));
        assert_eq!(owners.len(), 2);
        assert_eq!(arena.get(owners[0]).unwrap().root, Path::parse("order.lines.0"));
        assert_eq!(arena.get(owners[1]).unwrap().root, Path::parse("order"));
    }

    #[test]
    fn rekey_moves_nested_roots() {
        let mut arena = SubdocArena::default();
        let desc = FieldDescriptor::document_array(line_schema());
        let value = json!([{"sku": "a"}, {"sku": "b"}]);
        arena.attach_field(&Path::parse("lines"), &desc, Some(&value), None, Seed::Hydrated);
        arena.remove_subtree(&Path::parse("lines.0"));
        arena.rekey(&Path::parse("lines.1"), &Path::parse("lines.0"));
        let key = arena.key_at(&Path::parse("lines.0")).unwrap();
        assert_eq!(arena.get(key).unwrap().root, Path::parse("lines.0"));
        assert!(arena.key_at(&Path::parse("lines.1")).is_none());
    }
}
