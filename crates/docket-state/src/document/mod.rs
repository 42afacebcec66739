//! Document instances.
//!
//! A [`Document`] owns a raw value tree, a [`PathStateTracker`], an arena of
//! embedded document scopes and the per-path error aggregate. Mutation
//! (`set`, `push`, `pull`) is synchronous and takes `&mut self`; validation
//! takes `&self` and is guarded so only one pass runs at a time.
//!
//! ```
//! use docket_state::{Document, FieldDescriptor, Schema};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let schema = Arc::new(
//!     Schema::builder()
//!         .id(false)
//!         .field("name", FieldDescriptor::string().required())
//!         .field("age", FieldDescriptor::number())
//!         .build()
//!         .unwrap(),
//! );
//!
//! let mut doc = Document::hydrate(schema, json!({"name": "Ada", "age": 36}), None).unwrap();
//! doc.set("age", "37").unwrap();
//!
//! assert!(doc.is_modified("age"));
//! assert_eq!(doc.get("age"), Some(&json!(37)));
//! assert_eq!(doc.changeset().paths(), vec!["age"]);
//! ```

mod arena;
mod mutation;
mod plain;
mod reconcile;
mod validation;

pub use mutation::SetOptions;
pub use plain::{ToObjectOptions, TransformFn};
pub use validation::ValidateOptions;

use crate::error::{DocResult, ErrorAggregate, HookError, PathError};
use crate::projection::Projection;
use crate::schema::{blocked_by_scalar, CastContext, CastFailure, Schema, SetterQueue};
use crate::tracker::{PathState, PathStateTracker};
use crate::value::{get_at, set_at};
use crate::view::DocView;
use crate::Path;
use arena::{Seed, SubdocArena, SubdocKey};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pending incremental operations on one array path.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ArrayAtomics {
    pub pushed: Vec<Value>,
    pub pulled: Vec<Value>,
    /// The array was also assigned wholesale.
    pub replaced: bool,
}

/// State captured when a mutation window opens, restored by `rollback`.
#[derive(Debug, Clone)]
struct Backup {
    tracker: PathStateTracker,
    arena: SubdocArena,
    atomics: BTreeMap<Path, ArrayAtomics>,
    errors: Option<ErrorAggregate>,
    populated: BTreeMap<Path, Value>,
}

/// A schema-backed document with change tracking.
pub struct Document {
    schema: Arc<Schema>,
    doc: Value,
    tracker: PathStateTracker,
    arena: SubdocArena,
    is_new: bool,
    projection: Option<Projection>,
    errors: Mutex<Option<ErrorAggregate>>,
    validating: AtomicBool,
    atomics: BTreeMap<Path, ArrayAtomics>,
    /// Top-level key → value before the first write in the open window.
    snapshot: BTreeMap<Path, Option<Value>>,
    backup: Option<Backup>,
    /// Populated path → the identifier it replaced.
    populated: BTreeMap<Path, Value>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("doc", &self.doc)
            .field("is_new", &self.is_new)
            .field("tracker", &self.tracker)
            .field("subdocs", &self.arena.len())
            .finish_non_exhaustive()
    }
}

impl Document {
    fn empty(schema: Arc<Schema>, doc: Value, is_new: bool, projection: Option<Projection>) -> Self {
        Self {
            schema,
            doc,
            tracker: PathStateTracker::new(),
            arena: SubdocArena::default(),
            is_new,
            projection,
            errors: Mutex::new(None),
            validating: AtomicBool::new(false),
            atomics: BTreeMap::new(),
            snapshot: BTreeMap::new(),
            backup: None,
            populated: BTreeMap::new(),
        }
    }

    /// Create a new (never persisted) document from caller-supplied values.
    ///
    /// Every supplied path is cast and marked modified; declared defaults
    /// fill the rest and missing required fields are tracked for validation.
    pub fn new(schema: Arc<Schema>, initial: Value) -> DocResult<Self> {
        let Value::Object(fields) = initial else {
            return Err(PathError::wrong_shape(Path::root(), "an object").into());
        };
        let mut doc = Self::empty(schema, Value::Object(Default::default()), true, None);
        let queue = SetterQueue::default();
        let opts = SetOptions::default();
        for (key, value) in fields {
            doc.set_inner(&Path::root().key(key), value, &opts, &queue)?;
        }
        doc.drain_setter_queue(&opts, &queue)?;
        doc.apply_defaults()?;
        doc.seed_required();
        Ok(doc)
    }

    /// Construct a document from a stored record.
    ///
    /// Values are taken as stored (not cast). Present fields start clean,
    /// selected fields missing from the record receive their defaults, and
    /// undeclared keys are kept.
    pub fn hydrate(
        schema: Arc<Schema>,
        raw: Value,
        projection: Option<Projection>,
    ) -> DocResult<Self> {
        if !raw.is_object() {
            return Err(PathError::wrong_shape(Path::root(), "an object").into());
        }
        let mut doc = Self::empty(schema.clone(), raw, false, projection);

        for (path, _) in schema.fields() {
            if get_at(&doc.doc, path).is_some() {
                doc.tracker.transition(path, PathState::Init);
            }
        }
        if let Value::Object(map) = &doc.doc {
            for key in map.keys() {
                let path = Path::root().key(key.as_str());
                if schema.field(&path).is_none() && !schema.is_nested(&path) {
                    doc.tracker.transition(&path, PathState::Init);
                }
            }
        }
        for (path, desc) in schema.fields() {
            doc.arena
                .attach_field(path, desc, get_at(&doc.doc, path), None, Seed::Hydrated);
        }
        doc.apply_defaults()?;
        doc.apply_subdoc_defaults()?;
        doc.seed_required();
        tracing::debug!(paths = doc.tracker.len(), subdocs = doc.arena.len(), "hydrated document");
        Ok(doc)
    }

    /// Materialize defaults for selected, absent fields.
    fn apply_defaults(&mut self) -> DocResult<()> {
        let schema = self.schema.clone();
        let queue = SetterQueue::default();
        for (path, desc) in schema.fields() {
            if !desc.has_default()
                || get_at(&self.doc, path).is_some()
                || !self.is_selected(path)
                || blocked_by_scalar(&self.doc, path)
            {
                continue;
            }
            let ctx = CastContext {
                path: path.clone(),
                scope_root: Path::root(),
                prior: None,
                is_init: !self.is_new,
                strict: None,
                queue: &queue,
            };
            let outcome = desc.get_default(&DocView::new(&self.doc, self.is_new), &ctx);
            match outcome {
                Ok(Some(value)) => {
                    set_at(&mut self.doc, path, value)?;
                    self.tracker.transition(path, PathState::Default);
                    self.arena
                        .attach_field(path, desc, get_at(&self.doc, path), None, Seed::Created);
                }
                Ok(None) => {}
                Err(CastFailure::Cast(e)) => {
                    self.errors_mut()
                        .get_or_insert_with(ErrorAggregate::new)
                        .invalidate(path.clone(), e);
                }
                Err(CastFailure::Strict(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Materialize defaults inside embedded documents loaded from storage.
    ///
    /// Scopes are visited outermost first; the default lands in `Default`
    /// state in both the scope's tracker and the top-level one.
    fn apply_subdoc_defaults(&mut self) -> DocResult<()> {
        let mut scopes: Vec<(SubdocKey, Path, Arc<Schema>)> = self
            .arena
            .iter()
            .filter(|(_, sub)| !sub.is_new)
            .map(|(key, sub)| (key, sub.root.clone(), sub.schema.clone()))
            .collect();
        scopes.sort_by(|a, b| a.1.cmp(&b.1));

        let queue = SetterQueue::default();
        for (key, root, schema) in scopes {
            for (rel, desc) in schema.fields() {
                let path = root.join(rel);
                if !desc.has_default()
                    || get_at(&self.doc, &path).is_some()
                    || !self.is_selected(&path)
                {
                    continue;
                }
                let Some(scope) = get_at(&self.doc, &root) else {
                    break;
                };
                if blocked_by_scalar(scope, rel) {
                    continue;
                }
                let ctx = CastContext {
                    path: path.clone(),
                    scope_root: root.clone(),
                    prior: None,
                    is_init: true,
                    strict: None,
                    queue: &queue,
                };
                let outcome = desc.get_default(&DocView::new(scope, false), &ctx);
                match outcome {
                    Ok(Some(value)) => {
                        set_at(&mut self.doc, &path, value)?;
                        self.tracker.transition(&path, PathState::Default);
                        if let Some(sub) = self.arena.get_mut(key) {
                            sub.tracker.transition(rel, PathState::Default);
                        }
                        self.arena.attach_field(
                            &path,
                            desc,
                            get_at(&self.doc, &path),
                            Some(key),
                            Seed::Created,
                        );
                    }
                    Ok(None) => {}
                    Err(CastFailure::Cast(e)) => {
                        self.errors_mut()
                            .get_or_insert_with(ErrorAggregate::new)
                            .invalidate(path.clone(), e);
                    }
                    Err(CastFailure::Strict(e)) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Track absent fields that carry a required rule.
    fn seed_required(&mut self) {
        for (path, desc) in self.schema.fields() {
            if desc.has_required()
                && get_at(&self.doc, path).is_none()
                && self.tracker.state_of(path).is_none()
                && !blocked_by_scalar(&self.doc, path)
            {
                self.tracker.transition(path, PathState::Require);
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The raw value tree.
    pub fn value(&self) -> &Value {
        &self.doc
    }

    /// Raw value at `path` (no getters).
    pub fn get(&self, path: impl Into<Path>) -> Option<&Value> {
        get_at(&self.doc, &path.into())
    }

    /// Value at `path` with the field's getters applied.
    pub fn get_with_getters(&self, path: impl Into<Path>) -> Option<Value> {
        let path = path.into();
        let raw = get_at(&self.doc, &path)?.clone();
        match self.schema.resolve(&path, &self.doc) {
            crate::schema::Resolution::Field(desc) => {
                Some(desc.apply_getters(raw, &self.scope_view(&path)))
            }
            _ => Some(raw),
        }
    }

    /// True if the document has never been persisted.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// The projection the document was hydrated with.
    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// True if `path` was returned by the read that produced this document.
    pub fn is_selected(&self, path: &Path) -> bool {
        self.projection.as_ref().map_or(true, |p| p.is_selected(path))
    }

    /// The top-level path state tracker.
    pub fn tracker(&self) -> &PathStateTracker {
        &self.tracker
    }

    /// The state `path` is in, if tracked.
    pub fn state_of(&self, path: impl Into<Path>) -> Option<PathState> {
        self.tracker.state_of(&path.into())
    }

    /// True if `path` or any path below it was modified.
    ///
    /// A modified ancestor does not make its children modified.
    pub fn is_modified(&self, path: impl Into<Path>) -> bool {
        let path = path.into();
        let modified = self.tracker.paths_in(PathState::Modify);
        modified.contains(&path) || modified.iter().any(|p| path.is_ancestor_of(p))
    }

    /// True if anything was modified.
    pub fn is_dirty(&self) -> bool {
        self.tracker.any_in(PathState::Modify)
    }

    /// True if `path` itself was modified.
    pub fn is_directly_modified(&self, path: impl Into<Path>) -> bool {
        self.tracker.is_in_state(&path.into(), PathState::Modify)
    }

    /// Modified paths plus every ancestor of one, as strings, in order.
    pub fn modified_paths(&self) -> Vec<String> {
        let mut all = std::collections::BTreeSet::new();
        for path in self.tracker.paths_in(PathState::Modify) {
            all.extend(path.ancestors());
            all.insert(path.clone());
        }
        all.iter().map(Path::to_string).collect()
    }

    /// True if `path` holds an unpersisted default.
    pub fn is_default(&self, path: impl Into<Path>) -> bool {
        self.tracker.is_in_state(&path.into(), PathState::Default)
    }

    /// True if `path` holds a value loaded from storage and left untouched.
    pub fn is_init(&self, path: impl Into<Path>) -> bool {
        self.tracker.is_in_state(&path.into(), PathState::Init)
    }

    /// Snapshot of the current error aggregate.
    pub fn errors(&self) -> Option<ErrorAggregate> {
        self.lock_errors().clone()
    }

    /// Record an error against `path` (first recorded wins).
    pub fn invalidate(&mut self, path: impl Into<Path>, error: impl Into<crate::FieldError>) -> bool {
        self.errors_mut()
            .get_or_insert_with(ErrorAggregate::new)
            .invalidate(path.into(), error)
    }

    /// Clear the error recorded for `path`.
    pub fn mark_valid(&mut self, path: impl Into<Path>) {
        let path = path.into();
        let errors = self.errors_mut();
        if let Some(agg) = errors.as_mut() {
            agg.mark_valid(&path);
            if agg.is_empty() {
                *errors = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Hooks

    /// Run the schema's pre-save hooks in order.
    pub fn run_pre_save(&mut self) -> DocResult<()> {
        let hooks = self.schema.hooks().pre_save.clone();
        for hook in hooks {
            hook(self).map_err(|message| HookError {
                phase: "pre_save",
                message,
            })?;
        }
        Ok(())
    }

    /// Run the schema's post-save hooks in order.
    pub fn run_post_save(&self) {
        for hook in &self.schema.hooks().post_save {
            hook(self);
        }
    }

    // ------------------------------------------------------------------
    // Internals shared by the submodules

    fn lock_errors(&self) -> MutexGuard<'_, Option<ErrorAggregate>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn errors_mut(&mut self) -> &mut Option<ErrorAggregate> {
        self.errors.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// View of the document or embedded document that owns `path`.
    fn scope_view(&self, path: &Path) -> DocView<'_> {
        match self
            .arena
            .innermost_owner(path)
            .and_then(|k| self.arena.get(k))
        {
            Some(sub) => match get_at(&self.doc, &sub.root) {
                Some(value) => DocView::new(value, sub.is_new),
                None => DocView::new(&self.doc, self.is_new),
            },
            None => DocView::new(&self.doc, self.is_new),
        }
    }

    /// Root of the scope owning `path`.
    fn scope_root(&self, path: &Path) -> Path {
        self.arena
            .innermost_owner(path)
            .and_then(|k| self.arena.get(k))
            .map(|s| s.root.clone())
            .unwrap_or_default()
    }

    /// True if the document or any embedded document owning `path` is new.
    fn scope_is_new(&self, path: &Path) -> bool {
        self.is_new
            || self
                .arena
                .owners(path)
                .into_iter()
                .any(|k| self.arena.get(k).is_some_and(|s| s.is_new))
    }

    /// Apply `f` to the top-level tracker and every owning tracker of
    /// `path`, each with its scope root.
    fn each_tracker(&mut self, path: &Path, mut f: impl FnMut(&mut PathStateTracker, &Path)) {
        f(&mut self.tracker, &Path::root());
        for key in self.arena.owners(path) {
            if let Some(sub) = self.arena.get_mut(key) {
                let root = sub.root.clone();
                f(&mut sub.tracker, &root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;
    use serde_json::json;

    fn person() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .id(false)
                .field("name", FieldDescriptor::string().required())
                .field("age", FieldDescriptor::number())
                .field("role", FieldDescriptor::string().default_value("member"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn new_marks_supplied_paths_and_defaults() {
        let doc = Document::new(person(), json!({"age": "5"})).unwrap();
        assert!(doc.is_new());
        assert_eq!(doc.get("age"), Some(&json!(5)));
        assert!(doc.is_directly_modified("age"));
        assert!(doc.is_default("role"));
        assert_eq!(doc.state_of("name"), Some(PathState::Require));
        assert!(doc.tracker().is_consistent());
    }

    #[test]
    fn hydrate_starts_clean() {
        let doc = Document::hydrate(person(), json!({"name": "a", "age": 1, "extra": true}), None)
            .unwrap();
        assert!(!doc.is_new());
        assert!(!doc.is_dirty());
        assert!(doc.is_init("name"));
        assert!(doc.is_init("extra"));
        assert!(doc.is_default("role"));
    }

    #[test]
    fn hydrate_skips_defaults_outside_projection() {
        let doc = Document::hydrate(
            person(),
            json!({"name": "a"}),
            Some(Projection::include(["name"])),
        )
        .unwrap();
        assert!(doc.get("role").is_none());
        assert!(!doc.is_selected(&Path::parse("age")));
    }

    #[test]
    fn hydrate_fills_embedded_defaults_like_new() {
        let address = Schema::builder()
            .id(false)
            .field("city", FieldDescriptor::string())
            .field("country", FieldDescriptor::string().default_value("NO"))
            .build()
            .unwrap();
        let line = Schema::builder()
            .id(false)
            .field("qty", FieldDescriptor::number().default_value(1))
            .build()
            .unwrap();
        let schema = Arc::new(
            Schema::builder()
                .id(false)
                .field("addr", FieldDescriptor::embedded(address))
                .field("lines", FieldDescriptor::document_array(line))
                .build()
                .unwrap(),
        );
        let raw = json!({"addr": {}, "lines": [{}, {"qty": 4}]});

        let created = Document::new(schema.clone(), raw.clone()).unwrap();
        let stored = Document::hydrate(schema, raw, None).unwrap();
        assert_eq!(stored.value(), created.value());
        assert_eq!(stored.get("addr.country"), Some(&json!("NO")));
        assert_eq!(stored.get("lines.0.qty"), Some(&json!(1)));
        assert_eq!(stored.get("lines.1.qty"), Some(&json!(4)));

        assert!(!stored.is_dirty());
        assert!(stored.is_default("addr.country"));
        let line0 = stored.arena.key_at(&Path::parse("lines.0")).unwrap();
        let sub = stored.arena.get(line0).unwrap();
        assert!(sub.tracker.is_in_state(&Path::parse("qty"), PathState::Default));
        assert_eq!(stored.changeset().paths(), vec!["addr.country", "lines.0.qty"]);
    }

    #[test]
    fn hydrate_skips_embedded_defaults_outside_projection() {
        let address = Schema::builder()
            .id(false)
            .field("country", FieldDescriptor::string().default_value("NO"))
            .build()
            .unwrap();
        let schema = Arc::new(
            Schema::builder()
                .id(false)
                .field("addr", FieldDescriptor::embedded(address))
                .build()
                .unwrap(),
        );
        let doc = Document::hydrate(
            schema,
            json!({"addr": {}}),
            Some(Projection::exclude(["addr.country"])),
        )
        .unwrap();
        assert_eq!(doc.value(), &json!({"addr": {}}));
    }

    #[test]
    fn rejects_non_object_records() {
        assert!(Document::hydrate(person(), json!([1]), None).is_err());
        assert!(Document::new(person(), json!("x")).is_err());
    }
}
