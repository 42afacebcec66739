//! Write path: `set`, array `push`/`pull` and population.

use super::arena::Seed;
use super::Backup;
use super::Document;
use crate::changeset::pull_matches;
use crate::error::{CastError, DocResult, ErrorAggregate, PathError, StrictModeError, StrictViolation};
use crate::schema::{
    immutable_violation, CastContext, CastFailure, FieldDescriptor, Resolution, SchemaType,
    SetterQueue, StrictMode,
};
use crate::tracker::PathState;
use crate::value::{deep_equal_opt, get_at, set_at};
use crate::Path;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Setters may queue writes that queue further writes; stop after this many rounds.
const MAX_SETTER_ROUNDS: usize = 32;

/// Per-call options for [`Document::set_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Write the value without recording a modification.
    pub skip_mark_modified: bool,
    /// Override the owning schema's strict mode for this write.
    pub strict: Option<StrictMode>,
}

impl Document {
    /// Assign `value` at `path`, casting it to the declared type.
    ///
    /// Cast failures are recorded in the error aggregate and reported by the
    /// next validation; only strict-mode refusals and malformed paths fail
    /// the call itself.
    pub fn set(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> DocResult<()> {
        self.set_with(path, value, SetOptions::default())
    }

    pub fn set_with(
        &mut self,
        path: impl Into<Path>,
        value: impl Into<Value>,
        opts: SetOptions,
    ) -> DocResult<()> {
        let path = path.into();
        self.open_window();
        let queue = SetterQueue::default();
        self.set_inner(&path, value.into(), &opts, &queue)?;
        self.drain_setter_queue(&opts, &queue)
    }

    /// Record `path` as modified without writing.
    pub fn mark_modified(&mut self, path: impl Into<Path>) {
        self.open_window();
        self.mark_modified_path(&path.into());
    }

    /// Forget a modification of `path`; the value is kept.
    pub fn unmark_modified(&mut self, path: impl Into<Path>) {
        let path = path.into();
        self.each_tracker(&path, |tracker, root| {
            if let Some(rel) = path.strip_prefix(root) {
                if tracker.is_in_state(&rel, PathState::Modify) {
                    tracker.transition(&rel, PathState::Init);
                }
            }
        });
    }

    pub(super) fn drain_setter_queue(&mut self, opts: &SetOptions, queue: &SetterQueue) -> DocResult<()> {
        for _ in 0..MAX_SETTER_ROUNDS {
            let pending = std::mem::take(&mut *queue.borrow_mut());
            if pending.is_empty() {
                return Ok(());
            }
            for (path, value) in pending {
                self.set_inner(&path, value, opts, queue)?;
            }
        }
        tracing::warn!(rounds = MAX_SETTER_ROUNDS, "setter writes did not settle, dropping the rest");
        queue.borrow_mut().clear();
        Ok(())
    }

    pub(super) fn set_inner(
        &mut self,
        path: &Path,
        value: Value,
        opts: &SetOptions,
        queue: &SetterQueue,
    ) -> DocResult<()> {
        if path.is_empty() {
            let Value::Object(fields) = value else {
                return Err(PathError::wrong_shape(Path::root(), "an object").into());
            };
            for (key, value) in fields {
                self.set_inner(&Path::root().key(key), value, opts, queue)?;
            }
            return Ok(());
        }
        self.require_array_parents(path)?;
        match self.schema.resolve(path, &self.doc) {
            Resolution::Field(desc) => self.set_field(path, &desc, value, opts, queue),
            Resolution::Nested => self.set_nested(path, value, opts, queue),
            Resolution::MixedChild => self.set_raw(path, value, opts),
            Resolution::Undeclared => match self.strict_for(path, opts) {
                StrictMode::Off => self.set_raw(path, value, opts),
                StrictMode::Ignore => {
                    tracing::debug!(path = %path, "dropping write to undeclared path");
                    Ok(())
                }
                StrictMode::Throw => Err(StrictModeError {
                    path: path.clone(),
                    violation: StrictViolation::Undeclared,
                }
                .into()),
            },
        }
    }

    // ------------------------------------------------------------------
    // Assignment by resolution

    /// Indexing into a declared array needs the stored array to exist.
    fn require_array_parents(&self, path: &Path) -> DocResult<()> {
        let segs = path.segments();
        for (i, seg) in segs.iter().enumerate().skip(1) {
            if !seg.is_index() {
                continue;
            }
            let parent = Path::from_segments(segs[..i].to_vec());
            if matches!(get_at(&self.doc, &parent), Some(Value::Array(_))) {
                continue;
            }
            if let Resolution::Field(desc) = self.schema.resolve(&parent, &self.doc) {
                if desc.schema_type().is_array() {
                    return Err(PathError::wrong_shape(parent, "an array").into());
                }
            }
        }
        Ok(())
    }

    fn set_field(
        &mut self,
        path: &Path,
        desc: &Arc<FieldDescriptor>,
        value: Value,
        opts: &SetOptions,
        queue: &SetterQueue,
    ) -> DocResult<()> {
        let prior = get_at(&self.doc, path).cloned();
        let ctx = CastContext {
            path: path.clone(),
            scope_root: self.scope_root(path),
            prior: prior.as_ref(),
            is_init: false,
            strict: opts.strict,
            queue,
        };
        let cast = match desc.apply_setters(value, &ctx) {
            Ok(v) => v,
            Err(CastFailure::Cast(e)) => {
                self.record_cast_error(path, e);
                return Ok(());
            }
            Err(CastFailure::Strict(e)) => return Err(e.into()),
        };

        let unchanged = deep_equal_opt(prior.as_ref(), Some(&cast));
        if desc.is_immutable() && prior.is_some() && !unchanged && !self.scope_is_new(path) {
            if self.strict_for(path, opts) == StrictMode::Throw {
                return Err(immutable_violation(path).into());
            }
            tracing::debug!(path = %path, "dropping write to immutable path");
            return Ok(());
        }

        let modify = self.should_modify(path, prior.as_ref(), &cast, opts);
        if unchanged && !modify {
            self.clear_error(path);
            return Ok(());
        }

        let structural = matches!(
            desc.schema_type(),
            SchemaType::Embedded(_)
                | SchemaType::DocumentArray { .. }
                | SchemaType::Array(_)
                | SchemaType::Map(_)
        );
        if structural {
            self.clear_subtree_tracking(path);
            self.arena.remove_subtree(path);
        }
        self.write_value(path, cast)?;
        if structural {
            let parent = self.arena.innermost_owner(path);
            self.arena
                .attach_field(path, desc, get_at(&self.doc, path), parent, Seed::Created);
            if desc.schema_type().is_array() && modify {
                self.atomics.entry(path.clone()).or_default().replaced = true;
            }
        }
        if modify {
            self.mark_modified_path(path);
        }
        self.clear_error(path);
        Ok(())
    }

    /// Assign an implicit nested object. Children are set one by one
    /// without marks; the nested path itself is marked unless the result
    /// equals what was stored.
    fn set_nested(
        &mut self,
        path: &Path,
        value: Value,
        opts: &SetOptions,
        queue: &SetterQueue,
    ) -> DocResult<()> {
        let prior = get_at(&self.doc, path).cloned();
        match value {
            Value::Object(fields) => {
                self.clear_subtree_tracking(path);
                self.arena.remove_subtree(path);
                self.write_value(path, Value::Object(Map::new()))?;
                let child_opts = SetOptions {
                    skip_mark_modified: true,
                    ..*opts
                };
                for (key, value) in fields {
                    self.set_inner(&path.clone().key(key), value, &child_opts, queue)?;
                }
                let changed = !deep_equal_opt(prior.as_ref(), get_at(&self.doc, path));
                if !opts.skip_mark_modified && (changed || self.scope_is_new(path)) {
                    self.mark_modified_path(path);
                }
            }
            Value::Null => {
                self.clear_subtree_tracking(path);
                self.arena.remove_subtree(path);
                let modify = self.should_modify(path, prior.as_ref(), &Value::Null, opts);
                self.write_value(path, Value::Null)?;
                if modify {
                    self.mark_modified_path(path);
                }
            }
            other => {
                self.record_cast_error(path, CastError::new(path.clone(), "Object", &other));
                return Ok(());
            }
        }
        self.clear_error(path);
        Ok(())
    }

    /// Store a value without casting (mixed content, ad-hoc paths).
    fn set_raw(&mut self, path: &Path, value: Value, opts: &SetOptions) -> DocResult<()> {
        let prior = get_at(&self.doc, path).cloned();
        let modify = self.should_modify(path, prior.as_ref(), &value, opts);
        self.write_value(path, value)?;
        if modify {
            self.mark_modified_path(path);
        }
        Ok(())
    }

    fn strict_for(&self, path: &Path, opts: &SetOptions) -> StrictMode {
        opts.strict.unwrap_or_else(|| {
            self.arena
                .innermost_owner(path)
                .and_then(|k| self.arena.get(k))
                .map_or(self.schema.options().strict, |s| s.schema.options().strict)
        })
    }

    fn should_modify(&self, path: &Path, prior: Option<&Value>, value: &Value, opts: &SetOptions) -> bool {
        if opts.skip_mark_modified {
            return false;
        }
        if self.scope_is_new(path) {
            return true;
        }
        let state = self.tracker.state_of(path);
        if state == Some(PathState::Modify) {
            return true;
        }
        if prior.is_none() && !self.is_selected(path) {
            return true;
        }
        if state == Some(PathState::Default) && (prior.is_none() || deep_equal_opt(prior, Some(value))) {
            return false;
        }
        !deep_equal_opt(prior, Some(value))
    }

    // ------------------------------------------------------------------
    // Arrays

    /// Append `values` to the array field at `path`.
    ///
    /// The push is recorded as an incremental operation and emitted as such
    /// by [`changeset`](Document::changeset) unless the array is also
    /// replaced or pulled from before saving.
    pub fn push(
        &mut self,
        path: impl Into<Path>,
        values: impl IntoIterator<Item = Value>,
    ) -> DocResult<()> {
        let path = path.into();
        let desc = self.array_field(&path)?;
        let Some(element) = desc.schema_type().element().cloned() else {
            return Err(PathError::wrong_shape(path, "an array field").into());
        };
        let mut items = match get_at(&self.doc, &path) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(PathError::wrong_shape(path, "an array").into()),
        };
        let start = items.len();

        self.open_window();
        let queue = SetterQueue::default();
        let scope_root = self.scope_root(&path);
        let mut pushed = Vec::new();
        for (offset, value) in values.into_iter().enumerate() {
            let ctx = CastContext {
                path: path.clone().index(start + offset),
                scope_root: scope_root.clone(),
                prior: None,
                is_init: false,
                strict: None,
                queue: &queue,
            };
            match element.cast(&value, &ctx) {
                Ok(v) => pushed.push(v),
                Err(CastFailure::Cast(e)) => {
                    let e = CastError::new(path.clone(), "Array", &value).with_reason(e.to_string());
                    self.record_cast_error(&path, e);
                    return Ok(());
                }
                Err(CastFailure::Strict(e)) => return Err(e.into()),
            }
        }
        if pushed.is_empty() {
            return Ok(());
        }

        items.extend(pushed.iter().cloned());
        self.write_value(&path, Value::Array(items))?;
        if let SchemaType::DocumentArray { sub, .. } = desc.schema_type() {
            let parent = self.arena.innermost_owner(&path);
            for (offset, item) in pushed.iter().enumerate() {
                if item.is_object() {
                    let schema = sub.select(Some(item)).unwrap_or(sub.base()).clone();
                    self.arena
                        .attach(path.clone().index(start + offset), schema, item, parent, Seed::Created);
                }
            }
        }
        self.atomics.entry(path.clone()).or_default().pushed.extend(pushed);
        self.mark_modified_path(&path);
        self.drain_setter_queue(&SetOptions::default(), &queue)
    }

    /// Remove every element of the array at `path` matching `value`
    /// (structurally, or by `_id`).
    pub fn pull(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> DocResult<()> {
        let path = path.into();
        let value = value.into();
        self.array_field(&path)?;
        let Some(Value::Array(items)) = get_at(&self.doc, &path) else {
            return Ok(());
        };
        let removed: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| pull_matches(item, &value))
            .map(|(i, _)| i)
            .collect();
        if removed.is_empty() {
            return Ok(());
        }
        let len = items.len();
        let kept: Vec<Value> = items
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, v)| v.clone())
            .collect();

        self.open_window();
        self.write_value(&path, Value::Array(kept))?;
        for &i in &removed {
            let element = path.clone().index(i);
            self.arena.remove_subtree(&element);
            self.each_tracker(&element, |tracker, root| {
                if let Some(rel) = element.strip_prefix(root) {
                    tracker.clear_path(&rel);
                    tracker.clear_descendants(&rel);
                }
            });
        }
        let mut shift = 0;
        for i in 0..len {
            if removed.contains(&i) {
                shift += 1;
                continue;
            }
            if shift == 0 {
                continue;
            }
            let old = path.clone().index(i);
            let new = path.clone().index(i - shift);
            self.arena.rekey(&old, &new);
            self.each_tracker(&path, |tracker, root| {
                if let (Some(o), Some(n)) = (old.strip_prefix(root), new.strip_prefix(root)) {
                    tracker.rekey_subtree(&o, &n);
                }
            });
        }
        if let Some(agg) = self.errors_mut().as_mut() {
            agg.retain(|p, _| !path.is_ancestor_of(p));
        }
        tracing::debug!(path = %path, removed = removed.len(), "pulled array elements");
        self.atomics.entry(path.clone()).or_default().pulled.push(value);
        self.mark_modified_path(&path);
        Ok(())
    }

    fn array_field(&self, path: &Path) -> DocResult<Arc<FieldDescriptor>> {
        match self.schema.resolve(path, &self.doc) {
            Resolution::Field(desc) if desc.schema_type().is_array() => Ok(desc),
            _ => Err(PathError::wrong_shape(path.clone(), "an array field").into()),
        }
    }

    // ------------------------------------------------------------------
    // Population

    /// Replace the reference at `path` with the record it points to.
    ///
    /// Population is not a modification: the changeset writes the original
    /// identifier back.
    pub fn populate(&mut self, path: impl Into<Path>, referenced: Value) -> DocResult<()> {
        let path = path.into();
        match self.schema.resolve(&path, &self.doc) {
            Resolution::Field(desc) if matches!(desc.schema_type(), SchemaType::Id { .. }) => {}
            _ => return Err(PathError::wrong_shape(path, "a reference field").into()),
        }
        let Some(id) = referenced.get("_id").cloned() else {
            return Err(CastError::new(path, "Id", &referenced)
                .with_reason("populated record has no _id")
                .into());
        };
        let original = get_at(&self.doc, &path)
            .filter(|v| !v.is_null())
            .map(|v| crate::schema::reference_id(v).clone())
            .unwrap_or(id);
        self.write_value(&path, referenced)?;
        self.populated.insert(path, original);
        Ok(())
    }

    /// The identifier a populated path replaced.
    pub fn populated(&self, path: impl Into<Path>) -> Option<&Value> {
        self.populated.get(&path.into())
    }

    /// Put the original identifier back at a populated path.
    pub fn depopulate(&mut self, path: impl Into<Path>) -> DocResult<()> {
        let path = path.into();
        if let Some(id) = self.populated.remove(&path) {
            self.write_value(&path, id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bookkeeping

    /// Capture rollback state before the first write of a save cycle.
    pub(super) fn open_window(&mut self) {
        if self.backup.is_some() {
            return;
        }
        let errors = self.errors_mut().clone();
        self.backup = Some(Backup {
            tracker: self.tracker.clone(),
            arena: self.arena.clone(),
            atomics: self.atomics.clone(),
            errors,
            populated: self.populated.clone(),
        });
    }

    fn write_value(&mut self, path: &Path, value: Value) -> DocResult<()> {
        if self.backup.is_some() {
            let top = path.top();
            if !self.snapshot.contains_key(&top) {
                let prior = get_at(&self.doc, &top).cloned();
                self.snapshot.insert(top, prior);
            }
        }
        set_at(&mut self.doc, path, value)?;
        Ok(())
    }

    /// Mark `path` in its owning scope and mirror the mark outward.
    ///
    /// A persisted owner forwards the absolute path; a new owner forwards
    /// its own root instead, since it will be written whole.
    pub(super) fn mark_modified_path(&mut self, path: &Path) {
        let mut current = path.clone();
        let mut owner = self.arena.innermost_owner(path);
        while let Some(key) = owner {
            let Some(sub) = self.arena.get_mut(key) else {
                break;
            };
            if let Some(rel) = current.strip_prefix(&sub.root) {
                sub.tracker.transition(&rel, PathState::Modify);
            }
            if sub.is_new {
                current = sub.root.clone();
            }
            owner = sub.parent;
        }
        self.tracker.transition(&current, PathState::Modify);
    }

    fn clear_subtree_tracking(&mut self, path: &Path) {
        self.each_tracker(path, |tracker, root| {
            if let Some(rel) = path.strip_prefix(root) {
                tracker.clear_descendants(&rel);
            }
        });
        if let Some(agg) = self.errors_mut().as_mut() {
            agg.retain(|p, _| !path.is_ancestor_of(p));
        }
        self.atomics.retain(|p, _| !path.is_ancestor_of(p));
    }

    fn record_cast_error(&mut self, path: &Path, error: CastError) {
        tracing::debug!(path = %path, error = %error, "cast failed");
        let agg = self.errors_mut().get_or_insert_with(ErrorAggregate::new);
        agg.mark_valid(path);
        agg.invalidate(path.clone(), error);
    }

    fn clear_error(&mut self, path: &Path) {
        let errors = self.errors_mut();
        if let Some(agg) = errors.as_mut() {
            agg.mark_valid(path);
            if agg.is_empty() {
                *errors = None;
            }
        }
    }
}
