//! Validation: collect the paths worth checking, run every check, fold the
//! failures into the error aggregate.
//!
//! Only one pass may run per document at a time; a second concurrent call
//! fails with [`ParallelOperationError`] instead of racing the first.

use super::Document;
use crate::error::{
    DocResult, ErrorAggregate, HookError, ParallelOperationError, ValidationError, ValidatorError,
    ValidatorKind,
};
use crate::schema::{FieldDescriptor, Outcome, Resolution, SchemaType};
use crate::tracker::{PathState, PathStateTracker};
use crate::value::{get_at, is_nullish};
use crate::Path;
use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Narrows a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Only validate these paths (and everything below them).
    pub paths: Option<Vec<Path>>,
    /// Only validate paths that were modified (or sit below a modified path).
    pub modified_only: bool,
}

impl ValidateOptions {
    pub fn paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        Self {
            paths: Some(paths.into_iter().map(Into::into).collect()),
            modified_only: false,
        }
    }

    pub fn modified_only() -> Self {
        Self {
            paths: None,
            modified_only: true,
        }
    }
}

/// Releases the in-flight flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ParallelOperationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| PassGuard(flag))
            .map_err(|_| ParallelOperationError {
                operation: "validate",
            })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Failures keyed by path: (check index, error). Index 0 is the required
/// check; validators follow in registration order.
type Failures = BTreeMap<Path, (usize, ValidatorError)>;

type PendingCheck = (Path, usize, BoxFuture<'static, Option<ValidatorError>>);

fn record(failures: &mut Failures, path: Path, index: usize, error: ValidatorError) {
    match failures.get(&path) {
        Some((existing, _)) if *existing <= index => {}
        _ => {
            failures.insert(path, (index, error));
        }
    }
}

impl Document {
    /// Validate the document, awaiting asynchronous validators.
    pub async fn validate(&self) -> DocResult<()> {
        self.validate_with(ValidateOptions::default()).await
    }

    pub async fn validate_with(&self, opts: ValidateOptions) -> DocResult<()> {
        let _guard = PassGuard::acquire(&self.validating)?;
        self.run_pre_validate()?;

        let plan = self.plan(&opts);
        let mut failures = Failures::new();
        let mut pending = Vec::new();
        for (path, desc) in &plan {
            self.check_path(path, desc, &mut failures, Some(&mut pending));
        }
        if !pending.is_empty() {
            tracing::debug!(checks = pending.len(), "awaiting async validators");
        }
        let settled = join_all(
            pending
                .into_iter()
                .map(|(path, index, check)| async move { (path, index, check.await) }),
        )
        .await;
        for (path, index, outcome) in settled {
            if let Some(error) = outcome {
                record(&mut failures, path, index, error);
            }
        }
        self.finish(failures, &opts)
    }

    /// Validate without awaiting; asynchronous validators are skipped.
    pub fn validate_sync(&self) -> DocResult<()> {
        self.validate_sync_with(ValidateOptions::default())
    }

    pub fn validate_sync_with(&self, opts: ValidateOptions) -> DocResult<()> {
        let _guard = PassGuard::acquire(&self.validating)?;
        self.run_pre_validate()?;

        let plan = self.plan(&opts);
        let mut failures = Failures::new();
        for (path, desc) in &plan {
            self.check_path(path, desc, &mut failures, None);
        }
        self.finish(failures, &opts)
    }

    fn run_pre_validate(&self) -> DocResult<()> {
        for hook in &self.schema.hooks().pre_validate {
            hook(self).map_err(|message| HookError {
                phase: "pre_validate",
                message,
            })?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Path selection

    /// Every path to check, with its descriptor, in path order.
    fn plan(&self, opts: &ValidateOptions) -> Vec<(Path, Arc<FieldDescriptor>)> {
        let mut candidates = BTreeSet::new();
        self.collect_tracked(&self.tracker, &Path::root(), true, &mut candidates);
        for (_, sub) in self.arena.iter() {
            candidates.insert(sub.root.clone());
            self.collect_tracked(&sub.tracker, &sub.root, false, &mut candidates);
        }
        if let Some(requested) = &opts.paths {
            candidates.extend(requested.iter().cloned());
        }

        let mut plan = BTreeMap::new();
        for path in candidates {
            self.expand(path, &mut plan);
        }
        plan.into_iter()
            .filter(|(path, _)| self.in_scope(path, opts))
            .collect()
    }

    fn collect_tracked(
        &self,
        tracker: &PathStateTracker,
        root: &Path,
        top_level: bool,
        out: &mut BTreeSet<Path>,
    ) {
        for rel in tracker.paths_in(PathState::Require) {
            let path = root.join(rel);
            if !top_level || self.is_selected(&path) || self.is_modified(path.clone()) {
                out.insert(path);
            }
        }
        for state in [PathState::Init, PathState::Modify, PathState::Default] {
            out.extend(tracker.paths_in(state).iter().map(|rel| root.join(rel)));
        }
    }

    /// Resolve `path` and add it (or the leaves it stands for) to `plan`.
    fn expand(&self, path: Path, plan: &mut BTreeMap<Path, Arc<FieldDescriptor>>) {
        match self.schema.resolve(&path, &self.doc) {
            Resolution::Nested => {
                let leaves: Vec<Path> = self.schema.fields_under(&path).map(|(p, _)| p.clone()).collect();
                for leaf in leaves {
                    self.expand(leaf, plan);
                }
            }
            Resolution::Field(desc) => {
                if !desc.can_fail() {
                    return;
                }
                match desc.schema_type() {
                    SchemaType::Array(element) | SchemaType::Map(element) if element.can_fail() => {
                        for child in child_paths(get_at(&self.doc, &path), &path) {
                            plan.entry(child).or_insert_with(|| element.clone());
                        }
                    }
                    _ => {}
                }
                plan.insert(path, desc);
            }
            Resolution::MixedChild | Resolution::Undeclared => {}
        }
    }

    fn in_scope(&self, path: &Path, opts: &ValidateOptions) -> bool {
        if let Some(requested) = &opts.paths {
            if !requested.iter().any(|r| r.is_prefix_of(path)) {
                return false;
            }
        }
        if opts.modified_only {
            return self.is_modified(path.clone())
                || path.ancestors().any(|a| self.is_directly_modified(a));
        }
        true
    }

    // ------------------------------------------------------------------
    // Checks

    fn check_path(
        &self,
        path: &Path,
        desc: &FieldDescriptor,
        failures: &mut Failures,
        pending: Option<&mut Vec<PendingCheck>>,
    ) {
        let view = self.scope_view(path);
        let value = get_at(&self.doc, path);
        if desc.is_required(&view) && !desc.satisfies_required(value) {
            let error = ValidatorError::render(
                path.clone(),
                &desc.required_message,
                value,
                ValidatorKind::Required,
            );
            record(failures, path.clone(), 0, error);
            return;
        }
        let Some(value) = value.filter(|v| !is_nullish(Some(v))) else {
            return;
        };

        let mut pending = pending;
        for (i, validator) in desc.validators().iter().enumerate() {
            match validator.start(path, value, &view) {
                Outcome::Pass => {}
                Outcome::Fail(error) => record(failures, path.clone(), i + 1, error),
                Outcome::Pending(check) => match pending.as_deref_mut() {
                    Some(queue) => queue.push((path.clone(), i + 1, check)),
                    None => tracing::debug!(path = %path, "skipping async validator in sync pass"),
                },
            }
        }
    }

    /// Fold a pass's failures into the aggregate and report.
    ///
    /// Cast errors survive validation; validator errors are recomputed on
    /// every pass (for the requested paths only, when paths were given).
    fn finish(&self, failures: Failures, opts: &ValidateOptions) -> DocResult<()> {
        let report = {
            let mut slot = self.lock_errors();
            let mut agg = slot.take().unwrap_or_else(ErrorAggregate::new);
            match &opts.paths {
                None => agg.retain(|_, e| e.is_cast()),
                Some(requested) => {
                    agg.retain(|p, e| e.is_cast() || !requested.iter().any(|r| r.is_prefix_of(p)))
                }
            }
            for (path, (_, error)) in failures {
                agg.invalidate(path, error);
            }

            let mut report = agg.clone();
            report.retain(|p, _| self.in_scope(p, opts));
            *slot = if agg.is_empty() { None } else { Some(agg) };
            report
        };

        let outcome = if report.is_empty() {
            None
        } else {
            Some(ValidationError { errors: report })
        };
        if let Some(error) = &outcome {
            tracing::debug!(paths = ?error.paths(), "validation failed");
        }
        for hook in &self.schema.hooks().post_validate {
            hook(self, outcome.as_ref());
        }
        match outcome {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

/// Element (or entry) paths of an array or map value.
fn child_paths(value: Option<&Value>, path: &Path) -> Vec<Path> {
    match value {
        Some(Value::Array(items)) => (0..items.len()).map(|i| path.clone().index(i)).collect(),
        Some(Value::Object(entries)) => entries.keys().map(|k| path.clone().key(k.as_str())).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, Validator};
    use crate::FieldError;
    use serde_json::json;

    fn person() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .id(false)
                .field("name", FieldDescriptor::string().required())
                .field("age", FieldDescriptor::number().min(0.0).max(150.0))
                .field("tags", FieldDescriptor::array(FieldDescriptor::string().min_length(2)))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn required_and_min_are_reported_together() {
        let doc = Document::new(person(), json!({"age": -1})).unwrap();
        let err = doc.validate_sync().unwrap_err();
        let errors = &err.as_validation().unwrap().errors;
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.get(&Path::parse("name")).unwrap().validator_kind(),
            Some(&ValidatorKind::Required)
        );
        assert_eq!(
            errors.get(&Path::parse("age")).unwrap().to_string(),
            "Path `age` (-1) is less than minimum allowed value (0)."
        );
    }

    #[test]
    fn validator_errors_reset_between_passes() {
        let mut doc = Document::new(person(), json!({"name": "a", "age": -1})).unwrap();
        assert!(doc.validate_sync().is_err());
        doc.set("age", 3).unwrap();
        doc.validate_sync().unwrap();
        assert!(doc.errors().is_none());
    }

    #[test]
    fn cast_errors_are_sticky() {
        let mut doc = Document::new(person(), json!({"name": "a"})).unwrap();
        doc.set("age", "old").unwrap();
        let err = doc.validate_sync().unwrap_err();
        assert!(matches!(
            err.as_validation().unwrap().get("age"),
            Some(FieldError::Cast(_))
        ));
        assert!(doc.validate_sync().is_err());
    }

    #[test]
    fn array_elements_are_checked() {
        let doc = Document::new(person(), json!({"name": "a", "tags": ["ok", "x"]})).unwrap();
        let err = doc.validate_sync().unwrap_err();
        assert_eq!(err.as_validation().unwrap().paths(), vec!["tags.1"]);
    }

    #[test]
    fn hydrated_required_outside_projection_is_skipped() {
        let doc = Document::hydrate(
            person(),
            json!({"age": 4}),
            Some(crate::Projection::include(["age"])),
        )
        .unwrap();
        doc.validate_sync().unwrap();
    }

    #[test]
    fn requested_paths_limit_the_pass() {
        let doc = Document::new(person(), json!({"age": -1})).unwrap();
        let err = doc.validate_sync_with(ValidateOptions::paths(["age"])).unwrap_err();
        assert_eq!(err.as_validation().unwrap().paths(), vec!["age"]);
    }

    #[test]
    fn modified_only_skips_untouched_paths() {
        let mut doc = Document::hydrate(person(), json!({"name": "", "age": 4}), None).unwrap();
        doc.set("age", 5).unwrap();
        doc.validate_sync_with(ValidateOptions::modified_only()).unwrap();
        assert!(doc.validate_sync().is_err());
    }

    #[test]
    fn sync_pass_skips_async_validators() {
        let schema = Arc::new(
            Schema::builder()
                .id(false)
                .field(
                    "code",
                    FieldDescriptor::string()
                        .validate(Validator::new_async(|_| Box::pin(async { Ok(false) }))),
                )
                .build()
                .unwrap(),
        );
        let doc = Document::new(schema, json!({"code": "x"})).unwrap();
        doc.validate_sync().unwrap();
    }

    #[test]
    fn validation_flag_is_released() {
        let doc = Document::new(person(), json!({})).unwrap();
        assert!(doc.validate_sync().is_err());
        assert!(!matches!(
            doc.validate_sync(),
            Err(crate::DocumentError::ParallelOperation(_))
        ));
    }
}
