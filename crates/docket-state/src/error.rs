//! Error types for docket-state operations.
//!
//! Casting and validator failures raised while mutating a document are not
//! returned from `set`; they are collected per path in an [`ErrorAggregate`]
//! and surface through `validate`. Structural failures ([`StrictModeError`],
//! [`ParallelOperationError`]) are returned at the call site.

use crate::value::value_type_name;
use crate::Path;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for document operations.
pub type DocResult<T> = Result<T, DocumentError>;

/// Result type alias for raw tree navigation.
pub type PathResult<T> = Result<T, PathError>;

/// Errors navigating or writing the raw value tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    /// Array index is out of bounds.
    #[error("index {index} out of bounds (len: {len}) at path {path}")]
    IndexOutOfBounds {
        /// The path to the array element.
        path: Path,
        /// The index that was accessed.
        index: usize,
        /// The actual length of the array.
        len: usize,
    },

    /// A segment tried to descend through a value that cannot hold it.
    #[error("cannot traverse into {path}")]
    NotTraversable {
        /// The full path being written.
        path: Path,
    },

    /// The path does not address a value of the expected shape.
    #[error("path {path} is not {expected}")]
    WrongShape {
        /// The offending path.
        path: Path,
        /// What the operation needed.
        expected: &'static str,
    },
}

impl PathError {
    /// Create an index out of bounds error.
    #[inline]
    pub fn index_out_of_bounds(path: Path, index: usize, len: usize) -> Self {
        PathError::IndexOutOfBounds { path, index, len }
    }

    /// Create a not traversable error.
    #[inline]
    pub fn not_traversable(path: Path) -> Self {
        PathError::NotTraversable { path }
    }

    /// Create a wrong shape error.
    #[inline]
    pub fn wrong_shape(path: Path, expected: &'static str) -> Self {
        PathError::WrongShape { path, expected }
    }
}

/// A value could not be coerced to a field's declared type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cast to {target} failed for value {value} ({found}) at path \"{path}\"{}", reason_suffix(.reason))]
pub struct CastError {
    /// The failing path.
    pub path: Path,
    /// Name of the target type.
    pub target: &'static str,
    /// The original value.
    pub value: Value,
    /// JSON type of the original value.
    pub found: &'static str,
    /// Extra detail (nested failure, unknown discriminator).
    pub reason: Option<String>,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl CastError {
    /// Create a cast error for `value` at `path`.
    pub fn new(path: Path, target: &'static str, value: &Value) -> Self {
        CastError {
            path,
            target,
            found: value_type_name(value),
            value: value.clone(),
            reason: None,
        }
    }

    /// Attach a reason (builder pattern).
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Re-root the error under `prefix` (used when a sub-document cast fails).
    pub fn rebased(mut self, prefix: &Path) -> Self {
        self.path = prefix.join(&self.path);
        self
    }
}

/// The kind of validator that produced a [`ValidatorError`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValidatorKind {
    /// The implicit required check.
    Required,
    /// Numeric lower bound.
    Min,
    /// Numeric upper bound.
    Max,
    /// Allowed-value list.
    Enum,
    /// String or array minimum length.
    MinLength,
    /// String or array maximum length.
    MaxLength,
    /// A user-supplied predicate.
    UserDefined,
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidatorKind::Required => "required",
            ValidatorKind::Min => "min",
            ValidatorKind::Max => "max",
            ValidatorKind::Enum => "enum",
            ValidatorKind::MinLength => "minlength",
            ValidatorKind::MaxLength => "maxlength",
            ValidatorKind::UserDefined => "user defined",
        })
    }
}

/// A single validator predicate failed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ValidatorError {
    /// The failing path.
    pub path: Path,
    /// The rendered message.
    pub message: String,
    /// The value that failed.
    pub value: Option<Value>,
    /// Which validator failed.
    pub kind: ValidatorKind,
}

impl ValidatorError {
    /// Render `template` (`{PATH}`, `{VALUE}` placeholders) into an error.
    pub fn render(path: Path, template: &str, value: Option<&Value>, kind: ValidatorKind) -> Self {
        let rendered_value = match value {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => "undefined".to_string(),
        };
        let message = template
            .replace("{PATH}", &path.to_string())
            .replace("{VALUE}", &rendered_value);
        ValidatorError {
            path,
            message,
            value: value.cloned(),
            kind,
        }
    }
}

/// One recorded failure for a path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    /// The value failed to cast during `set`.
    #[error(transparent)]
    Cast(#[from] CastError),
    /// A validator rejected the value.
    #[error(transparent)]
    Validator(#[from] ValidatorError),
}

impl FieldError {
    /// The precise path this failure names.
    pub fn path(&self) -> &Path {
        match self {
            FieldError::Cast(e) => &e.path,
            FieldError::Validator(e) => &e.path,
        }
    }

    /// True for failures recorded by casting.
    pub fn is_cast(&self) -> bool {
        matches!(self, FieldError::Cast(_))
    }

    /// The validator kind, if a validator produced this failure.
    pub fn validator_kind(&self) -> Option<&ValidatorKind> {
        match self {
            FieldError::Cast(_) => None,
            FieldError::Validator(e) => Some(&e.kind),
        }
    }
}

/// Per-path validation errors. At most one error is kept per path; the first
/// recorded failure wins until the path is marked valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorAggregate {
    errors: BTreeMap<Path, FieldError>,
}

impl ErrorAggregate {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` for `path` unless the path already has one.
    /// Returns true if the error was recorded.
    pub fn invalidate(&mut self, path: Path, error: impl Into<FieldError>) -> bool {
        if self.errors.contains_key(&path) {
            return false;
        }
        self.errors.insert(path, error.into());
        true
    }

    /// Drop the error recorded for `path`.
    pub fn mark_valid(&mut self, path: &Path) -> Option<FieldError> {
        self.errors.remove(path)
    }

    /// Drop every error at or below `prefix`.
    pub fn clear_subtree(&mut self, prefix: &Path) {
        self.errors.retain(|p, _| !prefix.is_prefix_of(p));
    }

    /// Keep only the errors matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Path, &FieldError) -> bool) {
        self.errors.retain(|p, e| keep(p, e));
    }

    /// Get the error for `path`.
    pub fn get(&self, path: &Path) -> Option<&FieldError> {
        self.errors.get(path)
    }

    /// True if `path` has an error.
    pub fn contains(&self, path: &Path) -> bool {
        self.errors.contains_key(path)
    }

    /// True if no errors are recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of paths with errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate errors in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FieldError)> {
        self.errors.iter()
    }

    /// Paths with errors, in order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.errors.keys()
    }
}

/// Aggregate failure returned by `validate`: every failing path, not just the first.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed: {}", summarize(.errors))]
pub struct ValidationError {
    /// The failing paths.
    pub errors: ErrorAggregate,
}

fn summarize(errors: &ErrorAggregate) -> String {
    errors
        .iter()
        .map(|(p, e)| format!("{p}: {e}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationError {
    /// Get the error for `path`.
    pub fn get(&self, path: impl Into<Path>) -> Option<&FieldError> {
        self.errors.get(&path.into())
    }

    /// Failing paths as strings, in order.
    pub fn paths(&self) -> Vec<String> {
        self.errors.paths().map(|p| p.to_string()).collect()
    }
}

/// Why a strict-mode write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictViolation {
    /// The path is not declared in the schema.
    Undeclared,
    /// The path is immutable and the document was already persisted.
    Immutable,
}

/// A write was attempted to an undeclared (or immutable) path under `strict = "throw"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path \"{path}\" {}", violation_text(.violation))]
pub struct StrictModeError {
    /// The refused path.
    pub path: Path,
    /// Why it was refused.
    pub violation: StrictViolation,
}

fn violation_text(violation: &StrictViolation) -> &'static str {
    match violation {
        StrictViolation::Undeclared => "is not in schema and strict mode is set to throw",
        StrictViolation::Immutable => "is immutable and strict mode is set to throw",
    }
}

/// A second validation pass was started while one was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("can't {operation} the same document multiple times in parallel")]
pub struct ParallelOperationError {
    /// The refused operation.
    pub operation: &'static str,
}

/// Schema construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The same path was declared twice.
    #[error("path \"{0}\" is declared more than once")]
    DuplicatePath(String),
    /// A field was declared beneath another non-nested field.
    #[error("path \"{path}\" conflicts with field \"{conflict}\"")]
    Conflict {
        /// The path being declared.
        path: String,
        /// The existing field it collides with.
        conflict: String,
    },
    /// Field paths may only contain key segments.
    #[error("path \"{0}\" is not a valid field path")]
    InvalidPath(String),
}

/// A lifecycle hook refused to continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{phase} hook failed: {message}")]
pub struct HookError {
    /// The phase the hook ran in.
    pub phase: &'static str,
    /// The hook's message.
    pub message: String,
}

/// Errors raised by document operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    /// A cast failure raised directly (outside of `set`).
    #[error(transparent)]
    Cast(#[from] CastError),

    /// Validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Strict-mode violation.
    #[error(transparent)]
    StrictMode(#[from] StrictModeError),

    /// Concurrent validation on the same document.
    #[error(transparent)]
    ParallelOperation(#[from] ParallelOperationError),

    /// Raw tree navigation failed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Schema construction failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A lifecycle hook refused.
    #[error(transparent)]
    Hook(#[from] HookError),
}

impl DocumentError {
    /// The validation aggregate, if this is a validation failure.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            DocumentError::Validation(e) => Some(e),
            _ => None,
        }
    }
}
