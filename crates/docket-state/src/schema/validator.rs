//! Field validators.
//!
//! A validator is a predicate plus a message template. Synchronous checks
//! run inline; asynchronous checks return a boxed future that the
//! validation engine awaits alongside every other pending check.

use crate::error::{ValidatorError, ValidatorKind};
use crate::view::DocView;
use crate::Path;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Synchronous predicate. `Ok(false)` fails with the template message;
/// `Err(message)` fails with `message`.
pub type SyncCheck = Arc<dyn Fn(&Value, &DocView<'_>) -> Result<bool, String> + Send + Sync>;

/// Asynchronous predicate over an owned copy of the value.
pub type AsyncCheck =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<bool, String>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Check {
    Sync(SyncCheck),
    Async(AsyncCheck),
}

/// One validator attached to a field.
#[derive(Clone)]
pub struct Validator {
    kind: ValidatorKind,
    message: String,
    check: Check,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("async", &self.is_async())
            .finish()
    }
}

/// The result of starting a validator.
pub(crate) enum Outcome {
    Pass,
    Fail(ValidatorError),
    Pending(BoxFuture<'static, Option<ValidatorError>>),
}

const USER_DEFINED_MESSAGE: &str = "Validator failed for path `{PATH}` with value `{VALUE}`";

impl Validator {
    /// A user-defined synchronous validator.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Value, &DocView<'_>) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            kind: ValidatorKind::UserDefined,
            message: USER_DEFINED_MESSAGE.to_string(),
            check: Check::Sync(Arc::new(check)),
        }
    }

    /// A user-defined asynchronous validator.
    pub fn new_async<F>(check: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<bool, String>> + Send + Sync + 'static,
    {
        Self {
            kind: ValidatorKind::UserDefined,
            message: USER_DEFINED_MESSAGE.to_string(),
            check: Check::Async(Arc::new(check)),
        }
    }

    /// Replace the message template (`{PATH}` and `{VALUE}` are substituted).
    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.message = template.into();
        self
    }

    /// Numeric lower bound.
    pub fn min(bound: f64) -> Self {
        Self::builtin(
            ValidatorKind::Min,
            format!("Path `{{PATH}}` ({{VALUE}}) is less than minimum allowed value ({bound})."),
            move |v| v.as_f64().map_or(true, |x| x >= bound),
        )
    }

    /// Numeric upper bound.
    pub fn max(bound: f64) -> Self {
        Self::builtin(
            ValidatorKind::Max,
            format!("Path `{{PATH}}` ({{VALUE}}) is more than maximum allowed value ({bound})."),
            move |v| v.as_f64().map_or(true, |x| x <= bound),
        )
    }

    /// The value must be one of `allowed`.
    pub fn one_of(allowed: Vec<Value>) -> Self {
        Self::builtin(
            ValidatorKind::Enum,
            "`{VALUE}` is not a valid enum value for path `{PATH}`.".to_string(),
            move |v| allowed.iter().any(|a| crate::value::deep_equal(a, v)),
        )
    }

    /// Minimum string (in chars) or array length.
    pub fn min_length(len: usize) -> Self {
        Self::builtin(
            ValidatorKind::MinLength,
            format!("Path `{{PATH}}` (`{{VALUE}}`) is shorter than the minimum allowed length ({len})."),
            move |v| length_of(v).map_or(true, |n| n >= len),
        )
    }

    /// Maximum string (in chars) or array length.
    pub fn max_length(len: usize) -> Self {
        Self::builtin(
            ValidatorKind::MaxLength,
            format!("Path `{{PATH}}` (`{{VALUE}}`) is longer than the maximum allowed length ({len})."),
            move |v| length_of(v).map_or(true, |n| n <= len),
        )
    }

    fn builtin(
        kind: ValidatorKind,
        message: String,
        check: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message,
            check: Check::Sync(Arc::new(move |v: &Value, _: &DocView<'_>| Ok(check(v)))),
        }
    }

    /// The validator kind.
    pub fn kind(&self) -> &ValidatorKind {
        &self.kind
    }

    /// True if the check returns a future.
    pub fn is_async(&self) -> bool {
        matches!(self.check, Check::Async(_))
    }

    /// Start the check for `value` at `path`.
    pub(crate) fn start(&self, path: &Path, value: &Value, view: &DocView<'_>) -> Outcome {
        match &self.check {
            Check::Sync(check) => match check(value, view) {
                Ok(true) => Outcome::Pass,
                Ok(false) => Outcome::Fail(self.failure(path, None, value)),
                Err(msg) => Outcome::Fail(self.failure(path, Some(msg), value)),
            },
            Check::Async(check) => {
                let fut = check(value.clone());
                let path = path.clone();
                let value = value.clone();
                let this = self.clone();
                Outcome::Pending(Box::pin(async move {
                    match fut.await {
                        Ok(true) => None,
                        Ok(false) => Some(this.failure(&path, None, &value)),
                        Err(msg) => Some(this.failure(&path, Some(msg), &value)),
                    }
                }))
            }
        }
    }

    fn failure(&self, path: &Path, message: Option<String>, value: &Value) -> ValidatorError {
        let template = message.as_deref().unwrap_or(&self.message);
        ValidatorError::render(path.clone(), template, Some(value), self.kind.clone())
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}
