//! Compiled metadata for one schema field.

use super::types::{
    cast_boolean, cast_date, cast_embedded, cast_id, cast_number, cast_string, CastContext,
    CastFailure, SchemaType, SetterQueue, SubSchema, TypeTag,
};
use super::validator::Validator;
use super::Schema;
use crate::error::{CastError, StrictModeError, StrictViolation};
use crate::view::DocView;
use crate::{Path, Seg};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Write-side transformation. Receives the incoming value and the write context.
pub type SetterFn = Arc<dyn Fn(Value, &SetterContext<'_>) -> Value + Send + Sync>;

/// Read-side transformation.
pub type GetterFn = Arc<dyn Fn(Value, &DocView<'_>) -> Value + Send + Sync>;

/// Predicate deciding whether a field is required for a given document.
pub type RequiredFn = Arc<dyn Fn(&DocView<'_>) -> bool + Send + Sync>;

/// Default generator. An `Err` is recorded against the path as a cast failure.
pub type DefaultFn = Arc<dyn Fn(&DocView<'_>) -> Result<Value, String> + Send + Sync>;

/// Whether a field must be present.
#[derive(Clone, Default)]
pub enum Required {
    /// Optional.
    #[default]
    No,
    /// Always required.
    Always,
    /// Required when the predicate holds.
    When(RequiredFn),
}

/// A field default.
#[derive(Clone)]
pub enum DefaultValue {
    /// A literal, deep-cloned for every document.
    Literal(Value),
    /// Computed per document.
    Generate(DefaultFn),
}

/// What a setter sees about the write in progress.
pub struct SetterContext<'a> {
    path: &'a Path,
    scope_root: &'a Path,
    prior: Option<&'a Value>,
    is_init: bool,
    queue: &'a SetterQueue,
}

impl<'a> SetterContext<'a> {
    /// Absolute path being written.
    pub fn path(&self) -> &Path {
        self.path
    }

    /// The value stored before this write.
    pub fn prior(&self) -> Option<&Value> {
        self.prior
    }

    /// True while hydrating from storage.
    pub fn is_init(&self) -> bool {
        self.is_init
    }

    /// Queue a write to `path`, relative to the document (or embedded
    /// document) owning the field. Queued writes run after the current one.
    pub fn set_sibling(&self, path: impl Into<Path>, value: impl Into<Value>) {
        let target = self.scope_root.join(&path.into());
        self.queue.borrow_mut().push((target, value.into()));
    }
}

const REQUIRED_MESSAGE: &str = "Path `{PATH}` is required.";

/// Compiled metadata for one schema field.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub(crate) ty: SchemaType,
    pub(crate) required: Required,
    pub(crate) required_message: String,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) validators: Vec<Validator>,
    pub(crate) setters: Vec<SetterFn>,
    pub(crate) getters: Vec<GetterFn>,
    pub(crate) immutable: bool,
    pub(crate) nullable: bool,
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("type", &self.ty.name())
            .field("required", &!matches!(self.required, Required::No))
            .field("validators", &self.validators)
            .field("immutable", &self.immutable)
            .finish_non_exhaustive()
    }
}

impl FieldDescriptor {
    /// Create a descriptor of the given type with no options.
    pub fn of(ty: SchemaType) -> Self {
        Self {
            ty,
            required: Required::No,
            required_message: REQUIRED_MESSAGE.to_string(),
            default: None,
            validators: Vec::new(),
            setters: Vec::new(),
            getters: Vec::new(),
            immutable: false,
            nullable: true,
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    pub fn date() -> Self {
        Self::of(SchemaType::Date)
    }

    pub fn mixed() -> Self {
        Self::of(SchemaType::Mixed)
    }

    /// An identifier field.
    pub fn id() -> Self {
        Self::of(SchemaType::Id { target: None })
    }

    /// A reference to a record in `target`.
    pub fn reference(target: impl Into<String>) -> Self {
        Self::of(SchemaType::Id {
            target: Some(target.into()),
        })
    }

    /// Array of `element`.
    pub fn array(element: FieldDescriptor) -> Self {
        Self::of(SchemaType::Array(Arc::new(element)))
    }

    /// Map of string keys to `value`.
    pub fn map(value: FieldDescriptor) -> Self {
        Self::of(SchemaType::Map(Arc::new(value)))
    }

    /// A single embedded document.
    pub fn embedded(schema: impl Into<Arc<Schema>>) -> Self {
        Self::of(SchemaType::Embedded(SubSchema::new(schema.into())))
    }

    /// An array of embedded documents.
    pub fn document_array(schema: impl Into<Arc<Schema>>) -> Self {
        let sub = SubSchema::new(schema.into());
        let element = Arc::new(Self::of(SchemaType::Embedded(sub.clone())));
        Self::of(SchemaType::DocumentArray { sub, element })
    }

    /// Register a discriminated variant of an embedded or document-array field.
    ///
    /// The variant is merged with the base schema; documents whose
    /// discriminator field equals `name` use the merged schema. Has no effect
    /// on other types.
    pub fn discriminator(mut self, name: impl Into<String>, variant: Schema) -> Self {
        let name = name.into();
        match &mut self.ty {
            SchemaType::Embedded(sub) => {
                let merged = sub.base.merge_variant(&variant, &name);
                sub.variants.insert(name, Arc::new(merged));
            }
            SchemaType::DocumentArray { sub, element } => {
                let merged = sub.base.merge_variant(&variant, &name);
                sub.variants.insert(name, Arc::new(merged));
                *element = Arc::new(Self::of(SchemaType::Embedded(sub.clone())));
            }
            _ => {}
        }
        self
    }

    /// Mark the field required.
    pub fn required(mut self) -> Self {
        self.required = Required::Always;
        self
    }

    /// Require the field when `predicate` holds for the owning document.
    pub fn required_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DocView<'_>) -> bool + Send + Sync + 'static,
    {
        self.required = Required::When(Arc::new(predicate));
        self
    }

    /// Replace the required message template.
    pub fn required_message(mut self, template: impl Into<String>) -> Self {
        self.required_message = template.into();
        self
    }

    /// A literal default.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// A computed default.
    pub fn default_fn<F>(mut self, generate: F) -> Self
    where
        F: Fn(&DocView<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Generate(Arc::new(generate)));
        self
    }

    /// Attach a validator. Validators run in registration order.
    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn min(self, bound: f64) -> Self {
        self.validate(Validator::min(bound))
    }

    pub fn max(self, bound: f64) -> Self {
        self.validate(Validator::max(bound))
    }

    pub fn one_of(self, allowed: Vec<Value>) -> Self {
        self.validate(Validator::one_of(allowed))
    }

    pub fn min_length(self, len: usize) -> Self {
        self.validate(Validator::min_length(len))
    }

    pub fn max_length(self, len: usize) -> Self {
        self.validate(Validator::max_length(len))
    }

    /// Refuse changes once the document has been persisted.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Treat `null` as a cast failure instead of passing it through.
    pub fn non_nullable(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Add a setter. Setters run in reverse registration order.
    pub fn set<F>(mut self, setter: F) -> Self
    where
        F: Fn(Value, &SetterContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.setters.push(Arc::new(setter));
        self
    }

    /// Add a getter. Getters run in registration order.
    pub fn get<F>(mut self, getter: F) -> Self
    where
        F: Fn(Value, &DocView<'_>) -> Value + Send + Sync + 'static,
    {
        self.getters.push(Arc::new(getter));
        self
    }

    // ------------------------------------------------------------------
    // Accessors

    /// The field type.
    pub fn schema_type(&self) -> &SchemaType {
        &self.ty
    }

    /// The serializable type tag.
    pub fn tag(&self) -> TypeTag {
        self.ty.tag()
    }

    /// Attached validators, excluding the implicit required check.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// True if a default is declared.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// True if the required flag or predicate is set.
    pub fn has_required(&self) -> bool {
        !matches!(self.required, Required::No)
    }

    /// True if the field is required for the document `view`.
    pub fn is_required(&self, view: &DocView<'_>) -> bool {
        match &self.required {
            Required::No => false,
            Required::Always => true,
            Required::When(predicate) => predicate(view),
        }
    }

    /// True if `value` satisfies the required check.
    pub(crate) fn satisfies_required(&self, value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) if matches!(self.ty, SchemaType::String) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// True if validating this path can ever fail.
    pub(crate) fn can_fail(&self) -> bool {
        self.has_required()
            || !self.validators.is_empty()
            || match &self.ty {
                SchemaType::Embedded(_) | SchemaType::DocumentArray { .. } => true,
                SchemaType::Array(el) | SchemaType::Map(el) => el.can_fail(),
                _ => false,
            }
    }

    // ------------------------------------------------------------------
    // Write side

    /// Run setters (reverse registration order), then cast unless nullish.
    pub(crate) fn apply_setters(
        &self,
        value: Value,
        ctx: &CastContext<'_>,
    ) -> Result<Value, CastFailure> {
        let value = if self.setters.is_empty() {
            value
        } else {
            let setter_ctx = SetterContext {
                path: &ctx.path,
                scope_root: &ctx.scope_root,
                prior: ctx.prior,
                is_init: ctx.is_init,
                queue: ctx.queue,
            };
            self.setters
                .iter()
                .rev()
                .fold(value, |acc, setter| setter(acc, &setter_ctx))
        };
        self.cast(&value, ctx)
    }

    /// Cast `value` to this field's type.
    pub(crate) fn cast(&self, value: &Value, ctx: &CastContext<'_>) -> Result<Value, CastFailure> {
        if value.is_null() {
            if self.nullable {
                return Ok(Value::Null);
            }
            return Err(CastError::new(ctx.path.clone(), self.ty.name(), value)
                .with_reason("null is not allowed")
                .into());
        }
        let path = &ctx.path;
        match &self.ty {
            SchemaType::String => Ok(cast_string(value, path)?),
            SchemaType::Number => Ok(cast_number(value, path)?),
            SchemaType::Boolean => Ok(cast_boolean(value, path)?),
            SchemaType::Date => Ok(cast_date(value, path)?),
            SchemaType::Id { .. } => Ok(cast_id(value, path)?),
            SchemaType::Mixed => Ok(value.clone()),
            SchemaType::Array(element) => {
                let items = as_items(value);
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let child = ctx.child(&Seg::Index(i), None);
                    out.push(element.cast(item, &child).map_err(|f| wrap_element(f, path, value))?);
                }
                Ok(Value::Array(out))
            }
            SchemaType::Map(element) => {
                let Value::Object(entries) = value else {
                    return Err(CastError::new(path.clone(), "Map", value).into());
                };
                let mut out = serde_json::Map::new();
                for (key, item) in entries {
                    let child = ctx.child(&Seg::Key(key.clone()), None);
                    out.insert(key.clone(), element.cast(item, &child)?);
                }
                Ok(Value::Object(out))
            }
            SchemaType::Embedded(sub) => cast_embedded(sub, value, ctx),
            SchemaType::DocumentArray { sub, .. } => {
                let items = as_items(value);
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let child = ctx.child(&Seg::Index(i), None);
                    if item.is_null() {
                        out.push(Value::Null);
                        continue;
                    }
                    out.push(cast_embedded(sub, item, &child).map_err(|f| wrap_element(f, path, value))?);
                }
                Ok(Value::Array(out))
            }
        }
    }

    /// Compute the default for this field, cast.
    ///
    /// Returns `Ok(None)` when no default is declared.
    pub(crate) fn get_default(
        &self,
        view: &DocView<'_>,
        ctx: &CastContext<'_>,
    ) -> Result<Option<Value>, CastFailure> {
        let raw = match &self.default {
            None => return Ok(None),
            Some(DefaultValue::Literal(v)) => v.clone(),
            Some(DefaultValue::Generate(generate)) => generate(view).map_err(|msg| {
                tracing::warn!(path = %ctx.path, error = %msg, "default generator failed");
                CastFailure::Cast(
                    CastError::new(ctx.path.clone(), self.ty.name(), &Value::Null)
                        .with_reason(format!("cannot build default: {msg}")),
                )
            })?,
        };
        self.apply_setters(raw, ctx).map(Some)
    }

    // ------------------------------------------------------------------
    // Read side

    /// Run getters in registration order.
    pub fn apply_getters(&self, value: Value, view: &DocView<'_>) -> Value {
        self.getters.iter().fold(value, |acc, getter| getter(acc, view))
    }
}

/// Scalars assigned to array fields become one-element arrays.
fn as_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// The aggregate records array failures against the array path; the error
/// itself keeps the element path.
fn wrap_element(failure: CastFailure, array_path: &Path, array_value: &Value) -> CastFailure {
    match failure {
        CastFailure::Cast(inner) => CastFailure::Cast(
            CastError::new(array_path.clone(), "Array", array_value).with_reason(inner.to_string()),
        ),
        strict @ CastFailure::Strict(_) => strict,
    }
}

/// Strict refusal raised when an immutable field changes.
pub(crate) fn immutable_violation(path: &Path) -> StrictModeError {
    StrictModeError {
        path: path.clone(),
        violation: StrictViolation::Immutable,
    }
}
