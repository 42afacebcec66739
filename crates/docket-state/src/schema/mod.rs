//! Schemas: the flattened path → descriptor map documents are checked against.
//!
//! A schema is built once and shared behind an `Arc`. Field paths are stored
//! flattened (`address.city`), with every intermediate prefix recorded as an
//! implicit nested object, so resolving a write never re-splits strings.
//! Paths below arrays, maps and embedded documents are resolved by walking
//! into the owning field's element descriptor or sub-schema.

mod descriptor;
mod types;
mod validator;

pub use descriptor::{
    DefaultFn, DefaultValue, FieldDescriptor, GetterFn, Required, RequiredFn, SetterContext,
    SetterFn,
};
pub use types::{reference_id, SchemaType, SubSchema, TypeTag};
pub use validator::{AsyncCheck, SyncCheck, Validator};

pub(crate) use descriptor::immutable_violation;
pub(crate) use types::{CastContext, CastFailure, SetterQueue};
pub(crate) use validator::Outcome;

use crate::document::Document;
use crate::error::{SchemaError, ValidationError};
use crate::value::{get_at, set_at};
use crate::view::DocView;
use crate::{Path, Seg};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// How writes to undeclared paths are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "StrictRepr", into = "StrictRepr")]
pub enum StrictMode {
    /// Drop the write (`true`).
    #[default]
    Ignore,
    /// Raise [`StrictModeError`](crate::StrictModeError) (`"throw"`).
    Throw,
    /// Store the raw value as an ad-hoc path (`false`).
    Off,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StrictRepr {
    Flag(bool),
    Named(String),
}

impl TryFrom<StrictRepr> for StrictMode {
    type Error = String;

    fn try_from(repr: StrictRepr) -> Result<Self, Self::Error> {
        match repr {
            StrictRepr::Flag(true) => Ok(StrictMode::Ignore),
            StrictRepr::Flag(false) => Ok(StrictMode::Off),
            StrictRepr::Named(name) if name == "throw" => Ok(StrictMode::Throw),
            StrictRepr::Named(other) => Err(format!("unknown strict mode \"{other}\"")),
        }
    }
}

impl From<StrictMode> for StrictRepr {
    fn from(mode: StrictMode) -> Self {
        match mode {
            StrictMode::Ignore => StrictRepr::Flag(true),
            StrictMode::Off => StrictRepr::Flag(false),
            StrictMode::Throw => StrictRepr::Named("throw".to_string()),
        }
    }
}

/// Schema-wide options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOptions {
    /// Handling of undeclared paths.
    pub strict: StrictMode,
    /// Add an `_id` field with a generated UUID default.
    pub id: bool,
    /// Field that selects embedded discriminator variants.
    pub discriminator_key: String,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            strict: StrictMode::Ignore,
            id: true,
            discriminator_key: "kind".to_string(),
        }
    }
}

/// What a path resolves to.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A declared field (or array/map element).
    Field(Arc<FieldDescriptor>),
    /// An implicit nested object.
    Nested,
    /// A location inside a `Mixed` value; written raw.
    MixedChild,
    /// Not declared anywhere.
    Undeclared,
}

/// Computed field evaluated when rendering plain objects.
pub type VirtualFn = Arc<dyn Fn(&DocView<'_>) -> Value + Send + Sync>;

/// Runs before validation; an `Err` aborts it.
pub type PreValidateHook = Arc<dyn Fn(&Document) -> Result<(), String> + Send + Sync>;
/// Runs after validation with its outcome.
pub type PostValidateHook = Arc<dyn Fn(&Document, Option<&ValidationError>) + Send + Sync>;
/// Runs before a save computes its changeset; may mutate the document.
pub type PreSaveHook = Arc<dyn Fn(&mut Document) -> Result<(), String> + Send + Sync>;
/// Runs after a save has been committed.
pub type PostSaveHook = Arc<dyn Fn(&Document) + Send + Sync>;

/// Lifecycle callbacks, run in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) pre_validate: Vec<PreValidateHook>,
    pub(crate) post_validate: Vec<PostValidateHook>,
    pub(crate) pre_save: Vec<PreSaveHook>,
    pub(crate) post_save: Vec<PostSaveHook>,
}

/// A compiled schema.
#[derive(Clone)]
pub struct Schema {
    fields: BTreeMap<Path, Arc<FieldDescriptor>>,
    order: Vec<Path>,
    nested: BTreeSet<Path>,
    options: SchemaOptions,
    virtuals: Vec<(String, VirtualFn)>,
    hooks: Hooks,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.order)
            .field("options", &self.options)
            .field("virtuals", &self.virtuals.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&Path, &Arc<FieldDescriptor>)> {
        self.order
            .iter()
            .filter_map(|p| self.fields.get(p).map(|d| (p, d)))
    }

    /// The descriptor declared at exactly `path`.
    pub fn field(&self, path: &Path) -> Option<&Arc<FieldDescriptor>> {
        self.fields.get(path)
    }

    /// True if `path` is an implicit nested object.
    pub fn is_nested(&self, path: &Path) -> bool {
        self.nested.contains(path)
    }

    /// Declared fields strictly below the nested object `prefix`.
    pub(crate) fn fields_under<'a>(
        &'a self,
        prefix: &'a Path,
    ) -> impl Iterator<Item = (&'a Path, &'a Arc<FieldDescriptor>)> + 'a {
        self.fields().filter(move |(p, _)| prefix.is_ancestor_of(p))
    }

    pub fn virtuals(&self) -> impl Iterator<Item = (&str, &VirtualFn)> {
        self.virtuals.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Resolve `path` against this schema.
    ///
    /// `doc` is the value tree the path lives in; it is consulted to pick
    /// discriminator variants of embedded documents along the way.
    pub fn resolve(&self, path: &Path, doc: &Value) -> Resolution {
        resolve_in(self, path.segments(), Some(doc))
    }

    /// Merge `variant` over this schema for discriminator `name`.
    pub(crate) fn merge_variant(&self, variant: &Schema, name: &str) -> Schema {
        let mut merged = self.clone();
        for (path, desc) in variant.fields() {
            if merged.fields.insert(path.clone(), desc.clone()).is_none() {
                merged.order.push(path.clone());
            }
        }
        let key = Path::root().key(self.options.discriminator_key.as_str());
        let tag = Arc::new(FieldDescriptor::string().default_value(name));
        if merged.fields.insert(key.clone(), tag).is_none() {
            merged.order.push(key);
        }
        merged.virtuals.extend(variant.virtuals.iter().cloned());
        merged.nested = nested_prefixes(merged.fields.keys());
        merged
    }

    /// Fill declared defaults missing from `out`, an embedded value being cast.
    pub(crate) fn fill_defaults(
        &self,
        out: &mut Value,
        ctx: &CastContext<'_>,
    ) -> Result<(), CastFailure> {
        for (path, desc) in self.fields() {
            if !desc.has_default() || get_at(out, path).is_some() || blocked_by_scalar(out, path) {
                continue;
            }
            let child = CastContext {
                path: ctx.path.join(path),
                scope_root: ctx.path.clone(),
                prior: None,
                is_init: ctx.is_init,
                strict: ctx.strict,
                queue: ctx.queue,
            };
            let default = desc.get_default(&DocView::new(out, true), &child)?;
            if let Some(value) = default {
                set_at(out, path, value).map_err(|e| {
                    CastFailure::Cast(
                        crate::error::CastError::new(child.path.clone(), desc.ty.name(), &Value::Null)
                            .with_reason(e.to_string()),
                    )
                })?;
            }
        }
        Ok(())
    }
}

/// True if an ancestor of `path` holds a non-object value (including null).
pub(crate) fn blocked_by_scalar(doc: &Value, path: &Path) -> bool {
    path.ancestors()
        .any(|a| get_at(doc, &a).is_some_and(|v| !v.is_object()))
}

fn resolve_in(schema: &Schema, segs: &[Seg], scope: Option<&Value>) -> Resolution {
    if segs.is_empty() {
        return Resolution::Undeclared;
    }
    let mut prefix = Path::root();
    for (i, seg) in segs.iter().enumerate() {
        prefix.push(Seg::Key(seg.to_key()));
        if let Some(desc) = schema.fields.get(&prefix) {
            let rest = &segs[i + 1..];
            if rest.is_empty() {
                return Resolution::Field(desc.clone());
            }
            let value = scope.and_then(|v| get_at(v, &prefix));
            return resolve_below(desc, rest, value);
        }
        if !schema.nested.contains(&prefix) {
            return Resolution::Undeclared;
        }
    }
    Resolution::Nested
}

fn resolve_below(desc: &FieldDescriptor, rest: &[Seg], value: Option<&Value>) -> Resolution {
    match &desc.ty {
        SchemaType::Mixed => Resolution::MixedChild,
        SchemaType::Embedded(sub) => {
            let schema = sub.select(value).unwrap_or(&sub.base);
            resolve_in(schema, rest, value)
        }
        SchemaType::Array(element)
        | SchemaType::Map(element)
        | SchemaType::DocumentArray { element, .. } => {
            let Some((head, tail)) = rest.split_first() else {
                return Resolution::Field(Arc::new(desc.clone()));
            };
            if desc.ty.is_array() && !head.is_index() {
                return Resolution::Undeclared;
            }
            if tail.is_empty() {
                return Resolution::Field(element.clone());
            }
            let child = value.and_then(|v| get_at(v, &Path::from_segments(vec![head.clone()])));
            resolve_below(element, tail, child)
        }
        _ => Resolution::Undeclared,
    }
}

fn nested_prefixes<'a>(paths: impl Iterator<Item = &'a Path>) -> BTreeSet<Path> {
    paths.flat_map(|p| p.ancestors()).collect()
}

/// Builder for [`Schema`].
#[derive(Default)]
pub struct SchemaBuilder {
    fields: Vec<(String, FieldDescriptor)>,
    options: SchemaOptions,
    virtuals: Vec<(String, VirtualFn)>,
    hooks: Hooks,
}

impl SchemaBuilder {
    /// Declare a field at the dot-delimited `path`.
    pub fn field(mut self, path: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.fields.push((path.into(), descriptor));
        self
    }

    /// Replace all options.
    pub fn options(mut self, options: SchemaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn strict(mut self, mode: StrictMode) -> Self {
        self.options.strict = mode;
        self
    }

    pub fn id(mut self, enabled: bool) -> Self {
        self.options.id = enabled;
        self
    }

    pub fn discriminator_key(mut self, key: impl Into<String>) -> Self {
        self.options.discriminator_key = key.into();
        self
    }

    /// Add a computed field.
    pub fn virtual_field<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&DocView<'_>) -> Value + Send + Sync + 'static,
    {
        self.virtuals.push((name.into(), Arc::new(compute)));
        self
    }

    pub fn pre_validate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Document) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.pre_validate.push(Arc::new(hook));
        self
    }

    pub fn post_validate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Document, Option<&ValidationError>) + Send + Sync + 'static,
    {
        self.hooks.post_validate.push(Arc::new(hook));
        self
    }

    pub fn pre_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Document) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.pre_save.push(Arc::new(hook));
        self
    }

    pub fn post_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Document) + Send + Sync + 'static,
    {
        self.hooks.post_save.push(Arc::new(hook));
        self
    }

    /// Compile the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut fields = BTreeMap::new();
        let mut order = Vec::with_capacity(self.fields.len() + 1);

        if self.options.id && !self.fields.iter().any(|(p, _)| p == "_id") {
            let id = FieldDescriptor::id()
                .default_fn(|_| Ok(Value::String(uuid::Uuid::new_v4().to_string())));
            let path = Path::root().key("_id");
            fields.insert(path.clone(), Arc::new(id));
            order.push(path);
        }

        for (raw, descriptor) in self.fields {
            let path = Path::parse(&raw);
            if path.is_empty() || path.iter().any(Seg::is_index) || raw.split('.').any(str::is_empty) {
                return Err(SchemaError::InvalidPath(raw));
            }
            if fields.insert(path.clone(), Arc::new(descriptor)).is_some() {
                return Err(SchemaError::DuplicatePath(raw));
            }
            order.push(path);
        }

        for path in &order {
            if let Some(conflict) = path.ancestors().find(|a| fields.contains_key(a)) {
                return Err(SchemaError::Conflict {
                    path: path.to_string(),
                    conflict: conflict.to_string(),
                });
            }
        }

        let nested = nested_prefixes(fields.keys());
        Ok(Schema {
            fields,
            order,
            nested,
            options: self.options,
            virtuals: self.virtuals,
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_type(r: Resolution) -> Option<&'static str> {
        match r {
            Resolution::Field(d) => Some(d.schema_type().name()),
            _ => None,
        }
    }

    fn line_schema() -> Schema {
        Schema::builder()
            .id(false)
            .field("sku", FieldDescriptor::string())
            .field("qty", FieldDescriptor::number())
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_flat_nested_and_array_paths() {
        let schema = Schema::builder()
            .id(false)
            .field("name", FieldDescriptor::string())
            .field("address.city", FieldDescriptor::string())
            .field("lines", FieldDescriptor::document_array(line_schema()))
            .field("tags", FieldDescriptor::array(FieldDescriptor::string()))
            .field("meta", FieldDescriptor::mixed())
            .build()
            .unwrap();
        let doc = json!({});

        assert_eq!(field_type(schema.resolve(&Path::parse("name"), &doc)), Some("String"));
        assert!(matches!(schema.resolve(&Path::parse("address"), &doc), Resolution::Nested));
        assert_eq!(
            field_type(schema.resolve(&Path::parse("lines.0"), &doc)),
            Some("Embedded")
        );
        assert_eq!(
            field_type(schema.resolve(&Path::parse("lines.3.qty"), &doc)),
            Some("Number")
        );
        assert_eq!(field_type(schema.resolve(&Path::parse("tags.1"), &doc)), Some("String"));
        assert!(matches!(
            schema.resolve(&Path::parse("meta.anything.deep"), &doc),
            Resolution::MixedChild
        ));
        assert!(matches!(
            schema.resolve(&Path::parse("address.zip"), &doc),
            Resolution::Undeclared
        ));
        assert!(matches!(
            schema.resolve(&Path::parse("name.first"), &doc),
            Resolution::Undeclared
        ));
    }

    #[test]
    fn resolves_discriminator_variants_from_the_value() {
        let base = Schema::builder()
            .id(false)
            .field("label", FieldDescriptor::string())
            .build()
            .unwrap();
        let circle = Schema::builder()
            .id(false)
            .field("radius", FieldDescriptor::number())
            .build()
            .unwrap();
        let schema = Schema::builder()
            .id(false)
            .field("shape", FieldDescriptor::embedded(base).discriminator("circle", circle))
            .build()
            .unwrap();

        let circle_doc = json!({"shape": {"kind": "circle"}});
        assert_eq!(
            field_type(schema.resolve(&Path::parse("shape.radius"), &circle_doc)),
            Some("Number")
        );
        let plain_doc = json!({"shape": {"label": "x"}});
        assert!(matches!(
            schema.resolve(&Path::parse("shape.radius"), &plain_doc),
            Resolution::Undeclared
        ));
    }

    #[test]
    fn adds_generated_id_by_default() {
        let schema = Schema::builder()
            .field("name", FieldDescriptor::string())
            .build()
            .unwrap();
        let (first, desc) = schema.fields().next().unwrap();
        assert_eq!(first.to_string(), "_id");
        assert!(desc.has_default());
    }

    #[test]
    fn rejects_conflicting_and_duplicate_paths() {
        let err = Schema::builder()
            .field("a", FieldDescriptor::string())
            .field("a.b", FieldDescriptor::string())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Conflict { .. }));

        let err = Schema::builder()
            .field("a", FieldDescriptor::string())
            .field("a", FieldDescriptor::number())
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicatePath("a".into()));

        let err = Schema::builder()
            .field("items.0", FieldDescriptor::string())
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::InvalidPath("items.0".into()));
    }

    #[test]
    fn strict_mode_deserializes_from_flags_and_names() {
        let opts: SchemaOptions = serde_json::from_value(json!({"strict": "throw"})).unwrap();
        assert_eq!(opts.strict, StrictMode::Throw);
        assert!(opts.id);
        let opts: SchemaOptions = serde_json::from_value(json!({"strict": false})).unwrap();
        assert_eq!(opts.strict, StrictMode::Off);
        assert!(serde_json::from_value::<SchemaOptions>(json!({"strict": "loose"})).is_err());
        assert_eq!(serde_json::to_value(StrictMode::Ignore).unwrap(), json!(true));
    }
}
