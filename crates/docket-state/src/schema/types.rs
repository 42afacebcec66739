//! Type registry: the semantic type of a field and how raw values are cast to it.

use super::descriptor::FieldDescriptor;
use super::Schema;
use crate::error::{CastError, StrictModeError};
use crate::value::get_at;
use crate::{Path, Seg};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serializable type name carried in changesets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Date,
    Id,
    Mixed,
    Array,
    Map,
    Embedded,
    DocumentArray,
}

/// Polymorphic embedded schemas selected by a discriminator field.
#[derive(Clone)]
pub struct SubSchema {
    pub(crate) base: Arc<Schema>,
    pub(crate) variants: BTreeMap<String, Arc<Schema>>,
}

impl SubSchema {
    pub(crate) fn new(base: Arc<Schema>) -> Self {
        Self {
            base,
            variants: BTreeMap::new(),
        }
    }

    /// The base schema.
    pub fn base(&self) -> &Arc<Schema> {
        &self.base
    }

    /// Registered variant names.
    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }

    /// Pick the schema for `value` by its discriminator field.
    ///
    /// Values without the field (or non-objects) use the base schema. An
    /// unknown discriminator value is an error carrying that value.
    pub fn select(&self, value: Option<&Value>) -> Result<&Arc<Schema>, String> {
        if self.variants.is_empty() {
            return Ok(&self.base);
        }
        let key = &self.base.options().discriminator_key;
        match value.and_then(|v| v.get(key)) {
            None | Some(Value::Null) => Ok(&self.base),
            Some(Value::String(name)) => self
                .variants
                .get(name)
                .ok_or_else(|| format!("unknown discriminator value \"{name}\" for key \"{key}\"")),
            Some(other) => Err(format!("discriminator \"{key}\" must be a string, got {other}")),
        }
    }
}

/// The semantic type of a field.
#[derive(Clone)]
pub enum SchemaType {
    /// UTF-8 string.
    String,
    /// JSON number; integral values stay integers.
    Number,
    /// Boolean.
    Boolean,
    /// Instant, stored as an RFC 3339 UTC string with millisecond precision.
    Date,
    /// Identifier of (or populated reference to) another record.
    Id {
        /// Name of the referenced collection, if any.
        target: Option<String>,
    },
    /// Any value; never cast.
    Mixed,
    /// Homogeneous array of the element type.
    Array(Arc<FieldDescriptor>),
    /// String-keyed map of the value type.
    Map(Arc<FieldDescriptor>),
    /// Single embedded document.
    Embedded(SubSchema),
    /// Array of embedded documents.
    DocumentArray {
        /// Element schema.
        sub: SubSchema,
        /// Descriptor used for `path.N` element writes.
        element: Arc<FieldDescriptor>,
    },
}

impl SchemaType {
    /// The serializable tag for this type.
    pub fn tag(&self) -> TypeTag {
        match self {
            SchemaType::String => TypeTag::String,
            SchemaType::Number => TypeTag::Number,
            SchemaType::Boolean => TypeTag::Boolean,
            SchemaType::Date => TypeTag::Date,
            SchemaType::Id { .. } => TypeTag::Id,
            SchemaType::Mixed => TypeTag::Mixed,
            SchemaType::Array(_) => TypeTag::Array,
            SchemaType::Map(_) => TypeTag::Map,
            SchemaType::Embedded(_) => TypeTag::Embedded,
            SchemaType::DocumentArray { .. } => TypeTag::DocumentArray,
        }
    }

    /// Type name used in cast errors.
    pub fn name(&self) -> &'static str {
        match self {
            SchemaType::String => "String",
            SchemaType::Number => "Number",
            SchemaType::Boolean => "Boolean",
            SchemaType::Date => "Date",
            SchemaType::Id { .. } => "Id",
            SchemaType::Mixed => "Mixed",
            SchemaType::Array(_) => "Array",
            SchemaType::Map(_) => "Map",
            SchemaType::Embedded(_) => "Embedded",
            SchemaType::DocumentArray { .. } => "DocumentArray",
        }
    }

    /// True for array-shaped types.
    pub fn is_array(&self) -> bool {
        matches!(self, SchemaType::Array(_) | SchemaType::DocumentArray { .. })
    }

    /// The sub-schema of an embedded or document-array type.
    pub fn sub_schema(&self) -> Option<&SubSchema> {
        match self {
            SchemaType::Embedded(sub) | SchemaType::DocumentArray { sub, .. } => Some(sub),
            _ => None,
        }
    }

    /// The element descriptor of an array, document array, or map.
    pub fn element(&self) -> Option<&Arc<FieldDescriptor>> {
        match self {
            SchemaType::Array(el) | SchemaType::Map(el) => Some(el),
            SchemaType::DocumentArray { element, .. } => Some(element),
            _ => None,
        }
    }
}

/// A cast that could not complete.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CastFailure {
    /// Soft failure: recorded against the path.
    Cast(CastError),
    /// Hard failure: returned to the caller.
    Strict(StrictModeError),
}

impl From<CastError> for CastFailure {
    fn from(e: CastError) -> Self {
        CastFailure::Cast(e)
    }
}

/// Writes queued by setters against sibling paths.
pub(crate) type SetterQueue = RefCell<Vec<(Path, Value)>>;

/// Context threaded through a cast.
pub(crate) struct CastContext<'a> {
    /// Absolute path being cast.
    pub path: Path,
    /// Root of the document or sub-document owning `path`.
    pub scope_root: Path,
    /// The value currently stored at `path`.
    pub prior: Option<&'a Value>,
    /// True while hydrating from storage.
    pub is_init: bool,
    /// Per-call strict override.
    pub strict: Option<super::StrictMode>,
    /// Sibling writes requested by setters.
    pub queue: &'a SetterQueue,
}

impl<'a> CastContext<'a> {
    pub(crate) fn child(&self, rel: &Seg, scope_root: Option<Path>) -> CastContext<'a> {
        CastContext {
            path: self.path.with_segment(rel.clone()),
            scope_root: scope_root.unwrap_or_else(|| self.scope_root.clone()),
            prior: None,
            is_init: self.is_init,
            strict: self.strict,
            queue: self.queue,
        }
    }
}

pub(crate) fn cast_string(value: &Value, path: &Path) -> Result<Value, CastError> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        _ => Err(CastError::new(path.clone(), "String", value)),
    }
}

pub(crate) fn cast_number(value: &Value, path: &Path) -> Result<Value, CastError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::from(u8::from(*b))),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            parse_exact_number(trimmed).ok_or_else(|| {
                CastError::new(path.clone(), "Number", value)
                    .with_reason("string is not an exactly representable number")
            })
        }
        _ => Err(CastError::new(path.clone(), "Number", value)),
    }
}

/// Parse a decimal literal without silently losing precision.
fn parse_exact_number(s: &str) -> Option<Value> {
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(at) => (&s[..at], Some(&s[at + 1..])),
        None => (s, None),
    };
    let digits = mantissa.strip_prefix(['-', '+']).unwrap_or(mantissa);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || frac_part.is_some_and(|f| !all_digits(f)) {
        return None;
    }
    if let Some(exp) = exponent {
        let exp = exp.strip_prefix(['-', '+']).unwrap_or(exp);
        if !all_digits(exp) {
            return None;
        }
    }

    if frac_part.is_none() && exponent.is_none() {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Value::from(i));
        }
        if let Ok(u) = s.parse::<u64>() {
            return Some(Value::from(u));
        }
        // Larger integers cannot be held without rounding.
        return None;
    }

    let significant = format!("{int_part}{}", frac_part.unwrap_or(""));
    let significant = significant.trim_start_matches('0').trim_end_matches('0');
    if significant.len() > 15 {
        return None;
    }
    let f: f64 = s.parse().ok()?;
    Number::from_f64(f).map(Value::Number)
}

pub(crate) fn cast_boolean(value: &Value, path: &Path) -> Result<Value, CastError> {
    let cast = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    };
    cast.map(Value::Bool)
        .ok_or_else(|| CastError::new(path.clone(), "Boolean", value))
}

pub(crate) fn cast_date(value: &Value, path: &Path) -> Result<Value, CastError> {
    let parsed: Option<DateTime<Utc>> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    parsed
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
        .ok_or_else(|| CastError::new(path.clone(), "Date", value))
}

pub(crate) fn cast_id(value: &Value, path: &Path) -> Result<Value, CastError> {
    match value {
        Value::String(_) | Value::Number(_) => Ok(value.clone()),
        // A populated record stands in for its identifier.
        Value::Object(obj) if obj.contains_key("_id") => Ok(value.clone()),
        _ => Err(CastError::new(path.clone(), "Id", value)),
    }
}

/// The identifier of a (possibly populated) reference value.
pub fn reference_id(value: &Value) -> &Value {
    match value {
        Value::Object(obj) => obj.get("_id").unwrap_or(value),
        _ => value,
    }
}

/// Cast every declared key of `input` against `schema`, then fill defaults.
pub(crate) fn cast_object(
    schema: &Schema,
    input: &Value,
    ctx: &CastContext<'_>,
) -> Result<Value, CastFailure> {
    let Value::Object(map) = input else {
        return Err(CastError::new(ctx.path.clone(), "Embedded", input).into());
    };
    let mut out = Value::Object(Default::default());
    cast_keys(schema, map, &Path::root(), &mut out, ctx)?;
    schema.fill_defaults(&mut out, ctx)?;
    Ok(out)
}

fn cast_keys(
    schema: &Schema,
    map: &serde_json::Map<String, Value>,
    prefix: &Path,
    out: &mut Value,
    ctx: &CastContext<'_>,
) -> Result<(), CastFailure> {
    for (key, value) in map {
        let rel = prefix.clone().key(key.as_str());
        let child_ctx = CastContext {
            path: ctx.path.join(&rel),
            scope_root: ctx.scope_root.clone(),
            prior: None,
            is_init: ctx.is_init,
            strict: ctx.strict,
            queue: ctx.queue,
        };
        if let Some(desc) = schema.field(&rel) {
            let cast = desc.apply_setters(value.clone(), &child_ctx)?;
            write(out, &rel, cast, &child_ctx)?;
        } else if schema.is_nested(&rel) {
            match value {
                Value::Object(inner) => cast_keys(schema, inner, &rel, out, ctx)?,
                Value::Null => write(out, &rel, Value::Null, &child_ctx)?,
                other => {
                    return Err(CastError::new(child_ctx.path.clone(), "Object", other).into());
                }
            }
        } else {
            match ctx.strict.unwrap_or(schema.options().strict) {
                super::StrictMode::Off => write(out, &rel, value.clone(), &child_ctx)?,
                super::StrictMode::Ignore => {
                    tracing::debug!(path = %child_ctx.path, "dropping undeclared embedded key");
                }
                super::StrictMode::Throw => {
                    return Err(CastFailure::Strict(StrictModeError {
                        path: child_ctx.path.clone(),
                        violation: crate::error::StrictViolation::Undeclared,
                    }));
                }
            }
        }
    }
    Ok(())
}

fn write(out: &mut Value, rel: &Path, value: Value, ctx: &CastContext<'_>) -> Result<(), CastFailure> {
    crate::value::set_at(out, rel, value).map_err(|e| {
        CastFailure::Cast(
            CastError::new(ctx.path.clone(), "Object", &Value::Null).with_reason(e.to_string()),
        )
    })
}

/// Cast a value for a single embedded document, choosing a discriminator variant.
pub(crate) fn cast_embedded(
    sub: &SubSchema,
    value: &Value,
    ctx: &CastContext<'_>,
) -> Result<Value, CastFailure> {
    if !value.is_object() {
        return Err(CastError::new(ctx.path.clone(), "Embedded", value).into());
    }
    let schema = sub
        .select(Some(value))
        .map_err(|reason| CastError::new(ctx.path.clone(), "Embedded", value).with_reason(reason))?;
    let scoped = CastContext {
        path: ctx.path.clone(),
        scope_root: ctx.path.clone(),
        prior: None,
        is_init: ctx.is_init,
        strict: ctx.strict,
        queue: ctx.queue,
    };
    let mut out = cast_object(schema, value, &scoped)?;
    // Keep the discriminator that selected the variant.
    if let (Some(Value::String(name)), Value::Object(obj)) = (
        get_at(value, &Path::root().key(sub.base.options().discriminator_key.as_str())),
        &mut out,
    ) {
        obj.insert(
            sub.base.options().discriminator_key.clone(),
            Value::String(name.clone()),
        );
    }
    Ok(out)
}
