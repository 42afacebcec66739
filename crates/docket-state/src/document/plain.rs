//! Rendering documents as plain JSON.

use super::Document;
use crate::value::{get_at, minimize, set_at};
use crate::view::DocView;
use crate::Path;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Final rewrite applied to the rendered object.
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// What [`Document::to_plain_object`] applies on top of the raw tree.
#[derive(Clone, Default)]
pub struct ToObjectOptions {
    /// Run field getters.
    pub getters: bool,
    /// Evaluate schema virtuals.
    pub virtuals: bool,
    /// Drop empty nested objects.
    pub minimize: bool,
    /// Put identifiers back in place of populated records.
    pub depopulate: bool,
    pub transform: Option<TransformFn>,
}

impl fmt::Debug for ToObjectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToObjectOptions")
            .field("getters", &self.getters)
            .field("virtuals", &self.virtuals)
            .field("minimize", &self.minimize)
            .field("depopulate", &self.depopulate)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl ToObjectOptions {
    /// Getters and virtuals on, as for API responses.
    pub fn json() -> Self {
        Self {
            getters: true,
            virtuals: true,
            ..Default::default()
        }
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl Document {
    /// Render the document as a plain nested value.
    ///
    /// With every option off this is exactly the raw value tree.
    pub fn to_plain_object(&self, opts: &ToObjectOptions) -> Value {
        let mut out = self.doc.clone();

        if opts.getters {
            let top = DocView::new(&self.doc, self.is_new);
            for (path, desc) in self.schema.fields() {
                if !desc.getters.is_empty() {
                    apply_getter(&mut out, path, |v| desc.apply_getters(v, &top));
                }
            }
            for (_, sub) in self.arena.iter() {
                let Some(scope) = get_at(&self.doc, &sub.root) else {
                    continue;
                };
                let view = DocView::new(scope, sub.is_new);
                for (rel, desc) in sub.schema.fields() {
                    if !desc.getters.is_empty() {
                        apply_getter(&mut out, &sub.root.join(rel), |v| desc.apply_getters(v, &view));
                    }
                }
            }
        }

        if opts.virtuals {
            let top = DocView::new(&self.doc, self.is_new);
            for (name, compute) in self.schema.virtuals() {
                write(&mut out, &Path::parse(name), compute(&top));
            }
            for (_, sub) in self.arena.iter() {
                let Some(scope) = get_at(&self.doc, &sub.root) else {
                    continue;
                };
                let view = DocView::new(scope, sub.is_new);
                for (name, compute) in sub.schema.virtuals() {
                    write(&mut out, &sub.root.join(&Path::parse(name)), compute(&view));
                }
            }
        }

        if opts.depopulate {
            for (path, id) in &self.populated {
                write(&mut out, path, id.clone());
            }
        }
        if opts.minimize {
            minimize(&mut out);
        }
        match &opts.transform {
            Some(transform) => transform(out),
            None => out,
        }
    }
}

fn apply_getter(out: &mut Value, path: &Path, getter: impl FnOnce(Value) -> Value) {
    if let Some(current) = get_at(out, path).cloned() {
        write(out, path, getter(current));
    }
}

fn write(out: &mut Value, path: &Path, value: Value) {
    if let Err(e) = set_at(out, path, value) {
        tracing::warn!(path = %path, error = %e, "cannot render path");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, Schema};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        let line = Schema::builder()
            .id(false)
            .field("qty", FieldDescriptor::number())
            .field("price", FieldDescriptor::number())
            .virtual_field("total", |v| {
                json!(v.get_f64("qty").unwrap_or(0.0) * v.get_f64("price").unwrap_or(0.0))
            })
            .build()
            .unwrap();
        Arc::new(
            Schema::builder()
                .id(false)
                .field("first", FieldDescriptor::string())
                .field("last", FieldDescriptor::string())
                .field(
                    "email",
                    FieldDescriptor::string().get(|v, _| match v.as_str() {
                        Some(s) => json!(s.to_uppercase()),
                        None => v,
                    }),
                )
                .field("meta", FieldDescriptor::mixed())
                .field("owner", FieldDescriptor::reference("users"))
                .field("lines", FieldDescriptor::document_array(line))
                .virtual_field("full_name", |v| {
                    json!(format!(
                        "{} {}",
                        v.get_str("first").unwrap_or_default(),
                        v.get_str("last").unwrap_or_default()
                    ))
                })
                .build()
                .unwrap(),
        )
    }

    fn raw() -> Value {
        json!({
            "first": "Ada",
            "last": "Lovelace",
            "email": "ada@example.com",
            "meta": {},
            "owner": "u1",
            "lines": [{"qty": 2, "price": 1.5}]
        })
    }

    #[test]
    fn plain_render_is_the_raw_record() {
        let doc = Document::hydrate(schema(), raw(), None).unwrap();
        assert_eq!(doc.to_plain_object(&ToObjectOptions::default()), raw());
    }

    #[test]
    fn getters_and_virtuals() {
        let doc = Document::hydrate(schema(), raw(), None).unwrap();
        let out = doc.to_plain_object(&ToObjectOptions::json());
        assert_eq!(out["email"], "ADA@EXAMPLE.COM");
        assert_eq!(out["full_name"], "Ada Lovelace");
        assert_eq!(out["lines"][0]["total"], json!(3.0));
        assert_eq!(doc.get("email"), Some(&json!("ada@example.com")));
    }

    #[test]
    fn minimize_and_depopulate() {
        let mut doc = Document::hydrate(schema(), raw(), None).unwrap();
        doc.populate("owner", json!({"_id": "u1", "name": "Ada"})).unwrap();
        let out = doc.to_plain_object(&ToObjectOptions {
            minimize: true,
            depopulate: true,
            ..Default::default()
        });
        assert!(out.get("meta").is_none());
        assert_eq!(out["owner"], "u1");
        assert_eq!(doc.get("owner.name"), Some(&json!("Ada")));
    }

    #[test]
    fn transform_runs_last() {
        let doc = Document::hydrate(schema(), raw(), None).unwrap();
        let out = doc.to_plain_object(&ToObjectOptions::default().with_transform(|mut v| {
            if let Value::Object(map) = &mut v {
                map.remove("lines");
            }
            v
        }));
        assert!(out.get("lines").is_none());
        assert_eq!(out["first"], "Ada");
    }
}
