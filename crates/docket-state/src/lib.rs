//! Schema-driven document state: change tracking, validation and changesets.
//!
//! `docket-state` keeps an in-memory JSON document in step with its stored
//! record. Every write goes through a compiled [`Schema`], is cast to the
//! declared type, and is recorded in a per-path state machine. From that
//! record the engine decides what to validate and which minimal writes the
//! store needs.
//!
//! # Core Concepts
//!
//! - **Schema / FieldDescriptor**: flattened path → type, validators,
//!   defaults, setters and getters, compiled once and shared
//! - **Document**: a raw value tree plus a [`PathStateTracker`] and the
//!   embedded documents it owns
//! - **PathState**: `require`, `modify`, `init`, `default` or `ignore`; a
//!   path is in at most one state at a time
//! - **Changeset**: the ordered `set`/`unset`/`push`/`pull` writes that bring
//!   the stored record in line with the document
//!
//! # Lifecycle
//!
//! ```text
//! hydrate(raw) ──set/push/pull──▶ validate ──▶ changeset ──▶ store write
//!                                                              │
//!                                           commit() ◀── ok ───┤
//!                                         rollback() ◀── err ──┘
//! ```
//!
//! # Quick Start
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
//!         .field("age", FieldDescriptor::number().min(0.0))
//!         .build()
//!         .unwrap(),
//! );
//!
//! // A new document missing its required field fails validation.
//! let mut doc = Document::new(schema.clone(), json!({"age": 5})).unwrap();
//! let err = doc.validate_sync().unwrap_err();
//! assert_eq!(err.as_validation().unwrap().paths(), vec!["name"]);
//!
//! doc.set("name", "x").unwrap();
//! doc.validate_sync().unwrap();
//!
//! // A hydrated document only reports what changed.
//! let mut stored = Document::hydrate(schema, json!({"name": "x", "age": 5}), None).unwrap();
//! stored.set("age", 5).unwrap();
//! assert!(!stored.is_dirty());
//! stored.set("age", "6").unwrap();
//! assert_eq!(stored.changeset().paths(), vec!["age"]);
//! ```

mod changeset;
mod document;
mod error;
mod path;
mod projection;
mod schema;
mod tracker;
mod value;
mod view;

// Core types
pub use changeset::{apply_change, apply_changeset, Change, ChangeOp, Changeset};
pub use error::{
    CastError, DocResult, DocumentError, ErrorAggregate, FieldError, HookError,
    ParallelOperationError, PathError, PathResult, SchemaError, StrictModeError, StrictViolation,
    ValidationError, ValidatorError, ValidatorKind,
};
pub use path::{Path, Seg};
pub use projection::Projection;
pub use tracker::{PathState, PathStateTracker};
pub use value::{deep_equal, get_at, is_nullish, minimize, remove_at, set_at, value_type_name};
pub use view::DocView;

// Schemas
pub use schema::{
    reference_id, AsyncCheck, DefaultFn, DefaultValue, FieldDescriptor, GetterFn, Hooks,
    PostSaveHook, PostValidateHook, PreSaveHook, PreValidateHook, Required, RequiredFn,
    Resolution, Schema, SchemaBuilder, SchemaOptions, SchemaType, SetterContext, SetterFn,
    StrictMode, SubSchema, SyncCheck, TypeTag, Validator, VirtualFn,
};

// Documents
pub use document::{Document, SetOptions, ToObjectOptions, TransformFn, ValidateOptions};
