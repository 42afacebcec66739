//! Storage contract, in-memory adapter and model layer for `docket-state`
//! documents.
//!
//! The engine in `docket-state` never talks to a database. This crate
//! defines what it needs from one ([`StoreClient`]), ships an in-memory
//! implementation ([`MemoryStore`]), and wires the two together in
//! [`Model`]:
//!
//! ```text
//! Model::find_by_id ──read──▶ Document::hydrate
//!                                   │ set / push / pull
//! Model::save ◀─────────────────────┘
//!   pre_save → validate → changeset → insert | write → commit → post_save
//! ```
//!
//! # Quick Start
//!
//! ```
//! use docket_state::{FieldDescriptor, Schema};
//! use docket_store::{MemoryStore, Model, SaveOutcome};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let schema = Arc::new(
//!     Schema::builder()
//!         .field("name", FieldDescriptor::string().required())
//!         .build()
//!         .unwrap(),
//! );
//! let users = Model::new("users", schema, Arc::new(MemoryStore::new()));
//!
//! let mut doc = users.new_document(json!({"name": "Ada"})).unwrap();
//! assert!(matches!(users.save(&mut doc).await.unwrap(), SaveOutcome::Inserted(_)));
//!
//! let id = doc.get("_id").cloned().unwrap();
//! let mut stored = users.find_by_id(id).await.unwrap().unwrap();
//! stored.set("name", "Grace").unwrap();
//! assert!(matches!(users.save(&mut stored).await.unwrap(), SaveOutcome::Updated(_)));
//! # });
//! ```

mod client;
mod error;
mod memory;
mod model;

pub use client::{Committed, Filter, RecordStream, SessionHandle, StoreClient, Version};
pub use error::{ModelError, ModelResult, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use model::{Model, ModelConfig, SaveOutcome};
