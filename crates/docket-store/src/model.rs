//! Models: a schema bound to a collection of a storage client.

use crate::client::{Committed, Filter, SessionHandle, StoreClient};
use crate::error::{ModelError, ModelResult, StoreError, StoreResult};
use docket_state::{Document, Projection, Schema, ToObjectOptions, ValidateOptions};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Model behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Validate before writing.
    pub validate_before_save: bool,
    /// When saving a stored document, validate only what changed.
    pub validate_modified_only: bool,
    /// Upper bound on each storage call; `None` waits forever.
    pub operation_timeout_ms: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            validate_before_save: true,
            validate_modified_only: false,
            operation_timeout_ms: Some(10_000),
        }
    }
}

/// Result of [`Model::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new record was stored.
    Inserted(Committed),
    /// The stored record was updated.
    Updated(Committed),
    /// Nothing had changed.
    Unchanged,
}

/// Binds a collection name, a schema and a storage client.
#[derive(Clone)]
pub struct Model {
    collection: String,
    schema: Arc<Schema>,
    client: Arc<dyn StoreClient>,
    config: ModelConfig,
}

impl Model {
    pub fn new(
        collection: impl Into<String>,
        schema: Arc<Schema>,
        client: Arc<dyn StoreClient>,
    ) -> Self {
        Self {
            collection: collection.into(),
            schema,
            client,
            config: ModelConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Documents

    /// A new, unsaved document.
    pub fn new_document(&self, initial: Value) -> ModelResult<Document> {
        Ok(Document::new(self.schema.clone(), initial)?)
    }

    /// A document for a record read from the store.
    pub fn hydrate(&self, raw: Value, projection: Option<Projection>) -> ModelResult<Document> {
        Ok(Document::hydrate(self.schema.clone(), raw, projection)?)
    }

    pub async fn find_by_id(&self, id: impl Into<Value>) -> ModelResult<Option<Document>> {
        let id = id.into();
        let raw = self
            .bounded("read", self.client.read_one(&self.collection, &id, None))
            .await?;
        raw.map(|raw| self.hydrate(raw, None)).transpose()
    }

    pub async fn find(
        &self,
        filter: &Filter,
        projection: Option<Projection>,
    ) -> ModelResult<Vec<Document>> {
        let records = self
            .bounded(
                "read",
                self.client.read(&self.collection, filter, projection.as_ref()),
            )
            .await?;
        records
            .into_iter()
            .map(|raw| self.hydrate(raw, projection.clone()))
            .collect()
    }

    /// Like [`find`](Self::find), hydrating records as the client yields them.
    pub fn find_stream<'a>(
        &'a self,
        filter: &'a Filter,
        projection: Option<&'a Projection>,
    ) -> impl Stream<Item = ModelResult<Document>> + 'a {
        self.client
            .read_stream(&self.collection, filter, projection)
            .map(move |raw| self.hydrate(raw?, projection.cloned()))
    }

    // ------------------------------------------------------------------
    // Persistence

    /// Persist the document outside any transaction.
    ///
    /// Runs pre-save hooks, validates, writes the changeset (or inserts a
    /// new document), commits the document and runs post-save hooks. When
    /// any step fails the document keeps its pending changes; call
    /// [`Document::rollback`] to discard them.
    pub async fn save(&self, doc: &mut Document) -> ModelResult<SaveOutcome> {
        self.persist(doc, None).await
    }

    /// Persist the document inside a transaction.
    ///
    /// The document is committed as soon as the session accepts the write.
    /// If the transaction later aborts, roll the document back.
    pub async fn save_in(
        &self,
        doc: &mut Document,
        session: &SessionHandle,
    ) -> ModelResult<SaveOutcome> {
        self.persist(doc, Some(session)).await
    }

    /// Remove the document's record.
    pub async fn delete(&self, doc: &Document) -> ModelResult<()> {
        let id = self.id_of(doc)?;
        self.bounded("delete", self.client.delete(&self.collection, &id, None))
            .await?;
        Ok(())
    }

    async fn persist(
        &self,
        doc: &mut Document,
        session: Option<&SessionHandle>,
    ) -> ModelResult<SaveOutcome> {
        doc.run_pre_save()?;

        if self.config.validate_before_save {
            let opts = if self.config.validate_modified_only && !doc.is_new() {
                ValidateOptions::modified_only()
            } else {
                ValidateOptions::default()
            };
            doc.validate_with(opts).await?;
        }

        let outcome = if doc.is_new() {
            let record = doc.to_plain_object(&ToObjectOptions {
                depopulate: true,
                ..Default::default()
            });
            let committed = self
                .bounded(
                    "insert",
                    self.client.insert(&self.collection, record, session),
                )
                .await?;
            SaveOutcome::Inserted(committed)
        } else {
            let changes = doc.changeset();
            if changes.is_empty() {
                tracing::debug!(collection = %self.collection, "nothing to save");
                SaveOutcome::Unchanged
            } else {
                let id = self.id_of(doc)?;
                let committed = self
                    .bounded(
                        "write",
                        self.client.write(&self.collection, &id, &changes, session),
                    )
                    .await?;
                SaveOutcome::Updated(committed)
            }
        };

        doc.commit();
        doc.run_post_save();
        tracing::debug!(collection = %self.collection, outcome = ?outcome, "saved document");
        Ok(outcome)
    }

    fn id_of(&self, doc: &Document) -> ModelResult<Value> {
        doc.get("_id")
            .filter(|id| !id.is_null())
            .cloned()
            .ok_or_else(|| ModelError::MissingId {
                collection: self.collection.clone(),
            })
    }

    /// Await a storage call within the configured timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match self.config.operation_timeout_ms {
            None => call.await,
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call)
                .await
                .map_err(|_| {
                    tracing::warn!(operation, timeout_ms = ms, "storage call timed out");
                    StoreError::timeout(operation, ms)
                })?,
        }
    }
}
