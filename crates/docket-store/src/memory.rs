//! In-memory storage client with session staging.

use crate::client::{Committed, Filter, SessionHandle, StoreClient, Version};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use docket_state::{apply_changeset, Changeset, Projection};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

struct MemoryEntry {
    record: Value,
    version: Version,
}

type Collections = HashMap<String, BTreeMap<String, MemoryEntry>>;

/// A write made inside a session, replayed on commit.
#[derive(Clone)]
enum StagedWrite {
    Insert {
        collection: String,
        record: Value,
    },
    Write {
        collection: String,
        id: Value,
        changeset: Changeset,
    },
    Delete {
        collection: String,
        id: Value,
    },
}

/// Session state: a private copy of the data plus the writes made so far.
struct Session {
    working: Collections,
    staged: Vec<StagedWrite>,
}

/// In-memory storage for testing and local development.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    sessions: RwLock<HashMap<SessionHandle, Session>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Run one write, either directly or inside its session.
    async fn run<T>(
        &self,
        session: Option<&SessionHandle>,
        write: StagedWrite,
        apply: impl Fn(&mut Collections, &StagedWrite) -> StoreResult<T>,
    ) -> StoreResult<T> {
        match session {
            None => {
                let mut collections = self.collections.write().await;
                apply(&mut collections, &write)
            }
            Some(handle) => {
                let mut sessions = self.sessions.write().await;
                let session = sessions
                    .get_mut(handle)
                    .ok_or(StoreError::UnknownSession(*handle))?;
                let out = apply(&mut session.working, &write)?;
                session.staged.push(write);
                Ok(out)
            }
        }
    }
}

fn clone_collections(collections: &Collections) -> Collections {
    collections
        .iter()
        .map(|(name, records)| {
            let records = records
                .iter()
                .map(|(id, e)| {
                    (
                        id.clone(),
                        MemoryEntry {
                            record: e.record.clone(),
                            version: e.version,
                        },
                    )
                })
                .collect();
            (name.clone(), records)
        })
        .collect()
}

/// Storage key of a record id. `1` and `"1"` are different ids.
fn id_key(id: &Value) -> String {
    id.to_string()
}

fn apply_write(collections: &mut Collections, write: &StagedWrite) -> StoreResult<Committed> {
    match write {
        StagedWrite::Insert { collection, record } => {
            let id = record
                .get("_id")
                .filter(|id| !id.is_null())
                .ok_or_else(|| StoreError::InvalidRecord("record has no _id".to_string()))?;
            let records = collections.entry(collection.clone()).or_default();
            let key = id_key(id);
            if records.contains_key(&key) {
                return Err(StoreError::already_exists(collection, key));
            }
            records.insert(
                key,
                MemoryEntry {
                    record: record.clone(),
                    version: 0,
                },
            );
            Ok(Committed { version: 0 })
        }
        StagedWrite::Write {
            collection,
            id,
            changeset,
        } => {
            let entry = collections
                .get_mut(collection)
                .and_then(|records| records.get_mut(&id_key(id)))
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            let updated = apply_changeset(&entry.record, changeset)?;
            if updated.get("_id") != Some(id) {
                return Err(StoreError::InvalidRecord(
                    "changeset rewrites _id".to_string(),
                ));
            }
            entry.record = updated;
            entry.version += 1;
            Ok(Committed {
                version: entry.version,
            })
        }
        StagedWrite::Delete { collection, id } => {
            if let Some(records) = collections.get_mut(collection) {
                records.remove(&id_key(id));
            }
            Ok(Committed { version: 0 })
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn read(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> StoreResult<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(records
            .values()
            .filter(|e| filter.matches(&e.record))
            .map(|e| match projection {
                Some(p) => p.apply(&e.record),
                None => e.record.clone(),
            })
            .collect())
    }

    async fn insert(
        &self,
        collection: &str,
        record: Value,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Committed> {
        let write = StagedWrite::Insert {
            collection: collection.to_string(),
            record,
        };
        self.run(session, write, apply_write).await
    }

    async fn write(
        &self,
        collection: &str,
        id: &Value,
        changeset: &Changeset,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Committed> {
        let write = StagedWrite::Write {
            collection: collection.to_string(),
            id: id.clone(),
            changeset: changeset.clone(),
        };
        let committed = self.run(session, write, apply_write).await?;
        tracing::trace!(collection, id = %id, changes = changeset.len(), "applied changeset");
        Ok(committed)
    }

    async fn delete(
        &self,
        collection: &str,
        id: &Value,
        session: Option<&SessionHandle>,
    ) -> StoreResult<()> {
        let write = StagedWrite::Delete {
            collection: collection.to_string(),
            id: id.clone(),
        };
        self.run(session, write, apply_write).await.map(|_| ())
    }

    async fn start_transaction(&self) -> StoreResult<SessionHandle> {
        let working = clone_collections(&*self.collections.read().await);
        let handle = SessionHandle::new();
        self.sessions.write().await.insert(
            handle,
            Session {
                working,
                staged: Vec::new(),
            },
        );
        tracing::debug!(session = %handle, "started transaction");
        Ok(handle)
    }

    async fn commit_transaction(&self, session: &SessionHandle) -> StoreResult<()> {
        let staged = self
            .sessions
            .write()
            .await
            .remove(session)
            .ok_or(StoreError::UnknownSession(*session))?
            .staged;

        // Replay onto the live data; nothing lands unless every write does.
        let mut collections = self.collections.write().await;
        let mut next = clone_collections(&collections);
        for write in &staged {
            apply_write(&mut next, write)?;
        }
        *collections = next;
        tracing::debug!(session = %session, writes = staged.len(), "committed transaction");
        Ok(())
    }

    async fn abort_transaction(&self, session: &SessionHandle) -> StoreResult<()> {
        let discarded = self
            .sessions
            .write()
            .await
            .remove(session)
            .ok_or(StoreError::UnknownSession(*session))?;
        tracing::debug!(session = %session, writes = discarded.staged.len(), "aborted transaction");
        Ok(())
    }
}
