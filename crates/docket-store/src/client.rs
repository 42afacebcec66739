//! The storage client contract.
//!
//! A client executes reads and writes against some backing store and hands
//! back already-decoded raw records. Connections, wire protocols and query
//! languages live behind the trait.

use crate::error::StoreResult;
use async_trait::async_trait;
use docket_state::{deep_equal, get_at, Changeset, Path, Projection};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Monotonically increasing per-record version.
pub type Version = u64;

/// Stream of raw records produced by [`StoreClient::read_stream`].
pub type RecordStream<'a> = BoxStream<'a, StoreResult<Value>>;

/// Acknowledgement returned after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub version: Version,
}

/// Opaque handle for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Equality match on dot-delimited paths.
///
/// A record matches when every condition holds. A `null` condition also
/// matches a missing path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<(Path, Value)>,
}

impl Filter {
    /// Matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the record with this `_id`.
    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::new().eq("_id", id)
    }

    /// Add an equality condition.
    pub fn eq(mut self, path: impl Into<Path>, value: impl Into<Value>) -> Self {
        self.conditions.push((path.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(path, expected)| match get_at(record, path) {
                Some(actual) => deep_equal(actual, expected),
                None => expected.is_null(),
            })
    }
}

/// Storage collaborator used by [`Model`](crate::Model).
///
/// Writes take an optional session; a write made in a session becomes
/// visible only when the session commits.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read the matching records, projected.
    async fn read(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> StoreResult<Vec<Value>>;

    /// Read the matching records as a stream.
    ///
    /// The default implementation buffers [`read`](Self::read).
    fn read_stream<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a Filter,
        projection: Option<&'a Projection>,
    ) -> RecordStream<'a> {
        stream::once(self.read(collection, filter, projection))
            .flat_map(|result| match result {
                Ok(records) => stream::iter(records.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::iter(std::iter::once(Err(e))).right_stream(),
            })
            .boxed()
    }

    /// Read one record by id. Convenience wrapper.
    async fn read_one(
        &self,
        collection: &str,
        id: &Value,
        projection: Option<&Projection>,
    ) -> StoreResult<Option<Value>> {
        let filter = Filter::by_id(id.clone());
        Ok(self
            .read(collection, &filter, projection)
            .await?
            .into_iter()
            .next())
    }

    /// Store a new record. Returns `AlreadyExists` if its `_id` is taken.
    async fn insert(
        &self,
        collection: &str,
        record: Value,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Committed>;

    /// Apply a changeset to an existing record.
    async fn write(
        &self,
        collection: &str,
        id: &Value,
        changeset: &Changeset,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Committed>;

    /// Remove a record. Removing a missing record is not an error.
    async fn delete(
        &self,
        collection: &str,
        id: &Value,
        session: Option<&SessionHandle>,
    ) -> StoreResult<()>;

    async fn start_transaction(&self) -> StoreResult<SessionHandle>;

    /// Make the session's writes visible, all or none.
    async fn commit_transaction(&self, session: &SessionHandle) -> StoreResult<()>;

    /// Discard the session's writes.
    async fn abort_transaction(&self, session: &SessionHandle) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_nested_paths() {
        let record = json!({"_id": 1, "address": {"city": "Oslo"}, "tags": ["a"]});
        assert!(Filter::new().matches(&record));
        assert!(Filter::by_id(1).matches(&record));
        assert!(!Filter::by_id("1").matches(&record));
        assert!(Filter::new().eq("address.city", "Oslo").matches(&record));
        assert!(Filter::new().eq("tags.0", "a").matches(&record));
        assert!(!Filter::new()
            .eq("address.city", "Oslo")
            .eq("tags.0", "b")
            .matches(&record));
    }

    #[test]
    fn test_null_condition_matches_missing_path() {
        let record = json!({"_id": 1});
        assert!(Filter::new().eq("deleted_at", Value::Null).matches(&record));
        assert!(!Filter::new().eq("deleted_at", 0).matches(&record));
    }

    #[test]
    fn test_session_handles_are_distinct() {
        let a = SessionHandle::new();
        let b = SessionHandle::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }
}
