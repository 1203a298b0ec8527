//! Core traits for granary abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy: the storage engine primitive every store is built on, and the
//! narrow contracts of the pipeline stage collaborators the task runner
//! invokes.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DocSink, DocSinkCreate, DocSource, Document, ResultCode, Segment};

// =============================================================================
// FILTER PREDICATES
// =============================================================================

/// Comparison operator for one filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

/// One condition on a top-level field of a stored row.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

/// Conjunction of field conditions applied to JSON rows.
///
/// An empty filter matches every row. A missing field compares as JSON
/// null, so `eq("content_hash", null)` also matches rows without the field.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    /// Add an inequality condition.
    pub fn ne(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op: FilterOp::Ne,
            value: value.into(),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate this filter against a row in memory.
    ///
    /// Backends that cannot push predicates down (or tests) use this as the
    /// reference semantics; SQL backends must agree with it.
    pub fn matches(&self, row: &JsonValue) -> bool {
        self.conditions.iter().all(|cond| {
            let actual = row.get(&cond.field).unwrap_or(&JsonValue::Null);
            match cond.op {
                FilterOp::Eq => *actual == cond.value,
                FilterOp::Ne => *actual != cond.value,
            }
        })
    }
}

// =============================================================================
// STORAGE ENGINE
// =============================================================================

/// Per-backend key/record store every higher component is built on.
///
/// Rows are JSON documents carrying their own `id` field; `update` is a
/// full-record replace (callers read-modify-write, there is no
/// partial-field primitive). Implementations must serialize table creation
/// and all mutating statements per logical table, because worker-pool tasks
/// create-or-use the same table concurrently.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Create the logical table if it does not exist yet, along with
    /// secondary indexes on the named top-level row fields.
    ///
    /// Concurrent calls for the same table must result in exactly one
    /// table and no duplicate-table errors.
    async fn create_table_if_not_exists(&self, table: &str, indexed_fields: &[&str])
        -> Result<()>;

    /// Insert a new row keyed by `id`.
    async fn insert(&self, table: &str, id: &Uuid, row: &JsonValue) -> Result<()>;

    /// Point lookup by id. `Ok(None)` when absent.
    async fn get(&self, table: &str, id: &Uuid) -> Result<Option<JsonValue>>;

    /// Return all rows matching the filter. An empty result is not an error.
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<JsonValue>>;

    /// Replace the row keyed by `id`. Returns false when the row is absent.
    async fn update(&self, table: &str, id: &Uuid, row: &JsonValue) -> Result<bool>;

    /// Physically remove the row keyed by `id`. Returns false when absent.
    ///
    /// Pipeline entities are soft-deleted via `update`; this exists for
    /// maintenance paths (purges, test cleanup).
    async fn delete(&self, table: &str, id: &Uuid) -> Result<bool>;
}

// =============================================================================
// PIPELINE STAGE COLLABORATORS
// =============================================================================

/// Intake stage: pulls raw content out of a DocSource.
///
/// `ingest` is idempotent against already-ingested input; the produced sink
/// descriptions are retrieved with `ingested_docsink_list` after a
/// successful run.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn ingest(&self, source: &DocSource) -> Result<ResultCode>;

    /// Sink descriptions produced by the most recent successful `ingest`.
    async fn ingested_docsink_list(&self) -> Vec<DocSinkCreate>;
}

/// Conversion stage: turns one DocSink's raw bytes into a normalized
/// Document, writing it into the document store.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, sink: &DocSink) -> Result<ResultCode>;
}

/// Split stage: chunks one Document into Segments with hierarchical
/// `position_in_doc` ordinals, writing them into the segment store.
#[async_trait]
pub trait Splitter: Send + Sync {
    async fn split(&self, document: &Document) -> Result<ResultCode>;
}

/// Embed stage: computes vectors for a batch of Segments, writing them
/// keyed by segment id.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_segment_list(&self, segments: &[Segment]) -> Result<ResultCode>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(filter.matches(&json!({"any": "row"})));
        assert!(filter.matches(&json!({})));
    }

    #[test]
    fn test_eq_condition() {
        let filter = Filter::new().eq("status", "created");
        assert!(filter.matches(&json!({"status": "created"})));
        assert!(!filter.matches(&json!({"status": "failed"})));
    }

    #[test]
    fn test_ne_condition() {
        let filter = Filter::new().ne("status", "completed");
        assert!(filter.matches(&json!({"status": "running"})));
        assert!(!filter.matches(&json!({"status": "completed"})));
    }

    #[test]
    fn test_conjunction() {
        let filter = Filter::new()
            .eq("is_deleted", false)
            .eq("kb_id", "abc")
            .ne("status", "completed");
        assert!(filter.matches(&json!({
            "is_deleted": false, "kb_id": "abc", "status": "pending"
        })));
        assert!(!filter.matches(&json!({
            "is_deleted": true, "kb_id": "abc", "status": "pending"
        })));
        assert!(!filter.matches(&json!({
            "is_deleted": false, "kb_id": "abc", "status": "completed"
        })));
    }

    #[test]
    fn test_missing_field_compares_as_null() {
        let filter = Filter::new().eq("content_hash", JsonValue::Null);
        assert!(filter.matches(&json!({"id": "x"})));
        assert!(filter.matches(&json!({"content_hash": null})));
        assert!(!filter.matches(&json!({"content_hash": "blake3:aa"})));

        let ne = Filter::new().ne("content_hash", JsonValue::Null);
        assert!(!ne.matches(&json!({"id": "x"})));
        assert!(ne.matches(&json!({"content_hash": "blake3:aa"})));
    }

    #[test]
    fn test_bool_values_distinguished_from_strings() {
        let filter = Filter::new().eq("is_deleted", false);
        assert!(!filter.matches(&json!({"is_deleted": "false"})));
        assert!(filter.matches(&json!({"is_deleted": false})));
    }
}
