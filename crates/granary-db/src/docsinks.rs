//! DocSink store with content-addressed deduplication.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{
    new_v7, table_name, DocSink, DocSinkCreate, DocSinkStatus, EntityKind, Error, Result,
};

/// How `create` resolved a sink description against existing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// No match; a new DocSink was inserted.
    Created,
    /// Byte-identical content already ingested; origins merged, no
    /// reprocessing warranted.
    MergedByHash,
    /// Same (original URI, raw URI, KB) already present; returned unchanged.
    ExistingByUri,
}

impl DedupOutcome {
    /// Only a freshly created sink needs a conversion pass scheduled.
    pub fn is_new(&self) -> bool {
        matches!(self, DedupOutcome::Created)
    }
}

/// CRUD, lifecycle transitions, and dedup for [`DocSink`] records.
pub struct DocSinkStore {
    engine: Arc<dyn StorageEngine>,
    /// Serializes the dedup lookup+insert sequence; without it two
    /// concurrent ingests of identical bytes could both miss the lookup.
    create_lock: Mutex<()>,
}

impl DocSinkStore {
    const INDEXED_FIELDS: &'static [&'static str] = &[
        "content_hash",
        "original_doc_uri",
        "docsource_id",
        "status",
        "is_deleted",
    ];

    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            create_lock: Mutex::new(()),
        }
    }

    async fn table(&self, kb_id: &Uuid) -> Result<String> {
        let table = table_name(kb_id, EntityKind::DocSinks);
        self.engine
            .create_table_if_not_exists(&table, Self::INDEXED_FIELDS)
            .await?;
        Ok(table)
    }

    fn decode(row: serde_json::Value) -> Result<DocSink> {
        serde_json::from_value(row).map_err(Error::from)
    }

    /// Create a DocSink, deduplicating against existing records.
    ///
    /// Priority order, first match wins:
    /// 1. same content hash in the KB → merge origins into the `extra_*`
    ///    lists (set-union, idempotent) and return the merged record;
    /// 2. same (original URI, raw URI, KB) → return unchanged;
    /// 3. otherwise insert a new record with status CREATED.
    ///
    /// The `extra_*` lists include the primary origin from the start, so
    /// they enumerate every contributing DocSource.
    pub async fn create(&self, req: DocSinkCreate) -> Result<(DocSink, DedupOutcome)> {
        if req.original_doc_uri.trim().is_empty() || req.raw_doc_uri.trim().is_empty() {
            return Err(Error::Validation("docsink uris must not be empty".into()));
        }

        let table = self.table(&req.kb_id).await?;
        let _create_guard = self.create_lock.lock().await;

        if let Some(hash) = &req.content_hash {
            let matches = self
                .engine
                .query(
                    &table,
                    &Filter::new()
                        .eq("content_hash", hash.as_str())
                        .eq("is_deleted", false),
                )
                .await?;
            if let Some(row) = matches.into_iter().next() {
                let mut sink = Self::decode(row)?;
                let mut changed = false;
                if !sink.extra_original_doc_uri.contains(&req.original_doc_uri) {
                    sink.extra_original_doc_uri.push(req.original_doc_uri.clone());
                    changed = true;
                }
                if !sink.extra_docsource_id.contains(&req.docsource_id) {
                    sink.extra_docsource_id.push(req.docsource_id);
                    changed = true;
                }
                if changed {
                    sink.updated_at = Utc::now();
                    self.update(&sink).await?;
                }
                info!(
                    docsink_id = %sink.id,
                    content_hash = %hash,
                    "identical content already ingested, merged origins"
                );
                return Ok((sink, DedupOutcome::MergedByHash));
            }
        }

        let matches = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .eq("original_doc_uri", req.original_doc_uri.as_str())
                    .eq("raw_doc_uri", req.raw_doc_uri.as_str())
                    .eq("is_deleted", false),
            )
            .await?;
        if let Some(row) = matches.into_iter().next() {
            let sink = Self::decode(row)?;
            debug!(docsink_id = %sink.id, "docsink already exists for uri pair");
            return Ok((sink, DedupOutcome::ExistingByUri));
        }

        let now = Utc::now();
        let sink = DocSink {
            id: new_v7(),
            docsource_id: req.docsource_id,
            kb_id: req.kb_id,
            original_doc_uri: req.original_doc_uri.clone(),
            raw_doc_uri: req.raw_doc_uri,
            content_hash: req.content_hash,
            size_bytes: req.size_bytes,
            status: DocSinkStatus::Created,
            extra_original_doc_uri: vec![req.original_doc_uri],
            extra_docsource_id: vec![req.docsource_id],
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.engine
            .insert(&table, &sink.id, &serde_json::to_value(&sink)?)
            .await?;
        debug!(docsink_id = %sink.id, kb_id = %sink.kb_id, "created docsink");
        Ok((sink, DedupOutcome::Created))
    }

    pub async fn get(&self, kb_id: &Uuid, id: &Uuid) -> Result<DocSink> {
        let table = self.table(kb_id).await?;
        self.engine
            .get(&table, id)
            .await?
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("docsink {id}")))
    }

    /// All live DocSinks in the KB.
    pub async fn list(&self, kb_id: &Uuid) -> Result<Vec<DocSink>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(&table, &Filter::new().eq("is_deleted", false))
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Live DocSinks whose primary origin is the given DocSource.
    pub async fn list_for_source(&self, kb_id: &Uuid, docsource_id: &Uuid) -> Result<Vec<DocSink>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .eq("docsource_id", docsource_id.to_string())
                    .eq("is_deleted", false),
            )
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Full-record update (read-modify-write).
    pub async fn update(&self, sink: &DocSink) -> Result<()> {
        let table = self.table(&sink.kb_id).await?;
        let found = self
            .engine
            .update(&table, &sink.id, &serde_json::to_value(sink)?)
            .await?;
        if !found {
            return Err(Error::NotFound(format!("docsink {}", sink.id)));
        }
        Ok(())
    }

    /// Transition the status, bumping `updated_at`.
    pub async fn update_status(
        &self,
        kb_id: &Uuid,
        id: &Uuid,
        status: DocSinkStatus,
    ) -> Result<DocSink> {
        let mut sink = self.get(kb_id, id).await?;
        sink.status = status;
        sink.updated_at = Utc::now();
        self.update(&sink).await?;
        Ok(sink)
    }

    /// Flag the record deleted. Cascading to Documents and Tasks is owned
    /// by the [`crate::Database`] coordinator.
    pub async fn soft_delete(&self, kb_id: &Uuid, id: &Uuid) -> Result<()> {
        let mut sink = self.get(kb_id, id).await?;
        sink.is_deleted = true;
        sink.updated_at = Utc::now();
        self.update(&sink).await
    }
}
