//! DocSource store.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{
    new_v7, table_name, CreateDocSource, DocSource, DocSourceStatus, EntityKind, Error, Result,
};

/// CRUD and lifecycle transitions for [`DocSource`] records.
pub struct DocSourceStore {
    engine: Arc<dyn StorageEngine>,
}

impl DocSourceStore {
    const INDEXED_FIELDS: &'static [&'static str] = &["status", "is_deleted"];

    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Resolve the per-KB table, creating it on first use.
    async fn table(&self, kb_id: &Uuid) -> Result<String> {
        let table = table_name(kb_id, EntityKind::DocSources);
        self.engine
            .create_table_if_not_exists(&table, Self::INDEXED_FIELDS)
            .await?;
        Ok(table)
    }

    fn decode(row: serde_json::Value) -> Result<DocSource> {
        serde_json::from_value(row).map_err(Error::from)
    }

    /// Create a new DocSource with status CREATED.
    ///
    /// Validation failures (empty URI) are raised synchronously here, never
    /// deferred to the pipeline.
    pub async fn create(&self, req: CreateDocSource) -> Result<DocSource> {
        if req.uri.trim().is_empty() {
            return Err(Error::Validation("docsource uri must not be empty".into()));
        }

        let now = Utc::now();
        let source = DocSource {
            id: new_v7(),
            kb_id: req.kb_id,
            source_type: req.source_type,
            uri: req.uri,
            ingest_config: req.ingest_config,
            tags: req.tags,
            status: DocSourceStatus::Created,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let table = self.table(&source.kb_id).await?;
        self.engine
            .insert(&table, &source.id, &serde_json::to_value(&source)?)
            .await?;
        debug!(docsource_id = %source.id, kb_id = %source.kb_id, "created docsource");
        Ok(source)
    }

    /// Fetch a DocSource by id; missing ids are an error, distinct from
    /// "not yet finished".
    pub async fn get(&self, kb_id: &Uuid, id: &Uuid) -> Result<DocSource> {
        let table = self.table(kb_id).await?;
        self.engine
            .get(&table, id)
            .await?
            .map(Self::decode)
            .transpose()?
            .ok_or(Error::DocSourceNotFound(*id))
    }

    /// All live DocSources in the KB.
    pub async fn list(&self, kb_id: &Uuid) -> Result<Vec<DocSource>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(&table, &Filter::new().eq("is_deleted", false))
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Full-record update (read-modify-write).
    pub async fn update(&self, source: &DocSource) -> Result<()> {
        let table = self.table(&source.kb_id).await?;
        let found = self
            .engine
            .update(&table, &source.id, &serde_json::to_value(source)?)
            .await?;
        if !found {
            return Err(Error::DocSourceNotFound(source.id));
        }
        Ok(())
    }

    /// Transition the status, bumping `updated_at`.
    pub async fn update_status(
        &self,
        kb_id: &Uuid,
        id: &Uuid,
        status: DocSourceStatus,
    ) -> Result<DocSource> {
        let mut source = self.get(kb_id, id).await?;
        source.status = status;
        source.updated_at = Utc::now();
        self.update(&source).await?;
        Ok(source)
    }

    /// Flag the record deleted. Cascading to DocSinks is owned by the
    /// [`crate::Database`] coordinator.
    pub async fn soft_delete(&self, kb_id: &Uuid, id: &Uuid) -> Result<()> {
        let mut source = self.get(kb_id, id).await?;
        source.is_deleted = true;
        source.updated_at = Utc::now();
        self.update(&source).await
    }
}
