//! Document store.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{
    new_v7, table_name, CreateDocument, Document, EntityKind, Error, Result, StageStatus,
};

/// CRUD and stage-status transitions for [`Document`] records.
///
/// The "at most one live Document per DocSink" invariant is enforced by
/// [`crate::Database::create_document`], which soft-deletes the prior
/// version (with its cascade) before calling [`DocumentStore::insert`].
pub struct DocumentStore {
    engine: Arc<dyn StorageEngine>,
}

impl DocumentStore {
    const INDEXED_FIELDS: &'static [&'static str] =
        &["docsink_id", "split_status", "embed_status", "is_deleted"];

    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    async fn table(&self, kb_id: &Uuid) -> Result<String> {
        let table = table_name(kb_id, EntityKind::Documents);
        self.engine
            .create_table_if_not_exists(&table, Self::INDEXED_FIELDS)
            .await?;
        Ok(table)
    }

    fn decode(row: serde_json::Value) -> Result<Document> {
        serde_json::from_value(row).map_err(Error::from)
    }

    /// Insert a new Document with both stage statuses CREATED.
    pub async fn insert(&self, req: CreateDocument) -> Result<Document> {
        if req.doc_uri.trim().is_empty() {
            return Err(Error::Validation("document doc_uri must not be empty".into()));
        }

        let now = Utc::now();
        let document = Document {
            id: new_v7(),
            docsink_id: req.docsink_id,
            docsource_ids: req.docsource_ids,
            kb_id: req.kb_id,
            content: req.content,
            doc_uri: req.doc_uri,
            original_uri: req.original_uri,
            split_status: StageStatus::Created,
            embed_status: StageStatus::Created,
            summary: req.summary,
            keywords: req.keywords,
            authors: req.authors,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let table = self.table(&document.kb_id).await?;
        self.engine
            .insert(&table, &document.id, &serde_json::to_value(&document)?)
            .await?;
        debug!(document_id = %document.id, docsink_id = %document.docsink_id, "created document");
        Ok(document)
    }

    pub async fn get(&self, kb_id: &Uuid, id: &Uuid) -> Result<Document> {
        let table = self.table(kb_id).await?;
        self.engine
            .get(&table, id)
            .await?
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("document {id}")))
    }

    /// Live Documents derived from the given DocSink. The replacement
    /// invariant keeps this at zero or one element.
    pub async fn get_documents_for_docsink(
        &self,
        kb_id: &Uuid,
        docsink_id: &Uuid,
    ) -> Result<Vec<Document>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .eq("docsink_id", docsink_id.to_string())
                    .eq("is_deleted", false),
            )
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// All live Documents in the KB.
    pub async fn list(&self, kb_id: &Uuid) -> Result<Vec<Document>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(&table, &Filter::new().eq("is_deleted", false))
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Full-record update (read-modify-write).
    pub async fn update(&self, document: &Document) -> Result<()> {
        let table = self.table(&document.kb_id).await?;
        let found = self
            .engine
            .update(&table, &document.id, &serde_json::to_value(document)?)
            .await?;
        if !found {
            return Err(Error::NotFound(format!("document {}", document.id)));
        }
        Ok(())
    }

    /// Transition `split_status`, bumping `updated_at`.
    pub async fn update_split_status(
        &self,
        kb_id: &Uuid,
        id: &Uuid,
        status: StageStatus,
    ) -> Result<Document> {
        let mut document = self.get(kb_id, id).await?;
        document.split_status = status;
        document.updated_at = Utc::now();
        self.update(&document).await?;
        Ok(document)
    }

    /// Transition `embed_status`, bumping `updated_at`.
    pub async fn update_embed_status(
        &self,
        kb_id: &Uuid,
        id: &Uuid,
        status: StageStatus,
    ) -> Result<Document> {
        let mut document = self.get(kb_id, id).await?;
        document.embed_status = status;
        document.updated_at = Utc::now();
        self.update(&document).await?;
        Ok(document)
    }

    /// Flag the record deleted. Cascading to Segments and Tasks is owned by
    /// the [`crate::Database`] coordinator.
    pub async fn soft_delete(&self, kb_id: &Uuid, id: &Uuid) -> Result<()> {
        let mut document = self.get(kb_id, id).await?;
        document.is_deleted = true;
        document.updated_at = Utc::now();
        self.update(&document).await
    }
}
