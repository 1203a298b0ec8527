//! Cross-store cascade deletes, owned by the [`Database`] coordinator.
//!
//! Stores only flag their own rows; the façade walks the entity graph
//! (DocSource → DocSink → Document → Segment, plus referencing Tasks) so
//! the store implementations stay independent and swappable.

use tracing::info;
use uuid::Uuid;

use granary_core::{CreateDocument, Document, Result};

use crate::Database;

impl Database {
    /// Create a Document for a converted DocSink, replacing any prior
    /// version.
    ///
    /// Every existing live Document for the sink is soft-deleted first
    /// (cascading to its Segments, their vectors, and referencing Tasks),
    /// so the store never holds two live Documents for one DocSink. This
    /// is intentionally not a no-op diff: any re-ingestion invalidates
    /// prior derived artifacts wholesale.
    pub async fn create_document(&self, req: CreateDocument) -> Result<Document> {
        let existing = self
            .documents
            .get_documents_for_docsink(&req.kb_id, &req.docsink_id)
            .await?;
        for prior in existing {
            info!(
                document_id = %prior.id,
                docsink_id = %req.docsink_id,
                "replacing live document on re-ingestion"
            );
            self.delete_document(&prior.kb_id, &prior.id).await?;
        }
        self.documents.insert(req).await
    }

    /// Soft-delete a Document, its Segments (and their vectors), and every
    /// Task referencing the document or its DocSink.
    pub async fn delete_document(&self, kb_id: &Uuid, document_id: &Uuid) -> Result<()> {
        let document = self.documents.get(kb_id, document_id).await?;
        self.documents.soft_delete(kb_id, document_id).await?;
        self.segments
            .soft_delete_for_document(kb_id, document_id)
            .await?;
        self.tasks.soft_delete_referencing(kb_id, document_id).await?;
        self.tasks
            .soft_delete_referencing(kb_id, &document.docsink_id)
            .await?;
        Ok(())
    }

    /// Soft-delete a DocSink, its Documents (with their cascade), and every
    /// Task referencing the sink.
    pub async fn delete_docsink(&self, kb_id: &Uuid, docsink_id: &Uuid) -> Result<()> {
        self.docsinks.soft_delete(kb_id, docsink_id).await?;
        let documents = self
            .documents
            .get_documents_for_docsink(kb_id, docsink_id)
            .await?;
        for document in documents {
            self.delete_document(kb_id, &document.id).await?;
        }
        self.tasks.soft_delete_referencing(kb_id, docsink_id).await?;
        Ok(())
    }

    /// Soft-delete a DocSource, the DocSinks it primarily owns (with their
    /// cascade), and every Task referencing the source.
    pub async fn delete_docsource(&self, kb_id: &Uuid, docsource_id: &Uuid) -> Result<()> {
        self.docsources.soft_delete(kb_id, docsource_id).await?;
        let sinks = self.docsinks.list_for_source(kb_id, docsource_id).await?;
        for sink in sinks {
            self.delete_docsink(kb_id, &sink.id).await?;
        }
        self.tasks
            .soft_delete_referencing(kb_id, docsource_id)
            .await?;
        info!(docsource_id = %docsource_id, "deleted docsource and cascade");
        Ok(())
    }
}
