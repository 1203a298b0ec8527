//! Plain-text converter.
//!
//! Reads a DocSink's raw bytes, normalizes them to UTF-8 text (lossy for
//! invalid sequences, line endings unified to `\n`), and writes the
//! Document through the replacing `create_document` path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use granary_core::traits::Converter;
use granary_core::{CreateDocument, DocSink, Result, ResultCode};
use granary_db::Database;

/// [`Converter`] for sinks whose raw bytes are already text.
pub struct TextConverter {
    db: Arc<Database>,
}

impl TextConverter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Converter for TextConverter {
    async fn convert(&self, sink: &DocSink) -> Result<ResultCode> {
        let data = tokio::fs::read(&sink.raw_doc_uri).await?;
        let content = String::from_utf8_lossy(&data).replace("\r\n", "\n");
        let char_count = content.chars().count();
        let line_count = content.lines().count();

        let document = self
            .db
            .create_document(CreateDocument {
                docsink_id: sink.id,
                docsource_ids: sink.extra_docsource_id.clone(),
                kb_id: sink.kb_id,
                content,
                doc_uri: format!("granary://{}/documents/{}", sink.kb_id.simple(), sink.id),
                original_uri: sink.original_doc_uri.clone(),
                summary: None,
                keywords: vec![],
                authors: vec![],
            })
            .await?;

        debug!(
            document_id = %document.id,
            docsink_id = %sink.id,
            char_count,
            line_count,
            "converted docsink to text document"
        );
        Ok(ResultCode::Success)
    }
}
