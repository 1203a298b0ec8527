//! Shared entity builders for the granary-db integration suites.

use uuid::Uuid;

use granary_db::{
    CreateDocSource, CreateDocument, DocSink, DocSinkCreate, DocSource, Database, Document,
    Segment, SourceType,
};

pub fn docsource_req(kb_id: Uuid, uri: &str) -> CreateDocSource {
    CreateDocSource {
        kb_id,
        source_type: SourceType::LocalFile,
        uri: uri.to_string(),
        ingest_config: None,
        tags: vec![],
    }
}

pub fn sink_req(source: &DocSource, original_uri: &str, hash: Option<&str>) -> DocSinkCreate {
    DocSinkCreate {
        docsource_id: source.id,
        kb_id: source.kb_id,
        original_doc_uri: original_uri.to_string(),
        raw_doc_uri: format!("blobs/{}.bin", original_uri.trim_start_matches('/')),
        content_hash: hash.map(String::from),
        size_bytes: 128,
    }
}

pub fn document_req(sink: &DocSink, content: &str) -> CreateDocument {
    CreateDocument {
        docsink_id: sink.id,
        docsource_ids: sink.extra_docsource_id.clone(),
        kb_id: sink.kb_id,
        content: content.to_string(),
        doc_uri: format!("doc://{}", sink.id),
        original_uri: sink.original_doc_uri.clone(),
        summary: None,
        keywords: vec![],
        authors: vec![],
    }
}

pub fn segment(document: &Document, position: &str, content: &str) -> Segment {
    Segment {
        id: granary_db::new_v7(),
        document_id: document.id,
        docsink_id: document.docsink_id,
        kb_id: document.kb_id,
        content: content.to_string(),
        position_in_doc: position.to_string(),
        heading: None,
        start_offset: 0,
        end_offset: content.len() as i64,
        label: None,
        embedding: None,
        is_deleted: false,
        created_at: chrono::Utc::now(),
    }
}

/// Convert + persist a ready-made document for a sink.
pub async fn create_document(db: &Database, sink: &DocSink, content: &str) -> Document {
    db.create_document(document_req(sink, content)).await.unwrap()
}
