//! Filesystem connector.
//!
//! Ingests a local file or directory: hashes each file's bytes with BLAKE3,
//! copies them into a content-addressed blob store under the data
//! directory, and records one sink description per file. Binary files
//! (detected from magic bytes) are skipped; this connector feeds the text
//! conversion stage only.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use granary_core::traits::Connector;
use granary_core::{defaults, new_v7, DocSinkCreate, DocSource, Result, ResultCode};

/// Compute the BLAKE3 hash of data with a `blake3:` prefix.
pub fn compute_content_hash(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data).to_hex())
}

/// Blob-store path for a raw artifact, fanned out by the id's first hex
/// digits: `blobs/{aa}/{bb}/{uuid}.bin`.
pub fn generate_blob_path(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    format!("{}/{}/{}/{}.bin", defaults::BLOB_DIR, &hex[0..2], &hex[2..4], hex)
}

/// [`Connector`] over the local filesystem.
pub struct FsConnector {
    data_dir: PathBuf,
    ingested: Mutex<Vec<DocSinkCreate>>,
}

impl FsConnector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ingested: Mutex::new(Vec::new()),
        }
    }

    /// Regular files under `path`, recursively, in deterministic order.
    fn collect_files(path: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut stack = vec![path.to_path_buf()];
        while let Some(current) = stack.pop() {
            if current.is_dir() {
                for entry in std::fs::read_dir(&current)? {
                    let entry = entry?;
                    let name = entry.file_name();
                    if name.to_string_lossy().starts_with('.') {
                        continue;
                    }
                    stack.push(entry.path());
                }
            } else if current.is_file() {
                files.push(current);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Non-text artifacts are out of this connector's reach; a PDF or
    /// image needs a parser backend, not a byte copy.
    fn is_ingestable(data: &[u8]) -> bool {
        match infer::get(data) {
            Some(kind) => kind.mime_type().starts_with("text/"),
            // No magic-byte match: treat as plain text.
            None => true,
        }
    }

    async fn ingest_file(&self, source: &DocSource, path: &Path) -> Result<Option<DocSinkCreate>> {
        let data = tokio::fs::read(path).await?;
        if !Self::is_ingestable(&data) {
            warn!(file = %path.display(), "skipping non-text file");
            return Ok(None);
        }

        let content_hash = compute_content_hash(&data);
        let blob_rel = generate_blob_path(&new_v7());
        let blob_path = self.data_dir.join(&blob_rel);
        if let Some(parent) = blob_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&blob_path, &data).await?;

        debug!(
            file = %path.display(),
            blob = %blob_rel,
            size = data.len(),
            "ingested file"
        );
        Ok(Some(DocSinkCreate {
            docsource_id: source.id,
            kb_id: source.kb_id,
            original_doc_uri: path.to_string_lossy().into_owned(),
            raw_doc_uri: blob_path.to_string_lossy().into_owned(),
            content_hash: Some(content_hash),
            size_bytes: data.len() as i64,
        }))
    }
}

#[async_trait]
impl Connector for FsConnector {
    async fn ingest(&self, source: &DocSource) -> Result<ResultCode> {
        let root = Path::new(&source.uri);
        if !root.exists() {
            warn!(uri = %source.uri, "docsource path does not exist");
            return Ok(ResultCode::Failure);
        }

        let mut sinks = Vec::new();
        for file in Self::collect_files(root)? {
            if let Some(sink) = self.ingest_file(source, &file).await? {
                sinks.push(sink);
            }
        }

        let mut ingested = self.ingested.lock().await;
        *ingested = sinks;
        Ok(ResultCode::Success)
    }

    async fn ingested_docsink_list(&self) -> Vec<DocSinkCreate> {
        self.ingested.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_prefixed_and_stable() {
        let hash = compute_content_hash(b"granary");
        assert!(hash.starts_with("blake3:"));
        assert_eq!(hash.len(), "blake3:".len() + 64);
        assert_eq!(hash, compute_content_hash(b"granary"));
        assert_ne!(hash, compute_content_hash(b"Granary"));
    }

    #[test]
    fn test_blob_path_fans_out_by_hex_prefix() {
        let id = Uuid::nil();
        assert_eq!(
            generate_blob_path(&id),
            "blobs/00/00/00000000000000000000000000000000.bin"
        );
    }

    #[test]
    fn test_plain_text_is_ingestable() {
        assert!(FsConnector::is_ingestable(b"just some notes\n"));
        assert!(FsConnector::is_ingestable(b""));
    }

    #[test]
    fn test_png_magic_bytes_are_rejected() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert!(!FsConnector::is_ingestable(&png_header));
    }
}
