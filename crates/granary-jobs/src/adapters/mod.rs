//! Concrete pipeline stage adapters.
//!
//! One adapter per collaborator contract, enough to run the pipeline
//! end-to-end against the local filesystem without external services.
//! Model-backed converters and embedders plug in by implementing the same
//! traits.

use std::path::PathBuf;

use granary_core::defaults;
use granary_db::ChunkerConfig;

pub mod embed;
pub mod fs_connector;
pub mod split;
pub mod text_convert;

pub use embed::HashEmbedder;
pub use fs_connector::FsConnector;
pub use split::HierarchicalSplitter;
pub use text_convert::TextConverter;

/// Shared configuration for the local adapter set.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory receiving content-addressed raw blobs.
    pub data_dir: PathBuf,
    /// Chunk sizing for the split stage.
    pub chunker: ChunkerConfig,
    /// Embedding dimension for the deterministic embedder.
    pub embed_dimension: usize,
}

impl PipelineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            chunker: ChunkerConfig::default(),
            embed_dimension: defaults::EMBED_DIMENSION,
        }
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_embed_dimension(mut self, dimension: usize) -> Self {
        self.embed_dimension = dimension;
        self
    }
}
