//! # granary-db
//!
//! Storage layer for the granary pipeline.
//!
//! This crate provides:
//! - Storage engines behind the [`StorageEngine`](granary_core::StorageEngine)
//!   primitive: SQLite (reference backend) and in-memory
//! - Stores for the five pipeline entities plus the KB registry
//! - The [`Database`] façade owning cross-store cascade deletes
//! - Text chunking for the split stage
//!
//! ## Example
//!
//! ```rust,ignore
//! use granary_db::{Database, DatabaseConfig, EngineConfig};
//!
//! let db = Database::connect(DatabaseConfig {
//!     engine: EngineConfig::Sqlite { db_path: "./granary/granary.db".into() },
//!     log_root: "./granary/job-logs".into(),
//! }).await?;
//!
//! let source = db.create_docsource(req).await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

pub use granary_core::traits::StorageEngine;
pub use granary_core::{CreateDocSource, DocSource, Result, Task};

pub mod cascade;
pub mod chunking;
pub mod docsinks;
pub mod docsources;
pub mod documents;
pub mod jobs;
pub mod kbs;
pub mod memory;
pub mod segments;
pub mod sqlite;
pub mod tasks;

// Test fixtures, always compiled so integration tests (in tests/) can
// build databases without duplicating setup.
pub mod test_fixtures;

// Re-export core types
pub use granary_core::*;

// Re-export store implementations
pub use chunking::{Chunk, Chunker, ChunkerConfig, ParagraphChunker};
pub use docsinks::{DedupOutcome, DocSinkStore};
pub use docsources::DocSourceStore;
pub use documents::DocumentStore;
pub use jobs::JobStore;
pub use kbs::KbRegistry;
pub use memory::MemoryEngine;
pub use segments::SegmentStore;
pub use sqlite::SqliteEngine;
pub use tasks::TaskStore;

/// Which storage backend to construct.
///
/// A compile-time registry: adding a backend means adding a variant and a
/// constructor arm, never runtime class discovery.
#[derive(Debug, Clone)]
pub enum EngineConfig {
    /// SQLite database file (reference backend).
    Sqlite { db_path: PathBuf },
    /// Volatile in-memory store.
    Memory,
}

impl EngineConfig {
    /// Construct the engine this configuration names.
    pub async fn build(&self) -> Result<Arc<dyn StorageEngine>> {
        match self {
            EngineConfig::Sqlite { db_path } => {
                Ok(Arc::new(SqliteEngine::connect(db_path).await?))
            }
            EngineConfig::Memory => Ok(Arc::new(MemoryEngine::new())),
        }
    }
}

/// Database construction parameters.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub engine: EngineConfig,
    /// Directory receiving per-job log files.
    pub log_root: PathBuf,
}

/// Combined database context with all stores.
///
/// One engine instance is constructed at startup and injected into every
/// store by reference; cascade deletes live on this façade (see
/// [`cascade`]) so individual stores stay decoupled.
pub struct Database {
    pub engine: Arc<dyn StorageEngine>,
    pub kbs: KbRegistry,
    pub docsources: DocSourceStore,
    pub docsinks: DocSinkStore,
    pub documents: DocumentStore,
    pub segments: SegmentStore,
    pub tasks: TaskStore,
    pub jobs: JobStore,
}

impl Database {
    /// Build the configured engine and wire up all stores.
    pub async fn connect(config: DatabaseConfig) -> Result<Database> {
        let engine = config.engine.build().await?;
        Ok(Self::with_engine(engine, config.log_root))
    }

    /// Wire up all stores over an already-constructed engine.
    pub fn with_engine(engine: Arc<dyn StorageEngine>, log_root: PathBuf) -> Database {
        Database {
            kbs: KbRegistry::new(engine.clone()),
            docsources: DocSourceStore::new(engine.clone()),
            docsinks: DocSinkStore::new(engine.clone()),
            documents: DocumentStore::new(engine.clone()),
            segments: SegmentStore::new(engine.clone()),
            tasks: TaskStore::new(engine.clone()),
            jobs: JobStore::new(engine.clone(), log_root),
            engine,
        }
    }

    /// Create a DocSource, registering its KB for unscoped scans.
    pub async fn create_docsource(&self, req: CreateDocSource) -> Result<DocSource> {
        self.kbs.register(&req.kb_id).await?;
        self.docsources.create(req).await
    }

    /// Incomplete tasks (status ≠ COMPLETED), optionally narrowed to a KB
    /// and/or a set of DocSources; with no KB given, every registered KB
    /// is scanned.
    pub async fn get_incomplete_tasks(
        &self,
        kb_id: Option<&Uuid>,
        docsource_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Task>> {
        match kb_id {
            Some(kb) => self.tasks.incomplete(kb, docsource_ids).await,
            None => {
                let mut all = Vec::new();
                for kb in self.kbs.list().await? {
                    all.extend(self.tasks.incomplete(&kb, docsource_ids).await?);
                }
                Ok(all)
            }
        }
    }
}
