//! Shared fixtures for integration tests.
//!
//! Always compiled so suites under `tests/` can build databases without
//! duplicating setup. Not part of the public API contract.

use std::path::Path;
use std::sync::Arc;

use crate::{Database, DatabaseConfig, EngineConfig, MemoryEngine};
use granary_core::{defaults, Result};

/// A SQLite-backed database rooted in `dir` (db file + job logs inside).
pub async fn sqlite_database(dir: &Path) -> Result<Database> {
    Database::connect(DatabaseConfig {
        engine: EngineConfig::Sqlite {
            db_path: dir.join("granary.db"),
        },
        log_root: dir.join(defaults::JOB_LOG_DIR),
    })
    .await
}

/// A memory-backed database writing job logs into `dir`.
pub fn memory_database(dir: &Path) -> Database {
    Database::with_engine(
        Arc::new(MemoryEngine::new()),
        dir.join(defaults::JOB_LOG_DIR),
    )
}
