//! Centralized default constants for the granary pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. When adding new constants, place them in the appropriate section
//! and document the rationale for the chosen value.

// =============================================================================
// SCHEDULER
// =============================================================================

/// Worker pool size per pipeline stage (convert/split/embed fan-out).
pub const STAGE_POOL_SIZE: usize = 10;

/// Polling interval for `wait_for_docsource` (milliseconds).
pub const WAIT_POLL_INTERVAL_MS: u64 = 500;

// =============================================================================
// JOBS
// =============================================================================

/// Maximum retries for a failed task before it is marked FAILED.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Per-job execution timeout in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 600;

/// Subdirectory under the data root holding per-job log files.
pub const JOB_LOG_DIR: &str = "job-logs";

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per segment for text splitting.
pub const CHUNK_SIZE: usize = 1000;

/// Minimum characters per segment (smaller chunks may be merged).
pub const CHUNK_MIN_SIZE: usize = 100;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding vector dimension for the deterministic embedder.
pub const EMBED_DIMENSION: usize = 384;

/// Maximum segments per embed batch.
pub const EMBED_BATCH_SIZE: usize = 32;

// =============================================================================
// STORAGE
// =============================================================================

/// Maximum connections for the SQLite engine pool.
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// Subdirectory under the data root holding content-addressed raw blobs.
pub const BLOB_DIR: &str = "blobs";
