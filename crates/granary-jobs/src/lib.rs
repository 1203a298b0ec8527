//! # granary-jobs
//!
//! Background execution for the granary pipeline.
//!
//! This crate provides:
//! - The [`TaskRunner`]: dispatches a Job to the correct pipeline stage by
//!   its typed program spec, folds every failure into a FAILED job, and
//!   short-circuits work a prior attempt already finished
//! - The [`Scheduler`]: scans incomplete tasks, creates Jobs, and drives
//!   them through per-stage bounded worker pools, with retry bookkeeping
//!   and a blocking `wait_for_docsource` primitive
//! - Concrete stage adapters (filesystem connector, plain-text converter,
//!   hierarchical splitter, deterministic embedder) for local deployments
//!   and tests
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use granary_db::{Database, DatabaseConfig, EngineConfig};
//! use granary_jobs::{PipelineConfig, Scheduler, SchedulerConfig, SchedulerScope, StageSet, TaskRunner};
//!
//! let db = Arc::new(Database::connect(config).await?);
//! let stages = StageSet::local(db.clone(), PipelineConfig::new("./granary"));
//! let runner = Arc::new(TaskRunner::new(db.clone(), stages));
//! let scheduler = Scheduler::new(db, runner, SchedulerConfig::default());
//!
//! let started = scheduler.run(&SchedulerScope::kb(kb_id)).await?;
//! if !started {
//!     // another run owns the loop; block on its progress instead
//!     scheduler.wait_for_docsource(&kb_id, &source_id, None).await?;
//! }
//! ```

pub mod adapters;
pub mod runner;
pub mod scheduler;

// Re-export core types
pub use granary_core::*;

pub use adapters::{FsConnector, HashEmbedder, HierarchicalSplitter, PipelineConfig, TextConverter};
pub use runner::{StageSet, TaskRunner};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerScope};

/// Default maximum retries for failed tasks.
pub const DEFAULT_MAX_RETRIES: i32 = granary_core::defaults::JOB_MAX_RETRIES;

/// Default per-stage worker pool size.
pub const DEFAULT_STAGE_POOL_SIZE: usize = granary_core::defaults::STAGE_POOL_SIZE;
