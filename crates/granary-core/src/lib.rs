//! # granary-core
//!
//! Core types, traits, and abstractions for the granary pipeline.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the storage and scheduling crates depend on: the
//! four-entity document model, the Task/Job records and their state
//! machine, the tagged program spec, the storage-engine primitive, and the
//! pipeline stage collaborator contracts.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod position;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use position::SegmentPosition;
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
