//! Structured logging schema and field name constants for granary.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (segments, rows) |

use tracing_subscriber::EnvFilter;

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "jobs", "scheduler", "engine"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "create_docsink", "run_job", "wait_for_docsource"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Knowledge base UUID being operated on.
pub const KB_ID: &str = "kb_id";

/// DocSource UUID being operated on.
pub const DOCSOURCE_ID: &str = "docsource_id";

/// DocSink UUID being operated on.
pub const DOCSINK_ID: &str = "docsink_id";

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Task UUID being scheduled or run.
pub const TASK_ID: &str = "task_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Program type of a task/job ("connector", "convert", "split", "embed").
pub const PROGRAM: &str = "program";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of segments processed (splitting, embedding).
pub const SEGMENT_COUNT: &str = "segment_count";

/// Number of sinks produced by a connector run.
pub const SINK_COUNT: &str = "sink_count";

/// Number of tasks scanned in a scheduler round.
pub const TASK_COUNT: &str = "task_count";

/// Initialize the global tracing subscriber from `RUST_LOG`.
///
/// Falls back to the given default directive when `RUST_LOG` is unset.
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_snake_case() {
        for field in [
            SUBSYSTEM,
            OPERATION,
            KB_ID,
            DOCSOURCE_ID,
            DOCSINK_ID,
            DOCUMENT_ID,
            TASK_ID,
            JOB_ID,
            PROGRAM,
            DURATION_MS,
            SEGMENT_COUNT,
            SINK_COUNT,
            TASK_COUNT,
        ] {
            assert!(!field.is_empty());
            assert_eq!(field, field.to_lowercase());
            assert!(!field.contains(' '));
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        init("info");
        init("debug");
    }
}
