//! Core data models for the granary pipeline.
//!
//! The four pipeline entities (DocSource → DocSink → Document → Segment),
//! the Task/Job scheduling records, and the tagged program spec that binds
//! a task to one pipeline stage. All entities serialize to JSON documents;
//! status enums persist as their lowercase string value and list-valued
//! fields persist as JSON arrays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// TABLE NAMING
// =============================================================================

/// Entity kinds stored per knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    DocSources,
    DocSinks,
    Documents,
    Segments,
    Tasks,
    Jobs,
}

impl EntityKind {
    /// Table-name suffix for this entity kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            EntityKind::DocSources => "docsources",
            EntityKind::DocSinks => "docsinks",
            EntityKind::Documents => "documents",
            EntityKind::Segments => "segments",
            EntityKind::Tasks => "tasks",
            EntityKind::Jobs => "jobs",
        }
    }
}

/// Deterministic logical table name for a (KB, entity-kind) pair.
///
/// Tables are created lazily on first use; the hyphen-free UUID form keeps
/// the name valid for every backend.
pub fn table_name(kb_id: &Uuid, kind: EntityKind) -> String {
    format!("kb_{}_{}", kb_id.simple(), kind.suffix())
}

// =============================================================================
// DOCSOURCE
// =============================================================================

/// Kind of external origin a DocSource points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Local file or directory path.
    LocalFile,
    /// Remote URL.
    Url,
    /// Web search query whose results are ingested.
    WebSearch,
    /// Notion page or database.
    Notion,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::LocalFile => "local_file",
            SourceType::Url => "url",
            SourceType::WebSearch => "web_search",
            SourceType::Notion => "notion",
        }
    }
}

/// Lifecycle status of a DocSource.
///
/// Driven only by the scheduler/task runner after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocSourceStatus {
    Created,
    Processing,
    Completed,
    Failed,
    Aborted,
    Partial,
}

impl DocSourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocSourceStatus::Created => "created",
            DocSourceStatus::Processing => "processing",
            DocSourceStatus::Completed => "completed",
            DocSourceStatus::Failed => "failed",
            DocSourceStatus::Aborted => "aborted",
            DocSourceStatus::Partial => "partial",
        }
    }

    /// True in any terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            DocSourceStatus::Completed
                | DocSourceStatus::Failed
                | DocSourceStatus::Aborted
                | DocSourceStatus::Partial
        )
    }
}

/// A configured external origin to be ingested into a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSource {
    pub id: Uuid,
    pub kb_id: Uuid,
    pub source_type: SourceType,
    pub uri: String,
    /// Connector-specific ingest/schedule configuration.
    pub ingest_config: Option<JsonValue>,
    pub tags: Vec<String>,
    pub status: DocSourceStatus,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request for creating a new DocSource.
#[derive(Debug, Clone)]
pub struct CreateDocSource {
    pub kb_id: Uuid,
    pub source_type: SourceType,
    pub uri: String,
    pub ingest_config: Option<JsonValue>,
    pub tags: Vec<String>,
}

// =============================================================================
// DOCSINK
// =============================================================================

/// Lifecycle status of a DocSink.
///
/// CREATED until converted; PROCESSING once normalized content exists;
/// COMPLETED once its document is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocSinkStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl DocSinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocSinkStatus::Created => "created",
            DocSinkStatus::Processing => "processing",
            DocSinkStatus::Completed => "completed",
            DocSinkStatus::Failed => "failed",
        }
    }
}

/// The content-addressed raw artifact produced by ingesting a DocSource.
///
/// At most one non-deleted DocSink exists per content hash within a KB;
/// when a second DocSource ingests byte-identical content the sink is
/// merged, recording the extra origin in the `extra_*` back-references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSink {
    pub id: Uuid,
    /// Primary (first-ingesting) DocSource.
    pub docsource_id: Uuid,
    pub kb_id: Uuid,
    pub original_doc_uri: String,
    /// Where the raw bytes live (blob path).
    pub raw_doc_uri: String,
    /// Content hash with algorithm prefix, e.g. `blake3:{hex}`.
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub status: DocSinkStatus,
    /// Original URIs contributed by later byte-identical ingests.
    pub extra_original_doc_uri: Vec<String>,
    /// DocSource ids contributed by later byte-identical ingests.
    pub extra_docsource_id: Vec<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sink description produced by a Connector, before dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSinkCreate {
    pub docsource_id: Uuid,
    pub kb_id: Uuid,
    pub original_doc_uri: String,
    pub raw_doc_uri: String,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// Status of one derived pipeline stage on a Document.
///
/// `split_status` and `embed_status` advance independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Created,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Created => "created",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }
}

/// The normalized (converted) form of exactly one DocSink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub docsink_id: Uuid,
    /// All DocSources whose ingests share this document's sink.
    pub docsource_ids: Vec<Uuid>,
    pub kb_id: Uuid,
    pub content: String,
    pub doc_uri: String,
    pub original_uri: String,
    pub split_status: StageStatus,
    pub embed_status: StageStatus,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub authors: Vec<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request for creating a Document from a converted DocSink.
#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub docsink_id: Uuid,
    pub docsource_ids: Vec<Uuid>,
    pub kb_id: Uuid,
    pub content: String,
    pub doc_uri: String,
    pub original_uri: String,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub authors: Vec<String>,
}

// =============================================================================
// SEGMENT
// =============================================================================

/// A chunk of a Document's normalized content.
///
/// `position_in_doc` is a dot-separated hierarchical ordinal (see
/// [`crate::position::SegmentPosition`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub document_id: Uuid,
    pub docsink_id: Uuid,
    pub kb_id: Uuid,
    pub content: String,
    pub position_in_doc: String,
    pub heading: Option<String>,
    pub start_offset: i64,
    pub end_offset: i64,
    pub label: Option<String>,
    /// Embedding vector once computed; absent until the embed stage runs.
    pub embedding: Option<Vec<f32>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// TASK / JOB
// =============================================================================

/// Status shared by the Task aggregate and every Job attempt.
///
/// `CREATED → PENDING → RUNNING → {PAUSED} → COMPLETED | FAILED | ABORTED`.
/// PAUSED is re-enterable back to RUNNING. Soft-delete never changes status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Aborted
        )
    }

    /// Whether the state machine admits a transition to `to`.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Created, Pending) => true,
            (Pending, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Which pipeline stage a task/job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    Connector,
    Convert,
    Split,
    Embed,
}

impl ProgramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramType::Connector => "connector",
            ProgramType::Convert => "convert",
            ProgramType::Split => "split",
            ProgramType::Embed => "embed",
        }
    }

    /// All stages in pipeline order.
    pub const ALL: [ProgramType; 4] = [
        ProgramType::Connector,
        ProgramType::Convert,
        ProgramType::Split,
        ProgramType::Embed,
    ];
}

/// Tagged payload identifying which pipeline stage a Task/Job performs and
/// on what input. The typed payloads buy exhaustive dispatch in the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "program_type", content = "source", rename_all = "lowercase")]
pub enum ProgramSpec {
    Connector(DocSource),
    Convert(DocSink),
    Split(Document),
    Embed(Vec<Segment>),
}

impl ProgramSpec {
    pub fn program_type(&self) -> ProgramType {
        match self {
            ProgramSpec::Connector(_) => ProgramType::Connector,
            ProgramSpec::Convert(_) => ProgramType::Convert,
            ProgramSpec::Split(_) => ProgramType::Split,
            ProgramSpec::Embed(_) => ProgramType::Embed,
        }
    }

    /// KB the payload belongs to; `None` only for an empty embed batch.
    pub fn kb_id(&self) -> Option<Uuid> {
        match self {
            ProgramSpec::Connector(source) => Some(source.kb_id),
            ProgramSpec::Convert(sink) => Some(sink.kb_id),
            ProgramSpec::Split(document) => Some(document.kb_id),
            ProgramSpec::Embed(segments) => segments.first().map(|s| s.kb_id),
        }
    }
}

/// Durable description of one pipeline-stage unit of work.
///
/// Tasks carry no execution state beyond the aggregate status folded in
/// from their latest Job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kb_id: Uuid,
    pub docsource_id: Uuid,
    pub docsink_id: Option<Uuid>,
    pub document_id: Option<Uuid>,
    pub spec: ProgramSpec,
    pub status: JobStatus,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One timed execution attempt of a Task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task_id: Uuid,
    /// Copy of the owning task's program spec at creation time.
    pub spec: ProgramSpec,
    pub status: JobStatus,
    /// Fractional completion in `0.0..=1.0`.
    pub progress: f32,
    pub result: Option<JsonValue>,
    /// Log file allocated eagerly at creation so streaming can begin
    /// before the job runs.
    pub log_path: String,
    pub output_dir: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome code returned by pipeline stage collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCode {
    Success,
    Failure,
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_format() {
        let kb = Uuid::nil();
        assert_eq!(
            table_name(&kb, EntityKind::DocSinks),
            "kb_00000000000000000000000000000000_docsinks"
        );
        assert!(table_name(&kb, EntityKind::Tasks).ends_with("_tasks"));
        assert!(!table_name(&Uuid::new_v4(), EntityKind::Jobs).contains('-'));
    }

    #[test]
    fn test_entity_suffixes_are_unique() {
        let kinds = [
            EntityKind::DocSources,
            EntityKind::DocSinks,
            EntityKind::Documents,
            EntityKind::Segments,
            EntityKind::Tasks,
            EntityKind::Jobs,
        ];
        let mut suffixes: Vec<&str> = kinds.iter().map(|k| k.suffix()).collect();
        suffixes.sort();
        suffixes.dedup();
        assert_eq!(suffixes.len(), kinds.len());
    }

    #[test]
    fn test_docsource_status_is_finished() {
        assert!(!DocSourceStatus::Created.is_finished());
        assert!(!DocSourceStatus::Processing.is_finished());
        assert!(DocSourceStatus::Completed.is_finished());
        assert!(DocSourceStatus::Failed.is_finished());
        assert!(DocSourceStatus::Aborted.is_finished());
        assert!(DocSourceStatus::Partial.is_finished());
    }

    #[test]
    fn test_status_serializes_as_lowercase_string() {
        assert_eq!(
            serde_json::to_value(DocSourceStatus::Partial).unwrap(),
            serde_json::json!("partial")
        );
        assert_eq!(
            serde_json::to_value(JobStatus::Paused).unwrap(),
            serde_json::json!("paused")
        );
        assert_eq!(
            serde_json::to_value(SourceType::LocalFile).unwrap(),
            serde_json::json!("local_file")
        );
    }

    #[test]
    fn test_job_status_happy_path_transitions() {
        use JobStatus::*;
        assert!(Created.can_transition(Pending));
        assert!(Pending.can_transition(Running));
        assert!(Running.can_transition(Paused));
        assert!(Paused.can_transition(Running));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Failed));
    }

    #[test]
    fn test_job_status_abort_from_any_non_terminal() {
        use JobStatus::*;
        for from in [Created, Pending, Running, Paused] {
            assert!(from.can_transition(Aborted), "{:?} -> aborted", from);
        }
        for from in [Completed, Failed, Aborted] {
            assert!(!from.can_transition(Aborted), "{:?} -> aborted", from);
        }
    }

    #[test]
    fn test_job_status_illegal_transitions() {
        use JobStatus::*;
        assert!(!Pending.can_transition(Paused));
        assert!(!Created.can_transition(Running));
        assert!(!Completed.can_transition(Running));
        assert!(!Failed.can_transition(Pending));
        assert!(!Paused.can_transition(Completed));
    }

    #[test]
    fn test_program_spec_tagged_serialization() {
        let source = DocSource {
            id: Uuid::new_v4(),
            kb_id: Uuid::new_v4(),
            source_type: SourceType::LocalFile,
            uri: "/tmp/notes.txt".to_string(),
            ingest_config: None,
            tags: vec![],
            status: DocSourceStatus::Created,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let spec = ProgramSpec::Connector(source.clone());
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["program_type"], "connector");
        assert_eq!(value["source"]["uri"], "/tmp/notes.txt");

        let back: ProgramSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back.program_type(), ProgramType::Connector);
        match back {
            ProgramSpec::Connector(s) => assert_eq!(s.id, source.id),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_program_type_order() {
        assert_eq!(
            ProgramType::ALL,
            [
                ProgramType::Connector,
                ProgramType::Convert,
                ProgramType::Split,
                ProgramType::Embed
            ]
        );
        assert_eq!(ProgramType::Embed.as_str(), "embed");
    }

    #[test]
    fn test_result_code() {
        assert!(ResultCode::Success.is_success());
        assert!(!ResultCode::Failure.is_success());
    }
}
