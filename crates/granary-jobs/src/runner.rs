//! Task runner: executes one Job against the correct pipeline stage.
//!
//! Dispatch is an exhaustive match on the typed program spec. Every branch
//! reloads its target entity and short-circuits as already-done when a
//! prior attempt finished it, which is what makes at-least-once job
//! execution safe. Errors never escape [`TaskRunner::run_job`]: they are
//! appended to the job's log file and folded into a FAILED job so a single
//! bad job cannot crash the scheduler loop.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use granary_core::traits::{Connector, Converter, Embedder, Splitter};
use granary_core::{
    defaults, DocSink, DocSinkStatus, DocSource, Document, Error, Job, JobStatus, ProgramSpec,
    Result, Segment, StageStatus,
};
use granary_db::Database;

use crate::adapters::{
    FsConnector, HashEmbedder, HierarchicalSplitter, PipelineConfig, TextConverter,
};

/// The four stage collaborators a runner dispatches to.
#[derive(Clone)]
pub struct StageSet {
    pub connector: Arc<dyn Connector>,
    pub converter: Arc<dyn Converter>,
    pub splitter: Arc<dyn Splitter>,
    pub embedder: Arc<dyn Embedder>,
}

impl StageSet {
    pub fn new(
        connector: Arc<dyn Connector>,
        converter: Arc<dyn Converter>,
        splitter: Arc<dyn Splitter>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            connector,
            converter,
            splitter,
            embedder,
        }
    }

    /// The in-tree local adapter set (filesystem → text → hierarchical
    /// split → deterministic embed).
    pub fn local(db: Arc<Database>, config: PipelineConfig) -> Self {
        Self {
            connector: Arc::new(FsConnector::new(config.data_dir.clone())),
            converter: Arc::new(TextConverter::new(db.clone())),
            splitter: Arc::new(HierarchicalSplitter::new(db.clone(), config.chunker.clone())),
            embedder: Arc::new(HashEmbedder::new(db, config.embed_dimension)),
        }
    }
}

/// Executes Jobs and records their outcome.
pub struct TaskRunner {
    db: Arc<Database>,
    stages: StageSet,
}

impl TaskRunner {
    pub fn new(db: Arc<Database>, stages: StageSet) -> Self {
        Self { db, stages }
    }

    /// Run one Job to a terminal status and return it.
    ///
    /// Never returns an error: failures become a FAILED job with the cause
    /// in its log file, and the owning task's aggregate status is updated
    /// either way.
    pub async fn run_job(&self, mut job: Job) -> Job {
        let start = Instant::now();
        let program = job.spec.program_type();

        let Some(kb_id) = job.spec.kb_id() else {
            job.status = JobStatus::Failed;
            job.last_failed_at = Some(Utc::now());
            warn!(job_id = %job.id, "program spec carries no entities");
            return job;
        };

        info!(job_id = %job.id, task_id = %job.task_id, program = program.as_str(), "running job");
        job.status = JobStatus::Running;
        job.updated_at = Utc::now();
        if let Err(err) = self.db.jobs.update_job(&kb_id, &job).await {
            // Store unreachable: fatal for this job, surfaced to the caller
            // through its status.
            error!(job_id = %job.id, error = %err, "failed to mark job running");
            job.status = JobStatus::Failed;
            job.last_failed_at = Some(Utc::now());
            return job;
        }
        let _ = self
            .db
            .jobs
            .append_log(&job, &format!("job started: {}", program.as_str()))
            .await;

        let job_timeout = std::time::Duration::from_secs(defaults::JOB_TIMEOUT_SECS);
        let outcome = match tokio::time::timeout(job_timeout, self.dispatch(&kb_id, &mut job)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Job(format!(
                "job exceeded timeout of {}s",
                defaults::JOB_TIMEOUT_SECS
            ))),
        };

        match outcome {
            Ok(result) => {
                job.status = JobStatus::Completed;
                job.progress = 1.0;
                job.result = Some(result);
                let _ = self.db.jobs.append_log(&job, "job completed").await;
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.last_failed_at = Some(Utc::now());
                job.result = Some(json!({ "error": err.to_string() }));
                let _ = self
                    .db
                    .jobs
                    .append_log(&job, &format!("job failed: {err}"))
                    .await;
                self.mark_entity_failed(&kb_id, &job.spec).await;
                warn!(job_id = %job.id, program = program.as_str(), error = %err, "job failed");
            }
        }

        job.updated_at = Utc::now();
        if let Err(err) = self.db.jobs.update_job(&kb_id, &job).await {
            error!(job_id = %job.id, error = %err, "failed to persist job outcome");
        }
        // The task may have been cascaded away mid-run; folding status into
        // a flagged record is harmless.
        if let Err(err) = self.db.tasks.set_status(&kb_id, &job.task_id, job.status).await {
            debug!(task_id = %job.task_id, error = %err, "could not fold job status into task");
        }

        info!(
            job_id = %job.id,
            program = program.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            status = job.status.as_str(),
            "job finished"
        );
        job
    }

    async fn dispatch(&self, kb_id: &Uuid, job: &mut Job) -> Result<JsonValue> {
        match job.spec.clone() {
            ProgramSpec::Connector(source) => self.run_connector(kb_id, job, source).await,
            ProgramSpec::Convert(sink) => self.run_convert(kb_id, job, sink).await,
            ProgramSpec::Split(document) => self.run_split(kb_id, job, document).await,
            ProgramSpec::Embed(segments) => self.run_embed(kb_id, job, segments).await,
        }
    }

    async fn run_connector(
        &self,
        kb_id: &Uuid,
        job: &mut Job,
        source: DocSource,
    ) -> Result<JsonValue> {
        let source = self.db.docsources.get(kb_id, &source.id).await?;
        if source.is_deleted || source.status.is_finished() {
            return self.skip(job, "docsource already finished").await;
        }

        let code = self.stages.connector.ingest(&source).await?;
        if !code.is_success() {
            return Err(Error::Stage(format!(
                "connector failed for docsource {}",
                source.id
            )));
        }

        let produced = self.stages.connector.ingested_docsink_list().await;
        let total = produced.len();
        let mut new_sinks = 0usize;
        for (done, req) in produced.into_iter().enumerate() {
            let (sink, outcome) = self.db.docsinks.create(req).await?;
            if outcome.is_new() {
                self.db
                    .tasks
                    .create(source.id, ProgramSpec::Convert(sink))
                    .await?;
                new_sinks += 1;
            }
            job.progress = (done + 1) as f32 / total.max(1) as f32;
            job.updated_at = Utc::now();
            self.db.jobs.update_job(kb_id, job).await?;
        }

        debug!(docsource_id = %source.id, sink_count = total, new_sinks, "connector finished");
        Ok(json!({ "sinks": total, "new": new_sinks }))
    }

    async fn run_convert(&self, kb_id: &Uuid, job: &mut Job, sink: DocSink) -> Result<JsonValue> {
        let sink = self.db.docsinks.get(kb_id, &sink.id).await?;
        if sink.is_deleted {
            return self.skip(job, "docsink deleted").await;
        }
        // PROCESSING means a prior attempt already produced the document.
        if matches!(sink.status, DocSinkStatus::Processing | DocSinkStatus::Completed) {
            return self.skip(job, "docsink already converted").await;
        }

        let code = self.stages.converter.convert(&sink).await?;
        if !code.is_success() {
            self.db
                .docsinks
                .update_status(kb_id, &sink.id, DocSinkStatus::Failed)
                .await?;
            return Err(Error::Stage(format!("convert failed for docsink {}", sink.id)));
        }

        // Content is now available downstream.
        self.db
            .docsinks
            .update_status(kb_id, &sink.id, DocSinkStatus::Processing)
            .await?;

        let documents = self
            .db
            .documents
            .get_documents_for_docsink(kb_id, &sink.id)
            .await?;
        for document in &documents {
            self.db
                .tasks
                .create(sink.docsource_id, ProgramSpec::Split(document.clone()))
                .await?;
        }
        Ok(json!({ "documents": documents.len() }))
    }

    async fn run_split(
        &self,
        kb_id: &Uuid,
        job: &mut Job,
        document: Document,
    ) -> Result<JsonValue> {
        let document = self.db.documents.get(kb_id, &document.id).await?;
        if document.is_deleted {
            return self.skip(job, "document replaced").await;
        }
        // Replaying a finished split must not duplicate segments.
        if document.split_status == StageStatus::Completed {
            return self.skip(job, "document already split").await;
        }

        let code = self.stages.splitter.split(&document).await?;
        if !code.is_success() {
            self.db
                .documents
                .update_split_status(kb_id, &document.id, StageStatus::Failed)
                .await?;
            return Err(Error::Stage(format!("split failed for document {}", document.id)));
        }

        self.db
            .documents
            .update_split_status(kb_id, &document.id, StageStatus::Completed)
            .await?;

        let segments = self.db.segments.list_for_document(kb_id, &document.id).await?;
        if segments.is_empty() {
            // Nothing to embed: the embed stage is vacuously complete.
            self.db
                .documents
                .update_embed_status(kb_id, &document.id, StageStatus::Completed)
                .await?;
            self.db
                .docsinks
                .update_status(kb_id, &document.docsink_id, DocSinkStatus::Completed)
                .await?;
            return Ok(json!({ "segments": 0 }));
        }

        let docsource_id = self.docsource_for(kb_id, &document).await?;
        for batch in segments.chunks(defaults::EMBED_BATCH_SIZE) {
            self.db
                .tasks
                .create(docsource_id, ProgramSpec::Embed(batch.to_vec()))
                .await?;
        }
        Ok(json!({ "segments": segments.len() }))
    }

    async fn run_embed(
        &self,
        kb_id: &Uuid,
        job: &mut Job,
        segments: Vec<Segment>,
    ) -> Result<JsonValue> {
        let Some(first) = segments.first() else {
            return self.skip(job, "empty segment batch").await;
        };

        let document = self.db.documents.get(kb_id, &first.document_id).await?;
        if document.is_deleted {
            return self.skip(job, "document replaced").await;
        }
        if document.embed_status == StageStatus::Completed {
            return self.skip(job, "document already embedded").await;
        }

        let code = self.stages.embedder.embed_segment_list(&segments).await?;
        if !code.is_success() {
            self.db
                .documents
                .update_embed_status(kb_id, &document.id, StageStatus::Failed)
                .await?;
            return Err(Error::Stage(format!("embed failed for document {}", document.id)));
        }

        // The document is embedded once every live segment carries a
        // vector; with batched embed tasks the last one crosses the line.
        let live = self.db.segments.list_for_document(kb_id, &document.id).await?;
        let pending = live.iter().filter(|s| s.embedding.is_none()).count();
        if pending == 0 {
            self.db
                .documents
                .update_embed_status(kb_id, &document.id, StageStatus::Completed)
                .await?;
            self.db
                .docsinks
                .update_status(kb_id, &document.docsink_id, DocSinkStatus::Completed)
                .await?;
        }
        Ok(json!({ "embedded": segments.len(), "pending": pending }))
    }

    /// Resolve the DocSource a follow-on task should be scoped to.
    async fn docsource_for(&self, kb_id: &Uuid, document: &Document) -> Result<Uuid> {
        if let Some(id) = document.docsource_ids.first() {
            return Ok(*id);
        }
        let sink = self.db.docsinks.get(kb_id, &document.docsink_id).await?;
        Ok(sink.docsource_id)
    }

    /// Record an idempotent short-circuit: the work was already done by a
    /// prior attempt, so this job completes without side effects.
    async fn skip(&self, job: &Job, reason: &str) -> Result<JsonValue> {
        let _ = self
            .db
            .jobs
            .append_log(job, &format!("skipped: {reason}"))
            .await;
        debug!(job_id = %job.id, reason, "job short-circuited as already done");
        Ok(json!({ "skipped": true, "reason": reason }))
    }

    /// Best-effort status flagging for a thrown (not returned) stage error.
    async fn mark_entity_failed(&self, kb_id: &Uuid, spec: &ProgramSpec) {
        let result = match spec {
            // DocSource terminal status is folded by the scheduler.
            ProgramSpec::Connector(_) => Ok(()),
            ProgramSpec::Convert(sink) => self
                .db
                .docsinks
                .update_status(kb_id, &sink.id, DocSinkStatus::Failed)
                .await
                .map(|_| ()),
            ProgramSpec::Split(document) => self
                .db
                .documents
                .update_split_status(kb_id, &document.id, StageStatus::Failed)
                .await
                .map(|_| ()),
            ProgramSpec::Embed(segments) => match segments.first() {
                Some(first) => self
                    .db
                    .documents
                    .update_embed_status(kb_id, &first.document_id, StageStatus::Failed)
                    .await
                    .map(|_| ()),
                None => Ok(()),
            },
        };
        if let Err(err) = result {
            debug!(error = %err, "could not flag entity failed");
        }
    }
}
