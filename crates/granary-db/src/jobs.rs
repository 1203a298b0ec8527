//! Job store.
//!
//! A Job is one execution attempt of a Task. Log files are allocated
//! eagerly at creation, under `<log_root>/<task_id>/<job_id>.log`, so log
//! streaming can begin before the job runs.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{
    defaults, new_v7, table_name, EntityKind, Error, Job, JobStatus, Result, Task,
};

/// Persistence for job attempts, plus their log files.
pub struct JobStore {
    engine: Arc<dyn StorageEngine>,
    log_root: PathBuf,
}

impl JobStore {
    const INDEXED_FIELDS: &'static [&'static str] = &["task_id", "status", "is_deleted"];

    pub fn new(engine: Arc<dyn StorageEngine>, log_root: PathBuf) -> Self {
        Self { engine, log_root }
    }

    async fn table(&self, kb_id: &Uuid) -> Result<String> {
        let table = table_name(kb_id, EntityKind::Jobs);
        self.engine
            .create_table_if_not_exists(&table, Self::INDEXED_FIELDS)
            .await?;
        Ok(table)
    }

    fn decode(row: serde_json::Value) -> Result<Job> {
        serde_json::from_value(row).map_err(Error::from)
    }

    /// Create a Job for one attempt of `task`, status PENDING.
    ///
    /// The log file is created (empty) immediately.
    pub async fn create_job(&self, task: &Task, retry_count: i32) -> Result<Job> {
        let id = new_v7();
        let log_dir = self.log_root.join(task.id.to_string());
        fs::create_dir_all(&log_dir).await?;
        let log_path = log_dir.join(format!("{id}.log"));
        fs::File::create(&log_path).await?;

        let now = Utc::now();
        let job = Job {
            id,
            task_id: task.id,
            spec: task.spec.clone(),
            status: JobStatus::Pending,
            progress: 0.0,
            result: None,
            log_path: log_path.to_string_lossy().into_owned(),
            output_dir: None,
            retry_count,
            max_retries: defaults::JOB_MAX_RETRIES,
            paused_at: None,
            last_failed_at: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let table = self.table(&task.kb_id).await?;
        self.engine
            .insert(&table, &job.id, &serde_json::to_value(&job)?)
            .await?;
        debug!(job_id = %job.id, task_id = %task.id, retry_count, "created job");
        Ok(job)
    }

    pub async fn get(&self, kb_id: &Uuid, id: &Uuid) -> Result<Job> {
        let table = self.table(kb_id).await?;
        self.engine
            .get(&table, id)
            .await?
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    /// All jobs for a task, newest first.
    pub async fn list_for_task(&self, kb_id: &Uuid, task_id: &Uuid) -> Result<Vec<Job>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .eq("task_id", task_id.to_string())
                    .eq("is_deleted", false),
            )
            .await?;
        let mut jobs = rows
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<Job>>>()?;
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(jobs)
    }

    /// The job with greatest `created_at` for the task (UUIDv7 id breaks
    /// same-millisecond ties), or `None` when the task never ran.
    ///
    /// Monitoring and retry decisions treat this job as authoritative.
    pub async fn get_latest_job_for_task(
        &self,
        kb_id: &Uuid,
        task_id: &Uuid,
    ) -> Result<Option<Job>> {
        Ok(self.list_for_task(kb_id, task_id).await?.into_iter().next())
    }

    /// Full-record update. Callers must read-modify-write; there is no
    /// partial-field primitive, which keeps progress/status updates from
    /// losing writes to each other.
    pub async fn update_job(&self, kb_id: &Uuid, job: &Job) -> Result<()> {
        let table = self.table(kb_id).await?;
        let found = self
            .engine
            .update(&table, &job.id, &serde_json::to_value(job)?)
            .await?;
        if !found {
            return Err(Error::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    /// Append a timestamped line to the job's log file.
    pub async fn append_log(&self, job: &Job, line: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&job.log_path)
            .await?;
        let entry = format!("[{}] {}\n", Utc::now().to_rfc3339(), line);
        file.write_all(entry.as_bytes()).await?;
        Ok(())
    }

    /// RUNNING → PAUSED, recording `paused_at`.
    pub async fn pause(&self, kb_id: &Uuid, job_id: &Uuid) -> Result<Job> {
        self.transition(kb_id, job_id, JobStatus::Paused, |job| {
            job.paused_at = Some(Utc::now());
        })
        .await
    }

    /// PAUSED → RUNNING.
    pub async fn resume(&self, kb_id: &Uuid, job_id: &Uuid) -> Result<Job> {
        self.transition(kb_id, job_id, JobStatus::Running, |_| {}).await
    }

    /// Any non-terminal status → ABORTED. Completed side effects stay in
    /// place; idempotent short-circuiting skips them on a later retry.
    pub async fn abort(&self, kb_id: &Uuid, job_id: &Uuid) -> Result<Job> {
        self.transition(kb_id, job_id, JobStatus::Aborted, |_| {}).await
    }

    async fn transition(
        &self,
        kb_id: &Uuid,
        job_id: &Uuid,
        to: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Job> {
        let mut job = self.get(kb_id, job_id).await?;
        if !job.status.can_transition(to) {
            return Err(Error::Transition(format!(
                "job {}: {} -> {}",
                job.id,
                job.status.as_str(),
                to.as_str()
            )));
        }
        job.status = to;
        apply(&mut job);
        job.updated_at = Utc::now();
        self.update_job(kb_id, &job).await?;
        Ok(job)
    }
}
