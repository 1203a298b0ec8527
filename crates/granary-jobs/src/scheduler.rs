//! Scheduler: turns pending tasks into bounded-concurrency execution.
//!
//! One logical scheduler run per process: `run` scans for incomplete
//! tasks in rounds, creates a Job per runnable task, and drives each
//! round's tasks through per-stage worker pools. A second concurrent
//! `run` call returns `false` immediately; that caller blocks on
//! `wait_for_docsource` against the run already in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use granary_core::{
    defaults, DocSource, DocSourceStatus, Error, JobStatus, ProgramSpec, ProgramType, Result,
    Task,
};
use granary_db::Database;

use crate::runner::TaskRunner;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size per pipeline stage.
    pub stage_pool_size: usize,
    /// Fixed interval between `wait_for_docsource` polls.
    pub wait_poll_interval: Duration,
    /// Maximum retries before a task is marked FAILED.
    pub max_retries: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stage_pool_size: defaults::STAGE_POOL_SIZE,
            wait_poll_interval: Duration::from_millis(defaults::WAIT_POLL_INTERVAL_MS),
            max_retries: defaults::JOB_MAX_RETRIES,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GRANARY_STAGE_POOL_SIZE` | `10` | Workers per pipeline stage |
    /// | `GRANARY_WAIT_POLL_INTERVAL_MS` | `500` | `wait_for_docsource` poll interval |
    /// | `GRANARY_MAX_RETRIES` | `3` | Retries before a task fails |
    pub fn from_env() -> Self {
        let defaults_config = Self::default();

        let stage_pool_size = std::env::var("GRANARY_STAGE_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults_config.stage_pool_size)
            .max(1);

        let wait_poll_interval = std::env::var("GRANARY_WAIT_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults_config.wait_poll_interval);

        let max_retries = std::env::var("GRANARY_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults_config.max_retries);

        Self {
            stage_pool_size,
            wait_poll_interval,
            max_retries,
        }
    }

    pub fn with_stage_pool_size(mut self, size: usize) -> Self {
        self.stage_pool_size = size.max(1);
        self
    }

    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, retries: i32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// What a scheduler run scans: everything, one KB, or specific DocSources.
#[derive(Debug, Clone, Default)]
pub struct SchedulerScope {
    pub kb_id: Option<Uuid>,
    pub docsource_ids: Option<Vec<Uuid>>,
}

impl SchedulerScope {
    /// Every incomplete task across every registered KB.
    pub fn all() -> Self {
        Self::default()
    }

    /// One KB.
    pub fn kb(kb_id: Uuid) -> Self {
        Self {
            kb_id: Some(kb_id),
            docsource_ids: None,
        }
    }

    /// Specific DocSources within one KB.
    pub fn docsources(kb_id: Uuid, docsource_ids: Vec<Uuid>) -> Self {
        Self {
            kb_id: Some(kb_id),
            docsource_ids: Some(docsource_ids),
        }
    }
}

/// Single-process scheduler over a shared store.
pub struct Scheduler {
    db: Arc<Database>,
    runner: Arc<TaskRunner>,
    config: SchedulerConfig,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, runner: Arc<TaskRunner>, config: SchedulerConfig) -> Self {
        Self {
            db,
            runner,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Drive every incomplete task in scope to a terminal status.
    ///
    /// Returns `Ok(false)` without scanning when another run already holds
    /// the run flag; the caller must block on [`Self::wait_for_docsource`]
    /// against that run instead. Store-level failures are fatal and
    /// returned immediately; the scheduler does not run without its store.
    #[instrument(skip(self, scope))]
    pub async fn run(&self, scope: &SchedulerScope) -> Result<bool> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("scheduler already running, caller must wait on it");
            return Ok(false);
        }

        let result = self.run_inner(scope).await;
        self.running.store(false, Ordering::SeqCst);
        result.map(|()| true)
    }

    async fn run_inner(&self, scope: &SchedulerScope) -> Result<()> {
        self.ensure_connector_tasks(scope).await?;

        loop {
            let tasks = self
                .db
                .get_incomplete_tasks(scope.kb_id.as_ref(), scope.docsource_ids.as_deref())
                .await?;
            let runnable = self.filter_runnable(tasks).await?;
            if runnable.is_empty() {
                break;
            }
            info!(task_count = runnable.len(), "scheduler round");
            if self.run_round(runnable).await == 0 {
                // Runnable work that produced no job means the store is
                // rejecting job creation; bail instead of spinning.
                warn!("scheduler round made no progress, stopping");
                break;
            }
        }

        self.finalize(scope).await
    }

    /// Make sure every scoped, unfinished DocSource is PROCESSING and has
    /// its intake task; the caller only creates the DocSource.
    async fn ensure_connector_tasks(&self, scope: &SchedulerScope) -> Result<()> {
        for source in self.scoped_sources(scope).await? {
            if source.status.is_finished() {
                continue;
            }
            if source.status == DocSourceStatus::Created {
                self.db
                    .docsources
                    .update_status(&source.kb_id, &source.id, DocSourceStatus::Processing)
                    .await?;
            }

            let has_connector_task = self
                .db
                .tasks
                .all_for_docsource(&source.kb_id, &source.id)
                .await?
                .iter()
                .any(|t| t.spec.program_type() == ProgramType::Connector);
            if !has_connector_task {
                self.db
                    .tasks
                    .create(source.id, ProgramSpec::Connector(source.clone()))
                    .await?;
                debug!(docsource_id = %source.id, "scheduled connector task");
            }
        }
        Ok(())
    }

    /// Live DocSources selected by the scope.
    async fn scoped_sources(&self, scope: &SchedulerScope) -> Result<Vec<DocSource>> {
        let kbs = match scope.kb_id {
            Some(kb) => vec![kb],
            None => self.db.kbs.list().await?,
        };
        let mut sources = Vec::new();
        for kb in kbs {
            sources.extend(self.db.docsources.list(&kb).await?);
        }
        if let Some(ids) = &scope.docsource_ids {
            sources.retain(|s| ids.contains(&s.id));
        }
        Ok(sources)
    }

    /// Decide, per incomplete task, whether this round may run it and at
    /// which retry count.
    ///
    /// The store permits concurrent jobs per task; at-most-one-active is
    /// enforced right here by consulting the latest job before creating a
    /// new one.
    async fn filter_runnable(&self, tasks: Vec<Task>) -> Result<Vec<(Task, i32)>> {
        let mut runnable = Vec::new();
        for task in tasks {
            // Aborted is operator intent; never resurrect it. A FAILED
            // aggregate is retryable until the latest job spent its budget.
            if task.status == JobStatus::Aborted {
                continue;
            }

            let latest = self
                .db
                .jobs
                .get_latest_job_for_task(&task.kb_id, &task.id)
                .await?;
            match latest {
                None => runnable.push((task, 0)),
                Some(job) => match job.status {
                    JobStatus::Created | JobStatus::Pending | JobStatus::Running
                    | JobStatus::Paused => {
                        // An attempt is already in flight (or parked).
                    }
                    JobStatus::Completed | JobStatus::Aborted => {
                        // Terminal job; the task aggregate already reflects it.
                    }
                    JobStatus::Failed => {
                        if job.retry_count < self.config.max_retries {
                            runnable.push((task, job.retry_count + 1));
                        } else if task.status != JobStatus::Failed {
                            warn!(
                                task_id = %task.id,
                                retry_count = job.retry_count,
                                "retries exhausted, task failed"
                            );
                            self.db
                                .tasks
                                .set_status(&task.kb_id, &task.id, JobStatus::Failed)
                                .await?;
                        }
                    }
                },
            }
        }
        Ok(runnable)
    }

    /// Execute one round: tasks grouped by stage, each group under its own
    /// bounded pool, all groups concurrently, so a slow convert batch does
    /// not starve the split batch. Returns the number of jobs executed.
    async fn run_round(&self, runnable: Vec<(Task, i32)>) -> usize {
        let mut groups: HashMap<ProgramType, Vec<(Task, i32)>> = HashMap::new();
        for entry in runnable {
            groups
                .entry(entry.0.spec.program_type())
                .or_default()
                .push(entry);
        }

        let group_futures = groups.into_iter().map(|(program, tasks)| {
            let db = self.db.clone();
            let runner = self.runner.clone();
            // The connector contract is stateful (ingest, then list), so
            // intake runs one task at a time; the other stages fan out.
            let pool_size = match program {
                ProgramType::Connector => 1,
                _ => self.config.stage_pool_size,
            };
            async move {
                let pool = Arc::new(Semaphore::new(pool_size));
                let mut jobs = JoinSet::new();
                for (task, retry_count) in tasks {
                    let Ok(permit) = pool.clone().acquire_owned().await else {
                        break;
                    };
                    let db = db.clone();
                    let runner = runner.clone();
                    jobs.spawn(async move {
                        let _permit = permit;
                        match db.jobs.create_job(&task, retry_count).await {
                            Ok(job) => {
                                runner.run_job(job).await;
                                true
                            }
                            Err(err) => {
                                error!(task_id = %task.id, error = %err, "failed to create job");
                                false
                            }
                        }
                    });
                }
                let mut executed = 0usize;
                while let Some(joined) = jobs.join_next().await {
                    match joined {
                        Ok(ran) => executed += usize::from(ran),
                        Err(err) => {
                            // A panic is isolated to its item, never the pool.
                            error!(program = program.as_str(), error = ?err, "job task panicked");
                        }
                    }
                }
                executed
            }
        });
        futures::future::join_all(group_futures).await.into_iter().sum()
    }

    /// Fold each scoped DocSource to its terminal status from the statuses
    /// of its tasks.
    async fn finalize(&self, scope: &SchedulerScope) -> Result<()> {
        for source in self.scoped_sources(scope).await? {
            if source.status != DocSourceStatus::Processing {
                continue;
            }
            let statuses = self.task_statuses_for_source(&source).await?;
            let Some(folded) = fold_source_status(&statuses) else {
                // Non-terminal work remains (paused or in-flight elsewhere).
                continue;
            };
            self.db
                .docsources
                .update_status(&source.kb_id, &source.id, folded)
                .await?;
            info!(docsource_id = %source.id, status = folded.as_str(), "docsource finished");
        }
        Ok(())
    }

    async fn task_statuses_for_source(&self, source: &DocSource) -> Result<Vec<JobStatus>> {
        let tasks = self
            .db
            .tasks
            .all_for_docsource(&source.kb_id, &source.id)
            .await?;
        Ok(tasks.into_iter().map(|t| t.status).collect())
    }

    /// Poll a DocSource until it reaches a terminal status or the timeout
    /// elapses (`None` polls indefinitely).
    ///
    /// A missing DocSource is a [`Error::DocSourceNotFound`], distinct
    /// from "not yet finished". The interval is fixed (default 500 ms);
    /// the original system left it unspecified.
    pub async fn wait_for_docsource(
        &self,
        kb_id: &Uuid,
        docsource_id: &Uuid,
        timeout: Option<Duration>,
    ) -> Result<DocSource> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let source = self.db.docsources.get(kb_id, docsource_id).await?;
            if source.status.is_finished() {
                return Ok(source);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(format!(
                        "docsource {docsource_id} not finished"
                    )));
                }
            }
            sleep(self.config.wait_poll_interval).await;
        }
    }

    /// Abort a task: its latest non-terminal job transitions to ABORTED
    /// and the aggregate follows. Completed side effects stay in place;
    /// idempotent short-circuiting skips them on any later retry.
    pub async fn abort_task(&self, kb_id: &Uuid, task_id: &Uuid) -> Result<Task> {
        if let Some(job) = self.db.jobs.get_latest_job_for_task(kb_id, task_id).await? {
            if !job.status.is_terminal() {
                self.db.jobs.abort(kb_id, &job.id).await?;
            }
        }
        self.db.tasks.set_status(kb_id, task_id, JobStatus::Aborted).await
    }
}

/// Terminal DocSource status implied by its tasks' aggregate statuses, or
/// `None` while non-terminal work remains.
fn fold_source_status(statuses: &[JobStatus]) -> Option<DocSourceStatus> {
    if statuses.is_empty() {
        return Some(DocSourceStatus::Failed);
    }
    if statuses.iter().any(|s| !s.is_terminal()) {
        return None;
    }
    let aborted = statuses.iter().any(|s| *s == JobStatus::Aborted);
    let failed = statuses.iter().filter(|s| **s == JobStatus::Failed).count();
    let completed = statuses.iter().filter(|s| **s == JobStatus::Completed).count();

    Some(if aborted {
        DocSourceStatus::Aborted
    } else if failed == 0 {
        DocSourceStatus::Completed
    } else if completed == 0 {
        DocSourceStatus::Failed
    } else {
        DocSourceStatus::Partial
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.stage_pool_size, 10);
        assert_eq!(config.wait_poll_interval, Duration::from_millis(500));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_config_builders() {
        let config = SchedulerConfig::default()
            .with_stage_pool_size(4)
            .with_wait_poll_interval(Duration::from_millis(50))
            .with_max_retries(1);
        assert_eq!(config.stage_pool_size, 4);
        assert_eq!(config.wait_poll_interval, Duration::from_millis(50));
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn test_config_pool_size_floor() {
        assert_eq!(SchedulerConfig::default().with_stage_pool_size(0).stage_pool_size, 1);
    }

    #[test]
    fn test_fold_all_completed() {
        use JobStatus::*;
        assert_eq!(
            fold_source_status(&[Completed, Completed]),
            Some(DocSourceStatus::Completed)
        );
    }

    #[test]
    fn test_fold_all_failed() {
        use JobStatus::*;
        assert_eq!(
            fold_source_status(&[Failed, Failed]),
            Some(DocSourceStatus::Failed)
        );
    }

    #[test]
    fn test_fold_mixed_is_partial() {
        use JobStatus::*;
        assert_eq!(
            fold_source_status(&[Completed, Failed, Completed]),
            Some(DocSourceStatus::Partial)
        );
    }

    #[test]
    fn test_fold_abort_wins() {
        use JobStatus::*;
        assert_eq!(
            fold_source_status(&[Completed, Aborted, Failed]),
            Some(DocSourceStatus::Aborted)
        );
    }

    #[test]
    fn test_fold_waits_for_non_terminal() {
        use JobStatus::*;
        assert_eq!(fold_source_status(&[Completed, Running]), None);
        assert_eq!(fold_source_status(&[Paused]), None);
    }

    #[test]
    fn test_fold_no_tasks_is_failed() {
        assert_eq!(fold_source_status(&[]), Some(DocSourceStatus::Failed));
    }

    #[test]
    fn test_scope_constructors() {
        let kb = Uuid::new_v4();
        let id = Uuid::new_v4();

        assert!(SchedulerScope::all().kb_id.is_none());
        assert_eq!(SchedulerScope::kb(kb).kb_id, Some(kb));
        let scoped = SchedulerScope::docsources(kb, vec![id]);
        assert_eq!(scoped.docsource_ids, Some(vec![id]));
    }
}
