//! Scheduler end-to-end scenarios over the local adapter set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use granary_core::traits::{Connector, Converter};
use granary_db::test_fixtures::sqlite_database;
use granary_db::{
    Database, DocSink, DocSource, DocSourceStatus, Error, JobStatus, ResultCode, SourceType,
    StageStatus,
};
use granary_jobs::{
    PipelineConfig, Scheduler, SchedulerConfig, SchedulerScope, StageSet, TaskRunner,
    TextConverter,
};

struct Harness {
    _store_dir: TempDir,
    docs_dir: TempDir,
    db: Arc<Database>,
    scheduler: Arc<Scheduler>,
}

async fn harness_with_stages(
    build_stages: impl FnOnce(Arc<Database>, StageSet) -> StageSet,
) -> Result<Harness> {
    dotenvy::dotenv().ok();
    let store_dir = TempDir::new()?;
    let docs_dir = TempDir::new()?;
    let db = Arc::new(sqlite_database(store_dir.path()).await?);

    let local = StageSet::local(db.clone(), PipelineConfig::new(store_dir.path()));
    let stages = build_stages(db.clone(), local);
    let runner = Arc::new(TaskRunner::new(db.clone(), stages));
    let config = SchedulerConfig::default().with_wait_poll_interval(Duration::from_millis(20));
    let scheduler = Arc::new(Scheduler::new(db.clone(), runner, config));

    Ok(Harness {
        _store_dir: store_dir,
        docs_dir,
        db,
        scheduler,
    })
}

async fn harness() -> Result<Harness> {
    harness_with_stages(|_, local| local).await
}

impl Harness {
    async fn file_source(&self, name: &str, content: &str) -> Result<DocSource> {
        let path = self.docs_dir.path().join(name);
        std::fs::write(&path, content)?;
        let source = self
            .db
            .create_docsource(granary_core::CreateDocSource {
                kb_id: Uuid::new_v4(),
                source_type: SourceType::LocalFile,
                uri: path.to_string_lossy().into_owned(),
                ingest_config: None,
                tags: vec![],
            })
            .await?;
        Ok(source)
    }
}

const FOUR_PARAGRAPHS: &str = "The first paragraph sets the scene.\n\n\
    The second paragraph adds detail.\n\n\
    The third paragraph keeps going.\n\n\
    The fourth paragraph wraps up.";

#[tokio::test]
async fn test_scheduler_drives_docsource_to_completed() -> Result<()> {
    let h = harness().await?;
    let source = h.file_source("notes.txt", FOUR_PARAGRAPHS).await?;
    let kb = source.kb_id;

    let started = h
        .scheduler
        .run(&SchedulerScope::docsources(kb, vec![source.id]))
        .await?;
    assert!(started);

    let source = h.db.docsources.get(&kb, &source.id).await?;
    assert_eq!(source.status, DocSourceStatus::Completed);
    assert!(source.status.is_finished());

    // One sink, converted and fully embedded.
    let sinks = h.db.docsinks.list(&kb).await?;
    assert_eq!(sinks.len(), 1);
    let documents = h.db.documents.get_documents_for_docsink(&kb, &sinks[0].id).await?;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].split_status, StageStatus::Completed);
    assert_eq!(documents[0].embed_status, StageStatus::Completed);

    let segments = h.db.segments.list_for_document(&kb, &documents[0].id).await?;
    assert!(!segments.is_empty());
    assert!(segments.iter().all(|s| s.embedding.is_some()));

    // No incomplete work remains.
    assert!(h.db.get_incomplete_tasks(Some(&kb), None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_wait_for_docsource_returns_finished_source() -> Result<()> {
    let h = harness().await?;
    let source = h.file_source("notes.txt", FOUR_PARAGRAPHS).await?;
    let kb = source.kb_id;

    h.scheduler
        .run(&SchedulerScope::docsources(kb, vec![source.id]))
        .await?;

    let finished = h
        .scheduler
        .wait_for_docsource(&kb, &source.id, Some(Duration::from_secs(5)))
        .await?;
    assert!(finished.status.is_finished());
    Ok(())
}

#[tokio::test]
async fn test_wait_for_docsource_distinguishes_not_found_from_unfinished() -> Result<()> {
    let h = harness().await?;
    let source = h.file_source("notes.txt", "content").await?;
    let kb = source.kb_id;

    // Unknown id: an error, immediately.
    let missing = Uuid::new_v4();
    let err = h
        .scheduler
        .wait_for_docsource(&kb, &missing, Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DocSourceNotFound(id) if id == missing));

    // Known but never scheduled: times out instead.
    let err = h
        .scheduler
        .wait_for_docsource(&kb, &source.id, Some(Duration::from_millis(80)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    Ok(())
}

/// Converter that fails for sinks whose original URI contains "bad".
struct SelectiveConverter {
    inner: TextConverter,
}

#[async_trait]
impl Converter for SelectiveConverter {
    async fn convert(&self, sink: &DocSink) -> granary_core::Result<ResultCode> {
        if sink.original_doc_uri.contains("bad") {
            return Ok(ResultCode::Failure);
        }
        self.inner.convert(sink).await
    }
}

#[tokio::test]
async fn test_mixed_outcomes_fold_to_partial() -> Result<()> {
    let h = harness_with_stages(|db, local| {
        StageSet::new(
            local.connector,
            Arc::new(SelectiveConverter {
                inner: TextConverter::new(db),
            }),
            local.splitter,
            local.embedder,
        )
    })
    .await?;

    // One source over a directory with one good and one bad file.
    std::fs::write(h.docs_dir.path().join("good.txt"), "fine content")?;
    std::fs::write(h.docs_dir.path().join("bad.txt"), "poison content")?;
    let source = h
        .db
        .create_docsource(granary_core::CreateDocSource {
            kb_id: Uuid::new_v4(),
            source_type: SourceType::LocalFile,
            uri: h.docs_dir.path().to_string_lossy().into_owned(),
            ingest_config: None,
            tags: vec![],
        })
        .await?;
    let kb = source.kb_id;

    h.scheduler
        .run(&SchedulerScope::docsources(kb, vec![source.id]))
        .await?;

    let source = h.db.docsources.get(&kb, &source.id).await?;
    assert_eq!(source.status, DocSourceStatus::Partial);

    // The failed convert task burned through its retries.
    let failed_tasks: Vec<_> = h
        .db
        .tasks
        .all_for_docsource(&kb, &source.id)
        .await?
        .into_iter()
        .filter(|t| t.status == JobStatus::Failed)
        .collect();
    assert_eq!(failed_tasks.len(), 1);
    let attempts = h
        .db
        .jobs
        .list_for_task(&kb, &failed_tasks[0].id)
        .await?;
    assert_eq!(attempts.len() as i32, SchedulerConfig::default().max_retries + 1);
    Ok(())
}

/// Converter that fails a fixed number of times before succeeding.
struct FlakyConverter {
    inner: TextConverter,
    failures_left: AtomicUsize,
}

#[async_trait]
impl Converter for FlakyConverter {
    async fn convert(&self, sink: &DocSink) -> granary_core::Result<ResultCode> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(ResultCode::Failure);
        }
        self.inner.convert(sink).await
    }
}

#[tokio::test]
async fn test_failed_convert_is_retried_to_success() -> Result<()> {
    let h = harness_with_stages(|db, local| {
        StageSet::new(
            local.connector,
            Arc::new(FlakyConverter {
                inner: TextConverter::new(db),
                failures_left: AtomicUsize::new(2),
            }),
            local.splitter,
            local.embedder,
        )
    })
    .await?;

    let source = h.file_source("notes.txt", FOUR_PARAGRAPHS).await?;
    let kb = source.kb_id;

    h.scheduler
        .run(&SchedulerScope::docsources(kb, vec![source.id]))
        .await?;

    let source = h.db.docsources.get(&kb, &source.id).await?;
    assert_eq!(source.status, DocSourceStatus::Completed);

    // Two failed attempts plus the successful one, latest wins.
    let convert_task = h
        .db
        .tasks
        .all_for_docsource(&kb, &source.id)
        .await?
        .into_iter()
        .find(|t| t.spec.program_type() == granary_core::ProgramType::Convert)
        .expect("convert task exists");
    let attempts = h.db.jobs.list_for_task(&kb, &convert_task.id).await?;
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].status, JobStatus::Completed);
    assert_eq!(attempts[0].retry_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_run_yields_to_active_scheduler() -> Result<()> {
    /// Connector slow enough for a second `run` to observe the first.
    struct SlowConnector {
        inner: granary_jobs::FsConnector,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn ingest(&self, source: &DocSource) -> granary_core::Result<ResultCode> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.inner.ingest(source).await
        }

        async fn ingested_docsink_list(&self) -> Vec<granary_core::DocSinkCreate> {
            self.inner.ingested_docsink_list().await
        }
    }

    let h = harness_with_stages(|_, local| {
        StageSet::new(
            Arc::new(SlowConnector {
                inner: granary_jobs::FsConnector::new(std::env::temp_dir().join("granary-slow")),
            }),
            local.converter,
            local.splitter,
            local.embedder,
        )
    })
    .await?;

    let source = h.file_source("notes.txt", FOUR_PARAGRAPHS).await?;
    let kb = source.kb_id;
    let scope = SchedulerScope::docsources(kb, vec![source.id]);

    let first = {
        let scheduler = h.scheduler.clone();
        let scope = scope.clone();
        tokio::spawn(async move { scheduler.run(&scope).await })
    };

    // Give the first run time to claim the flag, then contend.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = h.scheduler.run(&scope).await?;
    assert!(!second, "second run must defer to the active scheduler");

    // The deferred caller blocks on the source instead.
    let finished = h
        .scheduler
        .wait_for_docsource(&kb, &source.id, Some(Duration::from_secs(10)))
        .await?;
    assert!(finished.status.is_finished());

    assert!(first.await??);
    Ok(())
}

#[tokio::test]
async fn test_abort_task_leaves_terminal_state() -> Result<()> {
    let h = harness().await?;
    let source = h.file_source("notes.txt", "content").await?;
    let kb = source.kb_id;

    let task = h
        .db
        .tasks
        .create(source.id, granary_core::ProgramSpec::Connector(source.clone()))
        .await?;
    let job = h.db.jobs.create_job(&task, 0).await?;

    let aborted = h.scheduler.abort_task(&kb, &task.id).await?;
    assert_eq!(aborted.status, JobStatus::Aborted);
    let job = h.db.jobs.get(&kb, &job.id).await?;
    assert_eq!(job.status, JobStatus::Aborted);

    // An aborted task is not picked up again.
    h.scheduler
        .run(&SchedulerScope::docsources(kb, vec![source.id]))
        .await?;
    let task = h.db.tasks.get(&kb, &task.id).await?;
    assert_eq!(task.status, JobStatus::Aborted);
    let attempts = h.db.jobs.list_for_task(&kb, &task.id).await?;
    assert_eq!(attempts.len(), 1);
    Ok(())
}
