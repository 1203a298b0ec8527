//! Task store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{
    new_v7, table_name, EntityKind, Error, JobStatus, ProgramSpec, Result, Task,
};

/// Persistence for the durable "what needs doing" records.
pub struct TaskStore {
    engine: Arc<dyn StorageEngine>,
}

impl TaskStore {
    const INDEXED_FIELDS: &'static [&'static str] = &[
        "status",
        "docsource_id",
        "docsink_id",
        "document_id",
        "is_deleted",
    ];

    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    async fn table(&self, kb_id: &Uuid) -> Result<String> {
        let table = table_name(kb_id, EntityKind::Tasks);
        self.engine
            .create_table_if_not_exists(&table, Self::INDEXED_FIELDS)
            .await?;
        Ok(table)
    }

    fn decode(row: serde_json::Value) -> Result<Task> {
        serde_json::from_value(row).map_err(Error::from)
    }

    /// Create a Task for one pipeline stage.
    ///
    /// Entity references are derived from the typed program spec;
    /// `docsource_id` is passed explicitly because segment batches do not
    /// carry their origin.
    pub async fn create(&self, docsource_id: Uuid, spec: ProgramSpec) -> Result<Task> {
        let (kb_id, docsink_id, document_id) = match &spec {
            ProgramSpec::Connector(source) => (source.kb_id, None, None),
            ProgramSpec::Convert(sink) => (sink.kb_id, Some(sink.id), None),
            ProgramSpec::Split(document) => {
                (document.kb_id, Some(document.docsink_id), Some(document.id))
            }
            ProgramSpec::Embed(segments) => {
                let first = segments.first().ok_or_else(|| {
                    Error::Validation("embed task requires at least one segment".into())
                })?;
                (first.kb_id, Some(first.docsink_id), Some(first.document_id))
            }
        };

        let now = Utc::now();
        let task = Task {
            id: new_v7(),
            kb_id,
            docsource_id,
            docsink_id,
            document_id,
            spec,
            status: JobStatus::Created,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let table = self.table(&task.kb_id).await?;
        self.engine
            .insert(&table, &task.id, &serde_json::to_value(&task)?)
            .await?;
        debug!(
            task_id = %task.id,
            program = task.spec.program_type().as_str(),
            "created task"
        );
        Ok(task)
    }

    pub async fn get(&self, kb_id: &Uuid, id: &Uuid) -> Result<Task> {
        let table = self.table(kb_id).await?;
        self.engine
            .get(&table, id)
            .await?
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    /// Live tasks in the KB whose aggregate status is not COMPLETED,
    /// optionally narrowed to a set of DocSources.
    pub async fn incomplete(
        &self,
        kb_id: &Uuid,
        docsource_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Task>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .ne("status", JobStatus::Completed.as_str())
                    .eq("is_deleted", false),
            )
            .await?;
        let mut tasks = rows
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<Task>>>()?;
        if let Some(ids) = docsource_ids {
            let wanted: HashSet<&Uuid> = ids.iter().collect();
            tasks.retain(|t| wanted.contains(&t.docsource_id));
        }
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    /// All live tasks scoped to the given DocSource, any status.
    pub async fn all_for_docsource(&self, kb_id: &Uuid, docsource_id: &Uuid) -> Result<Vec<Task>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .eq("docsource_id", docsource_id.to_string())
                    .eq("is_deleted", false),
            )
            .await?;
        let mut tasks = rows
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<Task>>>()?;
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    /// Full-record update (read-modify-write).
    pub async fn update(&self, task: &Task) -> Result<()> {
        let table = self.table(&task.kb_id).await?;
        let found = self
            .engine
            .update(&table, &task.id, &serde_json::to_value(task)?)
            .await?;
        if !found {
            return Err(Error::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    /// Fold a job outcome into the task's aggregate status.
    pub async fn set_status(&self, kb_id: &Uuid, id: &Uuid, status: JobStatus) -> Result<Task> {
        let mut task = self.get(kb_id, id).await?;
        task.status = status;
        task.updated_at = Utc::now();
        self.update(&task).await?;
        Ok(task)
    }

    /// Soft-delete every live task referencing the given entity id as its
    /// docsource, docsink, or document. Returns the count.
    pub async fn soft_delete_referencing(&self, kb_id: &Uuid, entity_id: &Uuid) -> Result<u64> {
        let table = self.table(kb_id).await?;
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut count = 0u64;

        for field in ["docsource_id", "docsink_id", "document_id"] {
            let rows = self
                .engine
                .query(
                    &table,
                    &Filter::new()
                        .eq(field, entity_id.to_string())
                        .eq("is_deleted", false),
                )
                .await?;
            for row in rows {
                let mut task = Self::decode(row)?;
                if !seen.insert(task.id) {
                    continue;
                }
                task.is_deleted = true;
                task.updated_at = Utc::now();
                self.update(&task).await?;
                count += 1;
            }
        }
        if count > 0 {
            debug!(entity_id = %entity_id, task_count = count, "soft-deleted referencing tasks");
        }
        Ok(count)
    }
}
