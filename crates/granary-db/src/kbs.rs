//! Knowledge-base registry.
//!
//! Entity tables are per-KB and created lazily, so an unscoped scheduler
//! scan needs one global table enumerating the KBs this store has seen.
//! DocSource creation registers the KB; everything downstream inherits it.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{Error, Result};

const KB_TABLE: &str = "granary_kbs";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KbRecord {
    id: Uuid,
    registered_at: chrono::DateTime<Utc>,
}

/// Global registry of knowledge bases present in the store.
pub struct KbRegistry {
    engine: Arc<dyn StorageEngine>,
}

impl KbRegistry {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Record a KB id; idempotent.
    pub async fn register(&self, kb_id: &Uuid) -> Result<()> {
        self.engine.create_table_if_not_exists(KB_TABLE, &[]).await?;
        if self.engine.get(KB_TABLE, kb_id).await?.is_some() {
            return Ok(());
        }
        let record = KbRecord {
            id: *kb_id,
            registered_at: Utc::now(),
        };
        self.engine
            .insert(KB_TABLE, kb_id, &serde_json::to_value(&record)?)
            .await?;
        Ok(())
    }

    /// All registered KB ids.
    pub async fn list(&self) -> Result<Vec<Uuid>> {
        self.engine.create_table_if_not_exists(KB_TABLE, &[]).await?;
        let rows = self.engine.query(KB_TABLE, &Filter::new()).await?;
        rows.into_iter()
            .map(|row| {
                let record: KbRecord = serde_json::from_value(row).map_err(Error::from)?;
                Ok(record.id)
            })
            .collect()
    }
}
