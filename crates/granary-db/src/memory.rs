//! In-memory storage engine.
//!
//! A map-backed [`StorageEngine`] with the same observable semantics as the
//! SQLite engine. Used in unit tests and anywhere a throwaway store is
//! enough; its main job is keeping the stores honest about being
//! backend-agnostic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{Error, Result};

/// Rows keyed by id; `BTreeMap` keeps query results deterministically ordered.
type Table = BTreeMap<Uuid, JsonValue>;

/// In-memory implementation of [`StorageEngine`].
#[derive(Default)]
pub struct MemoryEngine {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn create_table_if_not_exists(
        &self,
        table: &str,
        _indexed_fields: &[&str],
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn insert(&self, table: &str, id: &Uuid, row: &JsonValue) -> Result<()> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        t.insert(*id, row.clone());
        Ok(())
    }

    async fn get(&self, table: &str, id: &Uuid) -> Result<Option<JsonValue>> {
        let tables = self.tables.read().await;
        let t = tables
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        Ok(t.get(id).cloned())
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<JsonValue>> {
        let tables = self.tables.read().await;
        let t = tables
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        Ok(t.values().filter(|row| filter.matches(row)).cloned().collect())
    }

    async fn update(&self, table: &str, id: &Uuid, row: &JsonValue) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        match t.get_mut(id) {
            Some(existing) => {
                *existing = row.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, table: &str, id: &Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        Ok(t.remove(id).is_some())
    }
}
