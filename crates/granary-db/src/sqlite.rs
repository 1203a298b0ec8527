//! SQLite storage engine.
//!
//! The reference backend: every logical table is a SQLite table holding one
//! JSON document per row, with filter predicates pushed down through
//! `json_extract` and expression indexes on declared row fields.
//!
//! SQLite does not tolerate concurrent writers safely, so a per-logical-table
//! async mutex serializes table creation and every mutating statement; a
//! second, coarser lock guards the created-table metadata cache. Reads do
//! not bypass the table lock either; they share the same serialization.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use granary_core::traits::{Condition, Filter, FilterOp, StorageEngine};
use granary_core::{defaults, Error, Result};

/// Value bound into a pushed-down predicate.
enum BindValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl BindValue {
    /// Map a JSON value to its `json_extract` representation.
    ///
    /// SQLite's JSON1 extracts booleans as integers 1/0.
    fn from_json(value: &JsonValue) -> Result<BindValue> {
        match value {
            JsonValue::Null => Ok(BindValue::Null),
            JsonValue::Bool(b) => Ok(BindValue::Int(i64::from(*b))),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(BindValue::Int(i))
                } else {
                    Ok(BindValue::Real(n.as_f64().unwrap_or_default()))
                }
            }
            JsonValue::String(s) => Ok(BindValue::Text(s.clone())),
            other => Err(Error::Validation(format!(
                "unsupported filter value: {other}"
            ))),
        }
    }
}

/// Reject anything that cannot be a bare SQL identifier.
///
/// Table and field names are assembled into statements directly, so they
/// must never carry quoting or punctuation.
fn validate_ident(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid identifier: {name:?}")))
    }
}

/// SQLite implementation of [`StorageEngine`].
pub struct SqliteEngine {
    pool: SqlitePool,
    /// One mutex per logical table, created on first touch.
    table_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Names of tables already known to exist.
    created: Mutex<HashSet<String>>,
}

impl SqliteEngine {
    /// Open (creating if missing) a SQLite database file.
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path: PathBuf = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(Error::Storage)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(defaults::SQLITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an already-connected pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            table_locks: StdMutex::new(HashMap::new()),
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Fetch (or lazily create) the mutex serializing writes to `table`.
    fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().expect("table lock map poisoned");
        locks
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Translate a filter into a WHERE clause and its bind values.
    ///
    /// `IS` / `IS NOT` give NULL-safe comparison, so a missing field
    /// (extracted as SQL NULL) behaves like JSON null, matching the
    /// semantics of [`Filter::matches`].
    fn where_clause(filter: &Filter) -> Result<(String, Vec<BindValue>)> {
        if filter.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let mut parts = Vec::with_capacity(filter.conditions().len());
        let mut binds = Vec::with_capacity(filter.conditions().len());
        for Condition { field, op, value } in filter.conditions() {
            validate_ident(field)?;
            let operator = match op {
                FilterOp::Eq => "IS",
                FilterOp::Ne => "IS NOT",
            };
            parts.push(format!("json_extract(data, '$.{field}') {operator} ?"));
            binds.push(BindValue::from_json(value)?);
        }
        Ok((format!(" WHERE {}", parts.join(" AND ")), binds))
    }
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    async fn create_table_if_not_exists(
        &self,
        table: &str,
        indexed_fields: &[&str],
    ) -> Result<()> {
        validate_ident(table)?;

        let lock = self.table_lock(table);
        let _write_guard = lock.lock().await;

        {
            let created = self.created.lock().await;
            if created.contains(table) {
                return Ok(());
            }
        }

        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (id TEXT PRIMARY KEY, data TEXT NOT NULL)"#
        ))
        .execute(&self.pool)
        .await?;

        for field in indexed_fields {
            validate_ident(field)?;
            sqlx::query(&format!(
                r#"CREATE INDEX IF NOT EXISTS "idx_{table}_{field}"
                   ON "{table}" (json_extract(data, '$.{field}'))"#
            ))
            .execute(&self.pool)
            .await?;
        }

        self.created.lock().await.insert(table.to_string());
        debug!(table, "created table");
        Ok(())
    }

    async fn insert(&self, table: &str, id: &Uuid, row: &JsonValue) -> Result<()> {
        validate_ident(table)?;
        let lock = self.table_lock(table);
        let _write_guard = lock.lock().await;

        sqlx::query(&format!(
            r#"INSERT INTO "{table}" (id, data) VALUES (?, ?)"#
        ))
        .bind(id.to_string())
        .bind(row.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, table: &str, id: &Uuid) -> Result<Option<JsonValue>> {
        validate_ident(table)?;
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;

        let row = sqlx::query(&format!(r#"SELECT data FROM "{table}" WHERE id = ?"#))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let data: String = r.get("data");
            serde_json::from_str(&data).map_err(Error::from)
        })
        .transpose()
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<JsonValue>> {
        validate_ident(table)?;
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;

        let (clause, binds) = Self::where_clause(filter)?;
        let sql = format!(r#"SELECT data FROM "{table}"{clause} ORDER BY id"#);

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = match bind {
                BindValue::Null => query.bind(Option::<String>::None),
                BindValue::Int(i) => query.bind(i),
                BindValue::Real(f) => query.bind(f),
                BindValue::Text(s) => query.bind(s),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| {
                let data: String = r.get("data");
                serde_json::from_str(&data).map_err(Error::from)
            })
            .collect()
    }

    async fn update(&self, table: &str, id: &Uuid, row: &JsonValue) -> Result<bool> {
        validate_ident(table)?;
        let lock = self.table_lock(table);
        let _write_guard = lock.lock().await;

        let result = sqlx::query(&format!(r#"UPDATE "{table}" SET data = ? WHERE id = ?"#))
            .bind(row.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, table: &str, id: &Uuid) -> Result<bool> {
        validate_ident(table)?;
        let lock = self.table_lock(table);
        let _write_guard = lock.lock().await;

        let result = sqlx::query(&format!(r#"DELETE FROM "{table}" WHERE id = ?"#))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ident_accepts_table_names() {
        assert!(validate_ident("kb_0123abcd_docsinks").is_ok());
        assert!(validate_ident("granary_kbs").is_ok());
    }

    #[test]
    fn test_validate_ident_rejects_injection() {
        assert!(validate_ident("").is_err());
        assert!(validate_ident("t; DROP TABLE x").is_err());
        assert!(validate_ident(r#"t""#).is_err());
        assert!(validate_ident("1abc").is_err());
        assert!(validate_ident("a-b").is_err());
    }

    #[test]
    fn test_where_clause_shapes() {
        let filter = Filter::new()
            .eq("status", "created")
            .ne("content_hash", JsonValue::Null)
            .eq("is_deleted", false);
        let (clause, binds) = SqliteEngine::where_clause(&filter).unwrap();
        assert_eq!(
            clause,
            " WHERE json_extract(data, '$.status') IS ? \
             AND json_extract(data, '$.content_hash') IS NOT ? \
             AND json_extract(data, '$.is_deleted') IS ?"
        );
        assert_eq!(binds.len(), 3);
        assert!(matches!(binds[0], BindValue::Text(_)));
        assert!(matches!(binds[1], BindValue::Null));
        assert!(matches!(binds[2], BindValue::Int(0)));
    }

    #[test]
    fn test_where_clause_empty_filter() {
        let (clause, binds) = SqliteEngine::where_clause(&Filter::new()).unwrap();
        assert!(clause.is_empty());
        assert!(binds.is_empty());
    }
}
