use crate::backend::{DatabaseBackend, Dialect, InsertResult, QueryResult, QueryRow};
use crate::builder::is_valid_identifier;
use crate::error::{OrmError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Create a new SQLite backend with connection pool
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Create an in-memory SQLite database.
    ///
    /// Every connection to `:memory:` opens a fresh database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create a file-based SQLite database
    pub async fn file(path: &str) -> Result<Self> {
        Self::new(&format!("sqlite://{}", path)).await
    }

    /// Convert SQLite row to QueryRow, decoding by the stored value's type
    fn convert_row(row: &SqliteRow) -> Result<QueryRow> {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let index = column.ordinal();
            let raw = row.try_get_raw(index)?;

            let value = if raw.is_null() {
                Value::Null
            } else {
                let type_name = raw.type_info().name().to_string();
                match type_name.as_str() {
                    "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
                    "REAL" | "NUMERIC" => serde_json::Number::from_f64(row.try_get::<f64, _>(index)?)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                    "BLOB" => Value::String(BASE64.encode(row.try_get::<Vec<u8>, _>(index)?)),
                    _ => Value::String(row.try_get::<String, _>(index)?),
                }
            };

            query_row.insert(column.name().to_string(), value);
        }

        Ok(query_row)
    }

    /// Get list of all tables
    pub async fn list_tables(&mut self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }

    /// Get table info
    pub async fn table_info(&mut self, table_name: &str) -> Result<Vec<ColumnInfo>> {
        if !is_valid_identifier(table_name) {
            return Err(OrmError::Query(format!("invalid table name '{}'", table_name)));
        }

        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(ColumnInfo {
                cid: row.get::<i32, _>("cid"),
                name: row.get::<String, _>("name"),
                type_name: row.get::<String, _>("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.try_get::<Option<String>, _>("dflt_value").ok().flatten(),
                primary_key: row.get::<i32, _>("pk") != 0,
            });
        }

        Ok(columns)
    }
}

/// Column information from PRAGMA table_info
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn connect(url: &str) -> Result<Self> {
        if url.contains(":memory:") {
            Self::memory().await
        } else {
            Self::new(url).await
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::convert_row).collect()
    }

    async fn insert(&mut self, sql: &str, _primary_key: &str) -> Result<InsertResult> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(InsertResult {
            last_insert_id: Some(result.last_insert_rowid()),
            rows_affected: result.rows_affected(),
        })
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
