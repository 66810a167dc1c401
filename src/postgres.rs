use crate::backend::{DatabaseBackend, Dialect, InsertResult, QueryResult, QueryRow};
use crate::builder::is_valid_identifier;
use crate::error::{OrmError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row};

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create a new PostgreSQL backend with connection pool
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Convert PostgreSQL row to QueryRow
    fn convert_row(row: &PgRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let column_name = column.name();

            let value = if let Ok(value) = row.try_get::<Option<Value>, _>(column_name) {
                value.unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<String>, _>(column_name) {
                value.map(Value::String).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<i64>, _>(column_name) {
                value.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<i32>, _>(column_name) {
                value.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<f64>, _>(column_name) {
                value
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<bool>, _>(column_name) {
                value.map(Value::Bool).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(column_name) {
                value.map(timestamp_value).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<DateTime<Utc>>, _>(column_name) {
                value
                    .map(|ts| timestamp_value(ts.naive_utc()))
                    .unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<NaiveDate>, _>(column_name) {
                value
                    .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            };

            query_row.insert(column_name.to_string(), value);
        }

        query_row
    }
}

/// Same text form the mutation pipeline writes, so values compare equal
/// across backends
fn timestamp_value(ts: NaiveDateTime) -> Value {
    Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn connect(url: &str) -> Result<Self> {
        Self::new(url).await
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::convert_row).collect())
    }

    /// Appends `RETURNING <pk>` and reports the last returned key.
    async fn insert(&mut self, sql: &str, primary_key: &str) -> Result<InsertResult> {
        if !is_valid_identifier(primary_key) {
            return Err(OrmError::Query(format!(
                "invalid primary key column '{}'",
                primary_key
            )));
        }

        let returning = format!("{} RETURNING {}", sql, primary_key);
        let rows = sqlx::query(&returning).fetch_all(&self.pool).await?;

        let last_insert_id = match rows.last() {
            Some(row) => row.try_get::<i64, _>(primary_key).ok(),
            None => None,
        };

        Ok(InsertResult {
            last_insert_id,
            rows_affected: rows.len() as u64,
        })
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_value_matches_storage_format() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(7, 5, 1))
            .unwrap();
        assert_eq!(timestamp_value(ts), Value::String("2024-03-09 07:05:01".to_string()));
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL running
    async fn test_postgres_connection() {
        let backend = PostgresBackend::connect("postgresql://localhost/test").await;
        assert!(backend.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL running
    async fn test_postgres_insert_returning() {
        let mut backend = PostgresBackend::connect("postgresql://localhost/test")
            .await
            .unwrap();

        backend
            .execute("CREATE TEMPORARY TABLE test_table (id BIGSERIAL PRIMARY KEY, name TEXT, created_at TIMESTAMP DEFAULT now())")
            .await
            .unwrap();

        let inserted = backend
            .insert("INSERT INTO test_table (name) VALUES ('Alice')", "id")
            .await
            .unwrap();
        assert_eq!(inserted.last_insert_id, Some(1));

        let results = backend
            .query("SELECT * FROM test_table WHERE id = 1")
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get_string("name"), Some("Alice".to_string()));
        assert_eq!(results[0].get_string("created_at").map(|ts| ts.len()), Some(19));
    }
}
