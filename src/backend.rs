use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Column/value mapping for a single row.
pub type Attributes = Map<String, Value>;

/// Row from a query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    pub columns: Attributes,
}

impl QueryRow {
    pub fn new() -> Self {
        Self {
            columns: Attributes::new(),
        }
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.columns.insert(key, value);
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.columns
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.columns
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.columns.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.columns.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.columns.get(key).and_then(|v| v.as_bool())
    }

    pub fn into_attributes(self) -> Attributes {
        self.columns
    }
}

impl From<Attributes> for QueryRow {
    fn from(columns: Attributes) -> Self {
        Self { columns }
    }
}

/// Result of a query
pub type QueryResult = Vec<QueryRow>;

/// Outcome of an INSERT statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertResult {
    /// Primary key assigned to the (last) inserted row, when the backend reports one
    pub last_insert_id: Option<i64>,
    pub rows_affected: u64,
}

/// SQL flavour spoken by a backend; only DDL differs between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// Database backend trait
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Connect to the database
    async fn connect(url: &str) -> Result<Self>
    where
        Self: Sized;

    /// Execute a SQL statement and return the number of affected rows
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Query and return results
    async fn query(&mut self, sql: &str) -> Result<QueryResult>;

    /// Execute an INSERT and report the generated primary key
    async fn insert(&mut self, sql: &str, primary_key: &str) -> Result<InsertResult>;

    fn dialect(&self) -> Dialect;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(self) -> Result<()>;
}
