//! Shared handle over a storage backend plus the injected collaborators
//! (event sink, id generator, configuration).

use crate::backend::{Attributes, DatabaseBackend, Dialect, InsertResult};
use crate::config::OrmConfig;
use crate::error::{OrmError, Result};
use crate::events::{Event, EventSink, NullSink};
use crate::ids::{IdGenerator, UuidV7};
use crate::model::Entity;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const SQL_TARGET: &str = "tx2_orm::sql";

pub struct Database<B: DatabaseBackend> {
    backend: Arc<RwLock<B>>,
    dialect: Dialect,
    events: Arc<dyn EventSink>,
    ids: Arc<dyn IdGenerator>,
    config: Arc<OrmConfig>,
}

impl<B: DatabaseBackend> Clone for Database<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            dialect: self.dialect,
            events: Arc::clone(&self.events),
            ids: Arc::clone(&self.ids),
            config: Arc::clone(&self.config),
        }
    }
}

impl<B: DatabaseBackend> Database<B> {
    /// Wrap a backend with default configuration, no event sink and
    /// UUIDv7 ids
    pub fn new(backend: B) -> Self {
        Self {
            dialect: backend.dialect(),
            backend: Arc::new(RwLock::new(backend)),
            events: Arc::new(NullSink),
            ids: Arc::new(UuidV7),
            config: Arc::new(OrmConfig::default()),
        }
    }

    /// Connect a backend by URL
    pub async fn connect(url: &str) -> Result<Self> {
        let backend = B::connect(url).await?;
        Ok(Self::new(backend))
    }

    pub fn with_config(mut self, config: OrmConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_events<S: EventSink + 'static>(mut self, sink: Arc<S>) -> Self {
        let sink: Arc<dyn EventSink> = sink;
        self.events = sink;
        self
    }

    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run a SELECT and return every row
    pub async fn fetch_all(&self, sql: &str) -> Result<Vec<Attributes>> {
        let started = Instant::now();
        let rows = {
            let mut backend = self.backend.write().await;
            backend.query(sql).await
        };
        self.log_statement(sql, started.elapsed());

        Ok(rows?.into_iter().map(|row| row.into_attributes()).collect())
    }

    /// Run a SELECT and return the first row, if any
    pub async fn fetch_optional(&self, sql: &str) -> Result<Option<Attributes>> {
        Ok(self.fetch_all(sql).await?.into_iter().next())
    }

    /// Run a single-value SELECT; `None` when no row or a NULL came back
    pub async fn fetch_scalar(&self, sql: &str) -> Result<Option<Value>> {
        let row = self.fetch_optional(sql).await?;
        Ok(row
            .and_then(|row| row.into_iter().next().map(|(_, value)| value))
            .filter(|value| !value.is_null()))
    }

    /// Execute a statement and return the affected row count
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let started = Instant::now();
        let affected = {
            let mut backend = self.backend.write().await;
            backend.execute(sql).await
        };
        self.log_statement(sql, started.elapsed());
        affected
    }

    /// Execute an INSERT, reporting the generated primary key
    pub async fn insert(&self, sql: &str, primary_key: &str) -> Result<InsertResult> {
        let started = Instant::now();
        let result = {
            let mut backend = self.backend.write().await;
            backend.insert(sql, primary_key).await
        };
        self.log_statement(sql, started.elapsed());
        result
    }

    /// Validate the entity's descriptor and create its table if missing
    pub async fn create_table<E: Entity>(&self) -> Result<()> {
        let schema = E::schema();
        schema.validate()?;
        self.execute(&schema.create_table_sql(self.dialect)).await?;
        tracing::info!(table = schema.table(), "table ready");
        Ok(())
    }

    /// Hand an event to the sink. Never fails: a panicking sink is logged
    /// and swallowed.
    pub fn dispatch(&self, name: impl Into<String>, payload: Value) {
        let event = Event::new(name, payload);
        let sink = Arc::clone(&self.events);
        if catch_unwind(AssertUnwindSafe(|| sink.dispatch(&event))).is_err() {
            tracing::error!(event = %event.name, "event sink panicked");
        }
    }

    pub fn generate_id(&self) -> String {
        self.ids.generate()
    }

    pub async fn is_connected(&self) -> bool {
        let backend = self.backend.read().await;
        backend.is_connected()
    }

    /// Close the backend. Fails while other clones of this handle exist.
    pub async fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.backend) {
            Ok(backend) => backend.into_inner().close().await,
            Err(_) => Err(OrmError::Connection(
                "database handle is still shared".to_string(),
            )),
        }
    }

    fn log_statement(&self, sql: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms >= self.config.slow_query_threshold_ms {
            tracing::warn!(target: SQL_TARGET, elapsed_ms, sql, "slow statement");
        } else if self.config.log_queries {
            tracing::debug!(target: SQL_TARGET, elapsed_ms, sql, "statement");
        }
    }
}

impl<B: DatabaseBackend> std::fmt::Debug for Database<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{QueryResult, QueryRow};
    use crate::events::MemorySink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every statement and answers queries from a queue of canned
    /// result sets.
    #[derive(Default)]
    pub(crate) struct MockBackend {
        pub(crate) log: Arc<Mutex<Vec<String>>>,
        pub(crate) results: Arc<Mutex<VecDeque<Vec<Attributes>>>>,
        pub(crate) next_id: i64,
    }

    impl MockBackend {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn handles(&self) -> (Arc<Mutex<Vec<String>>>, Arc<Mutex<VecDeque<Vec<Attributes>>>>) {
            (Arc::clone(&self.log), Arc::clone(&self.results))
        }
    }

    #[async_trait]
    impl DatabaseBackend for MockBackend {
        async fn connect(_url: &str) -> Result<Self> {
            Ok(Self::new())
        }

        async fn execute(&mut self, sql: &str) -> Result<u64> {
            self.log.lock().unwrap().push(sql.to_string());
            Ok(1)
        }

        async fn query(&mut self, sql: &str) -> Result<QueryResult> {
            self.log.lock().unwrap().push(sql.to_string());
            let rows = self.results.lock().unwrap().pop_front().unwrap_or_default();
            Ok(rows.into_iter().map(QueryRow::from).collect())
        }

        async fn insert(&mut self, sql: &str, _primary_key: &str) -> Result<InsertResult> {
            self.log.lock().unwrap().push(sql.to_string());
            self.next_id += 1;
            Ok(InsertResult {
                last_insert_id: Some(self.next_id),
                rows_affected: 1,
            })
        }

        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_and_scalar() {
        let backend = MockBackend::new();
        let (log, results) = backend.handles();
        results.lock().unwrap().push_back(vec![attrs(json!({"id": 1}))]);
        results.lock().unwrap().push_back(vec![attrs(json!({"total": null}))]);
        let db = Database::new(backend);

        let row = db.fetch_optional("SELECT * FROM t").await.unwrap().unwrap();
        assert_eq!(row.get("id"), Some(&json!(1)));
        assert_eq!(db.fetch_scalar("SELECT SUM(x) AS total FROM t").await.unwrap(), None);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_survives_panicking_sink() {
        struct Exploding;
        impl EventSink for Exploding {
            fn dispatch(&self, _event: &Event) {
                panic!("sink down");
            }
        }

        let db = Database::new(MockBackend::new()).with_events(Arc::new(Exploding));
        db.dispatch("author:created", json!({}));

        let sink = Arc::new(MemorySink::new());
        let db = Database::new(MockBackend::new()).with_events(Arc::clone(&sink));
        db.dispatch("author:created", json!({"id": 1}));
        assert_eq!(sink.names(), vec!["author:created"]);
    }

    #[tokio::test]
    async fn test_close_requires_sole_handle() {
        let db = Database::new(MockBackend::new());
        let other = db.clone();
        assert!(db.close().await.is_err());
        assert!(other.close().await.is_ok());
    }
}
