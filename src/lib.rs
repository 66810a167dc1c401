//! tx2-orm - Schema-driven model runtime for TX-2 services
//!
//! tx2-orm maps rows of a SQL table onto typed model instances described by a
//! static [`ModelSchema`](schema::ModelSchema). Every instance tracks which
//! attributes changed since it was loaded; queries are built fluently and
//! only touch the database at their terminal call.
//!
//! # Architecture
//!
//! - **Schema**: columns, mass-assignment lists, relations and attribute hooks
//! - **AttributeStore**: current/original snapshots for dirty tracking
//! - **Query**: fluent filter state, relation existence subqueries, eager loading
//! - **MutationPipeline**: filter, hooks, timestamps, write, re-read, event
//! - **Pagination**: counted pages with a lookahead row for the next cursor
//! - **Backends**: SQLite and PostgreSQL through sqlx
//!
//! # Example
//!
//! ```rust,no_run
//! use tx2_orm::prelude::*;
//! use serde_json::json;
//!
//! entity! {
//!     pub struct Post => PostModel {
//!         ModelSchema::builder("Post", "posts")
//!             .column("title", SqlType::Text)
//!             .column("status", SqlType::Text)
//!             .nullable_column("author_id", SqlType::BigInt)
//!             .fillable(&["title", "status", "author_id"])
//!             .relation(RelationDef::belongs_to("author", "authors"))
//!             .soft_deletes()
//!             .build()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     #[cfg(feature = "sqlite")]
//!     {
//!         let db = Database::new(SqliteBackend::memory().await?);
//!         db.create_table::<Post>().await?;
//!
//!         let mut post = PostModel::create(&db, json!({"title": "Hello", "status": "draft"})).await?;
//!         post.update(&db, json!({"status": "published"})).await?;
//!
//!         let page = PostModel::where_(&db, "status", "published")
//!             .paginate(PaginateOptions::page(1, 10))
//!             .await?;
//!         println!("{} of {} posts", page.data.len(), page.paging.total_records);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backend Support
//!
//! ```toml
//! [dependencies]
//! tx2-orm = { version = "0.1", features = ["postgres", "sqlite"] }
//! ```

pub mod attributes;
pub mod backend;
pub mod builder;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod hydrate;
pub mod ids;
pub mod model;
pub mod mutation;
pub mod paginate;
pub mod query;
pub mod relations;
pub mod schema;
pub mod subquery;

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use attributes::AttributeStore;
pub use backend::{Attributes, DatabaseBackend, Dialect, InsertResult, QueryResult, QueryRow};
pub use builder::{
    AggregateFunc, ComparisonOp, Condition, DeleteBuilder, InsertBuilder, JoinType, LogicalOp,
    SelectBuilder, SortDirection, UpdateBuilder,
};
pub use config::OrmConfig;
pub use database::Database;
pub use error::{OrmError, Result};
pub use events::{ChannelSink, Event, EventBus, EventSink, MemorySink, NullSink};
pub use ids::{IdGenerator, UuidV7};
pub use model::{Entity, Model};
pub use mutation::{Assignment, MutationPipeline};
pub use paginate::{Page, PageMode, PaginateOptions, Paging};
pub use query::Query;
pub use schema::{Cardinality, ColumnDef, ModelSchema, ModelSchemaBuilder, RelationDef, SqlType};
pub use subquery::ConditionRecorder;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{Attributes, DatabaseBackend};
    pub use crate::config::OrmConfig;
    pub use crate::database::Database;
    pub use crate::entity;
    pub use crate::error::{OrmError, Result};
    pub use crate::events::{EventSink, MemorySink};
    pub use crate::model::{Entity, Model};
    pub use crate::paginate::{Page, PaginateOptions};
    pub use crate::schema::{ModelSchema, RelationDef, SqlType};
    pub use crate::subquery::ConditionRecorder;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PostgresBackend;

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::SqliteBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _config = OrmConfig::default();
        let _sql_type = SqlType::Text;
        let _comp_op = ComparisonOp::Eq;
        let _log_op = LogicalOp::And;
        let _mode = PageMode::Page(1);
    }
}
