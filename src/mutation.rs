//! Create / update / delete with mass-assignment filtering, setter hooks,
//! id and timestamp injection, re-read after write and lifecycle events.
//!
//! There is no transaction around a write and its re-read. A row deleted
//! concurrently in between surfaces as [`OrmError::Integrity`] even though
//! the write itself went through.

use crate::attributes::AttributeStore;
use crate::backend::{Attributes, DatabaseBackend};
use crate::builder::{is_valid_identifier, DeleteBuilder, InsertBuilder, SelectBuilder, UpdateBuilder};
use crate::database::Database;
use crate::error::{OrmError, Result};
use crate::hydrate::{hydrate, split};
use crate::model::{Entity, Model};
use crate::schema::{CREATED_AT, DELETED_AT, UPDATED_AT, UUID};
use chrono::Utc;
use serde_json::Value;
use std::marker::PhantomData;

const MUTATION_TARGET: &str = "tx2_orm::mutation";

/// Whether input goes through the fillable/guarded filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// Keep only `fillable \ guarded` keys, silently dropping the rest
    Filtered,
    /// Pass input through as given
    Forced,
}

/// Current UTC time in the storage timestamp format
pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Mutation input must be a JSON object
pub fn as_input(value: Value) -> Result<Attributes> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Attributes::new()),
        other => Err(OrmError::Query(format!(
            "mutation input must be an object, got {}",
            other
        ))),
    }
}

pub struct MutationPipeline<'a, E: Entity, B: DatabaseBackend> {
    db: &'a Database<B>,
    entity: PhantomData<E>,
}

impl<'a, E: Entity, B: DatabaseBackend> MutationPipeline<'a, E, B> {
    pub fn new(db: &'a Database<B>) -> Self {
        Self {
            db,
            entity: PhantomData,
        }
    }

    /// Insert one row and return it as re-read from storage
    pub async fn create(&self, input: &Attributes, assignment: Assignment) -> Result<Model<E>> {
        let schema = E::schema();
        let mut attributes = self.prepare(input, assignment).await?;
        attributes.remove(schema.primary_key());

        if schema.uses_uuid() {
            attributes.insert(UUID.to_string(), Value::String(self.db.generate_id()));
        }
        if schema.timestamps() {
            let now = Value::String(now_timestamp());
            attributes
                .entry(CREATED_AT.to_string())
                .or_insert_with(|| now.clone());
            attributes.insert(UPDATED_AT.to_string(), now);
        }

        let sql = InsertBuilder::new(schema.table()).row(attributes).build()?;
        let inserted = self.db.insert(&sql, schema.primary_key()).await?;
        let id = inserted.last_insert_id.ok_or_else(|| {
            OrmError::Integrity(format!("insert into {} reported no primary key", schema.table()))
        })?;

        let row = self.reread(id, "insert").await?;
        tracing::info!(target: MUTATION_TARGET, table = schema.table(), id, "created");
        self.db
            .dispatch(schema.event_name("created"), Value::Object(row.clone()));

        let mut model = hydrate(row);
        let declared = model.attributes().clone();
        let mut store = AttributeStore::new();
        store.sync_persisted(declared);
        model.replace_store(store);
        Ok(model)
    }

    /// Update the instance's row and re-sync it in place. `Ok(false)`
    /// without touching storage when the instance has no primary key.
    pub async fn update(
        &self,
        model: &mut Model<E>,
        input: &Attributes,
        assignment: Assignment,
    ) -> Result<bool> {
        let schema = E::schema();
        let Some(id) = model.id() else {
            return Ok(false);
        };

        let mut attributes = self.prepare(input, assignment).await?;
        attributes.remove(schema.primary_key());
        if schema.timestamps() {
            attributes.insert(UPDATED_AT.to_string(), Value::String(now_timestamp()));
        }
        if attributes.is_empty() {
            return Ok(true);
        }

        let sql = UpdateBuilder::new(schema.table())
            .set_attributes(&attributes)
            .where_eq(schema.primary_key(), Value::from(id))
            .build()?;
        self.db.execute(&sql).await?;

        let row = self.reread(id, "update").await?;
        tracing::info!(target: MUTATION_TARGET, table = schema.table(), id, "updated");
        self.db
            .dispatch(schema.event_name("updated"), Value::Object(row.clone()));

        self.resync(model, row);
        Ok(true)
    }

    /// Soft delete (set `deleted_at`) or physical delete, by schema. Returns
    /// the affected row count; an unsaved instance affects nothing.
    pub async fn delete(&self, model: &mut Model<E>) -> Result<u64> {
        let schema = E::schema();
        let Some(id) = model.id() else {
            return Ok(0);
        };

        let before = self.db.fetch_optional(&self.select_by_id(id)).await?;

        let affected = if schema.soft_deletes() {
            let now = Value::String(now_timestamp());
            let sql = UpdateBuilder::new(schema.table())
                .set(DELETED_AT, now.clone())
                .where_eq(schema.primary_key(), Value::from(id))
                .build()?;
            let affected = self.db.execute(&sql).await?;
            if let Some(mut retired) = before.clone() {
                retired.insert(DELETED_AT.to_string(), now);
                self.resync(model, retired);
            }
            affected
        } else {
            let sql = DeleteBuilder::new(schema.table())
                .where_eq(schema.primary_key(), Value::from(id))
                .build()?;
            self.db.execute(&sql).await?
        };

        tracing::info!(
            target: MUTATION_TARGET,
            table = schema.table(),
            id,
            soft = schema.soft_deletes(),
            affected,
            "deleted"
        );
        if let Some(row) = before {
            self.db.dispatch(schema.event_name("deleted"), Value::Object(row));
        }
        Ok(affected)
    }

    /// Batch INSERT, one statement per distinct column set. Each input is
    /// filtered on its own and gets its own uuid; no hooks, no re-read, no
    /// events.
    pub async fn create_many(&self, inputs: &[Attributes]) -> Result<u64> {
        let schema = E::schema();
        if inputs.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        let rows: Vec<Attributes> = inputs
            .iter()
            .map(|input| {
                let mut row = schema.filter_fillable(input);
                if schema.uses_uuid() {
                    row.insert(UUID.to_string(), Value::String(self.db.generate_id()));
                }
                if schema.timestamps() {
                    row.insert(CREATED_AT.to_string(), Value::String(now.clone()));
                    row.insert(UPDATED_AT.to_string(), Value::String(now.clone()));
                }
                row
            })
            .collect();

        let mut affected = 0;
        for sql in InsertBuilder::new(schema.table()).rows(rows).build_batches()? {
            affected += self.db.execute(&sql).await?;
        }
        tracing::info!(target: MUTATION_TARGET, table = schema.table(), affected, "batch created");
        Ok(affected)
    }

    /// Physical delete by primary key, regardless of soft deletes.
    /// Dispatches `deleted` with the removed row when there was one.
    pub async fn remove(&self, id: i64) -> Result<u64> {
        let schema = E::schema();
        let before = self.db.fetch_optional(&self.select_by_id(id)).await?;
        let sql = DeleteBuilder::new(schema.table())
            .where_eq(schema.primary_key(), Value::from(id))
            .build()?;
        let affected = self.db.execute(&sql).await?;
        tracing::info!(target: MUTATION_TARGET, table = schema.table(), id, affected, "removed");
        if let Some(row) = before {
            self.db.dispatch(schema.event_name("deleted"), Value::Object(row));
        }
        Ok(affected)
    }

    /// Filter (unless forced), then run setter hooks in declaration order
    async fn prepare(&self, input: &Attributes, assignment: Assignment) -> Result<Attributes> {
        let schema = E::schema();
        let mut attributes = match assignment {
            Assignment::Filtered => schema.filter_fillable(input),
            Assignment::Forced => {
                if let Some(bad) = input.keys().find(|key| !is_valid_identifier(key)) {
                    return Err(OrmError::Query(format!("invalid column '{}'", bad)));
                }
                input.clone()
            }
        };

        for hook in schema.setters() {
            let value = hook.setter.set(&attributes).await.map_err(|err| match err {
                OrmError::Hook(_) => err,
                other => OrmError::Hook(format!("setter for '{}': {}", hook.column, other)),
            })?;
            attributes.insert(hook.column.clone(), value);
        }

        Ok(attributes)
    }

    async fn reread(&self, id: i64, after: &str) -> Result<Attributes> {
        let schema = E::schema();
        self.db
            .fetch_optional(&self.select_by_id(id))
            .await?
            .ok_or_else(|| {
                tracing::error!(target: MUTATION_TARGET, table = schema.table(), id, "row vanished after {}", after);
                OrmError::Integrity(format!(
                    "failed to retrieve {} {} after {}",
                    schema.name(),
                    id,
                    after
                ))
            })
    }

    fn select_by_id(&self, id: i64) -> String {
        let schema = E::schema();
        SelectBuilder::new(schema.table())
            .where_eq(schema.primary_key(), Value::from(id))
            .limit(1)
            .render()
    }

    /// Refresh an instance from a persisted row; loaded relations are kept
    fn resync(&self, model: &mut Model<E>, row: Attributes) {
        let parts = split(E::schema(), row);
        model.sync_persisted(parts.declared, parts.passthrough);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{attrs, MockBackend};
    use crate::events::MemorySink;
    use crate::schema::{ModelSchema, SqlType};
    use serde_json::json;
    use std::sync::Arc;

    crate::entity! {
        struct Card => CardModel {
            ModelSchema::builder("Card", "cards")
                .column("brand", SqlType::Text)
                .column("last_four", SqlType::Text)
                .nullable_column("owner_id", SqlType::BigInt)
                .fillable(&["brand", "last_four", "owner_id"])
                .guarded(&["owner_id"])
                .uuid()
                .setter("last_four", |attrs: &Attributes| -> Result<Value> {
                    let digits = attrs
                        .get("last_four")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Ok(Value::String(digits[digits.len().saturating_sub(4)..].to_string()))
                })
                .build()
        }
    }

    #[test]
    fn test_as_input_requires_object() {
        assert!(as_input(json!({"brand": "visa"})).is_ok());
        assert!(as_input(Value::Null).unwrap().is_empty());
        assert!(as_input(json!([1, 2])).is_err());
    }

    #[test]
    fn test_timestamp_format() {
        let now = now_timestamp();
        assert_eq!(now.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(&now, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn test_prepare_filters_then_runs_setters() {
        let db = Database::new(MockBackend::new());
        let pipeline = MutationPipeline::<Card, _>::new(&db);

        let prepared = pipeline
            .prepare(
                &attrs(json!({"brand": "visa", "last_four": "4111111111111111", "owner_id": 9, "admin": true})),
                Assignment::Filtered,
            )
            .await
            .unwrap();

        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared["last_four"], json!("1111"));
        assert!(!prepared.contains_key("owner_id"));
        assert!(!prepared.contains_key("admin"));
    }

    #[tokio::test]
    async fn test_forced_input_rejects_bad_column_names() {
        let db = Database::new(MockBackend::new());
        let pipeline = MutationPipeline::<Card, _>::new(&db);

        let err = pipeline
            .prepare(&attrs(json!({"brand) VALUES (1); --": 1})), Assignment::Forced)
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
    }

    #[tokio::test]
    async fn test_create_reports_integrity_error_when_reread_is_empty() {
        let backend = MockBackend::new();
        let (log, _results) = backend.handles();
        let db = Database::new(backend);

        let err = CardModel::create(&db, json!({"brand": "visa", "last_four": "4242"}))
            .await
            .unwrap_err();

        assert!(matches!(err, OrmError::Integrity(_)));
        assert_eq!(err.status(), 500);
        let log = log.lock().unwrap();
        assert!(log[0].starts_with("INSERT INTO cards"));
        assert!(log[0].contains("uuid"));
        assert_eq!(log[1], "SELECT * FROM cards WHERE id = 1 LIMIT 1");
    }

    #[tokio::test]
    async fn test_update_on_unsaved_instance_is_a_noop() {
        let backend = MockBackend::new();
        let (log, _results) = backend.handles();
        let db = Database::new(backend);

        let mut card = CardModel::new();
        let updated = card.update(&db, json!({"brand": "amex"})).await.unwrap();

        assert!(!updated);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_many_is_one_statement() {
        let backend = MockBackend::new();
        let (log, _results) = backend.handles();
        let db = Database::new(backend);

        CardModel::create_many(
            &db,
            vec![
                json!({"brand": "visa", "last_four": "1111", "owner_id": 3}),
                json!({"brand": "amex", "last_four": "2222"}),
            ],
        )
        .await
        .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(!log[0].contains("owner_id"));
        assert_eq!(log[0].matches("'visa'").count() + log[0].matches("'amex'").count(), 2);
    }

    #[tokio::test]
    async fn test_create_many_splits_rows_by_column_set() {
        let backend = MockBackend::new();
        let (log, _results) = backend.handles();
        let db = Database::new(backend);

        let written = CardModel::create_many(
            &db,
            vec![
                json!({"brand": "visa", "last_four": "1111"}),
                json!({"brand": "amex"}),
                json!({"brand": "mc", "last_four": "3333"}),
            ],
        )
        .await
        .unwrap();

        assert_eq!(written, 2);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].contains("'visa'") && log[0].contains("'mc'"));
        assert!(log[1].contains("'amex'"));
        assert!(!log[1].contains("last_four"));
        assert!(!log.iter().any(|sql| sql.contains("NULL")));
    }

    #[tokio::test]
    async fn test_remove_dispatches_deleted_for_existing_row() {
        let backend = MockBackend::new();
        let (log, results) = backend.handles();
        results
            .lock()
            .unwrap()
            .push_back(vec![attrs(json!({"id": 3, "brand": "visa"}))]);
        let sink = Arc::new(MemorySink::new());
        let db = Database::new(backend).with_events(sink.clone());

        assert_eq!(CardModel::remove(&db, 3).await.unwrap(), 1);
        assert_eq!(CardModel::remove(&db, 4).await.unwrap(), 1);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "card:deleted");
        assert_eq!(events[0].payload["id"], json!(3));

        let log = log.lock().unwrap();
        assert_eq!(log[0], "SELECT * FROM cards WHERE id = 3 LIMIT 1");
        assert_eq!(log[1], "DELETE FROM cards WHERE id = 3");
    }
}
