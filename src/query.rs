//! Fluent query over one entity's table.
//!
//! Chained calls only accumulate state. Problems found while chaining
//! (bad identifiers, unknown operators or relations, rejected subquery
//! conditions) are kept on the query and returned by the terminal call
//! before any statement is sent.

use crate::backend::{Attributes, DatabaseBackend};
use crate::builder::{
    is_valid_identifier, AggregateFunc, ComparisonOp, Condition, DeleteBuilder, JoinType,
    LogicalOp, SelectBuilder, SortDirection, UpdateBuilder,
};
use crate::database::Database;
use crate::error::{OrmError, Result};
use crate::hydrate::hydrate_all;
use crate::model::{Entity, Model};
use crate::mutation::{as_input, now_timestamp};
use crate::paginate::{
    check_limit, page_offset, split_lookahead, total_pages, Page, PageMode, PaginateOptions,
    Paging,
};
use crate::relations::load_relations;
use crate::schema::{CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::subquery::{relation_subquery, table_subquery, ConditionRecorder};
use serde_json::Value;
use std::marker::PhantomData;

const AGGREGATE_ALIAS: &str = "aggregate";

pub struct Query<'a, E: Entity, B: DatabaseBackend> {
    db: &'a Database<B>,
    select: SelectBuilder,
    with: Vec<String>,
    error: Option<OrmError>,
    entity: PhantomData<E>,
}

impl<'a, E: Entity, B: DatabaseBackend> Query<'a, E, B> {
    pub fn new(db: &'a Database<B>) -> Self {
        Self {
            db,
            select: SelectBuilder::new(E::schema().table()).dialect(db.dialect()),
            with: Vec::new(),
            error: None,
            entity: PhantomData,
        }
    }

    /// Restrict the selected columns
    pub fn select(mut self, columns: &[&str]) -> Self {
        if let Some(bad) = columns.iter().find(|c| !is_valid_identifier(c)) {
            return self.fail(OrmError::Query(format!("invalid column '{}'", bad)));
        }
        self.select = self.select.select(columns.to_vec());
        self
    }

    /// `column = value`
    pub fn where_(self, column: &str, value: impl Into<Value>) -> Self {
        self.where_op(column, "=", value)
    }

    /// `column <op> value` with a textual operator
    pub fn where_op(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match comparison(column, op, value) {
            Ok(condition) => self.and(condition),
            Err(err) => self.fail(err),
        }
    }

    /// OR together `column = value` pairs and AND the group onto the query
    pub fn or_where(self, pairs: &[(&str, Value)]) -> Self {
        let mut conditions = Vec::with_capacity(pairs.len());
        for (column, value) in pairs {
            match comparison(column, "=", value.clone()) {
                Ok(condition) => conditions.push((LogicalOp::Or, condition)),
                Err(err) => return self.fail(err),
            }
        }
        match Condition::fold(conditions) {
            Some(group) => self.and(group),
            None => self,
        }
    }

    pub fn where_in(self, column: &str, values: Vec<Value>) -> Self {
        self.where_op(column, "in", Value::Array(values))
    }

    pub fn where_not_in(self, column: &str, values: Vec<Value>) -> Self {
        self.where_op(column, "not in", Value::Array(values))
    }

    pub fn where_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.between(column, low.into(), high.into(), false)
    }

    pub fn where_not_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.between(column, low.into(), high.into(), true)
    }

    pub fn where_null(self, column: &str) -> Self {
        self.where_op(column, "is null", Value::Null)
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.where_op(column, "is not null", Value::Null)
    }

    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.where_op(column, "like", pattern)
    }

    /// Column-to-column comparison
    pub fn where_column(self, left: &str, op: &str, right: &str) -> Self {
        match column_comparison(left, op, right) {
            Ok(condition) => self.and(condition),
            Err(err) => self.fail(err),
        }
    }

    /// Compare against a column of an enclosing query
    pub fn where_ref(self, column: &str, op: &str, reference: &str) -> Self {
        self.where_column(column, op, reference)
    }

    /// Raw SQL predicate, spliced as given
    pub fn where_raw(self, sql: &str) -> Self {
        self.and(Condition::Raw(format!("({})", sql)))
    }

    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        if !is_valid_identifier(column) {
            return self.fail(OrmError::Query(format!("invalid column '{}'", column)));
        }
        match direction.parse::<SortDirection>() {
            Ok(direction) => {
                self.select = self.select.order_by(column, direction);
                self
            }
            Err(err) => self.fail(err),
        }
    }

    pub fn order_by_asc(self, column: &str) -> Self {
        self.order_by(column, "asc")
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, "desc")
    }

    /// Newest first by `created_at`, or by primary key without timestamps
    pub fn latest(self) -> Self {
        let column = creation_column::<E>();
        self.order_by_desc(column)
    }

    pub fn oldest(self) -> Self {
        let column = creation_column::<E>();
        self.order_by_asc(column)
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        if let Some(bad) = columns.iter().find(|c| !is_valid_identifier(c)) {
            return self.fail(OrmError::Query(format!("invalid column '{}'", bad)));
        }
        self.select = self.select.group_by(columns.to_vec());
        self
    }

    pub fn having(mut self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        match comparison(column, op, value.into()) {
            Ok(condition) => {
                self.select = self.select.having(condition);
                self
            }
            Err(err) => self.fail(err),
        }
    }

    pub fn in_random_order(mut self) -> Self {
        self.select = self.select.order_random();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.select = self.select.distinct();
        self
    }

    /// Distinct values of one column
    pub fn distinct_on(self, column: &str) -> Self {
        self.select(&[column]).distinct()
    }

    /// Inner join on `first <op> second`
    pub fn join(self, table: &str, first: &str, op: &str, second: &str) -> Self {
        self.join_as(JoinType::Inner, table, first, op, second)
    }

    /// Left join on `first <op> second`
    pub fn left_join(self, table: &str, first: &str, op: &str, second: &str) -> Self {
        self.join_as(JoinType::Left, table, first, op, second)
    }

    /// Offset
    pub fn skip(mut self, count: usize) -> Self {
        self.select = self.select.offset(count);
        self
    }

    /// Limit
    pub fn take(mut self, count: usize) -> Self {
        self.select = self.select.limit(count);
        self
    }

    /// Apply `callback` only when `condition` holds
    pub fn when<F>(self, condition: bool, callback: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        if condition {
            callback(self)
        } else {
            self
        }
    }

    /// Eager load relations on terminal reads
    pub fn with(mut self, relations: &[&str]) -> Self {
        let schema = E::schema();
        for name in relations {
            if schema.relation(name).is_none() {
                return self.fail(OrmError::Relation(format!(
                    "{} has no relation '{}'",
                    schema.name(),
                    name
                )));
            }
            if !self.with.iter().any(|w| w == name) {
                self.with.push(name.to_string());
            }
        }
        self
    }

    /// Rows with at least one related row
    pub fn has(self, relation: &str) -> Self {
        self.relation_exists(relation, false, |_| {})
    }

    /// Rows with no related row
    pub fn doesnt_have(self, relation: &str) -> Self {
        self.relation_exists(relation, true, |_| {})
    }

    /// Rows with at least one related row matching the recorded conditions
    pub fn where_has<F>(self, relation: &str, callback: F) -> Self
    where
        F: FnOnce(&mut ConditionRecorder),
    {
        self.relation_exists(relation, false, callback)
    }

    /// Rows with no related row matching the recorded conditions
    pub fn where_doesnt_have<F>(self, relation: &str, callback: F) -> Self
    where
        F: FnOnce(&mut ConditionRecorder),
    {
        self.relation_exists(relation, true, callback)
    }

    /// `EXISTS (SELECT 1 FROM <table> WHERE ...)`; correlate with `where_ref`
    pub fn where_exists<F>(self, table: &str, callback: F) -> Self
    where
        F: FnOnce(&mut ConditionRecorder),
    {
        let mut recorder = ConditionRecorder::new();
        callback(&mut recorder);
        match table_subquery(table, recorder) {
            Ok(subquery) => self.and(Condition::Exists {
                subquery: Box::new(subquery),
                negated: false,
            }),
            Err(err) => self.fail(err),
        }
    }

    /// The SELECT this query would run
    pub fn to_sql(mut self) -> Result<String> {
        self.check()?;
        Ok(self.select.render())
    }

    /// All matching rows, with eager loading applied
    pub async fn get(mut self) -> Result<Vec<Model<E>>> {
        self.check()?;
        let sql = self.select.render();
        let rows = self.db.fetch_all(&sql).await?;
        self.materialize(rows).await
    }

    pub async fn first(mut self) -> Result<Option<Model<E>>> {
        self.select = self.select.limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    pub async fn first_or_fail(self) -> Result<Model<E>> {
        let model = E::schema().name().to_string();
        self.first()
            .await?
            .ok_or_else(|| OrmError::not_found(model, "query"))
    }

    /// Highest primary key among the matches
    pub async fn last(mut self) -> Result<Option<Model<E>>> {
        let pk = E::schema().primary_key();
        self.select = self.select.clear_order().order_desc(pk).limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    pub async fn find(self, id: i64) -> Result<Option<Model<E>>> {
        let pk = E::schema().primary_key();
        self.where_(pk, id).first().await
    }

    pub async fn find_or_fail(self, id: i64) -> Result<Model<E>> {
        let model = E::schema().name().to_string();
        self.find(id)
            .await?
            .ok_or_else(|| OrmError::not_found(model, format!("id {}", id)))
    }

    pub async fn find_many(self, ids: &[i64]) -> Result<Vec<Model<E>>> {
        let pk = E::schema().primary_key();
        let ids = ids.iter().map(|id| Value::from(*id)).collect();
        self.where_in(pk, ids).get().await
    }

    pub async fn count(self) -> Result<u64> {
        let value = self.aggregate(AggregateFunc::Count, "*").await?;
        Ok(value.and_then(|v| v.as_u64()).unwrap_or(0))
    }

    pub async fn max(self, column: &str) -> Result<Option<Value>> {
        self.aggregate(AggregateFunc::Max, column).await
    }

    pub async fn min(self, column: &str) -> Result<Option<Value>> {
        self.aggregate(AggregateFunc::Min, column).await
    }

    /// `None` when nothing matched
    pub async fn avg(self, column: &str) -> Result<Option<f64>> {
        let value = self.aggregate(AggregateFunc::Avg, column).await?;
        Ok(value.and_then(|v| v.as_f64()))
    }

    /// Zero when nothing matched
    pub async fn sum(self, column: &str) -> Result<f64> {
        let value = self.aggregate(AggregateFunc::Sum, column).await?;
        Ok(value.and_then(|v| v.as_f64()).unwrap_or(0.0))
    }

    /// One column of every matching row
    pub async fn pluck(self, column: &str) -> Result<Vec<Value>> {
        let mut query = self.select(&[column]);
        query.check()?;
        let rows = query.db.fetch_all(&query.select.render()).await?;
        let key = column.rsplit('.').next().unwrap_or(column);
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(key).unwrap_or(Value::Null))
            .collect())
    }

    pub async fn exists(self) -> Result<bool> {
        let pk = E::schema().primary_key();
        let mut query = self.select(&[pk]).take(1);
        query.check()?;
        Ok(query
            .db
            .fetch_optional(&query.select.render())
            .await?
            .is_some())
    }

    /// Walk the matches in batches of `size`, ordered by primary key unless
    /// an order was given. Stops after the first short batch.
    pub async fn chunk<F>(mut self, size: usize, mut callback: F) -> Result<()>
    where
        F: FnMut(Vec<Model<E>>) -> Result<()>,
    {
        self.check()?;
        let size = check_limit(size)?;
        if !self.select.has_order() {
            self.select = self.select.order_asc(E::schema().primary_key());
        }

        let mut offset = 0;
        loop {
            let sql = self.select.clone().limit(size).offset(offset).render();
            let rows = self.db.fetch_all(&sql).await?;
            let fetched = rows.len();
            if fetched == 0 {
                break;
            }
            callback(self.materialize(rows).await?)?;
            if fetched < size {
                break;
            }
            offset += size;
        }
        Ok(())
    }

    /// [`chunk`](Self::chunk) with the configured batch size
    pub async fn each<F>(self, callback: F) -> Result<()>
    where
        F: FnMut(Vec<Model<E>>) -> Result<()>,
    {
        let size = self.db.config().chunk_size;
        self.chunk(size, callback).await
    }

    /// Count, then fetch `limit + 1` rows ordered by primary key
    pub async fn paginate(mut self, options: PaginateOptions) -> Result<Page<Model<E>>> {
        self.check()?;
        let pk = E::schema().primary_key();
        let limit = check_limit(options.limit.unwrap_or(self.db.config().default_page_size))?;

        let total_records = self.count_matches().await?;

        let mut select = self.select.clone().clear_order().order_asc(pk).limit(limit + 1);
        let page = match &options.mode {
            PageMode::Page(page) => {
                select = select.offset(page_offset(*page, limit));
                (*page).max(1)
            }
            PageMode::After(cursor) => {
                let before = self
                    .select
                    .clone()
                    .and_where(Condition::simple(pk, ComparisonOp::Lt, Some(cursor.clone())))
                    .aggregate_query(AggregateFunc::Count, "*", AGGREGATE_ALIAS);
                let preceding = self
                    .db
                    .fetch_scalar(&before.render())
                    .await?
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                select = select.and_where(Condition::simple(pk, ComparisonOp::Ge, Some(cursor.clone())));
                (preceding / limit as u64) as usize + 1
            }
        };

        let rows = self.db.fetch_all(&select.render()).await?;
        let (rows, next_cursor) = split_lookahead(rows, limit, pk);

        Ok(Page {
            data: self.materialize(rows).await?,
            paging: Paging {
                total_records,
                page,
                total_pages: total_pages(total_records, limit),
            },
            next_cursor,
        })
    }

    /// Bulk update of every matching row. Input is mass-assignment
    /// filtered and `updated_at` is refreshed; no re-read, no events.
    pub async fn update(mut self, values: Value) -> Result<u64> {
        self.check()?;
        let schema = E::schema();
        let input = as_input(values)?;
        let mut attributes = schema.filter_fillable(&input);
        if schema.timestamps() {
            attributes.insert(UPDATED_AT.to_string(), Value::String(now_timestamp()));
        }
        if attributes.is_empty() {
            return Ok(0);
        }

        let mut update = UpdateBuilder::new(schema.table()).set_attributes(&attributes);
        if let Some(condition) = self.select.where_condition() {
            update = update.where_clause(condition.clone());
        }
        let affected = self.db.execute(&update.build()?).await?;
        tracing::info!(target: "tx2_orm::mutation", table = schema.table(), affected, "bulk update");
        Ok(affected)
    }

    /// Bulk delete of every matching row; soft-deleting entities get
    /// `deleted_at` set instead
    pub async fn delete(mut self) -> Result<u64> {
        self.check()?;
        let schema = E::schema();
        let condition = self.select.where_condition().cloned();

        let sql = if schema.soft_deletes() {
            let mut update = UpdateBuilder::new(schema.table())
                .set(DELETED_AT, Value::String(now_timestamp()));
            if let Some(condition) = condition {
                update = update.where_clause(condition);
            }
            update.build()?
        } else {
            let mut delete = DeleteBuilder::new(schema.table());
            if let Some(condition) = condition {
                delete = delete.where_clause(condition);
            }
            delete.build()?
        };

        let affected = self.db.execute(&sql).await?;
        tracing::info!(target: "tx2_orm::mutation", table = schema.table(), affected, "bulk delete");
        Ok(affected)
    }

    async fn aggregate(mut self, func: AggregateFunc, column: &str) -> Result<Option<Value>> {
        self.check()?;
        if !is_valid_identifier(column) {
            return Err(OrmError::Query(format!("invalid column '{}'", column)));
        }
        let sql = self
            .select
            .aggregate_query(func, column, AGGREGATE_ALIAS)
            .render();
        self.db.fetch_scalar(&sql).await
    }

    async fn count_matches(&self) -> Result<u64> {
        let sql = self
            .select
            .aggregate_query(AggregateFunc::Count, "*", AGGREGATE_ALIAS)
            .render();
        Ok(self
            .db
            .fetch_scalar(&sql)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    async fn materialize(&self, mut rows: Vec<Attributes>) -> Result<Vec<Model<E>>> {
        if !self.with.is_empty() {
            load_relations(self.db, E::schema(), &mut rows, &self.with).await?;
        }
        Ok(hydrate_all(rows))
    }

    fn relation_exists<F>(self, relation: &str, negated: bool, callback: F) -> Self
    where
        F: FnOnce(&mut ConditionRecorder),
    {
        let schema = E::schema();
        let Some(definition) = schema.relation(relation) else {
            return self.fail(OrmError::Relation(format!(
                "{} has no relation '{}'",
                schema.name(),
                relation
            )));
        };

        let mut recorder = ConditionRecorder::new();
        callback(&mut recorder);
        match relation_subquery(schema, definition, recorder) {
            Ok(subquery) => self.and(Condition::Exists {
                subquery: Box::new(subquery),
                negated,
            }),
            Err(err) => self.fail(err),
        }
    }

    fn join_as(mut self, join_type: JoinType, table: &str, first: &str, op: &str, second: &str) -> Self {
        if !is_valid_identifier(table) || table == "*" {
            return self.fail(OrmError::Query(format!("invalid table '{}'", table)));
        }
        match column_comparison(first, op, second) {
            Ok(on) => {
                self.select = self.select.join(join_type, table, on);
                self
            }
            Err(err) => self.fail(err),
        }
    }

    fn between(self, column: &str, low: Value, high: Value, negated: bool) -> Self {
        if !is_valid_identifier(column) || column == "*" {
            return self.fail(OrmError::Query(format!("invalid column '{}'", column)));
        }
        self.and(Condition::Between {
            column: column.to_string(),
            low,
            high,
            negated,
        })
    }

    fn and(mut self, condition: Condition) -> Self {
        self.select = self.select.and_where(condition);
        self
    }

    fn fail(mut self, err: OrmError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    fn check(&mut self) -> Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn creation_column<E: Entity>() -> &'static str {
    let schema = E::schema();
    if schema.has_column(CREATED_AT) {
        CREATED_AT
    } else {
        schema.primary_key()
    }
}

/// Build `column <op> value`, rejecting what cannot be expressed
pub(crate) fn comparison(column: &str, op: &str, value: Value) -> Result<Condition> {
    if !is_valid_identifier(column) || column == "*" {
        return Err(OrmError::Query(format!("invalid column '{}'", column)));
    }
    let op = op.parse::<ComparisonOp>()?;
    if op.takes_list() && !value.is_array() {
        return Err(OrmError::UnsupportedCondition(format!(
            "'{}' on {} needs a list of values",
            op, column
        )));
    }
    let value = if op.is_unary() { None } else { Some(value) };
    Ok(Condition::simple(column, op, value))
}

fn column_comparison(left: &str, op: &str, right: &str) -> Result<Condition> {
    for column in [left, right] {
        if !is_valid_identifier(column) || column == "*" {
            return Err(OrmError::Query(format!("invalid column '{}'", column)));
        }
    }
    let op = op.parse::<ComparisonOp>()?;
    if op.takes_list() || op.is_unary() {
        return Err(OrmError::UnsupportedCondition(format!(
            "'{}' cannot compare two columns",
            op
        )));
    }
    Ok(Condition::Column {
        left: left.to_string(),
        op,
        right: right.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{attrs, MockBackend};
    use crate::schema::{ModelSchema, RelationDef, SqlType};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    crate::entity! {
        struct Post => PostModel {
            ModelSchema::builder("Post", "posts")
                .column("title", SqlType::Text)
                .column("status", SqlType::Text)
                .column("views", SqlType::Integer)
                .nullable_column("author_id", SqlType::BigInt)
                .fillable(&["title", "status", "views", "author_id"])
                .relation(RelationDef::belongs_to("author", "authors"))
                .relation(RelationDef::has_many("comments", "comments"))
                .soft_deletes()
                .build()
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn database(results: Vec<Vec<Value>>) -> (Database<MockBackend>, Log) {
        let backend = MockBackend::new();
        let (log, queue) = backend.handles();
        *queue.lock().unwrap() = results
            .into_iter()
            .map(|rows| rows.into_iter().map(attrs).collect())
            .collect::<VecDeque<_>>();
        (Database::new(backend), log)
    }

    fn ids(range: std::ops::RangeInclusive<i64>) -> Vec<Value> {
        range.map(|id| json!({"id": id})).collect()
    }

    #[tokio::test]
    async fn test_paginate_counts_then_fetches_lookahead_row() {
        let (db, log) = database(vec![vec![json!({"aggregate": 11})], ids(1..=11)]);

        let page = PostModel::where_(&db, "status", "draft")
            .order_by_desc("title")
            .paginate(PaginateOptions::page(1, 10))
            .await
            .unwrap();

        assert_eq!(page.data.len(), 10);
        assert_eq!(page.next_cursor, Some(json!(11)));
        assert_eq!(
            page.paging,
            Paging {
                total_records: 11,
                page: 1,
                total_pages: 2
            }
        );

        let log = log.lock().unwrap();
        assert_eq!(log[0], "SELECT COUNT(*) AS aggregate FROM posts WHERE status = 'draft'");
        assert_eq!(
            log[1],
            "SELECT * FROM posts WHERE status = 'draft' ORDER BY id ASC LIMIT 11 OFFSET 0"
        );
    }

    #[tokio::test]
    async fn test_paginate_after_cursor_derives_page_number() {
        let (db, log) = database(vec![
            vec![json!({"aggregate": 11})],
            vec![json!({"aggregate": 10})],
            ids(11..=11),
        ]);

        let page = PostModel::query(&db)
            .paginate(PaginateOptions::after(11, 10))
            .await
            .unwrap();

        assert_eq!(page.data.len(), 1);
        assert_eq!(page.paging.page, 2);
        assert!(!page.has_more());

        let log = log.lock().unwrap();
        assert_eq!(log[1], "SELECT COUNT(*) AS aggregate FROM posts WHERE id < 11");
        assert_eq!(log[2], "SELECT * FROM posts WHERE id >= 11 ORDER BY id ASC LIMIT 11");
    }

    #[tokio::test]
    async fn test_paginate_uses_configured_page_size() {
        let (db, log) = database(vec![vec![json!({"aggregate": 0})], vec![]]);

        let page = PostModel::paginate(&db, PaginateOptions::default()).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.paging.total_pages, 0);
        assert!(log.lock().unwrap()[1].ends_with("LIMIT 11 OFFSET 0"));

        let err = PostModel::paginate(&db, PaginateOptions::page(1, 0)).await.unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
    }

    #[tokio::test]
    async fn test_chunk_stops_after_short_batch() {
        let (db, log) = database(vec![ids(1..=2), ids(3..=3)]);

        let mut sizes = Vec::new();
        PostModel::chunk(&db, 2, |batch| {
            sizes.push(batch.len());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(sizes, vec![2, 1]);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], "SELECT * FROM posts ORDER BY id ASC LIMIT 2 OFFSET 0");
        assert_eq!(log[1], "SELECT * FROM posts ORDER BY id ASC LIMIT 2 OFFSET 2");
    }

    #[tokio::test]
    async fn test_chunk_callback_error_stops_iteration() {
        let (db, log) = database(vec![ids(1..=2), ids(3..=4)]);

        let err = PostModel::chunk(&db, 2, |_| Err(OrmError::Hook("stop".to_string())))
            .await
            .unwrap_err();

        assert!(matches!(err, OrmError::Hook(_)));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_eager_loads_belongs_to() {
        let (db, log) = database(vec![
            vec![
                json!({"id": 1, "author_id": 7}),
                json!({"id": 2, "author_id": null}),
            ],
            vec![json!({"id": 7, "name": "Ada"})],
        ]);

        let posts = PostModel::with(&db, &["author"]).get().await.unwrap();

        assert_eq!(posts[0].relation("author"), Some(&json!({"id": 7, "name": "Ada"})));
        assert_eq!(posts[1].relation("author"), Some(&Value::Null));
        assert_eq!(log.lock().unwrap()[1], "SELECT * FROM authors WHERE id IN (7)");
    }

    #[tokio::test]
    async fn test_aggregates() {
        let (db, log) = database(vec![
            vec![json!({"aggregate": 3})],
            vec![],
            vec![json!({"aggregate": null})],
            vec![json!({"aggregate": 40})],
        ]);

        assert_eq!(PostModel::where_(&db, "status", "draft").count().await.unwrap(), 3);
        assert_eq!(PostModel::avg(&db, "views").await.unwrap(), None);
        assert_eq!(PostModel::sum(&db, "views").await.unwrap(), 0.0);
        assert_eq!(PostModel::max(&db, "views").await.unwrap(), Some(json!(40)));
        assert!(PostModel::min(&db, "views; --").await.is_err());

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[3], "SELECT MAX(views) AS aggregate FROM posts");
    }

    #[tokio::test]
    async fn test_terminal_reads() {
        let (db, log) = database(vec![
            vec![json!({"title": "a"}), json!({"title": "b"})],
            vec![json!({"id": 4})],
            vec![],
            vec![json!({"id": 9})],
        ]);

        let titles = PostModel::pluck(&db, "title").await.unwrap();
        assert_eq!(titles, vec![json!("a"), json!("b")]);

        assert!(PostModel::where_(&db, "views", 0).exists().await.unwrap());

        let err = PostModel::find_or_fail(&db, 5).await.unwrap_err();
        assert_eq!(err.to_string(), "No Post results found for id 5");

        let last = PostModel::latest(&db).last().await.unwrap().unwrap();
        assert_eq!(last.id(), Some(9));

        let log = log.lock().unwrap();
        assert_eq!(log[0], "SELECT title FROM posts");
        assert_eq!(log[1], "SELECT id FROM posts WHERE views = 0 LIMIT 1");
        assert_eq!(log[2], "SELECT * FROM posts WHERE id = 5 LIMIT 1");
        assert_eq!(log[3], "SELECT * FROM posts ORDER BY id DESC LIMIT 1");
    }

    #[tokio::test]
    async fn test_bulk_update_is_filtered_and_stamped() {
        let (db, log) = database(Vec::new());

        PostModel::where_in(&db, "id", vec![json!(1), json!(2)])
            .update(json!({"status": "archived", "id": 5}))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert!(log[0].starts_with("UPDATE posts SET status = 'archived', updated_at = '"));
        assert!(log[0].ends_with("WHERE id IN (1, 2)"));
        assert!(!log[0].contains("id = 5"));
    }

    #[tokio::test]
    async fn test_bulk_delete_soft_deletes() {
        let (db, log) = database(Vec::new());

        PostModel::where_(&db, "status", "draft").delete().await.unwrap();

        let log = log.lock().unwrap();
        assert!(log[0].starts_with("UPDATE posts SET deleted_at = '"));
        assert!(log[0].ends_with("WHERE status = 'draft'"));
    }

    #[tokio::test]
    async fn test_clauses_render_in_order() {
        let (db, _log) = database(Vec::new());

        let sql = PostModel::select(&db, &["status"])
            .join("authors", "authors.id", "=", "posts.author_id")
            .where_between("views", 10, 20)
            .where_not_null("author_id")
            .group_by(&["status"])
            .having("status", "!=", "draft")
            .skip(5)
            .to_sql()
            .unwrap();

        assert_eq!(
            sql,
            "SELECT status FROM posts INNER JOIN authors ON authors.id = posts.author_id \
             WHERE (views BETWEEN 10 AND 20 AND author_id IS NOT NULL) \
             GROUP BY status HAVING status != 'draft' LIMIT -1 OFFSET 5"
        );

        let sql = PostModel::where_exists(&db, "comments", |q| {
            q.where_ref("comments.post_id", "=", "posts.id")
                .where_("approved", json!(true));
        })
        .to_sql()
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM posts WHERE EXISTS (SELECT 1 FROM comments WHERE (comments.post_id = posts.id AND approved = TRUE))"
        );
    }

    #[tokio::test]
    async fn test_filter_helpers_render() {
        let (db, _log) = database(Vec::new());

        let sql = PostModel::when(&db, true, |q| q.where_like("title", "%rust%"))
            .when(false, |q| q.where_("status", "hidden"))
            .where_not_in("status", vec![json!("draft"), json!("spam")])
            .where_not_between("views", 1, 9)
            .in_random_order()
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM posts WHERE ((title LIKE '%rust%' AND status NOT IN ('draft', 'spam')) \
             AND views NOT BETWEEN 1 AND 9) ORDER BY RANDOM()"
        );

        let sql = PostModel::where_in(&db, "id", Vec::new()).to_sql().unwrap();
        assert_eq!(sql, "SELECT * FROM posts WHERE 1 = 0");

        let sql = PostModel::distinct_on(&db, "status")
            .left_join("authors", "authors.id", "=", "posts.author_id")
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT DISTINCT status FROM posts LEFT JOIN authors ON authors.id = posts.author_id"
        );
    }

    #[tokio::test]
    async fn test_count_wraps_distinct_selection() {
        let (db, log) = database(vec![vec![json!({"aggregate": 2})], vec![json!({"aggregate": 2})]]);

        assert_eq!(PostModel::distinct_on(&db, "status").count().await.unwrap(), 2);
        PostModel::select(&db, &["status"])
            .group_by(&["status"])
            .paginate(PaginateOptions::page(1, 10))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            log[0],
            "SELECT COUNT(*) AS aggregate FROM (SELECT DISTINCT status FROM posts) AS counted"
        );
        assert_eq!(
            log[1],
            "SELECT COUNT(*) AS aggregate FROM (SELECT status FROM posts GROUP BY status) AS counted"
        );
    }
}
