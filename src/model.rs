//! Entity façade.
//!
//! An entity is a unit type bound to a static [`ModelSchema`]; [`Model<E>`]
//! is one row of it. Static entry points each start a fresh [`Query`], and
//! instance methods run the mutation pipeline.
//!
//! ```rust,ignore
//! use tx2_orm::prelude::*;
//!
//! entity! {
//!     pub struct PaymentMethod => PaymentMethodModel {
//!         ModelSchema::builder("PaymentMethod", "payment_methods")
//!             .column("type", SqlType::Text)
//!             .column("last_four", SqlType::Text)
//!             .nullable_column("user_id", SqlType::BigInt)
//!             .fillable(&["type", "last_four", "user_id"])
//!             .relation(RelationDef::belongs_to("user", "users"))
//!             .uuid()
//!             .build()
//!     }
//! }
//!
//! let card = PaymentMethodModel::create(&db, json!({"type": "card", "last_four": "4242"})).await?;
//! let cards = PaymentMethodModel::where_(&db, "type", "card").with(&["user"]).get().await?;
//! ```

use crate::attributes::AttributeStore;
use crate::backend::{Attributes, DatabaseBackend};
use crate::database::Database;
use crate::error::{OrmError, Result};
use crate::hydrate::{project, project_searchable};
use crate::mutation::{as_input, Assignment, MutationPipeline};
use crate::paginate::{Page, PaginateOptions};
use crate::query::Query;
use crate::schema::{singular, ModelSchema, UUID};
use crate::subquery::ConditionRecorder;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// A table-bound entity type
pub trait Entity: Send + Sync + Sized + 'static {
    fn schema() -> &'static ModelSchema;
}

/// Declare an entity type with a lazily built schema and a `Model` alias.
#[macro_export]
macro_rules! entity {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident => $model:ident { $($schema:tt)* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl $crate::model::Entity for $name {
            fn schema() -> &'static $crate::schema::ModelSchema {
                static SCHEMA: ::std::sync::OnceLock<$crate::schema::ModelSchema> =
                    ::std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| { $($schema)* })
            }
        }

        #[allow(dead_code)]
        $vis type $model = $crate::model::Model<$name>;
    };
}

/// One row of entity `E`
pub struct Model<E: Entity> {
    attributes: AttributeStore,
    relations: Attributes,
    passthrough: Attributes,
    entity: PhantomData<E>,
}

impl<E: Entity> Model<E> {
    /// Unbound instance: no row, no original snapshot
    pub fn new() -> Self {
        Self::from_parts(AttributeStore::new(), Attributes::new(), Attributes::new())
    }

    pub(crate) fn from_parts(
        attributes: AttributeStore,
        relations: Attributes,
        passthrough: Attributes,
    ) -> Self {
        Self {
            attributes,
            relations,
            passthrough,
            entity: PhantomData,
        }
    }

    pub(crate) fn replace_store(&mut self, store: AttributeStore) {
        self.attributes = store;
    }

    pub(crate) fn sync_persisted(&mut self, declared: Attributes, passthrough: Attributes) {
        self.attributes.sync_persisted(declared);
        self.passthrough = passthrough;
    }

    pub fn schema() -> &'static ModelSchema {
        E::schema()
    }

    /// Primary key; `None` until the row exists in storage
    pub fn id(&self) -> Option<i64> {
        self.attributes
            .get(E::schema().primary_key())
            .and_then(Value::as_i64)
    }

    pub fn uuid(&self) -> Option<&str> {
        self.attributes.get(UUID).and_then(Value::as_str)
    }

    /// Declared column, falling back to passthrough values and getters
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes
            .get(column)
            .or_else(|| self.passthrough.get(column))
    }

    /// Set one value. Declared columns go through dirty tracking; anything
    /// else is kept as a passthrough value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let column = column.into();
        if E::schema().has_column(&column) {
            self.attributes.set(column, value.into());
        } else {
            self.passthrough.insert(column, value.into());
        }
        self
    }

    /// Mass-assign through the fillable/guarded filter
    pub fn fill(&mut self, input: Value) -> Result<&mut Self> {
        let input = E::schema().filter_fillable(&as_input(input)?);
        for (column, value) in input {
            self.attributes.set(column, value);
        }
        Ok(self)
    }

    /// Assign every declared column in `input`, ignoring the filter
    pub fn force_fill(&mut self, input: Value) -> Result<&mut Self> {
        for (column, value) in as_input(input)? {
            self.set(column, value);
        }
        Ok(self)
    }

    /// Eager-loaded relation value
    pub fn relation(&self, name: &str) -> Option<&Value> {
        self.relations.get(name)
    }

    pub fn attributes(&self) -> &Attributes {
        self.attributes.current()
    }

    pub(crate) fn relations(&self) -> &Attributes {
        &self.relations
    }

    pub(crate) fn passthrough(&self) -> &Attributes {
        &self.passthrough
    }

    pub fn get_original(&self) -> &Attributes {
        self.attributes.get_original()
    }

    pub fn get_original_value(&self, column: &str) -> Option<&Value> {
        self.attributes.get_original_value(column)
    }

    /// Fillable columns changed since hydration or the last save
    pub fn get_changes(&self) -> Attributes {
        self.attributes.get_changes(E::schema().fillable())
    }

    pub fn is_dirty(&self, column: Option<&str>) -> bool {
        self.attributes.is_dirty(column)
    }

    pub fn is_clean(&self, column: Option<&str>) -> bool {
        self.attributes.is_clean(column)
    }

    pub fn was_changed(&self, column: Option<&str>) -> bool {
        self.attributes.was_changed(column)
    }

    pub fn to_json(&self) -> Value {
        project(self)
    }

    pub fn to_searchable_object(&self) -> Value {
        project_searchable(self)
    }

    // Static entry points. Each starts a fresh query.

    pub fn query<B: DatabaseBackend>(db: &Database<B>) -> Query<'_, E, B> {
        Query::<E, B>::new(db)
    }

    pub fn select<'a, B: DatabaseBackend>(db: &'a Database<B>, columns: &[&str]) -> Query<'a, E, B> {
        Query::<E, B>::new(db).select(columns)
    }

    pub fn where_<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str, value: impl Into<Value>) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_(column, value)
    }

    pub fn where_op<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        column: &str,
        op: &str,
        value: impl Into<Value>,
    ) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_op(column, op, value)
    }

    pub fn or_where<'a, B: DatabaseBackend>(db: &'a Database<B>, pairs: &[(&str, Value)]) -> Query<'a, E, B> {
        Query::<E, B>::new(db).or_where(pairs)
    }

    pub fn where_in<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str, values: Vec<Value>) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_in(column, values)
    }

    pub fn where_not_in<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str, values: Vec<Value>) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_not_in(column, values)
    }

    pub fn where_between<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_between(column, low, high)
    }

    pub fn where_null<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_null(column)
    }

    pub fn where_not_null<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_not_null(column)
    }

    pub fn where_like<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str, pattern: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_like(column, pattern)
    }

    pub fn where_column<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        left: &str,
        op: &str,
        right: &str,
    ) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_column(left, op, right)
    }

    pub fn where_ref<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        column: &str,
        op: &str,
        reference: &str,
    ) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_ref(column, op, reference)
    }

    pub fn where_raw<'a, B: DatabaseBackend>(db: &'a Database<B>, sql: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).where_raw(sql)
    }

    pub fn order_by<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str, direction: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).order_by(column, direction)
    }

    pub fn order_by_asc<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).order_by_asc(column)
    }

    pub fn order_by_desc<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).order_by_desc(column)
    }

    pub fn latest<B: DatabaseBackend>(db: &Database<B>) -> Query<'_, E, B> {
        Query::<E, B>::new(db).latest()
    }

    pub fn oldest<B: DatabaseBackend>(db: &Database<B>) -> Query<'_, E, B> {
        Query::<E, B>::new(db).oldest()
    }

    pub fn group_by<'a, B: DatabaseBackend>(db: &'a Database<B>, columns: &[&str]) -> Query<'a, E, B> {
        Query::<E, B>::new(db).group_by(columns)
    }

    pub fn having<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        column: &str,
        op: &str,
        value: impl Into<Value>,
    ) -> Query<'a, E, B> {
        Query::<E, B>::new(db).having(column, op, value)
    }

    pub fn in_random_order<B: DatabaseBackend>(db: &Database<B>) -> Query<'_, E, B> {
        Query::<E, B>::new(db).in_random_order()
    }

    pub fn distinct<B: DatabaseBackend>(db: &Database<B>) -> Query<'_, E, B> {
        Query::<E, B>::new(db).distinct()
    }

    pub fn join<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        table: &str,
        first: &str,
        op: &str,
        second: &str,
    ) -> Query<'a, E, B> {
        Query::<E, B>::new(db).join(table, first, op, second)
    }

    pub fn left_join<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        table: &str,
        first: &str,
        op: &str,
        second: &str,
    ) -> Query<'a, E, B> {
        Query::<E, B>::new(db).left_join(table, first, op, second)
    }

    pub fn distinct_on<'a, B: DatabaseBackend>(db: &'a Database<B>, column: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).distinct_on(column)
    }

    pub fn skip<'a, B: DatabaseBackend>(db: &'a Database<B>, count: usize) -> Query<'a, E, B> {
        Query::<E, B>::new(db).skip(count)
    }

    pub fn take<'a, B: DatabaseBackend>(db: &'a Database<B>, count: usize) -> Query<'a, E, B> {
        Query::<E, B>::new(db).take(count)
    }

    pub fn when<'a, B, F>(db: &'a Database<B>, condition: bool, callback: F) -> Query<'a, E, B>
    where
        B: DatabaseBackend,
        F: FnOnce(Query<'a, E, B>) -> Query<'a, E, B>,
    {
        Query::<E, B>::new(db).when(condition, callback)
    }

    pub fn with<'a, B: DatabaseBackend>(db: &'a Database<B>, relations: &[&str]) -> Query<'a, E, B> {
        Query::<E, B>::new(db).with(relations)
    }

    pub fn has<'a, B: DatabaseBackend>(db: &'a Database<B>, relation: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).has(relation)
    }

    pub fn doesnt_have<'a, B: DatabaseBackend>(db: &'a Database<B>, relation: &str) -> Query<'a, E, B> {
        Query::<E, B>::new(db).doesnt_have(relation)
    }

    pub fn where_has<'a, B, F>(db: &'a Database<B>, relation: &str, callback: F) -> Query<'a, E, B>
    where
        B: DatabaseBackend,
        F: FnOnce(&mut ConditionRecorder),
    {
        Query::<E, B>::new(db).where_has(relation, callback)
    }

    pub fn where_doesnt_have<'a, B, F>(db: &'a Database<B>, relation: &str, callback: F) -> Query<'a, E, B>
    where
        B: DatabaseBackend,
        F: FnOnce(&mut ConditionRecorder),
    {
        Query::<E, B>::new(db).where_doesnt_have(relation, callback)
    }

    pub fn where_exists<'a, B, F>(db: &'a Database<B>, table: &str, callback: F) -> Query<'a, E, B>
    where
        B: DatabaseBackend,
        F: FnOnce(&mut ConditionRecorder),
    {
        Query::<E, B>::new(db).where_exists(table, callback)
    }

    pub async fn all<B: DatabaseBackend>(db: &Database<B>) -> Result<Vec<Self>> {
        Query::<E, B>::new(db).get().await
    }

    pub async fn find<B: DatabaseBackend>(db: &Database<B>, id: i64) -> Result<Option<Self>> {
        Query::<E, B>::new(db).find(id).await
    }

    pub async fn find_or_fail<B: DatabaseBackend>(db: &Database<B>, id: i64) -> Result<Self> {
        Query::<E, B>::new(db).find_or_fail(id).await
    }

    pub async fn find_many<B: DatabaseBackend>(db: &Database<B>, ids: &[i64]) -> Result<Vec<Self>> {
        Query::<E, B>::new(db).find_many(ids).await
    }

    pub async fn first<B: DatabaseBackend>(db: &Database<B>) -> Result<Option<Self>> {
        Query::<E, B>::new(db).first().await
    }

    pub async fn first_or_fail<B: DatabaseBackend>(db: &Database<B>) -> Result<Self> {
        Query::<E, B>::new(db).first_or_fail().await
    }

    pub async fn last<B: DatabaseBackend>(db: &Database<B>) -> Result<Option<Self>> {
        Query::<E, B>::new(db).last().await
    }

    pub async fn count<B: DatabaseBackend>(db: &Database<B>) -> Result<u64> {
        Query::<E, B>::new(db).count().await
    }

    pub async fn max<B: DatabaseBackend>(db: &Database<B>, column: &str) -> Result<Option<Value>> {
        Query::<E, B>::new(db).max(column).await
    }

    pub async fn min<B: DatabaseBackend>(db: &Database<B>, column: &str) -> Result<Option<Value>> {
        Query::<E, B>::new(db).min(column).await
    }

    pub async fn avg<B: DatabaseBackend>(db: &Database<B>, column: &str) -> Result<Option<f64>> {
        Query::<E, B>::new(db).avg(column).await
    }

    pub async fn sum<B: DatabaseBackend>(db: &Database<B>, column: &str) -> Result<f64> {
        Query::<E, B>::new(db).sum(column).await
    }

    pub async fn pluck<B: DatabaseBackend>(db: &Database<B>, column: &str) -> Result<Vec<Value>> {
        Query::<E, B>::new(db).pluck(column).await
    }

    pub async fn exists<B: DatabaseBackend>(db: &Database<B>) -> Result<bool> {
        Query::<E, B>::new(db).exists().await
    }

    pub async fn chunk<B, F>(db: &Database<B>, size: usize, callback: F) -> Result<()>
    where
        B: DatabaseBackend,
        F: FnMut(Vec<Self>) -> Result<()>,
    {
        Query::<E, B>::new(db).chunk(size, callback).await
    }

    pub async fn paginate<B: DatabaseBackend>(db: &Database<B>, options: PaginateOptions) -> Result<Page<Self>> {
        Query::<E, B>::new(db).paginate(options).await
    }

    /// Mass-assignment filtered create
    pub async fn create<B: DatabaseBackend>(db: &Database<B>, input: Value) -> Result<Self> {
        let input = as_input(input)?;
        MutationPipeline::<E, B>::new(db).create(&input, Assignment::Filtered).await
    }

    /// Create without the fillable/guarded filter
    pub async fn force_create<B: DatabaseBackend>(db: &Database<B>, input: Value) -> Result<Self> {
        let input = as_input(input)?;
        MutationPipeline::<E, B>::new(db).create(&input, Assignment::Forced).await
    }

    /// Batch insert; returns the number of rows written
    pub async fn create_many<B: DatabaseBackend>(db: &Database<B>, inputs: Vec<Value>) -> Result<u64> {
        let inputs = inputs.into_iter().map(as_input).collect::<Result<Vec<_>>>()?;
        MutationPipeline::<E, B>::new(db).create_many(&inputs).await
    }

    /// First row matching every `search` pair, or a new row built from
    /// `search` and `values`
    pub async fn first_or_create<B: DatabaseBackend>(
        db: &Database<B>,
        search: Value,
        values: Value,
    ) -> Result<Self> {
        let search = as_input(search)?;
        if let Some(found) = Self::search_query(db, &search)?.first().await? {
            return Ok(found);
        }
        let mut input = search;
        input.extend(as_input(values)?);
        MutationPipeline::<E, B>::new(db).create(&input, Assignment::Filtered).await
    }

    /// Update the first row matching `search` with `values`, or create one
    /// from both
    pub async fn update_or_create<B: DatabaseBackend>(
        db: &Database<B>,
        search: Value,
        values: Value,
    ) -> Result<Self> {
        let search = as_input(search)?;
        let values = as_input(values)?;
        if let Some(mut found) = Self::search_query(db, &search)?.first().await? {
            MutationPipeline::<E, B>::new(db)
                .update(&mut found, &values, Assignment::Filtered)
                .await?;
            return Ok(found);
        }
        let mut input = search;
        input.extend(values);
        MutationPipeline::<E, B>::new(db).create(&input, Assignment::Filtered).await
    }

    /// Physical delete by primary key, bypassing soft deletes
    pub async fn remove<B: DatabaseBackend>(db: &Database<B>, id: i64) -> Result<u64> {
        MutationPipeline::<E, B>::new(db).remove(id).await
    }

    // Instance mutations

    /// Create when unsaved, otherwise write the pending changes
    pub async fn save<B: DatabaseBackend>(&mut self, db: &Database<B>) -> Result<()> {
        let pipeline = MutationPipeline::<E, B>::new(db);
        if self.id().is_some() {
            let changes = self.get_changes();
            pipeline.update(self, &changes, Assignment::Filtered).await?;
        } else {
            let input = self.attributes().clone();
            let relations = std::mem::take(&mut self.relations);
            *self = pipeline.create(&input, Assignment::Filtered).await?;
            self.relations = relations;
        }
        Ok(())
    }

    /// `Ok(false)` when the instance was never saved
    pub async fn update<B: DatabaseBackend>(&mut self, db: &Database<B>, input: Value) -> Result<bool> {
        let input = as_input(input)?;
        MutationPipeline::<E, B>::new(db)
            .update(self, &input, Assignment::Filtered)
            .await
    }

    pub async fn force_update<B: DatabaseBackend>(&mut self, db: &Database<B>, input: Value) -> Result<bool> {
        let input = as_input(input)?;
        MutationPipeline::<E, B>::new(db)
            .update(self, &input, Assignment::Forced)
            .await
    }

    /// Soft or physical delete by schema; returns affected rows
    pub async fn delete<B: DatabaseBackend>(&mut self, db: &Database<B>) -> Result<u64> {
        MutationPipeline::<E, B>::new(db).delete(self).await
    }

    // Lazy relation accessors

    /// Parent row of type `P` through this instance's foreign key
    pub async fn belongs_to<P: Entity, B: DatabaseBackend>(&self, db: &Database<B>) -> Result<Model<P>> {
        let parent = P::schema();
        let foreign_key = E::schema()
            .relations()
            .iter()
            .find(|r| r.is_belongs_to() && r.table == parent.table())
            .map(|r| r.foreign_key_column().to_string())
            .unwrap_or_else(|| format!("{}_id", singular(parent.table())));

        let key = match self.attributes.get(&foreign_key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                return Err(OrmError::Relation(format!(
                    "{} has no {} to load {}",
                    E::schema().name(),
                    foreign_key,
                    parent.name()
                )))
            }
        };

        Query::<P, B>::new(db)
            .where_(parent.primary_key(), key.clone())
            .first()
            .await?
            .ok_or_else(|| {
                OrmError::Relation(format!("{} {} not found", parent.name(), key))
            })
    }

    /// Child rows of type `C` pointing at this instance
    pub async fn has_many<C: Entity, B: DatabaseBackend>(&self, db: &Database<B>) -> Result<Vec<Model<C>>> {
        let child = C::schema();
        let Some(id) = self.id() else {
            return Ok(Vec::new());
        };
        let foreign_key = E::schema()
            .relations()
            .iter()
            .find(|r| !r.is_belongs_to() && r.table == child.table())
            .map(|r| r.foreign_key_column().to_string())
            .unwrap_or_else(|| format!("{}_id", singular(E::schema().table())));

        Query::<C, B>::new(db).where_(&foreign_key, id).get().await
    }

    fn search_query<'a, B: DatabaseBackend>(
        db: &'a Database<B>,
        search: &Attributes,
    ) -> Result<Query<'a, E, B>> {
        if search.is_empty() {
            return Err(OrmError::Query("search attributes must not be empty".to_string()));
        }
        Ok(search
            .iter()
            .fold(Query::<E, B>::new(db), |query, (column, value)| query.where_(column, value.clone())))
    }
}

impl<E: Entity> Default for Model<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Clone for Model<E> {
    fn clone(&self) -> Self {
        Self::from_parts(
            self.attributes.clone(),
            self.relations.clone(),
            self.passthrough.clone(),
        )
    }
}

impl<E: Entity> fmt::Debug for Model<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(E::schema().name())
            .field("attributes", self.attributes.current())
            .field("relations", &self.relations)
            .field("passthrough", &self.passthrough)
            .finish()
    }
}

impl<E: Entity> Serialize for Model<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{attrs, MockBackend};
    use crate::hydrate::hydrate;
    use crate::schema::{RelationDef, SqlType};
    use serde_json::json;

    crate::entity! {
        struct Author => AuthorModel {
            ModelSchema::builder("Author", "authors")
                .column("name", SqlType::Text)
                .column("email", SqlType::Text)
                .nullable_column("password", SqlType::Text)
                .nullable_column("team_id", SqlType::BigInt)
                .fillable(&["name", "email", "password", "team_id"])
                .hidden(&["password"])
                .searchable(&["name"])
                .relation(RelationDef::new("posts", "posts"))
                .relation(RelationDef::belongs_to("team", "teams"))
                .getter("display", |a: &Attributes| {
                    let field = |key: &str| a.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
                    json!(format!("{} <{}>", field("name"), field("email")))
                })
                .build()
        }
    }

    fn stored() -> AuthorModel {
        hydrate(attrs(json!({
            "id": 7,
            "name": "Ada",
            "email": "ada@example.com",
            "password": "secret",
            "team_id": null,
            "posts": [],
            "post_count": 3
        })))
    }

    #[test]
    fn test_hydration_splits_row() {
        let author = stored();

        assert_eq!(author.id(), Some(7));
        assert_eq!(author.get("name"), Some(&json!("Ada")));
        assert_eq!(author.relation("posts"), Some(&json!([])));
        assert_eq!(author.get("post_count"), Some(&json!(3)));
        assert_eq!(author.get("display"), Some(&json!("Ada <ada@example.com>")));
        assert!(!author.attributes().contains_key("post_count"));
        assert!(author.is_clean(None));
    }

    #[test]
    fn test_to_json_hides_and_merges() {
        let json = stored().to_json();

        assert!(json.get("password").is_none());
        assert_eq!(json["name"], json!("Ada"));
        assert_eq!(json["posts"], json!([]));
        assert_eq!(json["post_count"], json!(3));
        assert_eq!(serde_json::to_value(stored()).unwrap(), json);
    }

    #[test]
    fn test_searchable_object() {
        assert_eq!(stored().to_searchable_object(), json!({"id": 7, "name": "Ada"}));
    }

    #[test]
    fn test_setter_dirties_single_column() {
        let mut author = stored();
        author.set("name", "Grace");

        assert!(author.is_dirty(None));
        assert!(author.is_dirty(Some("name")));
        assert_eq!(author.get_changes(), attrs(json!({"name": "Grace"})));
        assert_eq!(author.get_original_value("name"), Some(&json!("Ada")));
    }

    #[test]
    fn test_fill_is_silently_filtered() {
        let mut author = AuthorModel::new();
        author
            .fill(json!({"name": "Ada", "id": 99, "is_admin": true}))
            .unwrap();

        assert_eq!(author.get("name"), Some(&json!("Ada")));
        assert_eq!(author.id(), None);
        assert!(author.get("is_admin").is_none());

        author.force_fill(json!({"id": 99})).unwrap();
        assert_eq!(author.id(), Some(99));
    }

    #[tokio::test]
    async fn test_belongs_to_without_foreign_key_is_relation_error() {
        crate::entity! {
            struct Team => TeamModel {
                ModelSchema::builder("Team", "teams").column("name", SqlType::Text).build()
            }
        }

        let db = Database::new(MockBackend::new());
        let err = stored().belongs_to::<Team, _>(&db).await.unwrap_err();

        assert!(matches!(err, OrmError::Relation(_)));
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn test_static_entry_points_build_sql() {
        let db = Database::new(MockBackend::new());

        let sql = AuthorModel::where_(&db, "name", "Ada")
            .or_where(&[("email", json!("a@x.io")), ("email", json!("b@x.io"))])
            .order_by_desc("id")
            .take(5)
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM authors WHERE (name = 'Ada' AND (email = 'a@x.io' OR email = 'b@x.io')) ORDER BY id DESC LIMIT 5"
        );

        let sql = AuthorModel::when(&db, false, |q| q.where_("name", "x")).to_sql().unwrap();
        assert_eq!(sql, "SELECT * FROM authors");
    }

    #[tokio::test]
    async fn test_where_has_builds_correlated_exists() {
        let db = Database::new(MockBackend::new());

        let sql = AuthorModel::where_has(&db, "posts", |q| {
            q.where_op("views", ">", json!(10));
        })
        .to_sql()
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM authors WHERE EXISTS (SELECT 1 FROM posts WHERE (posts.author_id = authors.id AND (views > 10)))"
        );

        let sql = AuthorModel::doesnt_have(&db, "posts").to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM authors WHERE NOT EXISTS (SELECT 1 FROM posts WHERE posts.author_id = authors.id)"
        );
    }

    #[tokio::test]
    async fn test_chain_errors_surface_before_io() {
        let backend = MockBackend::new();
        let (log, _results) = backend.handles();
        let db = Database::new(backend);

        let err = AuthorModel::where_op(&db, "name", "~=", "x").get().await.unwrap_err();
        assert!(matches!(err, OrmError::UnsupportedCondition(_)));

        let err = AuthorModel::with(&db, &["comments"]).get().await.unwrap_err();
        assert!(matches!(err, OrmError::Relation(_)));

        let err = AuthorModel::where_has(&db, "posts", |q| {
            q.where_op("views", "between", json!([1, 2]));
        })
        .count()
        .await
        .unwrap_err();
        assert!(matches!(err, OrmError::UnsupportedCondition(_)));

        let err = AuthorModel::where_(&db, "name; --", "x").first().await.unwrap_err();
        assert_eq!(err.status(), 400);

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_or_create_requires_search() {
        let db = Database::new(MockBackend::new());
        let err = AuthorModel::first_or_create(&db, json!({}), json!({"name": "Ada"}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
    }
}
