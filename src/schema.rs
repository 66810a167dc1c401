//! Per-entity schema descriptors.
//!
//! A [`ModelSchema`] is plain data: table name, typed columns, the
//! mass-assignment lists, relations and attribute hooks. It is built once
//! per entity type and shared by every query and instance of that type.

use crate::backend::{Attributes, Dialect};
use crate::error::{OrmError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";
pub const UUID: &str = "uuid";

/// SQL type mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    BigInt,
    Integer,
    SmallInt,
    Real,
    DoublePrecision,
    Text,
    Boolean,
    Timestamp,
    Json,
    Bytea,
}

impl SqlType {
    pub fn to_sql(&self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (SqlType::BigInt, _) => "BIGINT",
            (SqlType::Integer, _) => "INTEGER",
            (SqlType::SmallInt, _) => "SMALLINT",
            (SqlType::Real, _) => "REAL",
            (SqlType::DoublePrecision, _) => "DOUBLE PRECISION",
            (SqlType::Text, _) => "TEXT",
            (SqlType::Boolean, _) => "BOOLEAN",
            (SqlType::Timestamp, _) => "TIMESTAMP",
            (SqlType::Json, Dialect::Postgres) => "JSONB",
            (SqlType::Json, Dialect::Sqlite) => "TEXT",
            (SqlType::Bytea, Dialect::Postgres) => "BYTEA",
            (SqlType::Bytea, Dialect::Sqlite) => "BLOB",
        }
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// How eager-loaded rows are shaped on the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Shape follows the match count: none is `[]`, exactly one is the bare
    /// object, more is an array.
    Inferred,
    /// Related object or `null`; the foreign key lives on the related table.
    HasOne,
    /// Always an array; the foreign key lives on the related table.
    HasMany,
    /// Related object or `null`; the foreign key lives on this table.
    BelongsTo,
}

/// Relation descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    pub name: String,
    pub table: String,
    pub kind: Cardinality,
    foreign_key: Option<String>,
    pub owner_key: String,
}

impl RelationDef {
    /// A relation whose shape is decided by how many rows match.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::with_kind(name, table, Cardinality::Inferred)
    }

    pub fn has_one(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::with_kind(name, table, Cardinality::HasOne)
    }

    pub fn has_many(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::with_kind(name, table, Cardinality::HasMany)
    }

    pub fn belongs_to(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::with_kind(name, table, Cardinality::BelongsTo)
    }

    fn with_kind(name: impl Into<String>, table: impl Into<String>, kind: Cardinality) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            kind,
            foreign_key: None,
            owner_key: "id".to_string(),
        }
    }

    /// Override the foreign key column
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Override the key the foreign key points at (default `id`)
    pub fn owner_key(mut self, column: impl Into<String>) -> Self {
        self.owner_key = column.into();
        self
    }

    /// Foreign key column. For `BelongsTo` it is a column of the parent
    /// table, otherwise a column of the related table.
    pub fn foreign_key_column(&self) -> &str {
        self.foreign_key.as_deref().unwrap_or_default()
    }

    pub fn is_belongs_to(&self) -> bool {
        self.kind == Cardinality::BelongsTo
    }

    fn resolve(mut self, parent_table: &str) -> Self {
        if self.foreign_key.is_none() {
            self.foreign_key = Some(match self.kind {
                Cardinality::BelongsTo => format!("{}_id", self.name),
                _ => format!("{}_id", singular(parent_table)),
            });
        }
        self
    }
}

/// Derives a column value on create/update. Runs after mass-assignment
/// filtering; sees the filtered attributes as they stand so far.
#[async_trait]
pub trait AttributeSetter: Send + Sync {
    async fn set(&self, attributes: &Attributes) -> Result<Value>;
}

#[async_trait]
impl<F> AttributeSetter for F
where
    F: Fn(&Attributes) -> Result<Value> + Send + Sync,
{
    async fn set(&self, attributes: &Attributes) -> Result<Value> {
        (self)(attributes)
    }
}

/// Computes a read-only value at hydration time.
pub trait AttributeGetter: Send + Sync {
    fn get(&self, attributes: &Attributes) -> Value;
}

impl<F> AttributeGetter for F
where
    F: Fn(&Attributes) -> Value + Send + Sync,
{
    fn get(&self, attributes: &Attributes) -> Value {
        (self)(attributes)
    }
}

#[derive(Clone)]
pub struct SetterHook {
    pub column: String,
    pub setter: Arc<dyn AttributeSetter>,
}

impl fmt::Debug for SetterHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetterHook").field("column", &self.column).finish()
    }
}

#[derive(Clone)]
pub struct GetterHook {
    pub key: String,
    pub getter: Arc<dyn AttributeGetter>,
}

impl fmt::Debug for GetterHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetterHook").field("key", &self.key).finish()
    }
}

/// Immutable per-entity descriptor
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    table: String,
    primary_key: String,
    columns: Vec<ColumnDef>,
    fillable: Vec<String>,
    guarded: Vec<String>,
    hidden: Vec<String>,
    searchable: Vec<String>,
    relations: Vec<RelationDef>,
    soft_deletes: bool,
    uuid: bool,
    timestamps: bool,
    setters: Vec<SetterHook>,
    getters: Vec<GetterHook>,
    event_prefix: String,
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder::new(name, table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }

    pub fn fillable(&self) -> &[String] {
        &self.fillable
    }

    pub fn guarded(&self) -> &[String] {
        &self.guarded
    }

    pub fn hidden(&self) -> &[String] {
        &self.hidden
    }

    pub fn searchable(&self) -> &[String] {
        &self.searchable
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn soft_deletes(&self) -> bool {
        self.soft_deletes
    }

    pub fn uses_uuid(&self) -> bool {
        self.uuid
    }

    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn setters(&self) -> &[SetterHook] {
        &self.setters
    }

    pub fn getters(&self) -> &[GetterHook] {
        &self.getters
    }

    /// `<prefix>:<action>`, e.g. `paymentMethod:created`
    pub fn event_name(&self, action: &str) -> String {
        format!("{}:{}", self.event_prefix, action)
    }

    /// Allowed by mass assignment: fillable and not guarded
    pub fn is_mass_assignable(&self, column: &str) -> bool {
        self.fillable.iter().any(|c| c == column) && !self.guarded.iter().any(|c| c == column)
    }

    /// Keep only the mass-assignable keys. Everything else is dropped
    /// without complaint.
    pub fn filter_fillable(&self, input: &Attributes) -> Attributes {
        input
            .iter()
            .filter(|(key, _)| self.is_mass_assignable(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Check the descriptor for names that point nowhere.
    pub fn validate(&self) -> Result<()> {
        for (list, names) in [
            ("fillable", &self.fillable),
            ("guarded", &self.guarded),
            ("hidden", &self.hidden),
            ("searchable", &self.searchable),
        ] {
            if let Some(unknown) = names.iter().find(|n| !self.has_column(n)) {
                return Err(OrmError::Schema(format!(
                    "{} lists undeclared column '{}' on {}",
                    list, unknown, self.table
                )));
            }
        }

        let mut seen = HashSet::new();
        for relation in &self.relations {
            if !seen.insert(relation.name.as_str()) {
                return Err(OrmError::Schema(format!(
                    "relation '{}' declared twice on {}",
                    relation.name, self.table
                )));
            }
            if self.has_column(&relation.name) {
                return Err(OrmError::Schema(format!(
                    "relation '{}' collides with a column on {}",
                    relation.name, self.table
                )));
            }
            if relation.is_belongs_to() && !self.has_column(relation.foreign_key_column()) {
                return Err(OrmError::Schema(format!(
                    "belongs-to relation '{}' needs column '{}' on {}",
                    relation.name,
                    relation.foreign_key_column(),
                    self.table
                )));
            }
        }

        if let Some(hook) = self.setters.iter().find(|h| !self.has_column(&h.column)) {
            return Err(OrmError::Schema(format!(
                "setter targets undeclared column '{}' on {}",
                hook.column, self.table
            )));
        }

        Ok(())
    }

    /// Generate CREATE TABLE SQL
    pub fn create_table_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", self.table);

        let column_defs: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                if col.name == self.primary_key {
                    return match dialect {
                        Dialect::Sqlite => format!("    {} INTEGER PRIMARY KEY AUTOINCREMENT", col.name),
                        Dialect::Postgres => format!("    {} BIGSERIAL PRIMARY KEY", col.name),
                    };
                }

                let mut def = format!("    {} {}", col.name, col.sql_type.to_sql(dialect));

                if !col.nullable {
                    def.push_str(" NOT NULL");
                }

                if let Some(default) = &col.default {
                    def.push_str(&format!(" DEFAULT {}", default));
                }

                def
            })
            .collect();

        sql.push_str(&column_defs.join(",\n"));
        sql.push_str("\n)");
        sql
    }
}

/// Builder for [`ModelSchema`]
pub struct ModelSchemaBuilder {
    name: String,
    table: String,
    primary_key: String,
    columns: Vec<ColumnDef>,
    fillable: Vec<String>,
    guarded: Vec<String>,
    hidden: Vec<String>,
    searchable: Vec<String>,
    relations: Vec<RelationDef>,
    soft_deletes: bool,
    uuid: bool,
    timestamps: bool,
    setters: Vec<SetterHook>,
    getters: Vec<GetterHook>,
    event_prefix: Option<String>,
}

impl ModelSchemaBuilder {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            fillable: Vec::new(),
            guarded: Vec::new(),
            hidden: Vec::new(),
            searchable: Vec::new(),
            relations: Vec::new(),
            soft_deletes: false,
            uuid: false,
            timestamps: true,
            setters: Vec::new(),
            getters: Vec::new(),
            event_prefix: None,
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Add a NOT NULL column
    pub fn column(self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.column_def(ColumnDef::new(name, sql_type))
    }

    pub fn nullable_column(self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.column_def(ColumnDef::new(name, sql_type).nullable())
    }

    pub fn column_def(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn fillable(mut self, columns: &[&str]) -> Self {
        self.fillable.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn guarded(mut self, columns: &[&str]) -> Self {
        self.guarded.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn hidden(mut self, columns: &[&str]) -> Self {
        self.hidden.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn searchable(mut self, columns: &[&str]) -> Self {
        self.searchable.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    /// Generate a time-ordered UUID into the `uuid` column on create
    pub fn uuid(mut self) -> Self {
        self.uuid = true;
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Register a setter hook. Hooks run in registration order.
    pub fn setter(mut self, column: impl Into<String>, setter: impl AttributeSetter + 'static) -> Self {
        self.setters.push(SetterHook {
            column: column.into(),
            setter: Arc::new(setter),
        });
        self
    }

    pub fn getter(mut self, key: impl Into<String>, getter: impl AttributeGetter + 'static) -> Self {
        self.getters.push(GetterHook {
            key: key.into(),
            getter: Arc::new(getter),
        });
        self
    }

    pub fn event_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.event_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> ModelSchema {
        let mut columns = vec![ColumnDef::new(self.primary_key.clone(), SqlType::BigInt)];
        if self.uuid {
            columns.push(ColumnDef::new(UUID, SqlType::Text).nullable());
        }
        columns.extend(self.columns);
        if self.timestamps {
            for name in [CREATED_AT, UPDATED_AT] {
                columns.push(
                    ColumnDef::new(name, SqlType::Timestamp)
                        .nullable()
                        .default_value("CURRENT_TIMESTAMP"),
                );
            }
        }
        if self.soft_deletes {
            columns.push(ColumnDef::new(DELETED_AT, SqlType::Timestamp).nullable());
        }

        let mut seen = HashSet::new();
        columns.retain(|c| seen.insert(c.name.clone()));

        let relations = self
            .relations
            .into_iter()
            .map(|r| r.resolve(&self.table))
            .collect();

        let event_prefix = self
            .event_prefix
            .unwrap_or_else(|| lower_camel(&self.name));

        ModelSchema {
            name: self.name,
            table: self.table,
            primary_key: self.primary_key,
            columns,
            fillable: self.fillable,
            guarded: self.guarded,
            hidden: self.hidden,
            searchable: self.searchable,
            relations,
            soft_deletes: self.soft_deletes,
            uuid: self.uuid,
            timestamps: self.timestamps,
            setters: self.setters,
            getters: self.getters,
            event_prefix,
        }
    }
}

/// `payment_methods` -> `payment_method`, `categories` -> `category`
pub fn singular(table: &str) -> String {
    if let Some(stem) = table.strip_suffix("ies") {
        format!("{}y", stem)
    } else if ["ses", "xes", "ches", "shes"].iter().any(|s| table.ends_with(s)) {
        table[..table.len() - 2].to_string()
    } else if table.ends_with('s') && !table.ends_with("ss") {
        table[..table.len() - 1].to_string()
    } else {
        table.to_string()
    }
}

fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
