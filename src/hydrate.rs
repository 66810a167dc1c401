//! Row to instance conversion and the outward JSON projection.

use crate::attributes::AttributeStore;
use crate::backend::Attributes;
use crate::model::{Entity, Model};
use crate::schema::ModelSchema;
use serde_json::Value;

/// A storage row split by what the schema knows about each key
#[derive(Debug, Default)]
pub(crate) struct RowParts {
    pub declared: Attributes,
    pub relations: Attributes,
    pub passthrough: Attributes,
}

/// Declared columns go to the attribute store, eager-loaded relation keys
/// to the relation bag, everything else (joined or aliased columns) to the
/// passthrough bag. Custom getters are evaluated against the declared
/// columns and land in the passthrough bag.
pub(crate) fn split(schema: &ModelSchema, row: Attributes) -> RowParts {
    let mut parts = RowParts::default();
    for (key, value) in row {
        if schema.has_column(&key) {
            parts.declared.insert(key, value);
        } else if schema.relation(&key).is_some() {
            parts.relations.insert(key, value);
        } else {
            parts.passthrough.insert(key, value);
        }
    }

    for hook in schema.getters() {
        let value = hook.getter.get(&parts.declared);
        parts.passthrough.insert(hook.key.clone(), value);
    }

    parts
}

/// Build a clean instance from a storage row
pub fn hydrate<E: Entity>(row: Attributes) -> Model<E> {
    let parts = split(E::schema(), row);
    Model::from_parts(
        AttributeStore::from_row(parts.declared),
        parts.relations,
        parts.passthrough,
    )
}

pub fn hydrate_all<E: Entity>(rows: Vec<Attributes>) -> Vec<Model<E>> {
    rows.into_iter().map(hydrate).collect()
}

/// Declared columns minus hidden, then relations, then passthrough, merged
/// into one flat object
pub fn project<E: Entity>(model: &Model<E>) -> Value {
    let schema = E::schema();
    let mut out: Attributes = model
        .attributes()
        .iter()
        .filter(|(key, _)| !schema.hidden().iter().any(|h| h == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (key, value) in model.relations().iter().chain(model.passthrough().iter()) {
        out.insert(key.clone(), value.clone());
    }

    Value::Object(out)
}

/// Primary key plus the searchable columns; the full projection when the
/// schema declares none
pub fn project_searchable<E: Entity>(model: &Model<E>) -> Value {
    let schema = E::schema();
    if schema.searchable().is_empty() {
        return project(model);
    }

    let mut out = Attributes::new();
    let keys = std::iter::once(schema.primary_key()).chain(schema.searchable().iter().map(String::as_str));
    for key in keys {
        out.insert(
            key.to_string(),
            model.attributes().get(key).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}
