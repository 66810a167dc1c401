//! Eager loading of declared relations for a batch of parent rows.

use crate::backend::{Attributes, DatabaseBackend};
use crate::builder::{ComparisonOp, Condition, SelectBuilder};
use crate::database::Database;
use crate::error::{OrmError, Result};
use crate::schema::{Cardinality, ModelSchema, RelationDef};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Load every requested relation onto `rows`, one query per relation.
///
/// Runs on raw rows, before hydration, so the relation values end up in the
/// instance's relation bag.
pub async fn load_relations<B: DatabaseBackend>(
    db: &Database<B>,
    schema: &ModelSchema,
    rows: &mut [Attributes],
    names: &[String],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    for name in names {
        let relation = schema.relation(name).ok_or_else(|| {
            OrmError::Relation(format!("{} has no relation '{}'", schema.name(), name))
        })?;

        let (local_key, remote_key) = if relation.is_belongs_to() {
            (relation.foreign_key_column(), relation.owner_key.as_str())
        } else {
            (schema.primary_key(), relation.foreign_key_column())
        };

        let keys = distinct_keys(rows, local_key);
        let related = if keys.is_empty() {
            Vec::new()
        } else {
            let sql = SelectBuilder::new(relation.table.clone())
                .where_clause(Condition::simple(
                    remote_key,
                    ComparisonOp::In,
                    Some(Value::Array(keys)),
                ))
                .build()?;
            db.fetch_all(&sql).await?
        };

        tracing::debug!(
            relation = %relation.name,
            parents = rows.len(),
            related = related.len(),
            "eager loaded relation"
        );

        let partitions = partition(related, remote_key);
        for row in rows.iter_mut() {
            let matches = row
                .get(local_key)
                .and_then(key_of)
                .and_then(|key| partitions.get(&key))
                .cloned()
                .unwrap_or_default();
            row.insert(relation.name.clone(), shape(relation, matches));
        }
    }

    Ok(())
}

/// Shape the matches for one parent according to the relation's cardinality
pub fn shape(relation: &RelationDef, mut matches: Vec<Attributes>) -> Value {
    match relation.kind {
        Cardinality::HasMany => Value::Array(matches.into_iter().map(Value::Object).collect()),
        Cardinality::HasOne | Cardinality::BelongsTo => {
            if matches.is_empty() {
                Value::Null
            } else {
                Value::Object(matches.swap_remove(0))
            }
        }
        Cardinality::Inferred => {
            if matches.len() == 1 {
                Value::Object(matches.swap_remove(0))
            } else {
                Value::Array(matches.into_iter().map(Value::Object).collect())
            }
        }
    }
}

/// Group rows by the normalized value of `column`
fn partition(rows: Vec<Attributes>, column: &str) -> HashMap<String, Vec<Attributes>> {
    let mut groups: HashMap<String, Vec<Attributes>> = HashMap::new();
    for row in rows {
        if let Some(key) = row.get(column).and_then(key_of) {
            groups.entry(key).or_default().push(row);
        }
    }
    groups
}

fn distinct_keys(rows: &[Attributes], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|value| key_of(value).map(|key| seen.insert(key)).unwrap_or(false))
        .cloned()
        .collect()
}

/// Join key for a value: numbers and their text form compare equal
fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_inferred_shape_follows_match_count() {
        let relation = RelationDef::new("posts", "posts");

        assert_eq!(shape(&relation, vec![]), json!([]));
        assert_eq!(shape(&relation, vec![row(json!({"id": 1}))]), json!({"id": 1}));
        assert_eq!(
            shape(&relation, vec![row(json!({"id": 1})), row(json!({"id": 2}))]),
            json!([{"id": 1}, {"id": 2}])
        );
    }

    #[test]
    fn test_declared_shapes() {
        let many = RelationDef::has_many("posts", "posts");
        let one = RelationDef::has_one("profile", "profiles");

        assert_eq!(shape(&many, vec![row(json!({"id": 1}))]), json!([{"id": 1}]));
        assert_eq!(shape(&one, vec![]), Value::Null);
        assert_eq!(shape(&one, vec![row(json!({"id": 4}))]), json!({"id": 4}));
    }

    #[test]
    fn test_partition_unifies_numeric_and_text_keys() {
        let groups = partition(
            vec![
                row(json!({"id": 1, "author_id": 7})),
                row(json!({"id": 2, "author_id": "7"})),
                row(json!({"id": 3, "author_id": null})),
            ],
            "author_id",
        );

        assert_eq!(groups.len(), 1);
        assert_eq!(groups["7"].len(), 2);
    }

    #[test]
    fn test_distinct_keys_skips_nulls_and_repeats() {
        let rows = vec![
            row(json!({"team_id": 1})),
            row(json!({"team_id": 1})),
            row(json!({"team_id": null})),
            row(json!({"team_id": 2})),
        ];
        assert_eq!(distinct_keys(&rows, "team_id"), vec![json!(1), json!(2)]);
    }
}
