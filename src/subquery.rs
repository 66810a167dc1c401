//! Condition recording for correlated `EXISTS` subqueries.
//!
//! The callback passed to `where_has` / `where_doesnt_have` / `where_exists`
//! gets a [`ConditionRecorder`], not a live query. The recorder only keeps
//! conditions; once the callback returns they are replayed, in order and
//! with their own combinators, inside the subquery.

use crate::builder::{is_valid_identifier, ComparisonOp, Condition, LogicalOp, SelectBuilder};
use crate::error::{OrmError, Result};
use crate::schema::{ModelSchema, RelationDef};
use serde_json::Value;

/// Records conditions for later replay. Anything that cannot be expressed
/// is rejected at record time; the first rejection is reported when the
/// recorder is consumed.
#[derive(Debug, Default)]
pub struct ConditionRecorder {
    entries: Vec<(LogicalOp, Condition)>,
    error: Option<OrmError>,
}

impl ConditionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_(&mut self, column: &str, value: Value) -> &mut Self {
        self.record(LogicalOp::And, column, "=", value)
    }

    /// Three-argument form; `op` is parsed as a textual operator
    pub fn where_op(&mut self, column: &str, op: &str, value: Value) -> &mut Self {
        self.record(LogicalOp::And, column, op, value)
    }

    pub fn or_where(&mut self, column: &str, value: Value) -> &mut Self {
        self.record(LogicalOp::Or, column, "=", value)
    }

    pub fn or_where_op(&mut self, column: &str, op: &str, value: Value) -> &mut Self {
        self.record(LogicalOp::Or, column, op, value)
    }

    pub fn where_in(&mut self, column: &str, values: Vec<Value>) -> &mut Self {
        self.record(LogicalOp::And, column, "in", Value::Array(values))
    }

    pub fn where_not_in(&mut self, column: &str, values: Vec<Value>) -> &mut Self {
        self.record(LogicalOp::And, column, "not in", Value::Array(values))
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.record(LogicalOp::And, column, "is null", Value::Null)
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.record(LogicalOp::And, column, "is not null", Value::Null)
    }

    pub fn where_like(&mut self, column: &str, pattern: &str) -> &mut Self {
        self.record(LogicalOp::And, column, "like", Value::String(pattern.to_string()))
    }

    pub fn where_between(&mut self, column: &str, low: Value, high: Value) -> &mut Self {
        if let Some(column) = self.checked(column) {
            self.push(
                LogicalOp::And,
                Condition::Between {
                    column,
                    low,
                    high,
                    negated: false,
                },
            );
        }
        self
    }

    /// Compare two columns of the subquery's table
    pub fn where_column(&mut self, left: &str, op: &str, right: &str) -> &mut Self {
        self.column_condition(left, op, right)
    }

    /// Compare a subquery column with a qualified column of the outer query
    pub fn where_ref(&mut self, column: &str, op: &str, outer: &str) -> &mut Self {
        if !outer.contains('.') {
            return self.reject(OrmError::UnsupportedCondition(format!(
                "outer reference '{}' must be qualified with its table",
                outer
            )));
        }
        self.column_condition(column, op, outer)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Fold the recorded conditions into one grouped condition. `None`
    /// when nothing was recorded.
    pub fn into_condition(self) -> Result<Option<Condition>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Condition::fold(self.entries).map(|condition| match condition {
            Condition::Compound { .. } => condition,
            single => Condition::Compound {
                conditions: vec![single],
                op: LogicalOp::And,
            },
        }))
    }

    fn record(&mut self, combinator: LogicalOp, column: &str, op: &str, value: Value) -> &mut Self {
        let op = match op.parse::<ComparisonOp>() {
            Ok(op) => op,
            Err(_) if op.trim().eq_ignore_ascii_case("between") => {
                return self.reject(OrmError::UnsupportedCondition(
                    "'between' needs where_between".to_string(),
                ))
            }
            Err(err) => return self.reject(err),
        };

        if op.takes_list() && !value.is_array() {
            return self.reject(OrmError::UnsupportedCondition(format!(
                "'{}' on {} needs a list of values",
                op, column
            )));
        }
        if !op.takes_list() && !op.is_unary() && (value.is_array() || value.is_object()) {
            return self.reject(OrmError::UnsupportedCondition(format!(
                "'{}' on {} needs a scalar value",
                op, column
            )));
        }

        if let Some(column) = self.checked(column) {
            let value = if op.is_unary() { None } else { Some(value) };
            self.push(combinator, Condition::simple(column, op, value));
        }
        self
    }

    fn column_condition(&mut self, left: &str, op: &str, right: &str) -> &mut Self {
        let op = match op.parse::<ComparisonOp>() {
            Ok(op) if !op.takes_list() && !op.is_unary() => op,
            Ok(op) => {
                return self.reject(OrmError::UnsupportedCondition(format!(
                    "'{}' cannot compare two columns",
                    op
                )))
            }
            Err(err) => return self.reject(err),
        };
        if let (Some(left), Some(right)) = (self.checked(left), self.checked(right)) {
            self.push(LogicalOp::And, Condition::Column { left, op, right });
        }
        self
    }

    fn checked(&mut self, column: &str) -> Option<String> {
        if is_valid_identifier(column) && column != "*" {
            Some(column.to_string())
        } else {
            self.reject(OrmError::UnsupportedCondition(format!(
                "invalid column '{}'",
                column
            )));
            None
        }
    }

    fn push(&mut self, combinator: LogicalOp, condition: Condition) {
        self.entries.push((combinator, condition));
    }

    fn reject(&mut self, err: OrmError) -> &mut Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }
}

/// `SELECT 1 FROM <related> WHERE <correlation> AND (<recorded>)`.
///
/// For has-style relations the related table's foreign key points at the
/// parent's primary key; for belongs-to the parent's foreign key points at
/// the related owner key.
pub fn relation_subquery(
    parent: &ModelSchema,
    relation: &RelationDef,
    recorder: ConditionRecorder,
) -> Result<SelectBuilder> {
    let correlation = if relation.is_belongs_to() {
        Condition::Column {
            left: format!("{}.{}", relation.table, relation.owner_key),
            op: ComparisonOp::Eq,
            right: format!("{}.{}", parent.table(), relation.foreign_key_column()),
        }
    } else {
        Condition::Column {
            left: format!("{}.{}", relation.table, relation.foreign_key_column()),
            op: ComparisonOp::Eq,
            right: format!("{}.{}", parent.table(), parent.primary_key()),
        }
    };

    let subquery = SelectBuilder::new(relation.table.clone())
        .select(vec!["1"])
        .where_clause(correlation);

    Ok(match recorder.into_condition()? {
        Some(recorded) => subquery.and_where(recorded),
        None => subquery,
    })
}

/// Uncorrelated `SELECT 1 FROM <table> WHERE (<recorded>)`; correlation
/// comes from `where_ref` entries.
pub fn table_subquery(table: &str, recorder: ConditionRecorder) -> Result<SelectBuilder> {
    if !is_valid_identifier(table) || table == "*" {
        return Err(OrmError::Query(format!("invalid table '{}'", table)));
    }
    let subquery = SelectBuilder::new(table).select(vec!["1"]);
    Ok(match recorder.into_condition()? {
        Some(recorded) => subquery.where_clause(recorded),
        None => subquery,
    })
}
