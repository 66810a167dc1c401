use crate::backend::{Attributes, Dialect};
use crate::error::{OrmError, Result};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Comparison operators for WHERE clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl ComparisonOp {
    /// Operators that compare against a list of values
    pub fn takes_list(&self) -> bool {
        matches!(self, ComparisonOp::In | ComparisonOp::NotIn)
    }

    /// Operators that take no right-hand operand
    pub fn is_unary(&self) -> bool {
        matches!(self, ComparisonOp::IsNull | ComparisonOp::IsNotNull)
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Eq => write!(f, "="),
            ComparisonOp::Ne => write!(f, "!="),
            ComparisonOp::Lt => write!(f, "<"),
            ComparisonOp::Le => write!(f, "<="),
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Ge => write!(f, ">="),
            ComparisonOp::Like => write!(f, "LIKE"),
            ComparisonOp::NotLike => write!(f, "NOT LIKE"),
            ComparisonOp::In => write!(f, "IN"),
            ComparisonOp::NotIn => write!(f, "NOT IN"),
            ComparisonOp::IsNull => write!(f, "IS NULL"),
            ComparisonOp::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

impl FromStr for ComparisonOp {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let op = match normalized.split_whitespace().collect::<Vec<_>>().join(" ").as_str() {
            "=" | "==" => ComparisonOp::Eq,
            "!=" | "<>" => ComparisonOp::Ne,
            "<" => ComparisonOp::Lt,
            "<=" => ComparisonOp::Le,
            ">" => ComparisonOp::Gt,
            ">=" => ComparisonOp::Ge,
            "like" => ComparisonOp::Like,
            "not like" => ComparisonOp::NotLike,
            "in" => ComparisonOp::In,
            "not in" => ComparisonOp::NotIn,
            "is" | "is null" => ComparisonOp::IsNull,
            "is not" | "is not null" => ComparisonOp::IsNotNull,
            _ => {
                return Err(OrmError::UnsupportedCondition(format!(
                    "unknown operator '{}'",
                    s
                )))
            }
        };
        Ok(op)
    }
}

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "AND"),
            LogicalOp::Or => write!(f, "OR"),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(OrmError::Query(format!("unknown sort direction '{}'", other))),
        }
    }
}

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn to_sql(&self, column: &str) -> String {
        match self {
            AggregateFunc::Count => {
                if column == "*" {
                    "COUNT(*)".to_string()
                } else {
                    format!("COUNT({})", column)
                }
            }
            AggregateFunc::Sum => format!("SUM({})", column),
            AggregateFunc::Avg => format!("AVG({})", column),
            AggregateFunc::Min => format!("MIN({})", column),
            AggregateFunc::Max => format!("MAX({})", column),
        }
    }
}

/// WHERE condition
#[derive(Debug, Clone)]
pub enum Condition {
    Simple {
        column: String,
        op: ComparisonOp,
        value: Option<Value>,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    /// Column-to-column comparison, also used for correlated references
    Column {
        left: String,
        op: ComparisonOp,
        right: String,
    },
    Compound {
        conditions: Vec<Condition>,
        op: LogicalOp,
    },
    Exists {
        subquery: Box<SelectBuilder>,
        negated: bool,
    },
    Raw(String),
}

impl Condition {
    pub fn simple(column: impl Into<String>, op: ComparisonOp, value: Option<Value>) -> Self {
        Condition::Simple {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::simple(column, ComparisonOp::Eq, Some(value))
    }

    /// Fold conditions left to right, each joined to the accumulated
    /// prefix by its own combinator.
    pub fn fold(conditions: Vec<(LogicalOp, Condition)>) -> Option<Condition> {
        let mut acc: Option<Condition> = None;
        for (op, condition) in conditions {
            acc = Some(match acc {
                None => condition,
                Some(existing) => Condition::Compound {
                    conditions: vec![existing, condition],
                    op,
                },
            });
        }
        acc
    }

    pub fn to_sql(&self) -> String {
        match self {
            Condition::Simple { column, op, value } => {
                if op.is_unary() {
                    format!("{} {}", column, op)
                } else if op.takes_list() {
                    match value {
                        Some(Value::Array(arr)) if !arr.is_empty() => {
                            let values = arr
                                .iter()
                                .map(format_value)
                                .collect::<Vec<_>>()
                                .join(", ");
                            format!("{} {} ({})", column, op, values)
                        }
                        // Empty list: IN matches nothing, NOT IN everything
                        _ if *op == ComparisonOp::In => "1 = 0".to_string(),
                        _ => "1 = 1".to_string(),
                    }
                } else {
                    match (op, value) {
                        (ComparisonOp::Eq, None | Some(Value::Null)) => {
                            format!("{} IS NULL", column)
                        }
                        (ComparisonOp::Ne, None | Some(Value::Null)) => {
                            format!("{} IS NOT NULL", column)
                        }
                        _ => {
                            let val = value
                                .as_ref()
                                .map(format_value)
                                .unwrap_or_else(|| "NULL".to_string());
                            format!("{} {} {}", column, op, val)
                        }
                    }
                }
            }
            Condition::Between {
                column,
                low,
                high,
                negated,
            } => format!(
                "{} {}BETWEEN {} AND {}",
                column,
                if *negated { "NOT " } else { "" },
                format_value(low),
                format_value(high)
            ),
            Condition::Column { left, op, right } => format!("{} {} {}", left, op, right),
            Condition::Compound { conditions, op } => {
                if conditions.is_empty() {
                    "TRUE".to_string()
                } else {
                    let parts = conditions
                        .iter()
                        .map(|c| c.to_sql())
                        .collect::<Vec<_>>()
                        .join(&format!(" {} ", op));
                    format!("({})", parts)
                }
            }
            Condition::Exists { subquery, negated } => format!(
                "{}EXISTS ({})",
                if *negated { "NOT " } else { "" },
                subquery.render()
            ),
            Condition::Raw(sql) => sql.clone(),
        }
    }
}

/// Join clause
#[derive(Debug, Clone)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub on_condition: Condition,
}

impl Join {
    pub fn to_sql(&self) -> String {
        format!("{} {} ON {}", self.join_type, self.table, self.on_condition.to_sql())
    }
}

/// ORDER BY clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBy {
    Column {
        column: String,
        direction: SortDirection,
    },
    Random,
}

impl OrderBy {
    pub fn to_sql(&self) -> String {
        match self {
            OrderBy::Column { column, direction } => format!("{} {}", column, direction),
            OrderBy::Random => "RANDOM()".to_string(),
        }
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    joins: Vec<Join>,
    where_clause: Option<Condition>,
    group_by: Vec<String>,
    having: Option<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    distinct: bool,
    dialect: Dialect,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            dialect: Dialect::Sqlite,
        }
    }

    /// Render for the given SQL flavour (SQLite by default)
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn has_order(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Select specific columns
    pub fn select(mut self, columns: Vec<impl Into<String>>) -> Self {
        self.columns = columns.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Add an aggregate function
    pub fn aggregate(mut self, func: AggregateFunc, column: impl Into<String>, alias: Option<impl Into<String>>) -> Self {
        if self.columns == vec!["*".to_string()] {
            self.columns.clear();
        }
        let col_str = func.to_sql(&column.into());
        if let Some(alias) = alias {
            self.columns.push(format!("{} AS {}", col_str, alias.into()));
        } else {
            self.columns.push(col_str);
        }
        self
    }

    /// Copy of this query reduced to a single aggregate over the same
    /// filter state. Ordering and paging are dropped. A count over distinct
    /// or grouped state counts the rows the query returns, through a
    /// derived table.
    pub fn aggregate_query(&self, func: AggregateFunc, column: &str, alias: &str) -> Self {
        let mut query = self.clone();
        query.order_by.clear();
        query.limit = None;
        query.offset = None;

        if func == AggregateFunc::Count && (query.distinct || !query.group_by.is_empty()) {
            return SelectBuilder::new(format!("({}) AS counted", query.render()))
                .dialect(self.dialect)
                .aggregate(func, column, Some(alias));
        }

        query.columns = Vec::new();
        query.distinct = false;
        query.aggregate(func, column, Some(alias))
    }

    /// Use DISTINCT
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add a WHERE condition
    pub fn where_clause(mut self, condition: Condition) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// Add an AND condition to existing WHERE
    pub fn and_where(mut self, condition: Condition) -> Self {
        if let Some(existing) = self.where_clause {
            self.where_clause = Some(Condition::Compound {
                conditions: vec![existing, condition],
                op: LogicalOp::And,
            });
        } else {
            self.where_clause = Some(condition);
        }
        self
    }

    /// Add a simple WHERE condition (column = value)
    pub fn where_eq(self, column: impl Into<String>, value: Value) -> Self {
        self.and_where(Condition::eq(column, value))
    }

    /// Add a JOIN clause
    pub fn join(mut self, join_type: JoinType, table: impl Into<String>, on: Condition) -> Self {
        self.joins.push(Join {
            join_type,
            table: table.into(),
            on_condition: on,
        });
        self
    }

    /// Add GROUP BY columns
    pub fn group_by(mut self, columns: Vec<impl Into<String>>) -> Self {
        self.group_by.extend(columns.into_iter().map(|c| c.into()));
        self
    }

    /// Add a HAVING condition, AND-ed with any existing one
    pub fn having(mut self, condition: Condition) -> Self {
        self.having = Some(match self.having {
            Some(existing) => Condition::Compound {
                conditions: vec![existing, condition],
                op: LogicalOp::And,
            },
            None => condition,
        });
        self
    }

    /// Add ORDER BY
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy::Column {
            column: column.into(),
            direction,
        });
        self
    }

    /// Add ascending ORDER BY
    pub fn order_asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Asc)
    }

    /// Add descending ORDER BY
    pub fn order_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Desc)
    }

    pub fn order_random(mut self) -> Self {
        self.order_by.push(OrderBy::Random);
        self
    }

    /// Drop every ORDER BY entry
    pub fn clear_order(mut self) -> Self {
        self.order_by.clear();
        self
    }

    /// Set LIMIT
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set OFFSET
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Render the statement without consuming the builder
    pub fn render(&self) -> String {
        let mut sql = String::from("SELECT ");

        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        sql.push_str(&self.columns.join(", "));
        sql.push_str(&format!(" FROM {}", self.table));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql());
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.to_sql());
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &self
                    .order_by
                    .iter()
                    .map(|o| o.to_sql())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        } else if self.offset.is_some() {
            // SQLite refuses OFFSET without LIMIT
            match self.dialect {
                Dialect::Sqlite => sql.push_str(" LIMIT -1"),
                Dialect::Postgres => sql.push_str(" LIMIT ALL"),
            }
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }

    /// Build the SQL query string
    pub fn build(self) -> Result<String> {
        if self.table.is_empty() {
            return Err(OrmError::Query("SELECT requires a table".to_string()));
        }
        Ok(self.render())
    }

    pub(crate) fn where_condition(&self) -> Option<&Condition> {
        self.where_clause.as_ref()
    }
}

/// INSERT query builder (one or many rows)
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    rows: Vec<Attributes>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, values: Attributes) -> Self {
        self.rows.push(values);
        self
    }

    pub fn rows(mut self, rows: Vec<Attributes>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Build one statement. Every row must carry the same column set; see
    /// [`build_batches`](Self::build_batches) for mixed rows.
    pub fn build(self) -> Result<String> {
        let Some(first) = self.rows.first() else {
            return Err(OrmError::Query("INSERT must have at least one row".to_string()));
        };

        let columns: Vec<&str> = first.keys().map(String::as_str).collect();
        if self.rows.iter().any(|row| !row.keys().eq(first.keys())) {
            return Err(OrmError::Query(
                "rows of a multi-row INSERT must share one column set".to_string(),
            ));
        }

        if columns.is_empty() {
            if self.rows.len() > 1 {
                return Err(OrmError::Query(
                    "multi-row INSERT needs at least one column".to_string(),
                ));
            }
            return Ok(format!("INSERT INTO {} DEFAULT VALUES", self.table));
        }

        let tuples: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                let values: Vec<String> = row.values().map(format_value).collect();
                format!("({})", values.join(", "))
            })
            .collect();

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            columns.join(", "),
            tuples.join(", ")
        ))
    }

    /// One statement per distinct column set, in first-seen order. A row
    /// that leaves a column out gets the column's default instead of NULL.
    pub fn build_batches(self) -> Result<Vec<String>> {
        if self.rows.is_empty() {
            return Err(OrmError::Query("INSERT must have at least one row".to_string()));
        }

        let mut groups: Vec<(Vec<String>, Vec<Attributes>)> = Vec::new();
        for row in self.rows {
            let keys: Vec<String> = row.keys().cloned().collect();
            match groups.iter_mut().find(|(columns, _)| *columns == keys) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((keys, vec![row])),
            }
        }

        groups
            .into_iter()
            .map(|(_, rows)| {
                InsertBuilder {
                    table: self.table.clone(),
                    rows,
                }
                .build()
            })
            .collect()
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set_values: Vec<(String, Value)>,
    where_clause: Option<Condition>,
}

impl UpdateBuilder {
    /// Create a new UPDATE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_values: Vec::new(),
            where_clause: None,
        }
    }

    /// Set a column value
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.set_values.push((column.into(), value));
        self
    }

    /// Set every column of an attribute map
    pub fn set_attributes(mut self, values: &Attributes) -> Self {
        for (col, val) in values {
            self.set_values.push((col.clone(), val.clone()));
        }
        self
    }

    /// Add WHERE condition
    pub fn where_clause(mut self, condition: Condition) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// Add simple WHERE condition (column = value)
    pub fn where_eq(mut self, column: impl Into<String>, value: Value) -> Self {
        let condition = Condition::eq(column, value);
        if let Some(existing) = self.where_clause {
            self.where_clause = Some(Condition::Compound {
                conditions: vec![existing, condition],
                op: LogicalOp::And,
            });
        } else {
            self.where_clause = Some(condition);
        }
        self
    }

    /// Build the SQL query string
    pub fn build(self) -> Result<String> {
        if self.set_values.is_empty() {
            return Err(OrmError::Query("UPDATE must have at least one SET value".to_string()));
        }

        let mut sql = format!("UPDATE {} SET ", self.table);

        let set_clauses: Vec<String> = self
            .set_values
            .iter()
            .map(|(col, val)| format!("{} = {}", col, format_value(val)))
            .collect();

        sql.push_str(&set_clauses.join(", "));

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql());
        }

        Ok(sql)
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    where_clause: Option<Condition>,
}

impl DeleteBuilder {
    /// Create a new DELETE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    /// Add WHERE condition
    pub fn where_clause(mut self, condition: Condition) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// Add simple WHERE condition (column = value)
    pub fn where_eq(mut self, column: impl Into<String>, value: Value) -> Self {
        let condition = Condition::eq(column, value);
        if let Some(existing) = self.where_clause {
            self.where_clause = Some(Condition::Compound {
                conditions: vec![existing, condition],
                op: LogicalOp::And,
            });
        } else {
            self.where_clause = Some(condition);
        }
        self
    }

    /// Build the SQL query string
    pub fn build(self) -> Result<String> {
        let mut sql = format!("DELETE FROM {}", self.table);

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql());
        }

        Ok(sql)
    }
}

/// Whether `name` is safe to splice into SQL as a column or table
/// reference: dot-separated identifier segments, or `*`.
pub fn is_valid_identifier(name: &str) -> bool {
    if name == "*" {
        return true;
    }
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                Some('*') => segment.len() == 1,
                _ => false,
            }
        })
}

/// Format a JSON value for SQL
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(_) | Value::Object(_) => {
            format!("'{}'", serde_json::to_string(value).unwrap_or_default().replace('\'', "''"))
        }
    }
}
