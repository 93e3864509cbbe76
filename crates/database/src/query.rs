//! Typed query arguments shared by every entity.
//!
//! All argument types serialize deterministically, which is what the read cache
//! uses to derive its keys.

use crate::error::DbError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A literal compared against a column. Always sent as a bind parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Decimal(Decimal),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Comparison applied to a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Equals(Value),
    NotEquals(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    IsNull,
    IsNotNull,
}

/// A boolean predicate over one entity's columns.
///
/// An empty `And` matches every row and an empty `Or` matches none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Condition { column: String, op: Op },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn condition(column: impl Into<String>, op: Op) -> Self {
        Filter::Condition { column: column.into(), op }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(column, Op::Equals(value.into()))
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(column, Op::NotEquals(value.into()))
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(column, Op::Gt(value.into()))
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(column, Op::Gte(value.into()))
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(column, Op::Lt(value.into()))
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(column, Op::Lte(value.into()))
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::condition(column, Op::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn contains(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::condition(column, Op::Contains(needle.into()))
    }

    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut items) => {
                items.push(other);
                Filter::And(items)
            }
            first => Filter::And(vec![first, other]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), order: SortOrder::Asc }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), order: SortOrder::Desc }
    }
}

/// Arguments of `find_first` and `find_many`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindArgs {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub take: Option<i64>,
    pub skip: Option<i64>,
}

impl FindArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by.push(order_by);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Lookup by a single unique column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueWhere {
    pub column: String,
    pub value: Value,
}

impl UniqueWhere {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { column: column.into(), value: value.into() }
    }

    pub fn id(id: Uuid) -> Self {
        Self::new("id", id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountArgs {
    pub filter: Option<Filter>,
    pub take: Option<i64>,
    pub skip: Option<i64>,
}

impl CountArgs {
    pub fn filter(filter: Filter) -> Self {
        Self { filter: Some(filter), ..Self::default() }
    }
}

/// Which aggregates to compute. Columns are applied in the listed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSelection {
    pub count: bool,
    pub avg: Vec<String>,
    pub sum: Vec<String>,
    pub min: Vec<String>,
    pub max: Vec<String>,
}

impl AggregateSelection {
    pub fn is_empty(&self) -> bool {
        !self.count && self.avg.is_empty() && self.sum.is_empty() && self.min.is_empty() && self.max.is_empty()
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn avg(mut self, column: impl Into<String>) -> Self {
        self.avg.push(column.into());
        self
    }

    pub fn sum(mut self, column: impl Into<String>) -> Self {
        self.sum.push(column.into());
        self
    }

    pub fn min(mut self, column: impl Into<String>) -> Self {
        self.min.push(column.into());
        self
    }

    pub fn max(mut self, column: impl Into<String>) -> Self {
        self.max.push(column.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateArgs {
    pub filter: Option<Filter>,
    pub take: Option<i64>,
    pub skip: Option<i64>,
    pub select: AggregateSelection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    pub filter: Option<Filter>,
    pub select: AggregateSelection,
    /// Only grouping columns may be ordered on.
    pub order_by: Vec<OrderBy>,
    pub take: Option<i64>,
    pub skip: Option<i64>,
}

impl GroupByArgs {
    pub fn by<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self { by: columns.into_iter().map(Into::into).collect(), ..Self::default() }
    }
}

/// Aggregated values keyed by column name. Numbers arrive as JSON so integer,
/// numeric and timestamp columns share one representation; an aggregate over
/// zero rows is `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub count: Option<i64>,
    pub avg: BTreeMap<String, JsonValue>,
    pub sum: BTreeMap<String, JsonValue>,
    pub min: BTreeMap<String, JsonValue>,
    pub max: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub keys: BTreeMap<String, JsonValue>,
    pub aggregates: AggregateResult,
}

pub(crate) fn check_window(take: Option<i64>, skip: Option<i64>) -> Result<(), DbError> {
    if let Some(take) = take.filter(|t| *t < 0) {
        return Err(DbError::InvalidArgument(format!("take must not be negative (got {take})")));
    }
    if let Some(skip) = skip.filter(|s| *s < 0) {
        return Err(DbError::InvalidArgument(format!("skip must not be negative (got {skip})")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_values_map_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn and_flattens_into_an_existing_conjunction() {
        let filter = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        match filter {
            Filter::And(items) => assert_eq!(items.len(), 3),
            other => panic!("expected a conjunction, got {other:?}"),
        }
    }

    #[test]
    fn equal_arguments_serialize_identically() {
        let a = FindArgs::new().filter(Filter::eq("email", "a@b.io")).take(5);
        let b = FindArgs::new().filter(Filter::eq("email", "a@b.io")).take(5);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn negative_windows_are_rejected() {
        assert!(check_window(Some(10), Some(0)).is_ok());
        assert!(matches!(check_window(Some(-1), None), Err(DbError::InvalidArgument(_))));
        assert!(matches!(check_window(None, Some(-3)), Err(DbError::InvalidArgument(_))));
    }
}
