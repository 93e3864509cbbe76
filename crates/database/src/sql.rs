//! Renders query arguments into parameterised PostgreSQL.
//!
//! Identifiers are only ever taken from an entity's static column list and are
//! double-quoted; every literal goes through `push_bind`.

use crate::entity::Entity;
use crate::error::DbError;
use crate::query::{
    check_window, AggregateArgs, AggregateResult, AggregateSelection, CountArgs, FindArgs, Filter, GroupByArgs,
    Op, OrderBy, SortOrder, UniqueWhere, Value,
};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{QueryBuilder, Row};

pub(crate) type Builder = QueryBuilder<'static, Postgres>;

/// One selected aggregate, in the order it appears in the SELECT list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregate {
    Count,
    Avg(&'static str),
    Sum(&'static str),
    Min(&'static str),
    Max(&'static str),
}

pub(crate) fn find<E: Entity>(args: &FindArgs, first_only: bool) -> Result<Builder, DbError> {
    check_window(args.take, args.skip)?;

    let mut qb = select_from::<E>();
    push_where::<E>(&mut qb, args.filter.as_ref())?;
    push_order_by::<E>(&mut qb, &args.order_by, None)?;
    let take = if first_only { Some(1) } else { args.take };
    push_window(&mut qb, take, args.skip);
    Ok(qb)
}

pub(crate) fn find_unique<E: Entity>(by: &UniqueWhere) -> Result<Builder, DbError> {
    let column = E::unique_column(&by.column)?;
    if by.value == Value::Null {
        return Err(DbError::InvalidArgument(format!("unique lookup on `{column}` needs a value")));
    }

    let mut qb = select_from::<E>();
    qb.push(" WHERE ").push(quote(column)).push(" = ");
    push_value(&mut qb, &by.value);
    qb.push(" LIMIT 1");
    Ok(qb)
}

pub(crate) fn count<E: Entity>(args: &CountArgs) -> Result<Builder, DbError> {
    check_window(args.take, args.skip)?;

    let mut qb = Builder::new("SELECT COUNT(*) FROM (SELECT 1 FROM ");
    qb.push(quote(E::TABLE));
    push_where::<E>(&mut qb, args.filter.as_ref())?;
    push_window(&mut qb, args.take, args.skip);
    qb.push(") AS \"sub\"");
    Ok(qb)
}

pub(crate) fn aggregate<E: Entity>(args: &AggregateArgs) -> Result<(Builder, Vec<Aggregate>), DbError> {
    check_window(args.take, args.skip)?;
    let plan = plan::<E>(&args.select)?;

    let mut qb = Builder::new("SELECT ");
    push_aggregates(&mut qb, &plan);
    qb.push(" FROM (SELECT * FROM ").push(quote(E::TABLE));
    push_where::<E>(&mut qb, args.filter.as_ref())?;
    push_window(&mut qb, args.take, args.skip);
    qb.push(") AS \"sub\"");
    Ok((qb, plan))
}

pub(crate) fn group_by<E: Entity>(
    args: &GroupByArgs,
) -> Result<(Builder, Vec<&'static str>, Vec<Aggregate>), DbError> {
    check_window(args.take, args.skip)?;
    if args.by.is_empty() {
        return Err(DbError::InvalidArgument("group_by needs at least one column".to_string()));
    }
    let keys = args.by.iter().map(|c| E::column(c)).collect::<Result<Vec<_>, _>>()?;
    let plan = if args.select.is_empty() { Vec::new() } else { plan::<E>(&args.select)? };

    let mut qb = Builder::new("SELECT ");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push("to_jsonb(").push(quote(key)).push(")");
    }
    if !plan.is_empty() {
        qb.push(", ");
        push_aggregates(&mut qb, &plan);
    }
    qb.push(" FROM ").push(quote(E::TABLE));
    push_where::<E>(&mut qb, args.filter.as_ref())?;
    qb.push(" GROUP BY ").push(column_list(&keys));
    push_order_by::<E>(&mut qb, &args.order_by, Some(keys.as_slice()))?;
    push_window(&mut qb, args.take, args.skip);
    Ok((qb, keys, plan))
}

/// Reads aggregate columns starting at `offset` according to `plan`.
pub(crate) fn read_aggregates(row: &PgRow, offset: usize, plan: &[Aggregate]) -> Result<AggregateResult, DbError> {
    let mut result = AggregateResult::default();
    for (i, aggregate) in plan.iter().enumerate() {
        let idx = offset + i;
        match aggregate {
            Aggregate::Count => result.count = Some(row.try_get::<i64, _>(idx)?),
            Aggregate::Avg(c) => {
                result.avg.insert(c.to_string(), json_at(row, idx)?);
            }
            Aggregate::Sum(c) => {
                result.sum.insert(c.to_string(), json_at(row, idx)?);
            }
            Aggregate::Min(c) => {
                result.min.insert(c.to_string(), json_at(row, idx)?);
            }
            Aggregate::Max(c) => {
                result.max.insert(c.to_string(), json_at(row, idx)?);
            }
        }
    }
    Ok(result)
}

pub(crate) fn json_at(row: &PgRow, idx: usize) -> Result<JsonValue, DbError> {
    Ok(row.try_get::<Option<JsonValue>, _>(idx)?.unwrap_or(JsonValue::Null))
}

fn plan<E: Entity>(select: &AggregateSelection) -> Result<Vec<Aggregate>, DbError> {
    if select.is_empty() {
        return Err(DbError::InvalidArgument("aggregate needs at least one selection".to_string()));
    }

    let mut plan = Vec::new();
    if select.count {
        plan.push(Aggregate::Count);
    }
    for c in &select.avg {
        plan.push(Aggregate::Avg(E::column(c)?));
    }
    for c in &select.sum {
        plan.push(Aggregate::Sum(E::column(c)?));
    }
    for c in &select.min {
        plan.push(Aggregate::Min(E::column(c)?));
    }
    for c in &select.max {
        plan.push(Aggregate::Max(E::column(c)?));
    }
    Ok(plan)
}

fn push_aggregates(qb: &mut Builder, plan: &[Aggregate]) {
    for (i, aggregate) in plan.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        match aggregate {
            Aggregate::Count => qb.push("COUNT(*)"),
            Aggregate::Avg(c) => qb.push(format!("to_jsonb(AVG({}))", quote(c))),
            Aggregate::Sum(c) => qb.push(format!("to_jsonb(SUM({}))", quote(c))),
            Aggregate::Min(c) => qb.push(format!("to_jsonb(MIN({}))", quote(c))),
            Aggregate::Max(c) => qb.push(format!("to_jsonb(MAX({}))", quote(c))),
        };
    }
}

fn select_from<E: Entity>() -> Builder {
    let mut qb = Builder::new("SELECT ");
    qb.push(column_list(E::COLUMNS)).push(" FROM ").push(quote(E::TABLE));
    qb
}

fn push_where<E: Entity>(qb: &mut Builder, filter: Option<&Filter>) -> Result<(), DbError> {
    if let Some(filter) = filter {
        qb.push(" WHERE ");
        push_filter::<E>(qb, filter)?;
    }
    Ok(())
}

fn push_filter<E: Entity>(qb: &mut Builder, filter: &Filter) -> Result<(), DbError> {
    match filter {
        Filter::Condition { column, op } => push_condition(qb, E::column(column)?, op)?,
        Filter::And(items) => push_junction::<E>(qb, items, " AND ", "TRUE")?,
        Filter::Or(items) => push_junction::<E>(qb, items, " OR ", "FALSE")?,
        Filter::Not(inner) => {
            qb.push("NOT (");
            push_filter::<E>(qb, inner)?;
            qb.push(")");
        }
    }
    Ok(())
}

fn push_junction<E: Entity>(
    qb: &mut Builder,
    items: &[Filter],
    separator: &str,
    identity: &str,
) -> Result<(), DbError> {
    match items {
        [] => {
            qb.push(identity);
        }
        [only] => push_filter::<E>(qb, only)?,
        _ => {
            qb.push("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    qb.push(separator);
                }
                push_filter::<E>(qb, item)?;
            }
            qb.push(")");
        }
    }
    Ok(())
}

fn push_condition(qb: &mut Builder, column: &'static str, op: &Op) -> Result<(), DbError> {
    let column = quote(column);
    match op {
        Op::Equals(Value::Null) | Op::IsNull => {
            qb.push(column).push(" IS NULL");
        }
        Op::NotEquals(Value::Null) | Op::IsNotNull => {
            qb.push(column).push(" IS NOT NULL");
        }
        Op::Equals(v) => compare(qb, column, " = ", v),
        // `IS DISTINCT FROM` keeps NULL rows, matching "not equal to this value".
        Op::NotEquals(v) => compare(qb, column, " IS DISTINCT FROM ", v),
        Op::Lt(v) => compare(qb, column, " < ", v),
        Op::Lte(v) => compare(qb, column, " <= ", v),
        Op::Gt(v) => compare(qb, column, " > ", v),
        Op::Gte(v) => compare(qb, column, " >= ", v),
        Op::In(values) => push_list(qb, column, " IN (", values, "FALSE"),
        Op::NotIn(values) => push_list(qb, column, " NOT IN (", values, "TRUE"),
        Op::Contains(needle) => like(qb, column, format!("%{}%", escape_like(needle))),
        Op::StartsWith(prefix) => like(qb, column, format!("{}%", escape_like(prefix))),
        Op::EndsWith(suffix) => like(qb, column, format!("%{}", escape_like(suffix))),
    }
    Ok(())
}

fn compare(qb: &mut Builder, column: String, operator: &str, value: &Value) {
    qb.push(column).push(operator);
    push_value(qb, value);
}

fn like(qb: &mut Builder, column: String, pattern: String) {
    qb.push(column).push(" LIKE ").push_bind(pattern);
}

fn push_list(qb: &mut Builder, column: String, opener: &str, values: &[Value], when_empty: &str) {
    if values.is_empty() {
        qb.push(when_empty);
        return;
    }
    qb.push(column).push(opener);
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(qb, value);
    }
    qb.push(")");
}

fn push_value(qb: &mut Builder, value: &Value) {
    match value {
        Value::Null => qb.push("NULL"),
        Value::Bool(v) => qb.push_bind(*v),
        Value::Int(v) => qb.push_bind(*v),
        Value::Float(v) => qb.push_bind(*v),
        Value::Text(v) => qb.push_bind(v.clone()),
        Value::Uuid(v) => qb.push_bind(*v),
        Value::Timestamp(v) => qb.push_bind(*v),
        Value::Decimal(v) => qb.push_bind(*v),
    };
}

fn push_order_by<E: Entity>(
    qb: &mut Builder,
    order_by: &[OrderBy],
    allowed: Option<&[&'static str]>,
) -> Result<(), DbError> {
    for (i, order) in order_by.iter().enumerate() {
        let column = E::column(&order.column)?;
        if let Some(allowed) = allowed {
            if !allowed.contains(&column) {
                return Err(DbError::InvalidArgument(format!(
                    "cannot order by `{column}`: it is not a grouping column"
                )));
            }
        }
        qb.push(if i == 0 { " ORDER BY " } else { ", " });
        qb.push(quote(column));
        qb.push(match order.order {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        });
    }
    Ok(())
}

fn push_window(qb: &mut Builder, take: Option<i64>, skip: Option<i64>) {
    if let Some(take) = take {
        qb.push(" LIMIT ").push_bind(take);
    }
    if let Some(skip) = skip.filter(|s| *s > 0) {
        qb.push(" OFFSET ").push_bind(skip);
    }
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn column_list(columns: &[&str]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

/// Escapes LIKE metacharacters so the needle matches literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{AggregateSelection, OrderBy};
    use core_types::{Order, Product, User};

    #[test]
    fn find_many_renders_filter_order_and_window() {
        let args = FindArgs::new()
            .filter(Filter::eq("email", "a@strata.dev"))
            .order_by(OrderBy::desc("created_at"))
            .take(10)
            .skip(5);

        let qb = find::<User>(&args, false).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT \"id\", \"email\", \"name\", \"created_at\" FROM \"users\" \
             WHERE \"email\" = $1 ORDER BY \"created_at\" DESC LIMIT $2 OFFSET $3"
        );
    }

    #[test]
    fn find_first_always_limits_to_one_row() {
        let qb = find::<User>(&FindArgs::new().take(50), true).unwrap();
        assert_eq!(qb.sql(), "SELECT \"id\", \"email\", \"name\", \"created_at\" FROM \"users\" LIMIT $1");
    }

    #[test]
    fn nested_filters_are_parenthesised() {
        let filter = Filter::any([
            Filter::all([Filter::gte("price", 10), Filter::lt("stock", 5)]),
            Filter::contains("name", "50%_off").negate(),
            Filter::eq("sku", None::<String>),
        ]);
        let qb = find::<Product>(&FindArgs::new().filter(filter), false).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT \"id\", \"sku\", \"name\", \"price\", \"stock\", \"created_at\" FROM \"products\" \
             WHERE ((\"price\" >= $1 AND \"stock\" < $2) OR NOT (\"name\" LIKE $3) OR \"sku\" IS NULL)"
        );
    }

    #[test]
    fn empty_junctions_and_lists_collapse_to_constants() {
        let filter = Filter::all([
            Filter::And(vec![]),
            Filter::Or(vec![]),
            Filter::is_in("id", Vec::<Value>::new()),
            Filter::condition("id", Op::NotIn(vec![])),
        ]);
        let qb = find::<User>(&FindArgs::new().filter(filter), false).unwrap();
        assert!(qb.sql().ends_with("WHERE (TRUE AND FALSE AND FALSE AND TRUE)"));
    }

    #[test]
    fn in_list_binds_each_value() {
        let qb = find::<Order>(
            &FindArgs::new().filter(Filter::is_in("status", ["paid", "shipped"])),
            false,
        )
        .unwrap();
        assert!(qb.sql().ends_with("WHERE \"status\" IN ($1, $2)"));
    }

    #[test]
    fn unknown_columns_fail_before_any_sql_runs() {
        let err = find::<User>(&FindArgs::new().filter(Filter::eq("password", "x")), false).err().unwrap();
        assert!(matches!(err, DbError::UnknownColumn { .. }));

        let err = find::<User>(&FindArgs::new().order_by(OrderBy::asc("1; DROP TABLE users")), false)
            .err()
            .unwrap();
        assert!(matches!(err, DbError::UnknownColumn { .. }));
    }

    #[test]
    fn unique_lookup_requires_a_unique_column() {
        let qb = find_unique::<User>(&UniqueWhere::new("email", "a@strata.dev")).unwrap();
        assert!(qb.sql().ends_with("FROM \"users\" WHERE \"email\" = $1 LIMIT 1"));

        assert!(matches!(
            find_unique::<User>(&UniqueWhere::new("name", "Ada")),
            Err(DbError::NotUnique { .. })
        ));
        assert!(matches!(
            find_unique::<User>(&UniqueWhere::new("email", Value::Null)),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn count_wraps_the_windowed_selection() {
        let args = CountArgs { filter: Some(Filter::eq("active", true)), take: Some(100), skip: None };
        let qb = count::<core_types::Service>(&args).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM (SELECT 1 FROM \"services\" WHERE \"active\" = $1 LIMIT $2) AS \"sub\""
        );
    }

    #[test]
    fn aggregate_plan_follows_selection_order() {
        let args = AggregateArgs {
            select: AggregateSelection::default().count().avg("price").max("stock"),
            ..AggregateArgs::default()
        };
        let (qb, plan) = aggregate::<Product>(&args).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*), to_jsonb(AVG(\"price\")), to_jsonb(MAX(\"stock\")) FROM (SELECT * FROM \"products\") AS \"sub\""
        );
        assert_eq!(plan, vec![Aggregate::Count, Aggregate::Avg("price"), Aggregate::Max("stock")]);

        let empty = AggregateArgs::default();
        assert!(matches!(aggregate::<Product>(&empty), Err(DbError::InvalidArgument(_))));
    }

    #[test]
    fn group_by_only_orders_on_grouping_columns() {
        let mut args = GroupByArgs::by(["status"]);
        args.select = AggregateSelection::default().count().sum("total");
        args.order_by.push(OrderBy::asc("status"));

        let (qb, keys, plan) = group_by::<Order>(&args).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT to_jsonb(\"status\"), COUNT(*), to_jsonb(SUM(\"total\")) FROM \"orders\" \
             GROUP BY \"status\" ORDER BY \"status\" ASC"
        );
        assert_eq!(keys, vec!["status"]);
        assert_eq!(plan.len(), 2);

        args.order_by = vec![OrderBy::desc("total")];
        assert!(matches!(group_by::<Order>(&args), Err(DbError::InvalidArgument(_))));
        assert!(matches!(group_by::<Order>(&GroupByArgs::default()), Err(DbError::InvalidArgument(_))));
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn negative_take_is_rejected() {
        assert!(matches!(find::<User>(&FindArgs::new().take(-1), false), Err(DbError::InvalidArgument(_))));
    }
}
