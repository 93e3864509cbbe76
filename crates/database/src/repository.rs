use crate::entity::Entity;
use crate::error::DbError;
use crate::query::{AggregateArgs, AggregateResult, CountArgs, FindArgs, GroupByArgs, GroupRow, UniqueWhere};
use crate::sql;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// The read surface every entity shares.
///
/// This trait allows callers to be agnostic about whether they are talking to
/// the store directly (`PgRepository`) or through the read cache
/// (`Accelerated`).
#[async_trait]
pub trait Accessor<E: Entity>: Send + Sync {
    /// Returns the first row matching `args`, if any.
    async fn find_first(&self, args: FindArgs) -> Result<Option<E>, DbError>;

    /// Like `find_first`, but a missing row is `DbError::NotFound`.
    async fn find_first_or_fail(&self, args: FindArgs) -> Result<E, DbError> {
        self.find_first(args).await?.ok_or(DbError::NotFound { table: E::TABLE })
    }

    async fn find_many(&self, args: FindArgs) -> Result<Vec<E>, DbError>;

    /// Looks a row up by one of the entity's unique columns.
    async fn find_unique(&self, by: UniqueWhere) -> Result<Option<E>, DbError>;

    async fn find_unique_or_fail(&self, by: UniqueWhere) -> Result<E, DbError> {
        self.find_unique(by).await?.ok_or(DbError::NotFound { table: E::TABLE })
    }

    async fn count(&self, args: CountArgs) -> Result<i64, DbError>;

    async fn aggregate(&self, args: AggregateArgs) -> Result<AggregateResult, DbError>;

    async fn group_by(&self, args: GroupByArgs) -> Result<Vec<GroupRow>, DbError>;
}

/// The `PgRepository` runs the accessor operations for one entity against the
/// shared connection pool.
///
/// It holds a clone of the service's pool, so once the service shuts down every
/// call fails with a closed-pool error instead of returning data.
pub struct PgRepository<E> {
    pool: PgPool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> PgRepository<E> {
    /// Creates a new `PgRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool, _entity: PhantomData }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl<E> Clone for PgRepository<E> {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

impl<E: Entity> fmt::Debug for PgRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgRepository").field("table", &E::TABLE).finish()
    }
}

#[async_trait]
impl<E: Entity> Accessor<E> for PgRepository<E> {
    async fn find_first(&self, args: FindArgs) -> Result<Option<E>, DbError> {
        let mut qb = sql::find::<E>(&args, true)?;
        let row = qb.build_query_as::<E>().fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn find_many(&self, args: FindArgs) -> Result<Vec<E>, DbError> {
        let mut qb = sql::find::<E>(&args, false)?;
        let rows = qb.build_query_as::<E>().fetch_all(&self.pool).await?;
        tracing::trace!(table = E::TABLE, rows = rows.len(), "find_many");
        Ok(rows)
    }

    async fn find_unique(&self, by: UniqueWhere) -> Result<Option<E>, DbError> {
        let mut qb = sql::find_unique::<E>(&by)?;
        let row = qb.build_query_as::<E>().fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn count(&self, args: CountArgs) -> Result<i64, DbError> {
        let mut qb = sql::count::<E>(&args)?;
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn aggregate(&self, args: AggregateArgs) -> Result<AggregateResult, DbError> {
        let (mut qb, plan) = sql::aggregate::<E>(&args)?;
        let row = qb.build().fetch_one(&self.pool).await?;
        sql::read_aggregates(&row, 0, &plan)
    }

    async fn group_by(&self, args: GroupByArgs) -> Result<Vec<GroupRow>, DbError> {
        let (mut qb, keys, plan) = sql::group_by::<E>(&args)?;
        let rows = qb.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<GroupRow, DbError> {
                let mut group = BTreeMap::new();
                for (idx, key) in keys.iter().enumerate() {
                    let value: Option<JsonValue> = row.try_get(idx)?;
                    group.insert(key.to_string(), value.unwrap_or(JsonValue::Null));
                }
                Ok(GroupRow {
                    keys: group,
                    aggregates: sql::read_aggregates(row, keys.len(), &plan)?,
                })
            })
            .collect()
    }
}
