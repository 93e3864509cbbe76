use crate::accelerate::store::{CacheStore, Lookup};
use crate::accelerate::strategy::{AccelerateInfo, CacheStatus, CacheStrategy};
use crate::entity::Entity;
use crate::error::DbError;
use crate::query::{AggregateArgs, AggregateResult, CountArgs, FindArgs, GroupByArgs, GroupRow, UniqueWhere};
use crate::repository::Accessor;
use async_trait::async_trait;
use chrono::Utc;
use configuration::AccelerateSettings;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// A deferred, cacheable read.
///
/// Nothing runs until the query is awaited. Awaiting it directly yields the
/// data; `with_accelerate_info` also reports how the read was served.
#[must_use = "an accelerated query does nothing until it is awaited"]
pub struct AccelerateQuery<T> {
    fut: BoxFuture<'static, Result<(T, AccelerateInfo), DbError>>,
}

impl<T: Send + 'static> AccelerateQuery<T> {
    fn new(fut: impl Future<Output = Result<(T, AccelerateInfo), DbError>> + Send + 'static) -> Self {
        Self { fut: Box::pin(fut) }
    }

    pub async fn with_accelerate_info(self) -> Result<(T, AccelerateInfo), DbError> {
        self.fut.await
    }

    /// Post-processes the data without touching what is cached.
    fn and_then<U, F>(self, f: F) -> AccelerateQuery<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, DbError> + Send + 'static,
    {
        AccelerateQuery::new(async move {
            let (value, info) = self.fut.await?;
            Ok((f(value)?, info))
        })
    }
}

impl<T: Send + 'static> IntoFuture for AccelerateQuery<T> {
    type Output = Result<T, DbError>;
    type IntoFuture = BoxFuture<'static, Result<T, DbError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.fut.await.map(|(value, _)| value) })
    }
}

impl<T> fmt::Debug for AccelerateQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccelerateQuery { .. }")
    }
}

/// Read-cache decorator over any accessor.
///
/// The `*_cached` methods take an explicit `CacheStrategy`; the `Accessor`
/// implementation applies the configured default strategy, or passes straight
/// through when there is none.
pub struct Accelerated<E, A> {
    inner: Arc<A>,
    store: Arc<CacheStore>,
    enabled: bool,
    default_strategy: Option<CacheStrategy>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, A> Clone for Accelerated<E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            store: Arc::clone(&self.store),
            enabled: self.enabled,
            default_strategy: self.default_strategy.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, A> fmt::Debug for Accelerated<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accelerated")
            .field("table", &E::TABLE)
            .field("enabled", &self.enabled)
            .field("default_strategy", &self.default_strategy)
            .finish()
    }
}

impl<E, A> Accelerated<E, A>
where
    E: Entity,
    A: Accessor<E> + 'static,
{
    pub fn new(inner: A, store: Arc<CacheStore>, settings: &AccelerateSettings) -> Self {
        // A zero-length default window means "no default", not an error on every read.
        let default_strategy = Some(CacheStrategy {
            ttl: settings.default_ttl_secs,
            swr: settings.default_swr_secs,
            tags: Vec::new(),
        })
        .filter(|strategy| strategy.validate().is_ok());
        Self {
            inner: Arc::new(inner),
            store,
            enabled: settings.enabled,
            default_strategy,
            _entity: PhantomData,
        }
    }

    /// The wrapped, uncached accessor.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn find_first_cached(&self, args: FindArgs, strategy: Option<CacheStrategy>) -> AccelerateQuery<Option<E>> {
        let key = cache_key::<E>("find_first", &args);
        self.run(key, strategy, move |inner| async move { inner.find_first(args).await })
    }

    /// Caches the `find_first` result, so a cached "no row" also fails fast.
    pub fn find_first_or_fail_cached(&self, args: FindArgs, strategy: Option<CacheStrategy>) -> AccelerateQuery<E> {
        self.find_first_cached(args, strategy)
            .and_then(|row| row.ok_or(DbError::NotFound { table: E::TABLE }))
    }

    pub fn find_many_cached(&self, args: FindArgs, strategy: Option<CacheStrategy>) -> AccelerateQuery<Vec<E>> {
        let key = cache_key::<E>("find_many", &args);
        self.run(key, strategy, move |inner| async move { inner.find_many(args).await })
    }

    pub fn find_unique_cached(&self, by: UniqueWhere, strategy: Option<CacheStrategy>) -> AccelerateQuery<Option<E>> {
        let key = cache_key::<E>("find_unique", &by);
        self.run(key, strategy, move |inner| async move { inner.find_unique(by).await })
    }

    pub fn find_unique_or_fail_cached(&self, by: UniqueWhere, strategy: Option<CacheStrategy>) -> AccelerateQuery<E> {
        self.find_unique_cached(by, strategy)
            .and_then(|row| row.ok_or(DbError::NotFound { table: E::TABLE }))
    }

    pub fn count_cached(&self, args: CountArgs, strategy: Option<CacheStrategy>) -> AccelerateQuery<i64> {
        let key = cache_key::<E>("count", &args);
        self.run(key, strategy, move |inner| async move { inner.count(args).await })
    }

    pub fn aggregate_cached(
        &self,
        args: AggregateArgs,
        strategy: Option<CacheStrategy>,
    ) -> AccelerateQuery<AggregateResult> {
        let key = cache_key::<E>("aggregate", &args);
        self.run(key, strategy, move |inner| async move { inner.aggregate(args).await })
    }

    pub fn group_by_cached(&self, args: GroupByArgs, strategy: Option<CacheStrategy>) -> AccelerateQuery<Vec<GroupRow>> {
        let key = cache_key::<E>("group_by", &args);
        self.run(key, strategy, move |inner| async move { inner.group_by(args).await })
    }

    fn run<T, F, Fut>(
        &self,
        key: Result<String, DbError>,
        strategy: Option<CacheStrategy>,
        query: F,
    ) -> AccelerateQuery<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Arc<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        let strategy = strategy.filter(|_| self.enabled);
        AccelerateQuery::new(resolve(
            Arc::clone(&self.inner),
            Arc::clone(&self.store),
            key,
            strategy,
            query,
        ))
    }
}

fn cache_key<E: Entity>(operation: &str, args: &impl Serialize) -> Result<String, DbError> {
    Ok(format!("{}:{}:{}", E::TABLE, operation, serde_json::to_string(args)?))
}

async fn resolve<A, T, F, Fut>(
    inner: Arc<A>,
    store: Arc<CacheStore>,
    key: Result<String, DbError>,
    strategy: Option<CacheStrategy>,
    query: F,
) -> Result<(T, AccelerateInfo), DbError>
where
    A: Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce(Arc<A>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, DbError>> + Send + 'static,
{
    let request_id = Uuid::new_v4();

    let Some(strategy) = strategy else {
        let value = query(inner).await?;
        return Ok((value, info(CacheStatus::None, request_id, Utc::now())));
    };
    strategy.validate()?;
    let key = key?;

    match store.lookup(&key) {
        Lookup::Fresh { value, last_modified } => {
            tracing::trace!(%key, "Cache hit.");
            Ok((serde_json::from_value(value)?, info(CacheStatus::Ttl, request_id, last_modified)))
        }
        Lookup::Stale { value, last_modified } => {
            let stale = serde_json::from_value(value)?;
            if store.begin_refresh(&key) {
                let generation = store.generation();
                tokio::spawn(async move {
                    match query(inner).await.and_then(|fresh| Ok(serde_json::to_value(&fresh)?)) {
                        Ok(fresh) => {
                            store.insert(&key, fresh, &strategy, generation);
                        }
                        Err(err) => tracing::warn!(%key, error = %err, "Background cache refresh failed."),
                    }
                    store.end_refresh(&key);
                });
            }
            Ok((stale, info(CacheStatus::Swr, request_id, last_modified)))
        }
        Lookup::Miss => {
            let generation = store.generation();
            let value = query(inner).await?;
            store.insert(&key, serde_json::to_value(&value)?, &strategy, generation);
            tracing::trace!(%key, "Cache miss.");
            Ok((value, info(CacheStatus::Miss, request_id, Utc::now())))
        }
    }
}

fn info(cache_status: CacheStatus, request_id: Uuid, last_modified: chrono::DateTime<Utc>) -> AccelerateInfo {
    AccelerateInfo { cache_status, request_id, last_modified }
}

#[async_trait]
impl<E, A> Accessor<E> for Accelerated<E, A>
where
    E: Entity,
    A: Accessor<E> + 'static,
{
    async fn find_first(&self, args: FindArgs) -> Result<Option<E>, DbError> {
        self.find_first_cached(args, self.default_strategy.clone()).await
    }

    async fn find_first_or_fail(&self, args: FindArgs) -> Result<E, DbError> {
        self.find_first_or_fail_cached(args, self.default_strategy.clone()).await
    }

    async fn find_many(&self, args: FindArgs) -> Result<Vec<E>, DbError> {
        self.find_many_cached(args, self.default_strategy.clone()).await
    }

    async fn find_unique(&self, by: UniqueWhere) -> Result<Option<E>, DbError> {
        self.find_unique_cached(by, self.default_strategy.clone()).await
    }

    async fn find_unique_or_fail(&self, by: UniqueWhere) -> Result<E, DbError> {
        self.find_unique_or_fail_cached(by, self.default_strategy.clone()).await
    }

    async fn count(&self, args: CountArgs) -> Result<i64, DbError> {
        self.count_cached(args, self.default_strategy.clone()).await
    }

    async fn aggregate(&self, args: AggregateArgs) -> Result<AggregateResult, DbError> {
        self.aggregate_cached(args, self.default_strategy.clone()).await
    }

    async fn group_by(&self, args: GroupByArgs) -> Result<Vec<GroupRow>, DbError> {
        self.group_by_cached(args, self.default_strategy.clone()).await
    }
}
