//! Call-site caching combinator.
//!
//! The original decorator-style method caching is expressed as an explicit
//! wrapper: construct a [`CachedCall`] once per cached method, then route the
//! call through [`CachedCall::invoke`] with the original method body as the
//! provider. The cache key is the scope (an explicit override or
//! `"Type::method"`) combined with the serialized call arguments.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::engine::HybridCache;
use crate::error::CacheError;

/// Which cache tier a wrapped call goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    L1,
    L2,
}

/// Where a wrapped call's TTL comes from.
///
/// `Dynamic` is re-evaluated on every call — the closure owns whatever
/// resolver it needs (a config handle, a container lookup) and its result is
/// never cached itself.
#[derive(Clone)]
pub enum TtlSource {
    None,
    Fixed(Duration),
    Dynamic(Arc<dyn Fn() -> Option<Duration> + Send + Sync>),
}

impl TtlSource {
    fn resolve(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed(ttl) => Some(*ttl),
            Self::Dynamic(ttl_fn) => ttl_fn(),
        }
    }
}

/// A cached unit of work bound to an engine, a scope, a tier and a TTL.
///
/// # Example
///
/// ```ignore
/// let find_user = CachedCall::for_method(cache, CacheLevel::L1, "UserService", "find")
///     .with_ttl(Duration::from_secs(30));
///
/// let user: Option<User> = find_user
///     .invoke(&user_id, || async { repo.find(user_id).await })
///     .await?;
/// ```
pub struct CachedCall {
    cache: Arc<HybridCache>,
    scope: String,
    level: CacheLevel,
    ttl: TtlSource,
}

impl CachedCall {
    /// Build a wrapper with an explicit key scope.
    pub fn new(cache: Arc<HybridCache>, level: CacheLevel, scope: impl Into<String>) -> Self {
        Self {
            cache,
            scope: scope.into(),
            level,
            ttl: TtlSource::None,
        }
    }

    /// Build a wrapper scoped to `"{type_name}::{method_name}"`.
    pub fn for_method(
        cache: Arc<HybridCache>,
        level: CacheLevel,
        type_name: &str,
        method_name: &str,
    ) -> Self {
        Self::new(cache, level, format!("{type_name}::{method_name}"))
    }

    /// Use a fixed TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = TtlSource::Fixed(ttl);
        self
    }

    /// Use a TTL computed fresh on every call.
    pub fn with_dynamic_ttl<F>(mut self, ttl_fn: F) -> Self
    where
        F: Fn() -> Option<Duration> + Send + Sync + 'static,
    {
        self.ttl = TtlSource::Dynamic(Arc::new(ttl_fn));
        self
    }

    /// Run `op` through the cache, keyed by this wrapper's scope plus `args`.
    pub async fn invoke<A, T, F, Fut>(&self, args: &A, op: F) -> Result<Option<T>, CacheError>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let param = Value::Array(vec![
            Value::String(self.scope.clone()),
            serde_json::to_value(args)?,
        ]);
        let ttl = self.ttl.resolve();

        match self.level {
            CacheLevel::L1 => self.cache.get_l1(&param, op, ttl).await,
            CacheLevel::L2 => self.cache.get_l2(&param, op, ttl).await,
        }
    }
}
