//! Authorized business scope cache
//!
//! Keeps the last known authorized business list per (tenant, user) so list queries can run
//! without waiting on the policy engine. Every request follows the same protocol:
//!
//! 1. Snapshot the cached list, then spawn a refresh for the key.
//! 2. With a cached list, run the query against it right away.
//! 3. Await the refresh.
//! 4. If the refreshed list differs from the snapshot as a set, run the query again with the
//!    refreshed list and return that result instead.
//!
//! Without a cached list the request waits for the refresh. Only successful refreshes write
//! the cache and the last one to finish wins. A refresh is a spawned task, so it may outlive
//! the request that started it and still populate the cache.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Authorizer;
use crate::config::WarmRefreshPolicy;
use crate::error::{AuthzError, Result};
use crate::meta::UserInfo;

/// (tenant, user name)
type CacheKey = (String, String);

/// Business filter handed to a scoped query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusinessScope {
    /// Enforcement is off; no filter applies
    Unrestricted,
    /// Only these businesses, ascending and unique. Empty means no access.
    Only(Vec<i64>),
}

impl BusinessScope {
    pub fn allows(&self, business_id: i64) -> bool {
        match self {
            BusinessScope::Unrestricted => true,
            BusinessScope::Only(ids) => ids.binary_search(&business_id).is_ok(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served first from a cached list
    pub hits: usize,
    /// Requests that waited for the first refresh
    pub misses: usize,
    /// Queries re-run because the refreshed list changed
    pub requeries: usize,
    pub refresh_failures: usize,
    pub entries: usize,
}

/// Per-user authorized business cache
pub struct BusinessScopeCache {
    authorizer: Arc<dyn Authorizer>,
    entries: Arc<DashMap<CacheKey, Vec<i64>>>,
    policy: WarmRefreshPolicy,
    shutdown: CancellationToken,
    stats: Arc<DashMap<String, usize>>,
}

impl BusinessScopeCache {
    pub fn new(authorizer: Arc<dyn Authorizer>, policy: WarmRefreshPolicy) -> Self {
        Self {
            authorizer,
            entries: Arc::new(DashMap::new()),
            policy,
            shutdown: CancellationToken::new(),
            stats: Arc::new(DashMap::new()),
        }
    }

    fn key(user: &UserInfo) -> CacheKey {
        (user.supplier_account.clone(), user.user_name.clone())
    }

    /// Cached list for a user, if any
    pub fn cached(&self, user: &UserInfo) -> Option<Vec<i64>> {
        self.entries.get(&Self::key(user)).map(|e| e.value().clone())
    }

    pub fn invalidate(&self, user: &UserInfo) {
        self.entries.remove(&Self::key(user));
    }

    /// Run `query` restricted to the businesses `user` may see
    pub async fn scoped_query<T, F, Fut>(&self, user: &UserInfo, query: F) -> Result<T>
    where
        F: Fn(BusinessScope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.authorizer.enabled() {
            return query(BusinessScope::Unrestricted).await;
        }

        let stale = self.cached(user);
        let refresh = self.spawn_refresh(user.clone());

        let Some(stale) = stale else {
            self.increment_stat("misses");
            let fresh = self.join_refresh(refresh).await?;
            debug!(user = %user.user_name, count = fresh.len(), "business scope loaded");
            return query(BusinessScope::Only(fresh)).await;
        };

        self.increment_stat("hits");
        let result = query(BusinessScope::Only(stale.clone())).await;

        match self.join_refresh(refresh).await {
            Ok(fresh) if fresh == stale => result,
            Ok(fresh) => {
                debug!(
                    user = %user.user_name,
                    stale = stale.len(),
                    fresh = fresh.len(),
                    "business scope changed, re-running query"
                );
                self.increment_stat("requeries");
                query(BusinessScope::Only(fresh)).await
            }
            Err(e) => match self.policy {
                WarmRefreshPolicy::FailRequest => Err(e),
                WarmRefreshPolicy::DegradeToStale => {
                    warn!(user = %user.user_name, error = %e, "business scope refresh failed, serving stale scope");
                    result
                }
            },
        }
    }

    fn spawn_refresh(&self, user: UserInfo) -> JoinHandle<Result<Vec<i64>>> {
        let authorizer = self.authorizer.clone();
        let entries = self.entries.clone();
        let token = self.shutdown.clone();

        tokio::spawn(async move {
            let list = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(AuthzError::CacheRefresh("cache is shut down".to_string()));
                }
                list = authorizer.get_authorized_business_list(&user) => list,
            };

            let mut list = list.map_err(|e| {
                AuthzError::CacheRefresh(format!(
                    "get authorized businesses for {} failed: {e}",
                    user.user_name
                ))
            })?;
            list.sort_unstable();
            list.dedup();

            if !token.is_cancelled() {
                entries.insert(Self::key(&user), list.clone());
            }
            Ok(list)
        })
    }

    async fn join_refresh(&self, handle: JoinHandle<Result<Vec<i64>>>) -> Result<Vec<i64>> {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AuthzError::CacheRefresh(format!("refresh task failed: {e}"))),
        };
        if outcome.is_err() {
            self.increment_stat("refresh_failures");
        }
        outcome
    }

    /// Cancel in-flight refreshes and drop every entry
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            requeries: self.get_stat("requeries"),
            refresh_failures: self.get_stat("refresh_failures"),
            entries: self.entries.len(),
        }
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|v| *v += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl Drop for BusinessScopeCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
