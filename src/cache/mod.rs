mod query;


use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::NodeApiError;
use crate::metrics;
use crate::node_api::{Blockchain, RemoteDataClient, Transaction};
pub use query::{QueryState, QueryStatus};

pub const BLOCKCHAIN_KEY: &str = "blockchain";
pub const TRANSACTIONS_KEY: &str = "transactions";

type CachedValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue, NodeApiError>>>;

#[derive(Default)]
struct Entry {
    value: Option<CachedValue>,
    fresh: bool,
    /// Bumped by `set`, `invalidate` and every new fetch; a fetch only
    /// writes back if the generation it started under is still current.
    generation: u64,
    in_flight: Option<SharedFetch>,
}

/// Keyed snapshot store shared by every view.
///
/// Values are replaced wholesale; the only mutations are [`EntityCache::set`]
/// and [`EntityCache::invalidate`]. Concurrent reads of a stale or missing key
/// share a single fetch.
#[derive(Default)]
pub struct EntityCache {
    entries: DashMap<String, Entry>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last fetched value for `key`, if it is still fresh.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self.entries.get(key)?;
        if !entry.fresh {
            return None;
        }
        entry.value.as_ref().and_then(|v| v.downcast_ref::<T>().cloned())
    }

    /// The last fetched value for `key`, fresh or not.
    pub fn peek<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self.entries.get(key)?;
        entry.value.as_ref().and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn is_fresh(&self, key: &str) -> bool {
        self.entries.get(key).map(|e| e.fresh).unwrap_or(false)
    }

    pub fn is_fetching(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| e.in_flight.is_some())
            .unwrap_or(false)
    }

    pub fn set<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.value = Some(Arc::new(value));
        entry.fresh = true;
        entry.generation += 1;
        entry.in_flight = None;
    }

    /// Marks `key` stale so the next read fetches again. A fetch in flight
    /// for `key` is detached: callers already waiting on it still get its
    /// result, but it is not stored.
    pub fn invalidate(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.fresh = false;
            entry.generation += 1;
            entry.in_flight = None;
            debug!("Invalidated cache entry '{}'", key);
        }
    }

    /// Returns the fresh value for `key`, or fetches it. A fetch already in
    /// flight for `key` is joined instead of starting another one.
    ///
    /// `fetcher` runs while the entry is locked, so it must only build the
    /// future and not touch the cache itself.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
    ) -> Result<T, NodeApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NodeApiError>> + Send + 'static,
    {
        self.load(key, fetcher, false).await
    }

    /// Fetches `key` even if the cached value is fresh. On failure the
    /// previous value keeps whatever freshness it had.
    pub async fn refresh<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
    ) -> Result<T, NodeApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NodeApiError>> + Send + 'static,
    {
        self.load(key, fetcher, true).await
    }

    /// [`EntityCache::get_or_fetch`] folded into the status/data/error shape
    /// views render from. On failure the previous value, if any, is kept in
    /// `data` alongside the error.
    pub async fn query<T, F, Fut>(&self, key: &str, fetcher: F) -> QueryState<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NodeApiError>> + Send + 'static,
    {
        match self.get_or_fetch(key, fetcher).await {
            Ok(data) => QueryState::success(data),
            Err(e) => QueryState::error(self.peek(key), &e),
        }
    }

    /// Current status of `key` without triggering a fetch.
    pub fn state<T>(&self, key: &str) -> QueryState<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some(entry) = self.entries.get(key) else {
            return QueryState::idle();
        };
        let data = entry
            .value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>().cloned());
        if entry.in_flight.is_some() {
            QueryState::loading(data)
        } else if entry.fresh {
            data.map(QueryState::success).unwrap_or_else(QueryState::idle)
        } else {
            QueryState::stale(data)
        }
    }

    pub async fn blockchain(
        &self,
        client: &Arc<dyn RemoteDataClient>,
    ) -> Result<Blockchain, NodeApiError> {
        let client = Arc::clone(client);
        self.get_or_fetch(BLOCKCHAIN_KEY, move || async move {
            client.fetch_blockchain().await
        })
        .await
    }

    pub async fn transactions(
        &self,
        client: &Arc<dyn RemoteDataClient>,
    ) -> Result<Vec<Transaction>, NodeApiError> {
        let client = Arc::clone(client);
        self.get_or_fetch(TRANSACTIONS_KEY, move || async move {
            client.fetch_transaction_pool().await
        })
        .await
    }

    async fn load<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        force: bool,
    ) -> Result<T, NodeApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NodeApiError>> + Send + 'static,
    {
        let (fetch, generation) = {
            let mut entry = self.entries.entry(key.to_string()).or_default();

            if !force && entry.fresh {
                if let Some(value) = entry.value.as_ref().and_then(|v| v.downcast_ref::<T>()) {
                    metrics::record_cache_hit(key);
                    return Ok(value.clone());
                }
            }

            if let Some(fetch) = entry.in_flight.clone() {
                debug!("Joining in-flight fetch for '{}'", key);
                metrics::record_cache_dedup_join(key);
                (fetch, entry.generation)
            } else {
                debug!("Fetching '{}'", key);
                metrics::record_cache_miss(key);
                let fut = fetcher();
                let fetch = async move { fut.await.map(|v| Arc::new(v) as CachedValue) }
                    .boxed()
                    .shared();
                entry.generation += 1;
                entry.in_flight = Some(fetch.clone());
                (fetch, entry.generation)
            }
        };

        let result = fetch.await;
        self.complete(key, generation, &result);

        let value = result?;
        value.downcast_ref::<T>().cloned().ok_or_else(|| {
            NodeApiError::Decode(format!("cached value for '{}' has an unexpected type", key))
        })
    }

    fn complete(
        &self,
        key: &str,
        generation: u64,
        result: &Result<CachedValue, NodeApiError>,
    ) {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        // Only the first caller to finish a fetch writes back, and only if
        // nothing replaced or invalidated the entry in the meantime.
        if entry.generation != generation || entry.in_flight.is_none() {
            return;
        }
        entry.in_flight = None;
        match result {
            Ok(value) => {
                entry.value = Some(Arc::clone(value));
                entry.fresh = true;
            }
            Err(e) => {
                warn!("Fetch for '{}' failed, keeping previous value: {}", key, e);
            }
        }
    }
}
