use crate::core::cache::{CachedSnapshot, MarketCache};
use crate::core::market::{FetchError, MarketData, MarketDataProvider, MarketKey};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type SharedFetch = Shared<BoxFuture<'static, Result<CachedSnapshot, FetchError>>>;

/// Serves market data from a shared [`MarketCache`], fetching from `inner` on a miss.
///
/// Concurrent requests for the same uncached key share one upstream fetch. The
/// fetch runs as its own task, so a caller that gives up (cancels) never aborts
/// the fetch for the callers still waiting on it.
pub struct CachingMarketProvider<P: MarketDataProvider + 'static> {
    inner: Arc<P>,
    cache: Arc<MarketCache>,
    inflight: Arc<DashMap<MarketKey, SharedFetch>>,
    max_age: Option<Duration>,
    shutdown: CancellationToken,
}

impl<P: MarketDataProvider + 'static> CachingMarketProvider<P> {
    pub fn new(inner: P, cache: Arc<MarketCache>) -> Self {
        Self {
            inner: Arc::new(inner),
            cache,
            inflight: Arc::new(DashMap::new()),
            max_age: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Entries older than `max_age` are refreshed before being served.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn cache(&self) -> &Arc<MarketCache> {
        &self.cache
    }

    /// Aborts every in-flight upstream fetch.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn is_fresh(&self, entry: &CachedSnapshot) -> bool {
        self.max_age
            .is_none_or(|max_age| Utc::now() - entry.fetched_at <= max_age)
    }

    pub async fn get_market_data(
        &self,
        market: &str,
        item_id: u32,
        cancel: &CancellationToken,
    ) -> Result<MarketData, FetchError> {
        let key = MarketKey::new(market, item_id);
        let cached = self.cache.get(&key);
        if let Some(entry) = &cached
            && self.is_fresh(entry)
        {
            return Ok(MarketData {
                snapshot: entry.snapshot.clone(),
                fetched_at: entry.fetched_at,
                stale: false,
            });
        }

        let fetch = self.join_or_start(&key, market, item_id);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = fetch => result,
        };

        match (result, cached) {
            (Ok(entry), _) => Ok(MarketData {
                snapshot: entry.snapshot,
                fetched_at: entry.fetched_at,
                stale: false,
            }),
            (Err(err), Some(entry)) if err != FetchError::Cancelled => {
                warn!(%key, error = %err, "Refresh failed, serving stale market data");
                Ok(MarketData {
                    snapshot: entry.snapshot,
                    fetched_at: entry.fetched_at,
                    stale: true,
                })
            }
            (Err(err), _) => Err(err),
        }
    }

    fn join_or_start(&self, key: &MarketKey, market: &str, item_id: u32) -> SharedFetch {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(%key, "Joining in-flight fetch");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // A fetch may have finished between the cache lookup and here.
                if let Some(cached) = self.cache.get(key)
                    && self.is_fresh(&cached)
                {
                    return futures::future::ready(Ok(cached)).boxed().shared();
                }

                let inner = Arc::clone(&self.inner);
                let cache = Arc::clone(&self.cache);
                let inflight = Arc::clone(&self.inflight);
                let token = self.shutdown.child_token();
                let task_key = key.clone();
                let market = market.to_string();

                let handle = tokio::spawn(async move {
                    let result = inner
                        .fetch_listings(&market, item_id, &token)
                        .await
                        .map(|snapshot| {
                            let entry = CachedSnapshot::now(snapshot);
                            cache.insert(task_key.clone(), entry.clone());
                            entry
                        });
                    inflight.remove(&task_key);
                    result
                });

                let shared = async move {
                    handle
                        .await
                        .unwrap_or_else(|e| Err(FetchError::Task(e.to_string())))
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::{Listing, ListingsSnapshot};
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct MockInnerProvider {
        call_count: Arc<AtomicUsize>,
        delay: StdDuration,
        fail: bool,
    }

    impl MockInnerProvider {
        fn new(delay_ms: u64, fail: bool) -> (Self, Arc<AtomicUsize>) {
            let call_count = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                call_count: Arc::clone(&call_count),
                delay: StdDuration::from_millis(delay_ms),
                fail,
            };
            (provider, call_count)
        }
    }

    fn snapshot(item_id: u32, price: u64) -> ListingsSnapshot {
        ListingsSnapshot {
            item_id,
            market: "Aether".to_string(),
            listings: vec![Listing {
                world_name: "Siren".to_string(),
                quantity: 10,
                price_per_unit: price,
                retainer_name: "r".to_string(),
                is_hq: false,
                region: None,
            }],
            average_price: price as f64,
            last_upload: None,
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockInnerProvider {
        async fn fetch_listings(
            &self,
            _market: &str,
            item_id: u32,
            _cancel: &CancellationToken,
        ) -> Result<ListingsSnapshot, FetchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(FetchError::Status {
                    status: 503,
                    url: "mock".to_string(),
                })
            } else {
                Ok(snapshot(item_id, 100))
            }
        }
    }

    #[tokio::test]
    async fn test_caching_provider_serves_from_cache() {
        let (inner, calls) = MockInnerProvider::new(0, false);
        let provider = CachingMarketProvider::new(inner, Arc::new(MarketCache::new()));
        let cancel = CancellationToken::new();

        // First call - should hit inner provider
        let first = provider.get_market_data("Aether", 1, &cancel).await.unwrap();
        assert!(!first.stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second call - should be cached
        provider.get_market_data("aether", 1, &cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Different item
        provider.get_market_data("Aether", 2, &cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_requests_share_one_fetch() {
        let (inner, calls) = MockInnerProvider::new(50, false);
        let provider = CachingMarketProvider::new(inner, Arc::new(MarketCache::new()));
        let cancel = CancellationToken::new();

        let requests = (0..10).map(|_| provider.get_market_data("Aether", 7, &cancel));
        let results = join_all(requests).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(provider.cache().contains(&MarketKey::new("Aether", 7)));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_shared_fetch() {
        let (inner, calls) = MockInnerProvider::new(100, false);
        let provider = CachingMarketProvider::new(inner, Arc::new(MarketCache::new()));

        let impatient = CancellationToken::new();
        let trigger = impatient.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            trigger.cancel();
        });
        let patient = CancellationToken::new();

        let (first, second) = tokio::join!(
            provider.get_market_data("Aether", 3, &impatient),
            provider.get_market_data("Aether", 3, &patient),
        );

        assert_eq!(first, Err(FetchError::Cancelled));
        assert_eq!(second.unwrap().snapshot.item_id, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (inner, calls) = MockInnerProvider::new(0, true);
        let provider = CachingMarketProvider::new(inner, Arc::new(MarketCache::new()));
        let cancel = CancellationToken::new();

        assert!(provider.get_market_data("Aether", 1, &cancel).await.is_err());
        assert!(provider.get_market_data("Aether", 1, &cancel).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(provider.cache().is_empty());
    }

    #[tokio::test]
    async fn test_stale_entry_served_when_refresh_fails() {
        let (inner, calls) = MockInnerProvider::new(0, true);
        let cache = Arc::new(MarketCache::new());
        let fetched_at = Utc::now() - Duration::hours(3);
        cache.insert(
            MarketKey::new("Aether", 1),
            CachedSnapshot {
                snapshot: snapshot(1, 80),
                fetched_at,
            },
        );
        let provider =
            CachingMarketProvider::new(inner, cache).with_max_age(Duration::minutes(30));

        let data = provider
            .get_market_data("Aether", 1, &CancellationToken::new())
            .await
            .unwrap();

        assert!(data.stale);
        assert_eq!(data.fetched_at, fetched_at);
        assert_eq!(data.snapshot.listings[0].price_per_unit, 80);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_fetch() {
        let (inner, calls) = MockInnerProvider::new(0, false);
        let cache = Arc::new(MarketCache::new());
        cache.store(MarketKey::new("Aether", 1), snapshot(1, 80));
        let provider =
            CachingMarketProvider::new(inner, cache).with_max_age(Duration::minutes(30));

        let data = provider
            .get_market_data("Aether", 1, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!data.stale);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
