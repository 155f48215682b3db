//! Endpoint selection: round-robin ordering plus a KV-backed circuit breaker.
//!
//! The breaker state (`cb:<url>:fails`, `cb:<url>:openUntil`) and the round-robin cursor
//! (`counters:rr:<modelId>`) live in the shared counter store rather than in process
//! memory, since correctness must not depend on which gateway replica handles a given
//! request.

use gateway_core::Endpoint;
use gateway_resilience::SharedCounterStore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ROUND_ROBIN_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Circuit breaker tuning for the selector.
#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig {
    /// Consecutive failures before an endpoint's breaker opens.
    pub failure_threshold: u32,
    /// How long an opened breaker stays open before the next probe is allowed.
    pub open_duration: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Selects and orders the endpoints a forwarder should attempt for one request.
pub struct EndpointSelector {
    counters: SharedCounterStore,
    config: SelectorConfig,
}

impl EndpointSelector {
    /// Construct a selector over the shared counter store.
    #[must_use]
    pub fn new(counters: SharedCounterStore, config: SelectorConfig) -> Self {
        Self { counters, config }
    }

    /// Build the attempt order for `endpoints`: a round-robin start index, then each
    /// endpoint in `(start+i) mod n` order, skipping any whose breaker is open.
    ///
    /// A round-robin counter failure falls back to starting at index 0 rather than
    /// failing the request; the store is the resilience concern here, not the request.
    pub async fn order(&self, model_id: &str, endpoints: &[Endpoint]) -> Vec<Endpoint> {
        let n = endpoints.len();
        if n == 0 {
            return Vec::new();
        }

        let start = self.round_robin_start(model_id, n).await;

        let mut ordered = Vec::with_capacity(n);
        for i in 0..n {
            let endpoint = &endpoints[(start + i) % n];
            if self.is_available(&endpoint.url).await {
                ordered.push(endpoint.clone());
            } else {
                tracing::warn!(url = %endpoint.url, "skipping endpoint: circuit breaker open");
            }
        }
        ordered
    }

    async fn round_robin_start(&self, model_id: &str, n: usize) -> usize {
        let key = format!("counters:rr:{model_id}");
        match self.counters.incr(&key).await {
            Ok(value) => {
                if let Err(err) = self.counters.expire(&key, ROUND_ROBIN_TTL).await {
                    tracing::warn!(error = %err, "failed to refresh round-robin cursor ttl");
                }
                (value.unsigned_abs() as usize) % n
            }
            Err(err) => {
                tracing::warn!(error = %err, model_id, "round-robin counter unavailable, starting at 0");
                0
            }
        }
    }

    /// Whether `url`'s breaker currently permits traffic. Fails open: a counter-store
    /// error is logged and treated as available.
    pub async fn is_available(&self, url: &str) -> bool {
        let key = format!("cb:{url}:openUntil");
        match self.counters.get(&key).await {
            Ok(Some(value)) => value
                .parse::<i64>()
                .map_or(true, |open_until| open_until <= now_unix()),
            Ok(None) => true,
            Err(err) => {
                tracing::warn!(error = %err, url, "breaker state unavailable, failing open");
                true
            }
        }
    }

    /// Record a failed attempt against `url`, opening the breaker once the configured
    /// threshold is reached.
    pub async fn record_failure(&self, url: &str) {
        let fails_key = format!("cb:{url}:fails");
        let fails = match self.counters.incr(&fails_key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, url, "failed to record endpoint failure");
                return;
            }
        };
        if let Err(err) = self.counters.expire(&fails_key, self.config.open_duration * 4).await {
            tracing::warn!(error = %err, url, "failed to refresh failure counter ttl");
        }

        if fails.unsigned_abs() as u32 >= self.config.failure_threshold {
            let open_until = now_unix() + self.config.open_duration.as_secs() as i64;
            let open_key = format!("cb:{url}:openUntil");
            if let Err(err) = self
                .counters
                .set(&open_key, &open_until.to_string(), Some(self.config.open_duration))
                .await
            {
                tracing::warn!(error = %err, url, "failed to open circuit breaker");
            }
        }
    }

    /// Record a successful attempt against `url`, resetting its breaker to closed.
    pub async fn record_success(&self, url: &str) {
        if let Err(err) = self.counters.set(&format!("cb:{url}:fails"), "0", None).await {
            tracing::warn!(error = %err, url, "failed to reset failure counter");
        }
        if let Err(err) = self.counters.set(&format!("cb:{url}:openUntil"), "0", None).await {
            tracing::warn!(error = %err, url, "failed to clear breaker open state");
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ProviderId;
    use gateway_resilience::MemoryCounterStore;
    use std::sync::Arc;

    fn endpoints(urls: &[&str]) -> Vec<Endpoint> {
        urls.iter()
            .enumerate()
            .map(|(i, url)| Endpoint::new(ProviderId::new(i.to_string()), (*url).to_string(), "gpt4".to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_distributes_starts() {
        let counters: SharedCounterStore = Arc::new(MemoryCounterStore::new());
        let selector = EndpointSelector::new(counters, SelectorConfig::default());
        let eps = endpoints(&["https://a", "https://b", "https://c"]);

        let mut first_urls = Vec::new();
        for _ in 0..3 {
            let ordered = selector.order("m1", &eps).await;
            first_urls.push(ordered[0].url.clone());
        }
        assert_eq!(
            first_urls,
            vec!["https://b", "https://c", "https://a"]
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_and_is_skipped() {
        let counters: SharedCounterStore = Arc::new(MemoryCounterStore::new());
        let selector = EndpointSelector::new(
            counters,
            SelectorConfig {
                failure_threshold: 3,
                open_duration: Duration::from_secs(30),
            },
        );
        for _ in 0..3 {
            selector.record_failure("https://a").await;
        }
        assert!(!selector.is_available("https://a").await);

        let eps = endpoints(&["https://a", "https://b"]);
        let ordered = selector.order("m1", &eps).await;
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].url, "https://b");
    }

    #[tokio::test]
    async fn test_breaker_below_threshold_stays_closed() {
        let counters: SharedCounterStore = Arc::new(MemoryCounterStore::new());
        let selector = EndpointSelector::new(counters, SelectorConfig::default());
        for _ in 0..4 {
            selector.record_failure("https://a").await;
        }
        assert!(selector.is_available("https://a").await);
    }

    #[tokio::test]
    async fn test_success_resets_breaker() {
        let counters: SharedCounterStore = Arc::new(MemoryCounterStore::new());
        let selector = EndpointSelector::new(
            counters,
            SelectorConfig {
                failure_threshold: 2,
                open_duration: Duration::from_secs(30),
            },
        );
        selector.record_failure("https://a").await;
        selector.record_failure("https://a").await;
        assert!(!selector.is_available("https://a").await);

        selector.record_success("https://a").await;
        assert!(selector.is_available("https://a").await);
    }

    #[tokio::test]
    async fn test_empty_endpoint_list_orders_to_empty() {
        let counters: SharedCounterStore = Arc::new(MemoryCounterStore::new());
        let selector = EndpointSelector::new(counters, SelectorConfig::default());
        assert!(selector.order("m1", &[]).await.is_empty());
    }
}
