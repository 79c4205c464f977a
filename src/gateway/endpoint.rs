//! Per-endpoint runtime health
//!
//! The ChainEndpoint itself is immutable after load; everything that changes
//! at runtime lives here in atomics so concurrent workers never lose an
//! update. State transitions use compare-and-swap on the state byte.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::models::config::ChainEndpoint;

/// Health state byte values
const STATE_HEALTHY: u8 = 0;
const STATE_DEGRADED: u8 = 1;
const STATE_COOLING: u8 = 2;

/// Runtime health wrapper around one immutable endpoint
pub struct EndpointHealth {
    pub endpoint: ChainEndpoint,
    state: AtomicU8,
    /// Epoch millis until which the endpoint is excluded from selection
    cooldown_until_ms: AtomicU64,
    consecutive_failures: AtomicU32,
    consecutive_rate_limits: AtomicU32,
    last_used_ms: AtomicU64,
}

impl EndpointHealth {
    pub fn new(endpoint: ChainEndpoint) -> Self {
        Self {
            endpoint,
            state: AtomicU8::new(STATE_HEALTHY),
            cooldown_until_ms: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_rate_limits: AtomicU32::new(0),
            last_used_ms: AtomicU64::new(0),
        }
    }

    /// Endpoint may be selected: not inside a cooldown window
    pub fn is_available(&self) -> bool {
        now_ms() >= self.cooldown_until_ms.load(Ordering::Acquire)
    }

    /// Record a provider failure (timeout, 5xx, bad response) and exclude the
    /// endpoint for the given cooldown.
    pub fn mark_failure(&self, cooldown: Duration) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.cooldown_until_ms
            .store(now_ms() + cooldown.as_millis() as u64, Ordering::Release);
        // Healthy -> Degraded on first failure; already-degraded stays put
        let _ = self.state.compare_exchange(
            STATE_HEALTHY,
            STATE_DEGRADED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        failures
    }

    /// Record an HTTP 429. Returns the consecutive rate-limit count so the
    /// caller can scale the cooldown.
    pub fn record_rate_limit(&self) -> u32 {
        self.consecutive_rate_limits.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Exclude the endpoint until the cooldown elapses, marking it cooling
    /// rather than degraded: the provider is healthy, just throttled.
    pub fn set_cooldown(&self, cooldown: Duration) {
        self.cooldown_until_ms
            .store(now_ms() + cooldown.as_millis() as u64, Ordering::Release);
        self.state.store(STATE_COOLING, Ordering::Release);
    }

    /// Reset to healthy after a successful call
    pub fn mark_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.consecutive_rate_limits.store(0, Ordering::Release);
        self.cooldown_until_ms.store(0, Ordering::Release);
        self.state.store(STATE_HEALTHY, Ordering::Release);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Enforce the configured requests-per-second hint by spacing calls
    pub async fn pace(&self) {
        let now = now_ms();
        let last = self.last_used_ms.swap(now, Ordering::AcqRel);
        if let Some(rps) = self.endpoint.rate_limit {
            let min_interval_ms = 1000 / u64::from(rps.max(1));
            let elapsed = now.saturating_sub(last);
            if elapsed < min_interval_ms {
                tokio::time::sleep(Duration::from_millis(min_interval_ms - elapsed)).await;
            }
        }
    }

    pub fn state_str(&self) -> &'static str {
        match self.state.load(Ordering::Acquire) {
            STATE_HEALTHY => "healthy",
            STATE_DEGRADED => "degraded",
            STATE_COOLING => "cooling",
            _ => "unknown",
        }
    }

    pub fn snapshot(&self) -> EndpointHealthSnapshot {
        EndpointHealthSnapshot {
            chain_id: self.endpoint.chain_id,
            url: self.endpoint.masked_url(),
            priority: self.endpoint.priority,
            state: self.state_str().to_string(),
            consecutive_failures: self.consecutive_failures(),
            available: self.is_available(),
        }
    }
}

/// Point-in-time view of one endpoint, for the health report
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealthSnapshot {
    pub chain_id: u64,
    pub url: String,
    pub priority: u8,
    pub state: String,
    pub consecutive_failures: u32,
    pub available: bool,
}

/// All endpoints for one chain, with round-robin among equal priority
pub struct ChainEndpointSet {
    /// Sorted by priority ascending at construction
    endpoints: Vec<Arc<EndpointHealth>>,
    rr_cursor: AtomicUsize,
}

impl ChainEndpointSet {
    pub fn new(mut endpoints: Vec<ChainEndpoint>) -> Self {
        endpoints.sort_by_key(|e| e.priority);
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|e| Arc::new(EndpointHealth::new(e)))
                .collect(),
            rr_cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoints in selection order: priority groups ascending, each group
    /// rotated by the shared round-robin cursor.
    pub fn selection_order(&self) -> Vec<Arc<EndpointHealth>> {
        let cursor = self.rr_cursor.fetch_add(1, Ordering::AcqRel);
        let mut ordered = Vec::with_capacity(self.endpoints.len());

        let mut i = 0;
        while i < self.endpoints.len() {
            let priority = self.endpoints[i].endpoint.priority;
            let mut j = i;
            while j < self.endpoints.len() && self.endpoints[j].endpoint.priority == priority {
                j += 1;
            }
            let group = &self.endpoints[i..j];
            let offset = cursor % group.len();
            for k in 0..group.len() {
                ordered.push(group[(offset + k) % group.len()].clone());
            }
            i = j;
        }

        ordered
    }

    pub fn snapshots(&self) -> Vec<EndpointHealthSnapshot> {
        self.endpoints.iter().map(|e| e.snapshot()).collect()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(priority: u8) -> ChainEndpoint {
        ChainEndpoint::new(1, format!("https://rpc{}.example.com", priority), priority)
    }

    #[test]
    fn test_failure_excludes_endpoint() {
        let health = EndpointHealth::new(endpoint(0));
        assert!(health.is_available());

        health.mark_failure(Duration::from_secs(60));
        assert!(!health.is_available());
        assert_eq!(health.state_str(), "degraded");
        assert_eq!(health.consecutive_failures(), 1);
    }

    #[test]
    fn test_success_resets_health() {
        let health = EndpointHealth::new(endpoint(0));
        health.mark_failure(Duration::from_secs(60));
        health.mark_success();

        assert!(health.is_available());
        assert_eq!(health.state_str(), "healthy");
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_cooldown_elapses() {
        let health = EndpointHealth::new(endpoint(0));
        health.set_cooldown(Duration::from_millis(0));
        assert_eq!(health.state_str(), "cooling");
        // Zero-length cooldown is immediately over
        assert!(health.is_available());
    }

    #[test]
    fn test_rate_limit_count_grows() {
        let health = EndpointHealth::new(endpoint(0));
        assert_eq!(health.record_rate_limit(), 1);
        assert_eq!(health.record_rate_limit(), 2);
        assert_eq!(health.record_rate_limit(), 3);
    }

    #[test]
    fn test_selection_priority_first() {
        let set = ChainEndpointSet::new(vec![endpoint(1), endpoint(0)]);
        let order = set.selection_order();
        assert_eq!(order[0].endpoint.priority, 0);
        assert_eq!(order[1].endpoint.priority, 1);
    }

    #[test]
    fn test_round_robin_within_priority() {
        let set = ChainEndpointSet::new(vec![
            ChainEndpoint::new(1, "https://a.example.com", 0),
            ChainEndpoint::new(1, "https://b.example.com", 0),
        ]);
        let first = set.selection_order()[0].endpoint.url.clone();
        let second = set.selection_order()[0].endpoint.url.clone();
        assert_ne!(first, second, "equal-priority endpoints should rotate");
    }
}
