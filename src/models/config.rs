//! Engine configuration
//!
//! One explicit structure with enumerated recognized options, loaded from the
//! environment with chain-table fallbacks and validated at startup. A failed
//! validation is fatal (ConfigInvalid) - the engine never runs half-configured.

use alloy_primitives::U256;
use std::time::Duration;
use tracing::info;

use crate::models::errors::{EngineError, EngineResult};
use crate::utils::constants::{
    eth_to_wei, get_public_rpc_fallback, is_chain_supported, rpc_env_key,
    DEFAULT_CONCENTRATION_THRESHOLD_PCT,
    DEFAULT_LIQUIDITY_FLOOR_USD, DEFAULT_MAX_EFFECTIVE_TAX_BPS, DEFAULT_MAX_FACTOR_SCORE,
    DEFAULT_PROBE_AMOUNT_WEI, DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_STREAM_MAXLEN,
    DEFAULT_STREAM_NAME, DEFAULT_STREAM_WRITE_TIMEOUT_SECS, DEFAULT_TAX_SCORE_THRESHOLD_BPS,
    GATEWAY_ATTEMPTS_PER_ENDPOINT, GATEWAY_BASE_BACKOFF_MS, GATEWAY_MAX_BACKOFF_MS,
    GATEWAY_RATE_LIMIT_COOLDOWN_MULTIPLIER, SUPPORTED_CHAIN_IDS,
};

/// One RPC provider for one chain. Immutable after load; runtime health is
/// tracked separately by the gateway.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub chain_id: u64,
    pub url: String,
    /// Lower value = preferred. Equal priorities round-robin.
    pub priority: u8,
    /// Optional requests-per-second hint enforced by the gateway
    pub rate_limit: Option<u32>,
}

impl ChainEndpoint {
    pub fn new(chain_id: u64, url: impl Into<String>, priority: u8) -> Self {
        Self {
            chain_id,
            url: url.into(),
            priority,
            rate_limit: None,
        }
    }

    /// URL with any API key path segment masked, for logging
    pub fn masked_url(&self) -> String {
        if self.url.contains("/v2/") {
            let parts: Vec<&str> = self.url.split("/v2/").collect();
            if parts.len() == 2 {
                return format!("{}/v2/***HIDDEN***", parts[0]);
            }
        }
        self.url.clone()
    }
}

/// Gateway retry/backoff parameters
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base delay for exponential backoff
    pub base_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Attempts against one endpoint before moving to the next
    pub attempts_per_endpoint: u32,
    /// Cooldown = base_backoff * multiplier on HTTP 429
    pub rate_limit_cooldown_multiplier: u32,
    /// Per-request timeout
    pub rpc_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(GATEWAY_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(GATEWAY_MAX_BACKOFF_MS),
            attempts_per_endpoint: GATEWAY_ATTEMPTS_PER_ENDPOINT,
            rate_limit_cooldown_multiplier: GATEWAY_RATE_LIMIT_COOLDOWN_MULTIPLIER,
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
        }
    }
}

/// Alert publisher parameters
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub stream_name: String,
    /// Approximate producer-side stream cap
    pub stream_maxlen: usize,
    /// Write attempts before PublishFailed surfaces
    pub retry_attempts: u32,
    /// Per-write timeout
    pub write_timeout: Duration,
    /// How long idempotency receipts are retained
    pub idempotency_ttl: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            stream_maxlen: DEFAULT_STREAM_MAXLEN,
            retry_attempts: 3,
            write_timeout: Duration::from_secs(DEFAULT_STREAM_WRITE_TIMEOUT_SECS),
            idempotency_ttl: Duration::from_secs(3600),
        }
    }
}

/// Token probe parameters
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Notional used for the simulated buy leg
    pub test_amount_wei: U256,
    /// Sell tax above this classifies the token unsellable
    pub max_effective_tax_bps: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            test_amount_wei: U256::from(DEFAULT_PROBE_AMOUNT_WEI),
            max_effective_tax_bps: DEFAULT_MAX_EFFECTIVE_TAX_BPS,
        }
    }
}

/// Scoring weights. The concentration/liquidity weights have not been
/// calibrated against labeled rug data yet, hence configurable rather than
/// hard-coded in the scorer.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    /// Sell tax below this contributes nothing (bps)
    pub tax_threshold_bps: u64,
    /// Cap on each factor's contribution
    pub max_factor_score: f64,
    /// Top-holder share above which concentration starts scoring (percent)
    pub concentration_threshold_pct: f64,
    /// Liquidity below this starts scoring (USD)
    pub liquidity_floor_usd: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            tax_threshold_bps: DEFAULT_TAX_SCORE_THRESHOLD_BPS,
            max_factor_score: DEFAULT_MAX_FACTOR_SCORE,
            concentration_threshold_pct: DEFAULT_CONCENTRATION_THRESHOLD_PCT,
            liquidity_floor_usd: DEFAULT_LIQUIDITY_FLOOR_USD,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// All configured RPC endpoints, across chains
    pub endpoints: Vec<ChainEndpoint>,
    /// Maximum analysis tasks in flight
    pub max_concurrent_tasks: usize,
    /// Task attempts before a ChainUnavailable failure becomes terminal
    pub max_task_attempts: u32,
    /// Base delay before requeueing a failed task
    pub requeue_backoff: Duration,
    pub gateway: GatewayConfig,
    pub publisher: PublisherConfig,
    pub probe: ProbeConfig,
    pub scoring: ScoringWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_concurrent_tasks: 16,
            max_task_attempts: 3,
            requeue_backoff: Duration::from_secs(5),
            gateway: GatewayConfig::default(),
            publisher: PublisherConfig::default(),
            probe: ProbeConfig::default(),
            scoring: ScoringWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Build configuration from the environment. Per-chain primary URLs come
    /// from their env keys (priority 0); public fallbacks are appended at
    /// priority 1 so a throttled primary degrades instead of failing hard.
    pub fn from_env() -> Self {
        let mut endpoints = Vec::new();

        for chain_id in SUPPORTED_CHAIN_IDS {
            let env_key = match rpc_env_key(chain_id) {
                Some(key) => key,
                None => continue,
            };

            if let Ok(url) = std::env::var(env_key) {
                if !url.is_empty() {
                    endpoints.push(ChainEndpoint::new(chain_id, url, 0));
                }
            }

            if let Some(fallback) = get_public_rpc_fallback(chain_id) {
                endpoints.push(ChainEndpoint::new(chain_id, fallback, 1));
            }
        }

        let max_concurrent_tasks = env_usize("SENTRY_MAX_CONCURRENT", 16);
        let max_task_attempts = env_u32("SENTRY_MAX_TASK_ATTEMPTS", 3);

        let mut publisher = PublisherConfig::default();
        if let Ok(name) = std::env::var("SENTRY_STREAM_NAME") {
            if !name.is_empty() {
                publisher.stream_name = name;
            }
        }

        let mut probe = ProbeConfig::default();
        probe.max_effective_tax_bps =
            env_u64("SENTRY_MAX_EFFECTIVE_TAX_BPS", DEFAULT_MAX_EFFECTIVE_TAX_BPS);
        if let Some(amount) = std::env::var("SENTRY_PROBE_AMOUNT_ETH")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| *v > 0.0)
        {
            probe.test_amount_wei = eth_to_wei(amount);
        }

        info!(
            "⚙️ Config loaded: {} endpoints, {} concurrent tasks",
            endpoints.len(),
            max_concurrent_tasks
        );

        Self {
            endpoints,
            max_concurrent_tasks,
            max_task_attempts,
            probe,
            publisher,
            ..Self::default()
        }
    }

    /// Validate the configuration. Any failure here is fatal at startup.
    pub fn validate(&self) -> EngineResult<()> {
        if self.endpoints.is_empty() {
            return Err(EngineError::config_invalid("no RPC endpoints configured"));
        }
        for ep in &self.endpoints {
            if !is_chain_supported(ep.chain_id) {
                return Err(EngineError::config_invalid(format!(
                    "chain {} is not in the supported chain table",
                    ep.chain_id
                )));
            }
            if !ep.url.starts_with("http://") && !ep.url.starts_with("https://") {
                return Err(EngineError::config_invalid(format!(
                    "endpoint for chain {} has non-HTTP url: {}",
                    ep.chain_id,
                    ep.masked_url()
                )));
            }
        }
        if self.max_concurrent_tasks == 0 {
            return Err(EngineError::config_invalid("max_concurrent_tasks must be >= 1"));
        }
        if self.max_task_attempts == 0 {
            return Err(EngineError::config_invalid("max_task_attempts must be >= 1"));
        }
        if self.probe.max_effective_tax_bps == 0 || self.probe.max_effective_tax_bps > 10_000 {
            return Err(EngineError::config_invalid(
                "max_effective_tax_bps must be in (0, 10000]",
            ));
        }
        if self.probe.test_amount_wei.is_zero() {
            return Err(EngineError::config_invalid("probe test amount must be non-zero"));
        }
        if self.scoring.max_factor_score <= 0.0 || self.scoring.max_factor_score > 100.0 {
            return Err(EngineError::config_invalid(
                "max_factor_score must be in (0, 100]",
            ));
        }
        if self.gateway.attempts_per_endpoint == 0 {
            return Err(EngineError::config_invalid(
                "attempts_per_endpoint must be >= 1",
            ));
        }
        Ok(())
    }

    /// Endpoints configured for one chain, priority order preserved
    pub fn endpoints_for_chain(&self, chain_id: u64) -> Vec<ChainEndpoint> {
        let mut eps: Vec<ChainEndpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.chain_id == chain_id)
            .cloned()
            .collect();
        eps.sort_by_key(|e| e.priority);
        eps
    }

    /// Chain ids that have at least one endpoint
    pub fn configured_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.endpoints.iter().map(|e| e.chain_id).collect();
        chains.sort_unstable();
        chains.dedup();
        chains
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::ErrorCode;

    fn config_with_endpoint() -> EngineConfig {
        EngineConfig {
            endpoints: vec![ChainEndpoint::new(1, "https://eth.example.com", 0)],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(config_with_endpoint().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let config = EngineConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_validate_rejects_unsupported_chain() {
        let mut config = config_with_endpoint();
        config.endpoints.push(ChainEndpoint::new(999, "https://nope.example.com", 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = config_with_endpoint();
        config.endpoints.push(ChainEndpoint::new(1, "redis://nope", 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = config_with_endpoint();
        config.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_tax() {
        let mut config = config_with_endpoint();
        config.probe.max_effective_tax_bps = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoints_sorted_by_priority() {
        let mut config = config_with_endpoint();
        config.endpoints.insert(
            0,
            ChainEndpoint::new(1, "https://fallback.example.com", 1),
        );
        let eps = config.endpoints_for_chain(1);
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].priority, 0);
        assert_eq!(eps[1].priority, 1);
    }

    #[test]
    fn test_masked_url() {
        let ep = ChainEndpoint::new(1, "https://eth-mainnet.g.alchemy.com/v2/secretkey", 0);
        assert!(!ep.masked_url().contains("secretkey"));
        assert!(ep.masked_url().contains("***HIDDEN***"));
    }
}
