//! Chain Gateway - multi-provider RPC access with failover
//!
//! One gateway fronts every configured chain. Per request it walks the
//! chain's endpoints in priority order (round-robin among equal priority),
//! retrying each with exponential backoff and full jitter (base 1s, cap 30s).
//! HTTP 429 gets a proportional in-place cooldown before the endpoint is
//! marked cooling, so a throttled but healthy provider is not abandoned.
//! When every endpoint is exhausted the caller sees ChainUnavailable.
//!
//! Simulation reverts are a *result*, not a provider failure: they never
//! trigger failover and never degrade endpoint health.

pub mod endpoint;
pub mod transport;

use alloy_primitives::{keccak256, Address, B256, U256};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::config::{EngineConfig, GatewayConfig};
use crate::models::errors::{EngineError, EngineResult, ErrorCode};
use crate::models::types::{ChainState, SimResult, TradeDirection};
use crate::utils::constants::{
    get_primary_router, get_wrapped_native, PROBE_GAS_FUNDING_WEI, PROBE_SLOT_SEARCH_LIMIT,
    SELECTOR_ALLOWANCE, SELECTOR_BALANCE_OF, SELECTOR_GET_AMOUNTS_OUT,
    SELECTOR_SWAP_EXACT_ETH_FOR_TOKENS, SELECTOR_SWAP_EXACT_TOKENS_FOR_ETH,
};

pub use endpoint::{ChainEndpointSet, EndpointHealth, EndpointHealthSnapshot};
pub use transport::{HttpTransport, RpcTransport};

/// Outcome of one successfully transported eth_call
#[derive(Debug)]
enum CallOutcome {
    /// JSON-RPC result payload
    Result(serde_json::Value),
    /// Execution reverted inside the call
    Reverted(String),
}

/// Multi-chain RPC gateway. Read-only: never mutates chain state, never
/// caches simulation results across calls.
pub struct ChainGateway {
    chains: DashMap<u64, Arc<ChainEndpointSet>>,
    transport: Arc<dyn RpcTransport>,
    config: GatewayConfig,
}

impl ChainGateway {
    pub fn new(config: &EngineConfig, transport: Arc<dyn RpcTransport>) -> Self {
        let chains = DashMap::new();
        for chain_id in config.configured_chains() {
            let set = ChainEndpointSet::new(config.endpoints_for_chain(chain_id));
            if !set.is_empty() {
                chains.insert(chain_id, Arc::new(set));
            }
        }
        Self {
            chains,
            transport,
            config: config.gateway.clone(),
        }
    }

    /// Fetch the chain state relevant to one token
    pub async fn fetch_state(&self, chain_id: u64, token: Address) -> EngineResult<ChainState> {
        let addr = addr_hex(token);

        let code = self
            .request_string(chain_id, "eth_getCode", serde_json::json!([addr, "latest"]))
            .await?;
        let block_hex = self
            .request_string(chain_id, "eth_blockNumber", serde_json::json!([]))
            .await?;

        let block_number = parse_hex_u64(&block_hex)?;
        let code_size = code.trim_start_matches("0x").len() / 2;

        Ok(ChainState {
            chain_id,
            block_number,
            has_code: code_size > 0,
            code_size,
        })
    }

    /// Simulate one swap leg against current chain state, without
    /// broadcasting anything. Both legs of a probe run as the same caller:
    /// the buy gets its native balance through an eth_call state override,
    /// and the sell gets the caller's token balance and router allowance
    /// written straight into the token's storage, since independent
    /// eth_calls share no state and an approve call would not persist.
    pub async fn simulate_transfer(
        &self,
        chain_id: u64,
        token: Address,
        direction: TradeDirection,
        amount_in: U256,
        caller: Address,
    ) -> EngineResult<SimResult> {
        let wrapped = get_wrapped_native(chain_id)
            .ok_or_else(|| EngineError::chain_unsupported(chain_id))?;
        let router = get_primary_router(chain_id)
            .ok_or_else(|| EngineError::chain_unsupported(chain_id))?;

        let path = match direction {
            TradeDirection::Buy => vec![wrapped, token],
            TradeDirection::Sell => vec![token, wrapped],
        };

        // Quote the leg first: the zero-tax expectation the realized output
        // is measured against.
        let quote_calldata = encode_get_amounts_out(amount_in, &path);
        let quote_params = serde_json::json!([
            { "to": addr_hex(router), "data": quote_calldata },
            "latest"
        ]);

        let quoted_out = match self.request_raw(chain_id, "eth_call", quote_params).await? {
            CallOutcome::Result(v) => parse_amounts_out(&v)?,
            CallOutcome::Reverted(reason) => {
                return Ok(SimResult {
                    direction,
                    amount_in,
                    quoted_out: U256::ZERO,
                    amount_out: U256::ZERO,
                    reverted: true,
                    revert_reason: Some(format!("quote reverted: {}", reason)),
                });
            }
        };

        let deadline = U256::from(u64::MAX);
        let gas_funding = U256::from(PROBE_GAS_FUNDING_WEI);
        let (call_obj, overrides) = match direction {
            TradeDirection::Buy => (
                serde_json::json!({
                    "from": addr_hex(caller),
                    "to": addr_hex(router),
                    "value": format!("{:#x}", amount_in),
                    "data": encode_swap_exact_eth_for_tokens(U256::ZERO, &path, caller, deadline),
                }),
                serde_json::json!({
                    addr_hex(caller): {
                        "balance": format!("{:#x}", amount_in.saturating_add(gas_funding)),
                    },
                }),
            ),
            TradeDirection::Sell => {
                let balance_base = self
                    .find_balance_slot(chain_id, token, caller, amount_in)
                    .await?
                    .ok_or_else(|| {
                        EngineError::simulation_anomaly(format!(
                            "balance storage slot not found for {} on chain {}",
                            addr_hex(token),
                            chain_id
                        ))
                    })?;
                let allowance_base = self
                    .find_allowance_slot(chain_id, token, caller, router)
                    .await?
                    .ok_or_else(|| {
                        EngineError::simulation_anomaly(format!(
                            "allowance storage slot not found for {} on chain {}",
                            addr_hex(token),
                            chain_id
                        ))
                    })?;

                let balance_slot = mapping_slot(caller, balance_base);
                let allowance_slot = nested_mapping_slot(caller, router, allowance_base);
                (
                    serde_json::json!({
                        "from": addr_hex(caller),
                        "to": addr_hex(router),
                        "data": encode_swap_exact_tokens_for_eth(amount_in, U256::ZERO, &path, caller, deadline),
                    }),
                    serde_json::json!({
                        addr_hex(caller): { "balance": format!("{:#x}", gas_funding) },
                        addr_hex(token): {
                            "stateDiff": {
                                slot_hex(balance_slot): word_hex(amount_in),
                                slot_hex(allowance_slot): word_hex(U256::MAX),
                            },
                        },
                    }),
                )
            }
        };

        match self
            .request_raw(
                chain_id,
                "eth_call",
                serde_json::json!([call_obj, "latest", overrides]),
            )
            .await?
        {
            CallOutcome::Result(v) => {
                let amount_out = parse_amounts_out(&v)?;
                Ok(SimResult {
                    direction,
                    amount_in,
                    quoted_out,
                    amount_out,
                    reverted: false,
                    revert_reason: None,
                })
            }
            CallOutcome::Reverted(reason) => {
                debug!(
                    "⛔ {} simulation reverted for {} on chain {}: {}",
                    direction.as_str(),
                    addr_hex(token),
                    chain_id,
                    reason
                );
                Ok(SimResult {
                    direction,
                    amount_in,
                    quoted_out,
                    amount_out: U256::ZERO,
                    reverted: true,
                    revert_reason: Some(reason),
                })
            }
        }
    }

    /// Locate the base slot of the token's balance mapping by writing a
    /// marker into each candidate slot (Solidity layout,
    /// keccak(holder ++ base)) and reading it back through balanceOf.
    async fn find_balance_slot(
        &self,
        chain_id: u64,
        token: Address,
        holder: Address,
        marker: U256,
    ) -> EngineResult<Option<U256>> {
        for base in 0..PROBE_SLOT_SEARCH_LIMIT {
            let base = U256::from(base);
            let slot = mapping_slot(holder, base);
            let call = serde_json::json!({
                "to": addr_hex(token),
                "data": encode_balance_of(holder),
            });
            let overrides = serde_json::json!({
                addr_hex(token): { "stateDiff": { slot_hex(slot): word_hex(marker) } },
            });
            let params = serde_json::json!([call, "latest", overrides]);

            match self.request_raw(chain_id, "eth_call", params).await? {
                CallOutcome::Result(v) => {
                    if parse_word(&v)? == marker {
                        return Ok(Some(base));
                    }
                }
                CallOutcome::Reverted(_) => continue,
            }
        }
        Ok(None)
    }

    /// Same search for the allowance mapping, verified through
    /// allowance(owner, spender).
    async fn find_allowance_slot(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<Option<U256>> {
        let marker = U256::MAX;
        for base in 0..PROBE_SLOT_SEARCH_LIMIT {
            let base = U256::from(base);
            let slot = nested_mapping_slot(owner, spender, base);
            let call = serde_json::json!({
                "to": addr_hex(token),
                "data": encode_allowance(owner, spender),
            });
            let overrides = serde_json::json!({
                addr_hex(token): { "stateDiff": { slot_hex(slot): word_hex(marker) } },
            });
            let params = serde_json::json!([call, "latest", overrides]);

            match self.request_raw(chain_id, "eth_call", params).await? {
                CallOutcome::Result(v) => {
                    if parse_word(&v)? == marker {
                        return Ok(Some(base));
                    }
                }
                CallOutcome::Reverted(_) => continue,
            }
        }
        Ok(None)
    }

    /// Health snapshots for every endpoint of one chain
    pub fn endpoint_health(&self, chain_id: u64) -> Vec<EndpointHealthSnapshot> {
        self.chains
            .get(&chain_id)
            .map(|set| set.snapshots())
            .unwrap_or_default()
    }

    /// Chain ids this gateway can serve
    pub fn chains(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Convenience wrapper for calls whose result is a plain hex string
    async fn request_string(
        &self,
        chain_id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> EngineResult<String> {
        match self.request_raw(chain_id, method, params).await? {
            CallOutcome::Result(v) => v
                .as_str()
                .map(String::from)
                .ok_or_else(|| EngineError::rpc_invalid_response("expected string result")),
            CallOutcome::Reverted(reason) => Err(EngineError::rpc_error(format!(
                "{} unexpectedly reverted: {}",
                method, reason
            ))),
        }
    }

    /// The failover core: walk endpoints in selection order, retrying each
    /// within the bounded per-endpoint budget, until one answers or the
    /// chain is declared unavailable.
    async fn request_raw(
        &self,
        chain_id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> EngineResult<CallOutcome> {
        let set = self
            .chains
            .get(&chain_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::chain_unsupported(chain_id))?;

        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let mut last_error: Option<EngineError> = None;

        for ep in set.selection_order() {
            if !ep.is_available() {
                continue;
            }

            for attempt in 0..self.config.attempts_per_endpoint {
                if attempt > 0 {
                    tokio::time::sleep(self.jittered_backoff(attempt)).await;
                }
                ep.pace().await;

                let outcome = match self.transport.send(&ep.endpoint.url, &payload).await {
                    Ok(body) => classify_body(body),
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(result) => {
                        ep.mark_success();
                        return Ok(result);
                    }
                    Err(e) if e.code == ErrorCode::RpcRateLimited => {
                        let strikes = ep.record_rate_limit();
                        let cooldown = self.rate_limit_cooldown(strikes);
                        warn!(
                            "⏳ 429 from {} (strike {}), cooling {}ms",
                            ep.endpoint.masked_url(),
                            strikes,
                            cooldown.as_millis()
                        );
                        if attempt + 1 < self.config.attempts_per_endpoint {
                            // Wait out the throttle in place rather than
                            // abandoning an otherwise-healthy provider.
                            tokio::time::sleep(cooldown).await;
                        } else {
                            ep.set_cooldown(cooldown);
                        }
                        last_error = Some(e);
                    }
                    Err(e) => {
                        let failures = ep.mark_failure(self.jittered_backoff(attempt + 1));
                        warn!(
                            "⚠️ {} failed on {} (consecutive: {}): {}",
                            method,
                            ep.endpoint.masked_url(),
                            failures,
                            e
                        );
                        last_error = Some(e);
                        // Provider failure: move to the next endpoint rather
                        // than burning the whole budget on a dead node.
                        break;
                    }
                }
            }
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no endpoint available".to_string());
        Err(EngineError::chain_unavailable(
            chain_id,
            format!("{} exhausted all endpoints: {}", method, detail),
        ))
    }

    /// Exponential backoff with full jitter: uniform in [0, min(cap, base*2^n)]
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_backoff.as_millis() as u64;
        let cap_ms = self.config.max_backoff.as_millis() as u64;
        let ceiling = base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(cap_ms)
            .max(1);
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// 429 cooldown grows with consecutive strikes, capped at the backoff max
    fn rate_limit_cooldown(&self, strikes: u32) -> Duration {
        let base_ms = self.config.base_backoff.as_millis() as u64;
        let cap_ms = self.config.max_backoff.as_millis() as u64;
        let cooldown = base_ms
            .saturating_mul(u64::from(self.config.rate_limit_cooldown_multiplier))
            .saturating_mul(u64::from(strikes))
            .min(cap_ms);
        Duration::from_millis(cooldown)
    }
}

/// Classify a JSON-RPC response body into result / revert / provider error
fn classify_body(body: serde_json::Value) -> EngineResult<CallOutcome> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown RPC error")
            .to_string();

        if code == -32005 || message.to_lowercase().contains("rate limit") {
            return Err(EngineError::rpc_rate_limited());
        }

        // Execution revert: JSON-RPC code 3, or the ubiquitous message.
        // Some providers attach the Error(string) payload under error.data.
        if code == 3 || message.to_lowercase().contains("revert") {
            let reason = error
                .get("data")
                .and_then(|d| d.as_str())
                .and_then(decode_revert_data)
                .unwrap_or(message);
            return Ok(CallOutcome::Reverted(reason));
        }

        return Err(EngineError::rpc_error(format!(
            "RPC error: {} (code: {})",
            message, code
        )));
    }

    match body.get("result") {
        Some(result) => Ok(CallOutcome::Result(result.clone())),
        None => Err(EngineError::rpc_invalid_response("no result in response")),
    }
}

/// Decode an Error(string) revert payload (selector 0x08c379a0)
fn decode_revert_data(data: &str) -> Option<String> {
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 68 || bytes[0..4] != [0x08, 0xc3, 0x79, 0xa0] {
        return None;
    }
    let len = U256::from_be_slice(&bytes[36..68]);
    let len: usize = len.try_into().ok()?;
    let start = 68;
    if bytes.len() < start + len {
        return None;
    }
    String::from_utf8(bytes[start..start + len].to_vec()).ok()
}

/// Parse the uint256[] returned by getAmountsOut / the swap functions.
/// The last element is the output amount.
fn parse_amounts_out(result: &serde_json::Value) -> EngineResult<U256> {
    let hex_str = result
        .as_str()
        .ok_or_else(|| EngineError::rpc_invalid_response("expected hex string result"))?;
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| EngineError::rpc_invalid_response(format!("bad hex in result: {}", e)))?;

    if bytes.len() >= 64 {
        Ok(U256::from_be_slice(&bytes[bytes.len() - 32..]))
    } else {
        Ok(U256::ZERO)
    }
}

/// Parse a single uint256 return value
fn parse_word(result: &serde_json::Value) -> EngineResult<U256> {
    let hex_str = result
        .as_str()
        .ok_or_else(|| EngineError::rpc_invalid_response("expected hex string result"))?;
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| EngineError::rpc_invalid_response(format!("bad hex in result: {}", e)))?;
    if bytes.len() >= 32 {
        Ok(U256::from_be_slice(&bytes[bytes.len() - 32..]))
    } else {
        Ok(U256::ZERO)
    }
}

fn parse_hex_u64(hex_str: &str) -> EngineResult<u64> {
    u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| EngineError::rpc_invalid_response(format!("bad hex number: {}", e)))
}

fn addr_hex(address: Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// One caller identity per probe run, drawn fresh so whitelist-based
/// honeypots cannot special-case a known probe address.
pub fn random_caller() -> Address {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill(&mut bytes);
    Address::from(bytes)
}

// ============================================
// Storage slot math (Solidity mapping layout)
// ============================================

/// Storage slot of mapping[key] at base slot: keccak(key ++ base)
fn mapping_slot(key: Address, base: U256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&word_address(key));
    buf[32..].copy_from_slice(&word_u256(base));
    keccak256(buf)
}

/// Storage slot of mapping[outer][inner]: keccak(inner ++ keccak(outer ++ base))
fn nested_mapping_slot(outer: Address, inner: Address, base: U256) -> B256 {
    let first = mapping_slot(outer, base);
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&word_address(inner));
    buf[32..].copy_from_slice(first.as_slice());
    keccak256(buf)
}

fn slot_hex(slot: B256) -> String {
    format!("0x{}", hex::encode(slot))
}

fn word_hex(value: U256) -> String {
    format!("0x{}", hex::encode(word_u256(value)))
}

// ============================================
// Manual ABI encoding (Uniswap V2 router calls)
// ============================================

fn word_u256(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

fn word_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn append_path(out: &mut Vec<u8>, path: &[Address]) {
    out.extend_from_slice(&word_u256(U256::from(path.len())));
    for addr in path {
        out.extend_from_slice(&word_address(*addr));
    }
}

/// balanceOf(address owner)
fn encode_balance_of(owner: Address) -> String {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&SELECTOR_BALANCE_OF);
    data.extend_from_slice(&word_address(owner));
    format!("0x{}", hex::encode(data))
}

/// allowance(address owner, address spender)
fn encode_allowance(owner: Address, spender: Address) -> String {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&SELECTOR_ALLOWANCE);
    data.extend_from_slice(&word_address(owner));
    data.extend_from_slice(&word_address(spender));
    format!("0x{}", hex::encode(data))
}

/// getAmountsOut(uint256 amountIn, address[] path)
fn encode_get_amounts_out(amount_in: U256, path: &[Address]) -> String {
    let mut data = Vec::with_capacity(4 + 32 * (3 + path.len()));
    data.extend_from_slice(&SELECTOR_GET_AMOUNTS_OUT);
    data.extend_from_slice(&word_u256(amount_in));
    data.extend_from_slice(&word_u256(U256::from(0x40))); // path offset
    append_path(&mut data, path);
    format!("0x{}", hex::encode(data))
}

/// swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline)
fn encode_swap_exact_eth_for_tokens(
    amount_out_min: U256,
    path: &[Address],
    to: Address,
    deadline: U256,
) -> String {
    let mut data = Vec::with_capacity(4 + 32 * (5 + path.len()));
    data.extend_from_slice(&SELECTOR_SWAP_EXACT_ETH_FOR_TOKENS);
    data.extend_from_slice(&word_u256(amount_out_min));
    data.extend_from_slice(&word_u256(U256::from(0x80))); // path offset
    data.extend_from_slice(&word_address(to));
    data.extend_from_slice(&word_u256(deadline));
    append_path(&mut data, path);
    format!("0x{}", hex::encode(data))
}

/// swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline)
fn encode_swap_exact_tokens_for_eth(
    amount_in: U256,
    amount_out_min: U256,
    path: &[Address],
    to: Address,
    deadline: U256,
) -> String {
    let mut data = Vec::with_capacity(4 + 32 * (6 + path.len()));
    data.extend_from_slice(&SELECTOR_SWAP_EXACT_TOKENS_FOR_ETH);
    data.extend_from_slice(&word_u256(amount_in));
    data.extend_from_slice(&word_u256(amount_out_min));
    data.extend_from_slice(&word_u256(U256::from(0xa0))); // path offset
    data.extend_from_slice(&word_address(to));
    data.extend_from_slice(&word_u256(deadline));
    append_path(&mut data, path);
    format!("0x{}", hex::encode(data))
}
