//! Token probe - honeypot detection by simulated buy -> sell
//!
//! The only reliable honeypot signal is behavioral: simulate buying the
//! token and then immediately selling it back, against current chain state,
//! without broadcasting anything. A token whose sell path reverts, returns
//! zero, or eats more than the configured tax ceiling is unsellable.
//!
//! Static heuristics (bytecode pattern matching, source scanning) are
//! deliberately absent: contracts obfuscate, chain state does not lie.

use alloy_primitives::U256;
use std::sync::Arc;
use tracing::{debug, info};

use crate::gateway::{random_caller, ChainGateway};
use crate::models::config::ProbeConfig;
use crate::models::errors::{EngineError, EngineResult};
use crate::models::types::{AnalysisTask, ProbeResult, SimResult, TradeDirection};
use crate::utils::constants::{get_native_symbol, wei_to_eth};

const BPS_DENOMINATOR: u64 = 10_000;

/// Behavioral probe over one gateway. Stateless between calls; every probe
/// runs against fresh chain state.
pub struct TokenProbe {
    gateway: Arc<ChainGateway>,
    config: ProbeConfig,
}

impl TokenProbe {
    pub fn new(gateway: Arc<ChainGateway>, config: ProbeConfig) -> Self {
        Self { gateway, config }
    }

    /// Run the full buy -> sell probe for one task
    pub async fn probe(&self, task: &AnalysisTask) -> EngineResult<ProbeResult> {
        let token = task.token_address;
        let chain_id = task.chain_id;

        let state = self.gateway.fetch_state(chain_id, token).await?;
        if !state.has_code {
            return Err(EngineError::token_not_found(format!(
                "no contract code at {} on chain {} (block {})",
                token, chain_id, state.block_number
            )));
        }
        debug!(
            "🔍 Probing {} on chain {} at block {} ({} bytes of code) with {} {}",
            token,
            chain_id,
            state.block_number,
            state.code_size,
            wei_to_eth(self.config.test_amount_wei),
            get_native_symbol(chain_id)
        );

        // One caller identity for the whole run: the sell must be simulated
        // as the address the buy delivered tokens to.
        let caller = random_caller();

        // Buy leg: native -> token
        let buy = self
            .gateway
            .simulate_transfer(
                chain_id,
                token,
                TradeDirection::Buy,
                self.config.test_amount_wei,
                caller,
            )
            .await?;

        if buy.reverted || buy.amount_out.is_zero() {
            // Cannot acquire the token at all. The sell path is untestable,
            // which for protection purposes means unsellable.
            let detail = buy
                .revert_reason
                .clone()
                .unwrap_or_else(|| "buy returned zero tokens".to_string());
            info!("🚫 Buy blocked for {} on chain {}: {}", token, chain_id, detail);
            return Ok(ProbeResult {
                token_address: token,
                chain_id,
                can_buy: false,
                can_sell: false,
                buy_tax_bps: BPS_DENOMINATOR,
                sell_tax_bps: BPS_DENOMINATOR,
                simulation_error: Some(detail),
            });
        }

        let buy_tax_bps = effective_tax_bps(&buy)?;

        // Sell leg: the same caller sells back exactly what the buy realized
        let sell = self
            .gateway
            .simulate_transfer(chain_id, token, TradeDirection::Sell, buy.amount_out, caller)
            .await?;

        if sell.reverted || sell.amount_out.is_zero() {
            let detail = sell
                .revert_reason
                .clone()
                .unwrap_or_else(|| "sell returned zero native".to_string());
            info!("💀 Sell blocked for {} on chain {}: {}", token, chain_id, detail);
            return Ok(ProbeResult {
                token_address: token,
                chain_id,
                can_buy: true,
                can_sell: false,
                buy_tax_bps,
                sell_tax_bps: BPS_DENOMINATOR,
                simulation_error: Some(detail),
            });
        }

        let sell_tax_bps = effective_tax_bps(&sell)?;

        // A sell that technically succeeds but confiscates nearly everything
        // is a honeypot with better manners.
        let can_sell = sell_tax_bps <= self.config.max_effective_tax_bps;
        if !can_sell {
            info!(
                "💀 Sell tax {}bps exceeds ceiling {}bps for {} on chain {}",
                sell_tax_bps, self.config.max_effective_tax_bps, token, chain_id
            );
        } else {
            debug!(
                "✅ Probe clean for {} on chain {}: buy {}bps / sell {}bps",
                token, chain_id, buy_tax_bps, sell_tax_bps
            );
        }

        Ok(ProbeResult {
            token_address: token,
            chain_id,
            can_buy: true,
            can_sell,
            buy_tax_bps,
            sell_tax_bps,
            simulation_error: None,
        })
    }
}

/// Effective tax of one leg: (quoted - realized) / quoted, in basis points.
/// Realized output above the quote is physically impossible in a constant
/// product pool and indicates broken simulation state, not a bonus.
fn effective_tax_bps(sim: &SimResult) -> EngineResult<u64> {
    if sim.quoted_out.is_zero() {
        // No quoted output means no measurable tax on this leg
        return Ok(0);
    }
    if sim.amount_out > sim.quoted_out {
        return Err(EngineError::simulation_anomaly(format!(
            "{} leg realized {} above quote {}",
            sim.direction.as_str(),
            sim.amount_out,
            sim.quoted_out
        )));
    }

    let delta = sim.quoted_out - sim.amount_out;
    let tax = (delta * U256::from(BPS_DENOMINATOR)) / sim.quoted_out;
    // quoted >= delta guarantees tax <= 10000, but clamp anyway
    Ok(u64::try_from(tax).unwrap_or(BPS_DENOMINATOR).min(BPS_DENOMINATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RpcTransport;
    use crate::models::config::{ChainEndpoint, EngineConfig};
    use crate::models::errors::ErrorCode;
    use crate::models::types::TaskTrigger;
    use alloy_primitives::Address;
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::Mutex;

    /// Behavior of one swap leg against the fake token
    #[derive(Clone, Copy)]
    enum Leg {
        Out(u64),
        Revert(&'static str),
    }

    /// Selector-aware fake of one token's chain surface. Quote, swap,
    /// balanceOf, and allowance calls are told apart by their calldata;
    /// the ERC-20 view calls echo whatever the state override wrote, which
    /// is how a first-candidate storage slot behaves.
    struct FakeToken {
        has_code: bool,
        buy_quote: u64,
        buy: Leg,
        sell_quote: u64,
        sell: Leg,
        swap_calls: Mutex<Vec<serde_json::Value>>,
    }

    impl FakeToken {
        fn clean() -> Self {
            Self {
                has_code: true,
                buy_quote: 1_000,
                buy: Leg::Out(1_000),
                sell_quote: 100,
                sell: Leg::Out(100),
                swap_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RpcTransport for FakeToken {
        async fn send(
            &self,
            _url: &str,
            payload: &serde_json::Value,
        ) -> EngineResult<serde_json::Value> {
            let method = payload["method"].as_str().unwrap_or_default();
            match method {
                "eth_getCode" if self.has_code => Ok(result_of(serde_json::json!("0x6080604052"))),
                "eth_getCode" => Ok(result_of(serde_json::json!("0x"))),
                "eth_blockNumber" => Ok(result_of(serde_json::json!("0x100"))),
                "eth_call" => {
                    let data = payload["params"][0]["data"].as_str().unwrap_or_default();
                    match &data[..10.min(data.len())] {
                        "0xd06ca61f" => {
                            let quote = if quote_path_starts_with_native(data) {
                                self.buy_quote
                            } else {
                                self.sell_quote
                            };
                            Ok(result_of(amounts(0, quote)))
                        }
                        "0x7ff36ab5" => {
                            self.swap_calls.lock().unwrap().push(payload.clone());
                            leg_response(self.buy)
                        }
                        "0x18cbafe5" => {
                            self.swap_calls.lock().unwrap().push(payload.clone());
                            leg_response(self.sell)
                        }
                        // balanceOf / allowance: echo the overridden slot value
                        "0x70a08231" | "0xdd62ed3e" => Ok(result_of(echo_state_diff(payload))),
                        other => Err(EngineError::rpc_error(format!("unexpected call {}", other))),
                    }
                }
                other => Err(EngineError::rpc_error(format!("unexpected method {}", other))),
            }
        }
    }

    fn result_of(result: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": result })
    }

    fn leg_response(leg: Leg) -> EngineResult<serde_json::Value> {
        match leg {
            Leg::Out(out) => Ok(result_of(amounts(0, out))),
            Leg::Revert(message) => Ok(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": 3, "message": format!("execution reverted: {}", message) }
            })),
        }
    }

    /// ABI-encode a uint256[] of two elements as an eth_call result
    fn amounts(a: u64, b: u64) -> serde_json::Value {
        let mut bytes = Vec::new();
        for word in [
            U256::from(0x20u64),
            U256::from(2u64),
            U256::from(a),
            U256::from(b),
        ] {
            bytes.extend_from_slice(&word.to_be_bytes::<32>());
        }
        serde_json::json!(format!("0x{}", hex::encode(bytes)))
    }

    /// getAmountsOut calldata: is the first path element the wrapped native?
    fn quote_path_starts_with_native(data: &str) -> bool {
        let weth = "c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
        // selector(8) + amount(64) + offset(64) + len(64) + 12-byte pad(24)
        let start = 2 + 8 + 64 + 64 + 64 + 24;
        data.len() >= start + 40 && data[start..start + 40].eq_ignore_ascii_case(weth)
    }

    /// Pull the value the caller wrote into the token's storage override
    fn echo_state_diff(payload: &serde_json::Value) -> serde_json::Value {
        payload["params"][2]
            .as_object()
            .and_then(|accounts| accounts.values().find_map(|a| a.get("stateDiff")))
            .and_then(|diff| diff.as_object())
            .and_then(|diff| diff.values().next())
            .cloned()
            .unwrap_or_else(|| serde_json::json!("0x0"))
    }

    fn probe_with(transport: Arc<FakeToken>) -> TokenProbe {
        let config = EngineConfig {
            endpoints: vec![ChainEndpoint::new(1, "https://rpc.example.com", 0)],
            ..EngineConfig::default()
        };
        let gateway = Arc::new(ChainGateway::new(&config, transport));
        TokenProbe::new(gateway, config.probe)
    }

    fn task() -> AnalysisTask {
        AnalysisTask::new(
            Address::from_str("0xdAC17F958D2ee523a2206206994597C13D831ec7").unwrap(),
            1,
            TaskTrigger::Manual,
        )
    }

    #[tokio::test]
    async fn test_clean_token_probes_sellable() {
        let token = Arc::new(FakeToken::clean());
        let result = probe_with(token).probe(&task()).await.unwrap();
        assert!(result.can_buy);
        assert!(result.can_sell);
        assert_eq!(result.buy_tax_bps, 0);
        assert_eq!(result.sell_tax_bps, 0);
        assert!(result.simulation_error.is_none());
    }

    #[tokio::test]
    async fn test_both_swap_legs_run_as_one_funded_caller() {
        let token = Arc::new(FakeToken::clean());
        probe_with(token.clone()).probe(&task()).await.unwrap();

        let calls = token.swap_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);

        let buy_from = calls[0]["params"][0]["from"].as_str().unwrap();
        let sell_from = calls[1]["params"][0]["from"].as_str().unwrap();
        assert_eq!(buy_from, sell_from, "sell must run as the buyer");

        // Buy leg funds the caller's native balance
        let buy_overrides = calls[0]["params"][2].as_object().unwrap();
        assert!(buy_overrides[buy_from].get("balance").is_some());

        // Sell leg writes the caller's token balance and router allowance
        let sell_overrides = calls[1]["params"][2].as_object().unwrap();
        let token_addr = "0xdac17f958d2ee523a2206206994597c13d831ec7";
        let diff = sell_overrides[token_addr]["stateDiff"].as_object().unwrap();
        assert_eq!(diff.len(), 2, "balance slot + allowance slot");
        assert!(sell_overrides[sell_from].get("balance").is_some());
    }

    #[tokio::test]
    async fn test_sell_revert_is_unsellable() {
        let token = Arc::new(FakeToken {
            sell: Leg::Revert("TRANSFER_FROM_FAILED"),
            ..FakeToken::clean()
        });
        let result = probe_with(token).probe(&task()).await.unwrap();
        assert!(result.can_buy);
        assert!(!result.can_sell);
        assert_eq!(result.sell_tax_bps, 10_000);
        assert!(result
            .simulation_error
            .as_deref()
            .unwrap()
            .contains("TRANSFER_FROM_FAILED"));
    }

    #[tokio::test]
    async fn test_zero_sell_output_is_unsellable() {
        let token = Arc::new(FakeToken {
            sell_quote: 100,
            sell: Leg::Out(0),
            ..FakeToken::clean()
        });
        let result = probe_with(token).probe(&task()).await.unwrap();
        assert!(!result.can_sell);
    }

    #[tokio::test]
    async fn test_confiscatory_tax_is_unsellable() {
        let token = Arc::new(FakeToken {
            sell_quote: 1_000,
            sell: Leg::Out(50), // 9500 bps
            ..FakeToken::clean()
        });
        let result = probe_with(token).probe(&task()).await.unwrap();
        assert!(result.can_buy);
        assert!(!result.can_sell);
        assert_eq!(result.sell_tax_bps, 9_500);
    }

    #[tokio::test]
    async fn test_moderate_tax_stays_sellable() {
        let token = Arc::new(FakeToken {
            buy_quote: 1_000,
            buy: Leg::Out(950), // 500 bps
            sell_quote: 1_000,
            sell: Leg::Out(900), // 1000 bps
            ..FakeToken::clean()
        });
        let result = probe_with(token).probe(&task()).await.unwrap();
        assert!(result.can_sell);
        assert_eq!(result.buy_tax_bps, 500);
        assert_eq!(result.sell_tax_bps, 1_000);
    }

    #[tokio::test]
    async fn test_output_above_quote_is_anomaly() {
        let token = Arc::new(FakeToken {
            buy_quote: 1_000,
            buy: Leg::Out(1_100),
            ..FakeToken::clean()
        });
        let err = probe_with(token).probe(&task()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SimulationAnomaly);
    }

    #[tokio::test]
    async fn test_codeless_address_is_not_found() {
        let token = Arc::new(FakeToken {
            has_code: false,
            ..FakeToken::clean()
        });
        let err = probe_with(token).probe(&task()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TokenNotFound);
    }

    #[tokio::test]
    async fn test_buy_revert_marks_both_sides_blocked() {
        let token = Arc::new(FakeToken {
            buy: Leg::Revert("PAUSED"),
            ..FakeToken::clean()
        });
        let result = probe_with(token.clone()).probe(&task()).await.unwrap();
        assert!(!result.can_buy);
        assert!(!result.can_sell);
        assert!(result.simulation_error.is_some());
        // The run stops at the buy: no sell swap is ever attempted
        assert_eq!(token.swap_calls.lock().unwrap().len(), 1);
    }
}
