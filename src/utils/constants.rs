//! Constants Module - Single Source of Truth
//!
//! Every chain table, selector, and default threshold used across the engine
//! is defined here. No hardcoded addresses or chain IDs in other modules.

use alloy_primitives::{Address, U256};
use std::str::FromStr;

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "TokenSentry";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for HTTP requests
pub const USER_AGENT: &str = "TokenSentry/0.1.0";

/// Alert envelope schema version (major.minor) this engine emits.
/// Consumers pin compatibility on the major component.
pub const SCHEMA_VERSION: &str = "1.0";

/// Alert type emitted by the honeypot detector
pub const ALERT_TYPE_HONEYPOT: &str = "HONEYPOT_ALERT";

/// Routing lane for contract-safety alerts
pub const ALERT_LANE_PROTECTION: &str = "protection";

/// Default outbound stream name
pub const DEFAULT_STREAM_NAME: &str = "sentry.alerts";

/// Approximate cap on stream length (producer-side trimming)
pub const DEFAULT_STREAM_MAXLEN: usize = 20_000;

// ============================================
// RPC CONSTANTS
// ============================================

/// Default timeout for a single RPC request (seconds)
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a single stream write (seconds)
pub const DEFAULT_STREAM_WRITE_TIMEOUT_SECS: u64 = 5;

/// Base retry delay (milliseconds) for gateway backoff
pub const GATEWAY_BASE_BACKOFF_MS: u64 = 1_000;

/// Backoff cap (milliseconds) for gateway backoff
pub const GATEWAY_MAX_BACKOFF_MS: u64 = 30_000;

/// Attempts per endpoint before the gateway moves on
pub const GATEWAY_ATTEMPTS_PER_ENDPOINT: u32 = 3;

/// Cooldown multiplier applied to the base backoff on HTTP 429
pub const GATEWAY_RATE_LIMIT_COOLDOWN_MULTIPLIER: u32 = 4;

// ============================================
// PROBE / SCORING DEFAULTS
// ============================================

/// Effective sell tax above which a token is classified unsellable (bps)
pub const DEFAULT_MAX_EFFECTIVE_TAX_BPS: u64 = 9_000;

/// Sell tax below this threshold contributes nothing to the score (bps)
pub const DEFAULT_TAX_SCORE_THRESHOLD_BPS: u64 = 500;

/// Maximum partial score any single factor can contribute
pub const DEFAULT_MAX_FACTOR_SCORE: f64 = 30.0;

/// Top-holder share (percent) above which concentration starts scoring
pub const DEFAULT_CONCENTRATION_THRESHOLD_PCT: f64 = 20.0;

/// Liquidity depth (USD) below which thin liquidity starts scoring
pub const DEFAULT_LIQUIDITY_FLOOR_USD: f64 = 50_000.0;

/// Default notional used for the buy leg of the probe (0.1 native)
pub const DEFAULT_PROBE_AMOUNT_WEI: u128 = 100_000_000_000_000_000;

/// Native balance granted to the simulated caller for gas (1 native unit)
pub const PROBE_GAS_FUNDING_WEI: u128 = 1_000_000_000_000_000_000;

/// How many base storage slots to try when locating an ERC-20's
/// balance/allowance mappings for state-override simulation
pub const PROBE_SLOT_SEARCH_LIMIT: u64 = 12;

// ============================================
// CHAIN IDS - Single Source of Truth
// ============================================

/// Ethereum Mainnet
pub const CHAIN_ID_ETHEREUM: u64 = 1;
/// BNB Smart Chain
pub const CHAIN_ID_BSC: u64 = 56;
/// Polygon
pub const CHAIN_ID_POLYGON: u64 = 137;
/// Arbitrum One
pub const CHAIN_ID_ARBITRUM: u64 = 42161;
/// Optimism
pub const CHAIN_ID_OPTIMISM: u64 = 10;
/// Avalanche C-Chain
pub const CHAIN_ID_AVALANCHE: u64 = 43114;
/// Base
pub const CHAIN_ID_BASE: u64 = 8453;

/// All supported EVM chain IDs
pub const SUPPORTED_CHAIN_IDS: [u64; 7] = [
    CHAIN_ID_ETHEREUM,
    CHAIN_ID_BSC,
    CHAIN_ID_POLYGON,
    CHAIN_ID_ARBITRUM,
    CHAIN_ID_OPTIMISM,
    CHAIN_ID_AVALANCHE,
    CHAIN_ID_BASE,
];

// ============================================
// FUNCTION SELECTORS (Uniswap V2 compatible)
// ============================================

/// getAmountsOut(uint256,address[])
pub const SELECTOR_GET_AMOUNTS_OUT: [u8; 4] = [0xd0, 0x6c, 0xa6, 0x1f];

/// swapExactETHForTokens(uint256,address[],address,uint256)
pub const SELECTOR_SWAP_EXACT_ETH_FOR_TOKENS: [u8; 4] = [0x7f, 0xf3, 0x6a, 0xb5];

/// swapExactTokensForETH(uint256,uint256,address[],address,uint256)
pub const SELECTOR_SWAP_EXACT_TOKENS_FOR_ETH: [u8; 4] = [0x18, 0xcb, 0xaf, 0xe5];

/// balanceOf(address)
pub const SELECTOR_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// allowance(address,address)
pub const SELECTOR_ALLOWANCE: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e];

// ============================================
// WRAPPED NATIVE ADDRESSES - Single Source of Truth
// ============================================

/// Get WETH/WBNB/WMATIC address for a chain
pub fn get_wrapped_native(chain_id: u64) -> Option<Address> {
    let addr_str = match chain_id {
        CHAIN_ID_ETHEREUM => "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        CHAIN_ID_BSC => "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c",
        CHAIN_ID_POLYGON => "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270",
        CHAIN_ID_ARBITRUM => "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1",
        CHAIN_ID_OPTIMISM => "0x4200000000000000000000000000000000000006",
        CHAIN_ID_AVALANCHE => "0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7",
        CHAIN_ID_BASE => "0x4200000000000000000000000000000000000006",
        _ => return None,
    };
    Address::from_str(addr_str).ok()
}

// ============================================
// DEX ROUTER ADDRESSES - Single Source of Truth
// ============================================

/// Get the primary V2-compatible router for a chain (used for probe simulation)
pub fn get_primary_router(chain_id: u64) -> Option<Address> {
    let addr_str = match chain_id {
        CHAIN_ID_ETHEREUM => "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D", // Uniswap V2
        CHAIN_ID_BSC => "0x10ED43C718714eb63d5aA57B78B54704E256024E",      // PancakeSwap V2
        CHAIN_ID_POLYGON => "0xa5E0829CaCEd8fFDD4De3c43696c57F7D7A678ff",  // QuickSwap
        CHAIN_ID_ARBITRUM => "0x1b02dA8Cb0d097eB8D57A175b88c7D8b47997506", // SushiSwap
        CHAIN_ID_OPTIMISM => "0x4C5D5234f232BD2D76B96aA33F5AE4FCF0E4BFAb", // SushiSwap
        CHAIN_ID_AVALANCHE => "0x60aE616a2155Ee3d9A68541Ba4544862310933d4", // TraderJoe
        CHAIN_ID_BASE => "0x327Df1E6de05895d2ab08513aaDD9313Fe505d86",     // BaseSwap
        _ => return None,
    };
    Address::from_str(addr_str).ok()
}

// ============================================
// PUBLIC RPC FALLBACKS - Single Source of Truth
// ============================================

/// Get public RPC fallback URL for a chain
pub fn get_public_rpc_fallback(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        CHAIN_ID_ETHEREUM => Some("https://eth.llamarpc.com"),
        CHAIN_ID_BSC => Some("https://bsc-dataseed.binance.org"),
        CHAIN_ID_POLYGON => Some("https://polygon-rpc.com"),
        CHAIN_ID_ARBITRUM => Some("https://arb1.arbitrum.io/rpc"),
        CHAIN_ID_OPTIMISM => Some("https://mainnet.optimism.io"),
        CHAIN_ID_AVALANCHE => Some("https://api.avax.network/ext/bc/C/rpc"),
        CHAIN_ID_BASE => Some("https://mainnet.base.org"),
        _ => None,
    }
}

/// Env var carrying the primary RPC URL for a chain
pub fn rpc_env_key(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        CHAIN_ID_ETHEREUM => Some("ETH_HTTP_URL"),
        CHAIN_ID_BSC => Some("BSC_HTTP_URL"),
        CHAIN_ID_POLYGON => Some("POLYGON_HTTP_URL"),
        CHAIN_ID_ARBITRUM => Some("ARBITRUM_HTTP_URL"),
        CHAIN_ID_OPTIMISM => Some("OPTIMISM_HTTP_URL"),
        CHAIN_ID_AVALANCHE => Some("AVALANCHE_HTTP_URL"),
        CHAIN_ID_BASE => Some("BASE_HTTP_URL"),
        _ => None,
    }
}

// ============================================
// CHAIN METADATA
// ============================================

/// Get chain name
pub fn get_chain_name(chain_id: u64) -> &'static str {
    match chain_id {
        CHAIN_ID_ETHEREUM => "Ethereum",
        CHAIN_ID_BSC => "BNB Smart Chain",
        CHAIN_ID_POLYGON => "Polygon",
        CHAIN_ID_ARBITRUM => "Arbitrum One",
        CHAIN_ID_OPTIMISM => "Optimism",
        CHAIN_ID_AVALANCHE => "Avalanche C-Chain",
        CHAIN_ID_BASE => "Base",
        _ => "Unknown",
    }
}

/// Get native token symbol
pub fn get_native_symbol(chain_id: u64) -> &'static str {
    match chain_id {
        CHAIN_ID_ETHEREUM | CHAIN_ID_ARBITRUM | CHAIN_ID_OPTIMISM | CHAIN_ID_BASE => "ETH",
        CHAIN_ID_BSC => "BNB",
        CHAIN_ID_POLYGON => "MATIC",
        CHAIN_ID_AVALANCHE => "AVAX",
        _ => "ETH",
    }
}

// ============================================
// CONVERSION UTILITIES - Single Source of Truth
// ============================================

/// Convert wei to native units
#[inline]
pub fn wei_to_eth(wei: U256) -> f64 {
    let wei_u128: u128 = wei.try_into().unwrap_or(u128::MAX);
    wei_u128 as f64 / 1e18
}

/// Convert native units to wei
#[inline]
pub fn eth_to_wei(eth: f64) -> U256 {
    U256::from((eth * 1e18) as u128)
}

/// Check if chain ID is supported
#[inline]
pub fn is_chain_supported(chain_id: u64) -> bool {
    SUPPORTED_CHAIN_IDS.contains(&chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wei_to_eth() {
        let one_eth = U256::from(1_000_000_000_000_000_000u128);
        assert!((wei_to_eth(one_eth) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_eth_to_wei() {
        let wei = eth_to_wei(1.5);
        assert_eq!(wei, U256::from(1_500_000_000_000_000_000u128));
    }

    #[test]
    fn test_chain_support() {
        assert!(is_chain_supported(1));
        assert!(is_chain_supported(56));
        assert!(!is_chain_supported(999));
    }

    #[test]
    fn test_chain_tables_aligned() {
        for chain_id in SUPPORTED_CHAIN_IDS {
            assert!(get_wrapped_native(chain_id).is_some(), "no wrapped native for {}", chain_id);
            assert!(get_primary_router(chain_id).is_some(), "no router for {}", chain_id);
            assert!(get_public_rpc_fallback(chain_id).is_some(), "no fallback for {}", chain_id);
            assert!(rpc_env_key(chain_id).is_some(), "no env key for {}", chain_id);
        }
        assert!(get_wrapped_native(999).is_none());
    }
}
