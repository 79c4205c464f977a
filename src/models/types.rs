//! Type definitions for the detection engine
//! Core data structures shared by the probe, scorer, publisher, and engine loop

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::utils::constants::{ALERT_LANE_PROTECTION, ALERT_TYPE_HONEYPOT, SCHEMA_VERSION};

/// Risk level classification for a scored token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// 0-30: no significant findings
    Low,
    /// 31-60: elevated signals, manual review recommended
    Medium,
    /// 61-85: likely dangerous
    High,
    /// 86-100: almost certain loss (honeypot, blocked sells)
    Critical,
}

impl RiskLevel {
    /// Bucket a risk score into a level. Boundaries are inclusive on the
    /// lower end: 30 is still LOW, 31 is MEDIUM, 85 is HIGH, 86 is CRITICAL.
    pub fn from_score(score: f64) -> Self {
        if score <= 30.0 {
            RiskLevel::Low
        } else if score <= 60.0 {
            RiskLevel::Medium
        } else if score <= 85.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Low => "✅",
            RiskLevel::Medium => "🟠",
            RiskLevel::High => "🔴",
            RiskLevel::Critical => "💀",
        }
    }
}

/// Direction of a simulated transfer through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    /// Native -> token
    Buy,
    /// Token -> native
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }
}

/// Snapshot of chain state relevant to one token, fetched per analysis.
/// Never cached across analyses: chain state is time-sensitive.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub chain_id: u64,
    pub block_number: u64,
    /// Whether the token address holds contract code
    pub has_code: bool,
    /// Raw bytecode size in bytes (0 when has_code is false)
    pub code_size: usize,
}

/// Outcome of one simulated swap leg
#[derive(Debug, Clone)]
pub struct SimResult {
    pub direction: TradeDirection,
    pub amount_in: U256,
    /// Router quote for the leg (expected output with zero tax)
    pub quoted_out: U256,
    /// Realized output from the simulated swap
    pub amount_out: U256,
    /// The swap call reverted (a valid simulation outcome, not a provider failure)
    pub reverted: bool,
    pub revert_reason: Option<String>,
}

/// Outcome of simulating buy -> sell for one token on one chain.
/// Immutable once produced; consumed by the risk scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub token_address: Address,
    pub chain_id: u64,
    pub can_buy: bool,
    pub can_sell: bool,
    /// Effective buy tax in basis points, clamped to [0, 10000]
    pub buy_tax_bps: u64,
    /// Effective sell tax in basis points, clamped to [0, 10000]
    pub sell_tax_bps: u64,
    /// Present when a simulation leg failed in a way that is itself the signal
    /// (revert reason, zero output). Anomalies are errors, never stored here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation_error: Option<String>,
}

/// One factor that contributed to the risk score, for explainability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreFactor {
    /// Stable tag consumers can key on (e.g. "sell_blocked", "sell_tax")
    pub tag: String,
    /// Points this factor contributed to the total
    pub points: f64,
    /// Human-readable detail
    pub detail: String,
}

/// Optional auxiliary signals supplied alongside the probe result
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AuxSignals {
    /// Share of supply held by the largest holder, in percent (0-100)
    pub top_holder_pct: Option<f64>,
    /// Pool liquidity depth in USD
    pub liquidity_usd: Option<f64>,
}

/// Deterministic verdict derived from a probe result plus aux signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    /// Overall score, 0-100
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Always true when the probe showed the sell path blocked
    pub is_honeypot: bool,
    /// Factors ordered by descending contribution
    pub contributing_factors: Vec<ScoreFactor>,
}

/// Payload carried inside the alert envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertData {
    pub token_address: String,
    pub chain_id: u64,
    pub run_id: String,
    #[serde(flatten)]
    pub verdict: RiskVerdict,
    pub can_buy: bool,
    pub can_sell: bool,
    pub buy_tax_bps: u64,
    pub sell_tax_bps: u64,
    /// "1" when the sell simulation itself failed (runtime-confirmed honeypot)
    pub runtime_confirmed: String,
}

/// Versioned wire envelope for one published alert.
/// This shape is a compatibility surface: it must not change within a
/// schema major version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEnvelope {
    pub schema_v: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub lane: String,
    /// UTC RFC3339 timestamp
    pub timestamp: String,
    pub data: AlertData,
}

impl AlertEnvelope {
    /// Build the canonical envelope for a completed analysis
    pub fn honeypot_alert(data: AlertData) -> Self {
        Self {
            schema_v: SCHEMA_VERSION.to_string(),
            alert_type: ALERT_TYPE_HONEYPOT.to_string(),
            lane: ALERT_LANE_PROTECTION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }
}

/// Why an analysis task was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTrigger {
    /// Token newly discovered on-chain
    NewToken,
    /// Operator-requested analysis
    Manual,
    /// Periodic re-check of a known token
    Recheck,
}

impl TaskTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskTrigger::NewToken => "new_token",
            TaskTrigger::Manual => "manual",
            TaskTrigger::Recheck => "recheck",
        }
    }
}

/// Lifecycle state of one analysis task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Probing,
    Scoring,
    Publishing,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Probing => "PROBING",
            TaskState::Scoring => "SCORING",
            TaskState::Publishing => "PUBLISHING",
            TaskState::Done => "DONE",
            TaskState::Failed => "FAILED",
        }
    }
}

/// One unit of work for the engine loop
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub token_address: Address,
    pub chain_id: u64,
    /// Identifies this analysis run within the idempotency key
    pub run_id: String,
    pub trigger: TaskTrigger,
    /// Optional auxiliary signals supplied by the caller
    pub aux: AuxSignals,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
}

impl AnalysisTask {
    pub fn new(token_address: Address, chain_id: u64, trigger: TaskTrigger) -> Self {
        Self {
            token_address,
            chain_id,
            run_id: uuid::Uuid::new_v4().to_string(),
            trigger,
            aux: AuxSignals::default(),
            attempt: 1,
        }
    }

    pub fn with_aux(mut self, aux: AuxSignals) -> Self {
        self.aux = aux;
        self
    }
}

/// Aggregate engine statistics for monitoring
#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub published: u64,
    pub suppressed: u64,
    pub requeued: u64,
    pub avg_latency_ms: f64,
}
