//! Data model: core types, configuration, and the error taxonomy

pub mod config;
pub mod errors;
pub mod types;

pub use config::{ChainEndpoint, EngineConfig, GatewayConfig, ProbeConfig, PublisherConfig, ScoringWeights};
pub use errors::{EngineError, EngineResult, ErrorCode};
pub use types::{
    AlertData, AlertEnvelope, AnalysisTask, AuxSignals, ChainState, EngineStats, ProbeResult,
    RiskLevel, RiskVerdict, ScoreFactor, SimResult, TaskState, TaskTrigger, TradeDirection,
};
