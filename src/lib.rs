//! Token Sentry Library
//!
//! Real-time token threat detection engine:
//! - Honeypot detection via simulated buy -> sell cycles through live RPC
//! - Deterministic 0-100 risk scoring with named contributing factors
//! - Versioned alert envelopes published at-most-once per analysis run
//! - Multi-provider chain gateway with failover, backoff, and 429 cooldowns

pub mod engine;
pub mod gateway;
pub mod models;
pub mod probe;
pub mod publisher;
pub mod scorer;
pub mod stream;
pub mod utils;

pub use engine::{ChainHealth, Engine, HealthReport};
pub use gateway::{ChainGateway, EndpointHealthSnapshot, HttpTransport, RpcTransport};
pub use models::config::{ChainEndpoint, EngineConfig};
pub use models::errors::{EngineError, EngineResult, ErrorCode};
pub use models::types::{
    AlertEnvelope, AnalysisTask, AuxSignals, ProbeResult, RiskLevel, RiskVerdict, TaskTrigger,
};
pub use probe::TokenProbe;
pub use publisher::{AlertPublisher, PublishOutcome};
pub use scorer::RiskScorer;
pub use stream::{InMemoryStream, RedisStream, StreamTransport};
