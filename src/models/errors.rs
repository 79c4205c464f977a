//! Centralized Error Handling Module
//!
//! Every failure carries a unique string code so production logs can be
//! correlated without parsing free-form messages.
//!
//! Error codes follow pattern: CATEGORY_SPECIFIC_ERROR
//! - CHAIN_xxx / RPC_xxx: gateway and provider errors
//! - SIM_xxx: probe simulation errors
//! - PUB_xxx: alert publishing errors
//! - CFG_xxx: configuration errors (fatal at startup)

use std::fmt;

/// Engine-wide error type. All fallible paths flow through this.
#[derive(Debug)]
pub struct EngineError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    /// Create a new EngineError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create EngineError with source error
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Unique error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Chain Gateway Errors
    // ============================================
    /// All endpoints for a chain exhausted within the retry budget
    ChainUnavailable,
    /// Chain not present in the endpoint configuration
    ChainUnsupported,
    /// RPC request timeout
    RpcTimeout,
    /// RPC rate limited (HTTP 429)
    RpcRateLimited,
    /// RPC returned an error response
    RpcError,
    /// RPC response could not be parsed
    RpcInvalidResponse,

    // ============================================
    // Probe Simulation Errors
    // ============================================
    /// Probe produced a physically impossible result (e.g. negative tax)
    SimulationAnomaly,
    /// No contract code at the token address
    TokenNotFound,

    // ============================================
    // Publish Errors
    // ============================================
    /// Stream write exhausted its retry budget
    PublishFailed,
    /// Single stream write exceeded its timeout
    StreamWriteTimeout,

    // ============================================
    // Configuration Errors (fatal at startup)
    // ============================================
    /// Malformed or missing required configuration
    ConfigInvalid,

    // ============================================
    // Task Lifecycle
    // ============================================
    /// Task cancelled cooperatively (shutdown)
    TaskCancelled,

    /// Unknown error
    Unknown,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChainUnavailable => "CHAIN_UNAVAILABLE",
            Self::ChainUnsupported => "CHAIN_UNSUPPORTED",
            Self::RpcTimeout => "RPC_TIMEOUT",
            Self::RpcRateLimited => "RPC_RATE_LIMITED",
            Self::RpcError => "RPC_ERROR",
            Self::RpcInvalidResponse => "RPC_INVALID_RESPONSE",
            Self::SimulationAnomaly => "SIM_ANOMALY",
            Self::TokenNotFound => "SIM_TOKEN_NOT_FOUND",
            Self::PublishFailed => "PUB_FAILED",
            Self::StreamWriteTimeout => "PUB_WRITE_TIMEOUT",
            Self::ConfigInvalid => "CFG_INVALID",
            Self::TaskCancelled => "TASK_CANCELLED",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Check if error is retryable at the task level
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChainUnavailable
                | Self::RpcTimeout
                | Self::RpcRateLimited
                | Self::StreamWriteTimeout
        )
    }

    /// Check if error is fatal (halts startup)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid)
    }
}

// ============================================
// Convenience constructors
// ============================================

impl EngineError {
    /// All endpoints exhausted for a chain
    pub fn chain_unavailable(chain_id: u64, msg: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ChainUnavailable,
            format!("chain {}: {}", chain_id, msg.into()),
        )
    }

    /// Chain missing from configuration
    pub fn chain_unsupported(chain_id: u64) -> Self {
        Self::new(
            ErrorCode::ChainUnsupported,
            format!("no endpoints configured for chain {}", chain_id),
        )
    }

    /// RPC timeout
    pub fn rpc_timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RpcTimeout, msg)
    }

    /// RPC rate limited
    pub fn rpc_rate_limited() -> Self {
        Self::new(ErrorCode::RpcRateLimited, "Rate limited (HTTP 429)")
    }

    /// RPC returned an error
    pub fn rpc_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RpcError, msg)
    }

    /// RPC response unparseable
    pub fn rpc_invalid_response(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RpcInvalidResponse, msg)
    }

    /// Probe produced an impossible result
    pub fn simulation_anomaly(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SimulationAnomaly, msg)
    }

    /// Token address holds no contract code
    pub fn token_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::TokenNotFound, msg)
    }

    /// Stream write retries exhausted
    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::PublishFailed, msg)
    }

    /// Single stream write timed out
    pub fn stream_write_timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::StreamWriteTimeout, msg)
    }

    /// Invalid configuration (fatal)
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, msg)
    }

    /// Cooperative cancellation
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::TaskCancelled, "task cancelled during shutdown")
    }
}

// ============================================
// Result type alias
// ============================================

/// Engine Result type
pub type EngineResult<T> = Result<T, EngineError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<eyre::Report> for EngineError {
    fn from(err: eyre::Report) -> Self {
        Self::new(ErrorCode::Unknown, err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::RpcTimeout, "Request timeout")
        } else if err.is_connect() {
            Self::new(ErrorCode::RpcError, "Connection failed")
        } else {
            Self::new(ErrorCode::Unknown, err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::RpcInvalidResponse, "JSON parse error", err)
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::with_source(ErrorCode::StreamWriteTimeout, "Stream write timeout", err)
        } else {
            Self::with_source(ErrorCode::PublishFailed, "Stream transport error", err)
        }
    }
}
