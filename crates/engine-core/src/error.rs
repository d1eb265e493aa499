use thiserror::Error;

/// Typed error taxonomy for the engine. Every variant corresponds to a row in
/// the engine's error-disposition table: transient feed errors are retried by
/// the caller, bad bars are dropped and logged, invariant violations halt
/// trading on the affected symbol/package and surface in reconciliation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("symbol unknown to feed: {0}")]
    SymbolUnknown(String),

    #[error("bad bar for {expected}: delivered bar tagged {actual}")]
    BadBar { expected: String, actual: String },

    #[error("feature engine not ready: {0} bars available, {1} required")]
    FeatureNotReady(usize, usize),

    #[error("broker rejected leg {leg_id} on package {package_id}: {reason}")]
    BrokerRejection {
        package_id: String,
        leg_id: String,
        reason: String,
    },

    #[error("broker timed out submitting order for {0}")]
    BrokerTimeout(String),

    #[error("risk blocked: {0}")]
    RiskBlocked(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("numeric guard tripped: {0}")]
    NumericGuard(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
