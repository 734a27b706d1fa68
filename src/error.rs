use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Entity validation errors.
///
/// Returned when a record violates a domain invariant. Invalid records
/// are rejected, never persisted.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("price {price} outside [0, 1]")]
    PriceOutOfRange { price: rust_decimal::Decimal },

    #[error("size must be positive, got {size}")]
    NonPositiveSize { size: rust_decimal::Decimal },

    #[error("blueprint '{name}' failed backtest gate: {reason}")]
    BlueprintRejected { name: String, reason: String },

    #[error("write conflict on {entity} exhausted {retries} retries")]
    ConflictRetriesExhausted { entity: String, retries: u32 },

    #[error("{0}")]
    Invalid(String),
}

/// Risk management rejections.
///
/// An order that fails a risk check terminates in `Rejected`; these are
/// logged and never retried.
#[derive(Error, Debug, Clone)]
pub enum RiskError {
    #[error("drawdown breaker active: drawdown {drawdown} exceeds {limit}")]
    DrawdownBreakerActive {
        drawdown: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },

    #[error("position size {requested} exceeds limit {limit}")]
    PositionSizeExceeded {
        requested: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },

    #[error("insufficient capital: need {needed}, have {available}")]
    InsufficientCapital {
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("max concurrent positions reached: {open} >= {limit}")]
    TooManyPositions { open: usize, limit: usize },

    #[error("duplicate in-flight order for strategy {strategy} on market {market}")]
    DuplicateInFlight { strategy: String, market: String },
}

/// Knowledge store errors.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Optimistic sequence check failed; the caller should re-read and retry.
    #[error("sequence conflict on {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("unknown entity: {id}")]
    NotFound { id: String },
}

/// External capability errors (probability estimation, market data).
#[derive(Error, Debug, Clone)]
pub enum CapabilityError {
    /// The call exceeded its configured bound. Analyzers degrade
    /// confidence instead of blocking the pipeline.
    #[error("capability call timed out after {millis}ms")]
    Timeout { millis: u64 },
}

/// Market data errors. A scan cycle skips the affected market and
/// retries on the next tick.
#[derive(Error, Debug, Clone)]
pub enum DataError {
    #[error("no order book for market {market_id}")]
    MissingOrderBook { market_id: String },

    #[error("stale snapshot for market {market_id}")]
    StaleSnapshot { market_id: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent '{name}' degraded after {restarts} restarts")]
    AgentDegraded { name: String, restarts: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
