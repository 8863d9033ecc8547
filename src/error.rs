//! Error types for the trading engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy.
///
/// Guard and precondition failures surface as `Configuration`/`CapitalLimit`
/// and are never retried by the engine. Side-effect failures occurring after
/// a trade has changed state (notifications, portfolio updates) are caught
/// and logged at the call site instead of propagating.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing or invalid user settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Per-trade, daily, or concurrent-trade capital limit violated
    #[error("Capital limit: {0}")]
    CapitalLimit(String),

    /// Missing or unusable exchange credentials
    #[error("Credential error: {0}")]
    Credential(String),

    /// Price unavailable for a symbol
    #[error("Market data unavailable: {0}")]
    MarketData(String),

    /// Exchange rejected or failed to process an order
    #[error("Order execution failed: {0}")]
    OrderExecution(String),

    /// Balance query or virtual ledger update failed
    #[error("Portfolio error: {0}")]
    Portfolio(String),

    /// Write conflict on the versioned settings row
    #[error("Settings row was modified concurrently (version {expected})")]
    SettingsConflict { expected: i64 },

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for API layers and log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "CONFIGURATION",
            EngineError::CapitalLimit(_) => "CAPITAL_LIMIT",
            EngineError::Credential(_) => "CREDENTIAL",
            EngineError::MarketData(_) => "MARKET_DATA",
            EngineError::OrderExecution(_) => "ORDER_EXECUTION",
            EngineError::Portfolio(_) => "PORTFOLIO",
            EngineError::SettingsConflict { .. } => "SETTINGS_CONFLICT",
            EngineError::Notification(_) => "NOTIFICATION",
            EngineError::Persistence(_) => "PERSISTENCE",
            EngineError::Serialization(_) => "SERIALIZATION",
            EngineError::Http(_) => "HTTP",
            EngineError::Internal(_) => "INTERNAL",
        }
    }
}
