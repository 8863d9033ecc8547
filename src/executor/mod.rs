//! Order execution
//!
//! One `OrderExecutor` contract with two implementations selected by mode:
//! paper fills synthesize against the virtual ledger, real fills go through
//! the exchange client. The engine never branches on mode at a call site;
//! it just picks the executor registered for the trade's mode.

mod binance;
mod paper;

pub use binance::BinanceExecutor;
pub use paper::PaperExecutor;

use crate::credentials::ExchangeCredentials;
use crate::error::Result;
use crate::types::{ExecutionRecord, TradeMode, TradeSide};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// A market order to be executed
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    /// Price the engine observed when it sized the order. Paper execution
    /// fills at exactly this price; real execution ignores it.
    pub reference_price: Decimal,
    /// Required for real execution, unused for paper
    pub credentials: Option<ExchangeCredentials>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn mode(&self) -> TradeMode;

    /// Execute a market order and return the resulting fill. Implementations
    /// do their own retrying (or none); the engine treats any error as a
    /// failed submission.
    async fn execute_market_order(&self, request: &OrderRequest) -> Result<ExecutionRecord>;
}
