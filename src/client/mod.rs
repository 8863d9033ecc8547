//! Exchange REST clients

mod binance;

pub use binance::{BinanceClient, BinanceFill, BinanceOrderResult};

use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Latest-price source for a traded symbol.
///
/// The engine treats every failure as "price unavailable this tick"; it
/// never retries inside one call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn latest_price(&self, symbol: &str) -> Result<Decimal>;
}
