//! Real execution through the Binance client

use crate::client::BinanceClient;
use crate::error::{EngineError, Result};
use crate::executor::{OrderExecutor, OrderRequest};
use crate::types::{ExecutionRecord, TradeMode};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Submits market orders to the exchange with the credentials the engine
/// resolved for the request.
pub struct BinanceExecutor {
    client: Arc<BinanceClient>,
}

impl BinanceExecutor {
    pub fn new(client: Arc<BinanceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderExecutor for BinanceExecutor {
    fn mode(&self) -> TradeMode {
        TradeMode::Real
    }

    async fn execute_market_order(&self, request: &OrderRequest) -> Result<ExecutionRecord> {
        let credentials = request.credentials.as_ref().ok_or_else(|| {
            EngineError::Credential(format!(
                "real order for {} submitted without credentials",
                request.symbol
            ))
        })?;

        let result = self
            .client
            .place_market_order(credentials, &request.symbol, request.side, request.quantity)
            .await?;

        info!(
            symbol = %request.symbol,
            side = request.side.as_str(),
            order_id = %result.order_id,
            executed = %result.executed_quantity,
            price = %result.average_price,
            "real order filled"
        );

        Ok(ExecutionRecord {
            order_id: result.order_id,
            requested_quantity: request.quantity,
            executed_quantity: result.executed_quantity,
            executed_price: result.average_price,
            timestamp: Utc::now(),
        })
    }
}
