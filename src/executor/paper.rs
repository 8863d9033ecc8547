//! Simulated execution against the virtual ledger

use crate::error::Result;
use crate::executor::{OrderExecutor, OrderRequest};
use crate::portfolio::PortfolioLedger;
use crate::types::{ExecutionRecord, TradeMode};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Fills orders instantly at the reference price (no slippage model) and
/// moves the virtual ledger.
pub struct PaperExecutor {
    ledger: PortfolioLedger,
}

impl PaperExecutor {
    pub fn new(ledger: PortfolioLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    fn mode(&self) -> TradeMode {
        TradeMode::Paper
    }

    async fn execute_market_order(&self, request: &OrderRequest) -> Result<ExecutionRecord> {
        let price = request.reference_price;

        self.ledger
            .apply_fill(&request.symbol, request.side, request.quantity, price)
            .await?;

        info!(
            symbol = %request.symbol,
            side = request.side.as_str(),
            quantity = %request.quantity,
            %price,
            "paper order filled"
        );

        Ok(ExecutionRecord {
            order_id: format!("paper-{}", Uuid::new_v4()),
            requested_quantity: request.quantity,
            executed_quantity: request.quantity,
            executed_price: price,
            timestamp: Utc::now(),
        })
    }
}
