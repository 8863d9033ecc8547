//! Virtual balance ledger and derived portfolio snapshot
//!
//! The ledger backs paper execution: fills move the quote balance and the
//! held asset quantity. The summary is recomputed from the ledger and live
//! prices on every read rather than cached incrementally.

use crate::client::MarketDataSource;
use crate::error::{EngineError, Result};
use crate::storage::Database;
use crate::types::{split_symbol, TradeSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

/// One held asset in the snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioAsset {
    pub asset: String,
    pub quantity: Decimal,
    /// Value in the quote asset at the snapshot price; None when no price
    /// was available
    pub value: Option<Decimal>,
}

/// Derived view of available balance plus held assets
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub quote_asset: String,
    pub available_balance: Decimal,
    pub assets: Vec<PortfolioAsset>,
    /// Available balance plus every priced asset
    pub total_value: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Per-asset virtual balance ledger, persisted through the database so a
/// paper session survives restarts.
#[derive(Clone)]
pub struct PortfolioLedger {
    db: Database,
    user_id: String,
    quote_asset: String,
}

impl PortfolioLedger {
    pub fn new(db: Database, user_id: &str, quote_asset: &str) -> Self {
        Self {
            db,
            user_id: user_id.to_string(),
            quote_asset: quote_asset.to_string(),
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Seed the quote balance on a ledger that has never held anything.
    pub async fn seed_if_empty(&self, initial_balance: Decimal) -> Result<()> {
        if self.db.get_balances(&self.user_id).await?.is_empty() {
            self.db
                .set_balance(&self.user_id, &self.quote_asset, initial_balance)
                .await?;
            debug!(%initial_balance, "seeded paper ledger");
        }
        Ok(())
    }

    /// Free balance in the quote asset, the capital base for paper sizing.
    pub async fn available_quote(&self) -> Result<Decimal> {
        self.db.get_balance(&self.user_id, &self.quote_asset).await
    }

    pub async fn asset_balance(&self, asset: &str) -> Result<Decimal> {
        self.db.get_balance(&self.user_id, asset).await
    }

    /// Apply a fill: BUY debits the quote balance and credits the base
    /// asset, SELL the reverse. A BUY that overdraws the quote balance is a
    /// portfolio error; SELL may take the base asset negative (simplified
    /// short support).
    pub async fn apply_fill(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<()> {
        let (base, quote) = split_symbol(symbol).ok_or_else(|| {
            EngineError::Portfolio(format!("cannot split symbol '{symbol}' into base/quote"))
        })?;

        let cost = quantity * price;
        let quote_balance = self.db.get_balance(&self.user_id, quote).await?;
        let base_balance = self.db.get_balance(&self.user_id, base).await?;

        let (new_quote, new_base) = match side {
            TradeSide::Buy => {
                if cost > quote_balance {
                    return Err(EngineError::Portfolio(format!(
                        "insufficient {quote} balance: need {cost}, have {quote_balance}"
                    )));
                }
                (quote_balance - cost, base_balance + quantity)
            }
            TradeSide::Sell => (quote_balance + cost, base_balance - quantity),
        };

        self.db.set_balance(&self.user_id, quote, new_quote).await?;
        self.db.set_balance(&self.user_id, base, new_base).await?;
        debug!(
            symbol,
            side = side.as_str(),
            %quantity,
            %price,
            %new_quote,
            "ledger updated"
        );
        Ok(())
    }

    /// Snapshot of balance and holdings valued at current prices. Assets
    /// whose price fetch fails stay in the list unvalued.
    pub async fn summary(&self, market: &dyn MarketDataSource) -> Result<PortfolioSummary> {
        let balances = self.db.get_balances(&self.user_id).await?;
        let mut available_balance = Decimal::ZERO;
        let mut assets = Vec::new();
        let mut total_value = Decimal::ZERO;

        for (asset, quantity) in balances {
            if asset == self.quote_asset {
                available_balance = quantity;
                total_value += quantity;
                continue;
            }
            if quantity == Decimal::ZERO {
                continue;
            }
            let pair = format!("{asset}{}", self.quote_asset);
            let value = match market.latest_price(&pair).await {
                Ok(price) => {
                    let v = quantity * price;
                    total_value += v;
                    Some(v)
                }
                Err(e) => {
                    warn!(asset, error = %e, "no price for holding, leaving unvalued");
                    None
                }
            };
            assets.push(PortfolioAsset {
                asset,
                quantity,
                value,
            });
        }

        Ok(PortfolioSummary {
            quote_asset: self.quote_asset.clone(),
            available_balance,
            assets,
            total_value,
            updated_at: Utc::now(),
        })
    }
}
