//! Trading engine: entry flows, close routine, and the TSL/TP monitor
//!
//! The engine orchestrates the collaborators (market data, credentials,
//! executors, persistence, notifier) around the trade lifecycle. Policy for
//! side effects after a state change: the authoritative change (order
//! filled, trade closed) is never rolled back because a notification or
//! portfolio update failed — those are logged and swallowed.

pub mod guards;
mod monitor;
pub mod sizing;

#[cfg(test)]
mod tests;

use crate::client::MarketDataSource;
use crate::credentials::{CredentialStore, BINANCE_SERVICE};
use crate::error::{EngineError, Result};
use crate::executor::{OrderExecutor, OrderRequest};
use crate::notify::Notifier;
use crate::portfolio::{PortfolioLedger, PortfolioSummary};
use crate::storage::Database;
use crate::types::{
    ClosingReason, ExecutionRecord, Opportunity, OpportunityStatus, Trade, TradeMode,
};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempts at the versioned settings row before giving up on a counter
/// bump.
const SETTINGS_CAS_ATTEMPTS: u32 = 3;

pub struct TradingEngine {
    db: Database,
    market: Arc<dyn MarketDataSource>,
    credentials: Arc<dyn CredentialStore>,
    executors: HashMap<TradeMode, Arc<dyn OrderExecutor>>,
    ledger: PortfolioLedger,
    notifier: Notifier,
    user_id: String,
    poll_interval: Duration,
    /// Closed trades whose persist failed; retried at the top of every tick
    pending_persist: Mutex<HashMap<Uuid, Trade>>,
    monitors: tokio::sync::Mutex<HashMap<TradeMode, monitor::MonitorTask>>,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        market: Arc<dyn MarketDataSource>,
        credentials: Arc<dyn CredentialStore>,
        ledger: PortfolioLedger,
        notifier: Notifier,
        executors: Vec<Arc<dyn OrderExecutor>>,
        user_id: &str,
        poll_interval: Duration,
    ) -> Self {
        let executors = executors.into_iter().map(|e| (e.mode(), e)).collect();
        Self {
            db,
            market,
            credentials,
            executors,
            ledger,
            notifier,
            user_id: user_id.to_string(),
            poll_interval,
            pending_persist: Mutex::new(HashMap::new()),
            monitors: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn executor_for(&self, mode: TradeMode) -> Result<&Arc<dyn OrderExecutor>> {
        self.executors.get(&mode).ok_or_else(|| {
            EngineError::Configuration(format!("no executor registered for {mode} mode"))
        })
    }

    // ---- entry flows ----

    /// Convert a user-confirmed opportunity into a real position.
    pub async fn execute_real_trade(&self, opportunity_id: Uuid, user_id: &str) -> Result<Trade> {
        let opportunity = self
            .db
            .get_opportunity(opportunity_id)
            .await?
            .ok_or_else(|| {
                EngineError::Configuration(format!("opportunity {opportunity_id} not found"))
            })?;
        self.enter_position(&opportunity, TradeMode::Real, user_id)
            .await
    }

    /// Open a simulated position for an analyzed opportunity.
    pub async fn simulate_paper_entry(&self, opportunity: &Opportunity) -> Result<Trade> {
        // Make sure the conversion status has a row to land on
        if self.db.get_opportunity(opportunity.id).await?.is_none() {
            self.db.upsert_opportunity(opportunity).await?;
        }
        self.enter_position(opportunity, TradeMode::Paper, &opportunity.user_id)
            .await
    }

    async fn enter_position(
        &self,
        opportunity: &Opportunity,
        mode: TradeMode,
        user_id: &str,
    ) -> Result<Trade> {
        if !opportunity.status.is_confirmable(mode) {
            return Err(EngineError::Configuration(format!(
                "opportunity {} is not confirmable for {mode} entry (status {:?})",
                opportunity.id, opportunity.status
            )));
        }
        let side = opportunity
            .ai_analysis
            .as_ref()
            .map(|a| a.suggested_action)
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "opportunity {} carries no analysis to derive a direction from",
                    opportunity.id
                ))
            })?;

        let mut settings = self.db.get_user_settings(user_id).await?;

        let (available_capital, risk_pct) = match mode {
            TradeMode::Real => {
                // Roll and persist the daily window before the cap applies
                if settings.roll_daily_window(Utc::now()) {
                    self.db.save_user_settings(&mut settings).await?;
                }
                (settings.total_capital_usd, settings.real_risk_pct())
            }
            TradeMode::Paper => (
                self.ledger.available_quote().await?,
                settings.effective_paper_risk_pct(),
            ),
        };

        let trade_capital = sizing::capital_to_invest(available_capital, risk_pct)?;
        if mode == TradeMode::Real {
            if let Err(e) = guards::check_real_entry(&settings, trade_capital) {
                if let Err(notify_err) = self
                    .notifier
                    .risk_alert("Real trade rejected", &e.to_string())
                    .await
                {
                    warn!(error = %notify_err, "risk-alert notification not delivered");
                }
                return Err(e);
            }
        }

        let price = self.market.latest_price(&opportunity.symbol).await?;
        let quantity = sizing::position_size(available_capital, risk_pct, price)?;

        let credentials = match mode {
            TradeMode::Real => Some(self.credentials.get(user_id, BINANCE_SERVICE).await?),
            TradeMode::Paper => None,
        };

        let request = OrderRequest {
            user_id: user_id.to_string(),
            symbol: opportunity.symbol.clone(),
            side,
            quantity,
            reference_price: price,
            credentials,
        };

        let entry = match self
            .executor_for(mode)?
            .execute_market_order(&request)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                if mode == TradeMode::Real {
                    if let Err(update_err) = self
                        .db
                        .update_opportunity_status(
                            opportunity.id,
                            OpportunityStatus::ExecutionFailed,
                            Some(e.to_string()),
                            None,
                        )
                        .await
                    {
                        warn!(opportunity = %opportunity.id, error = %update_err,
                            "could not mark opportunity as failed");
                    }
                }
                if let Err(notify_err) = self
                    .notifier
                    .error("Order submission failed", &e.to_string())
                    .await
                {
                    warn!(error = %notify_err, "failure notification not delivered");
                }
                return Err(e);
            }
        };

        let trade = Trade::open(
            user_id,
            mode,
            &opportunity.symbol,
            side,
            entry,
            settings.take_profit_pct,
            settings.trailing_stop_pct,
            settings.trailing_stop_callback_rate,
            Some(opportunity.id),
        );
        self.db.upsert_trade(&trade).await?;

        let converted = match mode {
            TradeMode::Real => OpportunityStatus::ConvertedToTradeReal,
            TradeMode::Paper => OpportunityStatus::ConvertedToTradePaper,
        };
        if let Err(e) = self
            .db
            .update_opportunity_status(opportunity.id, converted, None, Some(trade.id))
            .await
        {
            warn!(opportunity = %opportunity.id, error = %e,
                "opportunity conversion not recorded");
        }

        if let Err(e) = self.notifier.trade_opened(&trade).await {
            warn!(trade = %trade.id, error = %e, "entry notification failed");
        }

        if mode == TradeMode::Real {
            self.bump_real_counters(user_id, trade_capital).await;
        }

        info!(
            trade = %trade.id,
            %mode,
            symbol = %trade.symbol,
            side = trade.side.as_str(),
            %quantity,
            entry_price = %trade.entry_price(),
            "position opened"
        );
        Ok(trade)
    }

    /// Record the committed capital and trade count through the versioned
    /// settings row. The order is already filled, so a lost race is retried
    /// against fresh state and a persistent failure is surfaced rather than
    /// propagated.
    async fn bump_real_counters(&self, user_id: &str, trade_capital: Decimal) {
        for _ in 0..SETTINGS_CAS_ATTEMPTS {
            let mut settings = match self.db.get_user_settings(user_id).await {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "could not load settings to record trade counters");
                    break;
                }
            };
            settings.roll_daily_window(Utc::now());
            settings.real_trades_executed_count += 1;
            settings.daily_capital_risked_usd += trade_capital;

            match self.db.save_user_settings(&mut settings).await {
                Ok(()) => return,
                Err(EngineError::SettingsConflict { .. }) => continue,
                Err(e) => {
                    error!(error = %e, "could not save trade counters");
                    break;
                }
            }
        }
        error!(%trade_capital, "real-trade counters not recorded; daily cap may undercount");
        if let Err(e) = self
            .notifier
            .error(
                "Counter update failed",
                "A real trade executed but its capital was not recorded against the daily cap.",
            )
            .await
        {
            warn!(error = %e, "counter-failure notification not delivered");
        }
    }

    // ---- close ----

    /// Close an open position at `executed_price` for `reason`.
    ///
    /// Real mode flattens at the exchange first; any submission error aborts
    /// before the trade is mutated, leaving it open for the next tick.
    /// After the trade is marked closed, persistence failure is critical but
    /// the close stands: the trade parks in the reconciliation queue.
    pub async fn close_position(
        &self,
        trade: &mut Trade,
        executed_price: Decimal,
        reason: ClosingReason,
    ) -> Result<()> {
        if !trade.is_open() {
            return Err(EngineError::OrderExecution(format!(
                "trade {} is already {}",
                trade.id,
                trade.position_status.as_str()
            )));
        }

        let exit = match trade.mode {
            TradeMode::Real => {
                let submit = async {
                    let credentials = self
                        .credentials
                        .get(&trade.user_id, BINANCE_SERVICE)
                        .await?;
                    let request = OrderRequest {
                        user_id: trade.user_id.clone(),
                        symbol: trade.symbol.clone(),
                        side: trade.side.opposite(),
                        quantity: trade.entry_order.executed_quantity,
                        reference_price: executed_price,
                        credentials: Some(credentials),
                    };
                    self.executor_for(TradeMode::Real)?
                        .execute_market_order(&request)
                        .await
                };
                match submit.await {
                    Ok(record) => record,
                    Err(e) => {
                        if let Err(notify_err) = self
                            .notifier
                            .error(
                                "Position close failed",
                                &format!("Trade {} ({}): {}", trade.id, trade.symbol, e),
                            )
                            .await
                        {
                            warn!(error = %notify_err, "close-failure notification not delivered");
                        }
                        return Err(e);
                    }
                }
            }
            TradeMode::Paper => ExecutionRecord {
                order_id: format!("paper-{}", Uuid::new_v4()),
                requested_quantity: trade.entry_order.executed_quantity,
                executed_quantity: trade.entry_order.executed_quantity,
                executed_price,
                timestamp: Utc::now(),
            },
        };

        let exit_quantity = exit.executed_quantity;
        let exit_price = exit.executed_price;
        trade.record_close(exit, reason, Utc::now())?;

        if let Err(e) = self.db.upsert_trade(trade).await {
            error!(
                trade = %trade.id,
                error = %e,
                "CRITICAL: trade closed but not persisted; queued for reconciliation"
            );
            self.pending_persist.lock().insert(trade.id, trade.clone());
            if let Err(notify_err) = self
                .notifier
                .critical(
                    "Trade close not persisted",
                    &format!(
                        "Trade {} closed ({reason}) but the record could not be saved: {e}",
                        trade.id
                    ),
                )
                .await
            {
                warn!(error = %notify_err, "critical notification not delivered");
            }
        }

        if trade.mode == TradeMode::Paper {
            if let Err(e) = self
                .ledger
                .apply_fill(
                    &trade.symbol,
                    trade.side.opposite(),
                    exit_quantity,
                    exit_price,
                )
                .await
            {
                warn!(trade = %trade.id, error = %e, "portfolio update failed after close");
            }
        }

        if let Err(e) = self.notifier.trade_closed(trade).await {
            warn!(trade = %trade.id, error = %e, "exit notification failed");
        }

        info!(
            trade = %trade.id,
            %reason,
            %exit_price,
            pnl = %trade.pnl_usd.unwrap_or(Decimal::ZERO),
            "position closed"
        );
        Ok(())
    }

    /// Close a position at the current market price on user request.
    pub async fn close_trade_manually(&self, trade_id: Uuid) -> Result<Trade> {
        let mut trade = self
            .db
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| EngineError::Configuration(format!("trade {trade_id} not found")))?;
        if !trade.is_open() {
            return Err(EngineError::OrderExecution(format!(
                "trade {trade_id} is already {}",
                trade.position_status.as_str()
            )));
        }
        let price = self.market.latest_price(&trade.symbol).await?;
        self.close_position(&mut trade, price, ClosingReason::ManualClose)
            .await?;
        Ok(trade)
    }

    // ---- views ----

    pub async fn portfolio_summary(&self) -> Result<PortfolioSummary> {
        self.ledger.summary(self.market.as_ref()).await
    }

    pub async fn open_trades(&self, mode: TradeMode) -> Result<Vec<Trade>> {
        self.db.get_open_trades(mode).await
    }

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        self.db.list_trades(&self.user_id, limit).await
    }

    /// Number of closed trades still awaiting a successful persist.
    pub fn pending_reconciliations(&self) -> usize {
        self.pending_persist.lock().len()
    }
}
