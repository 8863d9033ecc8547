//! Core domain types: trades, execution records, opportunities, user settings

use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution mode for a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Real,
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeMode::Paper => write!(f, "paper"),
            TradeMode::Real => write!(f, "real"),
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl TradeSide {
    /// The side that flattens a position opened on this side.
    pub fn opposite(&self) -> TradeSide {
        match self {
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// Position lifecycle status.
///
/// `Opening` and `Closing` exist for API compatibility; the monitored flow
/// only ever observes `Open` and `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Opening,
    Open,
    Closing,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Opening => "opening",
            PositionStatus::Open => "open",
            PositionStatus::Closing => "closing",
            PositionStatus::Closed => "closed",
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosingReason {
    #[serde(rename = "TP_HIT")]
    TpHit,
    #[serde(rename = "SL_HIT")]
    SlHit,
    #[serde(rename = "MANUAL_CLOSE")]
    ManualClose,
    #[serde(rename = "OCO_TRIGGERED")]
    OcoTriggered,
}

impl std::fmt::Display for ClosingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClosingReason::TpHit => write!(f, "TP_HIT"),
            ClosingReason::SlHit => write!(f, "SL_HIT"),
            ClosingReason::ManualClose => write!(f, "MANUAL_CLOSE"),
            ClosingReason::OcoTriggered => write!(f, "OCO_TRIGGERED"),
        }
    }
}

/// A single fill, real or synthesized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Exchange order id, or a synthetic id for paper fills
    pub order_id: String,
    pub requested_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub executed_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One entry in the trailing-stop audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAdjustment {
    pub timestamp: DateTime<Utc>,
    pub new_stop_price: Decimal,
    pub market_price: Decimal,
}

/// One position lifecycle: entry fill, trailing-stop state, exit fills, outcome.
///
/// While `position_status` is `Open` the terminal fields (`closing_reason`,
/// `closed_at`, `pnl_usd`, `pnl_percentage`) are `None`; `record_close` sets
/// them exactly once. The entry order and risk parameters are frozen after
/// close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub user_id: String,
    pub mode: TradeMode,
    pub symbol: String,
    pub side: TradeSide,
    pub entry_order: ExecutionRecord,
    #[serde(default)]
    pub exit_orders: Vec<ExecutionRecord>,
    pub position_status: PositionStatus,
    pub take_profit_price: Decimal,
    pub trailing_stop_activation_price: Decimal,
    pub trailing_stop_callback_rate: Decimal,
    pub current_stop_price: Decimal,
    pub closing_reason: Option<ClosingReason>,
    pub closed_at: Option<DateTime<Utc>>,
    pub pnl_usd: Option<Decimal>,
    pub pnl_percentage: Option<Decimal>,
    #[serde(default)]
    pub risk_adjustments: Vec<RiskAdjustment>,
    pub opportunity_id: Option<Uuid>,
    pub opened_at: DateTime<Utc>,
}

impl Trade {
    /// Open a new trade from an entry fill and risk percentages.
    ///
    /// BUY: `take_profit = entry * (1 + tp_pct)`, initial stop and activation
    /// at `entry * (1 - tsl_pct)`. SELL is mirrored.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        user_id: &str,
        mode: TradeMode,
        symbol: &str,
        side: TradeSide,
        entry_order: ExecutionRecord,
        take_profit_pct: Decimal,
        trailing_stop_pct: Decimal,
        callback_rate: Decimal,
        opportunity_id: Option<Uuid>,
    ) -> Trade {
        let entry_price = entry_order.executed_price;
        let (take_profit_price, stop_price) = match side {
            TradeSide::Buy => (
                entry_price * (Decimal::ONE + take_profit_pct),
                entry_price * (Decimal::ONE - trailing_stop_pct),
            ),
            TradeSide::Sell => (
                entry_price * (Decimal::ONE - take_profit_pct),
                entry_price * (Decimal::ONE + trailing_stop_pct),
            ),
        };

        Trade {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            mode,
            symbol: symbol.to_string(),
            side,
            opened_at: entry_order.timestamp,
            entry_order,
            exit_orders: Vec::new(),
            position_status: PositionStatus::Open,
            take_profit_price,
            trailing_stop_activation_price: stop_price,
            trailing_stop_callback_rate: callback_rate,
            current_stop_price: stop_price,
            closing_reason: None,
            closed_at: None,
            pnl_usd: None,
            pnl_percentage: None,
            risk_adjustments: Vec::new(),
            opportunity_id,
        }
    }

    pub fn is_open(&self) -> bool {
        self.position_status == PositionStatus::Open
    }

    pub fn entry_price(&self) -> Decimal {
        self.entry_order.executed_price
    }

    pub fn entry_value(&self) -> Decimal {
        self.entry_order.executed_quantity * self.entry_order.executed_price
    }

    /// Trailing-stop ratchet. Only moves once the price has cleared the entry
    /// in the favorable direction, and only ever toward the price: the stop
    /// is monotonically non-decreasing for BUY and non-increasing for SELL.
    ///
    /// Returns the adopted stop and appends an audit entry, or `None` when
    /// the stop is unchanged.
    pub fn ratchet_stop(&mut self, current_price: Decimal, now: DateTime<Utc>) -> Option<Decimal> {
        if !self.is_open() {
            return None;
        }

        let entry = self.entry_price();
        let candidate = match self.side {
            TradeSide::Buy if current_price > entry => {
                current_price * (Decimal::ONE - self.trailing_stop_callback_rate)
            }
            TradeSide::Sell if current_price < entry => {
                current_price * (Decimal::ONE + self.trailing_stop_callback_rate)
            }
            _ => return None,
        };

        let improved = match self.side {
            TradeSide::Buy => candidate > self.current_stop_price,
            TradeSide::Sell => candidate < self.current_stop_price,
        };
        if !improved {
            return None;
        }

        self.current_stop_price = candidate;
        self.risk_adjustments.push(RiskAdjustment {
            timestamp: now,
            new_stop_price: candidate,
            market_price: current_price,
        });
        Some(candidate)
    }

    /// Exit detection. TP is checked before SL; if both conditions hold in
    /// the same tick, TP wins.
    pub fn exit_trigger(&self, current_price: Decimal) -> Option<ClosingReason> {
        if !self.is_open() {
            return None;
        }
        match self.side {
            TradeSide::Buy => {
                if current_price >= self.take_profit_price {
                    Some(ClosingReason::TpHit)
                } else if current_price <= self.current_stop_price {
                    Some(ClosingReason::SlHit)
                } else {
                    None
                }
            }
            TradeSide::Sell => {
                if current_price <= self.take_profit_price {
                    Some(ClosingReason::TpHit)
                } else if current_price >= self.current_stop_price {
                    Some(ClosingReason::SlHit)
                } else {
                    None
                }
            }
        }
    }

    /// Record the exit fill and freeze the trade: appends the exit order,
    /// computes P&L, and sets the terminal fields exactly once.
    pub fn record_close(
        &mut self,
        exit_order: ExecutionRecord,
        reason: ClosingReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(EngineError::OrderExecution(format!(
                "trade {} is already {}",
                self.id,
                self.position_status.as_str()
            )));
        }

        self.exit_orders.push(exit_order);

        let entry_value = self.entry_value();
        let exit_value: Decimal = self
            .exit_orders
            .iter()
            .map(|o| o.executed_quantity * o.executed_price)
            .sum();
        let pnl = match self.side {
            TradeSide::Buy => exit_value - entry_value,
            TradeSide::Sell => entry_value - exit_value,
        };
        let pnl_pct = if entry_value != Decimal::ZERO {
            pnl / entry_value * dec!(100)
        } else {
            Decimal::ZERO
        };

        self.pnl_usd = Some(pnl);
        self.pnl_percentage = Some(pnl_pct);
        self.closing_reason = Some(reason);
        self.closed_at = Some(now);
        self.position_status = PositionStatus::Closed;
        Ok(())
    }
}

/// Opportunity lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    New,
    PendingAiAnalysis,
    AnalysisComplete,
    PendingUserConfirmationReal,
    ConvertedToTradeReal,
    ConvertedToTradePaper,
    RejectedByUser,
    RejectedByAi,
    ExecutionFailed,
    Expired,
}

impl OpportunityStatus {
    /// Whether an entry flow in the given mode may convert this opportunity.
    pub fn is_confirmable(&self, mode: TradeMode) -> bool {
        match mode {
            TradeMode::Real => *self == OpportunityStatus::PendingUserConfirmationReal,
            TradeMode::Paper => *self == OpportunityStatus::AnalysisComplete,
        }
    }
}

/// AI verdict attached to an opportunity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub suggested_action: TradeSide,
    /// Confidence in the suggestion (0-1)
    pub confidence: Decimal,
    pub reasoning: String,
}

/// An external trading signal that may be converted into a trade.
///
/// Only the entry flow mutates an opportunity; the monitor loop never
/// touches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub user_id: String,
    pub symbol: String,
    pub status: OpportunityStatus,
    pub ai_analysis: Option<AiAnalysis>,
    pub linked_trade_id: Option<Uuid>,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn new(user_id: &str, symbol: &str, status: OpportunityStatus) -> Opportunity {
        let now = Utc::now();
        Opportunity {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            status,
            ai_analysis: None,
            linked_trade_id: None,
            status_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_analysis(mut self, analysis: AiAnalysis) -> Opportunity {
        self.ai_analysis = Some(analysis);
        self
    }
}

/// Per-user trading policy and the mutable daily/lifetime counters.
///
/// Writes go through the versioned settings row in storage; `version` is
/// bumped on every successful save so concurrent entry flows cannot
/// double-spend the daily cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    #[serde(default)]
    pub version: i64,
    pub real_trading_active: bool,
    pub max_real_trades: u32,
    /// Capital fraction risked per real trade; falls back to the real-flow
    /// default when unset
    pub per_trade_capital_pct: Option<Decimal>,
    /// Capital fraction risked per paper trade; falls back to the paper-flow
    /// default when unset
    pub paper_risk_pct: Option<Decimal>,
    /// Daily aggregate cap as a fraction of total capital
    pub daily_capital_risk_pct: Decimal,
    /// Capital base for real-mode sizing and the daily cap
    pub total_capital_usd: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_stop_pct: Decimal,
    pub trailing_stop_callback_rate: Decimal,
    pub real_trades_executed_count: u32,
    pub daily_capital_risked_usd: Decimal,
    pub last_daily_reset: DateTime<Utc>,
}

impl UserSettings {
    /// Daily cap in USD derived from total capital.
    pub fn daily_capital_limit_usd(&self) -> Decimal {
        self.total_capital_usd * self.daily_capital_risk_pct
    }

    /// Rolling 24h window reset. Returns true when the window rolled over and
    /// the counter was zeroed; the caller must persist before relying on the
    /// fresh window.
    pub fn roll_daily_window(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.last_daily_reset > Duration::hours(24) {
            self.daily_capital_risked_usd = Decimal::ZERO;
            self.last_daily_reset = now;
            true
        } else {
            false
        }
    }
}

/// Known quote assets, longest first so BTCUSDT splits as BTC/USDT and not
/// BTCUSD/T.
const QUOTE_ASSETS: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "BTC", "ETH", "BNB", "EUR", "TRY", "GBP",
];

/// Split a Binance pair symbol into (base, quote).
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    for quote in QUOTE_ASSETS {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return Some((base, quote));
            }
        }
    }
    None
}
