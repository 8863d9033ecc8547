//! Offline paper-trading session against a replayed price tape
//!
//! Opens a paper position from a synthetic opportunity and drives monitor
//! ticks through a scripted price sequence, printing the lifecycle as it
//! unfolds. Useful for demonstrating the ratchet/exit behavior without any
//! network access.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use trade_sentinel::{
    client::MarketDataSource,
    credentials::{CredentialStore, ExchangeCredentials},
    engine::TradingEngine,
    error::{EngineError, Result},
    executor::PaperExecutor,
    notify::Notifier,
    portfolio::PortfolioLedger,
    storage::Database,
    types::{AiAnalysis, Opportunity, OpportunityStatus, TradeMode, TradeSide},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Replays a fixed tape of prices, then keeps returning the last one.
struct TapeMarket {
    prices: parking_lot::Mutex<VecDeque<Decimal>>,
    last: parking_lot::Mutex<Option<Decimal>>,
}

impl TapeMarket {
    fn new(prices: &[Decimal]) -> Self {
        Self {
            prices: parking_lot::Mutex::new(prices.iter().copied().collect()),
            last: parking_lot::Mutex::new(None),
        }
    }
}

#[async_trait]
impl MarketDataSource for TapeMarket {
    async fn latest_price(&self, _symbol: &str) -> Result<Decimal> {
        if let Some(price) = self.prices.lock().pop_front() {
            *self.last.lock() = Some(price);
            return Ok(price);
        }
        let last = *self.last.lock();
        last.ok_or_else(|| EngineError::MarketData("tape is empty".to_string()))
    }
}

/// No real trading happens here; the store refuses everything.
struct NoCredentials;

#[async_trait]
impl CredentialStore for NoCredentials {
    async fn get(&self, _user_id: &str, _service: &str) -> Result<ExchangeCredentials> {
        Err(EngineError::Credential(
            "paper session has no exchange credentials".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Entry at 100, ratchet through the rally, stop out on the pullback
    let tape = [
        dec!(100),
        dec!(101.5),
        dec!(103),
        dec!(105),
        dec!(104.2),
        dec!(103.9),
    ];

    let db = Database::connect(":memory:").await?;
    let ledger = PortfolioLedger::new(db.clone(), "demo", "USDT");
    ledger.seed_if_empty(dec!(1000)).await?;

    let mut settings = db.get_user_settings("demo").await?;
    settings.paper_risk_pct = Some(dec!(0.1));
    db.save_user_settings(&mut settings).await?;

    let market = Arc::new(TapeMarket::new(&tape));
    let engine = Arc::new(TradingEngine::new(
        db.clone(),
        market as Arc<dyn MarketDataSource>,
        Arc::new(NoCredentials),
        ledger.clone(),
        Notifier::disabled(),
        vec![Arc::new(PaperExecutor::new(ledger.clone()))],
        "demo",
        Duration::from_secs(1),
    ));

    let opportunity = Opportunity::new("demo", "BTCUSDT", OpportunityStatus::AnalysisComplete)
        .with_analysis(AiAnalysis {
            suggested_action: TradeSide::Buy,
            confidence: dec!(0.8),
            reasoning: "scripted demo signal".to_string(),
        });

    let trade = engine.simulate_paper_entry(&opportunity).await?;
    println!(
        "Opened {} {} @ {} (qty {}) | TP {} | stop {}",
        trade.side.as_str(),
        trade.symbol,
        trade.entry_order.executed_price,
        trade.entry_order.executed_quantity,
        trade.take_profit_price,
        trade.current_stop_price,
    );

    for step in 1.. {
        engine.tick(TradeMode::Paper).await;

        let current = db
            .get_trade(trade.id)
            .await?
            .expect("trade row disappeared");
        println!(
            "tick {step}: status={} stop={}",
            current.position_status.as_str(),
            current.current_stop_price,
        );
        if !current.is_open() {
            println!(
                "Closed: reason={} pnl={} ({}%)",
                current
                    .closing_reason
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
                current.pnl_usd.unwrap_or(Decimal::ZERO),
                current.pnl_percentage.unwrap_or(Decimal::ZERO),
            );
            break;
        }
        if step > 10 {
            println!("tape exhausted without an exit");
            break;
        }
    }

    let balance = ledger.available_quote().await?;
    println!("Final USDT balance: {balance}");
    Ok(())
}
