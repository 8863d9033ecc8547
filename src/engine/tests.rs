//! Engine scenario tests
//!
//! These drive the entry flows, close routine, and monitor ticks end to end
//! over an in-memory database. Ticks are driven directly; nothing here
//! sleeps on the wall clock.

use super::*;
use crate::client::MarketDataSource;
use crate::credentials::{ExchangeCredentials, MockCredentialStore};
use crate::executor::{MockOrderExecutor, PaperExecutor};
use crate::portfolio::PortfolioLedger;
use crate::types::{AiAnalysis, PositionStatus, TradeSide};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

/// Price source replaying a fixed tape; errors once the tape runs out.
struct ScriptedMarket {
    prices: parking_lot::Mutex<VecDeque<Decimal>>,
}

impl ScriptedMarket {
    fn new(prices: &[Decimal]) -> Self {
        Self {
            prices: parking_lot::Mutex::new(prices.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn latest_price(&self, _symbol: &str) -> Result<Decimal> {
        self.prices
            .lock()
            .pop_front()
            .ok_or_else(|| EngineError::MarketData("price tape exhausted".to_string()))
    }
}

struct Harness {
    engine: Arc<TradingEngine>,
    db: Database,
    ledger: PortfolioLedger,
}

async fn paper_harness(prices: &[Decimal]) -> Harness {
    let db = Database::connect(":memory:").await.unwrap();
    let ledger = PortfolioLedger::new(db.clone(), "user-1", "USDT");
    ledger.seed_if_empty(dec!(1000)).await.unwrap();
    let market = Arc::new(ScriptedMarket::new(prices));
    let paper = PaperExecutor::new(ledger.clone());

    let engine = Arc::new(TradingEngine::new(
        db.clone(),
        market as Arc<dyn MarketDataSource>,
        Arc::new(MockCredentialStore::new()),
        ledger.clone(),
        Notifier::disabled(),
        vec![Arc::new(paper)],
        "user-1",
        Duration::from_secs(3600),
    ));

    Harness { engine, db, ledger }
}

async fn real_harness(
    prices: &[Decimal],
    executor: MockOrderExecutor,
    credentials: MockCredentialStore,
) -> Harness {
    let db = Database::connect(":memory:").await.unwrap();
    let ledger = PortfolioLedger::new(db.clone(), "user-1", "USDT");
    let market = Arc::new(ScriptedMarket::new(prices));

    let engine = Arc::new(TradingEngine::new(
        db.clone(),
        market as Arc<dyn MarketDataSource>,
        Arc::new(credentials),
        ledger.clone(),
        Notifier::disabled(),
        vec![Arc::new(executor)],
        "user-1",
        Duration::from_secs(3600),
    ));

    Harness { engine, db, ledger }
}

fn paper_opportunity() -> Opportunity {
    Opportunity::new("user-1", "BTCUSDT", OpportunityStatus::AnalysisComplete).with_analysis(
        AiAnalysis {
            suggested_action: TradeSide::Buy,
            confidence: dec!(0.8),
            reasoning: "upward momentum".to_string(),
        },
    )
}

fn real_opportunity() -> Opportunity {
    Opportunity::new(
        "user-1",
        "BTCUSDT",
        OpportunityStatus::PendingUserConfirmationReal,
    )
    .with_analysis(AiAnalysis {
        suggested_action: TradeSide::Buy,
        confidence: dec!(0.9),
        reasoning: "confirmed breakout".to_string(),
    })
}

fn real_executor_mock() -> MockOrderExecutor {
    let mut executor = MockOrderExecutor::new();
    executor.expect_mode().return_const(TradeMode::Real);
    executor
}

fn credentials_mock() -> MockCredentialStore {
    let mut store = MockCredentialStore::new();
    store.expect_get().returning(|_, _| {
        Ok(ExchangeCredentials {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
        })
    });
    store
}

async fn activate_real_trading(db: &Database) {
    let mut settings = db.get_user_settings("user-1").await.unwrap();
    settings.real_trading_active = true;
    db.save_user_settings(&mut settings).await.unwrap();
}

#[tokio::test]
async fn test_paper_entry_scenario_d() {
    // 1000 USDT, 10% risk, price 50 -> quantity 2, balance 900
    let h = paper_harness(&[dec!(50)]).await;
    let mut settings = h.db.get_user_settings("user-1").await.unwrap();
    settings.paper_risk_pct = Some(dec!(0.1));
    h.db.save_user_settings(&mut settings).await.unwrap();

    let opportunity = paper_opportunity();
    let trade = h.engine.simulate_paper_entry(&opportunity).await.unwrap();

    assert_eq!(trade.mode, TradeMode::Paper);
    assert_eq!(trade.side, TradeSide::Buy);
    assert_eq!(trade.entry_order.executed_quantity, dec!(2));
    assert_eq!(trade.entry_order.executed_price, dec!(50));
    assert_eq!(trade.position_status, PositionStatus::Open);
    assert_eq!(h.ledger.available_quote().await.unwrap(), dec!(900));
    assert_eq!(h.ledger.asset_balance("BTC").await.unwrap(), dec!(2));

    // Persisted and cross-linked
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert!(stored.is_open());
    let opp = h.db.get_opportunity(opportunity.id).await.unwrap().unwrap();
    assert_eq!(opp.status, OpportunityStatus::ConvertedToTradePaper);
    assert_eq!(opp.linked_trade_id, Some(trade.id));
}

#[tokio::test]
async fn test_paper_entry_uses_default_risk_fallback() {
    // No explicit paper risk: the 25% paper fallback applies
    let h = paper_harness(&[dec!(50)]).await;
    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();
    // 1000 * 0.25 / 50 = 5
    assert_eq!(trade.entry_order.executed_quantity, dec!(5));
    assert_eq!(h.ledger.available_quote().await.unwrap(), dec!(750));
}

#[tokio::test]
async fn test_paper_entry_risk_prices_scenario_a() {
    // Entry 100 with tp 5% / tsl 2% -> 105 / 98 / 98
    let h = paper_harness(&[dec!(100)]).await;
    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();
    assert_eq!(trade.take_profit_price, dec!(105.00));
    assert_eq!(trade.trailing_stop_activation_price, dec!(98.00));
    assert_eq!(trade.current_stop_price, dec!(98.00));
}

#[tokio::test]
async fn test_paper_entry_rejects_unconfirmable_status() {
    let h = paper_harness(&[dec!(100)]).await;
    let mut opportunity = paper_opportunity();
    opportunity.status = OpportunityStatus::PendingAiAnalysis;

    let err = h
        .engine
        .simulate_paper_entry(&opportunity)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION");
    assert!(h.db.list_trades("user-1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_paper_entry_requires_analysis() {
    let h = paper_harness(&[dec!(100)]).await;
    let opportunity =
        Opportunity::new("user-1", "BTCUSDT", OpportunityStatus::AnalysisComplete);

    let err = h
        .engine
        .simulate_paper_entry(&opportunity)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION");
}

#[tokio::test]
async fn test_paper_entry_fails_when_price_unavailable() {
    let h = paper_harness(&[]).await;
    let err = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MARKET_DATA");
    assert!(h.db.list_trades("user-1", 10).await.unwrap().is_empty());
    assert_eq!(h.ledger.available_quote().await.unwrap(), dec!(1000));
}

#[tokio::test]
async fn test_monitor_lifecycle_scenario_b() {
    // Entry at 100 with 10% risk -> qty 1. Ratchet at 105 to 103.95, hold
    // through 104, stop out at 103.9 with pnl (103.9-100)*1.
    let h = paper_harness(&[dec!(100), dec!(105), dec!(104), dec!(103.9)]).await;
    let mut settings = h.db.get_user_settings("user-1").await.unwrap();
    settings.paper_risk_pct = Some(dec!(0.1));
    // Keep the take-profit out of the way so the trailing stop decides
    settings.take_profit_pct = dec!(0.20);
    h.db.save_user_settings(&mut settings).await.unwrap();

    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();
    assert_eq!(trade.entry_order.executed_quantity, dec!(1));
    assert_eq!(h.ledger.available_quote().await.unwrap(), dec!(900));

    // Tick 1: 105 ratchets the stop to 103.95 and persists it
    h.engine.tick(TradeMode::Paper).await;
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert!(stored.is_open());
    assert_eq!(stored.current_stop_price, dec!(103.95));
    assert_eq!(stored.risk_adjustments.len(), 1);

    // Tick 2: 104 is above the stop, nothing moves
    h.engine.tick(TradeMode::Paper).await;
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert!(stored.is_open());
    assert_eq!(stored.current_stop_price, dec!(103.95));
    assert_eq!(stored.risk_adjustments.len(), 1);

    // Tick 3: 103.9 crosses the stop, trade closes as SL_HIT
    h.engine.tick(TradeMode::Paper).await;
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(stored.position_status, PositionStatus::Closed);
    assert_eq!(stored.closing_reason, Some(ClosingReason::SlHit));
    assert_eq!(stored.pnl_usd, Some(dec!(3.9)));
    assert_eq!(stored.exit_orders.len(), 1);
    assert_eq!(stored.exit_orders[0].executed_price, dec!(103.9));

    // Proceeds credited back: 900 + 103.9
    assert_eq!(h.ledger.available_quote().await.unwrap(), dec!(1003.9));
    assert_eq!(h.ledger.asset_balance("BTC").await.unwrap(), dec!(0));

    // Closed trades drop out of the monitor's view
    assert!(h
        .db
        .get_open_trades(TradeMode::Paper)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_monitor_takes_profit() {
    let h = paper_harness(&[dec!(100), dec!(105)]).await;
    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();

    h.engine.tick(TradeMode::Paper).await;
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(stored.position_status, PositionStatus::Closed);
    assert_eq!(stored.closing_reason, Some(ClosingReason::TpHit));
    // 5 units from 100 to 105
    assert_eq!(stored.pnl_usd, Some(dec!(12.50)));
}

#[tokio::test]
async fn test_monitor_skips_trade_when_price_unavailable() {
    let h = paper_harness(&[dec!(100)]).await;
    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();

    // Tape exhausted: the tick must leave the trade untouched
    h.engine.tick(TradeMode::Paper).await;
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert!(stored.is_open());
    assert_eq!(stored.current_stop_price, trade.current_stop_price);
    assert!(stored.risk_adjustments.is_empty());
}

#[tokio::test]
async fn test_manual_close() {
    let h = paper_harness(&[dec!(100), dec!(101)]).await;
    let mut settings = h.db.get_user_settings("user-1").await.unwrap();
    settings.paper_risk_pct = Some(dec!(0.1));
    h.db.save_user_settings(&mut settings).await.unwrap();

    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();

    let closed = h.engine.close_trade_manually(trade.id).await.unwrap();
    assert_eq!(closed.closing_reason, Some(ClosingReason::ManualClose));
    assert_eq!(closed.pnl_usd, Some(dec!(1.0)));
    assert_eq!(h.ledger.available_quote().await.unwrap(), dec!(1001.0));
}

#[tokio::test]
async fn test_manual_close_of_closed_trade_is_rejected() {
    let h = paper_harness(&[dec!(100), dec!(101), dec!(102)]).await;
    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();

    h.engine.close_trade_manually(trade.id).await.unwrap();
    let err = h.engine.close_trade_manually(trade.id).await.unwrap_err();
    assert_eq!(err.code(), "ORDER_EXECUTION");
    assert!(err.to_string().contains("already"));
}

#[tokio::test]
async fn test_close_persist_failure_enters_reconciliation_queue() {
    let h = paper_harness(&[dec!(100)]).await;
    let trade = h
        .engine
        .simulate_paper_entry(&paper_opportunity())
        .await
        .unwrap();
    let mut live = h.db.get_trade(trade.id).await.unwrap().unwrap();

    // Break persistence underneath the close
    h.db.execute_raw("DROP TABLE trades").await.unwrap();
    h.engine
        .close_position(&mut live, dec!(105), ClosingReason::TpHit)
        .await
        .unwrap();
    assert_eq!(live.position_status, PositionStatus::Closed);
    assert_eq!(h.engine.pending_reconciliations(), 1);

    // Heal the schema; the next tick sweeps the queue
    h.db.execute_raw(crate::storage::SCHEMA).await.unwrap();
    h.engine.tick(TradeMode::Paper).await;
    assert_eq!(h.engine.pending_reconciliations(), 0);
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(stored.position_status, PositionStatus::Closed);
    assert_eq!(stored.closing_reason, Some(ClosingReason::TpHit));
}

#[tokio::test]
async fn test_real_entry_happy_path() {
    let mut executor = real_executor_mock();
    executor
        .expect_execute_market_order()
        .withf(|req| {
            req.symbol == "BTCUSDT" && req.side == TradeSide::Buy && req.credentials.is_some()
        })
        .returning(|req| {
            Ok(ExecutionRecord {
                order_id: "10001".to_string(),
                requested_quantity: req.quantity,
                executed_quantity: req.quantity,
                executed_price: dec!(100),
                timestamp: Utc::now(),
            })
        });

    let h = real_harness(&[dec!(100)], executor, credentials_mock()).await;
    activate_real_trading(&h.db).await;
    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let trade = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap();

    assert_eq!(trade.mode, TradeMode::Real);
    // 10000 total capital at the 1% real fallback -> 100 USD -> qty 1
    assert_eq!(trade.entry_order.executed_quantity, dec!(1));
    assert!(trade.is_open());

    let settings = h.db.get_user_settings("user-1").await.unwrap();
    assert_eq!(settings.real_trades_executed_count, 1);
    assert_eq!(settings.daily_capital_risked_usd, dec!(100.00));

    let opp = h.db.get_opportunity(opportunity.id).await.unwrap().unwrap();
    assert_eq!(opp.status, OpportunityStatus::ConvertedToTradeReal);
    assert_eq!(opp.linked_trade_id, Some(trade.id));
}

#[tokio::test]
async fn test_real_entry_limit_reached_scenario_c() {
    // Count at the cap: no order submitted, opportunity untouched
    let h = real_harness(&[dec!(100)], real_executor_mock(), credentials_mock()).await;
    activate_real_trading(&h.db).await;
    let mut settings = h.db.get_user_settings("user-1").await.unwrap();
    settings.real_trades_executed_count = settings.max_real_trades;
    h.db.save_user_settings(&mut settings).await.unwrap();

    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let err = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CAPITAL_LIMIT");

    let opp = h.db.get_opportunity(opportunity.id).await.unwrap().unwrap();
    assert_eq!(opp.status, OpportunityStatus::PendingUserConfirmationReal);
    assert!(h.db.list_trades("user-1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_real_entry_inactive_real_trading() {
    let h = real_harness(&[dec!(100)], real_executor_mock(), credentials_mock()).await;
    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let err = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION");
}

#[tokio::test]
async fn test_real_entry_daily_cap() {
    let h = real_harness(&[dec!(100)], real_executor_mock(), credentials_mock()).await;
    activate_real_trading(&h.db).await;
    let mut settings = h.db.get_user_settings("user-1").await.unwrap();
    // Cap is 10000 * 0.10 = 1000; fill it
    settings.daily_capital_risked_usd = dec!(1000);
    h.db.save_user_settings(&mut settings).await.unwrap();

    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let err = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CAPITAL_LIMIT");
    assert!(err.to_string().contains("daily"));
}

#[tokio::test]
async fn test_real_entry_daily_reset_boundary() {
    // A stale window resets (and persists) before the cap is evaluated
    let mut executor = real_executor_mock();
    executor.expect_execute_market_order().returning(|req| {
        Ok(ExecutionRecord {
            order_id: "10002".to_string(),
            requested_quantity: req.quantity,
            executed_quantity: req.quantity,
            executed_price: dec!(100),
            timestamp: Utc::now(),
        })
    });
    let h = real_harness(&[dec!(100)], executor, credentials_mock()).await;
    activate_real_trading(&h.db).await;

    let mut settings = h.db.get_user_settings("user-1").await.unwrap();
    settings.daily_capital_risked_usd = dec!(1000); // would breach the cap
    settings.last_daily_reset = Utc::now() - chrono::Duration::hours(25);
    h.db.save_user_settings(&mut settings).await.unwrap();

    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    h.engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap();

    let settings = h.db.get_user_settings("user-1").await.unwrap();
    // Reset applied, then only this trade's capital recorded
    assert_eq!(settings.daily_capital_risked_usd, dec!(100.00));
    assert!(Utc::now() - settings.last_daily_reset < chrono::Duration::hours(1));
}

#[tokio::test]
async fn test_real_entry_daily_reset_persists_even_when_guard_fails() {
    let h = real_harness(&[dec!(100)], real_executor_mock(), credentials_mock()).await;
    activate_real_trading(&h.db).await;

    let mut settings = h.db.get_user_settings("user-1").await.unwrap();
    settings.daily_capital_risked_usd = dec!(900);
    settings.last_daily_reset = Utc::now() - chrono::Duration::hours(25);
    settings.real_trades_executed_count = settings.max_real_trades; // guard trips
    h.db.save_user_settings(&mut settings).await.unwrap();

    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let err = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CAPITAL_LIMIT");

    // The rolled window landed in storage despite the rejection
    let settings = h.db.get_user_settings("user-1").await.unwrap();
    assert_eq!(settings.daily_capital_risked_usd, Decimal::ZERO);
}

#[tokio::test]
async fn test_real_entry_exchange_error_marks_opportunity_failed() {
    let mut executor = real_executor_mock();
    executor
        .expect_execute_market_order()
        .returning(|_| Err(EngineError::OrderExecution("exchange said no".to_string())));

    let h = real_harness(&[dec!(100)], executor, credentials_mock()).await;
    activate_real_trading(&h.db).await;
    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let err = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_EXECUTION");

    let opp = h.db.get_opportunity(opportunity.id).await.unwrap().unwrap();
    assert_eq!(opp.status, OpportunityStatus::ExecutionFailed);
    assert!(opp.status_reason.unwrap().contains("exchange said no"));
    assert!(h.db.list_trades("user-1", 10).await.unwrap().is_empty());

    // Nothing counted against the caps
    let settings = h.db.get_user_settings("user-1").await.unwrap();
    assert_eq!(settings.real_trades_executed_count, 0);
}

#[tokio::test]
async fn test_real_entry_missing_credentials() {
    let mut credentials = MockCredentialStore::new();
    credentials
        .expect_get()
        .returning(|_, _| Err(EngineError::Credential("no keys on file".to_string())));

    let h = real_harness(&[dec!(100)], real_executor_mock(), credentials).await;
    activate_real_trading(&h.db).await;
    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let err = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CREDENTIAL");

    // Credential failures happen before submission: status untouched
    let opp = h.db.get_opportunity(opportunity.id).await.unwrap().unwrap();
    assert_eq!(opp.status, OpportunityStatus::PendingUserConfirmationReal);
}

#[tokio::test]
async fn test_real_close_exchange_error_leaves_trade_open() {
    let mut executor = real_executor_mock();
    // Entry succeeds, the flattening order fails
    executor
        .expect_execute_market_order()
        .withf(|req| req.side == TradeSide::Buy)
        .returning(|req| {
            Ok(ExecutionRecord {
                order_id: "10003".to_string(),
                requested_quantity: req.quantity,
                executed_quantity: req.quantity,
                executed_price: dec!(100),
                timestamp: Utc::now(),
            })
        });
    executor
        .expect_execute_market_order()
        .withf(|req| req.side == TradeSide::Sell)
        .returning(|_| Err(EngineError::OrderExecution("venue halted".to_string())));

    let h = real_harness(&[dec!(100)], executor, credentials_mock()).await;
    activate_real_trading(&h.db).await;
    let opportunity = real_opportunity();
    h.db.upsert_opportunity(&opportunity).await.unwrap();

    let trade = h
        .engine
        .execute_real_trade(opportunity.id, "user-1")
        .await
        .unwrap();

    let mut live = h.db.get_trade(trade.id).await.unwrap().unwrap();
    let err = h
        .engine
        .close_position(&mut live, dec!(105), ClosingReason::TpHit)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_EXECUTION");

    // Untouched in memory and storage: the next tick retries
    assert!(live.is_open());
    assert!(live.exit_orders.is_empty());
    let stored = h.db.get_trade(trade.id).await.unwrap().unwrap();
    assert!(stored.is_open());
}

#[tokio::test]
async fn test_monitor_start_stop_is_cooperative() {
    let h = paper_harness(&[]).await;
    h.engine.start_paper_trading_monitor().await;
    // Second start is a no-op rather than a second task
    h.engine.start_paper_trading_monitor().await;
    h.engine.stop_paper_trading_monitor().await;
    // Stopping again when nothing runs is fine
    h.engine.stop_paper_trading_monitor().await;
}
