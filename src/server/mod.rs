//! Status dashboard
//!
//! Read-only HTTP surface over the engine: health, portfolio snapshot, open
//! positions. The trading API proper lives with the callers of the engine;
//! this exists for quick inspection while the monitors run.

use crate::engine::TradingEngine;
use crate::error::{EngineError, Result};
use crate::portfolio::PortfolioSummary;
use crate::types::{Trade, TradeMode};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

pub fn router(engine: Arc<TradingEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/summary", get(summary))
        .route("/api/trades", get(open_trades))
        .with_state(engine)
}

pub async fn serve(engine: Arc<TradingEngine>, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| EngineError::Internal(format!("cannot bind {bind_addr}: {e}")))?;
    info!(%bind_addr, "status dashboard listening");
    axum::serve(listener, router(engine))
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn summary(
    State(engine): State<Arc<TradingEngine>>,
) -> std::result::Result<Json<PortfolioSummary>, (StatusCode, String)> {
    engine
        .portfolio_summary()
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn open_trades(
    State(engine): State<Arc<TradingEngine>>,
) -> std::result::Result<Json<Vec<Trade>>, (StatusCode, String)> {
    let mut trades = engine
        .open_trades(TradeMode::Paper)
        .await
        .map_err(internal_error)?;
    trades.extend(
        engine
            .open_trades(TradeMode::Real)
            .await
            .map_err(internal_error)?,
    );
    Ok(Json(trades))
}

fn internal_error(e: EngineError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
