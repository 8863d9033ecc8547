//! Binance spot REST client
//!
//! Unsigned market-data reads plus HMAC-SHA256 signed order placement and
//! account queries.

use crate::client::MarketDataSource;
use crate::credentials::ExchangeCredentials;
use crate::error::{EngineError, Result};
use crate::types::TradeSide;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Binance spot REST client
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    base_url: String,
    recv_window_ms: u64,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

/// One fill reported in an order response
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceFill {
    pub price: String,
    pub qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    cummulative_quote_qty: String,
    #[serde(default)]
    fills: Vec<BinanceFill>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<AccountBalance>,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    asset: String,
    free: String,
}

/// Outcome of a placed market order
#[derive(Debug, Clone)]
pub struct BinanceOrderResult {
    pub order_id: String,
    pub executed_quantity: Decimal,
    pub average_price: Decimal,
}

impl BinanceClient {
    pub fn new(base_url: &str, recv_window_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            recv_window_ms,
        })
    }

    /// Latest traded price for a symbol.
    pub async fn ticker_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EngineError::MarketData(format!(
                "ticker {} returned {}",
                symbol,
                resp.status()
            )));
        }

        let ticker: TickerPrice = resp.json().await?;
        ticker
            .price
            .parse::<Decimal>()
            .map_err(|e| EngineError::MarketData(format!("unparseable price for {symbol}: {e}")))
    }

    /// Place a signed market order and return the aggregate fill.
    pub async fn place_market_order(
        &self,
        credentials: &ExchangeCredentials,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<BinanceOrderResult> {
        let timestamp = Utc::now().timestamp_millis();
        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&recvWindow={}&timestamp={}",
            symbol,
            side.as_str(),
            quantity,
            self.recv_window_ms,
            timestamp
        );
        let signature = sign_query(&query, &credentials.api_secret)?;
        let url = format!(
            "{}/api/v3/order?{}&signature={}",
            self.base_url, query, signature
        );

        debug!(symbol, side = side.as_str(), %quantity, "submitting market order");

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let msg = match resp.json::<ApiErrorBody>().await {
                Ok(body) => format!("{} (code {})", body.msg, body.code),
                Err(_) => format!("HTTP {status}"),
            };
            return Err(EngineError::OrderExecution(format!(
                "{} {} rejected: {}",
                side.as_str(),
                symbol,
                msg
            )));
        }

        let order: OrderResponse = resp.json().await?;
        let executed_qty = order
            .executed_qty
            .parse::<Decimal>()
            .unwrap_or(Decimal::ZERO);
        let average_price = average_fill_price(&order, executed_qty)?;

        if executed_qty <= Decimal::ZERO {
            return Err(EngineError::OrderExecution(format!(
                "order {} for {} filled zero quantity",
                order.order_id, symbol
            )));
        }

        Ok(BinanceOrderResult {
            order_id: order.order_id.to_string(),
            executed_quantity: executed_qty,
            average_price,
        })
    }

    /// Free balances from the signed account endpoint, zero-balance assets
    /// filtered out.
    pub async fn account_balances(
        &self,
        credentials: &ExchangeCredentials,
    ) -> Result<Vec<(String, Decimal)>> {
        let timestamp = Utc::now().timestamp_millis();
        let query = format!(
            "recvWindow={}&timestamp={}",
            self.recv_window_ms, timestamp
        );
        let signature = sign_query(&query, &credentials.api_secret)?;
        let url = format!(
            "{}/api/v3/account?{}&signature={}",
            self.base_url, query, signature
        );

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EngineError::Portfolio(format!(
                "account query returned {}",
                resp.status()
            )));
        }

        let account: AccountResponse = resp.json().await?;
        let mut balances = Vec::new();
        for b in account.balances {
            let free = b.free.parse::<Decimal>().unwrap_or(Decimal::ZERO);
            if free > Decimal::ZERO {
                balances.push((b.asset, free));
            }
        }
        Ok(balances)
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn latest_price(&self, symbol: &str) -> Result<Decimal> {
        self.ticker_price(symbol).await
    }
}

fn sign_query(query: &str, api_secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|e| EngineError::Credential(format!("unusable API secret: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Quantity-weighted fill price, preferring the cumulative quote total and
/// falling back to individual fills.
fn average_fill_price(order: &OrderResponse, executed_qty: Decimal) -> Result<Decimal> {
    if executed_qty > Decimal::ZERO {
        if let Ok(quote_total) = order.cummulative_quote_qty.parse::<Decimal>() {
            if quote_total > Decimal::ZERO {
                return Ok(quote_total / executed_qty);
            }
        }
    }

    let mut qty_sum = Decimal::ZERO;
    let mut value_sum = Decimal::ZERO;
    for f in &order.fills {
        let price = f.price.parse::<Decimal>().unwrap_or(Decimal::ZERO);
        let qty = f.qty.parse::<Decimal>().unwrap_or(Decimal::ZERO);
        qty_sum += qty;
        value_sum += price * qty;
    }
    if qty_sum > Decimal::ZERO {
        Ok(value_sum / qty_sum)
    } else {
        Err(EngineError::OrderExecution(
            "order response carried no usable fill price".to_string(),
        ))
    }
}
