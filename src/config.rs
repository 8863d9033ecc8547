//! Configuration loading and defaulting rules
//!
//! All fallback risk percentages live here so the defaulting story is
//! greppable in one place. The paper and real flows intentionally carry
//! different per-trade fallbacks (25% vs 1%); see DESIGN.md before touching
//! either value.

use crate::error::{EngineError, Result};
use crate::types::UserSettings;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Per-trade capital fraction for paper entries when unset in user settings.
pub const DEFAULT_PAPER_RISK_PCT: Decimal = dec!(0.25);
/// Per-trade capital fraction for real entries when unset in user settings.
pub const DEFAULT_REAL_RISK_PCT: Decimal = dec!(0.01);
/// Take-profit distance from entry.
pub const DEFAULT_TAKE_PROFIT_PCT: Decimal = dec!(0.05);
/// Initial trailing-stop distance from entry (also the activation price).
pub const DEFAULT_TRAILING_STOP_PCT: Decimal = dec!(0.02);
/// Callback rate used by the trailing-stop ratchet.
pub const DEFAULT_CALLBACK_RATE: Decimal = dec!(0.01);
/// Daily aggregate risk cap as a fraction of total capital.
pub const DEFAULT_DAILY_CAPITAL_RISK_PCT: Decimal = dec!(0.10);
/// Concurrent real-trade cap.
pub const DEFAULT_MAX_REAL_TRADES: u32 = 5;
/// Capital base assumed for real-mode sizing until the user sets one.
pub const DEFAULT_TOTAL_CAPITAL_USD: Decimal = dec!(10000);

impl UserSettings {
    /// Fresh settings row for a user that has never saved any.
    pub fn defaults_for(user_id: &str) -> UserSettings {
        UserSettings {
            user_id: user_id.to_string(),
            version: 0,
            real_trading_active: false,
            max_real_trades: DEFAULT_MAX_REAL_TRADES,
            per_trade_capital_pct: None,
            paper_risk_pct: None,
            daily_capital_risk_pct: DEFAULT_DAILY_CAPITAL_RISK_PCT,
            total_capital_usd: DEFAULT_TOTAL_CAPITAL_USD,
            take_profit_pct: DEFAULT_TAKE_PROFIT_PCT,
            trailing_stop_pct: DEFAULT_TRAILING_STOP_PCT,
            trailing_stop_callback_rate: DEFAULT_CALLBACK_RATE,
            real_trades_executed_count: 0,
            daily_capital_risked_usd: Decimal::ZERO,
            last_daily_reset: Utc::now(),
        }
    }

    /// Per-trade risk fraction for real entries, with the real-flow fallback.
    pub fn real_risk_pct(&self) -> Decimal {
        self.per_trade_capital_pct.unwrap_or(DEFAULT_REAL_RISK_PCT)
    }

    /// Per-trade risk fraction for paper entries, with the paper-flow fallback.
    pub fn effective_paper_risk_pct(&self) -> Decimal {
        self.paper_risk_pct.unwrap_or(DEFAULT_PAPER_RISK_PCT)
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub telegram: Option<TelegramConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    #[serde(default = "default_binance_url")]
    pub rest_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            rest_url: default_binance_url(),
            api_key: None,
            api_secret: None,
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Monitor polling interval
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Quote asset for the paper ledger and P&L reporting
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Seed balance for a fresh paper ledger
    #[serde(default = "default_paper_initial_balance")]
    pub paper_initial_balance: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            quote_asset: default_quote_asset(),
            paper_initial_balance: default_paper_initial_balance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_true")]
    pub notify_trades: bool,
    #[serde(default = "default_true")]
    pub notify_errors: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Config {
    /// Load from a TOML file layered with `SENTINEL_`-prefixed environment
    /// variables (e.g. `SENTINEL_BINANCE__API_KEY`).
    pub fn load(path: &str) -> Result<Config> {
        let path = shellexpand::tilde(path).into_owned();
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path))
            .add_source(
                config::Environment::with_prefix("SENTINEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| EngineError::Configuration(e.to_string()))
    }
}

fn default_user_id() -> String {
    "default".to_string()
}

fn default_binance_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_paper_initial_balance() -> Decimal {
    dec!(10000)
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_true() -> bool {
    true
}
