//! Telegram notifications
//!
//! Fire-and-forget: callers treat every failure as non-fatal, logging and
//! moving on. A trade state change is never rolled back because a message
//! did not send.

use crate::config::TelegramConfig;
use crate::error::{EngineError, Result};
use crate::types::Trade;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// Message severity, reflected in the emoji prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
    Critical,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
    parse_mode: String,
}

/// Telegram notifier. `disabled()` yields a no-op notifier so call sites
/// never need to branch on configuration. The `notify_trades` /
/// `notify_errors` config switches filter the purpose helpers; `send` and
/// `critical` always go out.
#[derive(Clone)]
pub struct Notifier {
    http: Client,
    credentials: Option<(String, String)>, // (bot_token, chat_id)
    notify_trades: bool,
    notify_errors: bool,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: Client::new(),
            credentials: Some((bot_token, chat_id)),
            notify_trades: true,
            notify_errors: true,
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self {
            http: Client::new(),
            credentials: Some((config.bot_token.clone(), config.chat_id.clone())),
            notify_trades: config.notify_trades,
            notify_errors: config.notify_errors,
        }
    }

    pub fn disabled() -> Self {
        Self {
            http: Client::new(),
            credentials: None,
            notify_trades: true,
            notify_errors: true,
        }
    }

    /// Send raw HTML-formatted text.
    pub async fn send(&self, text: &str) -> Result<()> {
        let Some((bot_token, chat_id)) = &self.credentials else {
            debug!("notifier disabled, dropping message");
            return Ok(());
        };

        let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
        let request = SendMessageRequest {
            chat_id: chat_id.clone(),
            text: text.to_string(),
            parse_mode: "HTML".to_string(),
        };

        let resp = self.http.post(&url).json(&request).send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::Notification(format!(
                "telegram returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn startup(&self, paper_monitor: bool, real_monitor: bool) -> Result<()> {
        self.send(&format!(
            "🚀 <b>Trade Sentinel started</b>\n\nPaper monitor: {}\nReal monitor: {}",
            if paper_monitor { "on" } else { "off" },
            if real_monitor { "on" } else { "off" },
        ))
        .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send("🛑 <b>Trade Sentinel stopped</b>").await
    }

    pub async fn trade_opened(&self, trade: &Trade) -> Result<()> {
        if !self.notify_trades {
            return Ok(());
        }
        self.send(&format!(
            "📈 <b>Position opened</b> ({})\n\n\
            {} {} <code>{}</code>\n\
            Entry: <code>{}</code> × <code>{}</code>\n\
            TP: <code>{}</code> | Stop: <code>{}</code>",
            trade.mode,
            trade.side.as_str(),
            trade.symbol,
            trade.id,
            trade.entry_order.executed_price,
            trade.entry_order.executed_quantity,
            trade.take_profit_price,
            trade.current_stop_price,
        ))
        .await
    }

    pub async fn trade_closed(&self, trade: &Trade) -> Result<()> {
        if !self.notify_trades {
            return Ok(());
        }
        let pnl = trade.pnl_usd.unwrap_or(Decimal::ZERO);
        let pnl_pct = trade.pnl_percentage.unwrap_or(Decimal::ZERO);
        let emoji = if pnl >= Decimal::ZERO { "🟢" } else { "🔴" };
        let reason = trade
            .closing_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        self.send(&format!(
            "{emoji} <b>Position closed</b> ({})\n\n\
            {} {} <code>{}</code>\n\
            Reason: {}\n\
            PnL: <code>{:+}</code> ({:+}%)",
            trade.mode,
            trade.side.as_str(),
            trade.symbol,
            trade.id,
            reason,
            pnl,
            pnl_pct,
        ))
        .await
    }

    pub async fn risk_alert(&self, title: &str, detail: &str) -> Result<()> {
        if !self.notify_errors {
            return Ok(());
        }
        self.send(&format!("⚠️ <b>{title}</b>\n\n{detail}")).await
    }

    pub async fn error(&self, context: &str, detail: &str) -> Result<()> {
        if !self.notify_errors {
            return Ok(());
        }
        self.notify_with_severity(Severity::Error, context, detail)
            .await
    }

    pub async fn critical(&self, context: &str, detail: &str) -> Result<()> {
        self.notify_with_severity(Severity::Critical, context, detail)
            .await
    }

    async fn notify_with_severity(
        &self,
        severity: Severity,
        context: &str,
        detail: &str,
    ) -> Result<()> {
        let emoji = match severity {
            Severity::Info => "ℹ️",
            Severity::Error => "❌",
            Severity::Critical => "🆘",
        };
        self.send(&format!("{emoji} <b>{context}</b>\n\n{detail}"))
            .await
    }
}
