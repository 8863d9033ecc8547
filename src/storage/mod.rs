//! SQLite persistence for trades, opportunities, settings, and the paper
//! ledger
//!
//! Rows keep a few scalar columns for indexing plus the full entity as a
//! JSON body, so the domain types stay the single source of truth for
//! shape. The settings row carries an optimistic version: every save goes
//! through `UPDATE ... WHERE version = ?` and a lost race surfaces as a
//! typed conflict instead of a silent overwrite.

use crate::error::{EngineError, Result};
use crate::types::{Opportunity, OpportunityStatus, Trade, TradeMode, UserSettings};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    symbol TEXT NOT NULL,
    status TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    closed_at TEXT,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_status_mode ON trades (status, mode);

CREATE TABLE IF NOT EXISTS opportunities (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    status TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_settings (
    user_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS balances (
    user_id TEXT NOT NULL,
    asset TEXT NOT NULL,
    quantity TEXT NOT NULL,
    PRIMARY KEY (user_id, asset)
);
"#;

/// Handle over the SQLite pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path`. `":memory:"` gives
    /// an in-memory database, used by the test suites.
    pub async fn connect(path: &str) -> Result<Database> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // One connection keeps writes serialized and makes :memory: behave;
        // this is a single-user engine.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!(path, "database ready");
        Ok(Database { pool })
    }

    // ---- trades ----

    /// Insert or replace the trade row. Called after every mutation.
    pub async fn upsert_trade(&self, trade: &Trade) -> Result<()> {
        let body = serde_json::to_string(trade)?;
        sqlx::query(
            r#"INSERT INTO trades (id, user_id, mode, symbol, status, opened_at, closed_at, body)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   closed_at = excluded.closed_at,
                   body = excluded.body"#,
        )
        .bind(trade.id.to_string())
        .bind(&trade.user_id)
        .bind(trade.mode.to_string())
        .bind(&trade.symbol)
        .bind(trade.position_status.as_str())
        .bind(trade.opened_at.to_rfc3339())
        .bind(trade.closed_at.map(|t| t.to_rfc3339()))
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_trade(&self, id: uuid::Uuid) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT body FROM trades WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    /// Open trades for one mode, oldest first so monitor iteration order is
    /// stable.
    pub async fn get_open_trades(&self, mode: TradeMode) -> Result<Vec<Trade>> {
        let rows =
            sqlx::query("SELECT body FROM trades WHERE status = 'open' AND mode = ? ORDER BY opened_at")
                .bind(mode.to_string())
                .fetch_all(&self.pool)
                .await?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.try_get("body")?;
            trades.push(serde_json::from_str(&body)?);
        }
        Ok(trades)
    }

    pub async fn list_trades(&self, user_id: &str, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT body FROM trades WHERE user_id = ? ORDER BY opened_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.try_get("body")?;
            trades.push(serde_json::from_str(&body)?);
        }
        Ok(trades)
    }

    // ---- opportunities ----

    pub async fn upsert_opportunity(&self, opp: &Opportunity) -> Result<()> {
        let body = serde_json::to_string(opp)?;
        sqlx::query(
            r#"INSERT INTO opportunities (id, user_id, symbol, status, body)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   body = excluded.body"#,
        )
        .bind(opp.id.to_string())
        .bind(&opp.user_id)
        .bind(&opp.symbol)
        .bind(status_tag(opp.status)?)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_opportunity(&self, id: uuid::Uuid) -> Result<Option<Opportunity>> {
        let row = sqlx::query("SELECT body FROM opportunities WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    /// Status transition with an optional human-readable reason and trade
    /// cross-reference.
    pub async fn update_opportunity_status(
        &self,
        id: uuid::Uuid,
        status: OpportunityStatus,
        reason: Option<String>,
        linked_trade_id: Option<uuid::Uuid>,
    ) -> Result<()> {
        let mut opp = self.get_opportunity(id).await?.ok_or_else(|| {
            EngineError::Configuration(format!("opportunity {id} not found"))
        })?;
        opp.status = status;
        opp.status_reason = reason;
        if linked_trade_id.is_some() {
            opp.linked_trade_id = linked_trade_id;
        }
        opp.updated_at = chrono::Utc::now();
        self.upsert_opportunity(&opp).await
    }

    // ---- user settings ----

    /// Load the settings row, seeding defaults on first touch.
    pub async fn get_user_settings(&self, user_id: &str) -> Result<UserSettings> {
        let row = sqlx::query("SELECT version, body FROM user_settings WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            let version: i64 = row.try_get("version")?;
            let body: String = row.try_get("body")?;
            let mut settings: UserSettings = serde_json::from_str(&body)?;
            settings.version = version;
            return Ok(settings);
        }

        let settings = UserSettings::defaults_for(user_id);
        let body = serde_json::to_string(&settings)?;
        sqlx::query("INSERT OR IGNORE INTO user_settings (user_id, version, body) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(settings.version)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(settings)
    }

    /// Compare-and-swap save. Bumps `settings.version` on success; a lost
    /// race returns `SettingsConflict` and leaves the row untouched.
    pub async fn save_user_settings(&self, settings: &mut UserSettings) -> Result<()> {
        let expected = settings.version;
        let next = expected + 1;
        let mut to_store = settings.clone();
        to_store.version = next;
        let body = serde_json::to_string(&to_store)?;

        let result = sqlx::query(
            "UPDATE user_settings SET version = ?, body = ? WHERE user_id = ? AND version = ?",
        )
        .bind(next)
        .bind(body)
        .bind(&settings.user_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::SettingsConflict { expected });
        }
        settings.version = next;
        Ok(())
    }

    // ---- paper ledger balances ----

    pub async fn get_balance(&self, user_id: &str, asset: &str) -> Result<Decimal> {
        let row = sqlx::query("SELECT quantity FROM balances WHERE user_id = ? AND asset = ?")
            .bind(user_id)
            .bind(asset)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let qty: String = row.try_get("quantity")?;
                qty.parse::<Decimal>()
                    .map_err(|e| EngineError::Portfolio(format!("corrupt balance for {asset}: {e}")))
            }
            None => Ok(Decimal::ZERO),
        }
    }

    pub async fn set_balance(&self, user_id: &str, asset: &str, quantity: Decimal) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO balances (user_id, asset, quantity) VALUES (?, ?, ?)
               ON CONFLICT(user_id, asset) DO UPDATE SET quantity = excluded.quantity"#,
        )
        .bind(user_id)
        .bind(asset)
        .bind(quantity.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_balances(&self, user_id: &str) -> Result<Vec<(String, Decimal)>> {
        let rows = sqlx::query("SELECT asset, quantity FROM balances WHERE user_id = ? ORDER BY asset")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        let mut balances = Vec::with_capacity(rows.len());
        for row in rows {
            let asset: String = row.try_get("asset")?;
            let qty: String = row.try_get("quantity")?;
            let qty = qty
                .parse::<Decimal>()
                .map_err(|e| EngineError::Portfolio(format!("corrupt balance for {asset}: {e}")))?;
            balances.push((asset, qty));
        }
        Ok(balances)
    }
}

#[cfg(test)]
impl Database {
    /// Direct SQL escape hatch for tests that need to break or heal the
    /// schema underneath the engine.
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }
}

fn status_tag(status: OpportunityStatus) -> Result<String> {
    match serde_json::to_value(status)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(EngineError::Configuration(format!(
            "unexpected status encoding: {other}"
        ))),
    }
}
