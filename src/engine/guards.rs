//! Capital and risk guards for real-mode entries
//!
//! Stateless checks run before any price fetch or order submission. The
//! caller is responsible for rolling the 24h daily window (and persisting
//! the reset) before evaluating the daily cap.

use crate::error::{EngineError, Result};
use crate::types::UserSettings;
use rust_decimal::Decimal;

/// Validate a prospective real trade committing `trade_capital` USD.
pub fn check_real_entry(settings: &UserSettings, trade_capital: Decimal) -> Result<()> {
    if !settings.real_trading_active {
        return Err(EngineError::Configuration(format!(
            "real trading is not active for user '{}'",
            settings.user_id
        )));
    }

    if settings.real_trades_executed_count >= settings.max_real_trades {
        return Err(EngineError::CapitalLimit(format!(
            "real trade limit reached: {} of {}",
            settings.real_trades_executed_count, settings.max_real_trades
        )));
    }

    let daily_limit = settings.daily_capital_limit_usd();
    let projected = settings.daily_capital_risked_usd + trade_capital;
    if projected > daily_limit {
        return Err(EngineError::CapitalLimit(format!(
            "daily capital cap exceeded: {projected} of {daily_limit} USD"
        )));
    }

    Ok(())
}
