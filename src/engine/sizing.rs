//! Position sizing
//!
//! `quantity = available_capital * risk_pct / price`. No lot-size or
//! step-size rounding is applied; quantities go out as computed.

use crate::error::{EngineError, Result};
use rust_decimal::Decimal;

/// Capital committed to one trade. Fails when the risk fraction is outside
/// (0, 1] or the resulting capital is not positive.
pub fn capital_to_invest(available_capital: Decimal, risk_pct: Decimal) -> Result<Decimal> {
    if risk_pct <= Decimal::ZERO || risk_pct > Decimal::ONE {
        return Err(EngineError::Configuration(format!(
            "risk percentage {risk_pct} outside (0, 1]"
        )));
    }
    let capital = available_capital * risk_pct;
    if capital <= Decimal::ZERO {
        return Err(EngineError::CapitalLimit(format!(
            "insufficient capital: {available_capital} at {risk_pct} leaves nothing to invest"
        )));
    }
    Ok(capital)
}

/// Quantity to trade at the current price.
pub fn position_size(
    available_capital: Decimal,
    risk_pct: Decimal,
    price: Decimal,
) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(EngineError::MarketData(format!(
            "non-positive price {price}"
        )));
    }
    Ok(capital_to_invest(available_capital, risk_pct)? / price)
}
