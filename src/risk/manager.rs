use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::config::{RiskSettings, SymbolThresholds, TradingConfigManager};
use crate::types::Direction;

/// Concrete order levels for an accepted trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeParameters {
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub lot_size: Decimal,
    pub risk_amount: Decimal,
}

/// Caller-supplied market context for sizing
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub atr: Option<Decimal>,
    pub account_balance: Option<Decimal>,
    pub risk_per_pip: Option<Decimal>,
}

pub struct RiskManager {
    config: TradingConfigManager,
}

impl RiskManager {
    pub fn new(config: TradingConfigManager) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TradingConfigManager {
        &self.config
    }

    /// Stop/target/lot for a directional trade, or the reason none can be placed.
    pub async fn plan_trade(&self, request: &SizingRequest) -> Result<TradeParameters, String> {
        let config = self.config.get_config().await;
        plan_trade(&config.risk, config.thresholds_for(&request.symbol), request)
    }
}

pub fn plan_trade(
    risk: &RiskSettings,
    symbol: &SymbolThresholds,
    request: &SizingRequest,
) -> Result<TradeParameters, String> {
    let is_long = match request.direction {
        Direction::Buy => true,
        Direction::Sell => false,
        Direction::Hold => return Err("no trade on hold".to_string()),
    };
    if request.entry_price <= Decimal::ZERO {
        return Err("entry_price must be positive".to_string());
    }

    let entry = request.entry_price;
    let out_of_range = || format!("trade levels out of range for entry {}", entry);
    let stop_loss = calculate_stop_loss(risk, entry, is_long, request.atr).ok_or_else(out_of_range)?;
    if stop_loss <= Decimal::ZERO {
        return Err(format!("stop loss {} is not a valid price", stop_loss));
    }
    let take_profit =
        calculate_take_profit(risk, entry, stop_loss, is_long, request.atr).ok_or_else(out_of_range)?;

    let risk_per_pip = request
        .risk_per_pip
        .filter(|r| *r > Decimal::ZERO)
        .unwrap_or(risk.default_risk_per_pip);
    let (lot_size, risk_amount) = match request.account_balance.filter(|b| *b > Decimal::ZERO) {
        Some(balance) => {
            let risk_amount = balance
                .checked_mul(risk.risk_per_trade_pct)
                .and_then(|r| r.checked_div(Decimal::ONE_HUNDRED))
                .ok_or_else(out_of_range)?;
            let stop_distance = entry.checked_sub(stop_loss).ok_or_else(out_of_range)?.abs();
            let lot = calculate_lot_size(risk, symbol, risk_amount, stop_distance, risk_per_pip)
                .ok_or_else(out_of_range)?;
            (lot, risk_amount)
        }
        // Without a balance only the smallest lot is safe.
        None => (risk.min_lot, Decimal::ZERO),
    };

    debug!(
        "{} {} @ {}: SL {} TP {} lots {}",
        request.symbol,
        request.direction,
        entry,
        stop_loss,
        take_profit,
        lot_size
    );

    Ok(TradeParameters {
        entry_price: entry,
        stop_loss,
        take_profit,
        lot_size,
        risk_amount,
    })
}

/// `None` when the level overflows the decimal range.
pub fn calculate_stop_loss(
    risk: &RiskSettings,
    entry_price: Decimal,
    is_long: bool,
    atr: Option<Decimal>,
) -> Option<Decimal> {
    let stop_distance = match atr.filter(|a| *a > Decimal::ZERO) {
        Some(atr_value) => atr_value.checked_mul(risk.stop_loss_atr_multiplier)?,
        None => entry_price
            .checked_mul(risk.default_stop_loss_pct)?
            .checked_div(Decimal::ONE_HUNDRED)?,
    };

    if is_long {
        entry_price.checked_sub(stop_distance)
    } else {
        entry_price.checked_add(stop_distance)
    }
}

pub fn calculate_take_profit(
    risk: &RiskSettings,
    entry_price: Decimal,
    stop_loss: Decimal,
    is_long: bool,
    atr: Option<Decimal>,
) -> Option<Decimal> {
    let reward = match atr.filter(|a| *a > Decimal::ZERO) {
        Some(atr_value) => atr_value.checked_mul(risk.take_profit_atr_multiplier)?,
        None => entry_price
            .checked_sub(stop_loss)?
            .abs()
            .checked_mul(risk.min_risk_reward_ratio)?,
    };

    if is_long {
        entry_price.checked_add(reward)
    } else {
        entry_price.checked_sub(reward)
    }
}

/// Lots risking `risk_amount` over `stop_distance`, floored to the lot step and
/// clamped to the symbol's bounds. `None` on decimal overflow.
pub fn calculate_lot_size(
    risk: &RiskSettings,
    symbol: &SymbolThresholds,
    risk_amount: Decimal,
    stop_distance: Decimal,
    risk_per_pip: Decimal,
) -> Option<Decimal> {
    if symbol.pip_size <= Decimal::ZERO || risk_per_pip <= Decimal::ZERO {
        return Some(risk.min_lot);
    }
    let stop_pips = stop_distance.checked_div(symbol.pip_size)?;
    if stop_pips <= Decimal::ZERO {
        return Some(risk.min_lot);
    }

    let raw = risk_amount.checked_div(stop_pips.checked_mul(risk_per_pip)?)?;
    let stepped = if risk.lot_step > Decimal::ZERO {
        raw.checked_div(risk.lot_step)?.floor().checked_mul(risk.lot_step)?
    } else {
        raw
    };

    Some(stepped.max(risk.min_lot).min(symbol.max_lot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingSettings;
    use rust_decimal_macros::dec;

    fn request(direction: Direction, atr: Option<Decimal>) -> SizingRequest {
        SizingRequest {
            symbol: "EURUSD".to_string(),
            direction,
            entry_price: dec!(1.1000),
            atr,
            account_balance: Some(dec!(10000)),
            risk_per_pip: Some(dec!(10)),
        }
    }

    #[test]
    fn test_long_trade_uses_atr_multiples() {
        let risk = RiskSettings::default();
        let symbol = SymbolThresholds::default();
        let plan = plan_trade(&risk, &symbol, &request(Direction::Buy, Some(dec!(0.0010)))).unwrap();

        assert_eq!(plan.stop_loss, dec!(1.0985));
        assert_eq!(plan.take_profit, dec!(1.1030));
        // $100 risk over 15 pips at $10/pip
        assert_eq!(plan.risk_amount, dec!(100));
        assert_eq!(plan.lot_size, dec!(0.66));
    }

    #[test]
    fn test_short_trade_mirrors_levels() {
        let risk = RiskSettings::default();
        let symbol = SymbolThresholds::default();
        let plan = plan_trade(&risk, &symbol, &request(Direction::Sell, Some(dec!(0.0010)))).unwrap();

        assert_eq!(plan.stop_loss, dec!(1.1015));
        assert_eq!(plan.take_profit, dec!(1.0970));
    }

    #[test]
    fn test_missing_atr_falls_back_to_percentage_stop() {
        let risk = RiskSettings::default();
        let stop = calculate_stop_loss(&risk, dec!(100), true, None).unwrap();
        assert_eq!(stop, dec!(99.5));
        let tp = calculate_take_profit(&risk, dec!(100), stop, true, None).unwrap();
        assert_eq!(tp, dec!(100.75));
    }

    #[test]
    fn test_hold_never_sizes() {
        let risk = RiskSettings::default();
        let symbol = SymbolThresholds::default();
        assert!(plan_trade(&risk, &symbol, &request(Direction::Hold, None)).is_err());
    }

    #[test]
    fn test_lot_size_is_clamped() {
        let risk = RiskSettings::default();
        let symbol = SymbolThresholds { max_lot: dec!(1), ..SymbolThresholds::default() };

        let huge = calculate_lot_size(&risk, &symbol, dec!(1000000), dec!(0.0010), dec!(10));
        assert_eq!(huge, Some(dec!(1)));
        let tiny = calculate_lot_size(&risk, &symbol, dec!(0.01), dec!(0.0010), dec!(10));
        assert_eq!(tiny, Some(risk.min_lot));
    }

    #[test]
    fn test_oversized_atr_is_declined_instead_of_overflowing() {
        let risk = RiskSettings::default();
        let symbol = SymbolThresholds::default();
        let atr = Decimal::from_i128_with_scale(60_000_000_000_000_000_000_000_000_000, 0);

        assert_eq!(calculate_stop_loss(&risk, dec!(1.1), true, Some(atr)), None);
        for direction in [Direction::Buy, Direction::Sell] {
            let result = plan_trade(&risk, &symbol, &request(direction, Some(atr)));
            assert!(result.unwrap_err().contains("out of range"));
        }
    }

    #[test]
    fn test_extreme_entry_and_balance_are_declined() {
        let risk = RiskSettings::default();
        let symbol = SymbolThresholds::default();

        let mut short = request(Direction::Sell, None);
        short.entry_price = Decimal::MAX;
        assert!(plan_trade(&risk, &symbol, &short).is_err());

        // Tiny stop distance against a maximal balance overflows the lot division.
        let mut rich = request(Direction::Buy, Some(dec!(0.0000000001)));
        rich.account_balance = Some(Decimal::MAX);
        rich.risk_per_pip = Some(dec!(0.0000000001));
        assert!(plan_trade(&risk, &symbol, &rich).is_err());
    }

    #[test]
    fn test_stop_below_zero_is_declined() {
        let risk = RiskSettings::default();
        let symbol = SymbolThresholds::default();
        let reason = plan_trade(&risk, &symbol, &request(Direction::Buy, Some(dec!(5)))).unwrap_err();
        assert!(reason.contains("stop loss"));
    }

    #[tokio::test]
    async fn test_manager_uses_symbol_pip_size() {
        let manager = RiskManager::new(TradingConfigManager::new(TradingSettings::default()));
        let plan = manager
            .plan_trade(&SizingRequest {
                symbol: "xauusd".to_string(),
                direction: Direction::Buy,
                entry_price: dec!(2000),
                atr: Some(dec!(2)),
                account_balance: Some(dec!(10000)),
                risk_per_pip: Some(dec!(1)),
            })
            .await
            .unwrap();

        // Stop 3.0 at pip 0.1 = 30 pips; $100 / (30 * $1) = 3.33 lots
        assert_eq!(plan.stop_loss, dec!(1997.0));
        assert_eq!(plan.lot_size, dec!(3.33));
    }
}
