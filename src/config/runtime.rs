use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::normalize_symbol;

/// Trading policy knobs that may be changed while the server is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    /// Fallback record used when a symbol has no entry of its own
    pub default: SymbolThresholds,
    pub symbols: BTreeMap<String, SymbolThresholds>,
    pub risk: RiskSettings,
}

impl Default for TradingSettings {
    fn default() -> Self {
        let mut symbols = BTreeMap::new();
        symbols.insert(
            "BTCUSD".to_string(),
            SymbolThresholds {
                min_confidence: 0.65,
                pip_size: dec!(1),
                max_lot: dec!(1),
            },
        );
        symbols.insert(
            "XAUUSD".to_string(),
            SymbolThresholds {
                min_confidence: 0.62,
                pip_size: dec!(0.1),
                max_lot: dec!(5),
            },
        );
        symbols.insert(
            "USDJPY".to_string(),
            SymbolThresholds {
                min_confidence: 0.60,
                pip_size: dec!(0.01),
                max_lot: dec!(10),
            },
        );

        Self {
            default: SymbolThresholds::default(),
            symbols,
            risk: RiskSettings::default(),
        }
    }
}

impl TradingSettings {
    /// Per-symbol record, falling back to `default` when the symbol is not listed.
    pub fn thresholds_for(&self, symbol: &str) -> &SymbolThresholds {
        let symbol = normalize_symbol(symbol);
        self.symbols
            .get(&symbol)
            .or_else(|| {
                // Layered config lowercases map keys.
                self.symbols
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&symbol))
                    .map(|(_, v)| v)
            })
            .unwrap_or(&self.default)
    }

    /// Upper-case every symbol key so lookups are stable after layered loading.
    pub fn normalized(mut self) -> Self {
        self.symbols = self
            .symbols
            .into_iter()
            .map(|(k, v)| (normalize_symbol(&k), v))
            .collect();
        self
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.default.validate("default") {
            errors.append(&mut e);
        }
        for (symbol, thresholds) in &self.symbols {
            if let Err(mut e) = thresholds.validate(symbol) {
                errors.append(&mut e);
            }
        }

        let risk = &self.risk;
        if risk.risk_per_trade_pct <= Decimal::ZERO || risk.risk_per_trade_pct > dec!(10) {
            errors.push("risk_per_trade_pct must be between 0 and 10%".to_string());
        }
        if risk.stop_loss_atr_multiplier <= Decimal::ZERO {
            errors.push("stop_loss_atr_multiplier must be > 0".to_string());
        }
        if risk.take_profit_atr_multiplier <= Decimal::ZERO {
            errors.push("take_profit_atr_multiplier must be > 0".to_string());
        }
        if risk.default_stop_loss_pct <= Decimal::ZERO {
            errors.push("default_stop_loss_pct must be > 0".to_string());
        }
        if risk.min_risk_reward_ratio < Decimal::ONE {
            errors.push("min_risk_reward_ratio must be >= 1".to_string());
        }
        if risk.min_lot <= Decimal::ZERO || risk.lot_step <= Decimal::ZERO {
            errors.push("min_lot and lot_step must be > 0".to_string());
        }
        if risk.default_risk_per_pip <= Decimal::ZERO {
            errors.push("default_risk_per_pip must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolThresholds {
    /// Minimum model confidence before a trade is suggested
    pub min_confidence: f64,
    /// Price increment of one pip
    pub pip_size: Decimal,
    pub max_lot: Decimal,
}

impl Default for SymbolThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.60,
            pip_size: dec!(0.0001),
            max_lot: dec!(10),
        }
    }
}

impl SymbolThresholds {
    fn validate(&self, label: &str) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if !(0.5..=1.0).contains(&self.min_confidence) {
            errors.push(format!("{}: min_confidence must be between 0.5 and 1", label));
        }
        if self.pip_size <= Decimal::ZERO {
            errors.push(format!("{}: pip_size must be > 0", label));
        }
        if self.max_lot <= Decimal::ZERO {
            errors.push(format!("{}: max_lot must be > 0", label));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub risk_per_trade_pct: Decimal,
    pub stop_loss_atr_multiplier: Decimal,
    pub take_profit_atr_multiplier: Decimal,
    /// Stop distance as % of entry when the request carries no ATR
    pub default_stop_loss_pct: Decimal,
    pub min_risk_reward_ratio: Decimal,
    pub min_lot: Decimal,
    pub lot_step: Decimal,
    /// Account currency value of one pip for one lot, when the caller omits it
    pub default_risk_per_pip: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: dec!(1),
            stop_loss_atr_multiplier: dec!(1.5),
            take_profit_atr_multiplier: dec!(3.0),
            default_stop_loss_pct: dec!(0.5),
            min_risk_reward_ratio: dec!(1.5),
            min_lot: dec!(0.01),
            lot_step: dec!(0.01),
            default_risk_per_pip: dec!(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(TradingSettings::default().validate().is_ok());
    }

    #[test]
    fn test_thresholds_fall_back_to_default() {
        let settings = TradingSettings::default();
        assert_eq!(settings.thresholds_for("btcusd").min_confidence, 0.65);
        assert_eq!(settings.thresholds_for("EURUSD"), &settings.default);
    }

    #[test]
    fn test_lowercased_keys_still_match() {
        let mut settings = TradingSettings::default();
        settings.symbols.insert("gbpusd".to_string(), SymbolThresholds {
            min_confidence: 0.7,
            ..SymbolThresholds::default()
        });
        assert_eq!(settings.thresholds_for("GBPUSD").min_confidence, 0.7);
        let normalized = settings.normalized();
        assert!(normalized.symbols.contains_key("GBPUSD"));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let mut settings = TradingSettings::default();
        settings.default.min_confidence = 0.3;
        settings.risk.min_lot = Decimal::ZERO;
        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
