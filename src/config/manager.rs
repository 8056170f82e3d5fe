use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use serde::Serialize;
use tracing::info;

use super::runtime::{RiskSettings, SymbolThresholds, TradingSettings};

#[derive(Debug, Clone, Serialize)]
pub enum ConfigChangeEvent {
    SymbolUpdated { symbol: String, thresholds: SymbolThresholds },
    DefaultUpdated(SymbolThresholds),
    RiskUpdated(RiskSettings),
    FullConfigUpdated,
}

impl ConfigChangeEvent {
    /// Dotted name of the section that changed
    pub fn setting(&self) -> String {
        match self {
            ConfigChangeEvent::SymbolUpdated { symbol, .. } => format!("trading.symbols.{}", symbol),
            ConfigChangeEvent::DefaultUpdated(_) => "trading.default".to_string(),
            ConfigChangeEvent::RiskUpdated(_) => "trading.risk".to_string(),
            ConfigChangeEvent::FullConfigUpdated => "trading".to_string(),
        }
    }
}

/// Live trading policy shared by the prediction engine and the HTTP layer.
pub struct TradingConfigManager {
    config: Arc<RwLock<TradingSettings>>,
    change_tx: broadcast::Sender<ConfigChangeEvent>,
}

impl TradingConfigManager {
    pub fn new(initial: TradingSettings) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            config: Arc::new(RwLock::new(initial.normalized())),
            change_tx,
        }
    }

    pub async fn get_config(&self) -> TradingSettings {
        self.config.read().await.clone()
    }

    pub async fn thresholds_for(&self, symbol: &str) -> SymbolThresholds {
        self.config.read().await.thresholds_for(symbol).clone()
    }

    pub async fn update_symbol(&self, symbol: &str, thresholds: SymbolThresholds) -> Result<(), String> {
        let symbol = crate::types::normalize_symbol(symbol);
        let mut config = self.config.write().await;
        let old = config.symbols.insert(symbol.clone(), thresholds.clone());

        if let Err(errors) = config.validate() {
            match old {
                Some(previous) => config.symbols.insert(symbol, previous),
                None => config.symbols.remove(&symbol),
            };
            return Err(errors.join(", "));
        }

        info!("Thresholds for {} updated: min_confidence={:.2}", symbol, thresholds.min_confidence);
        let _ = self.change_tx.send(ConfigChangeEvent::SymbolUpdated { symbol, thresholds });
        Ok(())
    }

    pub async fn update_default(&self, thresholds: SymbolThresholds) -> Result<(), String> {
        let mut config = self.config.write().await;
        let old = std::mem::replace(&mut config.default, thresholds.clone());

        if let Err(errors) = config.validate() {
            config.default = old;
            return Err(errors.join(", "));
        }

        info!("Default thresholds updated: min_confidence={:.2}", thresholds.min_confidence);
        let _ = self.change_tx.send(ConfigChangeEvent::DefaultUpdated(thresholds));
        Ok(())
    }

    pub async fn update_risk(&self, settings: RiskSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let old_risk = std::mem::replace(&mut config.risk, settings.clone());

        if let Err(errors) = config.validate() {
            config.risk = old_risk;
            return Err(errors.join(", "));
        }

        info!("Risk settings updated: risk_per_trade={}%, sl_atr={}, tp_atr={}",
              settings.risk_per_trade_pct, settings.stop_loss_atr_multiplier, settings.take_profit_atr_multiplier);
        let _ = self.change_tx.send(ConfigChangeEvent::RiskUpdated(settings));
        Ok(())
    }

    pub async fn update_full(&self, new_config: TradingSettings) -> Result<(), String> {
        let new_config = new_config.normalized();
        if let Err(errors) = new_config.validate() {
            return Err(errors.join(", "));
        }

        let mut config = self.config.write().await;
        *config = new_config;

        info!("Trading configuration replaced");
        let _ = self.change_tx.send(ConfigChangeEvent::FullConfigUpdated);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_tx.subscribe()
    }
}

impl Clone for TradingConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            change_tx: self.change_tx.clone(),
        }
    }
}
