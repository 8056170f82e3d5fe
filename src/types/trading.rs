use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyParseError;

/// Which side of the book a served classifier was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Buy,
    Sell,
    Combined,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Buy => "buy",
            ModelType::Sell => "sell",
            ModelType::Combined => "combined",
        }
    }
}

impl FromStr for ModelType {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(ModelType::Buy),
            "sell" => Ok(ModelType::Sell),
            "combined" => Ok(ModelType::Combined),
            other => Err(KeyParseError::ModelType(other.to_string())),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a prediction or a requested trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
            Direction::Hold => "hold",
        }
    }

    /// Model slot that serves this direction first.
    pub fn preferred_model(&self) -> ModelType {
        match self {
            Direction::Buy => ModelType::Buy,
            Direction::Sell => ModelType::Sell,
            Direction::Hold => ModelType::Combined,
        }
    }
}

impl FromStr for Direction {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(Direction::Buy),
            "sell" | "short" => Ok(Direction::Sell),
            "hold" | "none" | "combined" => Ok(Direction::Hold),
            other => Err(KeyParseError::Direction(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,   // 1 minute
    M5,   // 5 minutes
    M15,  // 15 minutes
    M30,  // 30 minutes
    H1,   // 1 hour
    H4,   // 4 hours
    D1,   // 1 day
    W1,   // 1 week
    MN1,  // 1 month
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "M1",
            TimeFrame::M5 => "M5",
            TimeFrame::M15 => "M15",
            TimeFrame::M30 => "M30",
            TimeFrame::H1 => "H1",
            TimeFrame::H4 => "H4",
            TimeFrame::D1 => "D1",
            TimeFrame::W1 => "W1",
            TimeFrame::MN1 => "MN1",
        }
    }

    /// Terminal-style name used in artifact file names, e.g. `PERIOD_M5`.
    pub fn period_name(&self) -> String {
        format!("PERIOD_{}", self.as_str())
    }
}

impl FromStr for TimeFrame {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("PERIOD_").unwrap_or(&upper);
        match bare {
            "M1" => Ok(TimeFrame::M1),
            "M5" => Ok(TimeFrame::M5),
            "M15" => Ok(TimeFrame::M15),
            "M30" => Ok(TimeFrame::M30),
            "H1" => Ok(TimeFrame::H1),
            "H4" => Ok(TimeFrame::H4),
            "D1" => Ok(TimeFrame::D1),
            "W1" => Ok(TimeFrame::W1),
            "MN1" | "MN" => Ok(TimeFrame::MN1),
            _ => Err(KeyParseError::TimeFrame(s.to_string())),
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized instrument symbol as used in model keys.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// Unique slot of one served classifier: `(type, symbol, timeframe)`.
///
/// Rendered as `buy_EURUSD_PERIOD_M5`, which is also the artifact file prefix
/// and the identifier the analytics service reports alerts against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelKey {
    pub model_type: ModelType,
    pub symbol: String,
    pub timeframe: TimeFrame,
}

impl ModelKey {
    pub fn new(model_type: ModelType, symbol: &str, timeframe: TimeFrame) -> Self {
        Self {
            model_type,
            symbol: normalize_symbol(symbol),
            timeframe,
        }
    }

    pub fn as_string(&self) -> String {
        format!(
            "{}_{}_{}",
            self.model_type.as_str(),
            self.symbol,
            self.timeframe.period_name()
        )
    }
}

impl FromStr for ModelKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_part, rest) = s
            .split_once('_')
            .ok_or_else(|| KeyParseError::Key(s.to_string()))?;
        let model_type = ModelType::from_str(type_part)?;

        // Symbols may themselves contain underscores, so peel the timeframe off the right.
        let (symbol, tf_part) = match rest.rsplit_once("_PERIOD_") {
            Some((symbol, tf)) => (symbol, tf),
            None => rest
                .rsplit_once('_')
                .ok_or_else(|| KeyParseError::Key(s.to_string()))?,
        };
        if symbol.is_empty() {
            return Err(KeyParseError::Key(s.to_string()));
        }

        Ok(ModelKey::new(model_type, symbol, TimeFrame::from_str(tf_part)?))
    }
}

impl TryFrom<String> for ModelKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ModelKey::from_str(&value)
    }
}

impl From<ModelKey> for String {
    fn from(key: ModelKey) -> Self {
        key.as_string()
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_key_round_trips_through_string() {
        let key = ModelKey::from_str("buy_EURUSD_PERIOD_M5").unwrap();
        assert_eq!(key.model_type, ModelType::Buy);
        assert_eq!(key.symbol, "EURUSD");
        assert_eq!(key.timeframe, TimeFrame::M5);
        assert_eq!(key.to_string(), "buy_EURUSD_PERIOD_M5");
    }

    #[test]
    fn test_model_key_accepts_short_timeframe_and_lowercase_symbol() {
        let key = ModelKey::from_str("combined_btcusd_H1").unwrap();
        assert_eq!(key, ModelKey::new(ModelType::Combined, "BTCUSD", TimeFrame::H1));
    }

    #[test]
    fn test_model_key_symbol_with_underscore() {
        let key = ModelKey::from_str("sell_US30_CASH_PERIOD_M15").unwrap();
        assert_eq!(key.symbol, "US30_CASH");
        assert_eq!(key.timeframe, TimeFrame::M15);
    }

    #[test]
    fn test_model_key_rejects_garbage() {
        assert!(ModelKey::from_str("hold_EURUSD_PERIOD_M5").is_err());
        assert!(ModelKey::from_str("buy").is_err());
        assert!(ModelKey::from_str("buy_EURUSD_PERIOD_M7").is_err());
    }

    #[test]
    fn test_model_key_serde_as_string() {
        let key = ModelKey::new(ModelType::Sell, "gbpusd", TimeFrame::H4);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"sell_GBPUSD_PERIOD_H4\"");
        let back: ModelKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!(TimeFrame::from_str("PERIOD_M5").unwrap(), TimeFrame::M5);
        assert_eq!(TimeFrame::from_str("h4").unwrap(), TimeFrame::H4);
        assert_eq!(TimeFrame::M30.period_name(), "PERIOD_M30");
        assert!(TimeFrame::from_str("X9").is_err());
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::from_str("BUY").unwrap(), Direction::Buy);
        assert_eq!(Direction::from_str("short").unwrap(), Direction::Sell);
        assert_eq!(Direction::Hold.preferred_model(), ModelType::Combined);
    }
}
