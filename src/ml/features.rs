use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Input width of the current model generation.
pub const CANONICAL_WIDTH: usize = 28;

/// Column carried by the previous generation's 29-entry feature lists.
pub const DEPRECATED_FEATURE: &str = "tick_volume";

/// Ordered feature list the current generation is trained on: base indicators,
/// time context, then engineered buckets.
pub const CANONICAL_FEATURES: [&str; CANONICAL_WIDTH] = [
    // base
    "rsi",
    "stoch_main",
    "stoch_signal",
    "macd_main",
    "macd_signal",
    "bb_upper",
    "bb_lower",
    "williams_r",
    "cci",
    "momentum",
    "volume_ratio",
    "price_change",
    "volatility",
    "force_index",
    "spread",
    // time
    "session_hour",
    "is_news_time",
    "day_of_week",
    "month",
    // engineered
    "london_session",
    "ny_session",
    "asian_session",
    "session_overlap",
    "rsi_regime",
    "stoch_regime",
    "volatility_regime",
    "hour",
    "weekday",
];

pub fn canonical_schema() -> Vec<String> {
    CANONICAL_FEATURES.iter().map(|s| s.to_string()).collect()
}

/// What load-time reconciliation did to a feature-name list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Reconciliation {
    Unchanged,
    DroppedDeprecated,
    ReplacedWithCanonical { original_len: usize },
}

/// Bring a stored feature-name list to the canonical width.
///
/// A 29-entry list carrying the deprecated column loses that column; any other
/// list whose length is not 28 is replaced by the canonical list.
pub fn reconcile_schema(names: Vec<String>) -> (Vec<String>, Reconciliation) {
    if names.len() == CANONICAL_WIDTH {
        return (names, Reconciliation::Unchanged);
    }

    if names.len() == CANONICAL_WIDTH + 1 && names.iter().any(|n| n == DEPRECATED_FEATURE) {
        let stripped: Vec<String> = names
            .into_iter()
            .filter(|n| n != DEPRECATED_FEATURE)
            .collect();
        if stripped.len() == CANONICAL_WIDTH {
            return (stripped, Reconciliation::DroppedDeprecated);
        }
        // Deprecated column listed more than once.
        return (
            canonical_schema(),
            Reconciliation::ReplacedWithCanonical { original_len: CANONICAL_WIDTH + 1 },
        );
    }

    let original_len = names.len();
    (canonical_schema(), Reconciliation::ReplacedWithCanonical { original_len })
}

/// Caller-supplied feature map after type coercion.
///
/// Numbers pass through, booleans become 0/1, numeric strings are parsed.
/// Anything else (null, arrays, objects, non-finite values) counts as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    values: BTreeMap<String, f64>,
}

impl RawFeatures {
    pub fn from_json_map(map: &serde_json::Map<String, Value>) -> Self {
        let values = map
            .iter()
            .filter_map(|(k, v)| coerce_value(v).map(|x| (k.trim().to_ascii_lowercase(), x)))
            .collect();
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

#[cfg(test)]
impl RawFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        if value.is_finite() {
            self.values.insert(name.to_ascii_lowercase(), value);
        }
        self
    }
}

fn coerce_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(1.0),
            "false" => Some(0.0),
            other => other.parse::<f64>().ok(),
        },
        _ => None,
    };
    number.filter(|x| x.is_finite())
}

/// Primitive inputs the engineered features are derived from.
#[derive(Debug, Clone, Copy, Default)]
struct PrimitiveInputs {
    rsi: Option<f64>,
    stoch_main: Option<f64>,
    volatility: Option<f64>,
    hour: Option<f64>,
    weekday: Option<f64>,
    month: Option<f64>,
}

impl PrimitiveInputs {
    fn from_raw(raw: &RawFeatures) -> Self {
        let stamp = raw
            .get("timestamp")
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0));

        Self {
            rsi: raw.get("rsi"),
            stoch_main: raw.get("stoch_main"),
            volatility: raw.get("volatility"),
            hour: raw
                .get("session_hour")
                .or_else(|| raw.get("hour"))
                .or_else(|| stamp.map(|t| t.hour() as f64)),
            weekday: raw
                .get("day_of_week")
                .or_else(|| raw.get("weekday"))
                .or_else(|| stamp.map(|t| t.weekday().num_days_from_monday() as f64)),
            month: raw.get("month").or_else(|| stamp.map(|t| t.month() as f64)),
        }
    }

    fn hour_or_default(&self) -> f64 {
        self.hour.map(|h| h.rem_euclid(24.0)).unwrap_or(DEFAULT_HOUR)
    }
}

const DEFAULT_HOUR: f64 = 12.0;
const DEFAULT_WEEKDAY: f64 = 2.0;
const DEFAULT_MONTH: f64 = 6.0;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const STOCH_OVERSOLD: f64 = 20.0;
const STOCH_OVERBOUGHT: f64 = 80.0;
const VOLATILITY_LOW: f64 = 0.001;
const VOLATILITY_HIGH: f64 = 0.002;

fn flag(condition: bool) -> f64 {
    if condition { 1.0 } else { 0.0 }
}

/// 0 below `low`, 2 above `high`, 1 in between.
fn bucket(value: f64, low: f64, high: f64) -> f64 {
    if value < low {
        0.0
    } else if value > high {
        2.0
    } else {
        1.0
    }
}

/// Value a schema column takes when the caller did not send it directly.
fn derive_or_default(name: &str, p: &PrimitiveInputs) -> f64 {
    match name {
        "rsi" | "stoch_main" | "stoch_signal" => 50.0,
        "macd_main" | "macd_signal" => 0.0,
        "bb_upper" | "bb_lower" => 0.0,
        "williams_r" => -50.0,
        "cci" => 0.0,
        "momentum" => 100.0,
        "volume_ratio" => 1.0,
        "price_change" => 0.0,
        "volatility" => VOLATILITY_LOW,
        "force_index" | "spread" => 0.0,
        "is_news_time" => 0.0,

        "session_hour" | "hour" => p.hour_or_default(),
        "day_of_week" | "weekday" => p.weekday.unwrap_or(DEFAULT_WEEKDAY),
        "month" => p.month.unwrap_or(DEFAULT_MONTH),

        "london_session" => {
            let h = p.hour_or_default();
            flag((8.0..17.0).contains(&h))
        }
        "ny_session" => {
            let h = p.hour_or_default();
            flag((13.0..22.0).contains(&h))
        }
        "asian_session" => {
            let h = p.hour_or_default();
            flag(h < 9.0 || h >= 23.0)
        }
        "session_overlap" => {
            let h = p.hour_or_default();
            flag((13.0..17.0).contains(&h))
        }

        "rsi_regime" => p
            .rsi
            .map(|v| bucket(v, RSI_OVERSOLD, RSI_OVERBOUGHT))
            .unwrap_or(1.0),
        "stoch_regime" => p
            .stoch_main
            .map(|v| bucket(v, STOCH_OVERSOLD, STOCH_OVERBOUGHT))
            .unwrap_or(1.0),
        "volatility_regime" => p
            .volatility
            .map(|v| {
                if v < VOLATILITY_LOW {
                    0.0
                } else if v < VOLATILITY_HIGH {
                    1.0
                } else {
                    2.0
                }
            })
            .unwrap_or(1.0),

        _ => 0.0,
    }
}

/// Map a raw feature map onto the ordered vector a schema expects.
///
/// Never fails: each column takes the caller's value when present, otherwise a
/// value derived from the primitives, otherwise its neutral default. Columns the
/// schema does not mention are ignored. The output length always equals the
/// schema length.
pub fn normalize(raw: &RawFeatures, schema: &[String]) -> Vec<f64> {
    let primitives = PrimitiveInputs::from_raw(raw);
    schema
        .iter()
        .map(|name| {
            let key = name.to_ascii_lowercase();
            raw.get(&key)
                .unwrap_or_else(|| derive_or_default(&key, &primitives))
        })
        .collect()
}
