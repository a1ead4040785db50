use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Tradable instrument in raw form (`BTCUSDT`).
///
/// BingX names swap contracts `BTC-USDT`; `venue()` produces that form and
/// must be used for every exchange call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized: String = raw
            .as_ref()
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '/')
            .collect();
        Self(normalized.to_uppercase())
    }

    pub fn from_venue(venue: &str) -> Self {
        Self::new(venue)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn venue(&self) -> String {
        match self.0.strip_suffix("USDT") {
            Some(base) if !base.is_empty() => format!("{}-USDT", base),
            _ => self.0.clone(),
        }
    }

    /// Base asset, used in alert headers (`$BTC`)
    pub fn base(&self) -> &str {
        self.0.strip_suffix("USDT").unwrap_or(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Symbol {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Envelope every BingX swap v2 endpoint answers with
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerTime {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionData {
    pub symbol: String,
    #[serde(rename = "positionAmt", deserialize_with = "de_f64_lenient")]
    pub position_amt: f64,
    #[serde(rename = "unrealizedProfit", default, deserialize_with = "de_f64_lenient")]
    pub unrealized_profit: f64,
    #[serde(rename = "positionSide", default)]
    pub position_side: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrdersData {
    #[serde(default)]
    pub orders: Vec<OrderData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderData {
    #[serde(rename = "orderId", deserialize_with = "de_string_lenient")]
    pub order_id: String,
    #[serde(rename = "type")]
    pub order_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacedOrderData {
    pub order: Option<PlacedOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacedOrder {
    #[serde(rename = "orderId", deserialize_with = "de_string_lenient")]
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomeData {
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "incomeType")]
    pub income_type: String,
    #[serde(deserialize_with = "de_f64_lenient")]
    pub income: f64,
    #[serde(deserialize_with = "de_i64_lenient")]
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PremiumIndexData {
    #[serde(rename = "markPrice", deserialize_with = "de_f64_lenient")]
    pub mark_price: f64,
}

/// BingX mixes quoted and bare numbers across endpoints
fn de_f64_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("number out of range")),
        serde_json::Value::String(s) if s.is_empty() => Ok(0.0),
        serde_json::Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        serde_json::Value::Null => Ok(0.0),
        other => Err(serde::de::Error::custom(format!("expected number, got {}", other))),
    }
}

fn de_i64_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("expected integer")),
        serde_json::Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("expected integer, got {}", other))),
    }
}

fn de_string_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected id, got {}", other))),
    }
}
