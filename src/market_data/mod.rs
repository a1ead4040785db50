use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::bingx::Symbol;
use crate::config::MarketDataConfig;

const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";
const OI_HIST_PATH: &str = "/futures/data/openInterestHist";
const KLINES_PATH: &str = "/fapi/v1/klines";
const PERIOD: &str = "5m";

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Open interest value (quote currency) at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OiObservation {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub close: f64,
    pub volume: f64,
}

/// Public, unauthenticated market reads
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn list_perpetual_usdt_symbols(&self) -> Result<Vec<Symbol>>;

    /// Oldest first, at most `limit` 5-minute points
    async fn get_open_interest_history(&self, symbol: &Symbol, limit: usize) -> Result<Vec<OiObservation>>;

    /// Oldest first, at most `limit` 5-minute candles
    async fn get_klines(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Kline>>;
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    contract_type: String,
    quote_asset: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OiHistEntry {
    sum_open_interest_value: String,
    timestamp: i64,
}

/// Binance USDT-M futures public API
#[derive(Clone)]
pub struct BinanceMarketData {
    client: Client,
    base_url: String,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl BinanceMarketData {
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {}", path))?
            .error_for_status()
            .with_context(|| format!("GET {}", path))?;

        response
            .json()
            .await
            .with_context(|| format!("decoding {}", path))
    }
}

fn parse_kline(row: &Value) -> Result<Kline> {
    let field = |idx: usize| -> Result<f64> {
        let raw = row.get(idx).with_context(|| format!("kline missing field {}", idx))?;
        match raw {
            Value::String(s) => s.parse().with_context(|| format!("kline field {}", idx)),
            Value::Number(n) => n.as_f64().context("kline number out of range"),
            _ => anyhow::bail!("kline field {} has unexpected type", idx),
        }
    };

    Ok(Kline {
        open_time: row.get(0).and_then(Value::as_i64).unwrap_or_default(),
        close: field(4)?,
        volume: field(5)?,
    })
}

#[async_trait]
impl MarketDataSource for BinanceMarketData {
    async fn list_perpetual_usdt_symbols(&self) -> Result<Vec<Symbol>> {
        let info: ExchangeInfo = self.get(EXCHANGE_INFO_PATH, &[]).await?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.contract_type == "PERPETUAL" && s.quote_asset == "USDT" && s.status == "TRADING")
            .map(|s| Symbol::new(s.symbol))
            .collect())
    }

    async fn get_open_interest_history(&self, symbol: &Symbol, limit: usize) -> Result<Vec<OiObservation>> {
        let entries: Vec<OiHistEntry> = self
            .get(
                OI_HIST_PATH,
                &[
                    ("symbol", symbol.to_string()),
                    ("period", PERIOD.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        entries
            .into_iter()
            .map(|e| {
                Ok(OiObservation {
                    timestamp: e.timestamp,
                    value: e
                        .sum_open_interest_value
                        .parse()
                        .context("sumOpenInterestValue")?,
                })
            })
            .collect()
    }

    async fn get_klines(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Kline>> {
        let rows: Vec<Value> = self
            .get(
                KLINES_PATH,
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", PERIOD.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        rows.iter().map(parse_kline).collect()
    }
}
