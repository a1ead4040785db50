use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bingx::Symbol;
use crate::config::ScannerConfig;
use crate::market_data::{Kline, MarketDataSource, OiObservation};
use crate::users::UserTradingConfig;

/// Percentage change from `past` to `now`; 0 when there is no base
pub fn pct(now: f64, past: f64) -> f64 {
    if past == 0.0 {
        0.0
    } else {
        (now - past) / past * 100.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalPeriod {
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "24h")]
    TwentyFourHours,
}

impl fmt::Display for SignalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalPeriod::FourHours => f.write_str("4h"),
            SignalPeriod::TwentyFourHours => f.write_str("24h"),
        }
    }
}

/// Growth of open interest and price over both lookback windows, computed
/// once per symbol per scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GrowthMetrics {
    pub oi_growth_4h: f64,
    pub oi_growth_24h: f64,
    pub price_growth_4h: f64,
    pub price_growth_24h: f64,
    pub price_now: f64,
    pub oi_now: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: Symbol,
    pub period: SignalPeriod,
    pub metrics: GrowthMetrics,
}

/// Why a symbol produced no metrics this scan. Neither case is an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricsOutcome {
    Ready(GrowthMetrics),
    InsufficientData,
    /// Open interest value under the liquidity floor
    BelowOiFloor(f64),
}

#[derive(Debug, Clone)]
pub struct SignalThresholds {
    pub oi_4h: f64,
    pub oi_24h: f64,
    pub min_oi_usdt: f64,
    pub window_4h: usize,
    pub window_24h: usize,
}

impl From<&ScannerConfig> for SignalThresholds {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            oi_4h: config.oi_4h_threshold,
            oi_24h: config.oi_24h_threshold,
            min_oi_usdt: config.min_oi_usdt,
            window_4h: config.window_4h,
            window_24h: config.window_24h,
        }
    }
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

pub struct SignalEvaluator {
    thresholds: SignalThresholds,
}

impl SignalEvaluator {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SignalThresholds {
        &self.thresholds
    }

    /// Fetches one long window per series; the short window is its tail
    pub async fn metrics(&self, market: &dyn MarketDataSource, symbol: &Symbol) -> Result<MetricsOutcome> {
        let oi = market
            .get_open_interest_history(symbol, self.thresholds.window_24h)
            .await?;
        if oi.len() < self.thresholds.window_24h {
            return Ok(MetricsOutcome::InsufficientData);
        }

        let klines = market.get_klines(symbol, self.thresholds.window_24h).await?;
        Ok(self.compute(&oi, &klines))
    }

    pub fn compute(&self, oi: &[OiObservation], klines: &[Kline]) -> MetricsOutcome {
        let long = self.thresholds.window_24h;
        let short = self.thresholds.window_4h.min(long);

        if short == 0 || oi.len() < long || klines.len() < long {
            return MetricsOutcome::InsufficientData;
        }

        let oi = &oi[oi.len() - long..];
        let klines = &klines[klines.len() - long..];

        let oi_now = oi[long - 1].value;
        if oi_now < self.thresholds.min_oi_usdt {
            return MetricsOutcome::BelowOiFloor(oi_now);
        }

        let oi_4h_ago = oi[long - short].value;
        let oi_24h_ago = oi[0].value;

        let price_now = klines[long - 1].close;
        let price_4h_ago = klines[long - short].close;
        let price_24h_ago = klines[0].close;

        MetricsOutcome::Ready(GrowthMetrics {
            oi_growth_4h: pct(oi_now, oi_4h_ago),
            oi_growth_24h: pct(oi_now, oi_24h_ago),
            price_growth_4h: pct(price_now, price_4h_ago),
            price_growth_24h: pct(price_now, price_24h_ago),
            price_now,
            oi_now,
        })
    }

    /// Applies one subscriber's preferences to shared metrics. The 4h window
    /// wins when both fire.
    pub fn evaluate(&self, symbol: &Symbol, metrics: &GrowthMetrics, user: &UserTradingConfig) -> Option<Signal> {
        let ratio = user.price_oi_ratio;

        let fires_4h = user.signals_4h_enabled
            && metrics.oi_growth_4h >= self.thresholds.oi_4h
            && metrics.price_growth_4h <= metrics.oi_growth_4h * ratio;
        let fires_24h = user.signals_24h_enabled
            && metrics.oi_growth_24h >= self.thresholds.oi_24h
            && metrics.price_growth_24h <= metrics.oi_growth_24h * ratio;

        let period = if fires_4h {
            SignalPeriod::FourHours
        } else if fires_24h {
            SignalPeriod::TwentyFourHours
        } else {
            return None;
        };

        Some(Signal {
            symbol: symbol.clone(),
            period,
            metrics: *metrics,
        })
    }
}

impl Default for SignalEvaluator {
    fn default() -> Self {
        Self::new(SignalThresholds::default())
    }
}
