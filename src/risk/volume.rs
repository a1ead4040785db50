use anyhow::Result;

use crate::bingx::Symbol;
use crate::market_data::MarketDataSource;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeVerdict {
    Pass,
    Fail { latest: f64, required: f64 },
    /// Fewer candles than the configured period; treated as a failure
    InsufficientData,
}

impl VolumeVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, VolumeVerdict::Pass)
    }
}

/// Pre-trade filter: latest candle volume against the trailing average
#[derive(Debug, Clone)]
pub struct VolumeGate {
    period: usize,
}

impl VolumeGate {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub async fn check(&self, market: &dyn MarketDataSource, symbol: &Symbol, multiplier: f64) -> Result<VolumeVerdict> {
        let klines = market.get_klines(symbol, self.period).await?;
        let volumes: Vec<f64> = klines.iter().map(|k| k.volume).collect();
        Ok(self.evaluate(&volumes, multiplier))
    }

    pub fn evaluate(&self, volumes: &[f64], multiplier: f64) -> VolumeVerdict {
        if self.period < 2 || volumes.len() < self.period {
            return VolumeVerdict::InsufficientData;
        }

        let window = &volumes[volumes.len() - self.period..];
        let (latest, previous) = match window.split_last() {
            Some((latest, previous)) => (*latest, previous),
            None => return VolumeVerdict::InsufficientData,
        };

        let average = previous.iter().sum::<f64>() / previous.len() as f64;
        let required = average * multiplier;

        if latest >= required {
            VolumeVerdict::Pass
        } else {
            VolumeVerdict::Fail { latest, required }
        }
    }
}

impl Default for VolumeGate {
    fn default() -> Self {
        Self::new(60)
    }
}
