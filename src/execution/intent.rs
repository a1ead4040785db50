use thiserror::Error;

use super::gateway::{MarketOrder, OrderSide, PositionMode, TakeProfitOrder, TrailingStopOrder};
use crate::bingx::Symbol;
use crate::users::UserTradingConfig;

/// Share of the requested size that must be observed after entry
pub const POSITION_FILL_TOLERANCE: f64 = 0.9;
/// Size factor for the single take-profit retry
pub const TP_RETRY_FACTOR: f64 = 0.99;

/// Digits after the decimal point in the shortest representation of `value`
pub fn decimal_places(value: f64) -> u32 {
    let repr = format!("{}", value);
    match repr.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

/// Quantity decimals for an instrument quoted with `price_precision`
/// decimals. Finely quoted (cheap) contracts trade in whole lots.
pub fn quantity_decimals(price_precision: u32) -> u32 {
    match price_precision {
        p if p >= 3 => 0,
        2 => 2,
        1 => 3,
        _ => 4,
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Truncates toward zero so split sizes never add up past the total
pub fn round_down(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    ((value * factor) + 1e-9).floor() / factor
}

/// Per-level take-profit size for `total` split across `levels`
pub fn split_quantity(total: f64, levels: usize, decimals: u32) -> f64 {
    if levels == 0 {
        return 0.0;
    }
    round_down(total / levels as f64, decimals)
}

#[derive(Debug, Error, PartialEq)]
pub enum IntentError {
    #[error("price must be positive, got {0}")]
    InvalidPrice(f64),
    #[error("quantity rounds to zero ({margin} USDT x{leverage} at {price})")]
    QuantityTooSmall { margin: f64, leverage: u32, price: f64 },
    #[error("no take-profit levels configured")]
    NoTakeProfits,
    #[error("{quantity} does not split across {levels} take-profit levels")]
    TakeProfitTooSmall { quantity: f64, levels: usize },
}

/// Order plan for one execution attempt. Immutable; a switch of position
/// convention yields a new intent via `with_mode`.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionIntent {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    pub take_profit_prices: Vec<f64>,
    pub leverage: u32,
    pub position_mode: PositionMode,
    pub price_precision: u32,
}

impl PositionIntent {
    pub fn plan(symbol: Symbol, entry_price: f64, user: &UserTradingConfig) -> Result<Self, IntentError> {
        if !(entry_price > 0.0) || !entry_price.is_finite() {
            return Err(IntentError::InvalidPrice(entry_price));
        }
        if user.take_profit_pcts.is_empty() {
            return Err(IntentError::NoTakeProfits);
        }

        let precision = decimal_places(entry_price);
        let raw_quantity = user.margin_usdt * f64::from(user.leverage) / entry_price;
        let quantity = round_to(raw_quantity, quantity_decimals(precision));
        if quantity <= 0.0 {
            return Err(IntentError::QuantityTooSmall {
                margin: user.margin_usdt,
                leverage: user.leverage,
                price: entry_price,
            });
        }

        // the retry size is the smaller of the two splits
        let levels = user.take_profit_pcts.len();
        let retry_split = split_quantity(quantity * TP_RETRY_FACTOR, levels, quantity_decimals(precision));
        if retry_split <= 0.0 {
            return Err(IntentError::TakeProfitTooSmall { quantity, levels });
        }

        let stop_price = round_to(entry_price * (1.0 - user.stop_loss_pct / 100.0), precision);
        let take_profit_prices = user
            .take_profit_pcts
            .iter()
            .map(|pct| round_to(entry_price * (1.0 + pct / 100.0), precision))
            .collect();

        Ok(Self {
            symbol,
            side: OrderSide::Buy,
            entry_price,
            quantity,
            stop_price,
            take_profit_prices,
            leverage: user.leverage,
            position_mode: PositionMode::Hedge,
            price_precision: precision,
        })
    }

    pub fn with_mode(&self, mode: PositionMode) -> Self {
        Self {
            position_mode: mode,
            ..self.clone()
        }
    }

    pub fn entry_order(&self) -> MarketOrder {
        MarketOrder::open_long(self.symbol.clone(), self.quantity, self.stop_price, self.position_mode)
    }

    /// Reduce-only unwind of the full requested size
    pub fn close_order(&self) -> MarketOrder {
        MarketOrder::close_long(self.symbol.clone(), self.quantity, self.position_mode)
    }

    /// Smallest position size accepted as "opened"
    pub fn min_fill(&self) -> f64 {
        self.quantity * POSITION_FILL_TOLERANCE
    }

    /// One take-profit per level for `total`, rounded by the precision of
    /// `reference_price` (the mark price when available).
    pub fn take_profit_orders(&self, total: f64, reference_price: f64) -> Vec<TakeProfitOrder> {
        let decimals = quantity_decimals(decimal_places(reference_price));
        let per_level = split_quantity(total, self.take_profit_prices.len(), decimals);

        self.take_profit_prices
            .iter()
            .map(|price| TakeProfitOrder {
                symbol: self.symbol.clone(),
                side: OrderSide::Sell,
                position_side: self.position_mode.long_side(),
                quantity: per_level,
                stop_price: *price,
            })
            .collect()
    }

    pub fn trailing_stop_order(&self, activation_pct: f64, rate_pct: f64) -> TrailingStopOrder {
        TrailingStopOrder {
            symbol: self.symbol.clone(),
            side: OrderSide::Sell,
            position_side: self.position_mode.long_side(),
            quantity: self.quantity,
            activation_price: round_to(self.entry_price * (1.0 + activation_pct / 100.0), self.price_precision),
            price_rate: round_to(rate_pct / 100.0, 3),
        }
    }
}
