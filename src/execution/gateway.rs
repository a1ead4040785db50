use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::bingx::Symbol;
use crate::users::UserTradingConfig;

/// Venue code for "position side does not match the account's position mode"
pub const CODE_MODE_MISMATCH: i64 = 109400;
/// Venue code for "symbol does not exist / not tradable"
pub const CODE_SYMBOL_UNAVAILABLE: i64 = 109425;

/// Outcome of a single exchange call, discriminated so the sequencer can
/// apply the recovery prescribed for each case.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("position mode mismatch: {0}")]
    ModeMismatch(String),

    #[error("symbol not tradable: {0}")]
    SymbolUnavailable(String),

    #[error("rejected by venue (code {code}): {msg}")]
    Rejected { code: i64, msg: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Maps a venue response code; `None` for success
    pub fn from_code(code: i64, msg: &str) -> Option<Self> {
        match code {
            0 => None,
            CODE_MODE_MISMATCH => Some(Self::ModeMismatch(msg.to_string())),
            CODE_SYMBOL_UNAVAILABLE => Some(Self::SymbolUnavailable(msg.to_string())),
            code => Some(Self::Rejected { code, msg: msg.to_string() }),
        }
    }

    /// Business rejection as opposed to a network or decoding failure
    pub fn is_venue_rejection(&self) -> bool {
        matches!(
            self,
            Self::ModeMismatch(_) | Self::SymbolUnavailable(_) | Self::Rejected { .. }
        )
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Both => "BOTH",
        }
    }
}

/// Account convention an execution attempt runs under.
///
/// Hedge mode tracks long and short separately (`positionSide=LONG`),
/// one-way mode nets them (`positionSide=BOTH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    Hedge,
    OneWay,
}

impl PositionMode {
    /// Position side a long entry, its protection and its close are filed under
    pub fn long_side(&self) -> PositionSide {
        match self {
            PositionMode::Hedge => PositionSide::Long,
            PositionMode::OneWay => PositionSide::Both,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reduce_only: bool,
    pub mode: PositionMode,
}

impl MarketOrder {
    /// Market buy opening a long with the stop-loss attached as a native leg
    pub fn open_long(symbol: Symbol, quantity: f64, stop_loss: f64, mode: PositionMode) -> Self {
        Self {
            symbol,
            side: OrderSide::Buy,
            quantity,
            stop_loss: Some(stop_loss),
            take_profit: None,
            reduce_only: false,
            mode,
        }
    }

    /// Reduce-only market sell unwinding a long
    pub fn close_long(symbol: Symbol, quantity: f64, mode: PositionMode) -> Self {
        Self {
            symbol,
            side: OrderSide::Sell,
            quantity,
            stop_loss: None,
            take_profit: None,
            reduce_only: true,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TakeProfitOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub stop_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStopOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub activation_price: f64,
    /// Callback rate as a fraction (0.005 = 0.5%)
    pub price_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderAck {
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: f64,
    pub unrealized_pnl: f64,
}

pub const TAKE_PROFIT_MARKET: &str = "TAKE_PROFIT_MARKET";

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub order_type: String,
}

impl OpenOrder {
    pub fn is_take_profit(&self) -> bool {
        self.order_type == TAKE_PROFIT_MARKET
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomeEvent {
    pub symbol: String,
    pub income_type: String,
    pub income: f64,
    pub time_ms: i64,
}

/// Authenticated access to the trading venue for one credential set
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn set_leverage(
        &self,
        symbol: &Symbol,
        side: PositionSide,
        leverage: u32,
    ) -> GatewayResult<()>;

    async fn place_market_order(&self, order: &MarketOrder) -> GatewayResult<OrderAck>;

    async fn get_positions(&self) -> GatewayResult<Vec<Position>>;

    async fn place_take_profit_order(&self, order: &TakeProfitOrder) -> GatewayResult<OrderAck>;

    async fn get_open_orders(&self, symbol: &Symbol) -> GatewayResult<Vec<OpenOrder>>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> GatewayResult<()>;

    /// Cancels every open order on `symbol`, returning how many were cancelled
    async fn cancel_all_open_orders(&self, symbol: &Symbol) -> GatewayResult<usize>;

    async fn set_trailing_stop(&self, order: &TrailingStopOrder) -> GatewayResult<OrderAck>;

    async fn get_mark_price(&self, symbol: &Symbol) -> GatewayResult<f64>;

    async fn get_trade_history(&self, since_days: u32) -> GatewayResult<Vec<IncomeEvent>>;
}

/// Resolves the gateway bound to a subscriber's credentials and network
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    async fn gateway_for(&self, user: &UserTradingConfig) -> anyhow::Result<Arc<dyn ExchangeGateway>>;
}
