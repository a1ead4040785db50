#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use oi_divergence_bot::bingx::Symbol;
use oi_divergence_bot::execution::gateway::*;
use oi_divergence_bot::market_data::{Kline, MarketDataSource, OiObservation};
use oi_divergence_bot::strategy::{GrowthMetrics, Signal, SignalPeriod};
use oi_divergence_bot::telegram::{Notifier, NotifyError};
use oi_divergence_bot::users::UserTradingConfig;

pub const ENTRY_PRICE: f64 = 0.5123;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SetLeverage,
    MarketOrder,
    GetPositions,
    TakeProfit,
    GetOpenOrders,
    Cancel,
    CancelAll,
    TrailingStop,
    MarkPrice,
    TradeHistory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetLeverage(Symbol, PositionSide, u32),
    MarketOrder(MarketOrder),
    GetPositions,
    TakeProfit(TakeProfitOrder),
    GetOpenOrders,
    Cancel(String),
    CancelAll,
    TrailingStop(TrailingStopOrder),
    MarkPrice,
    TradeHistory(u32),
}

pub fn rejected(msg: &str) -> GatewayError {
    GatewayError::Rejected {
        code: 80001,
        msg: msg.to_string(),
    }
}

/// Stands in for a network failure; not a venue rejection
pub fn broken_pipe() -> GatewayError {
    GatewayError::Decode("connection reset by peer".to_string())
}

#[derive(Default)]
struct Book {
    positions: HashMap<Symbol, f64>,
    live: Vec<OpenOrder>,
    next_id: u64,
}

/// In-memory venue. Every call is recorded; scripted faults are consumed
/// in order per operation, anything unscripted behaves like a healthy venue.
pub struct MockGateway {
    calls: Mutex<Vec<Call>>,
    faults: Mutex<HashMap<Op, VecDeque<Option<GatewayError>>>>,
    book: Mutex<Book>,
    pub fill_ratio: Mutex<f64>,
    pub hidden_take_profits: AtomicUsize,
    pub mark_price: Mutex<f64>,
    pub income: Mutex<Vec<IncomeEvent>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            book: Mutex::new(Book::default()),
            fill_ratio: Mutex::new(1.0),
            hidden_take_profits: AtomicUsize::new(0),
            mark_price: Mutex::new(ENTRY_PRICE),
            income: Mutex::new(Vec::new()),
        })
    }

    /// Next unscripted call of `op` fails with `err`
    pub fn fail(&self, op: Op, err: GatewayError) {
        self.faults.lock().entry(op).or_default().push_back(Some(err));
    }

    /// Next call of `op` succeeds; used to place a fault later in the sequence
    pub fn pass(&self, op: Op) {
        self.faults.lock().entry(op).or_default().push_back(None);
    }

    pub fn set_position(&self, symbol: &Symbol, quantity: f64) {
        self.book.lock().positions.insert(symbol.clone(), quantity);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn market_orders(&self) -> Vec<MarketOrder> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::MarketOrder(o) => Some(o.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn take_profits(&self) -> Vec<TakeProfitOrder> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::TakeProfit(o) => Some(o.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn leverage_sides(&self) -> Vec<PositionSide> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::SetLeverage(_, side, _) => Some(*side),
                _ => None,
            })
            .collect()
    }

    pub fn live_take_profits(&self) -> usize {
        self.book.lock().live.iter().filter(|o| o.is_take_profit()).count()
    }

    pub fn position(&self, symbol: &Symbol) -> f64 {
        self.book.lock().positions.get(symbol).copied().unwrap_or(0.0)
    }

    fn enter(&self, op: Op, call: Call) -> GatewayResult<()> {
        self.calls.lock().push(call);
        match self.faults.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn add_order(&self, order_type: &str) -> OrderAck {
        let mut book = self.book.lock();
        book.next_id += 1;
        let order_id = book.next_id.to_string();
        book.live.push(OpenOrder {
            order_id: order_id.clone(),
            order_type: order_type.to_string(),
        });
        OrderAck {
            order_id: Some(order_id),
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn set_leverage(&self, symbol: &Symbol, side: PositionSide, leverage: u32) -> GatewayResult<()> {
        self.enter(Op::SetLeverage, Call::SetLeverage(symbol.clone(), side, leverage))
    }

    async fn place_market_order(&self, order: &MarketOrder) -> GatewayResult<OrderAck> {
        self.enter(Op::MarketOrder, Call::MarketOrder(order.clone()))?;

        let fill = *self.fill_ratio.lock();
        let mut book = self.book.lock();
        let held = book.positions.entry(order.symbol.clone()).or_insert(0.0);
        if order.reduce_only {
            *held = (*held - order.quantity).max(0.0);
        } else {
            *held += order.quantity * fill;
        }
        book.next_id += 1;
        Ok(OrderAck {
            order_id: Some(book.next_id.to_string()),
        })
    }

    async fn get_positions(&self) -> GatewayResult<Vec<Position>> {
        self.enter(Op::GetPositions, Call::GetPositions)?;
        Ok(self
            .book
            .lock()
            .positions
            .iter()
            .filter(|(_, qty)| **qty > 0.0)
            .map(|(symbol, qty)| Position {
                symbol: symbol.clone(),
                quantity: *qty,
                unrealized_pnl: 0.0,
            })
            .collect())
    }

    async fn place_take_profit_order(&self, order: &TakeProfitOrder) -> GatewayResult<OrderAck> {
        self.enter(Op::TakeProfit, Call::TakeProfit(order.clone()))?;
        Ok(self.add_order(TAKE_PROFIT_MARKET))
    }

    async fn get_open_orders(&self, _symbol: &Symbol) -> GatewayResult<Vec<OpenOrder>> {
        self.enter(Op::GetOpenOrders, Call::GetOpenOrders)?;
        let hidden = self.hidden_take_profits.load(Ordering::SeqCst);
        let live = self.book.lock().live.clone();
        Ok(live.into_iter().skip(hidden).collect())
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> GatewayResult<()> {
        self.enter(Op::Cancel, Call::Cancel(order_id.to_string()))?;
        self.book.lock().live.retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn cancel_all_open_orders(&self, _symbol: &Symbol) -> GatewayResult<usize> {
        self.enter(Op::CancelAll, Call::CancelAll)?;
        let mut book = self.book.lock();
        let cancelled = book.live.len();
        book.live.clear();
        Ok(cancelled)
    }

    async fn set_trailing_stop(&self, order: &TrailingStopOrder) -> GatewayResult<OrderAck> {
        self.enter(Op::TrailingStop, Call::TrailingStop(order.clone()))?;
        Ok(self.add_order("TRAILING_TP_SL"))
    }

    async fn get_mark_price(&self, _symbol: &Symbol) -> GatewayResult<f64> {
        self.enter(Op::MarkPrice, Call::MarkPrice)?;
        Ok(*self.mark_price.lock())
    }

    async fn get_trade_history(&self, since_days: u32) -> GatewayResult<Vec<IncomeEvent>> {
        self.enter(Op::TradeHistory, Call::TradeHistory(since_days))?;
        Ok(self.income.lock().clone())
    }
}

/// Hands the same gateway to every subscriber
pub struct MockProvider {
    pub gateway: Arc<MockGateway>,
    pub requests: AtomicUsize,
}

impl MockProvider {
    pub fn new(gateway: Arc<MockGateway>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            requests: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GatewayProvider for MockProvider {
    async fn gateway_for(&self, _user: &UserTradingConfig) -> Result<Arc<dyn ExchangeGateway>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let gateway: Arc<dyn ExchangeGateway> = self.gateway.clone();
        Ok(gateway)
    }
}

/// Serves fixed series; requests return the newest `limit` points
pub struct MockMarketData {
    pub symbols: Vec<Symbol>,
    pub oi: Vec<OiObservation>,
    pub klines: Vec<Kline>,
}

impl MockMarketData {
    pub fn from_series(symbols: &[&str], oi_values: &[f64], closes: &[f64], volumes: &[f64]) -> Arc<Self> {
        let oi = oi_values
            .iter()
            .enumerate()
            .map(|(i, value)| OiObservation {
                timestamp: i as i64 * 300_000,
                value: *value,
            })
            .collect();
        let klines = closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (close, volume))| Kline {
                open_time: i as i64 * 300_000,
                close: *close,
                volume: *volume,
            })
            .collect();

        Arc::new(Self {
            symbols: symbols.iter().map(|s| Symbol::new(*s)).collect(),
            oi,
            klines,
        })
    }

    /// 288 points, OI up 20% on the last point, price flat at `ENTRY_PRICE`
    pub fn diverging(symbols: &[&str]) -> Arc<Self> {
        let mut oi = vec![1_000_000.0; 288];
        oi[287] = 1_200_000.0;
        Self::from_series(symbols, &oi, &[ENTRY_PRICE; 288], &[100.0; 288])
    }

    /// Flat volume, so any multiplier above 1 fails the volume filter
    pub fn quiet() -> Arc<Self> {
        Self::from_series(&[], &[], &[ENTRY_PRICE; 100], &[100.0; 100])
    }
}

fn tail<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items[items.len().saturating_sub(limit)..].to_vec()
}

#[async_trait]
impl MarketDataSource for MockMarketData {
    async fn list_perpetual_usdt_symbols(&self) -> Result<Vec<Symbol>> {
        Ok(self.symbols.clone())
    }

    async fn get_open_interest_history(&self, _symbol: &Symbol, limit: usize) -> Result<Vec<OiObservation>> {
        Ok(tail(&self.oi, limit))
    }

    async fn get_klines(&self, _symbol: &Symbol, limit: usize) -> Result<Vec<Kline>> {
        Ok(tail(&self.klines, limit))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub blocked: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn block(&self, chat_id: &str) {
        self.blocked.lock().insert(chat_id.to_string());
    }

    pub fn messages_for(&self, chat_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(chat, _)| chat == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        if self.blocked.lock().contains(chat_id) {
            return Err(NotifyError::Blocked);
        }
        self.sent.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

pub fn trader() -> UserTradingConfig {
    UserTradingConfig {
        trading_enabled: true,
        api_key: "key".to_string(),
        api_secret: "secret".to_string(),
        leverage: 10,
        margin_usdt: 50.0,
        take_profit_pcts: vec![4.0, 6.0],
        trailing_enabled: false,
        volume_filter_enabled: false,
        ..UserTradingConfig::default()
    }
}

pub fn signal(symbol: &str) -> Signal {
    Signal {
        symbol: Symbol::new(symbol),
        period: SignalPeriod::FourHours,
        metrics: GrowthMetrics {
            oi_growth_4h: 20.0,
            oi_growth_24h: 20.0,
            price_growth_4h: 0.0,
            price_growth_24h: 0.0,
            price_now: ENTRY_PRICE,
            oi_now: 1_200_000.0,
        },
    }
}

pub fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("oi-bot-it-{}-{}-{}.json", name, std::process::id(), nanos))
}
