use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::auth::{encoded_query, BingxAuth, Params};
use super::types::*;
use crate::execution::gateway::*;

const SERVER_TIME_PATH: &str = "/openApi/swap/v2/server/time";
const LEVERAGE_PATH: &str = "/openApi/swap/v2/trade/leverage";
const ORDER_PATH: &str = "/openApi/swap/v2/trade/order";
const OPEN_ORDERS_PATH: &str = "/openApi/swap/v2/trade/openOrders";
const POSITIONS_PATH: &str = "/openApi/swap/v2/user/positions";
const INCOME_PATH: &str = "/openApi/swap/v2/user/income";
const PREMIUM_INDEX_PATH: &str = "/openApi/swap/v2/quote/premiumIndex";

const INCOME_PAGE_LIMIT: usize = 100;
const CANCEL_PACING: Duration = Duration::from_millis(300);

/// Signed REST client for BingX perpetual swaps (v2)
pub struct BingxClient {
    client: Client,
    auth: BingxAuth,
    rest_url: String,
    recv_window: u64,
}

impl BingxClient {
    pub fn new(
        rest_url: String,
        auth: BingxAuth,
        timeout: Duration,
        recv_window: u64,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            auth,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            recv_window,
        })
    }

    /// Builds the client and caches the server-clock offset for its credentials
    pub async fn connect(
        rest_url: String,
        auth: BingxAuth,
        timeout: Duration,
        recv_window: u64,
    ) -> anyhow::Result<Self> {
        let client = Self::new(rest_url, auth, timeout, recv_window)?;
        client.sync_server_time().await;
        Ok(client)
    }

    pub fn auth(&self) -> &BingxAuth {
        &self.auth
    }

    /// Measures serverTime - localTime; falls back to 0 if the venue is unreachable
    pub async fn sync_server_time(&self) -> i64 {
        let offset = match self.public_request::<ServerTime>(SERVER_TIME_PATH, Params::new()).await {
            Ok(time) => time.server_time - BingxAuth::local_timestamp(),
            Err(e) => {
                warn!("⚠️  Server time unavailable, using local clock: {}", e);
                0
            }
        };
        self.auth.set_time_offset(offset);
        debug!("Server clock offset: {}ms", offset);
        offset
    }

    async fn signed_request(&self, method: Method, path: &str, mut params: Params) -> GatewayResult<Value> {
        let timestamp = self.auth.timestamp();
        let (_, signature) = self.auth.sign_params(&mut params, timestamp);
        let url = format!(
            "{}{}?{}&signature={}",
            self.rest_url,
            path,
            encoded_query(&params),
            signature
        );

        let response = self
            .client
            .request(method, &url)
            .header("X-BX-APIKEY", self.auth.get_api_key())
            .send()
            .await?
            .error_for_status()?;

        let envelope: ApiResponse<Value> = response.json().await?;
        if let Some(err) = GatewayError::from_code(envelope.code, &envelope.msg) {
            return Err(err);
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }

    async fn public_request<T: DeserializeOwned>(&self, path: &str, params: Params) -> GatewayResult<T> {
        let url = format!("{}{}", self.rest_url, path);

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        let envelope: ApiResponse<Value> = response.json().await?;
        if let Some(err) = GatewayError::from_code(envelope.code, &envelope.msg) {
            return Err(err);
        }

        decode(envelope.data.unwrap_or(Value::Null))
    }

    async fn submit_order(&self, params: Params) -> GatewayResult<OrderAck> {
        let data = self.signed_request(Method::POST, ORDER_PATH, params).await?;
        let order_id = serde_json::from_value::<PlacedOrderData>(data)
            .ok()
            .and_then(|d| d.order)
            .map(|o| o.order_id);
        Ok(OrderAck { order_id })
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> GatewayResult<T> {
    serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn params<const N: usize>(pairs: [(&str, String); N]) -> Params {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn conditional_leg(order_type: &str, price: f64) -> String {
    json!({
        "type": order_type,
        "stopPrice": price,
        "price": price,
        "workingType": "MARK_PRICE",
    })
    .to_string()
}

#[async_trait]
impl ExchangeGateway for BingxClient {
    async fn set_leverage(&self, symbol: &Symbol, side: PositionSide, leverage: u32) -> GatewayResult<()> {
        let params = params([
            ("symbol", symbol.venue()),
            ("side", side.as_str().to_string()),
            ("leverage", leverage.to_string()),
        ]);
        self.signed_request(Method::POST, LEVERAGE_PATH, params).await?;
        Ok(())
    }

    async fn place_market_order(&self, order: &MarketOrder) -> GatewayResult<OrderAck> {
        let mut params = params([
            ("symbol", order.symbol.venue()),
            ("side", order.side.as_str().to_string()),
            ("positionSide", order.mode.long_side().as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", order.quantity.to_string()),
            ("recvWindow", self.recv_window.to_string()),
        ]);

        // Hedge mode rejects reduceOnly; SELL against LONG already reduces
        if order.reduce_only && order.mode == PositionMode::OneWay {
            params.insert("reduceOnly".to_string(), "true".to_string());
        }
        if let Some(stop) = order.stop_loss {
            params.insert("stopLoss".to_string(), conditional_leg("STOP_MARKET", stop));
        }
        if let Some(tp) = order.take_profit {
            params.insert("takeProfit".to_string(), conditional_leg(TAKE_PROFIT_MARKET, tp));
        }

        self.submit_order(params).await
    }

    async fn get_positions(&self) -> GatewayResult<Vec<Position>> {
        let data = self.signed_request(Method::GET, POSITIONS_PATH, Params::new()).await?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        let positions: Vec<PositionData> = decode(data)?;
        Ok(positions
            .into_iter()
            .map(|p| Position {
                symbol: Symbol::from_venue(&p.symbol),
                quantity: p.position_amt,
                unrealized_pnl: p.unrealized_profit,
            })
            .collect())
    }

    async fn place_take_profit_order(&self, order: &TakeProfitOrder) -> GatewayResult<OrderAck> {
        let params = params([
            ("symbol", order.symbol.venue()),
            ("side", order.side.as_str().to_string()),
            ("positionSide", order.position_side.as_str().to_string()),
            ("type", TAKE_PROFIT_MARKET.to_string()),
            ("stopPrice", order.stop_price.to_string()),
            ("quantity", order.quantity.to_string()),
            ("workingType", "MARK_PRICE".to_string()),
        ]);
        self.submit_order(params).await
    }

    async fn get_open_orders(&self, symbol: &Symbol) -> GatewayResult<Vec<OpenOrder>> {
        let data = self
            .signed_request(Method::GET, OPEN_ORDERS_PATH, params([("symbol", symbol.venue())]))
            .await?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        let orders: OpenOrdersData = decode(data)?;
        Ok(orders
            .orders
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id,
                order_type: o.order_type,
            })
            .collect())
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> GatewayResult<()> {
        let params = params([("symbol", symbol.venue()), ("orderId", order_id.to_string())]);
        self.signed_request(Method::DELETE, ORDER_PATH, params).await?;
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &Symbol) -> GatewayResult<usize> {
        let orders = self.get_open_orders(symbol).await?;
        let mut cancelled = 0;

        for order in orders {
            match self.cancel_order(symbol, &order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!("Cancel {} on {} failed: {}", order.order_id, symbol, e),
            }
            tokio::time::sleep(CANCEL_PACING).await;
        }

        Ok(cancelled)
    }

    async fn set_trailing_stop(&self, order: &TrailingStopOrder) -> GatewayResult<OrderAck> {
        let params = params([
            ("symbol", order.symbol.venue()),
            ("side", order.side.as_str().to_string()),
            ("positionSide", order.position_side.as_str().to_string()),
            ("type", "TRAILING_TP_SL".to_string()),
            ("quantity", order.quantity.to_string()),
            ("activationPrice", order.activation_price.to_string()),
            ("priceRate", order.price_rate.to_string()),
            ("workingType", "CONTRACT_PRICE".to_string()),
            ("recvWindow", self.recv_window.to_string()),
        ]);
        self.submit_order(params).await
    }

    async fn get_mark_price(&self, symbol: &Symbol) -> GatewayResult<f64> {
        let data: Value = self
            .public_request(PREMIUM_INDEX_PATH, params([("symbol", symbol.venue())]))
            .await?;
        let item = match data {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };
        let index: PremiumIndexData = decode(item)?;
        Ok(index.mark_price)
    }

    async fn get_trade_history(&self, since_days: u32) -> GatewayResult<Vec<IncomeEvent>> {
        let end_time = self.auth.timestamp();
        let mut start_time = end_time - i64::from(since_days) * 24 * 3600 * 1000;
        let mut events = Vec::new();

        loop {
            let page_params = params([
                ("startTime", start_time.to_string()),
                ("endTime", end_time.to_string()),
                ("limit", INCOME_PAGE_LIMIT.to_string()),
            ]);
            let data = self.signed_request(Method::GET, INCOME_PATH, page_params).await?;
            if data.is_null() {
                break;
            }
            let page: Vec<IncomeData> = decode(data)?;
            let page_len = page.len();
            let Some(last_time) = page.last().map(|e| e.time) else {
                break;
            };

            events.extend(page.into_iter().map(|e| IncomeEvent {
                symbol: e.symbol,
                income_type: e.income_type,
                income: e.income,
                time_ms: e.time,
            }));

            if page_len < INCOME_PAGE_LIMIT {
                break;
            }
            start_time = last_time + 1;
        }

        Ok(events)
    }
}
