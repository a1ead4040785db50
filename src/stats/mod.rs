use serde::Serialize;

use crate::execution::gateway::{ExchangeGateway, GatewayResult};

pub const REALIZED_PNL: &str = "REALIZED_PNL";

/// Account snapshot for the `stats` command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountStats {
    pub open_positions: usize,
    pub unrealized_pnl: f64,
    pub closed_trades_24h: usize,
    pub realized_pnl_24h: f64,
}

impl AccountStats {
    pub async fn collect(gateway: &dyn ExchangeGateway) -> GatewayResult<Self> {
        let positions = gateway.get_positions().await?;
        let open: Vec<_> = positions.iter().filter(|p| p.quantity.abs() > 0.0).collect();

        let history = gateway.get_trade_history(1).await?;
        let closed: Vec<_> = history.iter().filter(|e| e.income_type == REALIZED_PNL).collect();

        Ok(Self {
            open_positions: open.len(),
            unrealized_pnl: open.iter().map(|p| p.unrealized_pnl).sum(),
            closed_trades_24h: closed.len(),
            realized_pnl_24h: closed.iter().map(|e| e.income).sum(),
        })
    }

    pub fn to_message(&self) -> String {
        format!(
            "📊 <b>Statistics</b>\n\n\
             Open positions: {}\n\
             Unrealized PnL: {:.2} USDT\n\n\
             <b>Last 24h</b>\n\
             Closed trades: {}\n\
             Realized PnL: {:.2} USDT",
            self.open_positions, self.unrealized_pnl, self.closed_trades_24h, self.realized_pnl_24h
        )
    }
}
