use std::sync::Arc;
use tracing::{error, info, warn};

use super::gateway::*;
use super::intent::{PositionIntent, TP_RETRY_FACTOR};
use super::{AbortReason, ExecutionOutcome, FailureReason};
use crate::market_data::MarketDataSource;
use crate::risk::{VolumeGate, VolumeVerdict};
use crate::telegram::{self, Notifier};
use crate::strategy::Signal;
use crate::users::UserTradingConfig;

/// Mutable bookkeeping of one attempt. The intent itself is only ever
/// replaced, never edited, so the compensating close always has a complete
/// order plan whichever step failed.
struct Attempt {
    intent: PositionIntent,
    entry_submitted: bool,
    close_attempted: bool,
    detail: Option<String>,
}

enum EntryResult {
    Placed,
    Aborted(AbortReason),
}

/// Drives one signal through leverage, entry, verification, take-profits
/// and trailing stop on a single gateway, unwinding the position when a
/// step leaves it unprotected.
pub struct OrderSequencer {
    gateway: Arc<dyn ExchangeGateway>,
    market: Arc<dyn MarketDataSource>,
    notifier: Arc<dyn Notifier>,
    volume_gate: VolumeGate,
}

impl OrderSequencer {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        market: Arc<dyn MarketDataSource>,
        notifier: Arc<dyn Notifier>,
        volume_gate: VolumeGate,
    ) -> Self {
        Self {
            gateway,
            market,
            notifier,
            volume_gate,
        }
    }

    pub async fn execute(&self, user_id: &str, user: &UserTradingConfig, signal: &Signal) -> ExecutionOutcome {
        let intent = match PositionIntent::plan(signal.symbol.clone(), signal.metrics.price_now, user) {
            Ok(intent) => intent,
            Err(e) => {
                warn!("⛔ [{}] {} not planned: {}", user_id, signal.symbol, e);
                return ExecutionOutcome::Aborted(AbortReason::InvalidIntent);
            }
        };

        info!(
            "🎯 [{}] {} long | qty {} @ {} | SL {} | TP {:?} | {}x",
            user_id,
            intent.symbol,
            intent.quantity,
            intent.entry_price,
            intent.stop_price,
            intent.take_profit_prices,
            intent.leverage
        );

        let mut attempt = Attempt {
            intent,
            entry_submitted: false,
            close_attempted: false,
            detail: None,
        };

        let outcome = match self.run(&mut attempt, user).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ [{}] {} exchange error: {}", user_id, attempt.intent.symbol, e);
                attempt.detail = Some(e.to_string());

                if !attempt.entry_submitted {
                    match e {
                        GatewayError::SymbolUnavailable(_) => ExecutionOutcome::Aborted(AbortReason::SymbolUnavailable),
                        _ => ExecutionOutcome::Aborted(AbortReason::ExchangeError),
                    }
                } else {
                    if !attempt.close_attempted {
                        self.close_position(&mut attempt).await;
                    }
                    ExecutionOutcome::ClosedOnFailure(FailureReason::ExchangeError)
                }
            }
        };

        self.report(user_id, user, signal, &attempt, &outcome).await;
        outcome
    }

    async fn run(&self, attempt: &mut Attempt, user: &UserTradingConfig) -> GatewayResult<ExecutionOutcome> {
        let mode = self.set_leverage(&attempt.intent).await?;
        attempt.intent = attempt.intent.with_mode(mode);

        if user.volume_filter_enabled && !self.volume_passes(&attempt.intent, user.volume_multiplier).await {
            return Ok(ExecutionOutcome::Aborted(AbortReason::VolumeFilter));
        }

        // Set before the call: a transport failure may still have filled
        attempt.entry_submitted = true;
        if let EntryResult::Aborted(reason) = self.place_entry(attempt).await? {
            attempt.entry_submitted = false;
            return Ok(ExecutionOutcome::Aborted(reason));
        }

        if !self.verify_position(&attempt.intent).await? {
            self.close_position(attempt).await;
            return Ok(ExecutionOutcome::ClosedOnFailure(FailureReason::PositionNotOpened));
        }

        if !self.set_take_profits(&attempt.intent).await {
            self.close_position(attempt).await;
            return Ok(ExecutionOutcome::ClosedOnFailure(FailureReason::TpPlacementFailed));
        }

        if !self.verify_take_profits(&attempt.intent).await? {
            if let Err(e) = self.gateway.cancel_all_open_orders(&attempt.intent.symbol).await {
                warn!("Cancel of open orders on {} failed: {}", attempt.intent.symbol, e);
            }
            self.close_position(attempt).await;
            return Ok(ExecutionOutcome::ClosedOnFailure(FailureReason::TpCountMismatch));
        }

        if user.trailing_enabled {
            let order = attempt
                .intent
                .trailing_stop_order(user.trailing_activation_pct, user.trailing_rate_pct);
            if let Err(e) = self.gateway.set_trailing_stop(&order).await {
                warn!("⚠️  Trailing stop on {} failed, keeping position: {}", attempt.intent.symbol, e);
                attempt.detail = Some(e.to_string());
                return Ok(ExecutionOutcome::OpenedWithDegradedProtection);
            }
            info!("🪝 Trailing stop armed on {} from {}", attempt.intent.symbol, order.activation_price);
        }

        Ok(ExecutionOutcome::Opened)
    }

    /// Hedge convention first; on a venue rejection one retry as one-way.
    /// Returns the convention the rest of the attempt must use.
    async fn set_leverage(&self, intent: &PositionIntent) -> GatewayResult<PositionMode> {
        let hedge = PositionMode::Hedge;
        match self
            .gateway
            .set_leverage(&intent.symbol, hedge.long_side(), intent.leverage)
            .await
        {
            Ok(()) => Ok(hedge),
            Err(e @ GatewayError::SymbolUnavailable(_)) => Err(e),
            Err(e) if e.is_venue_rejection() => {
                warn!("Leverage on {} rejected in hedge mode ({}), trying one-way", intent.symbol, e);
                let one_way = PositionMode::OneWay;
                match self
                    .gateway
                    .set_leverage(&intent.symbol, one_way.long_side(), intent.leverage)
                    .await
                {
                    Ok(()) => Ok(one_way),
                    Err(e) if e.is_venue_rejection() => {
                        warn!("Leverage on {} left unchanged: {}", intent.symbol, e);
                        Ok(hedge)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn volume_passes(&self, intent: &PositionIntent, multiplier: f64) -> bool {
        match self.volume_gate.check(self.market.as_ref(), &intent.symbol, multiplier).await {
            Ok(VolumeVerdict::Pass) => true,
            Ok(verdict) => {
                info!("🔇 Volume filter blocked {}: {:?}", intent.symbol, verdict);
                false
            }
            Err(e) => {
                warn!("Volume filter on {} unavailable, skipping entry: {}", intent.symbol, e);
                false
            }
        }
    }

    async fn place_entry(&self, attempt: &mut Attempt) -> GatewayResult<EntryResult> {
        let first = self.gateway.place_market_order(&attempt.intent.entry_order()).await;

        let result = match first {
            Err(GatewayError::ModeMismatch(msg)) if attempt.intent.position_mode == PositionMode::Hedge => {
                warn!("Entry on {} hit position mode mismatch ({}), retrying one-way", attempt.intent.symbol, msg);
                attempt.intent = attempt.intent.with_mode(PositionMode::OneWay);
                self.gateway.place_market_order(&attempt.intent.entry_order()).await
            }
            other => other,
        };

        match result {
            Ok(ack) => {
                info!(
                    "📤 Entry placed on {} ({:?} mode) order {}",
                    attempt.intent.symbol,
                    attempt.intent.position_mode,
                    ack.order_id.as_deref().unwrap_or("-")
                );
                Ok(EntryResult::Placed)
            }
            Err(GatewayError::SymbolUnavailable(msg)) => {
                warn!("{} is not tradable: {}", attempt.intent.symbol, msg);
                Ok(EntryResult::Aborted(AbortReason::SymbolUnavailable))
            }
            Err(e) if e.is_venue_rejection() => {
                warn!("Entry on {} rejected: {}", attempt.intent.symbol, e);
                attempt.detail = Some(e.to_string());
                Ok(EntryResult::Aborted(AbortReason::EntryRejected))
            }
            Err(e) => Err(e),
        }
    }

    async fn verify_position(&self, intent: &PositionIntent) -> GatewayResult<bool> {
        let positions = self.gateway.get_positions().await?;
        let observed = positions
            .iter()
            .find(|p| p.symbol == intent.symbol)
            .map(|p| p.quantity.abs())
            .unwrap_or(0.0);

        if observed < intent.min_fill() {
            warn!(
                "Position on {} not confirmed: observed {} of requested {}",
                intent.symbol, observed, intent.quantity
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Places every level; on any failure withdraws what was placed and
    /// retries the whole split once at a slightly smaller size.
    async fn set_take_profits(&self, intent: &PositionIntent) -> bool {
        let reference_price = match self.gateway.get_mark_price(&intent.symbol).await {
            Ok(price) if price > 0.0 => price,
            Ok(_) => intent.entry_price,
            Err(e) => {
                warn!("Mark price for {} unavailable, using entry price: {}", intent.symbol, e);
                intent.entry_price
            }
        };

        let first = self.place_take_profit_split(intent, intent.quantity, reference_price).await;
        if first.iter().all(Result::is_ok) {
            return true;
        }

        warn!(
            "Take-profit split on {} had {} failing level(s), retrying at {}%",
            intent.symbol,
            first.iter().filter(|r| r.is_err()).count(),
            TP_RETRY_FACTOR * 100.0
        );
        for ack in first.iter().flatten() {
            if let Some(order_id) = &ack.order_id {
                if let Err(e) = self.gateway.cancel_order(&intent.symbol, order_id).await {
                    warn!("Withdrawing take-profit {} on {} failed: {}", order_id, intent.symbol, e);
                }
            }
        }

        let retry = self
            .place_take_profit_split(intent, intent.quantity * TP_RETRY_FACTOR, reference_price)
            .await;
        let ok = retry.iter().all(Result::is_ok);
        if !ok {
            for err in retry.iter().filter_map(|r| r.as_ref().err()) {
                error!("Take-profit on {} failed after retry: {}", intent.symbol, err);
            }
        }
        ok
    }

    async fn place_take_profit_split(
        &self,
        intent: &PositionIntent,
        total: f64,
        reference_price: f64,
    ) -> Vec<GatewayResult<OrderAck>> {
        let mut results = Vec::with_capacity(intent.take_profit_prices.len());
        for order in intent.take_profit_orders(total, reference_price) {
            let result = self.gateway.place_take_profit_order(&order).await;
            match &result {
                Ok(_) => info!("🎯 Take-profit on {} at {} for {}", order.symbol, order.stop_price, order.quantity),
                Err(e) => warn!("Take-profit on {} at {} failed: {}", order.symbol, order.stop_price, e),
            }
            results.push(result);
        }
        results
    }

    async fn verify_take_profits(&self, intent: &PositionIntent) -> GatewayResult<bool> {
        let orders = self.gateway.get_open_orders(&intent.symbol).await?;
        let live = orders.iter().filter(|o| o.is_take_profit()).count();
        let expected = intent.take_profit_prices.len();

        if live != expected {
            warn!("{} live take-profits on {}, expected {}", live, intent.symbol, expected);
            return Ok(false);
        }
        Ok(true)
    }

    /// Single reduce-only attempt; a failure is logged, never retried
    async fn close_position(&self, attempt: &mut Attempt) {
        attempt.close_attempted = true;
        let order = attempt.intent.close_order();

        match self.gateway.place_market_order(&order).await {
            Ok(_) => info!("🔒 Closed {} {} ({:?} mode)", order.symbol, order.quantity, order.mode),
            Err(e) => {
                error!("🚨 Closing {} failed, position may be unprotected: {}", order.symbol, e);
                let note = format!("close failed: {}", e);
                attempt.detail = Some(match attempt.detail.take() {
                    Some(detail) => format!("{}; {}", detail, note),
                    None => note,
                });
            }
        }
    }

    async fn report(
        &self,
        user_id: &str,
        user: &UserTradingConfig,
        signal: &Signal,
        attempt: &Attempt,
        outcome: &ExecutionOutcome,
    ) {
        let message = match outcome {
            ExecutionOutcome::Opened => {
                info!("✅ [{}] Trade opened on {}", user_id, attempt.intent.symbol);
                telegram::position_opened(&attempt.intent, signal, user.trailing_enabled)
            }
            ExecutionOutcome::OpenedWithDegradedProtection => telegram::degraded_protection(
                &attempt.intent,
                attempt.detail.as_deref().unwrap_or("unknown"),
            ),
            ExecutionOutcome::ClosedOnFailure(_) => {
                telegram::closed_on_failure(&attempt.intent, outcome, attempt.detail.as_deref())
            }
            ExecutionOutcome::Aborted(reason) => {
                info!("⛔ [{}] {} aborted: {}", user_id, attempt.intent.symbol, reason);
                return;
            }
        };

        if let Err(e) = self.notifier.send(user_id, &message).await {
            warn!("Notification to {} failed: {}", user_id, e);
        }
    }
}
