mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use oi_divergence_bot::bingx::Symbol;
use oi_divergence_bot::execution::gateway::{MarketOrder, PositionMode, PositionSide};
use oi_divergence_bot::execution::{AbortReason, ExecutionOutcome, FailureReason, GatewayError, OrderSequencer};
use oi_divergence_bot::market_data::MarketDataSource;
use oi_divergence_bot::risk::VolumeGate;
use oi_divergence_bot::users::UserTradingConfig;

struct Harness {
    gateway: Arc<MockGateway>,
    notifier: Arc<RecordingNotifier>,
    sequencer: OrderSequencer,
}

fn harness_with_market(market: Arc<dyn MarketDataSource>) -> Harness {
    let gateway = MockGateway::new();
    let notifier = RecordingNotifier::new();
    let sequencer = OrderSequencer::new(gateway.clone(), market, notifier.clone(), VolumeGate::new(60));
    Harness {
        gateway,
        notifier,
        sequencer,
    }
}

fn harness() -> Harness {
    harness_with_market(MockMarketData::quiet())
}

impl Harness {
    async fn run(&self, user: &UserTradingConfig) -> ExecutionOutcome {
        self.sequencer.execute("42", user, &signal("XYZUSDT")).await
    }

    fn closes(&self) -> Vec<MarketOrder> {
        self.gateway
            .market_orders()
            .into_iter()
            .filter(|o| o.reduce_only)
            .collect()
    }
}

#[tokio::test]
async fn test_happy_path_opens_with_all_take_profits() {
    let h = harness();
    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Opened);

    let orders = h.gateway.market_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, 976.0);
    assert_eq!(orders[0].stop_loss, Some(0.5021));
    assert_eq!(orders[0].mode, PositionMode::Hedge);

    let tps = h.gateway.take_profits();
    assert_eq!(tps.len(), 2);
    assert_eq!(tps[0].stop_price, 0.5328);
    assert_eq!(tps[1].stop_price, 0.543);
    assert!(tps.iter().all(|tp| tp.quantity == 488.0));
    assert!(tps.iter().all(|tp| tp.position_side == PositionSide::Long));

    assert_eq!(h.gateway.count(|c| matches!(c, Call::TrailingStop(_))), 0);
    assert!(h.closes().is_empty());

    let messages = h.notifier.messages_for("42");
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Position opened"));
}

#[tokio::test]
async fn test_missing_position_is_closed() {
    let h = harness();
    *h.gateway.fill_ratio.lock() = 0.0;

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::ClosedOnFailure(FailureReason::PositionNotOpened));
    let closes = h.closes();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].quantity, 976.0);
    assert!(h.gateway.take_profits().is_empty());
    assert!(h.notifier.messages_for("42")[0].contains("position_not_opened"));
}

#[tokio::test]
async fn test_partial_fill_below_tolerance_is_closed() {
    let h = harness();
    *h.gateway.fill_ratio.lock() = 0.85;

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::ClosedOnFailure(FailureReason::PositionNotOpened));
}

#[tokio::test]
async fn test_take_profit_retry_replaces_first_split() {
    let h = harness();
    h.gateway.pass(Op::TakeProfit);
    h.gateway.fail(Op::TakeProfit, rejected("insufficient position"));

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Opened);

    let tps = h.gateway.take_profits();
    assert_eq!(tps.len(), 4);
    // 976 x 0.99 = 966.24, split in two and truncated to whole lots
    assert!(tps[2..].iter().all(|tp| tp.quantity == 483.0));

    // the first-attempt level that did land was withdrawn before the retry
    assert_eq!(h.gateway.count(|c| matches!(c, Call::Cancel(_))), 1);
    assert_eq!(h.gateway.live_take_profits(), 2);
    assert!(h.closes().is_empty());
}

#[tokio::test]
async fn test_take_profit_retry_failure_closes() {
    let h = harness();
    h.gateway.fail(Op::TakeProfit, rejected("first"));
    h.gateway.pass(Op::TakeProfit);
    h.gateway.fail(Op::TakeProfit, rejected("retry"));

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::ClosedOnFailure(FailureReason::TpPlacementFailed));
    assert_eq!(h.closes().len(), 1);
}

#[tokio::test]
async fn test_take_profit_count_mismatch_cancels_and_closes() {
    let h = harness();
    h.gateway.hidden_take_profits.store(1, Ordering::SeqCst);

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::ClosedOnFailure(FailureReason::TpCountMismatch));
    assert_eq!(h.gateway.count(|c| matches!(c, Call::CancelAll)), 1);
    assert_eq!(h.gateway.live_take_profits(), 0);

    let closes = h.closes();
    assert_eq!(closes.len(), 1);
    assert_eq!(h.gateway.position(&Symbol::new("XYZUSDT")), 0.0);
}

#[tokio::test]
async fn test_leverage_falls_back_to_one_way_once() {
    let h = harness();
    h.gateway.fail(Op::SetLeverage, GatewayError::ModeMismatch("account is in one-way mode".into()));

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Opened);
    assert_eq!(h.gateway.leverage_sides(), vec![PositionSide::Long, PositionSide::Both]);
    assert!(h.gateway.market_orders().iter().all(|o| o.mode == PositionMode::OneWay));
    assert!(h
        .gateway
        .take_profits()
        .iter()
        .all(|tp| tp.position_side == PositionSide::Both));
}

#[tokio::test]
async fn test_leverage_rejected_twice_continues_in_hedge() {
    let h = harness();
    h.gateway.fail(Op::SetLeverage, rejected("first"));
    h.gateway.fail(Op::SetLeverage, rejected("second"));

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Opened);
    assert_eq!(h.gateway.leverage_sides().len(), 2);
    assert_eq!(h.gateway.market_orders()[0].mode, PositionMode::Hedge);
}

#[tokio::test]
async fn test_entry_mode_mismatch_retries_one_way() {
    let h = harness();
    h.gateway.fail(
        Op::MarketOrder,
        GatewayError::ModeMismatch("position side mismatch".into()),
    );

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Opened);
    let modes: Vec<_> = h.gateway.market_orders().iter().map(|o| o.mode).collect();
    assert_eq!(modes, vec![PositionMode::Hedge, PositionMode::OneWay]);
    assert!(h
        .gateway
        .take_profits()
        .iter()
        .all(|tp| tp.position_side == PositionSide::Both));
}

#[tokio::test]
async fn test_unavailable_symbol_aborts_without_orders() {
    let h = harness();
    h.gateway.fail(
        Op::SetLeverage,
        GatewayError::SymbolUnavailable("delisted".into()),
    );

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Aborted(AbortReason::SymbolUnavailable));
    assert!(h.gateway.market_orders().is_empty());
    assert!(h.notifier.messages_for("42").is_empty());
}

#[tokio::test]
async fn test_rejected_entry_aborts_without_close() {
    let h = harness();
    h.gateway.fail(Op::MarketOrder, rejected("insufficient margin"));

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Aborted(AbortReason::EntryRejected));
    assert_eq!(h.gateway.market_orders().len(), 1);
    assert!(h.closes().is_empty());
}

#[tokio::test]
async fn test_trailing_failure_keeps_position() {
    let h = harness();
    h.gateway.fail(Op::TrailingStop, rejected("activation price too close"));
    let user = UserTradingConfig {
        trailing_enabled: true,
        ..trader()
    };

    let outcome = h.run(&user).await;

    assert_eq!(outcome, ExecutionOutcome::OpenedWithDegradedProtection);
    assert!(h.closes().is_empty());
    assert!(h.notifier.messages_for("42")[0].contains("trailing stop not set"));
}

#[tokio::test]
async fn test_trailing_stop_is_armed() {
    let h = harness();
    let user = UserTradingConfig {
        trailing_enabled: true,
        ..trader()
    };

    let outcome = h.run(&user).await;

    assert_eq!(outcome, ExecutionOutcome::Opened);
    let trailing: Vec<_> = h
        .gateway
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::TrailingStop(order) => Some(order),
            _ => None,
        })
        .collect();
    assert_eq!(trailing.len(), 1);
    assert_eq!(trailing[0].quantity, 976.0);
    assert_eq!(trailing[0].price_rate, 0.005);
}

#[tokio::test]
async fn test_transport_failure_after_entry_closes() {
    let h = harness();
    h.gateway.fail(Op::GetOpenOrders, broken_pipe());

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::ClosedOnFailure(FailureReason::ExchangeError));
    assert_eq!(h.closes().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_on_entry_still_closes() {
    let h = harness();
    h.gateway.fail(Op::MarketOrder, broken_pipe());

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::ClosedOnFailure(FailureReason::ExchangeError));
    assert_eq!(h.closes().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_before_entry_aborts() {
    let h = harness();
    h.gateway.fail(Op::SetLeverage, broken_pipe());

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Aborted(AbortReason::ExchangeError));
    assert!(h.gateway.market_orders().is_empty());
}

#[tokio::test]
async fn test_volume_filter_blocks_entry() {
    let h = harness();
    let user = UserTradingConfig {
        volume_filter_enabled: true,
        volume_multiplier: 2.0,
        ..trader()
    };

    let outcome = h.run(&user).await;

    assert_eq!(outcome, ExecutionOutcome::Aborted(AbortReason::VolumeFilter));
    assert_eq!(h.gateway.leverage_sides().len(), 1);
    assert!(h.gateway.market_orders().is_empty());
}

#[tokio::test]
async fn test_volume_spike_passes_filter() {
    let mut volumes = vec![100.0; 100];
    volumes[99] = 500.0;
    let market = MockMarketData::from_series(&[], &[], &[ENTRY_PRICE; 100], &volumes);
    let h = harness_with_market(market);
    let user = UserTradingConfig {
        volume_filter_enabled: true,
        volume_multiplier: 2.0,
        ..trader()
    };

    assert_eq!(h.run(&user).await, ExecutionOutcome::Opened);
}

#[tokio::test]
async fn test_mark_price_failure_falls_back_to_entry_price() {
    let h = harness();
    h.gateway.fail(Op::MarkPrice, broken_pipe());

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::Opened);
    assert!(h.gateway.take_profits().iter().all(|tp| tp.quantity == 488.0));
}

#[tokio::test]
async fn test_invalid_plan_aborts_before_exchange() {
    let h = harness();
    let user = UserTradingConfig {
        take_profit_pcts: vec![],
        ..trader()
    };

    let outcome = h.run(&user).await;

    assert_eq!(outcome, ExecutionOutcome::Aborted(AbortReason::InvalidIntent));
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_unsplittable_take_profits_abort_before_exchange() {
    let h = harness();
    let user = UserTradingConfig {
        margin_usdt: 1.0,
        leverage: 1,
        take_profit_pcts: vec![4.0, 6.0, 8.0],
        ..trader()
    };

    let outcome = h.run(&user).await;

    assert_eq!(outcome, ExecutionOutcome::Aborted(AbortReason::InvalidIntent));
    assert!(h.gateway.calls().is_empty());
    assert!(h.gateway.take_profits().is_empty());
}

#[tokio::test]
async fn test_failed_close_is_reported_to_subscriber() {
    let h = harness();
    *h.gateway.fill_ratio.lock() = 0.0;
    h.gateway.pass(Op::MarketOrder);
    h.gateway.fail(Op::MarketOrder, broken_pipe());

    let outcome = h.run(&trader()).await;

    assert_eq!(outcome, ExecutionOutcome::ClosedOnFailure(FailureReason::PositionNotOpened));
    assert_eq!(h.closes().len(), 1);
    assert!(h.notifier.messages_for("42")[0].contains("close failed"));
}
