use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bingx::Symbol;
use crate::config::ScannerConfig;
use crate::execution::{ExecutionOutcome, GatewayProvider, OrderSequencer};
use crate::market_data::MarketDataSource;
use crate::risk::{CooldownDecision, CooldownTracker, VolumeGate};
use crate::strategy::{MetricsOutcome, Signal, SignalEvaluator, SignalThresholds};
use crate::telegram::{self, Notifier, NotifyError};
use crate::users::{UserId, UserStore, UserTradingConfig};

type InFlightSet = Arc<Mutex<HashSet<(UserId, Symbol)>>>;

/// Holds a (user, symbol) slot for the lifetime of one execution
struct InFlightGuard {
    set: InFlightSet,
    key: (UserId, Symbol),
}

impl InFlightGuard {
    fn acquire(set: &InFlightSet, user_id: &str, symbol: &Symbol) -> Option<Self> {
        let key = (user_id.to_string(), symbol.clone());
        if !set.lock().insert(key.clone()) {
            return None;
        }
        Some(Self { set: set.clone(), key })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Counters for one pass over the symbol universe
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub symbols: usize,
    pub signals: usize,
    pub dispatched: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
struct SymbolReport {
    signals: usize,
    dispatched: usize,
}

pub struct Scanner {
    market: Arc<dyn MarketDataSource>,
    store: Arc<UserStore>,
    notifier: Arc<dyn Notifier>,
    gateways: Arc<dyn GatewayProvider>,
    evaluator: SignalEvaluator,
    cooldown: CooldownTracker,
    volume_gate: VolumeGate,
    config: ScannerConfig,
    in_flight: InFlightSet,
    executions: Arc<Semaphore>,
    pending: Mutex<Vec<JoinHandle<ExecutionOutcome>>>,
}

impl Scanner {
    pub fn new(
        config: ScannerConfig,
        market: Arc<dyn MarketDataSource>,
        store: Arc<UserStore>,
        notifier: Arc<dyn Notifier>,
        gateways: Arc<dyn GatewayProvider>,
    ) -> Self {
        Self {
            market,
            store,
            notifier,
            gateways,
            evaluator: SignalEvaluator::new(SignalThresholds::from(&config)),
            cooldown: CooldownTracker::from_hours(config.cooldown_hours),
            volume_gate: VolumeGate::new(config.volume_period),
            executions: Arc::new(Semaphore::new(config.max_concurrent_executions.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pending: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Scans forever. A failed cycle is logged and the next one starts on
    /// schedule.
    pub async fn run(&self) {
        info!(
            "🔭 Scanner started | interval {}s | {} workers | OI thresholds {}% / {}%",
            self.config.interval_secs, self.config.workers, self.config.oi_4h_threshold, self.config.oi_24h_threshold
        );

        loop {
            let started = Instant::now();

            match self.scan_once().await {
                Ok(report) => info!(
                    "📊 Scan done in {:.1}s | {} symbols | {} signals | {} executions | {} errors",
                    started.elapsed().as_secs_f64(),
                    report.symbols,
                    report.signals,
                    report.dispatched,
                    report.errors
                ),
                Err(e) => error!("❌ Scan failed: {:#}", e),
            }
            self.pending.lock().retain(|handle| !handle.is_finished());

            let sleep = self.next_sleep(started.elapsed());
            debug!("Sleeping {:?} until next scan", sleep);
            tokio::time::sleep(sleep).await;
        }
    }

    fn next_sleep(&self, elapsed: Duration) -> Duration {
        let interval = Duration::from_secs(self.config.interval_secs);
        let min_sleep = Duration::from_secs(self.config.min_sleep_secs);
        interval.saturating_sub(elapsed).max(min_sleep)
    }

    /// One pass: refresh the universe, evaluate every symbol on the worker
    /// pool and dispatch accepted signals. Executions keep running after
    /// this returns; see `join_pending`.
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let symbols = self.market.list_perpetual_usdt_symbols().await?;
        let mut report = ScanReport {
            symbols: symbols.len(),
            ..ScanReport::default()
        };

        let results: Vec<Result<SymbolReport>> = stream::iter(symbols)
            .map(|symbol| async move { self.check_symbol(&symbol).await })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                Ok(r) => {
                    report.signals += r.signals;
                    report.dispatched += r.dispatched;
                }
                Err(e) => {
                    debug!("Symbol check failed: {:#}", e);
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Waits for every execution spawned so far
    pub async fn join_pending(&self) -> Vec<ExecutionOutcome> {
        let handles: Vec<_> = self.pending.lock().drain(..).collect();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Execution task panicked: {}", e),
            }
        }
        outcomes
    }

    async fn check_symbol(&self, symbol: &Symbol) -> Result<SymbolReport> {
        let metrics = match self.evaluator.metrics(self.market.as_ref(), symbol).await? {
            MetricsOutcome::Ready(metrics) => metrics,
            MetricsOutcome::InsufficientData => {
                debug!("{}: not enough history", symbol);
                return Ok(SymbolReport::default());
            }
            MetricsOutcome::BelowOiFloor(oi) => {
                debug!("{}: OI {:.0} USDT below floor", symbol, oi);
                return Ok(SymbolReport::default());
            }
        };

        let mut report = SymbolReport::default();
        for (user_id, user) in self.store.snapshot() {
            let Some(signal) = self.evaluator.evaluate(symbol, &metrics, &user) else {
                continue;
            };
            report.signals += 1;
            if self.handle_signal(&user_id, &user, signal).await {
                report.dispatched += 1;
            }
        }
        Ok(report)
    }

    /// Alerts the subscriber and, when every gate passes, spawns the order
    /// sequence. Returns whether an execution was started.
    async fn handle_signal(&self, user_id: &str, user: &UserTradingConfig, signal: Signal) -> bool {
        info!(
            "🚨 [{}] {} {} | OI {:.1}% / {:.1}% | price {:.1}% / {:.1}%",
            user_id,
            signal.symbol,
            signal.period,
            signal.metrics.oi_growth_4h,
            signal.metrics.oi_growth_24h,
            signal.metrics.price_growth_4h,
            signal.metrics.price_growth_24h
        );

        match self.notifier.send(user_id, &telegram::signal_alert(&signal)).await {
            Ok(()) => {}
            Err(NotifyError::Blocked) => {
                warn!("🚫 [{}] blocked the bot, removing subscriber", user_id);
                if let Err(e) = self.store.remove(user_id).await {
                    error!("Removing {} failed: {:#}", user_id, e);
                }
                return false;
            }
            Err(e) => warn!("Alert to {} failed: {}", user_id, e),
        }

        if !user.trading_enabled {
            return false;
        }
        if !user.has_credentials() {
            warn!("[{}] trading enabled without API credentials", user_id);
            return false;
        }
        if user.is_blacklisted(&signal.symbol) {
            info!("⏭️  [{}] {} is blacklisted", user_id, signal.symbol);
            return false;
        }

        let Some(guard) = InFlightGuard::acquire(&self.in_flight, user_id, &signal.symbol) else {
            debug!("[{}] {} already executing", user_id, signal.symbol);
            return false;
        };

        let now = Utc::now().naive_utc();
        match self.cooldown.try_acquire(&self.store, user_id, &signal.symbol, now).await {
            Ok(CooldownDecision::Acquired) => {}
            Ok(CooldownDecision::CoolingDown { remaining }) => {
                info!(
                    "⏳ [{}] {} cooling down, {}m left",
                    user_id,
                    signal.symbol,
                    remaining.num_minutes()
                );
                return false;
            }
            Ok(CooldownDecision::UnknownUser) => return false,
            Err(e) => {
                error!("❌ [{}] cooldown for {} not recorded, skipping: {:#}", user_id, signal.symbol, e);
                return false;
            }
        }

        let gateway = match self.gateways.gateway_for(user).await {
            Ok(gateway) => gateway,
            Err(e) => {
                error!("❌ [{}] no exchange client: {:#}", user_id, e);
                return false;
            }
        };

        let sequencer = OrderSequencer::new(
            gateway,
            self.market.clone(),
            self.notifier.clone(),
            self.volume_gate.clone(),
        );
        let executions = self.executions.clone();
        let user_id = user_id.to_string();
        let user = user.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _permit = executions.acquire_owned().await;
            let outcome = sequencer.execute(&user_id, &user, &signal).await;
            info!("🏁 [{}] {} finished: {}", user_id, signal.symbol, outcome);
            outcome
        });
        self.pending.lock().push(handle);
        true
    }
}
