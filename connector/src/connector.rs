//! The Connector: one long-lived instance per (venue, account).
//!
//! Composition and scheduling. All state mutation happens on a single
//! connector task that drains one message loop; commands from strategies,
//! REST outcomes, stream work and reconciliation results are all messages.
//! Strategy-facing getters read through the shared state under a reader
//! lock the connector task alone writes.
//!
//! Tasks spawned by [`Connector::start`]:
//! * the connector loop (exclusive state writer)
//! * the user-stream consumer
//! * the reconciliation loop
//! * the tick pump driving [`TickDriver::on_tick`]

use crate::cancel::{self, CancelDedup};
use crate::config::ConnectorConfig;
use crate::error::{ApiError, ConnectorError, RejectReason};
use crate::event::{ConnectorEvent, EventBus, EventKind, TransactionFailure};
use crate::executor::RestCommandExecutor;
use crate::ledger::{AssetBalance, BalanceLedger, BalanceSnapshot};
use crate::lifecycle::{LifecycleEvent, OrderLifecycleMachine};
use crate::order::registry::{InFlightOrderRegistry, RegistrySnapshot};
use crate::order::{ClientOrderId, InFlightOrder, OrderIntent, OrderType};
use crate::reconcile::{self, ReconcileContext, TickDriver};
use crate::rules::{TradingRule, TradingRuleCache};
use crate::stream::{stream_queue, StreamQueueReceiver, StreamWork, UserStreamConsumer};
use crate::venue::{SubmitOutcome, VenueAdapter};
use chrono::Utc;
use jacana_integration::http::HttpTransport;
use jacana_integration::websocket::StreamTransport;
use jacana_markets::{Side, Symbol};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Messages drained by the connector task.
#[derive(Debug)]
pub(crate) enum Msg {
    Place(OrderIntent),
    Cancel { client_id: ClientOrderId },
    Lifecycle(LifecycleEvent),
    BalanceSnapshot(Vec<AssetBalance>),
    StreamBalance(AssetBalance),
    RulesSnapshot(Vec<TradingRule>),
    ApiFailure {
        context: &'static str,
        error: ApiError,
    },
}

/// State mutated exclusively by the connector task; read by anyone.
#[derive(Debug, Default)]
pub struct SharedState {
    pub registry: parking_lot::RwLock<InFlightOrderRegistry>,
    pub ledger: parking_lot::RwLock<BalanceLedger>,
    pub rules: parking_lot::RwLock<TradingRuleCache>,
}

#[derive(Debug, Default)]
struct StatusFlags {
    started: AtomicBool,
    halted: Arc<AtomicBool>,
    order_books_ready: AtomicBool,
    stream_connected: Arc<AtomicBool>,
}

/// Generates client order ids: `{prefix}{nonce}` with a wall-clock-seeded
/// monotonic nonce, unique across restarts.
#[derive(Debug)]
struct ClientOrderIds {
    prefix: String,
    last: parking_lot::Mutex<u64>,
}

impl ClientOrderIds {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            last: parking_lot::Mutex::new(0),
        }
    }

    fn next(&self) -> ClientOrderId {
        let mut last = self.last.lock();
        let wall = Utc::now().timestamp_millis().max(0) as u64;
        *last = (*last + 1).max(wall);
        ClientOrderId::new(format!("{}{}", self.prefix, *last))
    }
}

/// Exchange connector runtime for one (venue, account).
pub struct Connector<A: VenueAdapter> {
    config: ConnectorConfig,
    adapter: Arc<A>,
    state: Arc<SharedState>,
    bus: Arc<EventBus>,
    executor: Arc<RestCommandExecutor<A>>,
    tick: Arc<TickDriver>,
    dedup: Arc<CancelDedup>,
    flags: Arc<StatusFlags>,
    ids: ClientOrderIds,
    cmd_tx: mpsc::UnboundedSender<Msg>,
    cmd_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Msg>>>,
    stream_transport: parking_lot::Mutex<Option<Box<dyn StreamTransport>>>,
    shutdown: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<A: VenueAdapter> Connector<A> {
    pub fn new(
        config: ConnectorConfig,
        adapter: Arc<A>,
        http: Arc<dyn HttpTransport>,
        stream_transport: Box<dyn StreamTransport>,
    ) -> Self {
        let executor = Arc::new(RestCommandExecutor::new(
            Arc::clone(&adapter),
            http,
            config.tunables.executor_config(),
        ));
        let tick = Arc::new(TickDriver::new(config.tunables.tick_intervals()));
        let dedup = Arc::new(CancelDedup::new(config.tunables.cancel_dedup_ttl()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let ids = ClientOrderIds::new(format!("jcn-{}-", adapter.venue()));

        Self {
            config,
            adapter,
            state: Arc::new(SharedState::default()),
            bus: Arc::new(EventBus::new()),
            executor,
            tick,
            dedup,
            flags: Arc::new(StatusFlags::default()),
            ids,
            cmd_tx,
            cmd_rx: parking_lot::Mutex::new(Some(cmd_rx)),
            stream_transport: parking_lot::Mutex::new(Some(stream_transport)),
            shutdown,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the connector's tasks. Idempotent; the first call wins. A
    /// stopped connector cannot be restarted - build a new one.
    pub fn start(&self) {
        let Some(cmd_rx) = self.cmd_rx.lock().take() else {
            warn!("connector cannot be started twice");
            return;
        };
        let Some(transport) = self.stream_transport.lock().take() else {
            return;
        };
        self.flags.started.store(true, Ordering::SeqCst);
        info!(venue = %self.adapter.venue(), "starting connector");

        let (queue, stream_rx) = stream_queue(self.config.tunables.stream_queue_capacity);
        let mut tasks = self.tasks.lock();

        // Connector loop: sole writer of shared state.
        tasks.push(tokio::spawn(run_loop(
            LoopContext {
                machine: OrderLifecycleMachine::new(
                    self.config.tunables.order_not_exist_grace(),
                    self.config.tunables.order_not_found_limit,
                    self.adapter.fee_rates(),
                    self.adapter.fee_semantics(),
                ),
                state: Arc::clone(&self.state),
                bus: Arc::clone(&self.bus),
                executor: Arc::clone(&self.executor),
                tick: Arc::clone(&self.tick),
                dedup: Arc::clone(&self.dedup),
                halted: Arc::clone(&self.flags.halted),
                tx: self.cmd_tx.clone(),
                shutdown: self.shutdown.subscribe(),
            },
            cmd_rx,
            stream_rx,
        )));

        // User stream consumer.
        tasks.push(tokio::spawn(
            UserStreamConsumer::new(
                Arc::clone(&self.adapter),
                transport,
                queue,
                Arc::clone(&self.tick),
                Arc::clone(&self.flags.stream_connected),
                self.config.tunables.stream_idle_timeout(),
                self.shutdown.subscribe(),
            )
            .run(),
        ));

        // Reconciliation loop.
        tasks.push(tokio::spawn(reconcile::run_reconciliation(
            ReconcileContext {
                executor: Arc::clone(&self.executor),
                state: Arc::clone(&self.state),
                tick: Arc::clone(&self.tick),
                tx: self.cmd_tx.clone(),
                shutdown: self.shutdown.subscribe(),
                order_not_exist_grace: self.config.tunables.order_not_exist_grace(),
                order_expiry: self.config.tunables.order_expiry(),
            },
        )));

        // Tick pump. An external clock may drive `on_tick` as well; buckets
        // debounce either way.
        let tick = Arc::clone(&self.tick);
        let poll_interval = self.config.poll_interval();
        let mut shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => tick.on_tick(Utc::now()),
                }
            }
        }));
    }

    /// Signal shutdown and wait for the tasks to finish.
    pub async fn stop(&self) {
        if !self.flags.started.load(Ordering::SeqCst) {
            return;
        }
        info!(venue = %self.adapter.venue(), "stopping connector");
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.flags.started.store(false, Ordering::SeqCst);
    }

    /// Drive the tick externally (tests, embedding in a host clock).
    pub fn on_tick(&self, now: chrono::DateTime<Utc>) {
        self.tick.on_tick(now);
    }

    /// True iff order books are ready, at least one balance has been seen,
    /// and trading rules are cached. A watch-only connector
    /// (`trading_required: false`) does not wait for balances.
    pub fn ready(&self) -> bool {
        let balances_ready =
            !self.config.trading_required || self.state.ledger.read().seen_any();
        self.flags.started.load(Ordering::SeqCst)
            && !self.flags.halted.load(Ordering::SeqCst)
            && self.flags.order_books_ready.load(Ordering::SeqCst)
            && balances_ready
            && self.state.rules.read().is_primed()
    }

    /// Order books are maintained by an external tracker; it reports its
    /// readiness here.
    pub fn set_order_books_ready(&self, ready: bool) {
        self.flags.order_books_ready.store(ready, Ordering::SeqCst);
    }

    /// True while the user stream is connected.
    pub fn stream_connected(&self) -> bool {
        self.flags.stream_connected.load(Ordering::SeqCst)
    }

    pub fn buy(
        &self,
        symbol: &Symbol,
        quantity: Decimal,
        kind: OrderType,
        price: Option<Decimal>,
    ) -> Result<ClientOrderId, ConnectorError> {
        self.submit(Side::Buy, symbol, quantity, kind, price)
    }

    pub fn sell(
        &self,
        symbol: &Symbol,
        quantity: Decimal,
        kind: OrderType,
        price: Option<Decimal>,
    ) -> Result<ClientOrderId, ConnectorError> {
        self.submit(Side::Sell, symbol, quantity, kind, price)
    }

    fn submit(
        &self,
        side: Side,
        symbol: &Symbol,
        quantity: Decimal,
        kind: OrderType,
        price: Option<Decimal>,
    ) -> Result<ClientOrderId, ConnectorError> {
        if !self.flags.started.load(Ordering::SeqCst) || self.flags.halted.load(Ordering::SeqCst) {
            return Err(ConnectorError::NotReady);
        }
        if kind.is_limit() && price.is_none() {
            return Err(ConnectorError::MissingPrice);
        }

        {
            let rules = self.state.rules.read();
            let rule = rules
                .get(symbol)
                .ok_or_else(|| ConnectorError::UnknownSymbol(symbol.clone()))?;
            rule.validate(quantity, price)
                .map_err(|reason| ConnectorError::RuleViolation {
                    symbol: symbol.clone(),
                    reason,
                })?;
        }

        let client_id = self.ids.next();
        let intent = OrderIntent {
            client_id: client_id.clone(),
            symbol: symbol.clone(),
            side,
            kind,
            quantity,
            price,
        };
        self.cmd_tx
            .send(Msg::Place(intent))
            .map_err(|_| ConnectorError::ChannelClosed)?;
        Ok(client_id)
    }

    /// Request a cancel for one tracked order.
    pub fn cancel(
        &self,
        symbol: &Symbol,
        client_id: ClientOrderId,
    ) -> Result<(), ConnectorError> {
        {
            let registry = self.state.registry.read();
            if let Some(order) = registry.get(&client_id) {
                if &order.symbol != symbol {
                    warn!(%client_id, expected = %order.symbol, got = %symbol,
                          "cancel symbol mismatch");
                }
            }
        }
        self.cmd_tx
            .send(Msg::Cancel { client_id })
            .map_err(|_| ConnectorError::ChannelClosed)
    }

    /// Cancel every non-terminal order, returning per-order success within
    /// the deadline. Failed cancels stay tracked.
    pub async fn cancel_all(&self, deadline: Duration) -> Vec<(ClientOrderId, bool)> {
        cancel::cancel_all(
            &self.executor,
            &self.state,
            &self.dedup,
            &self.cmd_tx,
            deadline,
        )
        .await
    }

    pub fn balances(&self) -> BalanceSnapshot {
        self.state.ledger.read().snapshot()
    }

    /// Read-only views of every tracked order.
    pub fn in_flight_orders(&self) -> Vec<InFlightOrder> {
        self.state.registry.read().iter().cloned().collect()
    }

    /// Open limit orders only.
    pub fn limit_orders(&self) -> Vec<InFlightOrder> {
        self.state
            .registry
            .read()
            .open_orders()
            .filter(|order| order.kind.is_limit() && order.state.is_open())
            .cloned()
            .collect()
    }

    pub fn trading_rule(&self, symbol: &Symbol) -> Option<TradingRule> {
        self.state.rules.read().get(symbol).cloned()
    }

    /// Subscribe a handler to one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&ConnectorEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler);
    }

    /// Serialise tracked orders for restart continuity.
    pub fn export_tracking_states(&self) -> Result<Vec<u8>, ConnectorError> {
        self.state
            .registry
            .read()
            .snapshot_bytes()
            .map_err(|error| ConnectorError::Restore(error.to_string()))
    }

    /// Rehydrate tracked orders from a previous run.
    pub fn import_tracking_states(&self, bytes: &[u8]) -> Result<(), ConnectorError> {
        self.state
            .registry
            .write()
            .restore_bytes(bytes)
            .map_err(|error| ConnectorError::Restore(error.to_string()))
    }

    /// Structured snapshot of tracked orders.
    pub fn tracking_snapshot(&self) -> RegistrySnapshot {
        self.state.registry.read().snapshot()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }
}

impl<A: VenueAdapter> fmt::Debug for Connector<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("venue", &self.adapter.venue())
            .field("started", &self.flags.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Everything the connector loop owns.
struct LoopContext<A: VenueAdapter> {
    machine: OrderLifecycleMachine,
    state: Arc<SharedState>,
    bus: Arc<EventBus>,
    executor: Arc<RestCommandExecutor<A>>,
    tick: Arc<TickDriver>,
    dedup: Arc<CancelDedup>,
    halted: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Msg>,
    shutdown: watch::Receiver<bool>,
}

async fn run_loop<A: VenueAdapter>(
    mut ctx: LoopContext<A>,
    mut cmd_rx: mpsc::UnboundedReceiver<Msg>,
    mut stream_rx: StreamQueueReceiver,
) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.changed() => break,
            Some(msg) = cmd_rx.recv() => handle_msg(&ctx, msg),
            Some(work) = stream_rx.recv() => match work {
                StreamWork::Balance(update) => handle_msg(&ctx, Msg::StreamBalance(update)),
                StreamWork::Lifecycle(event) => handle_msg(&ctx, Msg::Lifecycle(event)),
            },
        }
    }
    debug!("connector loop stopped");
}

fn handle_msg<A: VenueAdapter>(ctx: &LoopContext<A>, msg: Msg) {
    let now = Utc::now();
    match msg {
        Msg::Place(intent) => on_place(ctx, intent, now),
        Msg::Cancel { client_id } => on_cancel(ctx, client_id),
        Msg::Lifecycle(event) => on_lifecycle(ctx, event, now),
        Msg::BalanceSnapshot(balances) => {
            ctx.state.ledger.write().replace_all(balances, now);
        }
        Msg::StreamBalance(update) => {
            ctx.state.ledger.write().apply(update);
        }
        Msg::RulesSnapshot(rules) => {
            let count = rules.len();
            ctx.state.rules.write().replace_all(rules, now);
            debug!(count, "trading rules refreshed");
        }
        Msg::ApiFailure { context, error } => {
            if matches!(error, ApiError::AuthFailure(_)) {
                ctx.halted.store(true, Ordering::SeqCst);
                error!(context, %error, "authentication failure, connector halted");
            }
            ctx.bus
                .emit(&ConnectorEvent::TransactionFailure(TransactionFailure {
                    client_id: None,
                    detail: format!("{context}: {error}"),
                    ts: now,
                }));
        }
    }
}

fn on_place<A: VenueAdapter>(ctx: &LoopContext<A>, intent: OrderIntent, now: chrono::DateTime<Utc>) {
    {
        let mut registry = ctx.state.registry.write();
        if let Err(error) = registry.track(&intent, now) {
            error!(%error, "failed to track intent");
            return;
        }
    }

    let executor = Arc::clone(&ctx.executor);
    let tx = ctx.tx.clone();
    let client_id = intent.client_id.clone();
    tokio::spawn(async move {
        let event = match executor.place(&intent).await {
            Ok(SubmitOutcome::Accepted { exchange_id, ts }) => LifecycleEvent::SubmitAck {
                client_id,
                exchange_id,
                ts,
            },
            Ok(SubmitOutcome::Rejected(reason)) => {
                LifecycleEvent::SubmitReject { client_id, reason }
            }
            Err(ApiError::Rejected(reason)) => LifecycleEvent::SubmitReject { client_id, reason },
            Err(ApiError::AuthFailure(detail)) => {
                let _ = tx.send(Msg::ApiFailure {
                    context: "place",
                    error: ApiError::AuthFailure(detail),
                });
                LifecycleEvent::SubmitReject {
                    client_id,
                    reason: RejectReason::Unauthorized,
                }
            }
            // Any ambiguous failure: the venue may or may not have received
            // the order. Reconciliation decides.
            Err(error) => {
                warn!(%error, "order submission outcome unknown");
                LifecycleEvent::SubmitTimeout { client_id }
            }
        };
        let _ = tx.send(Msg::Lifecycle(event));
    });
}

fn on_cancel<A: VenueAdapter>(ctx: &LoopContext<A>, client_id: ClientOrderId) {
    let target = {
        let registry = ctx.state.registry.read();
        registry
            .get(&client_id)
            .map(|order| (order.exchange_id.clone(), order.is_terminal()))
    };
    let exchange_id = match target {
        None => {
            debug!(%client_id, "cancel for untracked order, dropped");
            return;
        }
        Some((_, true)) => {
            debug!(%client_id, "cancel for terminal order, dropped");
            return;
        }
        Some((exchange_id, false)) => exchange_id,
    };
    if !ctx.dedup.try_begin(&client_id) {
        debug!(%client_id, "duplicate cancel suppressed");
        return;
    }

    let executor = Arc::clone(&ctx.executor);
    let dedup = Arc::clone(&ctx.dedup);
    let tx = ctx.tx.clone();
    tokio::spawn(async move {
        let outcome = executor.cancel(&client_id, exchange_id.as_ref()).await;
        dedup.finish(&client_id);
        match outcome {
            Ok(crate::venue::CancelOutcome::Cancelled) => {
                let _ = tx.send(Msg::Lifecycle(LifecycleEvent::CancelAck {
                    client_id,
                    ts: Utc::now(),
                }));
            }
            Ok(crate::venue::CancelOutcome::AlreadyClosed)
            | Ok(crate::venue::CancelOutcome::NotFound) => {
                // Venue deems the order closed; reconciliation settles it.
                debug!(%client_id, "cancel on already-closed order");
            }
            Err(error) => {
                let _ = tx.send(Msg::Lifecycle(LifecycleEvent::CancelReject {
                    client_id,
                    detail: error.to_string(),
                }));
            }
        }
    });
}

fn on_lifecycle<A: VenueAdapter>(
    ctx: &LoopContext<A>,
    event: LifecycleEvent,
    now: chrono::DateTime<Utc>,
) {
    // A rule-shaped rejection means the cached rules are stale.
    if let LifecycleEvent::SubmitReject {
        reason: RejectReason::MinNotional | RejectReason::TickSize,
        ..
    } = &event
    {
        ctx.tick.force_rules();
    }

    let outcome = {
        let mut registry = ctx.state.registry.write();
        ctx.machine.ingest(&mut registry, event, now)
    };
    match outcome {
        Ok(events) => {
            for event in &events {
                ctx.bus.emit(event);
            }
        }
        Err(violation) => {
            error!(%violation, "protocol violation, order quarantined");
            ctx.bus
                .emit(&ConnectorEvent::TransactionFailure(TransactionFailure {
                    client_id: Some(violation.client_id.clone()),
                    detail: violation.to_string(),
                    ts: now,
                }));
        }
    }
}
