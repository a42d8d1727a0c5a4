//! Tick driver and reconciliation loop.
//!
//! An external clock (or the connector's internal pump) calls
//! [`TickDriver::on_tick`] at least once per poll interval. The driver
//! debounces each periodic sub-loop by comparing `now / interval` buckets,
//! so balances, order statuses and trading rules keep independent cadences,
//! then wakes the reconciliation task. No work happens inline on the tick.
//!
//! The reconciliation task executes due sweeps in fixed order: balances,
//! then open-order statuses, then (on its slower cadence) trading rules.
//! Sweeps are independent - one failing does not skip the others. Results
//! funnel back to the connector task as messages; this task never mutates
//! state directly.

use crate::connector::{Msg, SharedState};
use crate::executor::RestCommandExecutor;
use crate::lifecycle::LifecycleEvent;
use crate::order::{ClientOrderId, ExchangeOrderId, OrderState};
use crate::venue::VenueAdapter;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};

/// Cadences for the periodic sub-loops.
#[derive(Debug, Clone)]
pub struct TickIntervals {
    pub balances: Duration,
    pub order_status: Duration,
    pub trading_rules: Duration,
}

impl Default for TickIntervals {
    fn default() -> Self {
        Self {
            balances: Duration::from_secs(5),
            order_status: Duration::from_secs(10),
            trading_rules: Duration::from_secs(300),
        }
    }
}

/// Which sweeps are due at the next wake-up.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SweepSet {
    pub balances: bool,
    pub orders: bool,
    pub rules: bool,
    /// Timeout sweep: unacknowledged-order polling and local expiry.
    pub expiry: bool,
}

impl SweepSet {
    fn merge(&mut self, other: SweepSet) {
        self.balances |= other.balances;
        self.orders |= other.orders;
        self.rules |= other.rules;
        self.expiry |= other.expiry;
    }
}

#[derive(Debug)]
struct TickBuckets {
    balances: i64,
    orders: i64,
    rules: i64,
}

/// Debounces ticks into due sweeps and wakes the reconciliation task.
#[derive(Debug)]
pub struct TickDriver {
    intervals: TickIntervals,
    notify: Notify,
    buckets: parking_lot::Mutex<TickBuckets>,
    pending: parking_lot::Mutex<SweepSet>,
}

impl TickDriver {
    pub fn new(intervals: TickIntervals) -> Self {
        Self {
            intervals,
            notify: Notify::new(),
            buckets: parking_lot::Mutex::new(TickBuckets {
                balances: i64::MIN,
                orders: i64::MIN,
                rules: i64::MIN,
            }),
            pending: parking_lot::Mutex::new(SweepSet::default()),
        }
    }

    /// Logical tick. Cheap: flags due sweeps and notifies, nothing more.
    pub fn on_tick(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let mut due = SweepSet {
            expiry: true,
            ..SweepSet::default()
        };
        {
            let mut buckets = self.buckets.lock();
            due.balances = advance(&mut buckets.balances, now_ms, self.intervals.balances);
            due.orders = advance(&mut buckets.orders, now_ms, self.intervals.order_status);
            due.rules = advance(&mut buckets.rules, now_ms, self.intervals.trading_rules);
        }
        self.pending.lock().merge(due);
        self.notify.notify_one();
    }

    /// Force a full REST sweep regardless of cadence (used after a stream
    /// reconnect).
    pub fn force_reconcile(&self) {
        self.pending.lock().merge(SweepSet {
            balances: true,
            orders: true,
            rules: false,
            expiry: true,
        });
        self.notify.notify_one();
    }

    /// Force a trading-rule refresh (startup, or after a rule-shaped venue
    /// rejection).
    pub fn force_rules(&self) {
        self.pending.lock().rules = true;
        self.notify.notify_one();
    }

    pub(crate) fn take_pending(&self) -> SweepSet {
        std::mem::take(&mut *self.pending.lock())
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}

fn advance(last_bucket: &mut i64, now_ms: i64, interval: Duration) -> bool {
    let interval_ms = (interval.as_millis().max(1)) as i64;
    let bucket = now_ms / interval_ms;
    if bucket > *last_bucket {
        *last_bucket = bucket;
        true
    } else {
        false
    }
}

/// Everything the reconciliation task needs.
pub(crate) struct ReconcileContext<A: VenueAdapter> {
    pub executor: Arc<RestCommandExecutor<A>>,
    pub state: Arc<SharedState>,
    pub tick: Arc<TickDriver>,
    pub tx: mpsc::UnboundedSender<Msg>,
    pub shutdown: watch::Receiver<bool>,
    pub order_not_exist_grace: chrono::Duration,
    pub order_expiry: chrono::Duration,
}

/// Single cooperative task: waits on the tick notifier and runs due sweeps.
pub(crate) async fn run_reconciliation<A: VenueAdapter>(mut ctx: ReconcileContext<A>) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.changed() => break,
            _ = ctx.tick.notified() => {}
        }
        if *ctx.shutdown.borrow() {
            break;
        }

        let sweep = ctx.tick.take_pending();
        let now = Utc::now();

        if sweep.balances {
            refresh_balances(&ctx).await;
        }
        if sweep.orders || sweep.expiry {
            sweep_orders(&ctx, sweep, now).await;
        }
        if sweep.rules {
            refresh_rules(&ctx).await;
        }
    }
    debug!("reconciliation task stopped");
}

async fn refresh_balances<A: VenueAdapter>(ctx: &ReconcileContext<A>) {
    match ctx.executor.query_balances().await {
        Ok(balances) => {
            let _ = ctx.tx.send(Msg::BalanceSnapshot(balances));
        }
        Err(error) => {
            warn!(%error, "balance refresh failed");
            let _ = ctx.tx.send(Msg::ApiFailure {
                context: "balance_refresh",
                error,
            });
        }
    }
}

async fn refresh_rules<A: VenueAdapter>(ctx: &ReconcileContext<A>) {
    match ctx.executor.query_trading_rules().await {
        Ok(rules) => {
            let _ = ctx.tx.send(Msg::RulesSnapshot(rules));
        }
        Err(error) => {
            warn!(%error, "trading rule refresh failed");
            let _ = ctx.tx.send(Msg::ApiFailure {
                context: "trading_rules_refresh",
                error,
            });
        }
    }
}

/// Pick the tracked orders due a status poll, expire stragglers.
async fn sweep_orders<A: VenueAdapter>(
    ctx: &ReconcileContext<A>,
    sweep: SweepSet,
    now: DateTime<Utc>,
) {
    let mut to_poll: Vec<(ClientOrderId, Option<ExchangeOrderId>)> = Vec::new();
    let mut to_expire: Vec<ClientOrderId> = Vec::new();
    {
        let registry = ctx.state.registry.read();
        for order in registry.open_orders() {
            let age = order.age(now);
            if age >= ctx.order_expiry {
                to_expire.push(order.client_id.clone());
                continue;
            }
            let due = match order.state {
                // Unacknowledged orders are polled by client id once past
                // the grace window, on every timeout sweep.
                OrderState::Pending | OrderState::Indeterminate => {
                    sweep.expiry && age >= ctx.order_not_exist_grace
                }
                OrderState::Open | OrderState::PartiallyFilled => sweep.orders,
                _ => false,
            };
            if due {
                to_poll.push((order.client_id.clone(), order.exchange_id.clone()));
            }
        }
    }

    for client_id in to_expire {
        let _ = ctx
            .tx
            .send(Msg::Lifecycle(LifecycleEvent::LocalExpire { client_id }));
    }

    for (client_id, exchange_id) in to_poll {
        match ctx
            .executor
            .query_order(&client_id, exchange_id.as_ref())
            .await
        {
            Ok(outcome) => {
                let _ = ctx.tx.send(Msg::Lifecycle(LifecycleEvent::PollOrderSnapshot {
                    client_id,
                    outcome,
                }));
            }
            Err(error) => {
                warn!(%client_id, %error, "order status poll failed");
                let _ = ctx.tx.send(Msg::ApiFailure {
                    context: "order_status_poll",
                    error,
                });
            }
        }
    }
}
