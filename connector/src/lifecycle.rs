//! Order lifecycle machine.
//!
//! Single entry point [`OrderLifecycleMachine::ingest`]: every submit
//! acknowledgement, stream frame, poll snapshot and cancel outcome funnels
//! through here, one event at a time, on the connector task. For each event
//! it resolves the target order, checks transition legality, computes the
//! fill delta (deduped by trade id), and returns the strategy events to
//! emit. The connector task dispatches them after the registry write lock
//! is released, so emission always follows the committed mutation.
//!
//! Emission guarantees, per order:
//! * exactly one `OrderCreated` for any order that transitions past `Pending`
//! * at most one `OrderFilled` per `(client_id, trade_id)`
//! * exactly one of `OrderDone` / `OrderCancelled` / `OrderFailure` at the
//!   terminal transition
//!
//! Tie-breaks when poll and stream disagree: the more-advanced `filled_base`
//! wins (no regression), and a terminal disagreement resolves to `Done` - a
//! venue may cancel residual quantity after the final fill.

use crate::error::{ProtocolViolation, RejectReason};
use crate::event::{
    ConnectorEvent, OrderCancelled, OrderCreated, OrderDone, OrderFailure, OrderFilled,
    TransactionFailure,
};
use crate::order::registry::{InFlightOrderRegistry, RegistryError};
use crate::order::{ClientOrderId, ExchangeOrderId, InFlightOrder, OrderState, OrderType, TradeFill};
use crate::rules::FeeRates;
use crate::venue::{
    ExecutionEvent, FeeSemantics, OrderSnapshot, OrderSnapshotStatus, OrderUpdateEvent,
    QueryOutcome,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

/// Everything the lifecycle machine can ingest.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Venue accepted the submission.
    SubmitAck {
        client_id: ClientOrderId,
        exchange_id: Option<ExchangeOrderId>,
        ts: DateTime<Utc>,
    },
    /// Venue refused the submission.
    SubmitReject {
        client_id: ClientOrderId,
        reason: RejectReason,
    },
    /// Submission outcome unknown (transport failure); order becomes
    /// `Indeterminate` and reconciliation takes over.
    SubmitTimeout { client_id: ClientOrderId },
    /// Order status change from the user stream.
    StreamOrderUpdate(OrderUpdateEvent),
    /// Execution from the user stream.
    StreamFill(ExecutionEvent),
    /// Result of a reconciliation query for one tracked order.
    PollOrderSnapshot {
        client_id: ClientOrderId,
        outcome: QueryOutcome,
    },
    /// Venue acknowledged a cancel.
    CancelAck {
        client_id: ClientOrderId,
        ts: DateTime<Utc>,
    },
    /// A cancel failed past its retry budget.
    CancelReject {
        client_id: ClientOrderId,
        detail: String,
    },
    /// Straggler cleanup: order exceeded its local expiry.
    LocalExpire { client_id: ClientOrderId },
}

/// Lifecycle tunables and venue fee behaviour.
#[derive(Debug, Clone)]
pub struct OrderLifecycleMachine {
    /// Unacknowledged orders older than this are polled by client id.
    pub order_not_exist_grace: Duration,
    /// Consecutive not-found polls past the grace that finalise `Failed`.
    pub order_not_found_limit: u32,
    fee_rates: FeeRates,
    fee_semantics: FeeSemantics,
}

impl OrderLifecycleMachine {
    pub fn new(
        order_not_exist_grace: Duration,
        order_not_found_limit: u32,
        fee_rates: FeeRates,
        fee_semantics: FeeSemantics,
    ) -> Self {
        Self {
            order_not_exist_grace,
            order_not_found_limit,
            fee_rates,
            fee_semantics,
        }
    }

    /// Apply one event and return the strategy events to emit, in order.
    ///
    /// A [`ProtocolViolation`] quarantines the order and surfaces to the
    /// caller, halting ingest for that order only.
    pub fn ingest(
        &self,
        registry: &mut InFlightOrderRegistry,
        event: LifecycleEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConnectorEvent>, ProtocolViolation> {
        let mut events = Vec::new();
        match event {
            LifecycleEvent::SubmitAck {
                client_id,
                exchange_id,
                ts,
            } => {
                on_submit_ack(registry, &client_id, exchange_id.as_ref(), ts, &mut events)?
            }
            LifecycleEvent::SubmitReject { client_id, reason } => {
                on_submit_reject(registry, &client_id, reason, now, &mut events)
            }
            LifecycleEvent::SubmitTimeout { client_id } => {
                on_submit_timeout(registry, &client_id)
            }
            LifecycleEvent::StreamOrderUpdate(update) => {
                self.on_order_update(registry, update, &mut events)?
            }
            LifecycleEvent::StreamFill(execution) => {
                self.on_stream_fill(registry, execution, &mut events)?
            }
            LifecycleEvent::PollOrderSnapshot { client_id, outcome } => {
                self.on_poll_snapshot(registry, &client_id, outcome, now, &mut events)?
            }
            LifecycleEvent::CancelAck { client_id, ts } => {
                on_cancel_ack(registry, &client_id, ts, &mut events)
            }
            LifecycleEvent::CancelReject { client_id, detail } => {
                events.push(ConnectorEvent::TransactionFailure(TransactionFailure {
                    client_id: Some(client_id),
                    detail,
                    ts: now,
                }));
            }
            LifecycleEvent::LocalExpire { client_id } => {
                on_local_expire(registry, &client_id, now, &mut events)
            }
        }
        Ok(events)
    }

    fn on_order_update(
        &self,
        registry: &mut InFlightOrderRegistry,
        update: OrderUpdateEvent,
        events: &mut Vec<ConnectorEvent>,
    ) -> Result<(), ProtocolViolation> {
        let Some(client_id) = registry
            .resolve(update.client_id.as_ref(), update.exchange_id.as_ref())
            .cloned()
        else {
            debug!(?update, "order update for untracked order, dropped");
            return Ok(());
        };
        if !ingest_allowed(registry, &client_id, "order_update") {
            return Ok(());
        }
        bind(registry, &client_id, update.exchange_id.as_ref())?;

        if let Some(order) = registry.get_mut(&client_id) {
            acknowledge(order, events, update.ts);
            if let Some(cum_base) = update.filled_base {
                self.apply_cumulative(order, cum_base, None, events, update.ts);
            }
            match update.status {
                OrderSnapshotStatus::New => {}
                OrderSnapshotStatus::PartiallyFilled => {
                    if order.state == OrderState::Open {
                        order.state = OrderState::PartiallyFilled;
                    }
                }
                OrderSnapshotStatus::Filled => done(order, events, update.ts),
                OrderSnapshotStatus::Cancelled => cancel_or_done(order, events, update.ts),
                OrderSnapshotStatus::Rejected => fail(
                    order,
                    RejectReason::Venue(SmolStr::new("rejected")),
                    events,
                    update.ts,
                ),
            }
        }
        forget_if_terminal(registry, &client_id);
        Ok(())
    }

    fn on_stream_fill(
        &self,
        registry: &mut InFlightOrderRegistry,
        execution: ExecutionEvent,
        events: &mut Vec<ConnectorEvent>,
    ) -> Result<(), ProtocolViolation> {
        let Some(client_id) = registry
            .resolve(execution.client_id.as_ref(), execution.exchange_id.as_ref())
            .cloned()
        else {
            debug!(?execution, "execution for untracked order, dropped");
            return Ok(());
        };
        if !ingest_allowed(registry, &client_id, "execution") {
            return Ok(());
        }
        bind(registry, &client_id, execution.exchange_id.as_ref())?;

        if let Some(order) = registry.get_mut(&client_id) {
            acknowledge(order, events, execution.fill.ts);

            let duplicate = execution
                .fill
                .trade_id
                .as_ref()
                .is_some_and(|trade_id| order.has_seen_trade(trade_id));
            if duplicate {
                debug!(
                    %client_id,
                    trade_id = ?execution.fill.trade_id,
                    "duplicate execution suppressed"
                );
            } else {
                self.apply_fill(order, &execution.fill, events);
            }

            if order.filled_base >= order.original_quantity {
                done(order, events, execution.fill.ts);
            } else {
                match execution.status {
                    Some(OrderSnapshotStatus::Filled) => done(order, events, execution.fill.ts),
                    Some(OrderSnapshotStatus::Cancelled) => {
                        cancel_or_done(order, events, execution.fill.ts)
                    }
                    _ => {}
                }
            }
        }
        forget_if_terminal(registry, &client_id);
        Ok(())
    }

    fn on_poll_snapshot(
        &self,
        registry: &mut InFlightOrderRegistry,
        client_id: &ClientOrderId,
        outcome: QueryOutcome,
        now: DateTime<Utc>,
        events: &mut Vec<ConnectorEvent>,
    ) -> Result<(), ProtocolViolation> {
        if !ingest_allowed(registry, client_id, "poll_order_snapshot") {
            return Ok(());
        }
        match outcome {
            QueryOutcome::NotFound => {
                self.on_poll_not_found(registry, client_id, now, events);
                Ok(())
            }
            QueryOutcome::Found(snapshot) => {
                self.on_poll_found(registry, client_id, snapshot, events)
            }
        }
    }

    fn on_poll_not_found(
        &self,
        registry: &mut InFlightOrderRegistry,
        client_id: &ClientOrderId,
        now: DateTime<Utc>,
        events: &mut Vec<ConnectorEvent>,
    ) {
        if let Some(order) = registry.get_mut(client_id) {
            match order.state {
                OrderState::Pending | OrderState::Indeterminate => {
                    if order.age(now) < self.order_not_exist_grace {
                        return;
                    }
                    order.not_found_count += 1;
                    if order.not_found_count >= self.order_not_found_limit {
                        info!(
                            %client_id,
                            polls = order.not_found_count,
                            "submission never acknowledged, failing order"
                        );
                        fail(order, RejectReason::NeverAcknowledged, events, now);
                    }
                }
                state if state.is_open() => {
                    warn!(%client_id, %state, "venue reports tracked open order as unknown");
                }
                _ => {}
            }
        }
        forget_if_terminal(registry, client_id);
    }

    fn on_poll_found(
        &self,
        registry: &mut InFlightOrderRegistry,
        client_id: &ClientOrderId,
        snapshot: OrderSnapshot,
        events: &mut Vec<ConnectorEvent>,
    ) -> Result<(), ProtocolViolation> {
        bind(registry, client_id, snapshot.exchange_id.as_ref())?;

        if let Some(order) = registry.get_mut(client_id) {
            order.not_found_count = 0;
            acknowledge(order, events, snapshot.ts);

            for trade in &snapshot.trades {
                let duplicate = trade
                    .trade_id
                    .as_ref()
                    .is_some_and(|trade_id| order.has_seen_trade(trade_id));
                if !duplicate {
                    self.apply_fill(order, trade, events);
                }
            }
            if let Some(cum_base) = snapshot.filled_base {
                self.apply_cumulative(order, cum_base, snapshot.filled_quote, events, snapshot.ts);
            }
            if let Some(fee) = &snapshot.fee {
                // Authoritative aggregate replaces any estimate.
                order.fee_paid = fee.amount;
            }

            match snapshot.status {
                OrderSnapshotStatus::New => {}
                OrderSnapshotStatus::PartiallyFilled => {
                    if order.state == OrderState::Open {
                        order.state = OrderState::PartiallyFilled;
                    }
                }
                OrderSnapshotStatus::Filled => done(order, events, snapshot.ts),
                OrderSnapshotStatus::Cancelled => cancel_or_done(order, events, snapshot.ts),
                OrderSnapshotStatus::Rejected => fail(
                    order,
                    RejectReason::Venue(SmolStr::new("rejected")),
                    events,
                    snapshot.ts,
                ),
            }
        }
        forget_if_terminal(registry, client_id);
        Ok(())
    }

    /// Apply one non-duplicate fill, clamping at the original quantity.
    fn apply_fill(
        &self,
        order: &mut InFlightOrder,
        fill: &TradeFill,
        events: &mut Vec<ConnectorEvent>,
    ) {
        let remaining = order.remaining();
        if remaining <= Decimal::ZERO {
            return;
        }
        let base_qty = if fill.base_qty > remaining {
            warn!(
                client_id = %order.client_id,
                reported = %fill.base_qty,
                %remaining,
                "fill exceeds remaining quantity, clamping"
            );
            remaining
        } else {
            fill.base_qty
        };
        if base_qty <= Decimal::ZERO {
            return;
        }
        let quote_qty = if base_qty == fill.base_qty {
            fill.quote_qty
        } else {
            base_qty * fill.price
        };

        order.filled_base += base_qty;
        order.filled_quote += quote_qty;

        let is_maker = fill.is_maker.unwrap_or(order.kind != OrderType::Market);
        let fee = match &fill.fee {
            Some(fee) => {
                match self.fee_semantics {
                    FeeSemantics::Delta => order.fee_paid += fee.amount,
                    FeeSemantics::Cumulative => order.fee_paid = fee.amount,
                }
                fee.clone()
            }
            None => {
                let estimate = self
                    .fee_rates
                    .estimate(&order.symbol, base_qty, fill.price, is_maker);
                order.fee_paid += estimate.amount;
                estimate
            }
        };

        if let Some(trade_id) = &fill.trade_id {
            order.mark_trade_seen(trade_id.clone());
        }
        if !order.state.is_terminal() && order.filled_base < order.original_quantity {
            order.state = OrderState::PartiallyFilled;
        }

        events.push(ConnectorEvent::OrderFilled(OrderFilled {
            client_id: order.client_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            fill: TradeFill {
                trade_id: fill.trade_id.clone(),
                price: fill.price,
                base_qty,
                quote_qty,
                fee: Some(fee),
                is_maker: fill.is_maker,
                ts: fill.ts,
            },
            ts: fill.ts,
        }));
    }

    /// Reconcile a cumulative filled quantity against local progress; any
    /// positive residual becomes one synthetic fill. Regressions are ignored
    /// (the more-advanced side wins).
    fn apply_cumulative(
        &self,
        order: &mut InFlightOrder,
        cum_base: Decimal,
        cum_quote: Option<Decimal>,
        events: &mut Vec<ConnectorEvent>,
        ts: DateTime<Utc>,
    ) {
        let cum_base = cum_base.min(order.original_quantity);
        if cum_base <= order.filled_base {
            return;
        }
        let delta_base = cum_base - order.filled_base;
        let price = order.original_price.unwrap_or_else(|| {
            if order.filled_base > Decimal::ZERO {
                order.filled_quote / order.filled_base
            } else {
                Decimal::ZERO
            }
        });
        let delta_quote = match cum_quote {
            Some(cum_quote) if cum_quote > order.filled_quote => cum_quote - order.filled_quote,
            _ => delta_base * price,
        };
        let synthetic = TradeFill {
            trade_id: None,
            price,
            base_qty: delta_base,
            quote_qty: delta_quote,
            fee: None,
            is_maker: None,
            ts,
        };
        self.apply_fill(order, &synthetic, events);
    }
}

fn on_submit_ack(
    registry: &mut InFlightOrderRegistry,
    client_id: &ClientOrderId,
    exchange_id: Option<&ExchangeOrderId>,
    ts: DateTime<Utc>,
    events: &mut Vec<ConnectorEvent>,
) -> Result<(), ProtocolViolation> {
    if !ingest_allowed(registry, client_id, "submit_ack") {
        return Ok(());
    }
    bind(registry, client_id, exchange_id)?;

    if let Some(order) = registry.get_mut(client_id) {
        if order.exchange_id.is_some() {
            acknowledge(order, events, ts);
        } else {
            // No exchange id means the venue has not committed to the
            // order; it stays Pending until reconciliation finds it.
            debug!(%client_id, "submit_ack without exchange id, order stays pending");
        }
    }
    Ok(())
}

fn on_submit_reject(
    registry: &mut InFlightOrderRegistry,
    client_id: &ClientOrderId,
    reason: RejectReason,
    now: DateTime<Utc>,
    events: &mut Vec<ConnectorEvent>,
) {
    if !ingest_allowed(registry, client_id, "submit_reject") {
        return;
    }
    if let Some(order) = registry.get_mut(client_id) {
        info!(%client_id, %reason, "order rejected by venue");
        fail(order, reason, events, now);
    }
    forget_if_terminal(registry, client_id);
}

fn on_submit_timeout(registry: &mut InFlightOrderRegistry, client_id: &ClientOrderId) {
    if !ingest_allowed(registry, client_id, "submit_timeout") {
        return;
    }
    if let Some(order) = registry.get_mut(client_id) {
        if order.state == OrderState::Pending {
            order.state = OrderState::Indeterminate;
            warn!(%client_id, "submission outcome unknown, awaiting reconciliation");
        }
    }
}

fn on_cancel_ack(
    registry: &mut InFlightOrderRegistry,
    client_id: &ClientOrderId,
    ts: DateTime<Utc>,
    events: &mut Vec<ConnectorEvent>,
) {
    if !ingest_allowed(registry, client_id, "cancel_ack") {
        return;
    }
    if let Some(order) = registry.get_mut(client_id) {
        cancel_or_done(order, events, ts);
    }
    forget_if_terminal(registry, client_id);
}

fn on_local_expire(
    registry: &mut InFlightOrderRegistry,
    client_id: &ClientOrderId,
    now: DateTime<Utc>,
    events: &mut Vec<ConnectorEvent>,
) {
    if !ingest_allowed(registry, client_id, "local_expire") {
        return;
    }
    if let Some(order) = registry.get_mut(client_id) {
        info!(%client_id, "order exceeded local expiry, cancelling locally");
        cancel_or_done(order, events, now);
    }
    forget_if_terminal(registry, client_id);
}

/// Common guards: untracked, quarantined or terminal orders accept no
/// further events.
fn ingest_allowed(
    registry: &InFlightOrderRegistry,
    client_id: &ClientOrderId,
    kind: &'static str,
) -> bool {
    match registry.get(client_id) {
        None => {
            debug!(%client_id, kind, "event for untracked order, dropped");
            false
        }
        Some(order) if order.quarantined => {
            warn!(%client_id, kind, "event for quarantined order, refused");
            false
        }
        Some(order) if order.is_terminal() => {
            debug!(%client_id, kind, state = %order.state, "event for terminal order, dropped");
            false
        }
        Some(_) => true,
    }
}

/// Bind an exchange id if one was supplied; a rebind with a different id
/// quarantines the order and propagates the violation.
fn bind(
    registry: &mut InFlightOrderRegistry,
    client_id: &ClientOrderId,
    exchange_id: Option<&ExchangeOrderId>,
) -> Result<(), ProtocolViolation> {
    let Some(exchange_id) = exchange_id else {
        return Ok(());
    };
    match registry.bind_exchange_id(client_id, exchange_id) {
        Ok(_) => Ok(()),
        Err(RegistryError::Violation(violation)) => {
            if let Some(order) = registry.get_mut(client_id) {
                order.quarantined = true;
            }
            Err(violation)
        }
        Err(error) => {
            warn!(%client_id, %error, "exchange id bind failed");
            Ok(())
        }
    }
}

/// Terminal via cancellation, unless fills already completed the order -
/// then `Done` dominates.
fn cancel_or_done(order: &mut InFlightOrder, events: &mut Vec<ConnectorEvent>, ts: DateTime<Utc>) {
    if order.original_quantity > Decimal::ZERO && order.filled_base >= order.original_quantity {
        done(order, events, ts);
    } else {
        cancelled(order, events, ts);
    }
}

/// First venue acknowledgement: move out of `Pending`/`Indeterminate` and
/// emit the (possibly deferred) `OrderCreated`.
fn acknowledge(order: &mut InFlightOrder, events: &mut Vec<ConnectorEvent>, ts: DateTime<Utc>) {
    if matches!(order.state, OrderState::Pending | OrderState::Indeterminate) {
        order.state = OrderState::Open;
        order.not_found_count = 0;
        events.push(ConnectorEvent::OrderCreated(OrderCreated {
            client_id: order.client_id.clone(),
            exchange_id: order.exchange_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            quantity: order.original_quantity,
            price: order.original_price,
            ts,
        }));
    }
}

fn done(order: &mut InFlightOrder, events: &mut Vec<ConnectorEvent>, ts: DateTime<Utc>) {
    if order.state.is_terminal() {
        return;
    }
    order.state = OrderState::Done;
    info!(
        client_id = %order.client_id,
        filled_base = %order.filled_base,
        filled_quote = %order.filled_quote,
        "order done"
    );
    events.push(ConnectorEvent::OrderDone(OrderDone {
        client_id: order.client_id.clone(),
        exchange_id: order.exchange_id.clone(),
        symbol: order.symbol.clone(),
        side: order.side,
        filled_base: order.filled_base,
        filled_quote: order.filled_quote,
        fee_paid: order.fee_paid,
        ts,
    }));
}

fn cancelled(order: &mut InFlightOrder, events: &mut Vec<ConnectorEvent>, ts: DateTime<Utc>) {
    if order.state.is_terminal() {
        return;
    }
    order.state = OrderState::Cancelled;
    info!(client_id = %order.client_id, "order cancelled");
    events.push(ConnectorEvent::OrderCancelled(OrderCancelled {
        client_id: order.client_id.clone(),
        exchange_id: order.exchange_id.clone(),
        symbol: order.symbol.clone(),
        ts,
    }));
}

fn fail(
    order: &mut InFlightOrder,
    reason: RejectReason,
    events: &mut Vec<ConnectorEvent>,
    ts: DateTime<Utc>,
) {
    if order.state.is_terminal() {
        return;
    }
    order.state = OrderState::Failed;
    events.push(ConnectorEvent::OrderFailure(OrderFailure {
        client_id: order.client_id.clone(),
        symbol: order.symbol.clone(),
        reason,
        ts,
    }));
}

/// Terminal orders leave the registry once their terminal event is queued.
fn forget_if_terminal(registry: &mut InFlightOrderRegistry, client_id: &ClientOrderId) {
    let terminal = registry
        .get(client_id)
        .is_some_and(InFlightOrder::is_terminal);
    if terminal {
        let _ = registry.forget(client_id);
    }
}
