//! Typed domain events and the strategy-facing event bus.
//!
//! Events are emitted synchronously on the connector task, after the state
//! mutation that caused them has committed. Subscribers receive immutable
//! snapshots and must not perform blocking work inline.

use crate::error::RejectReason;
use crate::order::{ClientOrderId, ExchangeOrderId, OrderType, TradeFill};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use jacana_markets::{Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// First venue acknowledgement of an order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderCreated {
    pub client_id: ClientOrderId,
    pub exchange_id: Option<ExchangeOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub ts: DateTime<Utc>,
}

/// One execution (or execution delta) against an order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderFilled {
    pub client_id: ClientOrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub fill: TradeFill,
    pub ts: DateTime<Utc>,
}

/// Order fully filled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderDone {
    pub client_id: ClientOrderId,
    pub exchange_id: Option<ExchangeOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub filled_base: Decimal,
    pub filled_quote: Decimal,
    pub fee_paid: Decimal,
    pub ts: DateTime<Utc>,
}

/// Order cancelled (by request, expiry, or the venue).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderCancelled {
    pub client_id: ClientOrderId,
    pub exchange_id: Option<ExchangeOrderId>,
    pub symbol: Symbol,
    pub ts: DateTime<Utc>,
}

/// Order failed without ever becoming open (reject, never acknowledged).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderFailure {
    pub client_id: ClientOrderId,
    pub symbol: Symbol,
    pub reason: RejectReason,
    pub ts: DateTime<Utc>,
}

/// Infrastructure failure the strategy should know about (exhausted retry
/// budget, credential problems). Not tied to an order transition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransactionFailure {
    pub client_id: Option<ClientOrderId>,
    pub detail: String,
    pub ts: DateTime<Utc>,
}

/// Every event the connector emits toward strategies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum ConnectorEvent {
    OrderCreated(OrderCreated),
    OrderFilled(OrderFilled),
    OrderDone(OrderDone),
    OrderCancelled(OrderCancelled),
    OrderFailure(OrderFailure),
    TransactionFailure(TransactionFailure),
}

impl ConnectorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectorEvent::OrderCreated(_) => EventKind::OrderCreated,
            ConnectorEvent::OrderFilled(_) => EventKind::OrderFilled,
            ConnectorEvent::OrderDone(_) => EventKind::OrderDone,
            ConnectorEvent::OrderCancelled(_) => EventKind::OrderCancelled,
            ConnectorEvent::OrderFailure(_) => EventKind::OrderFailure,
            ConnectorEvent::TransactionFailure(_) => EventKind::TransactionFailure,
        }
    }

    /// The order this event concerns, when there is one.
    pub fn client_id(&self) -> Option<&ClientOrderId> {
        match self {
            ConnectorEvent::OrderCreated(e) => Some(&e.client_id),
            ConnectorEvent::OrderFilled(e) => Some(&e.client_id),
            ConnectorEvent::OrderDone(e) => Some(&e.client_id),
            ConnectorEvent::OrderCancelled(e) => Some(&e.client_id),
            ConnectorEvent::OrderFailure(e) => Some(&e.client_id),
            ConnectorEvent::TransactionFailure(e) => e.client_id.as_ref(),
        }
    }
}

/// Event kinds strategies can subscribe to individually.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum EventKind {
    OrderCreated,
    OrderFilled,
    OrderDone,
    OrderCancelled,
    OrderFailure,
    TransactionFailure,
}

type Handler = Box<dyn Fn(&ConnectorEvent) + Send + Sync>;

/// Dispatches typed events to subscribed handlers.
///
/// Dispatch is synchronous on the caller (the connector task); handlers run
/// to completion before the next lifecycle message is processed.
#[derive(Default)]
pub struct EventBus {
    handlers: parking_lot::Mutex<FnvHashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&ConnectorEvent) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Dispatch an event to its kind's subscribers.
    pub fn emit(&self, event: &ConnectorEvent) {
        let handlers = self.handlers.lock();
        if let Some(subscribed) = handlers.get(&event.kind()) {
            for handler in subscribed {
                handler(event);
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        let mut dbg = f.debug_struct("EventBus");
        for (kind, subscribed) in handlers.iter() {
            dbg.field(&format!("{kind:?}"), &subscribed.len());
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failure_event() -> ConnectorEvent {
        ConnectorEvent::TransactionFailure(TransactionFailure {
            client_id: None,
            detail: "boom".to_string(),
            ts: Utc::now(),
        })
    }

    #[test]
    fn dispatches_to_matching_kind_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        bus.subscribe(EventKind::TransactionFailure, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(EventKind::OrderCreated, |_| panic!("wrong kind"));

        bus.emit(&failure_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multiple_handlers_all_fire() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&hits);
            bus.subscribe(EventKind::TransactionFailure, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.emit(&failure_event());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
