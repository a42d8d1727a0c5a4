//! Order model: intents, in-flight entities, and the lifecycle state set.

use crate::rules::FeeSchedule;
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use jacana_markets::{Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

pub mod registry;

/// Locally generated order identifier; stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ClientOrderId(pub SmolStr);

impl ClientOrderId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Venue-assigned order identifier; bound once, never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ExchangeOrderId(pub SmolStr);

impl ExchangeOrderId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Venue-assigned identifier of a single execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct TradeId(pub SmolStr);

impl TradeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order flavour supported by the runtime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OrderType {
    Limit,
    /// Limit order that must not cross the spread (post-only).
    LimitMaker,
    Market,
}

impl OrderType {
    pub fn is_limit(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::LimitMaker)
    }
}

/// What a strategy asks the connector to do.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderIntent {
    pub client_id: ClientOrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderType,
    pub quantity: Decimal,
    /// Required for limit flavours, absent for market orders.
    pub price: Option<Decimal>,
}

/// Lifecycle state of a tracked order.
///
/// ```text
/// Pending ──submit_ack(exchange_id)──▶ Open
/// Pending ──submit_reject──▶ Failed (terminal)
/// Pending ──submit_timeout──▶ Indeterminate
/// Indeterminate ──reconcile_found──▶ Open | PartiallyFilled | Done | Cancelled
/// Indeterminate ──reconcile_not_found_after_grace──▶ Failed
/// Open ──partial_fill──▶ PartiallyFilled
/// Open | PartiallyFilled ──full_fill──▶ Done (terminal)
/// Open | PartiallyFilled ──cancel_ack | expire──▶ Cancelled (terminal)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OrderState {
    /// Submitted locally; venue acknowledgement outstanding.
    Pending,
    /// Submission outcome unknown (transport failure mid-flight); awaiting
    /// reconciliation.
    Indeterminate,
    /// Acknowledged by the venue, no fills yet.
    Open,
    /// At least one fill received, quantity remaining.
    PartiallyFilled,
    /// Fully filled. Terminal.
    Done,
    /// Cancelled (by request, expiry, or venue). Terminal.
    Cancelled,
    /// Rejected or never acknowledged. Terminal.
    Failed,
}

impl OrderState {
    /// True once no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Done | OrderState::Cancelled | OrderState::Failed)
    }

    /// True for states the venue considers working.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderState::Open | OrderState::PartiallyFilled)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderState::Pending => "Pending",
            OrderState::Indeterminate => "Indeterminate",
            OrderState::Open => "Open",
            OrderState::PartiallyFilled => "PartiallyFilled",
            OrderState::Done => "Done",
            OrderState::Cancelled => "Cancelled",
            OrderState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// A single execution against an order.
///
/// `trade_id` is `None` for synthetic fills derived from a cumulative
/// quantity delta (poll snapshots that itemise no trades); such fills carry
/// no dedup key and are emitted at most once per observed delta.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TradeFill {
    pub trade_id: Option<TradeId>,
    pub price: Decimal,
    pub base_qty: Decimal,
    pub quote_qty: Decimal,
    /// Venue-reported fee, absent when the venue does not return one.
    pub fee: Option<FeeSchedule>,
    pub is_maker: Option<bool>,
    pub ts: DateTime<Utc>,
}

/// A not-yet-terminal order owned by the
/// [`InFlightOrderRegistry`](registry::InFlightOrderRegistry).
///
/// Intent fields are immutable after creation; progress fields are
/// monotone-nondecreasing; once `state` is terminal no further mutation is
/// accepted. Serialises in full (including `trade_ids_seen`) so a registry
/// snapshot survives process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InFlightOrder {
    pub client_id: ClientOrderId,
    pub exchange_id: Option<ExchangeOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderType,
    pub original_quantity: Decimal,
    pub original_price: Option<Decimal>,
    pub creation_ts: DateTime<Utc>,
    pub state: OrderState,
    pub filled_base: Decimal,
    pub filled_quote: Decimal,
    pub fee_paid: Decimal,
    /// Consecutive not-found polls while unacknowledged.
    pub not_found_count: u32,
    /// Set on protocol violation; further ingest for this order is refused.
    pub quarantined: bool,
    trade_ids_seen: FnvHashSet<TradeId>,
}

impl InFlightOrder {
    pub fn from_intent(intent: &OrderIntent, now: DateTime<Utc>) -> Self {
        Self {
            client_id: intent.client_id.clone(),
            exchange_id: None,
            symbol: intent.symbol.clone(),
            side: intent.side,
            kind: intent.kind,
            original_quantity: intent.quantity,
            original_price: intent.price,
            creation_ts: now,
            state: OrderState::Pending,
            filled_base: Decimal::ZERO,
            filled_quote: Decimal::ZERO,
            fee_paid: Decimal::ZERO,
            not_found_count: 0,
            quarantined: false,
            trade_ids_seen: FnvHashSet::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Base quantity still unfilled.
    pub fn remaining(&self) -> Decimal {
        self.original_quantity - self.filled_base
    }

    /// True if this trade id has already been applied.
    pub fn has_seen_trade(&self, trade_id: &TradeId) -> bool {
        self.trade_ids_seen.contains(trade_id)
    }

    /// Record a trade id so replays of the same execution are no-ops.
    pub(crate) fn mark_trade_seen(&mut self, trade_id: TradeId) {
        self.trade_ids_seen.insert(trade_id);
    }

    /// How long the order has existed.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.creation_ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent() -> OrderIntent {
        OrderIntent {
            client_id: ClientOrderId::new("jcn-1"),
            symbol: Symbol::new("btc", "usdt"),
            side: Side::Buy,
            kind: OrderType::Limit,
            quantity: dec!(0.01),
            price: Some(dec!(30000)),
        }
    }

    #[test]
    fn new_order_starts_pending() {
        let order = InFlightOrder::from_intent(&intent(), Utc::now());
        assert_eq!(order.state, OrderState::Pending);
        assert_eq!(order.filled_base, Decimal::ZERO);
        assert!(!order.is_terminal());
        assert_eq!(order.remaining(), dec!(0.01));
    }

    #[test]
    fn terminal_states() {
        assert!(OrderState::Done.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(!OrderState::Indeterminate.is_terminal());
        assert!(!OrderState::PartiallyFilled.is_terminal());
    }

    #[test]
    fn order_serialises_with_trade_ids() {
        let mut order = InFlightOrder::from_intent(&intent(), Utc::now());
        order.mark_trade_seen(TradeId::new("42"));

        let bytes = serde_json::to_vec(&order).unwrap();
        let restored: InFlightOrder = serde_json::from_slice(&bytes).unwrap();
        assert!(restored.has_seen_trade(&TradeId::new("42")));
        assert_eq!(restored, order);
    }
}
