//! Venue adapter seam.
//!
//! A [`VenueAdapter`] is everything venue-specific, expressed as pure
//! request-building and response-parsing functions: symbol codec, REST
//! payloads, signing, stream decoding, fee semantics. The connector core is
//! identical across venues; new venues implement this trait and nothing
//! else.

use crate::error::{ApiError, RejectReason};
use crate::ledger::AssetBalance;
use crate::order::{ClientOrderId, ExchangeOrderId, OrderIntent, TradeFill};
use crate::rules::{FeeRates, TradingRule};
use chrono::{DateTime, Utc};
use jacana_integration::http::{HttpRequest, HttpResponse};
use jacana_integration::TransportError;
use jacana_markets::{Symbol, VenueId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub mod hitbtc;
pub mod mock;

/// Outcome of an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum SubmitOutcome {
    /// Venue accepted the order. `exchange_id` may still be absent; the
    /// order stays `Pending` until one is bound.
    Accepted {
        exchange_id: Option<ExchangeOrderId>,
        ts: DateTime<Utc>,
    },
    /// Venue understood and refused the order.
    Rejected(RejectReason),
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum CancelOutcome {
    /// Venue acknowledged the cancel.
    Cancelled,
    /// Order already completed or cancelled; treated as success.
    AlreadyClosed,
    /// Venue does not know the order; treated as success (reconciliation
    /// settles the local record).
    NotFound,
}

/// Venue's view of an order's status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum OrderSnapshotStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Authoritative order state returned by a venue query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderSnapshot {
    pub client_id: Option<ClientOrderId>,
    pub exchange_id: Option<ExchangeOrderId>,
    pub symbol: Option<Symbol>,
    pub status: OrderSnapshotStatus,
    /// Cumulative filled base quantity.
    pub filled_base: Option<Decimal>,
    /// Cumulative filled quote quantity.
    pub filled_quote: Option<Decimal>,
    /// Itemised executions, when the venue returns them on queries.
    pub trades: Vec<TradeFill>,
    /// Authoritative aggregate fee; replaces any estimate.
    pub fee: Option<crate::rules::FeeSchedule>,
    pub ts: DateTime<Utc>,
}

/// Outcome of a single-order query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum QueryOutcome {
    Found(OrderSnapshot),
    NotFound,
}

/// Order status change delivered on the user stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderUpdateEvent {
    pub client_id: Option<ClientOrderId>,
    pub exchange_id: Option<ExchangeOrderId>,
    pub status: OrderSnapshotStatus,
    /// Cumulative filled base quantity, when the venue includes it.
    pub filled_base: Option<Decimal>,
    pub ts: DateTime<Utc>,
}

/// Execution delivered on the user stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionEvent {
    pub client_id: Option<ClientOrderId>,
    pub exchange_id: Option<ExchangeOrderId>,
    pub fill: TradeFill,
    /// Venue-reported status accompanying the execution, when present.
    pub status: Option<OrderSnapshotStatus>,
}

/// A typed event decoded from one raw stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Balance(AssetBalance),
    OrderUpdate(OrderUpdateEvent),
    Execution(ExecutionEvent),
    /// Frame on a channel the connector does not consume.
    Ignored { channel: SmolStr },
}

/// How a venue reports fees on fill events.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FeeSemantics {
    /// Each fill event carries the fee for that fill only.
    Delta,
    /// Each fill event carries the cumulative fee for the order so far.
    Cumulative,
}

/// Everything venue-specific, as pure functions.
pub trait VenueAdapter: Send + Sync + 'static {
    fn venue(&self) -> VenueId;

    /// Normalised pair -> venue string, eg/ `btc/usdt -> "BTCUSDT"`.
    fn encode_symbol(&self, symbol: &Symbol) -> SmolStr;

    /// Venue string -> normalised pair.
    fn decode_symbol(&self, raw: &str) -> Result<Symbol, ApiError>;

    fn place_request(&self, intent: &OrderIntent) -> HttpRequest;
    fn cancel_request(
        &self,
        client_id: &ClientOrderId,
        exchange_id: Option<&ExchangeOrderId>,
    ) -> HttpRequest;
    fn query_order_request(
        &self,
        client_id: &ClientOrderId,
        exchange_id: Option<&ExchangeOrderId>,
    ) -> HttpRequest;
    fn open_orders_request(&self) -> HttpRequest;
    fn balances_request(&self) -> HttpRequest;
    fn trading_rules_request(&self) -> HttpRequest;

    /// Sign a request in place. `nonce` is supplied for trade calls when
    /// [`Self::uses_nonce`] is true, `None` otherwise.
    fn sign(&self, request: &mut HttpRequest, nonce: Option<u64>) -> Result<(), TransportError>;

    /// True when the venue's signature scheme includes a monotonic nonce.
    /// Nonce-bearing calls are serialised so the venue receives them in
    /// issuance order.
    fn uses_nonce(&self) -> bool {
        false
    }

    fn parse_submit(&self, response: &HttpResponse) -> Result<SubmitOutcome, ApiError>;
    fn parse_cancel(&self, response: &HttpResponse) -> Result<CancelOutcome, ApiError>;
    fn parse_order_snapshot(&self, response: &HttpResponse) -> Result<QueryOutcome, ApiError>;
    fn parse_open_orders(&self, response: &HttpResponse) -> Result<Vec<OrderSnapshot>, ApiError>;
    fn parse_balances(&self, response: &HttpResponse) -> Result<Vec<AssetBalance>, ApiError>;
    fn parse_trading_rules(&self, response: &HttpResponse) -> Result<Vec<TradingRule>, ApiError>;

    /// Classify a non-2xx response into the error taxonomy.
    fn classify_error(&self, response: &HttpResponse) -> ApiError;

    /// Messages to send after the stream connects (auth, subscriptions).
    fn stream_subscriptions(&self) -> Vec<String>;

    /// Decode one raw stream frame.
    fn parse_stream(&self, raw: &str) -> Result<StreamEvent, ApiError>;

    /// Static maker/taker rates used to estimate fees when the venue does
    /// not report them on fills.
    fn fee_rates(&self) -> FeeRates;

    /// Whether fill-event fees are per-fill deltas or cumulative.
    fn fee_semantics(&self) -> FeeSemantics {
        FeeSemantics::Delta
    }
}

/// Shared helper: map an HTTP status with no better venue-specific
/// information into the error taxonomy.
pub fn classify_status(status: u16, body: &str) -> ApiError {
    match status {
        401 | 403 => ApiError::AuthFailure(format!("status {status}: {body}")),
        404 => ApiError::NotFound,
        429 => ApiError::RateLimited { retry_after: None },
        500..=599 => ApiError::TransientNetwork(format!("status {status}")),
        _ => ApiError::Rejected(RejectReason::Venue(SmolStr::new(format!("status_{status}")))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_maps_taxonomy() {
        assert!(matches!(classify_status(401, ""), ApiError::AuthFailure(_)));
        assert!(matches!(classify_status(404, ""), ApiError::NotFound));
        assert!(matches!(
            classify_status(429, ""),
            ApiError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(503, ""),
            ApiError::TransientNetwork(_)
        ));
        assert!(matches!(classify_status(400, ""), ApiError::Rejected(_)));
    }
}
