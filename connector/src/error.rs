//! Error taxonomy for the connector runtime.
//!
//! Three layers, from the wire up:
//!
//! * [`ApiError`] - classification of a failed venue REST call; drives the
//!   executor's retry policy and the lifecycle's indeterminate handling.
//! * [`RejectReason`] - structured reason a venue (or local validation)
//!   refused an order. Closed enum: no string sentinels in lifecycle paths.
//! * [`ConnectorError`] - what strategy-facing calls return.
//!
//! Per-order failures never halt the connector; [`ProtocolViolation`] and
//! auth failures do escalate (the connector marks itself not-ready).

use crate::order::{ClientOrderId, ExchangeOrderId};
use jacana_integration::TransportError;
use jacana_markets::Symbol;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Structured reason an order was refused.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum RejectReason {
    /// A `limit_maker` order would have crossed the spread.
    PostOnlyViolation,
    /// `size * price` below the venue's minimum notional.
    MinNotional,
    /// Price or size not aligned to the venue's tick.
    TickSize,
    /// Size below the venue's minimum order size.
    MinOrderSize,
    /// Account balance insufficient to fund the order.
    InsufficientBalance,
    /// Symbol absent from the trading-rule cache.
    UnknownSymbol,
    /// Symbol exists but trading is suspended.
    MarketOffline,
    /// Submission never acknowledged and reconciliation found no trace.
    NeverAcknowledged,
    /// Venue refused the credentials.
    Unauthorized,
    /// Venue-specific rejection code, preserved verbatim.
    Venue(SmolStr),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::PostOnlyViolation => write!(f, "post_only_violation"),
            RejectReason::MinNotional => write!(f, "min_notional"),
            RejectReason::TickSize => write!(f, "tick_size"),
            RejectReason::MinOrderSize => write!(f, "min_order_size"),
            RejectReason::InsufficientBalance => write!(f, "insufficient_balance"),
            RejectReason::UnknownSymbol => write!(f, "unknown_symbol"),
            RejectReason::MarketOffline => write!(f, "market_offline"),
            RejectReason::NeverAcknowledged => write!(f, "never_acknowledged"),
            RejectReason::Unauthorized => write!(f, "unauthorized"),
            RejectReason::Venue(code) => write!(f, "venue:{code}"),
        }
    }
}

/// Classified outcome of a failed venue REST call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Timeout, connection reset, 5xx. Retryable.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// HTTP 2xx with an unparsable body. Retried like a transient failure
    /// but logged distinctly - it usually means the venue changed its schema.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Venue signalled it does not know the order.
    #[error("order not found")]
    NotFound,

    /// Cancel issued against an order the venue deems completed or cancelled.
    #[error("order already closed")]
    AlreadyClosed,

    /// Venue rate limit hit. Retryable with backoff.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials refused. Non-retryable; escalates to the strategy.
    #[error("authentication failure: {0}")]
    AuthFailure(String),

    /// Venue understood and refused the request.
    #[error("rejected by venue: {0}")]
    Rejected(RejectReason),
}

impl ApiError {
    /// True if the executor's retry loop may re-issue the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::TransientNetwork(_)
                | ApiError::MalformedResponse(_)
                | ApiError::RateLimited { .. }
        )
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Network(detail) => ApiError::TransientNetwork(detail),
            TransportError::Timeout(timeout) => {
                ApiError::TransientNetwork(format!("timed out after {timeout:?}"))
            }
            TransportError::WebSocket(detail) => ApiError::TransientNetwork(detail),
            // Build and signing failures cannot succeed on retry.
            TransportError::BuildRequest(detail) | TransportError::Serialisation(detail) => {
                ApiError::AuthFailure(detail)
            }
        }
    }
}

/// Attempt to bind a second, different exchange id to an order.
///
/// This is a protocol invariant violation: ingest halts for the offending
/// order (it is quarantined) and the error surfaces to the strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("exchange id rebound for {client_id}: bound {bound}, incoming {incoming}")]
pub struct ProtocolViolation {
    pub client_id: ClientOrderId,
    pub bound: ExchangeOrderId,
    pub incoming: ExchangeOrderId,
}

/// Errors returned by strategy-facing connector calls.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// No trading rule cached for the symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),

    /// Local pre-trade validation refused the order.
    #[error("order violates trading rule for {symbol}: {reason}")]
    RuleViolation { symbol: Symbol, reason: RejectReason },

    /// Limit-flavoured intent without a price.
    #[error("price required for limit orders")]
    MissingPrice,

    /// The connector is stopped, halted, or not yet started.
    #[error("connector is not ready")]
    NotReady,

    /// The connector task has shut down.
    #[error("connector task unavailable")]
    ChannelClosed,

    /// Protocol invariant violation (see [`ProtocolViolation`]).
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// A persisted registry snapshot could not be restored.
    #[error("snapshot restore failed: {0}")]
    Restore(String),

    /// A venue call failed after exhausting its retry budget.
    #[error(transparent)]
    Api(#[from] ApiError),
}
