//! In-memory venue for tests and wiring checks.
//!
//! [`MockVenueAdapter`] speaks a small JSON dialect over programmable
//! in-memory transports, exercising the full adapter surface: HMAC signing
//! with a nonce, submit/cancel/query parsing, trading rules, balances, and
//! the three stream channels. Integration tests script venue behaviour by
//! installing a responder on [`MockHttpTransport`] and pushing frames
//! through a [`MockStreamHandle`].

use crate::error::{ApiError, RejectReason};
use crate::ledger::{AssetBalance, Balance};
use crate::order::{ClientOrderId, ExchangeOrderId, OrderIntent, OrderType, TradeId, TradeFill};
use crate::rules::{FeeRates, FeeSchedule, SymbolStatus, TradingRule};
use crate::venue::{
    classify_status, CancelOutcome, ExecutionEvent, FeeSemantics, OrderSnapshot,
    OrderSnapshotStatus, OrderUpdateEvent, QueryOutcome, StreamEvent, SubmitOutcome, VenueAdapter,
};
use chrono::{DateTime, Utc};
use jacana_integration::http::{EndpointClass, HttpRequest, HttpResponse, HttpTransport, Method};
use jacana_integration::signing::hmac_sha256_hex;
use jacana_integration::websocket::{StreamMessage, StreamTransport};
use jacana_integration::TransportError;
use jacana_markets::{AssetName, Side, Symbol, VenueId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Adapter for the in-memory mock venue. Symbols encode as `BASE-QUOTE`.
#[derive(Debug, Clone)]
pub struct MockVenueAdapter {
    api_key: String,
    api_secret: String,
}

impl MockVenueAdapter {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl Default for MockVenueAdapter {
    fn default() -> Self {
        Self::new("mock-key", "mock-secret")
    }
}

// ---------------------------------------------------------------------------
// Wire models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaceBody {
    client_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    kind: String,
    quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubmitResponse {
    status: String,
    #[serde(default)]
    exchange_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CancelResponse {
    status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireTrade {
    trade_id: String,
    price: Decimal,
    qty: Decimal,
    #[serde(default)]
    fee: Option<Decimal>,
    #[serde(default)]
    is_maker: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireOrder {
    client_id: String,
    #[serde(default)]
    exchange_id: Option<String>,
    symbol: String,
    status: String,
    filled_base: Decimal,
    #[serde(default)]
    filled_quote: Option<Decimal>,
    #[serde(default)]
    trades: Vec<WireTrade>,
    #[serde(default)]
    fee: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireBalance {
    asset: String,
    total: Decimal,
    available: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRule {
    symbol: String,
    min_order_size: Decimal,
    #[serde(default)]
    min_notional: Option<Decimal>,
    price_tick: Decimal,
    size_tick: Decimal,
    #[serde(default = "default_rule_status")]
    status: String,
}

fn default_rule_status() -> String {
    "tradable".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct WireError {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireFrame {
    channel: String,
    #[serde(default)]
    asset: Option<String>,
    #[serde(default)]
    total: Option<Decimal>,
    #[serde(default)]
    available: Option<Decimal>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    exchange_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    filled_base: Option<Decimal>,
    #[serde(default)]
    trade_id: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    qty: Option<Decimal>,
    #[serde(default)]
    fee: Option<Decimal>,
    #[serde(default)]
    is_maker: Option<bool>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn malformed(detail: impl std::fmt::Display) -> ApiError {
    ApiError::MalformedResponse(detail.to_string())
}

fn parse_status(raw: &str) -> Result<OrderSnapshotStatus, ApiError> {
    match raw {
        "new" | "open" => Ok(OrderSnapshotStatus::New),
        "partially_filled" => Ok(OrderSnapshotStatus::PartiallyFilled),
        "filled" => Ok(OrderSnapshotStatus::Filled),
        "cancelled" | "canceled" => Ok(OrderSnapshotStatus::Cancelled),
        "rejected" => Ok(OrderSnapshotStatus::Rejected),
        other => Err(malformed(format!("unknown order status: {other}"))),
    }
}

fn reject_reason(code: &str) -> RejectReason {
    match code {
        "post_only_violation" => RejectReason::PostOnlyViolation,
        "min_notional" => RejectReason::MinNotional,
        "tick_size" => RejectReason::TickSize,
        "min_order_size" => RejectReason::MinOrderSize,
        "insufficient_balance" => RejectReason::InsufficientBalance,
        "unknown_symbol" => RejectReason::UnknownSymbol,
        "market_offline" => RejectReason::MarketOffline,
        other => RejectReason::Venue(SmolStr::new(other)),
    }
}

fn wire_trade_to_fill(trade: &WireTrade, quote: &AssetName, ts: DateTime<Utc>) -> TradeFill {
    TradeFill {
        trade_id: Some(TradeId::new(&trade.trade_id)),
        price: trade.price,
        base_qty: trade.qty,
        quote_qty: trade.qty * trade.price,
        fee: trade.fee.map(|amount| FeeSchedule {
            asset: quote.clone(),
            amount,
        }),
        is_maker: trade.is_maker,
        ts,
    }
}

impl MockVenueAdapter {
    fn order_snapshot(&self, wire: WireOrder) -> Result<OrderSnapshot, ApiError> {
        let symbol = self.decode_symbol(&wire.symbol)?;
        let quote = symbol.quote.clone();
        let ts = Utc::now();
        Ok(OrderSnapshot {
            client_id: Some(ClientOrderId::new(&wire.client_id)),
            exchange_id: wire.exchange_id.as_deref().map(ExchangeOrderId::new),
            status: parse_status(&wire.status)?,
            filled_base: Some(wire.filled_base),
            filled_quote: wire.filled_quote,
            trades: wire
                .trades
                .iter()
                .map(|trade| wire_trade_to_fill(trade, &quote, ts))
                .collect(),
            fee: wire.fee.map(|amount| FeeSchedule {
                asset: quote.clone(),
                amount,
            }),
            symbol: Some(symbol),
            ts,
        })
    }
}

// ---------------------------------------------------------------------------
// VenueAdapter impl
// ---------------------------------------------------------------------------

impl VenueAdapter for MockVenueAdapter {
    fn venue(&self) -> VenueId {
        VenueId::Mock
    }

    fn encode_symbol(&self, symbol: &Symbol) -> SmolStr {
        SmolStr::new(format!(
            "{}-{}",
            symbol.base.as_str().to_uppercase(),
            symbol.quote.as_str().to_uppercase()
        ))
    }

    fn decode_symbol(&self, raw: &str) -> Result<Symbol, ApiError> {
        raw.split_once('-')
            .map(|(base, quote)| Symbol::new(base, quote))
            .ok_or_else(|| malformed(format!("undecodable symbol: {raw}")))
    }

    fn place_request(&self, intent: &OrderIntent) -> HttpRequest {
        let body = PlaceBody {
            client_id: intent.client_id.to_string(),
            symbol: self.encode_symbol(&intent.symbol).to_string(),
            side: match intent.side {
                Side::Buy => "buy".to_string(),
                Side::Sell => "sell".to_string(),
            },
            kind: match intent.kind {
                OrderType::Limit => "limit".to_string(),
                OrderType::LimitMaker => "limit_maker".to_string(),
                OrderType::Market => "market".to_string(),
            },
            quantity: intent.quantity,
            price: intent.price,
        };
        HttpRequest::new(Method::POST, "/orders", EndpointClass::Trade)
            .with_header("Content-Type", "application/json")
            .with_body(serde_json::to_string(&body).unwrap_or_default())
    }

    fn cancel_request(
        &self,
        client_id: &ClientOrderId,
        _exchange_id: Option<&ExchangeOrderId>,
    ) -> HttpRequest {
        HttpRequest::new(
            Method::DELETE,
            format!("/orders/{client_id}"),
            EndpointClass::Trade,
        )
    }

    fn query_order_request(
        &self,
        client_id: &ClientOrderId,
        _exchange_id: Option<&ExchangeOrderId>,
    ) -> HttpRequest {
        HttpRequest::new(
            Method::GET,
            format!("/orders/{client_id}"),
            EndpointClass::Query,
        )
    }

    fn open_orders_request(&self) -> HttpRequest {
        HttpRequest::new(Method::GET, "/orders", EndpointClass::Query)
    }

    fn balances_request(&self) -> HttpRequest {
        HttpRequest::new(Method::GET, "/balances", EndpointClass::Query)
    }

    fn trading_rules_request(&self) -> HttpRequest {
        HttpRequest::new(Method::GET, "/rules", EndpointClass::Rules)
    }

    fn sign(&self, request: &mut HttpRequest, nonce: Option<u64>) -> Result<(), TransportError> {
        let nonce_part = nonce.map(|n| n.to_string()).unwrap_or_default();
        let payload = format!("{} {} {}", request.method, request.path, nonce_part);
        let signature = hmac_sha256_hex(self.api_secret.as_bytes(), payload.as_bytes());
        request
            .headers
            .push(("X-Mock-Key".to_string(), self.api_key.clone()));
        if let Some(nonce) = nonce {
            request
                .headers
                .push(("X-Mock-Nonce".to_string(), nonce.to_string()));
        }
        request
            .headers
            .push(("X-Mock-Signature".to_string(), signature));
        Ok(())
    }

    fn uses_nonce(&self) -> bool {
        true
    }

    fn parse_submit(&self, response: &HttpResponse) -> Result<SubmitOutcome, ApiError> {
        let parsed: SubmitResponse = serde_json::from_slice(&response.body).map_err(malformed)?;
        match parsed.status.as_str() {
            "accepted" => Ok(SubmitOutcome::Accepted {
                exchange_id: parsed.exchange_id.as_deref().map(ExchangeOrderId::new),
                ts: Utc::now(),
            }),
            "rejected" => Ok(SubmitOutcome::Rejected(reject_reason(
                parsed.reason.as_deref().unwrap_or("unspecified"),
            ))),
            other => Err(malformed(format!("unknown submit status: {other}"))),
        }
    }

    fn parse_cancel(&self, response: &HttpResponse) -> Result<CancelOutcome, ApiError> {
        let parsed: CancelResponse = serde_json::from_slice(&response.body).map_err(malformed)?;
        match parsed.status.as_str() {
            "cancelled" | "canceled" => Ok(CancelOutcome::Cancelled),
            "already_closed" => Ok(CancelOutcome::AlreadyClosed),
            "not_found" => Ok(CancelOutcome::NotFound),
            other => Err(malformed(format!("unknown cancel status: {other}"))),
        }
    }

    fn parse_order_snapshot(&self, response: &HttpResponse) -> Result<QueryOutcome, ApiError> {
        let wire: WireOrder = serde_json::from_slice(&response.body).map_err(malformed)?;
        Ok(QueryOutcome::Found(self.order_snapshot(wire)?))
    }

    fn parse_open_orders(&self, response: &HttpResponse) -> Result<Vec<OrderSnapshot>, ApiError> {
        let wire: Vec<WireOrder> = serde_json::from_slice(&response.body).map_err(malformed)?;
        wire.into_iter()
            .map(|order| self.order_snapshot(order))
            .collect()
    }

    fn parse_balances(&self, response: &HttpResponse) -> Result<Vec<AssetBalance>, ApiError> {
        let wire: Vec<WireBalance> = serde_json::from_slice(&response.body).map_err(malformed)?;
        let ts = Utc::now();
        Ok(wire
            .into_iter()
            .map(|balance| {
                AssetBalance::new(
                    AssetName::new(&balance.asset),
                    Balance::new(balance.total, balance.available),
                    ts,
                )
            })
            .collect())
    }

    fn parse_trading_rules(&self, response: &HttpResponse) -> Result<Vec<TradingRule>, ApiError> {
        let wire: Vec<WireRule> = serde_json::from_slice(&response.body).map_err(malformed)?;
        wire.into_iter()
            .map(|rule| {
                Ok(TradingRule {
                    symbol: self.decode_symbol(&rule.symbol)?,
                    min_order_size: rule.min_order_size,
                    min_notional: rule.min_notional,
                    price_tick: rule.price_tick,
                    size_tick: rule.size_tick,
                    status: match rule.status.as_str() {
                        "offline" => SymbolStatus::Offline,
                        _ => SymbolStatus::Tradable,
                    },
                })
            })
            .collect()
    }

    fn classify_error(&self, response: &HttpResponse) -> ApiError {
        let body = String::from_utf8_lossy(&response.body).into_owned();
        if let Ok(WireError { error: Some(code) }) = serde_json::from_slice(&response.body) {
            return match code.as_str() {
                "not_found" => ApiError::NotFound,
                "already_closed" => ApiError::AlreadyClosed,
                "rate_limited" => ApiError::RateLimited { retry_after: None },
                "unauthorized" => ApiError::AuthFailure(body),
                other => ApiError::Rejected(reject_reason(other)),
            };
        }
        classify_status(response.status, &body)
    }

    fn stream_subscriptions(&self) -> Vec<String> {
        vec![
            serde_json::json!({
                "op": "subscribe",
                "channels": ["balance_delta", "order_update", "execution"],
                "key": self.api_key,
            })
            .to_string(),
        ]
    }

    fn parse_stream(&self, raw: &str) -> Result<StreamEvent, ApiError> {
        let frame: WireFrame = serde_json::from_str(raw).map_err(malformed)?;
        match frame.channel.as_str() {
            "balance_delta" => {
                let asset = frame
                    .asset
                    .ok_or_else(|| malformed("balance_delta without asset"))?;
                Ok(StreamEvent::Balance(AssetBalance::new(
                    AssetName::new(&asset),
                    Balance::new(
                        frame.total.unwrap_or_default(),
                        frame.available.unwrap_or_default(),
                    ),
                    Utc::now(),
                )))
            }
            "order_update" => {
                let status = frame
                    .status
                    .as_deref()
                    .ok_or_else(|| malformed("order_update without status"))?;
                Ok(StreamEvent::OrderUpdate(OrderUpdateEvent {
                    client_id: frame.client_id.as_deref().map(ClientOrderId::new),
                    exchange_id: frame.exchange_id.as_deref().map(ExchangeOrderId::new),
                    status: parse_status(status)?,
                    filled_base: frame.filled_base,
                    ts: Utc::now(),
                }))
            }
            "execution" => {
                let price = frame
                    .price
                    .ok_or_else(|| malformed("execution without price"))?;
                let qty = frame.qty.ok_or_else(|| malformed("execution without qty"))?;
                let status = frame.status.as_deref().map(parse_status).transpose()?;
                Ok(StreamEvent::Execution(ExecutionEvent {
                    client_id: frame.client_id.as_deref().map(ClientOrderId::new),
                    exchange_id: frame.exchange_id.as_deref().map(ExchangeOrderId::new),
                    fill: TradeFill {
                        trade_id: frame.trade_id.as_deref().map(TradeId::new),
                        price,
                        base_qty: qty,
                        quote_qty: qty * price,
                        fee: frame.fee.map(|amount| FeeSchedule {
                            // The mock venue charges fees in usdt.
                            asset: AssetName::new("usdt"),
                            amount,
                        }),
                        is_maker: frame.is_maker,
                        ts: Utc::now(),
                    },
                    status,
                }))
            }
            other => Ok(StreamEvent::Ignored {
                channel: SmolStr::new(other),
            }),
        }
    }

    fn fee_rates(&self) -> FeeRates {
        FeeRates {
            maker: Decimal::new(1, 3),
            taker: Decimal::new(2, 3),
        }
    }

    fn fee_semantics(&self) -> FeeSemantics {
        FeeSemantics::Delta
    }
}

// ---------------------------------------------------------------------------
// In-memory transports
// ---------------------------------------------------------------------------

type Responder = dyn FnMut(&HttpRequest) -> Result<HttpResponse, TransportError> + Send;

/// Programmable HTTP transport; records every issued request.
pub struct MockHttpTransport {
    responder: parking_lot::Mutex<Box<Responder>>,
    requests: Arc<parking_lot::Mutex<Vec<HttpRequest>>>,
}

impl MockHttpTransport {
    pub fn new(
        responder: impl FnMut(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + 'static,
    ) -> Self {
        Self {
            responder: parking_lot::Mutex::new(Box::new(responder)),
            requests: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Handle to the recorded request log.
    pub fn requests(&self) -> Arc<parking_lot::Mutex<Vec<HttpRequest>>> {
        Arc::clone(&self.requests)
    }
}

impl std::fmt::Debug for MockHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHttpTransport")
            .field("requests", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl HttpTransport for MockHttpTransport {
    async fn execute(
        &self,
        request: HttpRequest,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        (self.responder.lock())(&request)
    }
}

/// JSON 200 response.
pub fn ok_json(value: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        body: value.to_string().into(),
    }
}

/// JSON error response with the mock venue's `{"error": code}` shape.
pub fn error_json(status: u16, code: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: serde_json::json!({ "error": code }).to_string().into(),
    }
}

/// Scriptable stream transport.
#[derive(Debug)]
pub struct MockStreamTransport {
    rx: mpsc::UnboundedReceiver<StreamMessage>,
    sent: Arc<parking_lot::Mutex<Vec<String>>>,
}

/// Test-side handle feeding frames into a [`MockStreamTransport`].
#[derive(Debug, Clone)]
pub struct MockStreamHandle {
    tx: mpsc::UnboundedSender<StreamMessage>,
    sent: Arc<parking_lot::Mutex<Vec<String>>>,
}

/// Build a connected transport/handle pair.
pub fn mock_stream() -> (MockStreamHandle, MockStreamTransport) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
    (
        MockStreamHandle {
            tx,
            sent: Arc::clone(&sent),
        },
        MockStreamTransport { rx, sent },
    )
}

impl MockStreamHandle {
    /// Push one JSON frame to the consumer.
    pub fn send_json(&self, value: serde_json::Value) {
        let _ = self.tx.send(StreamMessage::Text(value.to_string()));
    }

    /// Simulate a venue-side disconnect.
    pub fn close(&self) {
        let _ = self.tx.send(StreamMessage::Closed);
    }

    /// Subscription payloads the consumer has sent.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl StreamTransport for MockStreamTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_message(&mut self) -> Result<StreamMessage, TransportError> {
        match self.rx.recv().await {
            Some(message) => Ok(message),
            None => Ok(StreamMessage::Closed),
        }
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_codec_round_trips() {
        let adapter = MockVenueAdapter::default();
        let symbol = Symbol::new("btc", "usdt");
        let encoded = adapter.encode_symbol(&symbol);
        assert_eq!(encoded, "BTC-USDT");
        assert_eq!(adapter.decode_symbol(&encoded).unwrap(), symbol);
    }

    #[test]
    fn submit_rejection_maps_reason() {
        let adapter = MockVenueAdapter::default();
        let response = ok_json(serde_json::json!({
            "status": "rejected",
            "reason": "post_only_violation",
        }));
        assert_eq!(
            adapter.parse_submit(&response).unwrap(),
            SubmitOutcome::Rejected(RejectReason::PostOnlyViolation)
        );
    }

    #[test]
    fn unknown_stream_channel_is_ignored() {
        let adapter = MockVenueAdapter::default();
        let event = adapter
            .parse_stream(r#"{"channel": "ticker", "foo": 1}"#)
            .unwrap();
        assert!(matches!(event, StreamEvent::Ignored { .. }));
    }

    #[test]
    fn sign_adds_nonce_and_signature() {
        let adapter = MockVenueAdapter::default();
        let mut request = HttpRequest::new(Method::POST, "/orders", EndpointClass::Trade);
        adapter.sign(&mut request, Some(7)).unwrap();
        let names: Vec<&str> = request.headers.iter().map(|(k, _)| k.as_str()).collect();
        assert!(names.contains(&"X-Mock-Key"));
        assert!(names.contains(&"X-Mock-Nonce"));
        assert!(names.contains(&"X-Mock-Signature"));
    }
}
