//! HitBTC venue adapter (REST API v2, `/api/2/ws` report stream).
//!
//! Authentication is HTTP basic over the API key pair; HitBTC does not sign
//! with a nonce. Order identity on the wire is the `clientOrderId` we
//! generate, which keeps every trading endpoint addressable without waiting
//! for the venue id.

pub mod model;

use crate::config::ConnectorConfig;
use crate::connector::Connector;
use crate::error::{ApiError, RejectReason};
use crate::ledger::{AssetBalance, Balance};
use crate::order::{ClientOrderId, ExchangeOrderId, OrderIntent, OrderType, TradeId, TradeFill};
use crate::rules::{FeeRates, FeeSchedule, SymbolStatus, TradingRule};
use crate::venue::{
    classify_status, CancelOutcome, ExecutionEvent, FeeSemantics, OrderSnapshot,
    OrderSnapshotStatus, OrderUpdateEvent, QueryOutcome, StreamEvent, SubmitOutcome, VenueAdapter,
};
use chrono::Utc;
use fnv::FnvHashMap;
use jacana_integration::http::{EndpointClass, HttpRequest, HttpResponse, Method, ReqwestTransport};
use jacana_integration::signing::basic_auth;
use jacana_integration::websocket::TungsteniteTransport;
use jacana_integration::TransportError;
use jacana_markets::{AssetName, Side, Symbol, VenueId};
use model::{
    HitbtcBalance, HitbtcErrorEnvelope, HitbtcOrder, HitbtcSymbol, HitbtcWsFrame, HitbtcWsReport,
};
use rust_decimal::Decimal;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::debug;

/// REST base URL for the production venue.
pub const REST_URL: &str = "https://api.hitbtc.com";
/// Authenticated websocket endpoint.
pub const WS_URL: &str = "wss://api.hitbtc.com/api/2/ws";

/// Build a production HitBTC connector from a configuration record.
pub fn connector(config: ConnectorConfig) -> Connector<HitbtcAdapter> {
    let adapter = Arc::new(HitbtcAdapter::new(
        config.api_key.clone(),
        config.api_secret.clone(),
        &config.trading_pairs,
    ));
    let http = Arc::new(ReqwestTransport::new(REST_URL));
    let ws_url = url::Url::parse(WS_URL).expect("static websocket url is valid");
    Connector::new(config, adapter, http, Box::new(TungsteniteTransport::new(ws_url)))
}

/// Adapter for HitBTC spot.
#[derive(Debug, Clone)]
pub struct HitbtcAdapter {
    api_key: String,
    api_secret: String,
    /// Venue symbol string -> normalised pair, for the configured pairs.
    by_venue: FnvHashMap<SmolStr, Symbol>,
}

impl HitbtcAdapter {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        trading_pairs: &[Symbol],
    ) -> Self {
        let mut adapter = Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            by_venue: FnvHashMap::default(),
        };
        for symbol in trading_pairs {
            let encoded = adapter.encode_symbol(symbol);
            adapter.by_venue.insert(encoded, symbol.clone());
        }
        adapter
    }

    fn auth_header(&self) -> String {
        basic_auth(&self.api_key, &self.api_secret)
    }

    fn order_snapshot(&self, order: &HitbtcOrder) -> Result<OrderSnapshot, ApiError> {
        Ok(OrderSnapshot {
            client_id: Some(ClientOrderId::new(&order.client_order_id)),
            exchange_id: Some(ExchangeOrderId::new(order.id.to_string())),
            symbol: self.decode_symbol(&order.symbol).ok(),
            status: map_status(&order.status)?,
            filled_base: Some(order.cum_quantity),
            filled_quote: None,
            trades: Vec::new(),
            fee: None,
            ts: order.updated_at.unwrap_or_else(Utc::now),
        })
    }
}

fn map_status(raw: &str) -> Result<OrderSnapshotStatus, ApiError> {
    match raw {
        "new" | "suspended" => Ok(OrderSnapshotStatus::New),
        "partiallyFilled" => Ok(OrderSnapshotStatus::PartiallyFilled),
        "filled" => Ok(OrderSnapshotStatus::Filled),
        "canceled" | "expired" => Ok(OrderSnapshotStatus::Cancelled),
        "rejected" => Ok(OrderSnapshotStatus::Rejected),
        other => Err(ApiError::MalformedResponse(format!(
            "unknown hitbtc order status: {other}"
        ))),
    }
}

fn malformed(detail: impl std::fmt::Display) -> ApiError {
    ApiError::MalformedResponse(detail.to_string())
}

impl VenueAdapter for HitbtcAdapter {
    fn venue(&self) -> VenueId {
        VenueId::Hitbtc
    }

    fn encode_symbol(&self, symbol: &Symbol) -> SmolStr {
        SmolStr::new(format!(
            "{}{}",
            symbol.base.as_str().to_uppercase(),
            symbol.quote.as_str().to_uppercase()
        ))
    }

    fn decode_symbol(&self, raw: &str) -> Result<Symbol, ApiError> {
        // HitBTC concatenates base and quote without a separator, so the
        // reverse mapping only exists for configured pairs.
        self.by_venue
            .get(raw)
            .cloned()
            .ok_or_else(|| ApiError::Rejected(RejectReason::UnknownSymbol))
    }

    fn place_request(&self, intent: &OrderIntent) -> HttpRequest {
        let mut pairs = vec![
            ("clientOrderId".to_string(), intent.client_id.to_string()),
            (
                "symbol".to_string(),
                self.encode_symbol(&intent.symbol).to_string(),
            ),
            (
                "side".to_string(),
                match intent.side {
                    Side::Buy => "buy".to_string(),
                    Side::Sell => "sell".to_string(),
                },
            ),
            (
                "type".to_string(),
                match intent.kind {
                    OrderType::Market => "market".to_string(),
                    OrderType::Limit | OrderType::LimitMaker => "limit".to_string(),
                },
            ),
            ("quantity".to_string(), intent.quantity.to_string()),
        ];
        if let Some(price) = intent.price {
            pairs.push(("price".to_string(), price.to_string()));
            pairs.push(("timeInForce".to_string(), "GTC".to_string()));
        }
        if intent.kind == OrderType::LimitMaker {
            pairs.push(("postOnly".to_string(), "true".to_string()));
        }
        let body = serde_urlencoded::to_string(&pairs).unwrap_or_default();

        HttpRequest::new(Method::POST, "/api/2/order", EndpointClass::Trade)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    fn cancel_request(
        &self,
        client_id: &ClientOrderId,
        _exchange_id: Option<&ExchangeOrderId>,
    ) -> HttpRequest {
        HttpRequest::new(
            Method::DELETE,
            format!("/api/2/order/{client_id}"),
            EndpointClass::Trade,
        )
    }

    fn query_order_request(
        &self,
        client_id: &ClientOrderId,
        _exchange_id: Option<&ExchangeOrderId>,
    ) -> HttpRequest {
        HttpRequest::new(Method::GET, "/api/2/history/order", EndpointClass::Query)
            .with_query("clientOrderId", client_id)
    }

    fn open_orders_request(&self) -> HttpRequest {
        HttpRequest::new(Method::GET, "/api/2/order", EndpointClass::Query)
    }

    fn balances_request(&self) -> HttpRequest {
        HttpRequest::new(Method::GET, "/api/2/trading/balance", EndpointClass::Query)
    }

    fn trading_rules_request(&self) -> HttpRequest {
        HttpRequest::new(Method::GET, "/api/2/public/symbol", EndpointClass::Rules)
    }

    fn sign(&self, request: &mut HttpRequest, _nonce: Option<u64>) -> Result<(), TransportError> {
        request
            .headers
            .push(("Authorization".to_string(), self.auth_header()));
        Ok(())
    }

    fn parse_submit(&self, response: &HttpResponse) -> Result<SubmitOutcome, ApiError> {
        let order: HitbtcOrder = serde_json::from_slice(&response.body).map_err(malformed)?;
        if order.status == "rejected" {
            return Ok(SubmitOutcome::Rejected(RejectReason::Venue(SmolStr::new(
                "rejected",
            ))));
        }
        Ok(SubmitOutcome::Accepted {
            exchange_id: Some(ExchangeOrderId::new(order.id.to_string())),
            ts: order.created_at.unwrap_or_else(Utc::now),
        })
    }

    fn parse_cancel(&self, response: &HttpResponse) -> Result<CancelOutcome, ApiError> {
        let order: HitbtcOrder = serde_json::from_slice(&response.body).map_err(malformed)?;
        match order.status.as_str() {
            "canceled" | "expired" => Ok(CancelOutcome::Cancelled),
            "filled" => Ok(CancelOutcome::AlreadyClosed),
            other => {
                debug!(status = other, "unexpected cancel response status");
                Ok(CancelOutcome::Cancelled)
            }
        }
    }

    fn parse_order_snapshot(&self, response: &HttpResponse) -> Result<QueryOutcome, ApiError> {
        // History endpoint returns an array; empty means unknown order.
        let orders: Vec<HitbtcOrder> = serde_json::from_slice(&response.body).map_err(malformed)?;
        match orders.first() {
            None => Ok(QueryOutcome::NotFound),
            Some(order) => Ok(QueryOutcome::Found(self.order_snapshot(order)?)),
        }
    }

    fn parse_open_orders(&self, response: &HttpResponse) -> Result<Vec<OrderSnapshot>, ApiError> {
        let orders: Vec<HitbtcOrder> = serde_json::from_slice(&response.body).map_err(malformed)?;
        orders
            .iter()
            .map(|order| self.order_snapshot(order))
            .collect()
    }

    fn parse_balances(&self, response: &HttpResponse) -> Result<Vec<AssetBalance>, ApiError> {
        let balances: Vec<HitbtcBalance> =
            serde_json::from_slice(&response.body).map_err(malformed)?;
        let ts = Utc::now();
        Ok(balances
            .into_iter()
            .map(|balance| {
                let total = balance.available + balance.reserved;
                AssetBalance::new(
                    AssetName::new(&balance.currency),
                    Balance::new(total, balance.available),
                    ts,
                )
            })
            .collect())
    }

    fn parse_trading_rules(&self, response: &HttpResponse) -> Result<Vec<TradingRule>, ApiError> {
        let symbols: Vec<HitbtcSymbol> =
            serde_json::from_slice(&response.body).map_err(malformed)?;
        Ok(symbols
            .into_iter()
            .map(|symbol| TradingRule {
                symbol: Symbol::new(symbol.base_currency.as_str(), symbol.quote_currency.as_str()),
                min_order_size: symbol.quantity_increment,
                min_notional: None,
                price_tick: symbol.tick_size,
                size_tick: symbol.quantity_increment,
                status: SymbolStatus::Tradable,
            })
            .collect())
    }

    fn classify_error(&self, response: &HttpResponse) -> ApiError {
        let body = String::from_utf8_lossy(&response.body).into_owned();
        if let Ok(HitbtcErrorEnvelope { error }) = serde_json::from_slice(&response.body) {
            let description = error.description.as_deref().unwrap_or(&error.message);
            return match error.code {
                1001 | 1002 | 1003 | 1004 => ApiError::AuthFailure(description.to_string()),
                429 | 21001 => ApiError::RateLimited { retry_after: None },
                20001 => ApiError::Rejected(RejectReason::InsufficientBalance),
                20002 => ApiError::NotFound,
                20003 => ApiError::Rejected(RejectReason::UnknownSymbol),
                2011 | 10001 if description.contains("quantity") => {
                    ApiError::Rejected(RejectReason::MinOrderSize)
                }
                _ if description.to_lowercase().contains("post only")
                    || description.to_lowercase().contains("post-only") =>
                {
                    ApiError::Rejected(RejectReason::PostOnlyViolation)
                }
                _ if description.to_lowercase().contains("already") => ApiError::AlreadyClosed,
                code if (500..600).contains(&code) => {
                    ApiError::TransientNetwork(format!("hitbtc {code}: {description}"))
                }
                code => ApiError::Rejected(RejectReason::Venue(SmolStr::new(format!(
                    "hitbtc_{code}"
                )))),
            };
        }
        classify_status(response.status, &body)
    }

    fn stream_subscriptions(&self) -> Vec<String> {
        vec![
            serde_json::json!({
                "method": "login",
                "params": {
                    "algo": "BASIC",
                    "pKey": self.api_key,
                    "sKey": self.api_secret,
                },
            })
            .to_string(),
            serde_json::json!({
                "method": "subscribeReports",
                "params": {},
            })
            .to_string(),
        ]
    }

    fn parse_stream(&self, raw: &str) -> Result<StreamEvent, ApiError> {
        let frame: HitbtcWsFrame = serde_json::from_str(raw).map_err(malformed)?;
        if let Some(error) = frame.error {
            return Err(ApiError::Rejected(RejectReason::Venue(SmolStr::new(
                format!("hitbtc_ws_{}", error.code),
            ))));
        }
        let Some(method) = frame.method else {
            // RPC responses (login, subscribeReports acks).
            return Ok(StreamEvent::Ignored {
                channel: SmolStr::new("rpc_result"),
            });
        };
        match method.as_str() {
            "report" => {
                let params = frame.params.ok_or_else(|| malformed("report without params"))?;
                let report: HitbtcWsReport =
                    serde_json::from_value(params).map_err(malformed)?;
                self.report_to_event(&report)
            }
            // Initial open-order snapshot; the REST reconciliation sweep
            // covers the same ground.
            "activeOrders" => Ok(StreamEvent::Ignored {
                channel: SmolStr::new("activeOrders"),
            }),
            other => Ok(StreamEvent::Ignored {
                channel: SmolStr::new(other),
            }),
        }
    }

    fn fee_rates(&self) -> FeeRates {
        FeeRates {
            maker: Decimal::new(1, 3),
            taker: Decimal::new(25, 4),
        }
    }

    fn fee_semantics(&self) -> FeeSemantics {
        FeeSemantics::Delta
    }
}

impl HitbtcAdapter {
    fn report_to_event(&self, report: &HitbtcWsReport) -> Result<StreamEvent, ApiError> {
        let client_id = Some(ClientOrderId::new(&report.client_order_id));
        let exchange_id = Some(ExchangeOrderId::new(&report.id));
        let ts = report.updated_at.unwrap_or_else(Utc::now);

        if report.report_type == "trade" {
            let price = report
                .trade_price
                .ok_or_else(|| malformed("trade report without tradePrice"))?;
            let quantity = report
                .trade_quantity
                .ok_or_else(|| malformed("trade report without tradeQuantity"))?;
            // Fees are charged in the quote currency.
            let fee_asset = self
                .decode_symbol(&report.symbol)
                .ok()
                .map(|symbol| symbol.quote);
            return Ok(StreamEvent::Execution(ExecutionEvent {
                client_id,
                exchange_id,
                fill: TradeFill {
                    trade_id: report.trade_id.map(|id| TradeId::new(id.to_string())),
                    price,
                    base_qty: quantity,
                    quote_qty: quantity * price,
                    fee: match (report.trade_fee, fee_asset) {
                        (Some(amount), Some(asset)) => Some(FeeSchedule { asset, amount }),
                        _ => None,
                    },
                    is_maker: None,
                    ts,
                },
                status: map_status(&report.status).ok(),
            }));
        }

        Ok(StreamEvent::OrderUpdate(OrderUpdateEvent {
            client_id,
            exchange_id,
            status: map_status(&report.status)?,
            filled_base: report.cum_quantity,
            ts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> HitbtcAdapter {
        HitbtcAdapter::new("key", "secret", &[Symbol::new("btc", "usdt")])
    }

    #[test]
    fn symbol_codec_round_trips_configured_pairs() {
        let adapter = adapter();
        let symbol = Symbol::new("btc", "usdt");
        let encoded = adapter.encode_symbol(&symbol);
        assert_eq!(encoded, "BTCUSDT");
        assert_eq!(adapter.decode_symbol(&encoded).unwrap(), symbol);
        assert!(adapter.decode_symbol("ETHBTC").is_err());
    }

    #[test]
    fn place_request_encodes_post_only() {
        let adapter = adapter();
        let intent = OrderIntent {
            client_id: ClientOrderId::new("jcn-1"),
            symbol: Symbol::new("btc", "usdt"),
            side: Side::Buy,
            kind: OrderType::LimitMaker,
            quantity: dec!(0.01),
            price: Some(dec!(30000)),
        };
        let request = adapter.place_request(&intent);
        let body = request.body.unwrap();
        assert!(body.contains("postOnly=true"));
        assert!(body.contains("symbol=BTCUSDT"));
        assert!(body.contains("timeInForce=GTC"));
    }

    #[test]
    fn order_not_found_code_classifies() {
        let adapter = adapter();
        let response = HttpResponse {
            status: 400,
            body: serde_json::json!({
                "error": {"code": 20002, "message": "Order not found"}
            })
            .to_string()
            .into(),
        };
        assert!(matches!(
            adapter.classify_error(&response),
            ApiError::NotFound
        ));
    }

    #[test]
    fn trade_report_parses_to_execution() {
        let adapter = adapter();
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "report",
            "params": {
                "id": "820205338",
                "clientOrderId": "jcn-hitbtc-7",
                "symbol": "BTCUSDT",
                "status": "partiallyFilled",
                "reportType": "trade",
                "cumQuantity": "0.004",
                "tradeId": 42,
                "tradeQuantity": "0.004",
                "tradePrice": "30000",
                "tradeFee": "0.12"
            }
        })
        .to_string();
        match adapter.parse_stream(&raw).unwrap() {
            StreamEvent::Execution(execution) => {
                assert_eq!(execution.fill.base_qty, dec!(0.004));
                assert_eq!(execution.fill.quote_qty, dec!(120));
                assert_eq!(
                    execution.client_id,
                    Some(ClientOrderId::new("jcn-hitbtc-7"))
                );
            }
            other => panic!("expected execution, got {other:?}"),
        }
    }

    #[test]
    fn empty_history_means_not_found() {
        let adapter = adapter();
        let response = HttpResponse {
            status: 200,
            body: "[]".to_string().into(),
        };
        assert_eq!(
            adapter.parse_order_snapshot(&response).unwrap(),
            QueryOutcome::NotFound
        );
    }
}
