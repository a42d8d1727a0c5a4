//! HitBTC wire models (REST API v2 and the `/api/2/ws` report stream).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order object returned by the trading REST endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HitbtcOrder {
    /// Venue-assigned order id.
    pub id: u64,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    /// `new`, `suspended`, `partiallyFilled`, `filled`, `canceled`, `expired`
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(rename = "cumQuantity")]
    pub cum_quantity: Decimal,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Trading balance entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HitbtcBalance {
    pub currency: String,
    pub available: Decimal,
    pub reserved: Decimal,
}

/// Symbol metadata from `/api/2/public/symbol`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HitbtcSymbol {
    pub id: String,
    #[serde(rename = "baseCurrency")]
    pub base_currency: String,
    #[serde(rename = "quoteCurrency")]
    pub quote_currency: String,
    #[serde(rename = "quantityIncrement")]
    pub quantity_increment: Decimal,
    #[serde(rename = "tickSize")]
    pub tick_size: Decimal,
    #[serde(rename = "takeLiquidityRate")]
    pub take_liquidity_rate: Decimal,
    #[serde(rename = "provideLiquidityRate")]
    pub provide_liquidity_rate: Decimal,
}

/// Error envelope: `{"error": {"code": 20002, "message": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HitbtcErrorEnvelope {
    pub error: HitbtcError,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HitbtcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One frame from the authenticated websocket.
#[derive(Debug, Clone, Deserialize)]
pub struct HitbtcWsFrame {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    /// Present on RPC responses (login, subscribeReports).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<HitbtcError>,
}

/// An execution report from the `report` channel.
#[derive(Debug, Clone, Deserialize)]
pub struct HitbtcWsReport {
    /// Venue order id (stringly typed on the stream).
    pub id: String,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    /// `status`, `new`, `canceled`, `expired`, `suspended`, `trade`,
    /// `replaced`
    #[serde(rename = "reportType")]
    pub report_type: String,
    #[serde(rename = "cumQuantity", default)]
    pub cum_quantity: Option<Decimal>,
    #[serde(rename = "tradeId", default)]
    pub trade_id: Option<u64>,
    #[serde(rename = "tradeQuantity", default)]
    pub trade_quantity: Option<Decimal>,
    #[serde(rename = "tradePrice", default)]
    pub trade_price: Option<Decimal>,
    #[serde(rename = "tradeFee", default)]
    pub trade_fee: Option<Decimal>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}
