//! Trading rules and the fee model.
//!
//! Rules are an immutable per-symbol snapshot refreshed on a slow cadence
//! (and re-fetched early when the venue rejects an order for a rule the
//! cache apparently got wrong). Every accepted order satisfies the rule's
//! size, tick and notional constraints before it is sent.

use crate::error::RejectReason;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use jacana_markets::{AssetName, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether a symbol is currently accepting orders.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum SymbolStatus {
    Tradable,
    Offline,
}

/// Per-symbol constraints, as published by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TradingRule {
    pub symbol: Symbol,
    /// Minimum order size in base units.
    pub min_order_size: Decimal,
    /// Minimum `size * price`, in quote units. Not all venues define one.
    pub min_notional: Option<Decimal>,
    /// Price increment.
    pub price_tick: Decimal,
    /// Size increment.
    pub size_tick: Decimal,
    pub status: SymbolStatus,
}

impl TradingRule {
    /// Validate an order against this rule.
    ///
    /// Tick comparisons are exact decimal arithmetic; there is no epsilon.
    pub fn validate(&self, quantity: Decimal, price: Option<Decimal>) -> Result<(), RejectReason> {
        if self.status == SymbolStatus::Offline {
            return Err(RejectReason::MarketOffline);
        }
        if quantity < self.min_order_size {
            return Err(RejectReason::MinOrderSize);
        }
        if self.size_tick > Decimal::ZERO && quantity % self.size_tick != Decimal::ZERO {
            return Err(RejectReason::TickSize);
        }
        if let Some(price) = price {
            if self.price_tick > Decimal::ZERO && price % self.price_tick != Decimal::ZERO {
                return Err(RejectReason::TickSize);
            }
            if let Some(min_notional) = self.min_notional {
                if quantity * price < min_notional {
                    return Err(RejectReason::MinNotional);
                }
            }
        }
        Ok(())
    }

    /// Largest rule-aligned price not exceeding `price`.
    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        quantize(price, self.price_tick)
    }

    /// Largest rule-aligned size not exceeding `size`.
    pub fn quantize_size(&self, size: Decimal) -> Decimal {
        quantize(size, self.size_tick)
    }
}

fn quantize(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).floor() * tick
}

/// Static maker/taker fee rates for a venue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeeRates {
    pub maker: Decimal,
    pub taker: Decimal,
}

impl FeeRates {
    /// Estimate the fee for an execution, charged in the quote asset.
    ///
    /// Used when the venue does not report realised fees on fill events; an
    /// authoritative fee arriving later replaces the estimate.
    pub fn estimate(
        &self,
        symbol: &Symbol,
        base_qty: Decimal,
        price: Decimal,
        is_maker: bool,
    ) -> FeeSchedule {
        let rate = if is_maker { self.maker } else { self.taker };
        FeeSchedule {
            asset: symbol.quote.clone(),
            amount: base_qty * price * rate,
        }
    }
}

/// A concrete fee: amount owed in a specific asset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeeSchedule {
    pub asset: AssetName,
    pub amount: Decimal,
}

/// Read-only mapping of symbol to trading rule, replaced atomically per
/// refresh.
#[derive(Debug, Default)]
pub struct TradingRuleCache {
    rules: FnvHashMap<Symbol, TradingRule>,
    last_refresh: Option<DateTime<Utc>>,
}

impl TradingRuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole rule set.
    pub fn replace_all(&mut self, rules: Vec<TradingRule>, now: DateTime<Utc>) {
        self.rules = rules
            .into_iter()
            .map(|rule| (rule.symbol.clone(), rule))
            .collect();
        self.last_refresh = Some(now);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&TradingRule> {
        self.rules.get(symbol)
    }

    /// True once at least one refresh has completed.
    pub fn is_primed(&self) -> bool {
        self.last_refresh.is_some()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
