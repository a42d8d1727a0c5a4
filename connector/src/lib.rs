#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # Connector - Exchange Connector Runtime
//!
//! Turns a strategy's intent (buy, sell, cancel) into correct, ordered,
//! fault-tolerant interactions with a remote spot exchange, and synthesises
//! a consistent local view of open orders and balances from asynchronous
//! REST responses and streaming user events.
//!
//! ## Architecture
//!
//! One [`Connector`] instance per (venue, account). It composes:
//!
//! * [`order::registry::InFlightOrderRegistry`] - exclusive owner of every
//!   not-yet-terminal order
//! * [`lifecycle::OrderLifecycleMachine`] - single entry point for every
//!   submit / fill / cancel / poll event; emits strategy events exactly once
//! * [`executor::RestCommandExecutor`] - authenticated place / cancel /
//!   query calls; error classification, retries, nonce ordering, rate
//!   limiting
//! * [`stream::UserStreamConsumer`] - drains the venue's user stream with
//!   reconnect, idle-ping, and lossless routing of order events
//! * [`reconcile`] - tick-driven REST reconciliation of balances, order
//!   statuses and trading rules
//! * [`rules::TradingRuleCache`] / [`ledger::BalanceLedger`] - read-mostly
//!   caches replaced or patched by the connector task
//! * [`event::EventBus`] - typed, synchronous dispatch toward strategies
//!
//! Everything venue-specific lives behind [`venue::VenueAdapter`]; the core
//! never changes when a venue is added.
//!
//! ## Concurrency model
//!
//! Single logical writer: one connector task drains a message loop and is
//! the only mutator of shared state. Strategy-facing getters read through
//! `parking_lot` reader locks. REST calls and stream reads run on helper
//! tasks and report back as messages, so the lifecycle machine processes
//! one event to completion (emission included) before the next begins.

pub mod cancel;
pub mod config;
pub mod connector;
pub mod error;
pub mod event;
pub mod executor;
pub mod ledger;
pub mod lifecycle;
pub mod logging;
pub mod order;
pub mod reconcile;
pub mod rules;
pub mod stream;
pub mod venue;

pub use config::{ConnectorConfig, ConnectorTunables};
pub use connector::{Connector, SharedState};
pub use error::{ApiError, ConnectorError, ProtocolViolation, RejectReason};
pub use event::{ConnectorEvent, EventBus, EventKind};
pub use ledger::{AssetBalance, Balance, BalanceSnapshot};
pub use lifecycle::{LifecycleEvent, OrderLifecycleMachine};
pub use order::registry::{InFlightOrderRegistry, RegistrySnapshot};
pub use order::{ClientOrderId, ExchangeOrderId, InFlightOrder, OrderIntent, OrderState, OrderType, TradeId, TradeFill};
pub use rules::{FeeRates, FeeSchedule, SymbolStatus, TradingRule, TradingRuleCache};
pub use venue::VenueAdapter;
