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

//! # Integration - Low-Level Web Plumbing
//!
//! Transport-level building blocks used by the Jacana connector runtime to
//! talk to remote venues. Nothing in this crate knows about orders, balances
//! or trading rules - it moves signed bytes and frames, and reports failures
//! in a shape the layers above can classify.
//!
//! ## Building Blocks
//!
//! * [`http`] - the [`HttpRequest`](http::HttpRequest) model, the
//!   [`HttpTransport`](http::HttpTransport) seam, and a `reqwest`-backed
//!   production implementation
//! * [`signing`] - HMAC and basic-auth helpers venue adapters compose their
//!   request signing from
//! * [`websocket`] - the [`StreamTransport`](websocket::StreamTransport)
//!   seam and a `tokio-tungstenite`-backed implementation with ping/idle
//!   handling
//! * [`backoff`] - exponential backoff with full jitter for retry loops and
//!   stream reconnects
//! * [`ratelimit`] - an async token bucket modelling a venue's shared rate
//!   limit per endpoint class

pub mod backoff;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod signing;
pub mod websocket;

pub use error::TransportError;
