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

//! # Markets - Shared Market Primitives
//!
//! Small value types shared by every crate in the Jacana connector runtime:
//!
//! * [`AssetName`] - normalised (lowercase) asset identifier
//! * [`Symbol`] - a `base/quote` trading pair in venue-agnostic form
//! * [`Side`] - Buy or Sell
//! * [`VenueId`] - identifies the remote venue a connector talks to
//!
//! Venue-specific symbol encodings (eg/ `"BTCUSDT"`, `"BTC-USDT"`) never leak
//! into these types - translating between the normalised [`Symbol`] and a
//! venue string is the job of each venue adapter.

pub mod asset;
pub mod side;
pub mod symbol;
pub mod venue;

pub use asset::AssetName;
pub use side::Side;
pub use symbol::{Symbol, SymbolParseError};
pub use venue::VenueId;
