//! "jacana" facade crate
//!
//! Single entry point re-exporting the crates of the Jacana connector
//! runtime, for users who prefer to depend on just one crate.
//!
//! # Example
//! ```rust
//! use jacana::markets::{Side, Symbol, VenueId};
//! let symbol = Symbol::new("btc", "usdt");
//! let _ = (symbol, Side::Buy, VenueId::Hitbtc);
//! ```

pub use jacana_connector as connector;
pub use jacana_integration as integration;
pub use jacana_markets as markets;

// Flat re-export of the symbols almost every user touches.
pub use jacana_connector::{Connector, ConnectorConfig, ConnectorEvent, EventKind};
pub use jacana_markets::{Side, Symbol, VenueId};

// Optional prelude for single import.
pub mod prelude {
    pub use crate::connector::venue::VenueAdapter;
    pub use crate::connector::{
        ClientOrderId, Connector, ConnectorConfig, ConnectorError, ConnectorEvent, EventKind,
        OrderState, OrderType,
    };
    pub use crate::markets::{Side, Symbol, VenueId};
}
