//! Venue identifiers.
//!
//! Identifies the remote trading venues a connector can be built against.
//! Adding a venue here is purely nominal - the behavioural surface lives in
//! that venue's adapter implementation.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Identifies a remote spot exchange.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum VenueId {
    /// HitBTC cryptocurrency exchange
    Hitbtc,
    /// Bittrex cryptocurrency exchange
    Bittrex,
    /// Blocktane cryptocurrency exchange
    Blocktane,
    /// IDEX decentralised exchange
    Idex,
    /// In-memory venue for tests
    Mock,
}

impl VenueId {
    /// Returns the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Hitbtc => "hitbtc",
            VenueId::Bittrex => "bittrex",
            VenueId::Blocktane => "blocktane",
            VenueId::Idex => "idex",
            VenueId::Mock => "mock",
        }
    }

    /// Returns true if this is a testing venue.
    pub fn is_test(&self) -> bool {
        matches!(self, VenueId::Mock)
    }
}

/// Failed to parse a [`VenueId`] from its canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown venue: {input}")]
pub struct VenueParseError {
    pub input: String,
}

impl FromStr for VenueId {
    type Err = VenueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hitbtc" => Ok(VenueId::Hitbtc),
            "bittrex" => Ok(VenueId::Bittrex),
            "blocktane" => Ok(VenueId::Blocktane),
            "idex" => Ok(VenueId::Idex),
            "mock" => Ok(VenueId::Mock),
            _ => Err(VenueParseError {
                input: s.to_string(),
            }),
        }
    }
}

impl Display for VenueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
