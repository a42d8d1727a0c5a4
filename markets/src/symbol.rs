//! Venue-agnostic trading pair representation.

use crate::asset::AssetName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A normalised trading pair, always `base/quote`, eg/ `btc/usdt`.
///
/// This is the only pair representation understood by the connector core.
/// Encoding to and from a venue's native string (`"BTCUSDT"`, `"BTC-USDT"`,
/// etc.) is a pure bidirectional function owned by the venue adapter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Symbol {
    pub base: AssetName,
    pub quote: AssetName,
}

impl Symbol {
    pub fn new<B, Q>(base: B, quote: Q) -> Self
    where
        B: Into<AssetName>,
        Q: Into<AssetName>,
    {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Failed to parse a [`Symbol`] from its canonical `base/quote` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid symbol: {input}")]
pub struct SymbolParseError {
    pub input: String,
}

impl FromStr for Symbol {
    type Err = SymbolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(SymbolParseError {
                input: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let symbol: Symbol = "BTC/USDT".parse().unwrap();
        assert_eq!(symbol, Symbol::new("btc", "usdt"));
        assert_eq!(symbol.to_string(), "btc/usdt");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!("BTCUSDT".parse::<Symbol>().is_err());
        assert!("/usdt".parse::<Symbol>().is_err());
    }
}
