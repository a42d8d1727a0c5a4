//! Normalised asset identifiers.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::borrow::Borrow;
use std::fmt;

/// Normalised (lowercase) name of an asset, eg/ `"btc"`, `"usdt"`.
///
/// Construction lowercases the input so that `AssetName::new("BTC")` and
/// `AssetName::new("btc")` compare equal. Venue adapters are responsible for
/// re-encoding into whatever case the venue expects on the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct AssetName(SmolStr);

impl AssetName {
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self(SmolStr::new(name.as_ref().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for AssetName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
