//! Balance ledger: total and available funds per asset.
//!
//! REST refreshes replace the whole map atomically (assets the venue no
//! longer reports are deleted locally); stream updates upsert single assets
//! in place between refreshes. Mutation happens only on the connector task.

use chrono::{DateTime, Utc};
use derive_more::Constructor;
use fnv::FnvHashMap;
use jacana_markets::AssetName;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Funds in a single asset. `available <= total`; the difference is held in
/// open orders.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize,
    Constructor,
)]
pub struct Balance {
    pub total: Decimal,
    pub available: Decimal,
}

impl Balance {
    /// Funds locked in open orders.
    pub fn used(&self) -> Decimal {
        self.total - self.available
    }
}

/// A single asset's balance, as reported by the venue (REST or stream).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct AssetBalance {
    pub asset: AssetName,
    pub balance: Balance,
    pub ts: DateTime<Utc>,
}

/// Immutable per-call view of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct BalanceSnapshot {
    pub balances: FnvHashMap<AssetName, Balance>,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Total + available balances, updated by both REST and stream.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    balances: FnvHashMap<AssetName, Balance>,
    last_refresh: Option<DateTime<Utc>>,
    seen_any: bool,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole map from a REST refresh.
    pub fn replace_all(&mut self, balances: Vec<AssetBalance>, now: DateTime<Utc>) {
        self.balances = balances
            .into_iter()
            .map(|entry| (entry.asset, sanitise(entry.balance)))
            .collect();
        self.last_refresh = Some(now);
        self.seen_any = self.seen_any || !self.balances.is_empty();
    }

    /// Upsert a single asset from a stream update.
    pub fn apply(&mut self, update: AssetBalance) {
        self.balances
            .insert(update.asset, sanitise(update.balance));
        self.seen_any = true;
    }

    pub fn get(&self, asset: &AssetName) -> Option<Balance> {
        self.balances.get(asset).copied()
    }

    pub fn available(&self, asset: &AssetName) -> Decimal {
        self.get(asset).map(|b| b.available).unwrap_or_default()
    }

    /// True once at least one asset has ever been reported.
    pub fn seen_any(&self) -> bool {
        self.seen_any
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            balances: self.balances.clone(),
            last_refresh: self.last_refresh,
        }
    }
}

fn sanitise(balance: Balance) -> Balance {
    if balance.available > balance.total {
        warn!(
            total = %balance.total,
            available = %balance.available,
            "venue reported available > total, clamping"
        );
        Balance {
            total: balance.total,
            available: balance.total,
        }
    } else {
        balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn asset(name: &str, total: Decimal, available: Decimal) -> AssetBalance {
        AssetBalance::new(AssetName::new(name), Balance::new(total, available), Utc::now())
    }

    #[test]
    fn refresh_replaces_whole_map() {
        let mut ledger = BalanceLedger::new();
        ledger.replace_all(
            vec![asset("btc", dec!(1), dec!(1)), asset("usdt", dec!(500), dec!(400))],
            Utc::now(),
        );
        assert_eq!(ledger.get(&AssetName::new("btc")), Some(Balance::new(dec!(1), dec!(1))));

        // btc disappears from the venue: deleted locally.
        ledger.replace_all(vec![asset("usdt", dec!(500), dec!(500))], Utc::now());
        assert_eq!(ledger.get(&AssetName::new("btc")), None);
        assert!(ledger.seen_any());
    }

    #[test]
    fn stream_update_mutates_in_place() {
        let mut ledger = BalanceLedger::new();
        ledger.replace_all(vec![asset("usdt", dec!(500), dec!(400))], Utc::now());
        ledger.apply(asset("usdt", dec!(450), dec!(450)));
        assert_eq!(
            ledger.get(&AssetName::new("usdt")),
            Some(Balance::new(dec!(450), dec!(450)))
        );
    }

    #[test]
    fn clamps_available_above_total() {
        let mut ledger = BalanceLedger::new();
        ledger.apply(asset("usdt", dec!(100), dec!(150)));
        assert_eq!(
            ledger.get(&AssetName::new("usdt")),
            Some(Balance::new(dec!(100), dec!(100)))
        );
    }

    #[test]
    fn used_is_total_minus_available() {
        assert_eq!(Balance::new(dec!(10), dec!(4)).used(), dec!(6));
    }
}
