//! In-flight order registry.
//!
//! Exclusive owner of every [`InFlightOrder`]. All mutation happens on the
//! connector task (single-writer discipline); readers receive clones, never
//! references. The registry also carries the persistence contract: a
//! schema-versioned [`RegistrySnapshot`] that survives process restarts.

use crate::error::ProtocolViolation;
use crate::order::{ClientOrderId, ExchangeOrderId, InFlightOrder, OrderIntent};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current snapshot schema version.
const SNAPSHOT_VERSION: u32 = 1;

/// Registry operation failures.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("client id already tracked: {0}")]
    DuplicateClientId(ClientOrderId),

    #[error("unknown order: {0}")]
    UnknownOrder(ClientOrderId),

    #[error("order is not terminal: {0}")]
    NotTerminal(ClientOrderId),

    #[error(transparent)]
    Violation(#[from] ProtocolViolation),

    #[error("unsupported snapshot version: {0}")]
    UnsupportedSnapshotVersion(u32),

    #[error("snapshot serde: {0}")]
    Serde(String),
}

/// Serialisable registry image for restart continuity.
///
/// Contains order records only - no credentials, no venue secrets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistrySnapshot {
    pub version: u32,
    pub orders: Vec<InFlightOrder>,
}

/// Owns the set of not-yet-terminal orders and enforces identity invariants.
#[derive(Debug, Default)]
pub struct InFlightOrderRegistry {
    orders: FnvHashMap<ClientOrderId, InFlightOrder>,
    by_exchange_id: FnvHashMap<ExchangeOrderId, ClientOrderId>,
}

impl InFlightOrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking an intent. The order starts `Pending`.
    pub fn track(
        &mut self,
        intent: &OrderIntent,
        now: DateTime<Utc>,
    ) -> Result<&InFlightOrder, RegistryError> {
        if self.orders.contains_key(&intent.client_id) {
            return Err(RegistryError::DuplicateClientId(intent.client_id.clone()));
        }
        let order = InFlightOrder::from_intent(intent, now);
        Ok(self
            .orders
            .entry(intent.client_id.clone())
            .or_insert(order))
    }

    /// Bind the venue-assigned id. Idempotent and one-shot: rebinding the
    /// same id is a no-op, rebinding a different id is a protocol violation.
    ///
    /// Returns `true` when the id was newly bound.
    pub fn bind_exchange_id(
        &mut self,
        client_id: &ClientOrderId,
        exchange_id: &ExchangeOrderId,
    ) -> Result<bool, RegistryError> {
        let order = self
            .orders
            .get_mut(client_id)
            .ok_or_else(|| RegistryError::UnknownOrder(client_id.clone()))?;

        match &order.exchange_id {
            Some(bound) if bound == exchange_id => Ok(false),
            Some(bound) => Err(RegistryError::Violation(ProtocolViolation {
                client_id: client_id.clone(),
                bound: bound.clone(),
                incoming: exchange_id.clone(),
            })),
            None => {
                order.exchange_id = Some(exchange_id.clone());
                self.by_exchange_id
                    .insert(exchange_id.clone(), client_id.clone());
                Ok(true)
            }
        }
    }

    pub fn get(&self, client_id: &ClientOrderId) -> Option<&InFlightOrder> {
        self.orders.get(client_id)
    }

    pub(crate) fn get_mut(&mut self, client_id: &ClientOrderId) -> Option<&mut InFlightOrder> {
        self.orders.get_mut(client_id)
    }

    /// Resolve an order by client id, falling back to exchange id for venues
    /// that only return their own id on stream events.
    pub fn resolve(
        &self,
        client_id: Option<&ClientOrderId>,
        exchange_id: Option<&ExchangeOrderId>,
    ) -> Option<&ClientOrderId> {
        if let Some(client_id) = client_id {
            if let Some((key, _)) = self.orders.get_key_value(client_id) {
                return Some(key);
            }
        }
        exchange_id.and_then(|id| self.by_exchange_id.get(id))
    }

    /// Orders the venue considers (or may consider) working.
    pub fn open_orders(&self) -> impl Iterator<Item = &InFlightOrder> {
        self.orders.values().filter(|order| !order.is_terminal())
    }

    pub fn iter(&self) -> impl Iterator<Item = &InFlightOrder> {
        self.orders.values()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Stop tracking a terminal order and return it.
    pub fn forget(&mut self, client_id: &ClientOrderId) -> Result<InFlightOrder, RegistryError> {
        let order = self
            .orders
            .remove(client_id)
            .ok_or_else(|| RegistryError::UnknownOrder(client_id.clone()))?;
        if !order.is_terminal() {
            self.orders.insert(order.client_id.clone(), order);
            return Err(RegistryError::NotTerminal(client_id.clone()));
        }
        if let Some(exchange_id) = &order.exchange_id {
            self.by_exchange_id.remove(exchange_id);
        }
        Ok(order)
    }

    /// Serialisable image of every tracked order.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            orders: self.orders.values().cloned().collect(),
        }
    }

    /// Rehydrate from a snapshot, replacing current contents.
    pub fn restore(&mut self, snapshot: RegistrySnapshot) -> Result<(), RegistryError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RegistryError::UnsupportedSnapshotVersion(snapshot.version));
        }

        self.orders.clear();
        self.by_exchange_id.clear();
        for order in snapshot.orders {
            if let Some(exchange_id) = &order.exchange_id {
                self.by_exchange_id
                    .insert(exchange_id.clone(), order.client_id.clone());
            }
            self.orders.insert(order.client_id.clone(), order);
        }
        Ok(())
    }

    /// Snapshot encoded as bytes for external persistence.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        serde_json::to_vec(&self.snapshot()).map_err(|error| RegistryError::Serde(error.to_string()))
    }

    /// Restore from bytes produced by [`Self::snapshot_bytes`].
    pub fn restore_bytes(&mut self, bytes: &[u8]) -> Result<(), RegistryError> {
        let snapshot: RegistrySnapshot =
            serde_json::from_slice(bytes).map_err(|error| RegistryError::Serde(error.to_string()))?;
        self.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderState, OrderType};
    use jacana_markets::{Side, Symbol};
    use rust_decimal_macros::dec;

    fn intent(id: &str) -> OrderIntent {
        OrderIntent {
            client_id: ClientOrderId::new(id),
            symbol: Symbol::new("btc", "usdt"),
            side: Side::Buy,
            kind: OrderType::Limit,
            quantity: dec!(1),
            price: Some(dec!(100)),
        }
    }

    #[test]
    fn track_rejects_duplicate_client_id() {
        let mut registry = InFlightOrderRegistry::new();
        registry.track(&intent("a"), Utc::now()).unwrap();
        assert!(matches!(
            registry.track(&intent("a"), Utc::now()),
            Err(RegistryError::DuplicateClientId(_))
        ));
    }

    #[test]
    fn bind_is_one_shot_idempotent() {
        let mut registry = InFlightOrderRegistry::new();
        let client_id = ClientOrderId::new("a");
        registry.track(&intent("a"), Utc::now()).unwrap();

        let e1 = ExchangeOrderId::new("E1");
        assert!(registry.bind_exchange_id(&client_id, &e1).unwrap());
        assert!(!registry.bind_exchange_id(&client_id, &e1).unwrap());

        let e2 = ExchangeOrderId::new("E2");
        assert!(matches!(
            registry.bind_exchange_id(&client_id, &e2),
            Err(RegistryError::Violation(_))
        ));
    }

    #[test]
    fn resolve_falls_back_to_exchange_id() {
        let mut registry = InFlightOrderRegistry::new();
        let client_id = ClientOrderId::new("a");
        registry.track(&intent("a"), Utc::now()).unwrap();
        registry
            .bind_exchange_id(&client_id, &ExchangeOrderId::new("E1"))
            .unwrap();

        let resolved = registry
            .resolve(None, Some(&ExchangeOrderId::new("E1")))
            .cloned();
        assert_eq!(resolved, Some(client_id));
    }

    #[test]
    fn forget_refuses_live_orders() {
        let mut registry = InFlightOrderRegistry::new();
        let client_id = ClientOrderId::new("a");
        registry.track(&intent("a"), Utc::now()).unwrap();

        assert!(matches!(
            registry.forget(&client_id),
            Err(RegistryError::NotTerminal(_))
        ));

        registry.get_mut(&client_id).unwrap().state = OrderState::Cancelled;
        assert!(registry.forget(&client_id).is_ok());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut registry = InFlightOrderRegistry::new();
        let client_id = ClientOrderId::new("a");
        registry.track(&intent("a"), Utc::now()).unwrap();
        registry
            .bind_exchange_id(&client_id, &ExchangeOrderId::new("E1"))
            .unwrap();
        registry.get_mut(&client_id).unwrap().state = OrderState::Open;

        let bytes = registry.snapshot_bytes().unwrap();

        let mut rehydrated = InFlightOrderRegistry::new();
        rehydrated.restore_bytes(&bytes).unwrap();
        assert_eq!(rehydrated.len(), 1);
        assert_eq!(
            rehydrated.get(&client_id).unwrap().state,
            OrderState::Open
        );
        // Exchange-id index rebuilt.
        assert_eq!(
            rehydrated
                .resolve(None, Some(&ExchangeOrderId::new("E1")))
                .cloned(),
            Some(client_id)
        );
    }

    #[test]
    fn restore_refuses_unknown_version() {
        let snapshot = RegistrySnapshot {
            version: 99,
            orders: Vec::new(),
        };
        let mut registry = InFlightOrderRegistry::new();
        assert!(matches!(
            registry.restore(snapshot),
            Err(RegistryError::UnsupportedSnapshotVersion(99))
        ));
    }
}
