//! Connector configuration.

use crate::executor::ExecutorConfig;
use crate::reconcile::TickIntervals;
use jacana_markets::Symbol;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration record a connector is constructed from.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    pub api_key: String,
    pub api_secret: String,
    /// Pairs this connector trades; balances are tracked for their assets.
    pub trading_pairs: Vec<Symbol>,
    /// Cadence of the internal tick pump, milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// When false the connector only observes (no credentials needed for
    /// anything but the read endpoints the venue still authenticates).
    #[serde(default = "default_trading_required")]
    pub trading_required: bool,
    #[serde(default)]
    pub tunables: ConnectorTunables,
}

impl ConnectorConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, trading_pairs: Vec<Symbol>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            trading_pairs,
            poll_interval_ms: default_poll_interval_ms(),
            trading_required: default_trading_required(),
            tunables: ConnectorTunables::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Timing knobs. All tunable; defaults match production behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorTunables {
    /// Balance poll cadence, seconds.
    pub balance_poll_secs: u64,
    /// Open-order status poll cadence, seconds.
    pub order_status_poll_secs: u64,
    /// Trading-rule refresh cadence, seconds.
    pub trading_rules_poll_secs: u64,
    /// Grace before an unacknowledged order is polled by client id, seconds.
    pub order_not_exist_grace_secs: u64,
    /// Consecutive not-found polls that finalise a failed submission.
    pub order_not_found_limit: u32,
    /// Tracked orders older than this are locally expired, seconds.
    pub order_expiry_secs: u64,
    /// Duplicate-cancel suppression window, seconds.
    pub cancel_dedup_ttl_secs: u64,
    /// Single HTTP attempt timeout, seconds.
    pub request_timeout_secs: u64,
    /// Total trade-call budget (cancel retries), seconds.
    pub trade_deadline_secs: u64,
    /// Total query-call budget, seconds.
    pub query_deadline_secs: u64,
    /// Idle window before the user stream is pinged, seconds.
    pub stream_idle_timeout_secs: u64,
    /// Bounded queue capacity between stream consumer and connector task.
    pub stream_queue_capacity: usize,
}

impl Default for ConnectorTunables {
    fn default() -> Self {
        Self {
            balance_poll_secs: 5,
            order_status_poll_secs: 10,
            trading_rules_poll_secs: 300,
            order_not_exist_grace_secs: 10,
            order_not_found_limit: 2,
            order_expiry_secs: 900,
            cancel_dedup_ttl_secs: 60,
            request_timeout_secs: 10,
            trade_deadline_secs: 60,
            query_deadline_secs: 10,
            stream_idle_timeout_secs: 30,
            stream_queue_capacity: 256,
        }
    }
}

impl ConnectorTunables {
    pub fn tick_intervals(&self) -> TickIntervals {
        TickIntervals {
            balances: Duration::from_secs(self.balance_poll_secs),
            order_status: Duration::from_secs(self.order_status_poll_secs),
            trading_rules: Duration::from_secs(self.trading_rules_poll_secs),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            trade_deadline: Duration::from_secs(self.trade_deadline_secs),
            query_deadline: Duration::from_secs(self.query_deadline_secs),
            ..ExecutorConfig::default()
        }
    }

    pub fn order_not_exist_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.order_not_exist_grace_secs as i64)
    }

    pub fn order_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.order_expiry_secs as i64)
    }

    pub fn cancel_dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.cancel_dedup_ttl_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_trading_required() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserialises_with_defaults() {
        let config: ConnectorConfig = serde_json::from_str(
            r#"{
                "api_key": "k",
                "api_secret": "s",
                "trading_pairs": [{"base": "btc", "quote": "usdt"}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.trading_required);
        assert_eq!(config.tunables.order_not_found_limit, 2);
        assert_eq!(config.trading_pairs[0], Symbol::new("btc", "usdt"));
    }
}
