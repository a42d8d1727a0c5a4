//! Cancellation orchestration.
//!
//! `cancel_all` collects every non-terminal tracked order, issues concurrent
//! cancels, and reports per-order success within a caller-supplied deadline.
//! `already_closed` and `not_found` responses count as success. A TTL cache
//! suppresses concurrent duplicate cancels on the same client id so repeated
//! shutdown attempts do not hammer the venue's rate limit.

use crate::connector::{Msg, SharedState};
use crate::executor::RestCommandExecutor;
use crate::lifecycle::LifecycleEvent;
use crate::order::{ClientOrderId, ExchangeOrderId};
use crate::venue::{CancelOutcome, VenueAdapter};
use chrono::Utc;
use fnv::FnvHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// TTL cache of cancels currently in flight.
#[derive(Debug)]
pub struct CancelDedup {
    ttl: Duration,
    in_flight: parking_lot::Mutex<FnvHashMap<ClientOrderId, Instant>>,
}

impl CancelDedup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            in_flight: parking_lot::Mutex::new(FnvHashMap::default()),
        }
    }

    /// Claim the right to cancel this order. `false` means a cancel is
    /// already in flight within the TTL.
    pub fn try_begin(&self, client_id: &ClientOrderId) -> bool {
        let mut in_flight = self.in_flight.lock();
        let now = Instant::now();
        in_flight.retain(|_, started| now.duration_since(*started) < self.ttl);
        if in_flight.contains_key(client_id) {
            return false;
        }
        in_flight.insert(client_id.clone(), now);
        true
    }

    /// Release the claim once the cancel call resolves.
    pub fn finish(&self, client_id: &ClientOrderId) {
        self.in_flight.lock().remove(client_id);
    }
}

/// Cancel every non-terminal tracked order, returning `(client_id, ok)`
/// pairs within the deadline. Orders whose cancel fails stay tracked.
pub(crate) async fn cancel_all<A: VenueAdapter>(
    executor: &Arc<RestCommandExecutor<A>>,
    state: &Arc<SharedState>,
    dedup: &Arc<CancelDedup>,
    tx: &mpsc::UnboundedSender<Msg>,
    deadline: Duration,
) -> Vec<(ClientOrderId, bool)> {
    let targets: Vec<(ClientOrderId, Option<ExchangeOrderId>)> = {
        let registry = state.registry.read();
        registry
            .open_orders()
            .map(|order| (order.client_id.clone(), order.exchange_id.clone()))
            .collect()
    };

    let cancels = targets.into_iter().map(|(client_id, exchange_id)| {
        let executor = Arc::clone(executor);
        let dedup = Arc::clone(dedup);
        let tx = tx.clone();
        async move {
            if !dedup.try_begin(&client_id) {
                debug!(%client_id, "duplicate cancel suppressed");
                return (client_id, false);
            }
            let outcome = tokio::time::timeout(
                deadline,
                executor.cancel(&client_id, exchange_id.as_ref()),
            )
            .await;
            dedup.finish(&client_id);

            match outcome {
                Ok(Ok(CancelOutcome::Cancelled)) => {
                    let _ = tx.send(Msg::Lifecycle(LifecycleEvent::CancelAck {
                        client_id: client_id.clone(),
                        ts: Utc::now(),
                    }));
                    (client_id, true)
                }
                // The venue already deems the order closed; reconciliation
                // settles the local record.
                Ok(Ok(CancelOutcome::AlreadyClosed)) | Ok(Ok(CancelOutcome::NotFound)) => {
                    (client_id, true)
                }
                Ok(Err(error)) => {
                    let _ = tx.send(Msg::Lifecycle(LifecycleEvent::CancelReject {
                        client_id: client_id.clone(),
                        detail: error.to_string(),
                    }));
                    (client_id, false)
                }
                Err(_) => (client_id, false),
            }
        }
    });

    futures::future::join_all(cancels).await
}
