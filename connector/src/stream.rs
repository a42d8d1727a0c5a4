//! User-stream consumer.
//!
//! Drains the venue's authenticated event stream and routes typed events
//! toward the connector task through a bounded queue. Overflow policy:
//! `balance_delta`-style updates are coalesced (only the newest per asset is
//! kept), while order updates and executions are never dropped - the
//! consumer blocks on the queue instead.
//!
//! On disconnect the consumer reconnects with jittered exponential backoff
//! and forces a REST reconciliation sweep, because frames may have been
//! missed while the stream was down. An idle stream is pinged after
//! `idle_timeout`; an unanswered ping forces a reconnect.

use crate::lifecycle::LifecycleEvent;
use crate::ledger::AssetBalance;
use crate::reconcile::TickDriver;
use crate::venue::{StreamEvent, VenueAdapter};
use indexmap::IndexMap;
use jacana_integration::backoff::ExponentialBackoff;
use jacana_integration::websocket::{StreamMessage, StreamTransport};
use jacana_markets::AssetName;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Work routed from the stream to the connector task.
#[derive(Debug, Clone)]
pub enum StreamWork {
    Balance(AssetBalance),
    Lifecycle(LifecycleEvent),
}

/// Bounded queue between consumer and connector task.
#[derive(Debug, Clone)]
pub struct StreamQueue {
    tx: mpsc::Sender<StreamWork>,
    coalesced: Arc<parking_lot::Mutex<IndexMap<AssetName, AssetBalance>>>,
}

/// Receiving end; drains coalesced balances before queued work.
#[derive(Debug)]
pub struct StreamQueueReceiver {
    rx: mpsc::Receiver<StreamWork>,
    coalesced: Arc<parking_lot::Mutex<IndexMap<AssetName, AssetBalance>>>,
}

/// Build the queue pair with the given channel capacity.
pub fn stream_queue(capacity: usize) -> (StreamQueue, StreamQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let coalesced = Arc::new(parking_lot::Mutex::new(IndexMap::new()));
    (
        StreamQueue {
            tx,
            coalesced: Arc::clone(&coalesced),
        },
        StreamQueueReceiver { rx, coalesced },
    )
}

impl StreamQueue {
    /// Enqueue a balance update. On overflow the update is coalesced into a
    /// last-wins side map keyed by asset.
    pub fn push_balance(&self, update: AssetBalance) {
        match self.tx.try_send(StreamWork::Balance(update)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(StreamWork::Balance(update))) => {
                self.coalesced.lock().insert(update.asset.clone(), update);
            }
            Err(_) => {}
        }
    }

    /// Enqueue an order update or execution. Blocks on a full queue rather
    /// than drop; returns `Err` when the connector task is gone.
    pub async fn push_lifecycle(&self, event: LifecycleEvent) -> Result<(), ()> {
        self.tx
            .send(StreamWork::Lifecycle(event))
            .await
            .map_err(|_| ())
    }
}

impl StreamQueueReceiver {
    /// Next unit of work: coalesced balances first (they are the oldest),
    /// then the channel.
    pub async fn recv(&mut self) -> Option<StreamWork> {
        let coalesced = {
            let mut pending = self.coalesced.lock();
            pending.shift_remove_index(0).map(|(_, update)| update)
        };
        if let Some(update) = coalesced {
            return Some(StreamWork::Balance(update));
        }
        self.rx.recv().await
    }
}

/// Consumes the venue's user stream until shutdown.
pub struct UserStreamConsumer<A> {
    adapter: Arc<A>,
    transport: Box<dyn StreamTransport>,
    queue: StreamQueue,
    tick: Arc<TickDriver>,
    connected: Arc<AtomicBool>,
    idle_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

enum Disconnect {
    Shutdown,
    Remote,
}

impl<A: VenueAdapter> UserStreamConsumer<A> {
    pub fn new(
        adapter: Arc<A>,
        transport: Box<dyn StreamTransport>,
        queue: StreamQueue,
        tick: Arc<TickDriver>,
        connected: Arc<AtomicBool>,
        idle_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            adapter,
            transport,
            queue,
            tick,
            connected,
            idle_timeout,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut backoff = ExponentialBackoff::default();
        'session: loop {
            if *self.shutdown.borrow() {
                break;
            }

            if let Err(error) = self.transport.connect().await {
                warn!(%error, "user stream connect failed");
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = self.shutdown.changed() => break 'session,
                    _ = tokio::time::sleep(delay) => continue 'session,
                }
            }

            let mut subscribed = true;
            for message in self.adapter.stream_subscriptions() {
                if let Err(error) = self.transport.send_text(message).await {
                    warn!(%error, "user stream subscription failed");
                    subscribed = false;
                    break;
                }
            }
            if !subscribed {
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = self.shutdown.changed() => break 'session,
                    _ = tokio::time::sleep(delay) => continue 'session,
                }
            }

            info!(venue = %self.adapter.venue(), "user stream connected");
            self.connected.store(true, Ordering::SeqCst);
            backoff.reset();
            // Frames may have been missed while disconnected; reconcile via
            // REST even if the tick bucket has not advanced.
            self.tick.force_reconcile();

            let disconnect = self.read_until_disconnect().await;
            self.connected.store(false, Ordering::SeqCst);
            match disconnect {
                Disconnect::Shutdown => break 'session,
                Disconnect::Remote => {
                    info!("user stream disconnected, reconnecting");
                }
            }
        }
        self.transport.close().await;
        self.connected.store(false, Ordering::SeqCst);
        debug!("user stream consumer stopped");
    }

    async fn read_until_disconnect(&mut self) -> Disconnect {
        let mut awaiting_pong = false;
        loop {
            let next = tokio::time::timeout(self.idle_timeout, self.transport.next_message());
            tokio::select! {
                _ = self.shutdown.changed() => return Disconnect::Shutdown,
                result = next => match result {
                    // Idle: probe once, reconnect if the probe goes
                    // unanswered for another idle window.
                    Err(_) => {
                        if awaiting_pong {
                            warn!("user stream ping unanswered, forcing reconnect");
                            return Disconnect::Remote;
                        }
                        if self.transport.ping().await.is_err() {
                            return Disconnect::Remote;
                        }
                        awaiting_pong = true;
                    }
                    Ok(Err(error)) => {
                        warn!(%error, "user stream read failed");
                        return Disconnect::Remote;
                    }
                    Ok(Ok(StreamMessage::Closed)) => return Disconnect::Remote,
                    Ok(Ok(StreamMessage::Pong)) => awaiting_pong = false,
                    Ok(Ok(StreamMessage::Text(text))) => {
                        awaiting_pong = false;
                        if self.route(&text).await.is_err() {
                            return Disconnect::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// Route one decoded frame. `Err` means the connector task is gone.
    async fn route(&self, raw: &str) -> Result<(), ()> {
        match self.adapter.parse_stream(raw) {
            Ok(StreamEvent::Balance(update)) => {
                self.queue.push_balance(update);
            }
            Ok(StreamEvent::OrderUpdate(update)) => {
                self.queue
                    .push_lifecycle(LifecycleEvent::StreamOrderUpdate(update))
                    .await?;
            }
            Ok(StreamEvent::Execution(execution)) => {
                self.queue
                    .push_lifecycle(LifecycleEvent::StreamFill(execution))
                    .await?;
            }
            Ok(StreamEvent::Ignored { channel }) => {
                debug!(%channel, "unrecognised stream channel, dropped");
            }
            Err(error) => {
                warn!(%error, "failed to decode stream frame");
            }
        }
        Ok(())
    }
}

impl<A> std::fmt::Debug for UserStreamConsumer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStreamConsumer")
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Balance;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn update(asset: &str, total: i64) -> AssetBalance {
        AssetBalance::new(
            AssetName::new(asset),
            Balance::new(total.into(), total.into()),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn overflowing_balances_coalesce_last_per_asset() {
        let (queue, mut receiver) = stream_queue(1);

        queue.push_balance(update("btc", 1)); // fills the channel
        queue.push_balance(update("usdt", 10)); // coalesced
        queue.push_balance(update("usdt", 20)); // replaces the coalesced entry
        queue.push_balance(update("eth", 5)); // coalesced

        // Coalesced entries drain first, newest value per asset, then the
        // channel.
        let mut seen = Vec::new();
        for _ in 0..3 {
            match receiver.recv().await {
                Some(StreamWork::Balance(balance)) => seen.push(balance),
                other => panic!("unexpected work: {other:?}"),
            }
        }
        assert_eq!(seen[0].asset, AssetName::new("usdt"));
        assert_eq!(seen[0].balance.total, dec!(20));
        assert_eq!(seen[1].asset, AssetName::new("eth"));
        assert_eq!(seen[2].asset, AssetName::new("btc"));
    }

    #[tokio::test]
    async fn lifecycle_work_is_never_dropped() {
        let (queue, mut receiver) = stream_queue(1);
        queue
            .push_lifecycle(LifecycleEvent::SubmitTimeout {
                client_id: crate::order::ClientOrderId::new("jcn-1"),
            })
            .await
            .unwrap();
        assert!(matches!(
            receiver.recv().await,
            Some(StreamWork::Lifecycle(_))
        ));
    }
}
