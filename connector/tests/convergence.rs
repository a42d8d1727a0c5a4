//! Property tests: poll/stream interleaving convergence, fill accounting,
//! and nonce ordering under concurrent trade calls.

use chrono::{Duration as ChronoDuration, Utc};
use jacana_connector::executor::{ExecutorConfig, RestCommandExecutor};
use jacana_connector::lifecycle::{LifecycleEvent, OrderLifecycleMachine};
use jacana_connector::order::registry::InFlightOrderRegistry;
use jacana_connector::venue::mock::{ok_json, MockHttpTransport, MockVenueAdapter};
use jacana_connector::venue::{
    ExecutionEvent, FeeSemantics, OrderSnapshot, OrderSnapshotStatus, QueryOutcome,
};
use jacana_connector::{
    ClientOrderId, ConnectorEvent, ExchangeOrderId, FeeRates, OrderIntent, OrderType, TradeFill,
    TradeId,
};
use jacana_integration::http::{HttpRequest, Method};
use jacana_markets::{Side, Symbol};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

fn machine() -> OrderLifecycleMachine {
    OrderLifecycleMachine::new(
        ChronoDuration::seconds(10),
        2,
        FeeRates {
            maker: dec!(0.001),
            taker: dec!(0.002),
        },
        FeeSemantics::Delta,
    )
}

fn intent(client_id: &ClientOrderId, quantity: Decimal) -> OrderIntent {
    OrderIntent {
        client_id: client_id.clone(),
        symbol: Symbol::new("btc", "usdt"),
        side: Side::Buy,
        kind: OrderType::Limit,
        quantity,
        price: Some(dec!(30000)),
    }
}

fn stream_fill(client_id: &ClientOrderId, trade_id: &str, qty: Decimal) -> LifecycleEvent {
    LifecycleEvent::StreamFill(ExecutionEvent {
        client_id: Some(client_id.clone()),
        exchange_id: Some(ExchangeOrderId::new("E1")),
        fill: TradeFill {
            trade_id: Some(TradeId::new(trade_id)),
            price: dec!(30000),
            base_qty: qty,
            quote_qty: qty * dec!(30000),
            fee: None,
            is_maker: Some(true),
            ts: Utc::now(),
        },
        status: None,
    })
}

/// The fixed event set of the convergence property: an ack, two stream
/// fills, and a poll snapshot that itemises the same two trades and reports
/// the order filled.
fn base_events(client_id: &ClientOrderId) -> Vec<LifecycleEvent> {
    let snapshot = OrderSnapshot {
        client_id: Some(client_id.clone()),
        exchange_id: Some(ExchangeOrderId::new("E1")),
        symbol: Some(Symbol::new("btc", "usdt")),
        status: OrderSnapshotStatus::Filled,
        filled_base: Some(dec!(0.01)),
        filled_quote: Some(dec!(300)),
        trades: vec![
            TradeFill {
                trade_id: Some(TradeId::new("t1")),
                price: dec!(30000),
                base_qty: dec!(0.004),
                quote_qty: dec!(120),
                fee: None,
                is_maker: Some(true),
                ts: Utc::now(),
            },
            TradeFill {
                trade_id: Some(TradeId::new("t2")),
                price: dec!(30000),
                base_qty: dec!(0.006),
                quote_qty: dec!(180),
                fee: None,
                is_maker: Some(true),
                ts: Utc::now(),
            },
        ],
        fee: None,
        ts: Utc::now(),
    };
    vec![
        LifecycleEvent::SubmitAck {
            client_id: client_id.clone(),
            exchange_id: Some(ExchangeOrderId::new("E1")),
            ts: Utc::now(),
        },
        stream_fill(client_id, "t1", dec!(0.004)),
        stream_fill(client_id, "t2", dec!(0.006)),
        LifecycleEvent::PollOrderSnapshot {
            client_id: client_id.clone(),
            outcome: QueryOutcome::Found(snapshot),
        },
    ]
}

fn fill_sum(events: &[ConnectorEvent]) -> Decimal {
    events
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::OrderFilled(filled) => Some(filled.fill.base_qty),
            _ => None,
        })
        .sum()
}

fn count(events: &[ConnectorEvent], probe: impl Fn(&ConnectorEvent) -> bool) -> usize {
    events.iter().filter(|event| probe(event)).count()
}

proptest! {
    /// Any interleaving of the fixed poll/stream event set (with arbitrary
    /// duplicated deliveries) converges to the same terminal state and the
    /// same emission counts.
    #[test]
    fn poll_stream_interleavings_converge(
        order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle(),
        dups in prop::collection::vec(0..4usize, 0..4),
        dup_positions in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let client_id = ClientOrderId::new("jcn-prop-1");
        let machine = machine();
        let mut registry = InFlightOrderRegistry::new();
        registry.track(&intent(&client_id, dec!(0.01)), Utc::now()).unwrap();

        // Deliver the base permutation plus duplicates spliced at arbitrary
        // positions.
        let base = base_events(&client_id);
        let mut deliveries: Vec<LifecycleEvent> =
            order.iter().map(|&i| base[i].clone()).collect();
        for (&slot, &dup) in dup_positions.iter().zip(dups.iter()) {
            let at = slot.min(deliveries.len());
            deliveries.insert(at, base[dup].clone());
        }

        let mut emitted = Vec::new();
        for event in deliveries {
            let events = machine
                .ingest(&mut registry, event, Utc::now())
                .expect("no protocol violation in this event set");
            emitted.extend(events);
        }

        // Convergence: terminal, forgotten, and exactly-once emissions.
        prop_assert!(registry.is_empty(), "terminal order must be forgotten");
        prop_assert_eq!(
            count(&emitted, |e| matches!(e, ConnectorEvent::OrderCreated(_))),
            1
        );
        prop_assert_eq!(
            count(&emitted, |e| matches!(e, ConnectorEvent::OrderDone(_))),
            1
        );
        prop_assert_eq!(
            count(&emitted, |e| matches!(e, ConnectorEvent::OrderCancelled(_)
                | ConnectorEvent::OrderFailure(_))),
            0
        );
        prop_assert_eq!(fill_sum(&emitted), dec!(0.01));
    }

    /// The sum of emitted fill deltas always equals the order's
    /// `filled_base`, never exceeding the original quantity, regardless of
    /// duplicate deliveries.
    #[test]
    fn fill_deltas_sum_to_filled_base(
        fills in prop::collection::vec((1..=6u32, 1..=5u32), 1..20),
    ) {
        let client_id = ClientOrderId::new("jcn-prop-2");
        let machine = machine();
        let mut registry = InFlightOrderRegistry::new();
        registry.track(&intent(&client_id, dec!(1)), Utc::now()).unwrap();
        machine
            .ingest(
                &mut registry,
                LifecycleEvent::SubmitAck {
                    client_id: client_id.clone(),
                    exchange_id: Some(ExchangeOrderId::new("E1")),
                    ts: Utc::now(),
                },
                Utc::now(),
            )
            .unwrap();

        let mut emitted = Vec::new();
        for (trade, qty_millis) in &fills {
            let qty = Decimal::new(i64::from(*qty_millis), 3);
            let event = stream_fill(&client_id, &format!("t{trade}"), qty);
            emitted.extend(machine.ingest(&mut registry, event, Utc::now()).unwrap());
        }

        let order = registry
            .get(&client_id)
            .expect("order cannot complete: max fill volume is 0.1 of 1.0");
        prop_assert_eq!(fill_sum(&emitted), order.filled_base);
        prop_assert!(order.filled_base <= dec!(1));

        // Each unique trade id applied exactly once.
        let mut unique: std::collections::HashMap<u32, Decimal> = std::collections::HashMap::new();
        for (trade, qty_millis) in &fills {
            unique.entry(*trade).or_insert(Decimal::new(i64::from(*qty_millis), 3));
        }
        let expected: Decimal = unique.values().copied().sum();
        prop_assert_eq!(order.filled_base, expected);
    }
}

/// Open-order listings round-trip through the executor and adapter.
#[tokio::test(start_paused = true)]
async fn open_orders_query_round_trips() {
    let adapter = Arc::new(MockVenueAdapter::default());
    let http = Arc::new(MockHttpTransport::new(|_: &HttpRequest| {
        Ok(ok_json(json!([{
            "client_id": "jcn-a",
            "exchange_id": "E1",
            "symbol": "BTC-USDT",
            "status": "partially_filled",
            "filled_base": "0.004",
        }])))
    }));
    let executor = RestCommandExecutor::new(adapter, http, ExecutorConfig::default());

    let snapshots = executor.query_open_orders().await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].client_id, Some(ClientOrderId::new("jcn-a")));
    assert_eq!(snapshots[0].status, OrderSnapshotStatus::PartiallyFilled);
    assert_eq!(snapshots[0].filled_base, Some(dec!(0.004)));
}

/// Nonces delivered to the venue are strictly increasing across any
/// interleaving of concurrent place and cancel calls.
#[tokio::test(start_paused = true)]
async fn nonce_sequence_strictly_increases_under_concurrency() {
    let adapter = Arc::new(MockVenueAdapter::default());
    let http = Arc::new(MockHttpTransport::new(|request: &HttpRequest| {
        if request.method == Method::POST {
            Ok(ok_json(json!({"status": "accepted", "exchange_id": "E1"})))
        } else {
            Ok(ok_json(json!({"status": "cancelled"})))
        }
    }));
    let requests = http.requests();
    let executor = Arc::new(RestCommandExecutor::new(
        adapter,
        http,
        ExecutorConfig::default(),
    ));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let executor = Arc::clone(&executor);
        let client_id = ClientOrderId::new(format!("jcn-nonce-{i}"));
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let _ = executor.place(&intent(&client_id, dec!(0.01))).await;
            } else {
                let _ = executor.cancel(&client_id, None).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let nonces: Vec<u64> = requests
        .lock()
        .iter()
        .filter_map(|request| {
            request
                .headers
                .iter()
                .find(|(name, _)| name == "X-Mock-Nonce")
                .and_then(|(_, value)| value.parse().ok())
        })
        .collect();
    assert_eq!(nonces.len(), 10, "every trade call carries a nonce");
    for window in nonces.windows(2) {
        assert!(
            window[1] > window[0],
            "nonces must strictly increase in delivery order: {nonces:?}"
        );
    }
}
