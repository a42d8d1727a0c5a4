//! End-to-end lifecycle scenarios against the mock venue.
//!
//! Each test spins up a full connector (loop, stream consumer,
//! reconciliation, tick pump) over in-memory transports, scripts the venue
//! with canned responses and stream frames, and asserts on the exact event
//! sequence strategies observe. Paused tokio time makes the periodic
//! machinery run fast and deterministically.

use jacana_connector::venue::mock::{
    error_json, mock_stream, ok_json, MockHttpTransport, MockStreamHandle, MockVenueAdapter,
};
use jacana_connector::{
    ClientOrderId, Connector, ConnectorConfig, ConnectorEvent, EventKind, OrderType, RejectReason,
};
use jacana_integration::http::{HttpRequest, Method};
use jacana_integration::TransportError;
use jacana_markets::Symbol;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ALL_KINDS: [EventKind; 6] = [
    EventKind::OrderCreated,
    EventKind::OrderFilled,
    EventKind::OrderDone,
    EventKind::OrderCancelled,
    EventKind::OrderFailure,
    EventKind::TransactionFailure,
];

fn btc_usdt() -> Symbol {
    Symbol::new("btc", "usdt")
}

fn rules_response() -> serde_json::Value {
    json!([{
        "symbol": "BTC-USDT",
        "min_order_size": "0.001",
        "min_notional": "10",
        "price_tick": "0.01",
        "size_tick": "0.001",
    }])
}

fn balances_response() -> serde_json::Value {
    json!([
        {"asset": "usdt", "total": "1000", "available": "1000"},
        {"asset": "btc", "total": "1", "available": "1"},
    ])
}

/// Scenario-specific behaviour layered over the standard routes.
type Override =
    Box<dyn FnMut(&HttpRequest) -> Option<Result<jacana_integration::http::HttpResponse, TransportError>> + Send>;

struct Harness {
    connector: Connector<MockVenueAdapter>,
    stream: MockStreamHandle,
    events: Arc<Mutex<Vec<ConnectorEvent>>>,
}

fn harness(mut special: Override) -> Harness {
    harness_with(move |request| special(request), |_config| {})
}

fn harness_with(
    mut special: impl FnMut(&HttpRequest) -> Option<Result<jacana_integration::http::HttpResponse, TransportError>>
        + Send
        + 'static,
    configure: impl FnOnce(&mut ConnectorConfig),
) -> Harness {
    let responder = move |request: &HttpRequest| {
        if let Some(result) = special(request) {
            return result;
        }
        if request.method == Method::GET && request.path == "/rules" {
            return Ok(ok_json(rules_response()));
        }
        if request.method == Method::GET && request.path == "/balances" {
            return Ok(ok_json(balances_response()));
        }
        Ok(error_json(404, "not_found"))
    };

    let adapter = Arc::new(MockVenueAdapter::default());
    let http = Arc::new(MockHttpTransport::new(responder));
    let (stream, transport) = mock_stream();

    let mut config = ConnectorConfig::new("mock-key", "mock-secret", vec![btc_usdt()]);
    configure(&mut config);

    let connector = Connector::new(config, adapter, http, Box::new(transport));

    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in ALL_KINDS {
        let sink = Arc::clone(&events);
        connector.subscribe(kind, move |event| sink.lock().push(event.clone()));
    }

    connector.start();
    connector.set_order_books_ready(true);

    Harness {
        connector,
        stream,
        events,
    }
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn wait_ready(harness: &Harness) {
    let connector = &harness.connector;
    wait_until(|| connector.ready()).await;
}

fn order_events(events: &[ConnectorEvent], client_id: &ClientOrderId) -> Vec<ConnectorEvent> {
    events
        .iter()
        .filter(|event| event.client_id() == Some(client_id))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Scenario 1: happy limit buy
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn happy_limit_buy_emits_created_fills_done() {
    let harness = harness(Box::new(|request| match request.path.as_ref() {
        "/orders" if request.method == Method::POST => Some(Ok(ok_json(json!({
            "status": "accepted",
            "exchange_id": "E1",
        })))),
        path if path.starts_with("/orders/") && request.method == Method::GET => {
            Some(Ok(ok_json(json!({
                "client_id": path.trim_start_matches("/orders/"),
                "exchange_id": "E1",
                "symbol": "BTC-USDT",
                "status": "open",
                "filled_base": "0",
            }))))
        }
        _ => None,
    }));
    wait_ready(&harness).await;

    let client_id = harness
        .connector
        .buy(&btc_usdt(), dec!(0.01), OrderType::Limit, Some(dec!(30000)))
        .unwrap();

    // Wait for the venue ack to land.
    wait_until(|| !order_events(&harness.events.lock(), &client_id).is_empty()).await;

    harness.stream.send_json(json!({
        "channel": "execution",
        "client_id": client_id.to_string(),
        "exchange_id": "E1",
        "trade_id": "1",
        "price": "30000",
        "qty": "0.004",
    }));
    harness.stream.send_json(json!({
        "channel": "execution",
        "client_id": client_id.to_string(),
        "exchange_id": "E1",
        "trade_id": "2",
        "price": "30000",
        "qty": "0.006",
        "status": "filled",
    }));

    wait_until(|| {
        order_events(&harness.events.lock(), &client_id)
            .iter()
            .any(|event| matches!(event, ConnectorEvent::OrderDone(_)))
    })
    .await;

    let events = order_events(&harness.events.lock(), &client_id);
    match &events[..] {
        [ConnectorEvent::OrderCreated(created), ConnectorEvent::OrderFilled(first), ConnectorEvent::OrderFilled(second), ConnectorEvent::OrderDone(done)] =>
        {
            assert_eq!(created.quantity, dec!(0.01));
            assert_eq!(created.price, Some(dec!(30000)));
            assert_eq!(first.fill.base_qty, dec!(0.004));
            assert_eq!(second.fill.base_qty, dec!(0.006));
            assert_eq!(done.filled_base, dec!(0.01));
            assert_eq!(done.filled_quote, dec!(300));
        }
        other => panic!("unexpected event sequence: {other:#?}"),
    }
    assert!(harness.connector.in_flight_orders().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 2: indeterminate resolved positive
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn indeterminate_submission_resolves_to_open() {
    let harness = harness_with(
        |request| match request.path.as_ref() {
            "/orders" if request.method == Method::POST => {
                Some(Err(TransportError::Timeout(Duration::from_secs(10))))
            }
            path if path.starts_with("/orders/") && request.method == Method::GET => {
                Some(Ok(ok_json(json!({
                    "client_id": path.trim_start_matches("/orders/"),
                    "exchange_id": "E7",
                    "symbol": "BTC-USDT",
                    "status": "open",
                    "filled_base": "0",
                }))))
            }
            _ => None,
        },
        |config| {
            // The test clock is the wall clock; let the grace elapse at once.
            config.tunables.order_not_exist_grace_secs = 0;
        },
    );
    wait_ready(&harness).await;

    let client_id = harness
        .connector
        .buy(&btc_usdt(), dec!(0.01), OrderType::Limit, Some(dec!(30000)))
        .unwrap();

    wait_until(|| !order_events(&harness.events.lock(), &client_id).is_empty()).await;

    // The deferred OrderCreated is the FIRST event; nothing fired in the gap.
    let events = order_events(&harness.events.lock(), &client_id);
    match &events[0] {
        ConnectorEvent::OrderCreated(created) => {
            assert_eq!(created.exchange_id.as_ref().map(|id| id.as_str()), Some("E7"));
        }
        other => panic!("expected deferred OrderCreated, got {other:?}"),
    }

    // Normal lifecycle continues.
    harness.stream.send_json(json!({
        "channel": "execution",
        "client_id": client_id.to_string(),
        "trade_id": "9",
        "price": "30000",
        "qty": "0.01",
    }));
    wait_until(|| {
        order_events(&harness.events.lock(), &client_id)
            .iter()
            .any(|event| matches!(event, ConnectorEvent::OrderDone(_)))
    })
    .await;
}

// ---------------------------------------------------------------------------
// Scenario 3: indeterminate resolved negative
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn never_acknowledged_submission_fails_once() {
    let harness = harness_with(
        |request| match request.path.as_ref() {
            "/orders" if request.method == Method::POST => {
                Some(Err(TransportError::Timeout(Duration::from_secs(10))))
            }
            path if path.starts_with("/orders/") && request.method == Method::GET => {
                Some(Ok(error_json(404, "not_found")))
            }
            _ => None,
        },
        |config| {
            config.tunables.order_not_exist_grace_secs = 0;
        },
    );
    wait_ready(&harness).await;

    let client_id = harness
        .connector
        .buy(&btc_usdt(), dec!(0.01), OrderType::Limit, Some(dec!(30000)))
        .unwrap();

    wait_until(|| {
        order_events(&harness.events.lock(), &client_id)
            .iter()
            .any(|event| matches!(event, ConnectorEvent::OrderFailure(_)))
    })
    .await;

    let events = order_events(&harness.events.lock(), &client_id);
    let failures: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::OrderFailure(failure) => Some(failure),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1, "exactly one failure: {events:#?}");
    assert_eq!(failures[0].reason, RejectReason::NeverAcknowledged);
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, ConnectorEvent::OrderCreated(_))),
        "no OrderCreated may ever fire"
    );
    assert!(harness.connector.in_flight_orders().is_empty(), "forgotten");
}

// ---------------------------------------------------------------------------
// Scenario 4: cancel-all with mixed outcomes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_all_reports_mixed_outcomes() {
    // Cancel behaviour per client id, installed after the ids are known.
    let cancel_plan: Arc<Mutex<HashMap<String, &'static str>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let plan = Arc::clone(&cancel_plan);
    let placed = Arc::new(Mutex::new(0u64));

    let harness = harness(Box::new(move |request| {
        if request.method == Method::POST && request.path == "/orders" {
            let count = {
                let mut placed = placed.lock();
                *placed += 1;
                *placed
            };
            return Some(Ok(ok_json(json!({
                "status": "accepted",
                "exchange_id": format!("E{count}"),
            }))));
        }
        if request.method == Method::DELETE {
            let client_id = request.path.trim_start_matches("/orders/");
            return match plan.lock().get(client_id).copied() {
                Some("cancelled") => Some(Ok(ok_json(json!({"status": "cancelled"})))),
                Some("already_closed") => Some(Ok(error_json(400, "already_closed"))),
                Some("network") => Some(Err(TransportError::Network("reset".to_string()))),
                _ => Some(Ok(ok_json(json!({"status": "cancelled"})))),
            };
        }
        None
    }));
    wait_ready(&harness).await;

    let symbol = btc_usdt();
    let c1 = harness
        .connector
        .buy(&symbol, dec!(0.01), OrderType::Limit, Some(dec!(30000)))
        .unwrap();
    let c2 = harness
        .connector
        .buy(&symbol, dec!(0.01), OrderType::Limit, Some(dec!(30001)))
        .unwrap();
    let c3 = harness
        .connector
        .sell(&symbol, dec!(0.01), OrderType::Limit, Some(dec!(30100)))
        .unwrap();
    cancel_plan.lock().insert(c1.to_string(), "cancelled");
    cancel_plan.lock().insert(c2.to_string(), "already_closed");
    cancel_plan.lock().insert(c3.to_string(), "network");

    // All three acknowledged and open.
    wait_until(|| {
        harness
            .connector
            .in_flight_orders()
            .iter()
            .filter(|order| order.state.is_open())
            .count()
            == 3
    })
    .await;

    let mut results = harness.connector.cancel_all(Duration::from_secs(120)).await;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    let mut expected = vec![(c1.clone(), true), (c2.clone(), true), (c3.clone(), false)];
    expected.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(results, expected);

    // c3's cancel failed: it stays tracked.
    wait_until(|| {
        let tracked = harness.connector.in_flight_orders();
        tracked.len() == 2 && tracked.iter().any(|order| order.client_id == c3)
    })
    .await;
    let tracked = harness.connector.in_flight_orders();
    // c1 got a cancel ack and is on its way out (or already gone); c2 waits
    // for reconciliation but the venue deems it closed, so only c2 and c3
    // may remain, and c3 must.
    assert!(tracked.iter().any(|order| order.client_id == c3));
    assert!(!tracked.iter().any(|order| order.client_id == c1));
}

// ---------------------------------------------------------------------------
// Scenario 5: duplicate fill suppression across stream and poll
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duplicate_trade_across_stream_and_poll_fills_once() {
    let harness = harness(Box::new(|request| match request.path.as_ref() {
        "/orders" if request.method == Method::POST => Some(Ok(ok_json(json!({
            "status": "accepted",
            "exchange_id": "E1",
        })))),
        path if path.starts_with("/orders/") && request.method == Method::GET => {
            // The poll snapshot itemises the same trade the stream
            // delivered.
            Some(Ok(ok_json(json!({
                "client_id": path.trim_start_matches("/orders/"),
                "exchange_id": "E1",
                "symbol": "BTC-USDT",
                "status": "partially_filled",
                "filled_base": "0.005",
                "trades": [
                    {"trade_id": "42", "price": "30000", "qty": "0.005"},
                ],
            }))))
        }
        _ => None,
    }));
    wait_ready(&harness).await;

    let client_id = harness
        .connector
        .buy(&btc_usdt(), dec!(0.01), OrderType::Limit, Some(dec!(30000)))
        .unwrap();
    wait_until(|| !order_events(&harness.events.lock(), &client_id).is_empty()).await;

    harness.stream.send_json(json!({
        "channel": "execution",
        "client_id": client_id.to_string(),
        "trade_id": "42",
        "price": "30000",
        "qty": "0.005",
    }));

    wait_until(|| {
        order_events(&harness.events.lock(), &client_id)
            .iter()
            .any(|event| matches!(event, ConnectorEvent::OrderFilled(_)))
    })
    .await;

    // Let several status-poll cadences elapse; the snapshot keeps
    // re-delivering trade 42.
    tokio::time::sleep(Duration::from_secs(30)).await;

    let fills: Vec<_> = order_events(&harness.events.lock(), &client_id)
        .into_iter()
        .filter(|event| matches!(event, ConnectorEvent::OrderFilled(_)))
        .collect();
    assert_eq!(fills.len(), 1, "trade 42 must fill exactly once: {fills:#?}");
    let tracked = harness.connector.in_flight_orders();
    assert_eq!(tracked[0].filled_base, dec!(0.005));
}

// ---------------------------------------------------------------------------
// Scenario 6: post-only violation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn post_only_violation_fails_without_open() {
    let harness = harness(Box::new(|request| match request.path.as_ref() {
        "/orders" if request.method == Method::POST => Some(Ok(ok_json(json!({
            "status": "rejected",
            "reason": "post_only_violation",
        })))),
        _ => None,
    }));
    wait_ready(&harness).await;

    let client_id = harness
        .connector
        .buy(
            &btc_usdt(),
            dec!(0.01),
            OrderType::LimitMaker,
            Some(dec!(30000)),
        )
        .unwrap();

    wait_until(|| {
        order_events(&harness.events.lock(), &client_id)
            .iter()
            .any(|event| matches!(event, ConnectorEvent::OrderFailure(_)))
    })
    .await;

    let events = order_events(&harness.events.lock(), &client_id);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ConnectorEvent::OrderFailure(failure) => {
            assert_eq!(failure.reason, RejectReason::PostOnlyViolation);
        }
        other => panic!("expected OrderFailure, got {other:?}"),
    }
    assert!(harness.connector.in_flight_orders().is_empty());
}

// ---------------------------------------------------------------------------
// Pre-trade validation and readiness
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rule_violations_are_refused_locally() {
    let harness = harness(Box::new(|_| None));
    wait_ready(&harness).await;
    let symbol = btc_usdt();

    // Below min size.
    assert!(harness
        .connector
        .buy(&symbol, dec!(0.0001), OrderType::Limit, Some(dec!(30000)))
        .is_err());
    // Price off tick.
    assert!(harness
        .connector
        .buy(&symbol, dec!(0.01), OrderType::Limit, Some(dec!(30000.005)))
        .is_err());
    // Below min notional.
    assert!(harness
        .connector
        .buy(&symbol, dec!(0.001), OrderType::Limit, Some(dec!(100)))
        .is_err());
    // Unknown symbol.
    assert!(harness
        .connector
        .buy(
            &Symbol::new("eth", "usdt"),
            dec!(1),
            OrderType::Limit,
            Some(dec!(2000))
        )
        .is_err());
    // Nothing reached the venue, nothing is tracked.
    assert!(harness.connector.in_flight_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn ready_requires_books_balances_and_rules() {
    let harness = harness(Box::new(|_| None));
    // Books flagged ready in the harness; rules and balances arrive with the
    // first reconciliation sweep.
    wait_ready(&harness).await;
    assert!(harness.connector.ready());
    wait_until(|| harness.connector.stream_connected()).await;
    assert!(harness.connector.trading_rule(&btc_usdt()).is_some());

    harness.connector.set_order_books_ready(false);
    assert!(!harness.connector.ready());
    harness.connector.set_order_books_ready(true);

    harness.connector.stop().await;
    assert!(!harness.connector.ready(), "stopped connector is not ready");
}

// ---------------------------------------------------------------------------
// Restart continuity
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn tracking_states_survive_export_import() {
    let scenario = harness(Box::new(|request| match request.path.as_ref() {
        "/orders" if request.method == Method::POST => Some(Ok(ok_json(json!({
            "status": "accepted",
            "exchange_id": "E1",
        })))),
        _ => None,
    }));
    wait_ready(&scenario).await;

    let client_id = scenario
        .connector
        .buy(&btc_usdt(), dec!(0.01), OrderType::Limit, Some(dec!(30000)))
        .unwrap();
    wait_until(|| {
        scenario
            .connector
            .in_flight_orders()
            .iter()
            .any(|order| order.state.is_open())
    })
    .await;

    let blob = scenario.connector.export_tracking_states().unwrap();

    // A fresh connector rehydrates the same orders.
    let restored = harness(Box::new(|_| None));
    restored.connector.import_tracking_states(&blob).unwrap();
    let orders = restored.connector.in_flight_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].client_id, client_id);
    assert!(orders[0].state.is_open());
}
