//! Order lifecycle across REST, the fills stream and the reconciler

use omniex_core::fixed;
use omniex_exchanges::http::Method;
use omniex_exchanges::prelude::*;
use omniex_exchanges::reconciler::fold;
use omniex_tests::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn pending_order() -> serde_json::Value {
    json!({"success": true, "result": {
        "id": "42", "client_id": "my-order-1", "pair": "XBTUSD", "side": "buy",
        "amount": "2", "price": "100", "status": "pending", "time": 1700000000000u64
    }})
}

fn trade(order_id: &str, trade_id: &str, amount: &str, price: &str) -> serde_json::Value {
    json!({
        "order_id": order_id, "trade_id": trade_id, "pair": "XBTUSD", "side": "buy",
        "amount": amount, "price": price, "fee": "0.1", "fee_currency": "USD", "time": 1700000000500u64
    })
}

#[monoio::test(timer_enabled = true)]
async fn test_limit_buy_then_fill_is_filled() {
    let (client, transport, _sessions) = mockex_client();
    transport.respond_json(Method::Post, "/v1/order", pending_order());
    let request = OrderRequest::limit("BTC-USD", OrderSide::Buy, fixed!(2), fixed!(100)).with_client_order_id("my-order-1");

    let placed = client.place_order(&request).await.unwrap();

    assert_eq!(placed.order_id, "42");
    assert_eq!(placed.symbol, "BTC-USD");
    assert_eq!(placed.status, OrderResultStatus::Pending);
    assert_eq!(placed.filled_amount, Fixed::ZERO);
    assert_eq!(placed.requested_amount, Some(fixed!(2)));
    assert_eq!(placed.limit_price, Some(fixed!(100)));

    let sent = body_json(&transport.last_request().unwrap());
    assert_eq!(sent["pair"], "XBTUSD");
    assert_eq!(sent["side"], "buy");
    assert_eq!(sent["type"], "limit");
    assert_eq!(sent["amount"], "2");
    assert_eq!(sent["price"], "100");
    assert_eq!(sent["client_id"], "my-order-1");

    let execution = RawFill {
        order_id: "42".to_string(),
        trade_id: Some("t-1".to_string()),
        symbol: "BTC-USD".to_string(),
        side: OrderSide::Buy,
        amount: fixed!(2),
        price: fixed!(100),
        timestamp: 1_700_000_000_500,
        fee: None,
        fee_currency: None,
    };
    let filled = fold(Some(placed), execution).unwrap();

    assert_eq!(filled.status, OrderResultStatus::Filled);
    assert_eq!(filled.filled_amount, fixed!(2));
    assert_eq!(filled.average_price, fixed!(100));
}

#[test]
fn test_blocking_place_then_streamed_fills() {
    init_test_logging();
    let (client, transport, sessions) = mockex_client();
    transport.respond_json(Method::Post, "/v1/order", pending_order());

    let placed = client
        .place_order_blocking(&OrderRequest::limit("BTC-USD", OrderSide::Buy, fixed!(2), fixed!(100)))
        .unwrap();
    assert_eq!(placed.status, OrderResultStatus::Pending);

    let book = Arc::new(Mutex::new(Some(placed)));
    let (done_tx, done) = flume::unbounded();
    let sink = Arc::clone(&book);
    let _handle = client
        .subscribe_fills_blocking(move |fill| {
            let mut slot = sink.lock().unwrap();
            let order = fold(slot.take(), fill).unwrap();
            let terminal = order.is_terminal();
            *slot = Some(order);
            if terminal {
                let _ = done_tx.send(());
            }
        })
        .unwrap();

    let session = sessions.recv_timeout(WAIT).unwrap();
    assert!(session.next_sent(WAIT).unwrap().contains(r#""event":"auth""#));
    session.next_sent(WAIT).unwrap();
    session.push(json!({"stream": "fills", "data": trade("42", "t-1", "0.5", "99")}).to_string());
    session.push(json!({"stream": "fills", "data": trade("42", "t-1", "0.5", "99")}).to_string());
    session.push(json!({"stream": "fills", "data": trade("42", "t-2", "1.5", "101")}).to_string());

    done.recv_timeout(WAIT).unwrap();
    let order = book.lock().unwrap().clone().unwrap();
    assert_eq!(order.status, OrderResultStatus::Filled);
    assert_eq!(order.fill_count, 2);
    assert_eq!(order.average_price, fixed!(100.5));
    assert_eq!(order.fees, fixed!(0.2));
    assert_eq!(order.fee_currency.as_deref(), Some("USD"));
}

#[monoio::test(timer_enabled = true)]
async fn test_order_details_fold_inline_and_listed_trades() {
    let (client, transport, _sessions) = mockex_client();
    transport.respond_json(
        Method::Post,
        "/v1/order/status",
        json!({"result": {
            "id": "42", "pair": "XBTUSD", "side": "buy", "amount": "3", "price": "100", "status": "open",
            "trades": [trade("42", "t-1", "1", "100")]
        }}),
    );
    transport.respond_json(
        Method::Post,
        "/v1/order/trades",
        json!({"result": [
            trade("42", "t-1", "1", "100"),
            trade("42", "t-2", "1", "103"),
            trade("17", "t-9", "5", "1"),
        ]}),
    );

    let order = client.get_order_details("BTC-USD", "42").await.unwrap();

    assert_eq!(order.filled_amount, fixed!(2));
    assert_eq!(order.average_price, fixed!(101.5));
    assert_eq!(order.status, OrderResultStatus::FilledPartially);
    assert_eq!(order.remaining_amount(), Some(fixed!(1)));
    assert_eq!(order.trade_ids.len(), 2);
}

#[monoio::test(timer_enabled = true)]
async fn test_cancel_after_partial_fill() {
    let (client, transport, _sessions) = mockex_client();
    transport.respond_json(
        Method::Post,
        "/v1/order/cancel",
        json!({"result": {
            "id": "42", "pair": "XBTUSD", "side": "buy", "amount": "2", "status": "cancelled",
            "trades": [trade("42", "t-1", "0.5", "100")]
        }}),
    );

    let order = client.cancel_order("BTC-USD", "42").await.unwrap();

    assert_eq!(order.status, OrderResultStatus::Canceled);
    assert_eq!(order.filled_amount, fixed!(0.5));
    assert!(order.is_terminal());
}

#[monoio::test(timer_enabled = true)]
async fn test_unrecognized_state_surfaces_as_unknown() {
    let (client, transport, _sessions) = mockex_client();
    transport.respond_json(
        Method::Post,
        "/v1/order/status",
        json!({"result": {"id": "42", "pair": "XBTUSD", "side": "buy", "amount": "2", "status": "under_review"}}),
    );
    transport.respond_json(Method::Post, "/v1/order/trades", json!({"result": []}));

    let order = client.get_order_details("BTC-USD", "42").await.unwrap();

    assert_eq!(order.status, OrderResultStatus::Unknown);
}

#[monoio::test(timer_enabled = true)]
async fn test_invalid_order_is_rejected_locally() {
    let (client, transport, _sessions) = mockex_client();
    let mut request = OrderRequest::limit("BTC-USD", OrderSide::Buy, fixed!(1), fixed!(100));
    request.price = None;

    let err = client.place_order(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Domain);
    assert!(transport.requests().is_empty());
}

#[test]
fn test_blocking_reads() {
    let (client, transport, _sessions) = mockex_client();
    transport
        .respond_json(
            Method::Get,
            "/v1/book",
            json!({"result": {"bids": [["99", "1"], ["100", "2"]], "asks": [["102", "1"], ["101", "3"]], "time": 5}}),
        )
        .respond_json(
            Method::Get,
            "/v1/ticker",
            json!({"result": {"bid": "100", "ask": "101", "last": "100.5", "volume": "7", "time": 5}}),
        );

    let book = client.get_order_book_blocking("BTC-USD", Some(10)).unwrap();
    assert_eq!(book.symbol, "BTC-USD");
    assert_eq!(book.best_bid().unwrap().price, fixed!(100));
    assert_eq!(book.best_ask().unwrap().price, fixed!(101));
    assert_eq!(query_param(&transport.last_request().unwrap().url, "depth"), Some("10"));

    let ticker = client.get_ticker_blocking("BTC-USD").unwrap();
    assert_eq!(ticker.last, fixed!(100.5));
}
