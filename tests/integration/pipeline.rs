//! Request pipeline behaviour through the public client, against the mockex
//! adapter on a scripted transport

use omniex_exchanges::auth::{to_base64, Credentials};
use omniex_exchanges::http::Method;
use omniex_exchanges::prelude::*;
use omniex_exchanges::Operation;
use omniex_tests::*;
use serde_json::json;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn client_with(config: ExchangeConfig, hooks: MockexHooks) -> (ExchangeClient, Arc<FakeTransport>) {
    let transport = FakeTransport::new();
    let (connector, _sessions) = FakeConnector::new();
    let client = ExchangeClient::with_transports(Arc::new(hooks), config, transport.clone(), connector)
        .unwrap()
        .with_credentials(Credentials::new("mock-key", "mock-secret"));
    (client, transport)
}

fn markets_body() -> serde_json::Value {
    json!({"success": true, "result": [
        {"pair": "XBTUSD", "base": "BTC", "quote": "USD", "active": true},
        {"pair": "eth_usd", "base": "ETH", "quote": "USD", "active": true},
        {"pair": "weird pair!", "base": "?", "quote": "?", "active": false},
    ]})
}

#[monoio::test(timer_enabled = true)]
async fn test_public_get_puts_native_symbol_in_query() {
    let (client, transport, _) = mockex_client();
    transport.respond_json(
        Method::Get,
        "/v1/ticker",
        json!({"result": {"bid": "64999.5", "ask": "65000.5", "last": "65000", "volume": "12.5", "time": 1700000000000u64}}),
    );

    let ticker = client.get_ticker("BTC-USD").await.unwrap();

    assert_eq!(ticker.symbol, "BTC-USD");
    assert_eq!(ticker.bid, Fixed::from_str_exact("64999.5").unwrap());
    let request = transport.last_request().unwrap();
    assert_eq!(query_param(&request.url, "pair"), Some("XBTUSD"));
    assert!(request.header("API-Sign").is_none());
    assert!(request.body.is_none());
}

#[monoio::test(timer_enabled = true)]
async fn test_signed_post_carries_nonce_and_signature() {
    let (client, transport, _) = mockex_client();
    transport.respond_json(
        Method::Post,
        "/v1/order/cancel",
        json!({"result": {"id": "77", "pair": "eth_usd", "side": "sell", "amount": "1", "status": "canceled"}}),
    );

    let order = client.cancel_order("ETH-USD", "77").await.unwrap();
    assert_eq!(order.symbol, "ETH-USD");
    assert_eq!(order.status, OrderResultStatus::Canceled);

    let request = transport.last_request().unwrap();
    let body = body_json(&request);
    assert_eq!(body["id"], "77");
    assert!(body["nonce"].is_string(), "nonce travels as a string: {body}");
    assert_eq!(request.header("API-Key"), Some("mock-key"));

    let expected = Credentials::new("mock-key", "mock-secret")
        .hmac_sha512(format!("/v1/order/cancel{}", request.body.as_deref().unwrap()).as_bytes())
        .unwrap();
    assert_eq!(request.header("API-Sign"), Some(to_base64(&expected).as_str()));
}

#[monoio::test(timer_enabled = true)]
async fn test_nonces_increase_across_calls() {
    let (client, transport, _) = mockex_client();
    transport.respond_json(
        Method::Post,
        "/v1/order/status",
        json!({"result": {"id": "1", "pair": "XBTUSD", "side": "buy", "amount": "1", "status": "open"}}),
    );
    transport.respond_json(Method::Post, "/v1/order/trades", json!({"result": []}));

    for _ in 0..3 {
        client.get_order_details("BTC-USD", "1").await.unwrap();
    }

    let nonces: Vec<u64> = transport
        .requests()
        .iter()
        .map(|r| body_json(r)["nonce"].as_str().unwrap().parse().unwrap())
        .collect();
    assert_eq!(nonces.len(), 6);
    assert!(nonces.windows(2).all(|w| w[0] < w[1]), "{nonces:?}");
}

#[monoio::test(timer_enabled = true)]
async fn test_error_envelopes_are_not_decoded_as_data() {
    let (client, transport, _) = mockex_client();
    transport
        .respond_json(Method::Post, "/v1/order", json!({"success": false, "message": "Insufficient funds"}))
        .respond_json(Method::Post, "/v1/order", json!({"error": "Invalid signature"}));
    let order = OrderRequest::limit("BTC-USD", OrderSide::Buy, Fixed::from_i64(1), Fixed::from_i64(100));

    let err = client.place_order(&order).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Domain);
    assert_eq!(err.exchange_message(), Some("Insufficient funds"));

    let err = client.place_order(&order).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(!err.is_retryable());
}

#[monoio::test(timer_enabled = true)]
async fn test_server_errors_are_retryable_transport_errors() {
    let (client, transport, _) = mockex_client();
    transport
        .respond(Method::Get, "/v1/ticker", 503, "Service Unavailable")
        .respond(Method::Get, "/v1/ticker", 429, r#"{"message":"Too many requests"}"#);

    for _ in 0..2 {
        let err = client.get_ticker("BTC-USD").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_retryable());
    }
}

#[monoio::test(timer_enabled = true)]
async fn test_slow_transport_times_out() {
    let (client, transport) = client_with(mockex_config().with_timeout_ms(30), MockexHooks::new());
    transport.respond_json(Method::Get, "/v1/ticker", json!({"result": {}}));
    transport.set_delay(Duration::from_millis(300));

    let started = Instant::now();
    let err = client.get_ticker("BTC-USD").await.unwrap_err();

    assert!(matches!(err, ExchangeError::Timeout(_)), "{err}");
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[monoio::test(timer_enabled = true)]
async fn test_rate_gate_spaces_requests() {
    let (client, transport) = client_with(mockex_config().with_rate_limit(2, 200), MockexHooks::new());
    transport.respond_json(
        Method::Get,
        "/v1/book",
        json!({"result": {"bids": [["1", "1"]], "asks": [["2", "1"]], "time": 1}}),
    );

    let started = Instant::now();
    for _ in 0..3 {
        client.get_order_book("BTC-USD", Some(5)).await.unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(180), "{:?}", started.elapsed());
    assert_eq!(transport.calls("/v1/book"), 3);
}

#[monoio::test(timer_enabled = true)]
async fn test_rate_gate_wait_counts_against_deadline() {
    let config = mockex_config().with_rate_limit(1, 10_000).with_timeout_ms(50);
    let (client, transport) = client_with(config, MockexHooks::new());
    transport.respond_json(
        Method::Get,
        "/v1/book",
        json!({"result": {"bids": [], "asks": [], "time": 1}}),
    );

    client.get_order_book("BTC-USD", None).await.unwrap();
    let err = client.get_order_book("BTC-USD", None).await.unwrap_err();

    assert!(matches!(err, ExchangeError::Timeout(_)), "{err}");
    assert_eq!(transport.calls("/v1/book"), 1);
}

#[monoio::test(timer_enabled = true)]
async fn test_concurrent_market_lookups_share_one_request() {
    let (client, transport, _) = mockex_client();
    transport.respond_json(Method::Get, "/v1/markets", markets_body());
    transport.set_delay(Duration::from_millis(30));
    let client = Rc::new(client);

    let lookups: Vec<_> = (0..3)
        .map(|_| {
            let client = Rc::clone(&client);
            monoio::spawn(async move { client.get_market_symbols().await })
        })
        .collect();
    let mut results = Vec::new();
    for lookup in lookups {
        results.push(lookup.await.unwrap());
    }

    assert_eq!(transport.calls("/v1/markets"), 1);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    let symbols: Vec<&str> = results[0].iter().map(|m| m.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTC-USD", "ETH-USD"]);

    // Served from cache afterwards
    client.get_market_symbols().await.unwrap();
    assert_eq!(transport.calls("/v1/markets"), 1);
}

#[monoio::test(timer_enabled = true)]
async fn test_failed_lookup_is_not_cached() {
    let (client, transport, _) = mockex_client();
    transport
        .respond(Method::Get, "/v1/markets", 502, "Bad Gateway")
        .respond_json(Method::Get, "/v1/markets", markets_body());

    assert!(client.get_market_symbols().await.is_err());
    assert_eq!(client.get_market_symbols().await.unwrap().len(), 2);
    assert_eq!(transport.calls("/v1/markets"), 2);
}

#[monoio::test(timer_enabled = true)]
async fn test_unsupported_operation_fails_before_network() {
    let restricted = Capabilities {
        ticker: true,
        ..Default::default()
    };
    let (client, transport) = client_with(mockex_config(), MockexHooks::restricted(restricted));
    let order = OrderRequest::market("BTC-USD", OrderSide::Sell, Fixed::from_i64(1));

    let err = client.place_order(&order).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert!(err.to_string().contains(Operation::PlaceOrder.as_str()));
    assert!(client.subscribe_ticker("BTC-USD", |_| {}).is_err());
    assert!(transport.requests().is_empty());
}

#[monoio::test(timer_enabled = true)]
async fn test_unknown_symbol_fails_before_network() {
    let (client, transport, _) = mockex_client();

    for symbol in ["BTCUSD", "btc-usd", "BTC-"] {
        let err = client.get_ticker(symbol).await.unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownSymbol { .. }), "{symbol}: {err}");
    }
    assert!(transport.requests().is_empty());
}

#[monoio::test(timer_enabled = true)]
async fn test_signed_call_without_credentials() {
    let transport = FakeTransport::new();
    let (connector, _sessions) = FakeConnector::new();
    let client =
        ExchangeClient::with_transports(Arc::new(MockexHooks::new()), mockex_config(), transport.clone(), connector)
            .unwrap();

    let err = client.cancel_order("BTC-USD", "1").await.unwrap_err();

    assert!(matches!(err, ExchangeError::MissingCredentials(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(transport.requests().is_empty());
}

#[monoio::test(timer_enabled = true)]
async fn test_prepare_shows_the_exact_request() {
    let (client, _transport, _) = mockex_client();
    let request = omniex_exchanges::ApiRequest::post("/v1/order/status").param("id", "5").signed();

    let prepared = client.pipeline().prepare(&request).unwrap();

    assert_eq!(prepared.url, format!("{MOCKEX_API_URL}/v1/order/status"));
    assert_eq!(prepared.header("Content-Type"), Some("application/json"));
    assert!(prepared.body.unwrap().starts_with(r#"{"id":"5","nonce":""#));
}
