//! Binance REST client tests against a local mock server

use mockito::{Matcher, Server};
use rust_decimal_macros::dec;
use std::time::Duration;

use kline_traders::common::{CircuitBreakerConfig, CircuitState};
use kline_traders::exchange::{BinanceClient, ClientConfig, Credentials, Exchange};
use kline_traders::{ExchangeError, OrderRequest, Side, Symbol};

const KLINES: &str = r#"[
    [1700000000000,"2000.10","2005.00","1998.00","2003.50","12.5",1700000059999,"25000.0",100,"6.0","12000.0","0"],
    [1700000060000,"2003.50","2004.00","2001.00","2002.00","8.1",1700000119999,"16000.0",80,"4.0","8000.0","0"]
]"#;

const ORDER_FULL: &str = r#"{
    "symbol": "ETHUSDC", "orderId": 28, "orderListId": -1,
    "clientOrderId": "kt-1", "transactTime": 1700000000000,
    "price": "0.00000000", "origQty": "0.50000000", "executedQty": "0.50000000",
    "cummulativeQuoteQty": "1000.50000000", "status": "FILLED",
    "timeInForce": "GTC", "type": "MARKET", "side": "BUY",
    "fills": [
        {"price": "2001.00", "qty": "0.30000000", "commission": "0.00022500", "commissionAsset": "ETH", "tradeId": 1},
        {"price": "2002.50", "qty": "0.20000000", "commission": "0.00015000", "commissionAsset": "ETH", "tradeId": 2}
    ]
}"#;

/// `GET /api/v3/order` carries no fills
fn order_query(client_order_id: &str, status: &str, executed_qty: &str, quote_qty: &str) -> String {
    format!(
        r#"{{"symbol":"ETHUSDC","orderId":28,"orderListId":-1,"clientOrderId":"{client_order_id}",
            "price":"0.00000000","origQty":"0.50000000","executedQty":"{executed_qty}",
            "cummulativeQuoteQty":"{quote_qty}","status":"{status}","timeInForce":"GTC",
            "type":"MARKET","side":"BUY","time":1700000000000,"updateTime":1700000000000,
            "isWorking":true,"origQuoteOrderQty":"0.00000000"}}"#
    )
}

const EXECUTION_UNKNOWN: &str =
    r#"{"code":-1006,"msg":"An unexpected response was received from the message bus. Execution status unknown."}"#;

fn symbol() -> Symbol {
    "ETH/USDC".parse().unwrap()
}

fn config(server: &Server) -> ClientConfig {
    ClientConfig::default()
        .with_base_url(server.url())
        .with_rate_limit(0)
        .with_max_retries(2)
        .with_retry_base_delay(Duration::from_millis(1))
}

fn signed_client(server: &Server) -> BinanceClient {
    BinanceClient::new(config(server), Some(Credentials::new("test-key", "test-secret"))).unwrap()
}

#[tokio::test]
async fn test_fetch_ohlcv() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/klines")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "ETHUSDC".into()),
            Matcher::UrlEncoded("interval".into(), "1m".into()),
            Matcher::UrlEncoded("limit".into(), "2".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(KLINES)
        .create_async()
        .await;

    let client = BinanceClient::new(config(&server), None).unwrap();
    let candles = client.fetch_ohlcv(&symbol(), "1m", 2).await.unwrap();

    mock.assert_async().await;
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].datetime.timestamp_millis(), 1700000000000);
    assert_eq!(candles[0].close, 2003.5);
    assert_eq!(candles[1].high, 2004.0);
}

#[tokio::test]
async fn test_fetch_balance_is_signed() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/account")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::Regex("recvWindow=5000".into()),
            Matcher::Regex(r"timestamp=\d+".into()),
            Matcher::Regex("signature=[0-9a-f]{64}".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{"balances":[
                {"asset":"ETH","free":"0.5","locked":"0.1"},
                {"asset":"USDC","free":"1234.5","locked":"0.0"}
            ]}"#,
        )
        .create_async()
        .await;

    let balances = signed_client(&server).fetch_balance().await.unwrap();

    mock.assert_async().await;
    assert_eq!(balances.free("USDC"), 1234.5);
    assert!((balances.total("ETH") - 0.6).abs() < 1e-12);
    assert_eq!(balances.total("BTC"), 0.0);
}

#[tokio::test]
async fn test_create_order_parses_fills() {
    let mut server = Server::new_async().await;
    let order = OrderRequest::market(symbol(), Side::Buy, dec!(0.5), 2000.0);
    let mock = server
        .mock("POST", "/api/v3/order")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "ETHUSDC".into()),
            Matcher::UrlEncoded("side".into(), "BUY".into()),
            Matcher::UrlEncoded("type".into(), "MARKET".into()),
            Matcher::UrlEncoded("quantity".into(), "0.5".into()),
            Matcher::UrlEncoded("newClientOrderId".into(), order.client_order_id.clone()),
            Matcher::UrlEncoded("newOrderRespType".into(), "FULL".into()),
        ]))
        .with_status(200)
        .with_body(ORDER_FULL)
        .create_async()
        .await;

    let receipt = signed_client(&server).create_order(&order).await.unwrap();

    mock.assert_async().await;
    assert_eq!(receipt.order_id, "28");
    assert_eq!(receipt.status, "FILLED");
    assert!((receipt.avg_price - 2001.0).abs() < 1e-9);
    assert!((receipt.commission - 0.000375).abs() < 1e-12);
    assert!((receipt.net_base_quantity("ETH") - 0.499625).abs() < 1e-12);
}

#[tokio::test]
async fn test_api_rejection_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#)
        .expect(1)
        .create_async()
        .await;

    let order = OrderRequest::market(symbol(), Side::Buy, dec!(1), 2000.0);
    let err = signed_client(&server).create_order(&order).await.unwrap_err();

    mock.assert_async().await;
    match err {
        ExchangeError::Api { status, code, msg } => {
            assert_eq!(status, 400);
            assert_eq!(code, -2010);
            assert!(msg.contains("insufficient balance"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_order_server_error_is_looked_up_not_resent() {
    let mut server = Server::new_async().await;
    let order = OrderRequest::market(symbol(), Side::Buy, dec!(0.5), 2000.0);
    let post = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body(EXECUTION_UNKNOWN)
        .expect(1)
        .create_async()
        .await;
    let lookup = server
        .mock("GET", "/api/v3/order")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "ETHUSDC".into()),
            Matcher::UrlEncoded("origClientOrderId".into(), order.client_order_id.clone()),
            Matcher::Regex("signature=[0-9a-f]{64}".into()),
        ]))
        .with_status(200)
        .with_body(order_query(&order.client_order_id, "FILLED", "0.50000000", "1000.50000000"))
        .expect(1)
        .create_async()
        .await;

    let receipt = signed_client(&server).create_order(&order).await.unwrap();

    post.assert_async().await;
    lookup.assert_async().await;
    assert_eq!(receipt.client_order_id, order.client_order_id);
    assert_eq!(receipt.status, "FILLED");
    assert!((receipt.executed_qty - 0.5).abs() < 1e-12);
    assert!((receipt.avg_price - 2001.0).abs() < 1e-9);
    assert_eq!(receipt.commission, 0.0);
}

#[tokio::test]
async fn test_order_missing_after_server_error_keeps_original_error() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body(EXECUTION_UNKNOWN)
        .expect(1)
        .create_async()
        .await;
    let lookup = server
        .mock("GET", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-2013,"msg":"Order does not exist."}"#)
        .expect(1)
        .create_async()
        .await;

    let order = OrderRequest::market(symbol(), Side::Buy, dec!(0.5), 2000.0);
    let err = signed_client(&server).create_order(&order).await.unwrap_err();

    post.assert_async().await;
    lookup.assert_async().await;
    assert!(matches!(err, ExchangeError::Api { status: 503, code: -1006, .. }));
}

#[tokio::test]
async fn test_expired_order_after_server_error_is_not_a_fill() {
    let mut server = Server::new_async().await;
    let order = OrderRequest::market(symbol(), Side::Buy, dec!(0.5), 2000.0);
    let _post = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(502)
        .with_body("Bad Gateway")
        .create_async()
        .await;
    let _lookup = server
        .mock("GET", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(order_query(&order.client_order_id, "EXPIRED", "0.00000000", "0.00000000"))
        .create_async()
        .await;

    let err = signed_client(&server).create_order(&order).await.unwrap_err();

    match err {
        ExchangeError::OrderNotFilled { client_order_id, status } => {
            assert_eq!(client_order_id, order.client_order_id);
            assert_eq!(status, "EXPIRED");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limited_order_is_resent() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_body(r#"{"code":-1003,"msg":"Too many requests."}"#)
        .expect(3)
        .create_async()
        .await;
    let lookup = server
        .mock("GET", "/api/v3/order")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let order = OrderRequest::market(symbol(), Side::Sell, dec!(0.5), 2000.0);
    let err = signed_client(&server).create_order(&order).await.unwrap_err();

    post.assert_async().await;
    lookup.assert_async().await;
    assert!(matches!(err, ExchangeError::RateLimited(429)));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/klines")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("Service Unavailable")
        .expect(3)
        .create_async()
        .await;

    let client = BinanceClient::new(config(&server), None).unwrap();
    let err = client.fetch_ohlcv(&symbol(), "1m", 10).await.unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, ExchangeError::Api { status: 503, code: 0, .. }));
}

#[tokio::test]
async fn test_rate_limit_response() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/ping")
        .with_status(429)
        .with_body(r#"{"code":-1003,"msg":"Too many requests."}"#)
        .expect(3)
        .create_async()
        .await;

    let client = BinanceClient::new(config(&server), None).unwrap();
    let err = client.ping().await.unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, ExchangeError::RateLimited(429)));
}

#[tokio::test]
async fn test_circuit_opens_after_exhausted_retries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/ping")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let mut config = config(&server).with_max_retries(0);
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 1,
        cooldown: Duration::from_secs(60),
    };
    let client = BinanceClient::new(config, None).unwrap();

    assert!(client.ping().await.is_err());
    assert_eq!(client.circuit_state().await, CircuitState::Open);
    assert!(matches!(
        client.ping().await,
        Err(ExchangeError::CircuitOpen)
    ));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_market_rules() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/exchangeInfo")
        .match_query(Matcher::UrlEncoded("symbol".into(), "ETHUSDC".into()))
        .with_status(200)
        .with_body(
            r#"{"timezone":"UTC","symbols":[{"symbol":"ETHUSDC","status":"TRADING","filters":[
                {"filterType":"PRICE_FILTER","minPrice":"0.01","maxPrice":"1000000.00","tickSize":"0.01"},
                {"filterType":"LOT_SIZE","minQty":"0.00010000","maxQty":"9000.00000000","stepSize":"0.00010000"},
                {"filterType":"NOTIONAL","minNotional":"5.00000000","applyMinToMarket":true}
            ]}]}"#,
        )
        .create_async()
        .await;

    let client = BinanceClient::new(config(&server), None).unwrap();
    let rules = client.market_rules(&symbol()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(rules.step_size, dec!(0.0001));
    assert_eq!(rules.min_qty, dec!(0.0001));
    assert_eq!(rules.min_notional, 5.0);
    assert_eq!(rules.round_quantity(0.123456, 2000.0), Some(dec!(0.1234)));
    assert_eq!(rules.round_quantity(0.002, 2000.0), None);
}
