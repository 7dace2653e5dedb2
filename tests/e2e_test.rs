use chrono::Utc;
use mockito::{Matcher, ServerGuard};
use scalpbot::*;
use std::time::Duration;

fn credentials() -> Credentials {
    Credentials {
        binance_api_key: "test-key".to_string(),
        binance_api_secret: "test-secret".to_string(),
        gemini_api_key: "test-gemini".to_string(),
    }
}

fn settings_for(server: &ServerGuard) -> Settings {
    let mut settings = Settings::default();
    settings.exchange.base_url = server.url();
    settings.exchange.clock_sync_attempts = 2;
    settings.exchange.clock_sync_backoff_ms = 1;
    settings.oracle.base_url = server.url();
    settings.oracle.requests_per_minute = 600;
    settings.execution.settle_delay_ms = 0;
    settings
}

fn klines_body() -> String {
    let t0 = Utc::now().timestamp_millis() - 3 * 300_000;
    let rows: Vec<String> = (0..3)
        .map(|i| {
            format!(
                r#"[{}, "0.0990", "0.1010", "0.0980", "0.1000", "250000", {}, "25000", 300, "120000", "12000", "0"]"#,
                t0 + i * 300_000,
                t0 + (i + 1) * 300_000 - 1
            )
        })
        .collect();
    format!("[{}]", rows.join(","))
}

const BUY_REPLY: &str = concat!(
    "```json\n{\"signal\": \"BUY\", \"confidence\": \"HIGH\", \"leverage\": 10, ",
    "\"tp_percentage\": 1.0, \"reasoning\": \"volume breakout\"}\n```"
);

/// Venue and oracle mocks for one profitable BUY on DOGEUSDT
async fn mock_market(server: &mut ServerGuard, oracle_text: &str) {
    server
        .mock("GET", "/fapi/v1/time")
        .with_body(format!(r#"{{"serverTime": {}}}"#, Utc::now().timestamp_millis()))
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v2/account")
        .match_query(Matcher::Any)
        .with_body(r#"{"availableBalance": "10.00", "totalWalletBalance": "10.00"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/ticker/24hr")
        .with_body(
            r#"[
            {"symbol": "DOGEUSDT", "lastPrice": "0.1000", "quoteVolume": "150000000", "priceChangePercent": "3.1"},
            {"symbol": "BTCUSDT", "lastPrice": "65000", "quoteVolume": "9000000000", "priceChangePercent": "1.2"}
        ]"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/klines")
        .match_query(Matcher::Any)
        .with_body(klines_body())
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .with_body(
            r#"{"symbols": [{"symbol": "DOGEUSDT", "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.00001"},
                {"filterType": "LOT_SIZE", "stepSize": "1", "minQty": "1"},
                {"filterType": "MIN_NOTIONAL", "notional": "5"}
            ]}]}"#,
        )
        .create_async()
        .await;
    server
        .mock("POST", "/fapi/v1/leverage")
        .match_query(Matcher::Any)
        .with_body(r#"{"leverage": 10, "symbol": "DOGEUSDT"}"#)
        .create_async()
        .await;

    let orders = [("MARKET", 100), ("TAKE_PROFIT_MARKET", 101), ("STOP_MARKET", 102)];
    for (order_type, order_id) in orders {
        server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::UrlEncoded("type".into(), order_type.into()))
            .with_body(format!(r#"{{"orderId": {}}}"#, order_id))
            .create_async()
            .await;
    }

    let oracle = serde_json::json!({
        "candidates": [{"content": {"parts": [{"text": oracle_text}]}}]
    });
    server
        .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
        .match_query(Matcher::UrlEncoded("key".into(), "test-gemini".into()))
        .with_body(oracle.to_string())
        .create_async()
        .await;
}

#[tokio::test]
async fn test_full_cycle_opens_and_closes_trade() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut server = mockito::Server::new_async().await;
    mock_market(
        &mut server,
        BUY_REPLY,
    )
    .await;

    let bot = TradingBot::new(settings_for(&server), &credentials()).unwrap();
    let wallet = tokio_test::assert_ok!(bot.initialize().await);
    assert_eq!(wallet, 10.0);

    // 1. Scan, analyze and open
    let report = bot.run_cycle().await.unwrap();
    let opened = report.opened.expect("a position should be opened");
    assert_eq!(opened.symbol, "DOGEUSDT");
    assert_eq!(opened.side, Side::Buy);
    // HIGH confidence on a 10 USDT balance is capped at 5 USDT
    assert_eq!(opened.investment, 5.0);
    assert_eq!(opened.quantity, 500.0);
    assert_eq!(opened.legs.len(), 2);
    assert_eq!(report.open_positions, 1);

    // 2. Take-profit fills: only the stop is still resting
    server
        .mock("GET", "/fapi/v1/openOrders")
        .match_query(Matcher::Any)
        .with_body(r#"[{"orderId": 102, "symbol": "DOGEUSDT", "type": "STOP_MARKET"}]"#)
        .create_async()
        .await;
    let cancel = server
        .mock("DELETE", "/fapi/v1/allOpenOrders")
        .match_query(Matcher::UrlEncoded("symbol".into(), "DOGEUSDT".into()))
        .with_body(r#"{"code": 200, "msg": "The operation of cancel all open order is done."}"#)
        .create_async()
        .await;

    let report = bot.run_cycle().await.unwrap();
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].filled_leg, Some(BracketKind::TakeProfit));
    cancel.assert_async().await;

    // 3. Session stats: 5 x 1% x 10 = 0.5
    let stats = bot.status();
    assert_eq!(stats.completed_trades, 1);
    assert!((stats.total_pnl - 0.5).abs() < 1e-9);
    assert_eq!(stats.win_rate, 100.0);
}

#[tokio::test]
async fn test_hold_without_volatility_opens_nothing() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, r#"{"signal": "HOLD", "confidence": "LOW"}"#).await;

    let mut settings = settings_for(&server);
    // 3.1% move would trigger the fallback at the default threshold
    settings.strategy.fallback.min_abs_change_pct = 5.0;

    let bot = TradingBot::new(settings, &credentials()).unwrap();
    bot.initialize().await.unwrap();

    let report = bot.run_cycle().await.unwrap();
    assert!(report.opened.is_none());
    assert_eq!(report.open_positions, 0);
}

#[tokio::test]
async fn test_clock_sync_failure_blocks_start() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v1/time")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;
    let signed = server
        .mock("GET", "/fapi/v2/account")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let mut bot = TradingBot::new(settings_for(&server), &credentials()).unwrap();
    let result = bot.start().await;

    assert!(matches!(result, Err(BotError::ClockSync(_))));
    assert!(!bot.is_running());
    signed.assert_async().await;
}

#[tokio::test]
async fn test_start_and_stop_promptly() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, r#"{"signal": "HOLD"}"#).await;

    let mut settings = settings_for(&server);
    settings.strategy.fallback.enabled = false;
    settings.schedule.idle_interval_secs = 3600;

    let mut bot = TradingBot::new(settings, &credentials()).unwrap();
    bot.start().await.unwrap();
    assert!(bot.is_running());

    tokio::time::sleep(Duration::from_millis(200)).await;

    // The idle sleep is an hour; stop must wake it
    let stats = tokio::time::timeout(Duration::from_secs(5), bot.stop())
        .await
        .expect("stop should not wait for the idle interval");
    assert_eq!(stats.completed_trades, 0);
    assert_eq!(stats.open_positions, 0);
    assert!(!bot.is_running());
}

async fn bot_with_open_position(server: &mut ServerGuard) -> TradingBot {
    mock_market(server, BUY_REPLY).await;

    let bot = TradingBot::new(settings_for(server), &credentials()).unwrap();
    bot.initialize().await.unwrap();
    let report = bot.run_cycle().await.unwrap();
    assert!(report.opened.is_some());
    bot
}

#[tokio::test]
async fn test_stop_cancels_orders_for_tracked_symbols() {
    let mut server = mockito::Server::new_async().await;
    let mut bot = bot_with_open_position(&mut server).await;

    let cancel = server
        .mock("DELETE", "/fapi/v1/allOpenOrders")
        .match_query(Matcher::UrlEncoded("symbol".into(), "DOGEUSDT".into()))
        .with_body(r#"{"code": 200, "msg": "The operation of cancel all open order is done."}"#)
        .expect(1)
        .create_async()
        .await;

    let stats = bot.stop().await;
    cancel.assert_async().await;
    assert_eq!(stats.open_positions, 1);
    assert_eq!(stats.open_symbols, vec!["DOGEUSDT".to_string()]);
    assert_eq!(stats.completed_trades, 0);
}

#[tokio::test]
async fn test_stop_reports_stats_when_cancel_fails() {
    let mut server = mockito::Server::new_async().await;
    let mut bot = bot_with_open_position(&mut server).await;

    let cancel = server
        .mock("DELETE", "/fapi/v1/allOpenOrders")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body(r#"{"code": -1000, "msg": "An unknown error occurred."}"#)
        .expect(1)
        .create_async()
        .await;

    let stats = bot.stop().await;
    cancel.assert_async().await;
    assert_eq!(stats.open_positions, 1);
    assert!(!bot.is_running());
}
