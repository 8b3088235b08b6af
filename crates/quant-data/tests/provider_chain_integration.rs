//! 제공자 체인 + 메모리 캐시 통합 테스트.

use quant_core::config::ProvidersConfig;
use quant_data::{FetchAdapter, KlineStore, MemoryKlineStore, MemorySymbolStore, ProviderChain};
use serde_json::json;
use std::sync::Arc;

fn tencent_body(symbol: &str, days: u32) -> String {
    let rows: Vec<serde_json::Value> = (1..=days)
        .map(|d| {
            json!([
                format!("2024-03-{:02}", d),
                "10.0",
                format!("{}", 10.0 + d as f64 / 10.0),
                "11.0",
                "9.5",
                "1000"
            ])
        })
        .collect();
    json!({"code": 0, "msg": "", "data": {symbol: {"qfqday": rows}}}).to_string()
}

#[tokio::test]
async fn test_fallback_provider_fills_cache() {
    let mut tencent = mockito::Server::new_async().await;
    let mut eastmoney = mockito::Server::new_async().await;

    // 1순위 Tencent는 서버 오류
    let tencent_mock = tencent
        .mock("GET", "/appstock/app/fqkline/get")
        .match_query(mockito::Matcher::Any)
        .with_status(502)
        .create_async()
        .await;

    // CN 전용 Eastmoney가 응답
    let eastmoney_mock = eastmoney
        .mock("GET", "/api/qt/stock/kline/get")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(
            json!({"rc": 0, "data": {"klines": [
                "2024-03-01,10,10.5,10.8,9.9,100,1,1,5.0,0.5,0.1",
                "2024-03-04,10.5,10.2,10.6,10.1,90,1,1,-2.86,-0.3,0.1"
            ]}})
            .to_string(),
        )
        .create_async()
        .await;

    let config = ProvidersConfig {
        primary: "tencent".to_string(),
        fallbacks: vec![],
        secondary: Some("eastmoney".to_string()),
        timeout_secs: 5,
        tencent_base_url: tencent.url(),
        eastmoney_base_url: eastmoney.url(),
    };
    let chain = ProviderChain::from_config(&config);
    assert_eq!(chain.names(), vec!["tencent", "eastmoney"]);

    let store = Arc::new(MemoryKlineStore::new());
    let adapter = FetchAdapter::new(store.clone(), Arc::new(MemorySymbolStore::new()), chain);

    let rows = adapter.klines("sh600036", None, None, 1).await.unwrap();
    tencent_mock.assert_async().await;
    eastmoney_mock.assert_async().await;

    assert_eq!(rows.len(), 2);
    // 제공자가 준 등락률은 유지
    assert_eq!(rows[1].p_change, Some(-2.86));
    assert_eq!(rows[1].pre_close, Some(10.5));
    assert_eq!(store.load("SH", "sh600036", None, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_us_symbol_skips_cn_only_provider() {
    let mut tencent = mockito::Server::new_async().await;
    let mut eastmoney = mockito::Server::new_async().await;

    let tencent_mock = tencent
        .mock("GET", "/appstock/app/fqkline/get")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(tencent_body("usaapl", 3))
        .create_async()
        .await;
    let eastmoney_mock = eastmoney
        .mock("GET", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let config = ProvidersConfig {
        primary: "eastmoney".to_string(),
        fallbacks: vec!["tencent".to_string()],
        secondary: None,
        timeout_secs: 5,
        tencent_base_url: tencent.url(),
        eastmoney_base_url: eastmoney.url(),
    };
    let adapter = FetchAdapter::new(
        Arc::new(MemoryKlineStore::new()),
        Arc::new(MemorySymbolStore::new()),
        ProviderChain::from_config(&config),
    );

    let rows = adapter.klines("usAAPL", None, None, 1).await.unwrap();
    tencent_mock.assert_async().await;
    eastmoney_mock.assert_async().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.market == "US" && r.symbol == "usAAPL"));
}
