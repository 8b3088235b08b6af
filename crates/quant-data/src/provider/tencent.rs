//! Tencent 시세 제공자.
//!
//! `GET {base}/appstock/app/fqkline/get?param={symbol},day,{start},{end},{count},{adjust}`
//!
//! 응답의 `data[symbol]` 아래 `qfqday`(전진 수정주가) 또는 `day` 배열을 사용하며,
//! 각 원소는 `[date, open, close, high, low, volume, ...]`입니다.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{json_f64, FetchRequest, KlineSource};
use crate::error::{DataError, Result};
use crate::kline::RawBar;
use quant_core::parse_date_str;

pub const NAME: &str = "tencent";

/// 요청 한 번에 받을 최대 일봉 수.
const MAX_COUNT: i64 = 2000;

/// Tencent 일봉 제공자.
pub struct TencentSource {
    client: reqwest::Client,
    base_url: String,
}

impl TencentSource {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, req: &FetchRequest, adjust: &str) -> Result<Vec<RawBar>> {
        let symbol = req.symbol.to_ascii_lowercase();
        let count = ((req.end - req.start).num_days() + 1).clamp(1, MAX_COUNT);
        let param = format!(
            "{},day,{},{},{},{}",
            symbol,
            req.start.format("%Y-%m-%d"),
            req.end.format("%Y-%m-%d"),
            count,
            adjust
        );
        let url = format!("{}/appstock/app/fqkline/get", self.base_url);

        debug!(symbol = %symbol, param = %param, "Tencent 일봉 조회");

        let body: Value = self
            .client
            .get(&url)
            .query(&[("param", param.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(&body, &symbol)
    }
}

#[async_trait]
impl KlineSource for TencentSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_equity(&self, req: &FetchRequest) -> Result<Vec<RawBar>> {
        self.fetch(req, "qfq").await
    }

    async fn fetch_index(&self, req: &FetchRequest) -> Result<Vec<RawBar>> {
        self.fetch(req, "").await
    }
}

/// 응답 JSON에서 일봉을 추출합니다.
pub fn parse_response(body: &Value, symbol: &str) -> Result<Vec<RawBar>> {
    if let Some(code) = body.get("code").and_then(Value::as_i64) {
        if code != 0 {
            let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
            return Err(DataError::FetchError(format!("Tencent 응답 오류 {}: {}", code, msg)));
        }
    }

    let Some(entry) = body.get("data").and_then(|d| d.get(symbol)) else {
        return Ok(Vec::new());
    };
    let rows = entry
        .get("qfqday")
        .or_else(|| entry.get("day"))
        .and_then(Value::as_array);
    let Some(rows) = rows else {
        return Ok(Vec::new());
    };

    Ok(rows
        .iter()
        .filter_map(Value::as_array)
        .filter(|cols| cols.len() >= 5)
        .map(|cols| RawBar {
            trade_date: cols[0].as_str().and_then(parse_date_str),
            open: json_f64(&cols[1]),
            close: json_f64(&cols[2]),
            high: json_f64(&cols[3]),
            low: json_f64(&cols[4]),
            volume: cols.get(5).and_then(json_f64).map(|v| v.round() as i64),
            p_change: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quant_core::Market;
    use serde_json::json;

    fn request(symbol: &str) -> FetchRequest {
        FetchRequest {
            symbol: symbol.to_string(),
            market: Market::Sh,
            is_index: false,
            start: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        }
    }

    #[test]
    fn test_parse_response_prefers_qfqday() {
        let body = json!({
            "code": 0,
            "data": {"sh600036": {
                "qfqday": [
                    ["2024-01-02", "30.10", "30.50", "30.80", "29.90", "123456.000"],
                    ["2024-01-03", "30.50", "31.00", "31.20", "30.40", "98765", {"nd": "x"}]
                ],
                "day": [["2024-01-02", "1", "1", "1", "1", "1"]]
            }}
        });
        let bars = parse_response(&body, "sh600036").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, Some(30.5));
        assert_eq!(bars[0].volume, Some(123456));
        assert_eq!(bars[1].trade_date, NaiveDate::from_ymd_opt(2024, 1, 3));
    }

    #[test]
    fn test_parse_response_error_code() {
        let body = json!({"code": -1, "msg": "param error"});
        assert!(parse_response(&body, "sh600036").is_err());
        assert!(parse_response(&json!({"code": 0, "data": {}}), "sh600036")
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_fetch_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/appstock/app/fqkline/get")
            .match_query(mockito::Matcher::UrlEncoded(
                "param".into(),
                "sh600036,day,2024-01-02,2024-01-03,2,qfq".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"code": 0, "data": {"sh600036": {"qfqday": [
                    ["2024-01-02", "10", "11", "12", "9", "100"]
                ]}}})
                .to_string(),
            )
            .create_async()
            .await;

        let source = TencentSource::new(&server.url(), 5).unwrap();
        let bars = source.fetch_equity(&request("sh600036")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].high, Some(12.0));
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let source = TencentSource::new(&server.url(), 5).unwrap();
        assert!(source.fetch_equity(&request("sh600036")).await.is_err());
    }
}
