//! Yahoo Finance 제공자.
//!
//! 종목 코드 매핑: `usAAPL → AAPL`, `hk00700 → 0700.HK`, `sh600036 → 600036.SS`,
//! `sz000001 → 000001.SZ`.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate};
use time::OffsetDateTime;
use tracing::debug;

use super::{FetchRequest, KlineSource};
use crate::error::{DataError, Result};
use crate::kline::RawBar;

pub const NAME: &str = "yahoo";

/// Yahoo Finance 일봉 제공자.
pub struct YahooSource {
    connector: yahoo_finance_api::YahooConnector,
}

impl YahooSource {
    pub fn new() -> Result<Self> {
        let connector = yahoo_finance_api::YahooConnector::new()
            .map_err(|e| DataError::ConnectionError(format!("Yahoo Finance 연결 실패: {}", e)))?;
        Ok(Self { connector })
    }
}

#[async_trait]
impl KlineSource for YahooSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_equity(&self, req: &FetchRequest) -> Result<Vec<RawBar>> {
        let Some(ticker) = yahoo_ticker(&req.symbol) else {
            return Ok(Vec::new());
        };
        let start = naive_date_to_offset_datetime(req.start)?;
        // 종료일 당일 포함
        let end = naive_date_to_offset_datetime(req.end.succ_opt().unwrap_or(req.end))?;

        debug!(ticker = %ticker, start = %req.start, end = %req.end, "Yahoo Finance API 날짜 범위 호출");

        let response = self
            .connector
            .get_quote_history_interval(&ticker, start, end, "1d")
            .await
            .map_err(|e| DataError::FetchError(format!("Yahoo Finance API 오류 ({}): {}", ticker, e)))?;

        let quotes = response
            .quotes()
            .map_err(|e| DataError::ParseError(format!("Quote 파싱 오류: {}", e)))?;

        Ok(quotes
            .iter()
            .map(|q| RawBar {
                trade_date: DateTime::from_timestamp(q.timestamp as i64, 0).map(|dt| dt.date_naive()),
                open: Some(q.open),
                close: Some(q.close),
                high: Some(q.high),
                low: Some(q.low),
                volume: Some(q.volume as i64),
                p_change: None,
            })
            .collect())
    }
}

/// 정규화된 종목 코드를 Yahoo 티커로 바꿉니다.
pub fn yahoo_ticker(symbol: &str) -> Option<String> {
    let symbol = symbol.trim();
    let (prefix, code) = symbol.split_at_checked(2)?;
    if code.is_empty() {
        return None;
    }
    match prefix.to_ascii_lowercase().as_str() {
        "us" => Some(code.to_uppercase()),
        "hk" => {
            let trimmed = code.trim_start_matches('0');
            Some(format!("{:0>4}.HK", trimmed))
        }
        "sh" => Some(format!("{}.SS", code)),
        "sz" => Some(format!("{}.SZ", code)),
        _ => None,
    }
}

/// NaiveDate를 UTC 자정 OffsetDateTime으로 변환.
fn naive_date_to_offset_datetime(date: NaiveDate) -> Result<OffsetDateTime> {
    let month = time::Month::try_from(date.month() as u8)
        .map_err(|e| DataError::InvalidData(format!("잘못된 월: {}", e)))?;
    let date = time::Date::from_calendar_date(date.year(), month, date.day() as u8)
        .map_err(|e| DataError::InvalidData(format!("잘못된 날짜: {}", e)))?;
    Ok(date.midnight().assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yahoo_ticker_mapping() {
        assert_eq!(yahoo_ticker("usAAPL").as_deref(), Some("AAPL"));
        assert_eq!(yahoo_ticker("usspy").as_deref(), Some("SPY"));
        assert_eq!(yahoo_ticker("hk00700").as_deref(), Some("0700.HK"));
        assert_eq!(yahoo_ticker("hk09988").as_deref(), Some("9988.HK"));
        assert_eq!(yahoo_ticker("sh600036").as_deref(), Some("600036.SS"));
        assert_eq!(yahoo_ticker("sz399001").as_deref(), Some("399001.SZ"));
        assert_eq!(yahoo_ticker("600036"), None);
        assert_eq!(yahoo_ticker("us"), None);
    }

    #[test]
    fn test_offset_datetime_conversion() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let odt = naive_date_to_offset_datetime(date).unwrap();
        assert_eq!(odt.year(), 2024);
        assert_eq!(odt.day(), 29);
    }
}
