//! Eastmoney 시세 제공자 (중국 본토 전용).
//!
//! `GET {base}/api/qt/stock/kline/get?secid={mkt}.{code}&klt=101&fqt={adjust}&beg=..&end=..`
//!
//! `data.klines`의 각 원소는 `"date,open,close,high,low,volume,amount,amplitude,pct_chg,..."`
//! 형태의 문자열입니다. 지수는 수정주가 없이 조회하고, 결과가 없으면 다른 시장 ID로 한 번 더 조회합니다.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{FetchRequest, KlineSource};
use crate::error::{DataError, Result};
use crate::kline::RawBar;
use quant_core::{parse_date_str, Market};

pub const NAME: &str = "eastmoney";

/// 응답 필드 목록 (date ~ turnover).
const FIELDS2: &str = "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61";

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(default)]
    rc: i64,
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

/// Eastmoney 일봉 제공자.
pub struct EastmoneySource {
    client: reqwest::Client,
    base_url: String,
}

impl EastmoneySource {
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

    async fn fetch(&self, secid: &str, req: &FetchRequest, adjust: u8) -> Result<Vec<RawBar>> {
        let url = format!("{}/api/qt/stock/kline/get", self.base_url);
        let beg = req.start.format("%Y%m%d").to_string();
        let end = req.end.format("%Y%m%d").to_string();
        let fqt = adjust.to_string();

        debug!(secid = secid, beg = %beg, end = %end, fqt = adjust, "Eastmoney 일봉 조회");

        let response: KlineResponse = self
            .client
            .get(&url)
            .query(&[
                ("secid", secid),
                ("fields1", "f1,f2,f3,f4,f5,f6"),
                ("fields2", FIELDS2),
                ("klt", "101"),
                ("fqt", fqt.as_str()),
                ("beg", beg.as_str()),
                ("end", end.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.rc != 0 {
            return Err(DataError::FetchError(format!(
                "Eastmoney 응답 오류 rc={} ({})",
                response.rc, secid
            )));
        }

        Ok(response
            .data
            .map(|d| d.klines.iter().filter_map(|line| parse_kline_line(line)).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl KlineSource for EastmoneySource {
    fn name(&self) -> &str {
        NAME
    }

    fn supports(&self, market: Market) -> bool {
        market.is_cn()
    }

    async fn fetch_equity(&self, req: &FetchRequest) -> Result<Vec<RawBar>> {
        let secid = format!("{}.{}", primary_market_id(&req.symbol), req.code());
        self.fetch(&secid, req, 1).await
    }

    async fn fetch_index(&self, req: &FetchRequest) -> Result<Vec<RawBar>> {
        let primary = primary_market_id(&req.symbol);
        let bars = self
            .fetch(&format!("{}.{}", primary, req.code()), req, 0)
            .await?;
        if !bars.is_empty() {
            return Ok(bars);
        }
        let alternate = if primary == 1 { 0 } else { 1 };
        self.fetch(&format!("{}.{}", alternate, req.code()), req, 0)
            .await
    }
}

/// 상하이 = 1, 그 외 = 0.
fn primary_market_id(symbol: &str) -> u8 {
    if symbol.to_ascii_lowercase().starts_with("sh") {
        1
    } else {
        0
    }
}

/// `"date,open,close,high,low,volume,amount,amplitude,pct_chg,..."` 한 줄을 파싱합니다.
pub fn parse_kline_line(line: &str) -> Option<RawBar> {
    let cols: Vec<&str> = line.split(',').collect();
    if cols.len() < 6 {
        return None;
    }
    let num = |idx: usize| {
        cols.get(idx)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };
    Some(RawBar {
        trade_date: parse_date_str(cols[0]),
        open: num(1),
        close: num(2),
        high: num(3),
        low: num(4),
        volume: num(5).map(|v| v.round() as i64),
        p_change: num(8),
    })
}
