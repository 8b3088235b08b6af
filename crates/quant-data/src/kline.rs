//! 일봉(kline) 행 모델과 파생 필드 보정.
//!
//! 캐시에서 읽은 행이든 제공자에서 막 받은 행이든 같은 [`backfill`]을 거치므로
//! fetch → 저장 → 조회를 반복해도 파생 필드가 달라지지 않습니다.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// ATR 단기 기간.
pub const ATR_SHORT: usize = 14;
/// ATR 장기 기간 (손절/익절 폭 계산에 사용).
pub const ATR_LONG: usize = 21;

/// 저장소 일봉 행. `(market, symbol, trade_date)`가 고유 키입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineRow {
    pub market: String,
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub pre_close: Option<f64>,
    pub p_change: Option<f64>,
    pub volume: Option<i64>,
    /// 요일 (월요일 = 0)
    pub date_week: Option<i32>,
    /// 구간 내 순번
    pub key: Option<i64>,
    pub atr14: Option<f64>,
    pub atr21: Option<f64>,
}

impl KlineRow {
    /// 가격만 있는 행을 생성합니다.
    pub fn new(market: impl Into<String>, symbol: impl Into<String>, trade_date: NaiveDate) -> Self {
        Self {
            market: market.into(),
            symbol: symbol.into(),
            trade_date,
            open: None,
            close: None,
            high: None,
            low: None,
            pre_close: None,
            p_change: None,
            volume: None,
            date_week: None,
            key: None,
            atr14: None,
            atr21: None,
        }
    }

    /// 종가를 설정합니다.
    pub fn with_close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    /// OHLC를 설정합니다.
    pub fn with_ohlc(mut self, open: f64, high: f64, low: f64, close: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.close = Some(close);
        self
    }

    /// 고유 키 필드가 모두 채워졌는지 확인합니다.
    pub fn has_key_fields(&self) -> bool {
        !self.market.trim().is_empty() && !self.symbol.trim().is_empty()
    }

    /// 고유 키.
    pub fn unique_key(&self) -> (String, String, NaiveDate) {
        (self.market.clone(), self.symbol.clone(), self.trade_date)
    }
}

/// 외부 제공자가 반환한 정규화 전 일봉.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawBar {
    pub trade_date: Option<NaiveDate>,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<i64>,
    pub p_change: Option<f64>,
}

impl RawBar {
    /// 저장소 행으로 변환합니다. 거래일이 없으면 `None`.
    pub fn into_row(self, market: &str, symbol: &str) -> Option<KlineRow> {
        let trade_date = self.trade_date?;
        let mut row = KlineRow::new(market, symbol, trade_date);
        row.open = finite(self.open);
        row.close = finite(self.close);
        row.high = finite(self.high);
        row.low = finite(self.low);
        row.volume = self.volume;
        row.p_change = finite(self.p_change);
        Some(row)
    }
}

/// 제공자 프레임을 정렬된 저장소 행으로 바꾸고 파생 필드를 채웁니다.
///
/// 같은 거래일이 여러 번 나오면 마지막 값을 사용합니다.
pub fn rows_from_bars(bars: Vec<RawBar>, market: &str, symbol: &str) -> Vec<KlineRow> {
    let mut rows: Vec<KlineRow> = bars
        .into_iter()
        .filter_map(|bar| bar.into_row(market, symbol))
        .collect();
    rows.sort_by_key(|r| r.trade_date);
    rows.reverse();
    rows.dedup_by_key(|r| r.trade_date);
    rows.reverse();
    backfill(&mut rows);
    rows
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// 거래일 오름차순으로 정렬된 행의 누락된 파생 필드를 채웁니다.
///
/// - `open`/`high`/`low`가 없으면 `close`
/// - `pre_close`가 없으면 전일 종가, 첫 행은 자신의 시가
/// - `p_change`가 없으면 `(close - pre_close) / pre_close * 100`, 계산 불가 시 0
/// - `date_week`가 없으면 거래일의 요일 (월요일 = 0)
/// - `key`가 없으면 위치 인덱스
/// - `atr14`/`atr21`이 없으면 Wilder 평균 실제 범위
///
/// 이미 채워진 값은 건드리지 않으므로 여러 번 호출해도 결과가 같습니다.
pub fn backfill(rows: &mut [KlineRow]) {
    let mut prev_close: Option<f64> = None;

    for (idx, row) in rows.iter_mut().enumerate() {
        if let Some(close) = row.close {
            row.open.get_or_insert(close);
            row.high.get_or_insert(close);
            row.low.get_or_insert(close);
        }

        if row.pre_close.is_none() {
            row.pre_close = prev_close.or(row.open);
        }

        if row.p_change.is_none() {
            let change = match (row.close, row.pre_close) {
                (Some(close), Some(pre)) if pre != 0.0 => (close - pre) / pre * 100.0,
                _ => 0.0,
            };
            row.p_change = Some(change);
        }

        row.date_week
            .get_or_insert(row.trade_date.weekday().num_days_from_monday() as i32);
        row.key.get_or_insert(idx as i64);

        prev_close = row.close;
    }

    let atr14 = average_true_range(rows, ATR_SHORT);
    let atr21 = average_true_range(rows, ATR_LONG);
    for (row, (a14, a21)) in rows.iter_mut().zip(atr14.into_iter().zip(atr21)) {
        if row.atr14.is_none() {
            row.atr14 = a14;
        }
        if row.atr21.is_none() {
            row.atr21 = a21;
        }
    }
}

/// Wilder 평활 ATR. 초기 `period`개 구간은 누적 평균을 사용합니다.
///
/// 고가/저가/종가가 없는 행은 직전 값을 유지합니다.
pub fn average_true_range(rows: &[KlineRow], period: usize) -> Vec<Option<f64>> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(rows.len());
    let mut atr: Option<f64> = None;
    let mut seen = 0usize;
    let mut prev_close: Option<f64> = None;

    for row in rows {
        let tr = match (row.high, row.low) {
            (Some(high), Some(low)) => {
                let range = high - low;
                Some(match prev_close {
                    Some(pc) => range.max((high - pc).abs()).max((low - pc).abs()),
                    None => range,
                })
            }
            _ => None,
        };

        if let Some(tr) = tr {
            seen += 1;
            atr = Some(match atr {
                None => tr,
                Some(prev) if seen <= period => prev + (tr - prev) / seen as f64,
                Some(prev) => (prev * (period as f64 - 1.0) + tr) / period as f64,
            });
        }

        out.push(atr);
        if row.close.is_some() {
            prev_close = row.close;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_backfill_pre_close_and_p_change() {
        let mut rows = vec![
            KlineRow::new("SH", "sh600036", date(2)).with_close(100.0),
            KlineRow::new("SH", "sh600036", date(3)).with_close(110.0),
        ];
        backfill(&mut rows);

        assert_eq!(rows[0].pre_close, Some(100.0));
        assert_eq!(rows[0].p_change, Some(0.0));
        assert_eq!(rows[1].pre_close, Some(100.0));
        assert!((rows[1].p_change.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(rows[1].open, Some(110.0));
    }

    #[test]
    fn test_backfill_week_and_key() {
        // 2024-01-01은 월요일
        let mut rows = vec![
            KlineRow::new("US", "usAAPL", date(1)).with_close(1.0),
            KlineRow::new("US", "usAAPL", date(5)).with_close(1.0),
        ];
        backfill(&mut rows);
        assert_eq!(rows[0].date_week, Some(0));
        assert_eq!(rows[1].date_week, Some(4));
        assert_eq!(rows[1].key, Some(1));
    }

    #[test]
    fn test_backfill_zero_pre_close() {
        let mut rows = vec![KlineRow::new("US", "usX", date(2)).with_ohlc(0.0, 1.0, 0.0, 1.0)];
        backfill(&mut rows);
        assert_eq!(rows[0].pre_close, Some(0.0));
        assert_eq!(rows[0].p_change, Some(0.0));
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let mut rows: Vec<KlineRow> = (1..=25)
            .map(|d| {
                let c = 10.0 + d as f64;
                KlineRow::new("SZ", "sz000001", date(d)).with_ohlc(c - 0.5, c + 1.0, c - 1.0, c)
            })
            .collect();
        backfill(&mut rows);
        let once = rows.clone();
        backfill(&mut rows);
        assert_eq!(once, rows);
        assert!(rows[24].atr21.is_some());
    }

    #[test]
    fn test_existing_values_preserved() {
        let mut row = KlineRow::new("SH", "sh600036", date(2)).with_close(10.0);
        row.p_change = Some(3.5);
        row.key = Some(42);
        let mut rows = vec![row];
        backfill(&mut rows);
        assert_eq!(rows[0].p_change, Some(3.5));
        assert_eq!(rows[0].key, Some(42));
    }

    #[test]
    fn test_atr_warmup_and_wilder() {
        let rows: Vec<KlineRow> = (1..=4)
            .map(|d| KlineRow::new("US", "usX", date(d)).with_ohlc(10.0, 12.0, 10.0, 11.0))
            .collect();
        let atr = average_true_range(&rows, 2);
        assert_eq!(atr[0], Some(2.0));
        assert_eq!(atr[1], Some(2.0));
        assert_eq!(atr[3], Some(2.0));
    }

    #[test]
    fn test_rows_from_bars_sorts_and_dedups() {
        let bars = vec![
            RawBar { trade_date: Some(date(3)), close: Some(2.0), ..Default::default() },
            RawBar { trade_date: Some(date(2)), close: Some(1.0), ..Default::default() },
            RawBar { trade_date: Some(date(3)), close: Some(3.0), ..Default::default() },
            RawBar { trade_date: None, close: Some(9.0), ..Default::default() },
        ];
        let rows = rows_from_bars(bars, "SH", "sh600036");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].close, Some(3.0));
        assert_eq!(rows[1].pre_close, Some(1.0));
    }
}
