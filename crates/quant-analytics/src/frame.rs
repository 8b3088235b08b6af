//! 열 단위 일봉 뷰.
//!
//! 저장소 행([`KlineRow`])을 거래일 오름차순 열 벡터로 펼칩니다.
//! 종가가 없는 행은 제외하고, 나머지 누락 값은 보정 규칙과 같은 방식으로 채웁니다.

use chrono::{Datelike, NaiveDate};
use quant_data::KlineRow;
use std::collections::BTreeSet;

/// 한 종목의 일봉 열 집합.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineFrame {
    pub symbol: String,
    pub dates: Vec<NaiveDate>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub pre_close: Vec<f64>,
    pub p_change: Vec<f64>,
    pub volume: Vec<f64>,
    pub atr21: Vec<f64>,
    /// 요일 (월요일 = 0)
    pub date_week: Vec<i32>,
}

impl KlineFrame {
    /// 저장소 행에서 생성합니다. 사용 가능한 행이 없으면 `None`.
    pub fn from_rows(symbol: impl Into<String>, rows: &[KlineRow]) -> Option<Self> {
        let mut sorted: Vec<&KlineRow> = rows.iter().filter(|r| r.close.is_some()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by_key(|r| r.trade_date);

        let mut frame = Self::empty(symbol.into());
        let mut prev_close: Option<f64> = None;
        for row in sorted {
            let Some(close) = row.close else { continue };
            let open = row.open.unwrap_or(close);
            frame.dates.push(row.trade_date);
            frame.open.push(open);
            frame.high.push(row.high.unwrap_or(close));
            frame.low.push(row.low.unwrap_or(close));
            frame.close.push(close);
            let pre_close = row.pre_close.or(prev_close).unwrap_or(open);
            frame.pre_close.push(pre_close);
            let p_change = row.p_change.unwrap_or_else(|| {
                if pre_close != 0.0 {
                    (close - pre_close) / pre_close * 100.0
                } else {
                    0.0
                }
            });
            frame.p_change.push(p_change);
            frame.volume.push(row.volume.unwrap_or(0) as f64);
            frame.atr21.push(row.atr21.unwrap_or(0.0));
            frame.date_week.push(
                row.date_week
                    .unwrap_or(row.trade_date.weekday().num_days_from_monday() as i32),
            );
            prev_close = Some(close);
        }
        Some(frame)
    }

    fn empty(symbol: String) -> Self {
        Self {
            symbol,
            dates: Vec::new(),
            open: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
            close: Vec::new(),
            pre_close: Vec::new(),
            p_change: Vec::new(),
            volume: Vec::new(),
            atr21: Vec::new(),
            date_week: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// 이름으로 수치 열을 조회합니다.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        match name {
            "open" => Some(&self.open),
            "high" => Some(&self.high),
            "low" => Some(&self.low),
            "close" => Some(&self.close),
            "pre_close" => Some(&self.pre_close),
            "p_change" => Some(&self.p_change),
            "volume" => Some(&self.volume),
            "atr21" => Some(&self.atr21),
            _ => None,
        }
    }

    /// 주어진 거래일 집합에 속하는 행만 남깁니다. 남는 행이 없으면 `None`.
    pub fn restrict_to(&self, dates: &BTreeSet<NaiveDate>) -> Option<Self> {
        let mut frame = Self::empty(self.symbol.clone());
        for i in 0..self.len() {
            if !dates.contains(&self.dates[i]) {
                continue;
            }
            frame.dates.push(self.dates[i]);
            frame.open.push(self.open[i]);
            frame.high.push(self.high[i]);
            frame.low.push(self.low[i]);
            frame.close.push(self.close[i]);
            frame.pre_close.push(self.pre_close[i]);
            frame.p_change.push(self.p_change[i]);
            frame.volume.push(self.volume[i]);
            frame.atr21.push(self.atr21[i]);
            frame.date_week.push(self.date_week[i]);
        }
        (!frame.is_empty()).then_some(frame)
    }

    /// 고가와 저가의 중간값. 체결가로 사용합니다.
    pub fn mid_price(&self, i: usize) -> f64 {
        (self.high[i] + self.low[i]) / 2.0
    }
}
