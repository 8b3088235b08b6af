//! 종목별 등락률 통계.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::AnalysisTool;
use crate::error::{AnalysisError, AnalysisResult};
use crate::frame::KlineFrame;
use crate::indicators::{mean, percentile};
use crate::sampling::Matrix;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// 등락률 구간 경계 (오른쪽 닫힘).
const CHANGE_BINS: [f64; 9] = [
    f64::NEG_INFINITY,
    -7.0,
    -5.0,
    -3.0,
    0.0,
    3.0,
    5.0,
    7.0,
    f64::INFINITY,
];

/// 상승/하락일 등락률 요약.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PChangeStats {
    pub up_mean: Option<f64>,
    pub up_count: usize,
    pub down_mean: Option<f64>,
    pub down_count: usize,
    pub mean_ratio: Option<f64>,
    pub count_ratio: Option<f64>,
}

/// 통계 도구를 실행합니다. 결과는 `{symbols, result}`.
pub fn run(tool: AnalysisTool, frames: &[KlineFrame]) -> AnalysisResult<Map<String, Value>> {
    let result = match tool {
        AnalysisTool::PChangeStats => {
            let map: BTreeMap<&str, PChangeStats> = frames
                .iter()
                .map(|f| (f.symbol.as_str(), p_change_stats(&f.p_change)))
                .collect();
            json!(map)
        }
        AnalysisTool::DateWeekWave => json!(date_week_wave(frames)),
        AnalysisTool::DateWeekWin => json!(date_week_win(frames)),
        AnalysisTool::BcutChangeVc => json!(bcut_change_vc(frames)),
        AnalysisTool::QcutChangeVc => json!(qcut_change_vc(frames)),
        AnalysisTool::WaveChangeRate => {
            let map: BTreeMap<&str, Option<f64>> = frames
                .iter()
                .map(|f| (f.symbol.as_str(), wave_change_rate(f)))
                .collect();
            json!(map)
        }
        other => return Err(AnalysisError::UnsupportedTool(other.to_string())),
    };

    let mut payload = Map::new();
    payload.insert(
        "symbols".into(),
        json!(frames.iter().map(|f| f.symbol.as_str()).collect::<Vec<_>>()),
    );
    payload.insert("result".into(), result);
    Ok(payload)
}

pub fn p_change_stats(p_change: &[f64]) -> PChangeStats {
    let up: Vec<f64> = p_change.iter().copied().filter(|p| *p > 0.0).collect();
    let down: Vec<f64> = p_change.iter().copied().filter(|p| *p < 0.0).collect();
    let up_mean = mean(&up);
    let down_mean = mean(&down);
    PChangeStats {
        up_mean,
        up_count: up.len(),
        down_mean,
        down_count: down.len(),
        mean_ratio: match (up_mean, down_mean) {
            (Some(u), Some(d)) if d != 0.0 => Some((u / d).abs()),
            _ => None,
        },
        count_ratio: (!down.is_empty()).then(|| up.len() as f64 / down.len() as f64),
    }
}

/// 일간 진폭 (%) = (고가 - 저가) / 전일 종가 × 100.
fn wave(frame: &KlineFrame, i: usize) -> Option<f64> {
    let pre = frame.pre_close[i];
    (pre != 0.0).then(|| (frame.high[i] - frame.low[i]) / pre * 100.0)
}

/// 요일 × 종목 표. `cell`은 해당 요일 행 인덱스 목록으로 값을 계산합니다.
fn by_weekday<F>(frames: &[KlineFrame], cell: F) -> Matrix
where
    F: Fn(&KlineFrame, &[usize]) -> Option<f64>,
{
    let mut days: Vec<i32> = frames
        .iter()
        .flat_map(|f| f.date_week.iter().copied())
        .filter(|d| (0..7).contains(d))
        .collect();
    days.sort_unstable();
    days.dedup();

    let data = days
        .iter()
        .map(|day| {
            frames
                .iter()
                .map(|f| {
                    let idx: Vec<usize> = (0..f.len()).filter(|i| f.date_week[*i] == *day).collect();
                    if idx.is_empty() {
                        None
                    } else {
                        cell(f, &idx)
                    }
                })
                .collect()
        })
        .collect();

    Matrix::new(
        frames.iter().map(|f| f.symbol.clone()).collect(),
        days.iter().map(|d| WEEKDAYS[*d as usize].to_string()).collect(),
        data,
    )
}

/// 요일별 평균 진폭.
pub fn date_week_wave(frames: &[KlineFrame]) -> Matrix {
    by_weekday(frames, |f, idx| {
        let waves: Vec<f64> = idx.iter().filter_map(|i| wave(f, *i)).collect();
        mean(&waves)
    })
}

/// 요일별 상승 비율.
pub fn date_week_win(frames: &[KlineFrame]) -> Matrix {
    by_weekday(frames, |f, idx| {
        let wins = idx.iter().filter(|i| f.p_change[**i] > 0.0).count();
        Some(wins as f64 / idx.len() as f64)
    })
}

fn bin_label(lo: f64, hi: f64) -> String {
    let fmt = |v: f64| {
        if v.is_infinite() {
            if v < 0.0 { "-inf".to_string() } else { "inf".to_string() }
        } else {
            format!("{}", v)
        }
    };
    format!("({}, {}]", fmt(lo), fmt(hi))
}

/// 고정 등락률 구간별 비율 (구간 × 종목).
pub fn bcut_change_vc(frames: &[KlineFrame]) -> Matrix {
    let bins: Vec<(f64, f64)> = CHANGE_BINS.windows(2).map(|w| (w[0], w[1])).collect();
    let data = bins
        .iter()
        .map(|(lo, hi)| {
            frames
                .iter()
                .map(|f| {
                    if f.is_empty() {
                        return None;
                    }
                    let hits = f.p_change.iter().filter(|p| **p > *lo && **p <= *hi).count();
                    Some(hits as f64 / f.len() as f64)
                })
                .collect()
        })
        .collect();
    Matrix::new(
        frames.iter().map(|f| f.symbol.clone()).collect(),
        bins.iter().map(|(lo, hi)| bin_label(*lo, *hi)).collect(),
        data,
    )
}

/// 종목별 등락률 사분위 경계 (종목 × `min/q25/q50/q75/max`).
pub fn qcut_change_vc(frames: &[KlineFrame]) -> Matrix {
    let qs = [0.0, 25.0, 50.0, 75.0, 100.0];
    let data = frames
        .iter()
        .map(|f| qs.iter().map(|q| percentile(&f.p_change, *q)).collect())
        .collect();
    Matrix::new(
        ["min", "q25", "q50", "q75", "max"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        frames.iter().map(|f| f.symbol.clone()).collect(),
        data,
    )
}

/// 평균 진폭 / 평균 |등락률|.
pub fn wave_change_rate(frame: &KlineFrame) -> Option<f64> {
    let waves: Vec<f64> = (0..frame.len()).filter_map(|i| wave(frame, i)).collect();
    let abs_change: Vec<f64> = frame.p_change.iter().map(|p| p.abs()).collect();
    let denom = mean(&abs_change)?;
    let rate = mean(&waves)? / denom;
    rate.is_finite().then_some(rate)
}
