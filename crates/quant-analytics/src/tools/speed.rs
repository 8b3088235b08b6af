//! 추세 속도 비교.

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::error::{AnalysisError, AnalysisResult};
use crate::frame::KlineFrame;
use crate::indicators::{mean, spearman};

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedComparison {
    pub speed: f64,
    pub benchmark_speed: f64,
    /// 공통 거래일 종가의 Spearman 상관계수
    pub corr: Option<f64>,
}

/// `resample`일 간격으로 뽑은 값의 평균 변화율. 포인트가 2개 미만이면 0.
pub fn kl_speed(values: &[f64], resample: usize) -> f64 {
    let sampled: Vec<f64> = values.iter().step_by(resample.max(1)).copied().collect();
    let changes: Vec<f64> = sampled
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    mean(&changes).unwrap_or(0.0)
}

/// 종목과 벤치마크의 추세 속도와 상관계수.
pub fn compare(
    frame: &KlineFrame,
    benchmark: &KlineFrame,
    resample: usize,
    speed_key: &str,
) -> AnalysisResult<SpeedComparison> {
    let invalid = || AnalysisError::InvalidOption {
        name: "speed_key".to_string(),
        value: speed_key.to_string(),
    };
    let values = frame.column(speed_key).ok_or_else(invalid)?;
    let bench_values = benchmark.column(speed_key).ok_or_else(invalid)?;

    let bench_close: HashMap<NaiveDate, f64> = benchmark
        .dates
        .iter()
        .copied()
        .zip(benchmark.close.iter().copied())
        .collect();
    let (xs, ys): (Vec<f64>, Vec<f64>) = frame
        .dates
        .iter()
        .zip(&frame.close)
        .filter_map(|(d, c)| bench_close.get(d).map(|b| (*c, *b)))
        .unzip();

    Ok(SpeedComparison {
        speed: kl_speed(values, resample),
        benchmark_speed: kl_speed(bench_values, resample),
        corr: spearman(&xs, &ys),
    })
}
