//! 황금분할 지점.

use serde::{Deserialize, Serialize};

use crate::indicators::percentile;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoldenPoints {
    pub sp382: f64,
    pub sp50: f64,
    pub sp618: f64,
}

/// 가격 분포의 38.2 / 50 / 61.8 백분위수.
pub fn golden_points(close: &[f64]) -> Option<GoldenPoints> {
    Some(GoldenPoints {
        sp382: percentile(close, 38.2)?,
        sp50: percentile(close, 50.0)?,
        sp618: percentile(close, 61.8)?,
    })
}

/// 최저가~최고가 범위의 38.2% / 50% / 61.8% 지점.
pub fn golden_points_ex(close: &[f64]) -> Option<GoldenPoints> {
    if close.is_empty() {
        return None;
    }
    let min = close.iter().copied().fold(f64::INFINITY, f64::min);
    let max = close.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let at = |ratio: f64| min + (max - min) * ratio;
    Some(GoldenPoints {
        sp382: at(0.382),
        sp50: at(0.5),
        sp618: at(0.618),
    })
}
