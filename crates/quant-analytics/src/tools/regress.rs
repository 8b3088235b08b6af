//! 다항 회귀와 가격 채널.

use serde::{Deserialize, Serialize};

use crate::indicators::{polyfit, polyval, r_squared, unit_x};
use crate::sampling::stride_sample;

/// 탐색할 최대 다항 차수.
pub const MAX_POLY: usize = 6;
/// 유효 적합으로 보는 최소 결정계수.
pub const VALID_R2: f64 = 0.9;

fn fit_r2(x: &[f64], y: &[f64], degree: usize) -> Option<f64> {
    let coef = polyfit(x, y, degree)?;
    let fit: Vec<f64> = x.iter().map(|v| polyval(&coef, *v)).collect();
    r_squared(y, &fit)
}

/// R²가 [`VALID_R2`] 이상인 가장 낮은 차수. 없으면 [`MAX_POLY`].
pub fn least_valid_poly(close: &[f64]) -> usize {
    let x = unit_x(close.len());
    (1..=MAX_POLY)
        .find(|&d| fit_r2(&x, close, d).is_some_and(|r2| r2 >= VALID_R2))
        .unwrap_or(MAX_POLY)
}

/// 조정 R²가 가장 큰 차수. 동률이면 낮은 차수.
pub fn best_poly(close: &[f64]) -> usize {
    let n = close.len() as f64;
    let x = unit_x(close.len());
    let mut best = (1, f64::NEG_INFINITY);
    for degree in 1..=MAX_POLY {
        if n <= degree as f64 + 1.0 {
            break;
        }
        let Some(r2) = fit_r2(&x, close, degree) else {
            continue;
        };
        let adjusted = 1.0 - (1.0 - r2) * (n - 1.0) / (n - degree as f64 - 1.0);
        if adjusted > best.1 + 1e-12 {
            best = (degree, adjusted);
        }
    }
    best.0
}

/// 선형 회귀 채널.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub x: Vec<usize>,
    pub below: Vec<f64>,
    pub fit: Vec<f64>,
    pub above: Vec<f64>,
}

/// 선형 적합선과 잔차 최소/최대만큼 평행 이동한 하단/상단선. 각 선은 `limit`개 이하로 샘플링됩니다.
pub fn regress_channel(close: &[f64], limit: usize) -> Channel {
    let x = unit_x(close.len());
    let fit: Vec<f64> = match polyfit(&x, close, 1) {
        Some(coef) => x.iter().map(|v| polyval(&coef, *v)).collect(),
        None => close.to_vec(),
    };
    let residuals: Vec<f64> = close.iter().zip(&fit).map(|(c, f)| c - f).collect();
    let low = residuals.iter().copied().fold(0.0, f64::min);
    let high = residuals.iter().copied().fold(0.0, f64::max);

    let below: Vec<f64> = fit.iter().map(|f| f + low).collect();
    let above: Vec<f64> = fit.iter().map(|f| f + high).collect();

    let fit = stride_sample(&fit, limit);
    Channel {
        x: (0..fit.len()).collect(),
        below: stride_sample(&below, limit),
        fit,
        above: stride_sample(&above, limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_series_degree_one() {
        let close: Vec<f64> = (0..50).map(|i| 10.0 + i as f64 * 0.5).collect();
        assert_eq!(least_valid_poly(&close), 1);
        assert_eq!(best_poly(&close), 1);
    }

    #[test]
    fn test_quadratic_series_needs_degree_two() {
        let close: Vec<f64> = (0..60)
            .map(|i| {
                let x = i as f64 - 30.0;
                100.0 + x * x * 0.1
            })
            .collect();
        assert_eq!(least_valid_poly(&close), 2);
    }

    #[test]
    fn test_channel_encloses_series() {
        let close: Vec<f64> = (0..300)
            .map(|i| 50.0 + i as f64 * 0.1 + ((i as f64) / 5.0).sin())
            .collect();
        let channel = regress_channel(&close, 100);
        assert!(channel.fit.len() <= 100);
        assert_eq!(channel.x.len(), channel.fit.len());
        assert_eq!(channel.below.len(), channel.fit.len());
        for i in 0..channel.fit.len() {
            assert!(channel.below[i] <= channel.fit[i]);
            assert!(channel.above[i] >= channel.fit[i]);
        }
    }
}
