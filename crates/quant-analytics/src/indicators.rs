//! 수치 계산 헬퍼.
//!
//! 지수이동평균/MACD, 기초 통계, 백분위수, 순위, 다항 회귀를 제공합니다.

/// MACD 계산 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub dif: Vec<f64>,
    pub dea: Vec<f64>,
    pub bar: Vec<f64>,
}

/// 지수이동평균. 첫 값을 시드로 사용하며 `alpha = 2 / (span + 1)`.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// MACD (DIF = 빠른 EMA - 느린 EMA, DEA = DIF의 시그널 EMA, BAR = 2 × (DIF - DEA)).
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(close, fast);
    let slow_ema = ema(close, slow);
    let dif: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let dea = ema(&dif, signal);
    let bar = dif.iter().zip(&dea).map(|(d, e)| 2.0 * (d - e)).collect();
    Macd { dif, dea, bar }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// 표본 표준편차 (n - 1).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// 선형 보간 백분위수 (`q`는 0~100).
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// 평균 순위 (동률은 평균 순위, 1부터 시작).
pub fn rank(values: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && values[idx[j + 1]] == values[idx[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[idx[k]] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Pearson 상관계수. 길이가 다르거나 2개 미만이거나 분산이 0이면 `None`.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mean_x = mean(x)?;
    let mean_y = mean(y)?;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    // 변동 없음
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman 순위 상관계수.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() {
        return None;
    }
    pearson(&rank(x), &rank(y))
}

/// 최소-최대 정규화. 범위가 0이면 모두 0.
pub fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|v| if span > 0.0 { (v - min) / span } else { 0.0 })
        .collect()
}

/// 최소제곱 다항 회귀 계수 (낮은 차수부터). `x`는 호출 측에서 정규화해 전달합니다.
///
/// 정규방정식을 부분 피벗 가우스 소거로 풉니다. 특이 행렬이면 `None`.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Option<Vec<f64>> {
    let n = degree + 1;
    if x.len() != y.len() || x.len() < n {
        return None;
    }

    let mut a = vec![vec![0.0; n + 1]; n];
    for (xi, yi) in x.iter().zip(y) {
        let mut powers = vec![1.0; 2 * n - 1];
        for p in 1..powers.len() {
            powers[p] = powers[p - 1] * xi;
        }
        for r in 0..n {
            for c in 0..n {
                a[r][c] += powers[r + c];
            }
            a[r][n] += powers[r] * yi;
        }
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            for k in col..=n {
                let delta = factor * a[col][k];
                a[row][k] -= delta;
            }
        }
    }
    Some((0..n).map(|i| a[i][n] / a[i][i]).collect())
}

/// 다항식 값을 계산합니다.
pub fn polyval(coef: &[f64], x: f64) -> f64 {
    coef.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// 결정계수 R².
pub fn r_squared(y: &[f64], fit: &[f64]) -> Option<f64> {
    let m = mean(y)?;
    let ss_tot: f64 = y.iter().map(|v| (v - m).powi(2)).sum();
    if ss_tot == 0.0 {
        return None;
    }
    let ss_res: f64 = y.iter().zip(fit).map(|(a, b)| (a - b).powi(2)).sum();
    Some(1.0 - ss_res / ss_tot)
}

/// `[0, 1]`로 정규화된 x 좌표.
pub fn unit_x(len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![0.0; len];
    }
    (0..len).map(|i| i as f64 / (len - 1) as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seeds_with_first_value() {
        let out = ema(&[10.0, 10.0, 13.0], 2);
        assert_eq!(out[0], 10.0);
        assert_eq!(out[1], 10.0);
        assert!((out[2] - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 50.0), Some(2.5));
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 100.0), Some(4.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_rank_averages_ties() {
        assert_eq!(rank(&[10.0, 20.0, 10.0]), vec![1.5, 3.0, 1.5]);
    }

    #[test]
    fn test_pearson_and_spearman() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&x, &y).unwrap() - 1.0).abs() < 1e-10);

        // 단조 증가지만 비선형
        let z = [1.0, 4.0, 9.0, 16.0, 100.0];
        assert!(pearson(&x, &z).unwrap() < 1.0);
        assert!((spearman(&x, &z).unwrap() - 1.0).abs() < 1e-10);

        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0, 1.0]), None);
        assert_eq!(pearson(&x, &y[..3]), None);
    }

    #[test]
    fn test_polyfit_recovers_quadratic() {
        let x = unit_x(20);
        let y: Vec<f64> = x.iter().map(|v| 3.0 + 2.0 * v - 5.0 * v * v).collect();
        let coef = polyfit(&x, &y, 2).unwrap();
        assert!((coef[0] - 3.0).abs() < 1e-6);
        assert!((coef[1] - 2.0).abs() < 1e-6);
        assert!((coef[2] + 5.0).abs() < 1e-6);
        assert!((polyval(&coef, 0.5) - (3.0 + 1.0 - 1.25)).abs() < 1e-6);
    }

    #[test]
    fn test_macd_cross_on_reversal() {
        let mut close: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        close.extend((0..40).map(|i| 60.0 + 2.0 * i as f64));
        let m = macd(&close, 12, 26, 9);
        assert_eq!(m.dif.len(), close.len());
        assert!(m.dif[39] < m.dea[39]);
        assert!(m.dif[79] > m.dea[79]);
    }
}
