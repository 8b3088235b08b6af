//! 출력 길이 제한과 표 형태 직렬화.
//!
//! 긴 시계열은 앞/뒤를 자르지 않고 균등 간격으로 솎아 전체 모양을 유지합니다.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 기본 출력 포인트 수.
pub const DEFAULT_SAMPLE_LIMIT: usize = 200;

/// 균등 간격 샘플링.
///
/// `limit`이 0이거나 길이가 `limit` 이하이면 그대로 반환합니다.
/// 간격은 `ceil(len / limit)`이라 결과는 항상 `limit`개 이하이며 첫 원소를 포함합니다.
pub fn stride_sample<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    if limit == 0 || items.len() <= limit {
        return items.to_vec();
    }
    let step = items.len().div_ceil(limit).max(1);
    items.iter().step_by(step).cloned().collect()
}

/// 차트용 `{x, y}` 포인트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub x: String,
    pub y: Option<f64>,
}

/// 거래일별 값을 샘플링된 포인트로 변환합니다. 유한하지 않은 값은 `null`.
pub fn series_points(dates: &[NaiveDate], values: &[f64], limit: usize) -> Vec<SeriesPoint> {
    let points: Vec<SeriesPoint> = dates
        .iter()
        .zip(values)
        .map(|(d, v)| SeriesPoint {
            x: d.format("%Y-%m-%d").to_string(),
            y: v.is_finite().then_some(*v),
        })
        .collect();
    stride_sample(&points, limit)
}

/// `{columns, index, data}` 형태의 표. 결측값은 0으로 채웁니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub columns: Vec<String>,
    pub index: Vec<String>,
    pub data: Vec<Vec<f64>>,
}

impl Matrix {
    /// 행 단위 값으로 생성합니다. `None`과 유한하지 않은 값은 0.
    pub fn new(columns: Vec<String>, index: Vec<String>, data: Vec<Vec<Option<f64>>>) -> Self {
        let data = data
            .into_iter()
            .map(|row| {
                let mut row: Vec<f64> = row
                    .into_iter()
                    .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
                    .collect();
                row.resize(columns.len(), 0.0);
                row
            })
            .collect();
        Self {
            columns,
            index,
            data,
        }
    }

    /// 같은 라벨을 행과 열에 쓰는 정방 행렬.
    pub fn square(labels: Vec<String>, data: Vec<Vec<Option<f64>>>) -> Self {
        Self::new(labels.clone(), labels, data)
    }

    /// 행 라벨로 값을 조회합니다.
    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let r = self.index.iter().position(|i| i == row)?;
        let c = self.columns.iter().position(|i| i == column)?;
        self.data.get(r)?.get(c).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_sample_caps_length() {
        let items: Vec<usize> = (0..1000).collect();
        let sampled = stride_sample(&items, 200);
        assert_eq!(sampled.len(), 200);
        assert_eq!(sampled[0], 0);
        assert_eq!(sampled[1], 5);

        let uneven: Vec<usize> = (0..399).collect();
        let sampled = stride_sample(&uneven, 200);
        assert!(sampled.len() <= 200);
        assert_eq!(sampled.last(), Some(&398));
    }

    #[test]
    fn test_stride_sample_short_input_untouched() {
        let items = vec![1, 2, 3];
        assert_eq!(stride_sample(&items, 200), items);
        assert_eq!(stride_sample(&items, 0), items);
    }

    #[test]
    fn test_matrix_fills_missing_with_zero() {
        let m = Matrix::square(
            vec!["a".into(), "b".into()],
            vec![vec![Some(1.0), None], vec![Some(f64::NAN), Some(1.0)]],
        );
        assert_eq!(m.data, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(m.get("a", "a"), Some(1.0));
        assert_eq!(m.get("c", "a"), None);
    }
}
