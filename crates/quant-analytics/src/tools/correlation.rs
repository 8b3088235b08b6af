//! 종목 간 상관/거리 행렬.
//!
//! 각 종목의 선택 필드를 거래일 합집합에 맞춰 정렬하고, 빠진 날은 0으로 채웁니다.
//!
//! - 상관: `pears` (Pearson), `sperm` (Spearman), `sigmoid` (표준화 후 시그모이드 변환한 Pearson)
//! - 거리: `manhattan`, `euclidean`, `cosine`. 결과 행렬은 최소-최대 정규화됩니다.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

use crate::error::{AnalysisError, AnalysisResult};
use crate::frame::KlineFrame;
use crate::indicators::{mean, min_max_scale, pearson, spearman, std_dev};
use crate::sampling::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrType {
    Pearson,
    Spearman,
    Sigmoid,
}

impl CorrType {
    pub fn parse(raw: &str) -> AnalysisResult<Self> {
        match raw {
            "pears" | "pearson" => Ok(Self::Pearson),
            "sperm" | "spearman" => Ok(Self::Spearman),
            "sigmoid" => Ok(Self::Sigmoid),
            other => Err(invalid("corr_type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceType {
    Manhattan,
    Euclidean,
    Cosine,
}

impl DistanceType {
    pub fn parse(raw: &str) -> AnalysisResult<Self> {
        match raw {
            "manhattan" => Ok(Self::Manhattan),
            "euclidean" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(invalid("distance_type", other)),
        }
    }
}

fn invalid(name: &str, value: &str) -> AnalysisError {
    AnalysisError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// 거래일 합집합 기준으로 정렬된 열. 빠진 날은 0.
fn aligned_columns(frames: &[KlineFrame], field: &str) -> AnalysisResult<Vec<Vec<f64>>> {
    let dates: BTreeSet<NaiveDate> = frames.iter().flat_map(|f| f.dates.iter().copied()).collect();
    frames
        .iter()
        .map(|frame| {
            let values = frame.column(field).ok_or_else(|| invalid("field", field))?;
            let by_date: HashMap<NaiveDate, f64> =
                frame.dates.iter().copied().zip(values.iter().copied()).collect();
            Ok(dates
                .iter()
                .map(|d| by_date.get(d).copied().unwrap_or(0.0))
                .collect())
        })
        .collect()
}

fn labels(frames: &[KlineFrame]) -> Vec<String> {
    frames.iter().map(|f| f.symbol.clone()).collect()
}

fn sigmoid_transform(values: &[f64]) -> Vec<f64> {
    let m = mean(values).unwrap_or(0.0);
    let sd = std_dev(values).filter(|s| *s > 0.0).unwrap_or(1.0);
    values
        .iter()
        .map(|v| 1.0 / (1.0 + (-(v - m) / sd).exp()))
        .collect()
}

/// 상관 행렬.
pub fn corr_matrix(frames: &[KlineFrame], field: &str, corr_type: &str) -> AnalysisResult<Matrix> {
    let corr_type = CorrType::parse(corr_type)?;
    let mut columns = aligned_columns(frames, field)?;
    if corr_type == CorrType::Sigmoid {
        columns = columns.iter().map(|c| sigmoid_transform(c)).collect();
    }

    let data = columns
        .iter()
        .enumerate()
        .map(|(i, a)| {
            columns
                .iter()
                .enumerate()
                .map(|(j, b)| {
                    if i == j {
                        return Some(1.0);
                    }
                    match corr_type {
                        CorrType::Spearman => spearman(a, b),
                        CorrType::Pearson | CorrType::Sigmoid => pearson(a, b),
                    }
                })
                .collect()
        })
        .collect();
    Ok(Matrix::square(labels(frames), data))
}

fn distance(a: &[f64], b: &[f64], kind: DistanceType) -> f64 {
    match kind {
        DistanceType::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
        DistanceType::Euclidean => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt(),
        DistanceType::Cosine => {
            let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
            if na == 0.0 || nb == 0.0 {
                1.0
            } else {
                (1.0 - dot / (na * nb)).max(0.0)
            }
        }
    }
}

/// 최소-최대 정규화된 거리 행렬.
pub fn distance_matrix(
    frames: &[KlineFrame],
    field: &str,
    distance_type: &str,
) -> AnalysisResult<Matrix> {
    let kind = DistanceType::parse(distance_type)?;
    let columns = aligned_columns(frames, field)?;
    let n = columns.len();

    let flat: Vec<f64> = (0..n)
        .flat_map(|i| (0..n).map(move |j| (i, j)))
        .map(|(i, j)| {
            if i == j {
                0.0
            } else {
                distance(&columns[i], &columns[j], kind)
            }
        })
        .collect();
    let scaled = min_max_scale(&flat);

    let data = scaled
        .chunks(n.max(1))
        .map(|row| row.iter().map(|v| Some(*v)).collect())
        .collect();
    Ok(Matrix::square(labels(frames), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::testing::frame;

    fn frames() -> Vec<KlineFrame> {
        vec![
            frame("usA", &[1.0, 2.0, 3.0, 4.0, 6.0]),
            frame("usB", &[2.0, 4.0, 6.0, 8.0, 12.0]),
            frame("usC", &[6.0, 4.0, 3.0, 2.0, 1.0]),
        ]
    }

    #[test]
    fn test_pearson_matrix() {
        let m = corr_matrix(&frames(), "close", "pears").unwrap();
        assert_eq!(m.columns, vec!["usA", "usB", "usC"]);
        assert_eq!(m.get("usA", "usA"), Some(1.0));
        assert!((m.get("usA", "usB").unwrap() - 1.0).abs() < 1e-9);
        assert!(m.get("usA", "usC").unwrap() < 0.0);
    }

    #[test]
    fn test_spearman_and_sigmoid_matrix() {
        let m = corr_matrix(&frames(), "close", "sperm").unwrap();
        assert!((m.get("usA", "usC").unwrap() + 1.0).abs() < 1e-9);
        let s = corr_matrix(&frames(), "close", "sigmoid").unwrap();
        assert!(s.get("usA", "usB").unwrap() > 0.99);
    }

    #[test]
    fn test_unknown_types_rejected() {
        assert!(corr_matrix(&frames(), "close", "kendall").is_err());
        assert!(distance_matrix(&frames(), "close", "chebyshev").is_err());
        assert!(corr_matrix(&frames(), "bogus", "pears").is_err());
    }

    #[test]
    fn test_distance_matrix_scaled() {
        for kind in ["manhattan", "euclidean", "cosine"] {
            let m = distance_matrix(&frames(), "close", kind).unwrap();
            assert_eq!(m.get("usA", "usA"), Some(0.0));
            let max = m.data.iter().flatten().copied().fold(f64::MIN, f64::max);
            assert!((max - 1.0).abs() < 1e-9, "{kind}");
            assert!(m.data.iter().flatten().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_union_alignment_fills_zero() {
        let short = frame("usD", &[1.0, 2.0]);
        let long = frame("usE", &[1.0, 2.0, 3.0, 4.0]);
        let columns = aligned_columns(&[short, long], "close").unwrap();
        assert_eq!(columns[0], vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(columns[1].len(), 4);
    }
}
