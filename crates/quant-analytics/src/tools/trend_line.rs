//! 추세선 도구: 지지/저항선과 구간 이동 거리.

use serde::{Deserialize, Serialize};

/// 추세선 하나. 전체 구간 `[x_start, x_end]`에 걸쳐 연장됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendLine {
    /// `support` 또는 `resistance`
    #[serde(rename = "type")]
    pub kind: String,
    pub x_start: usize,
    pub x_end: usize,
    pub y_start: f64,
    pub y_end: f64,
}

/// 피벗 탐색 창 크기.
fn pivot_window(len: usize) -> usize {
    (len / 20).max(3)
}

/// 창 안의 극값 인덱스. 같은 창 안에서 연속된 극값은 첫 번째만 남깁니다.
fn pivots(close: &[f64], want_max: bool) -> Vec<usize> {
    let n = close.len();
    let w = pivot_window(n);
    let mut out: Vec<usize> = Vec::new();
    if n < 2 * w + 1 {
        return out;
    }
    for i in w..(n - w) {
        let window = &close[i - w..=i + w];
        let is_pivot = if want_max {
            window.iter().all(|v| close[i] >= *v)
        } else {
            window.iter().all(|v| close[i] <= *v)
        };
        if is_pivot && out.last().map_or(true, |last| i - last > w) {
            out.push(i);
        }
    }
    out
}

fn line_through(kind: &str, a: (usize, f64), b: (usize, f64), x_end: usize) -> Option<TrendLine> {
    if a.0 == b.0 {
        return None;
    }
    let slope = (b.1 - a.1) / (b.0 as f64 - a.0 as f64);
    let y_at = |x: usize| a.1 + slope * (x as f64 - a.0 as f64);
    let (y_start, y_end) = (y_at(0), y_at(x_end));
    (y_start.is_finite() && y_end.is_finite()).then(|| TrendLine {
        kind: kind.to_string(),
        x_start: 0,
        x_end,
        y_start,
        y_end,
    })
}

/// 극값 피벗을 이은 지지/저항 추세선.
///
/// `only_last`이면 종류별 마지막 두 피벗만, 아니면 이웃한 피벗 쌍마다 선을 만듭니다.
pub fn support_resistance(close: &[f64], only_last: bool) -> Vec<TrendLine> {
    let x_end = close.len().saturating_sub(1);
    let mut lines = Vec::new();
    for (kind, want_max) in [("support", false), ("resistance", true)] {
        let points = pivots(close, want_max);
        let pairs: Vec<(usize, usize)> = if only_last {
            match points.as_slice() {
                [.., a, b] => vec![(*a, *b)],
                _ => Vec::new(),
            }
        } else {
            points.windows(2).map(|w| (w[0], w[1])).collect()
        };
        lines.extend(
            pairs
                .into_iter()
                .filter_map(|(a, b)| line_through(kind, (a, close[a]), (b, close[b]), x_end)),
        );
    }
    lines
}

/// 구간 수직 거리 계산 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftHow {
    /// 구간 끝 종가 - 시작 종가
    Close,
    /// 구간 최고가 - 최저가 (방향은 끝-시작 부호)
    MaxMin,
    /// 구간 내 종가 변동 절대값 합
    SumMaxMin,
}

impl ShiftHow {
    /// 알 수 없는 값은 [`ShiftHow::Close`].
    pub fn parse(mode: &str) -> Self {
        match mode {
            "maxmin" => Self::MaxMin,
            "summaxmin" => Self::SumMaxMin,
            _ => Self::Close,
        }
    }
}

/// 이동 거리 구간.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSegment {
    pub segment: usize,
    /// 구간 거래일 수
    pub h_distance: f64,
    /// 가격 변화량
    pub v_distance: f64,
    /// 유클리드 거리
    pub distance: f64,
    /// 시작 종가 대비 변화율 (%)
    pub shift: f64,
    /// 거래일당 가격 변화 크기
    pub ratio: f64,
}

/// 시계열을 균등 길이 구간으로 나누어 구간별 이동 거리를 계산합니다.
///
/// 구간 길이는 `len × 0.1 × step_x`를 반올림한 값이며 최소 2입니다.
pub fn shift_distance(close: &[f64], how: ShiftHow, step_x: f64) -> Vec<ShiftSegment> {
    let n = close.len();
    if n < 2 {
        return Vec::new();
    }
    let step_x = if step_x.is_finite() && step_x > 0.0 { step_x } else { 1.0 };
    let window = ((n as f64 * 0.1 * step_x).round() as usize).max(2);

    let mut segments = Vec::new();
    let mut start = 0;
    while start < n - 1 {
        let end = (start + window).min(n - 1);
        let slice = &close[start..=end];
        let net = close[end] - close[start];
        let v_distance = match how {
            ShiftHow::Close => net,
            ShiftHow::MaxMin => {
                let max = slice.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let min = slice.iter().copied().fold(f64::INFINITY, f64::min);
                (max - min).copysign(if net < 0.0 { -1.0 } else { 1.0 })
            }
            ShiftHow::SumMaxMin => slice.windows(2).map(|w| (w[1] - w[0]).abs()).sum(),
        };
        let h_distance = (end - start) as f64;
        let shift = if close[start] != 0.0 {
            v_distance / close[start] * 100.0
        } else {
            0.0
        };
        segments.push(ShiftSegment {
            segment: segments.len(),
            h_distance,
            v_distance,
            distance: h_distance.hypot(v_distance),
            shift,
            ratio: v_distance.abs() / h_distance,
        });
        start = end;
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zigzag() -> Vec<f64> {
        // 완만히 상승하는 파동: 저점/고점이 모두 높아짐
        (0..120)
            .map(|i| 100.0 + i as f64 * 0.2 + 5.0 * ((i as f64) * std::f64::consts::PI / 15.0).sin())
            .collect()
    }

    #[test]
    fn test_support_resistance_rising_channel() {
        let close = zigzag();
        let lines = support_resistance(&close, true);
        assert_eq!(lines.len(), 2);
        let support = lines.iter().find(|l| l.kind == "support").unwrap();
        let resistance = lines.iter().find(|l| l.kind == "resistance").unwrap();
        assert!(support.y_end > support.y_start);
        assert!(resistance.y_start > support.y_start);
        assert_eq!(support.x_end, close.len() - 1);

        let all = support_resistance(&close, false);
        assert!(all.len() > lines.len());
    }

    #[test]
    fn test_support_resistance_short_series() {
        assert!(support_resistance(&[1.0, 2.0, 3.0], true).is_empty());
        assert!(support_resistance(&[], false).is_empty());
    }

    #[test]
    fn test_shift_distance_close_mode() {
        let close: Vec<f64> = (0..21).map(|i| 100.0 + i as f64).collect();
        let segments = shift_distance(&close, ShiftHow::Close, 1.0);
        // 창 크기 round(2.1) = 2 → 10개 구간
        assert_eq!(segments.len(), 10);
        let first = &segments[0];
        assert_eq!(first.h_distance, 2.0);
        assert_eq!(first.v_distance, 2.0);
        assert!((first.shift - 2.0).abs() < 1e-9);
        assert!((first.distance - 8f64.sqrt()).abs() < 1e-9);
        assert_eq!(segments[9].segment, 9);
    }

    #[test]
    fn test_shift_distance_modes() {
        let close = [10.0, 14.0, 8.0, 11.0];
        let seg = |how| shift_distance(&close, how, 10.0)[0].v_distance;
        assert_eq!(seg(ShiftHow::Close), 1.0);
        assert_eq!(seg(ShiftHow::MaxMin), 6.0);
        assert_eq!(seg(ShiftHow::SumMaxMin), 4.0 + 6.0 + 3.0);
        assert_eq!(ShiftHow::parse("unknown"), ShiftHow::Close);
    }
}
