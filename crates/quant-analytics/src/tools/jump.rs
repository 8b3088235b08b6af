//! 갭(jump) 탐지.
//!
//! 평균 일간 변동률보다 크게 움직인 날 중 전일 고가/저가를 건너뛴 날을 갭으로 봅니다.
//! 갭 크기 임계값은 `전일 종가 × 평균 |p_change| / 100 × jump_diff_factor`이고,
//! 갭 강도(power)는 갭 크기 / 임계값입니다.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::frame::KlineFrame;
use crate::indicators::mean;

/// 계산 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpMode {
    /// 모든 갭
    Stats,
    /// 강도가 `power_threshold`를 넘는 갭
    Gap,
    /// 강도와 거래량 비율을 가중 합산한 값이 `power_threshold`를 넘는 갭
    Weighted,
}

impl JumpMode {
    /// 알 수 없는 값은 [`JumpMode::Stats`].
    pub fn parse(mode: &str) -> Self {
        match mode {
            "gap" => Self::Gap,
            "weighted" => Self::Weighted,
            _ => Self::Stats,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Gap => "gap",
            Self::Weighted => "weighted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpParams {
    pub jump_diff_factor: f64,
    pub power_threshold: f64,
    /// (갭 강도 가중치, 거래량 비율 가중치)
    pub weight: (f64, f64),
}

impl Default for JumpParams {
    fn default() -> Self {
        Self {
            jump_diff_factor: 1.0,
            power_threshold: 2.0,
            weight: (0.5, 0.5),
        }
    }
}

/// 갭 한 건.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpRow {
    pub date: NaiveDate,
    /// 상승 갭 1, 하락 갭 -1
    pub jump: i8,
    pub gap: f64,
    pub power: f64,
    pub close: f64,
    pub p_change: f64,
}

/// 갭 목록을 거래일 순으로 반환합니다.
pub fn calc(frame: &KlineFrame, mode: JumpMode, params: &JumpParams) -> Vec<JumpRow> {
    let abs_change: Vec<f64> = frame.p_change.iter().map(|p| p.abs()).collect();
    let Some(change_ratio_min) = mean(&abs_change) else {
        return Vec::new();
    };
    let volume_mean = mean(&frame.volume).unwrap_or(0.0);

    let mut rows = Vec::new();
    for i in 1..frame.len() {
        let p_change = frame.p_change[i];
        if p_change.abs() <= change_ratio_min {
            continue;
        }
        let threshold = frame.pre_close[i] * change_ratio_min / 100.0 * params.jump_diff_factor;
        if threshold <= 0.0 {
            continue;
        }

        let (jump, gap) = if p_change > 0.0 {
            (1, frame.low[i] - frame.high[i - 1])
        } else {
            (-1, frame.low[i - 1] - frame.high[i])
        };
        if gap <= threshold {
            continue;
        }

        let mut power = gap / threshold;
        match mode {
            JumpMode::Stats => {}
            JumpMode::Gap => {
                if power <= params.power_threshold {
                    continue;
                }
            }
            JumpMode::Weighted => {
                let volume_ratio = if volume_mean > 0.0 {
                    frame.volume[i] / volume_mean
                } else {
                    0.0
                };
                power = power * params.weight.0 + volume_ratio * params.weight.1;
                if power <= params.power_threshold {
                    continue;
                }
            }
        }

        rows.push(JumpRow {
            date: frame.dates[i],
            jump,
            gap,
            power,
            close: frame.close[i],
            p_change,
        });
    }
    rows
}
