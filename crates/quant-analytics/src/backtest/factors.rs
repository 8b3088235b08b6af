//! 매수/매도 팩터.
//!
//! - 매수: N일 돌파 ([`BuyFactor::Breakout`]), MACD 골든크로스 ([`BuyFactor::MacdCross`])
//! - 매도: ATR-N 손절/익절 ([`SellFactor::AtrNStop`]), MACD 데드크로스 ([`SellFactor::MacdCross`])
//!
//! 모든 신호는 당일 종가로 판단하고 다음 거래일에 체결됩니다.

use serde::{Deserialize, Serialize};

use super::engine::{BacktestError, BacktestResult};
use crate::frame::KlineFrame;
use crate::indicators::macd;

/// MACD 기간 설정.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdParams {
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    #[serde(default = "default_signal_period")]
    pub signal_period: usize,
}

fn default_fast_period() -> usize {
    12
}
fn default_slow_period() -> usize {
    26
}
fn default_signal_period() -> usize {
    9
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            signal_period: default_signal_period(),
        }
    }
}

impl MacdParams {
    /// 신호 판단 전 워밍업 일수.
    pub fn warmup(&self) -> usize {
        self.slow_period + self.signal_period
    }

    fn validate(&self) -> BacktestResult<()> {
        if self.fast_period == 0 || self.slow_period == 0 || self.signal_period == 0 {
            return Err(BacktestError::ConfigError(
                "MACD 기간은 0보다 커야 합니다".to_string(),
            ));
        }
        if self.fast_period >= self.slow_period {
            return Err(BacktestError::ConfigError(format!(
                "MACD fast_period({})는 slow_period({})보다 작아야 합니다",
                self.fast_period, self.slow_period
            )));
        }
        Ok(())
    }

    /// `(골든크로스, 데드크로스)` 일별 플래그.
    fn crosses(&self, frame: &KlineFrame) -> (Vec<bool>, Vec<bool>) {
        let m = macd(
            &frame.close,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );
        let n = frame.len();
        let mut golden = vec![false; n];
        let mut death = vec![false; n];
        for i in self.warmup().max(1)..n {
            golden[i] = m.dif[i - 1] <= m.dea[i - 1] && m.dif[i] > m.dea[i];
            death[i] = m.dif[i - 1] >= m.dea[i - 1] && m.dif[i] < m.dea[i];
        }
        (golden, death)
    }
}

/// 매수 팩터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuyFactor {
    /// 당일 종가가 최근 `xd`일 최고 종가이면 매수. 신호 후 `xd`일은 건너뜁니다.
    Breakout { xd: usize },
    /// DIF가 DEA를 상향 돌파하면 매수.
    MacdCross(MacdParams),
}

impl BuyFactor {
    pub fn name(&self) -> String {
        match self {
            BuyFactor::Breakout { xd } => format!("breakout_{}", xd),
            BuyFactor::MacdCross(_) => "macd_cross".to_string(),
        }
    }

    pub fn validate(&self) -> BacktestResult<()> {
        match self {
            BuyFactor::Breakout { xd } if *xd == 0 => Err(BacktestError::ConfigError(
                "buy_xd는 0보다 커야 합니다".to_string(),
            )),
            BuyFactor::Breakout { .. } => Ok(()),
            BuyFactor::MacdCross(params) => params.validate(),
        }
    }

    /// 신호가 발생한 거래일 인덱스 (오름차순).
    pub(crate) fn signal_days(&self, frame: &KlineFrame) -> Vec<usize> {
        match self {
            BuyFactor::Breakout { xd } => breakout_days(&frame.close, *xd),
            BuyFactor::MacdCross(params) => {
                let (golden, _) = params.crosses(frame);
                golden
                    .iter()
                    .enumerate()
                    .filter_map(|(i, hit)| hit.then_some(i))
                    .collect()
            }
        }
    }
}

fn breakout_days(close: &[f64], xd: usize) -> Vec<usize> {
    let mut days = Vec::new();
    if xd == 0 || close.len() < xd {
        return days;
    }
    let mut skip = 0;
    for i in (xd - 1)..close.len() {
        if skip > 0 {
            skip -= 1;
            continue;
        }
        let window_max = close[i + 1 - xd..=i]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if close[i] >= window_max {
            days.push(i);
            skip = xd;
        }
    }
    days
}

/// 매도 팩터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SellFactor {
    /// 매수가 대비 하락폭이 `atr21 × stop_loss_n`을 넘으면 손절,
    /// 상승폭이 `atr21 × stop_win_n`을 넘으면 익절.
    AtrNStop { stop_loss_n: f64, stop_win_n: f64 },
    /// DIF가 DEA를 하향 돌파하면 보유 주문 전체 매도.
    MacdCross(MacdParams),
}

impl SellFactor {
    pub fn name(&self) -> String {
        match self {
            SellFactor::AtrNStop { .. } => "atr_n_stop".to_string(),
            SellFactor::MacdCross(_) => "macd_cross".to_string(),
        }
    }

    pub fn validate(&self) -> BacktestResult<()> {
        match self {
            SellFactor::AtrNStop {
                stop_loss_n,
                stop_win_n,
            } => {
                if !stop_loss_n.is_finite() || *stop_loss_n < 0.0 {
                    return Err(BacktestError::ConfigError(format!(
                        "stop_loss_n이 올바르지 않습니다: {}",
                        stop_loss_n
                    )));
                }
                if !stop_win_n.is_finite() || *stop_win_n < 0.0 {
                    return Err(BacktestError::ConfigError(format!(
                        "stop_win_n이 올바르지 않습니다: {}",
                        stop_win_n
                    )));
                }
                Ok(())
            }
            SellFactor::MacdCross(params) => params.validate(),
        }
    }

    pub(crate) fn prepare(&self, frame: &KlineFrame) -> SellCheck {
        match self {
            SellFactor::AtrNStop {
                stop_loss_n,
                stop_win_n,
            } => SellCheck::AtrN {
                loss_n: *stop_loss_n,
                win_n: *stop_win_n,
            },
            SellFactor::MacdCross(params) => SellCheck::AllOrders(params.crosses(frame).1),
        }
    }
}

/// 종목 프레임에 맞춰 준비된 매도 판단.
pub(crate) enum SellCheck {
    AtrN { loss_n: f64, win_n: f64 },
    AllOrders(Vec<bool>),
}

impl SellCheck {
    /// `day` 종가 기준으로 매도 신호가 있는지 판단합니다.
    pub(crate) fn triggered(&self, frame: &KlineFrame, day: usize, buy_price: f64) -> bool {
        match self {
            SellCheck::AtrN { loss_n, win_n } => {
                let atr = frame.atr21[day];
                if atr <= 0.0 {
                    return false;
                }
                let close = frame.close[day];
                buy_price - close > atr * loss_n || close - buy_price > atr * win_n
            }
            SellCheck::AllOrders(flags) => flags.get(day).copied().unwrap_or(false),
        }
    }
}
