//! 백테스팅 엔진
//!
//! 벤치마크 거래일을 기준 달력으로 삼아 종목별 매수/매도 신호를 시뮬레이션합니다.
//!
//! # 체결 규칙
//!
//! - 신호는 당일 종가로 판단하고 다음 거래일 `(고가 + 저가) / 2`에 체결
//! - 매도 팩터는 매수 다음 날부터 판단, 기간 끝까지 청산되지 않은 주문은 `keep`
//! - 주문 수량은 초기 자본 × 포지션 비율을 매매 단위로 내림 (CN 100주, 그 외 1주)
//! - 현금 원장에서 잔고가 모자란 매수는 `deal = false`로 기록하고 주문 목록에는 남깁니다
//!
//! # 사용 예시
//!
//! ```rust,ignore
//! use quant_analytics::backtest::{BacktestConfig, BacktestEngine, BacktestInput};
//!
//! let config = BacktestConfig::breakout(42, 0.5, 3.0);
//! let engine = BacktestEngine::new(config)?;
//! let outcome = engine.run(&input)?;
//! ```

use chrono::NaiveDate;
use quant_core::market_from_symbol;
use quant_data::KlineRow;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

use super::factors::{BuyFactor, SellCheck, SellFactor};
use crate::frame::KlineFrame;

/// 백테스트 오류
#[derive(Debug, Error)]
pub enum BacktestError {
    /// 설정 오류
    #[error("백테스트 설정 오류: {0}")]
    ConfigError(String),

    /// 데이터 오류
    #[error("데이터 오류: {0}")]
    DataError(String),
}

/// 백테스트 결과 타입
pub type BacktestResult<T> = Result<T, BacktestError>;

/// 백테스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// 초기 자본금
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,

    /// 거래 수수료율 (예: 0.001 = 0.1%)
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,

    /// 주문당 자본 비율 (예: 0.1 = 10%)
    #[serde(default = "default_position_ratio")]
    pub position_ratio: Decimal,

    #[serde(default)]
    pub buy_factors: Vec<BuyFactor>,

    #[serde(default)]
    pub sell_factors: Vec<SellFactor>,
}

// 설정 기본값 함수들 (serde default용)
fn default_initial_cash() -> Decimal {
    Decimal::new(1_000_000, 0)
}
fn default_commission_rate() -> Decimal {
    Decimal::new(1, 3)
} // 0.1%
fn default_position_ratio() -> Decimal {
    Decimal::new(1, 1)
} // 10%

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            commission_rate: default_commission_rate(),
            position_ratio: default_position_ratio(),
            buy_factors: Vec::new(),
            sell_factors: Vec::new(),
        }
    }
}

impl BacktestConfig {
    /// N일 돌파 매수 + ATR-N 손절/익절 조합.
    pub fn breakout(buy_xd: usize, stop_loss_n: f64, stop_win_n: f64) -> Self {
        Self::default()
            .with_buy_factor(BuyFactor::Breakout { xd: buy_xd })
            .with_sell_factor(SellFactor::AtrNStop {
                stop_loss_n,
                stop_win_n,
            })
    }

    pub fn with_initial_cash(mut self, cash: Decimal) -> Self {
        self.initial_cash = cash;
        self
    }

    pub fn with_commission_rate(mut self, rate: Decimal) -> Self {
        self.commission_rate = rate;
        self
    }

    pub fn with_buy_factor(mut self, factor: BuyFactor) -> Self {
        self.buy_factors.push(factor);
        self
    }

    pub fn with_sell_factor(mut self, factor: SellFactor) -> Self {
        self.sell_factors.push(factor);
        self
    }

    /// 설정 검증.
    pub fn validate(&self) -> BacktestResult<()> {
        if self.initial_cash <= Decimal::ZERO {
            return Err(BacktestError::ConfigError(format!(
                "초기 자본금은 0보다 커야 합니다: {}",
                self.initial_cash
            )));
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(BacktestError::ConfigError(format!(
                "수수료율이 올바르지 않습니다: {}",
                self.commission_rate
            )));
        }
        if self.position_ratio <= Decimal::ZERO || self.position_ratio > Decimal::ONE {
            return Err(BacktestError::ConfigError(format!(
                "포지션 비율이 올바르지 않습니다: {}",
                self.position_ratio
            )));
        }
        if self.buy_factors.is_empty() {
            return Err(BacktestError::ConfigError(
                "매수 팩터가 하나 이상 필요합니다".to_string(),
            ));
        }
        for factor in &self.buy_factors {
            factor.validate()?;
        }
        for factor in &self.sell_factors {
            factor.validate()?;
        }
        Ok(())
    }
}

/// 백테스트 입력 데이터.
#[derive(Debug, Clone, Default)]
pub struct BacktestInput {
    /// 대상 종목 (순서 유지)
    pub symbols: Vec<String>,
    /// 종목별 일봉
    pub klines: HashMap<String, Vec<KlineRow>>,
    /// 벤치마크 종목
    pub benchmark: String,
    /// 벤치마크 일봉. 비어 있으면 종목 자체 거래일을 사용합니다.
    pub benchmark_klines: Vec<KlineRow>,
}

/// 청산 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellType {
    Win,
    Loss,
    Keep,
}

/// 주문 기록 (매수 신호 1건).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub symbol: String,
    pub buy_date: NaiveDate,
    pub buy_price: f64,
    pub buy_cnt: i64,
    pub buy_factor: String,
    pub sell_date: Option<NaiveDate>,
    pub sell_price: Option<f64>,
    pub sell_type: SellType,
    pub sell_factor: Option<String>,
    /// 수수료 차감 후 손익. 미청산 주문은 `None`.
    pub profit: Option<f64>,
}

/// 체결 행동 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRow {
    pub date: NaiveDate,
    pub symbol: String,
    /// `buy` 또는 `sell`
    pub action: String,
    pub price: f64,
    pub cnt: i64,
    /// 현금 원장에서 실제 체결되었는지
    pub deal: bool,
}

/// 백테스트 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestOutcome {
    pub benchmark: String,
    pub orders: Vec<OrderRow>,
    pub actions: Vec<ActionRow>,
    /// 원장 종료 시점 현금
    pub final_cash: Decimal,
}

/// 백테스팅 엔진
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    /// 검증된 설정으로 엔진을 생성합니다.
    pub fn new(config: BacktestConfig) -> BacktestResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// 백테스트를 실행합니다. 일봉이 있는 종목이 하나도 없으면 `None`.
    pub fn run(&self, input: &BacktestInput) -> BacktestResult<Option<BacktestOutcome>> {
        let calendar: Option<BTreeSet<NaiveDate>> =
            KlineFrame::from_rows(&input.benchmark, &input.benchmark_klines)
                .map(|frame| frame.dates.into_iter().collect());

        let mut orders = Vec::new();
        let mut simulated = 0usize;
        for symbol in &input.symbols {
            let Some(rows) = input.klines.get(symbol) else {
                debug!(symbol = %symbol, "일봉 없음, 건너뜀");
                continue;
            };
            let Some(frame) = KlineFrame::from_rows(symbol, rows) else {
                continue;
            };
            let frame = match &calendar {
                Some(dates) => match frame.restrict_to(dates) {
                    Some(frame) => frame,
                    None => continue,
                },
                None => frame,
            };
            orders.extend(self.simulate_symbol(&frame)?);
            simulated += 1;
        }

        if simulated == 0 {
            return Ok(None);
        }

        orders.sort_by(|a, b| {
            a.buy_date
                .cmp(&b.buy_date)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        let (actions, final_cash) = self.settle(&orders)?;

        info!(
            benchmark = %input.benchmark,
            symbols = simulated,
            orders = orders.len(),
            actions = actions.len(),
            "백테스트 완료"
        );

        Ok(Some(BacktestOutcome {
            benchmark: input.benchmark.clone(),
            orders,
            actions,
            final_cash,
        }))
    }

    // ==================== 헬퍼 함수 ====================

    /// 한 종목의 주문을 생성합니다.
    fn simulate_symbol(&self, frame: &KlineFrame) -> BacktestResult<Vec<OrderRow>> {
        let n = frame.len();

        // 같은 날 여러 팩터가 신호를 내면 먼저 설정된 팩터를 기록
        let mut signals: Vec<(usize, String)> = Vec::new();
        let mut seen_days = HashSet::new();
        for factor in &self.config.buy_factors {
            for day in factor.signal_days(frame) {
                if seen_days.insert(day) {
                    signals.push((day, factor.name()));
                }
            }
        }
        signals.sort_by_key(|(day, _)| *day);

        let checks: Vec<(String, SellCheck)> = self
            .config
            .sell_factors
            .iter()
            .map(|f| (f.name(), f.prepare(frame)))
            .collect();

        let lot = lot_size(&frame.symbol);
        let mut orders = Vec::new();
        for (signal_day, buy_factor) in signals {
            let buy_idx = signal_day + 1;
            if buy_idx >= n {
                continue;
            }
            let buy_price = round_price(frame.mid_price(buy_idx));
            let buy_cnt = self.order_size(buy_price, lot)?;

            let mut order = OrderRow {
                symbol: frame.symbol.clone(),
                buy_date: frame.dates[buy_idx],
                buy_price,
                buy_cnt,
                buy_factor,
                sell_date: None,
                sell_price: None,
                sell_type: SellType::Keep,
                sell_factor: None,
                profit: None,
            };

            'days: for day in (buy_idx + 1)..n.saturating_sub(1) {
                for (name, check) in &checks {
                    if check.triggered(frame, day, buy_price) {
                        let sell_price = round_price(frame.mid_price(day + 1));
                        let profit = self.profit(buy_price, sell_price, buy_cnt)?;
                        order.sell_date = Some(frame.dates[day + 1]);
                        order.sell_price = Some(sell_price);
                        order.sell_factor = Some(name.clone());
                        order.sell_type = if profit > 0.0 {
                            SellType::Win
                        } else {
                            SellType::Loss
                        };
                        order.profit = Some(profit);
                        break 'days;
                    }
                }
            }
            orders.push(order);
        }

        debug!(symbol = %frame.symbol, orders = orders.len(), "종목 시뮬레이션 완료");
        Ok(orders)
    }

    /// 주문 수량: 초기 자본 × 포지션 비율 / 가격을 매매 단위로 내림, 최소 1단위.
    fn order_size(&self, price: f64, lot: i64) -> BacktestResult<i64> {
        let price = to_decimal(price)?;
        if price <= Decimal::ZERO {
            return Err(BacktestError::DataError(format!(
                "체결가가 0 이하입니다: {}",
                price
            )));
        }
        let lots = self
            .config
            .initial_cash
            .checked_mul(self.config.position_ratio)
            .and_then(|budget| budget.checked_div(price))
            .and_then(|shares| shares.checked_div(Decimal::from(lot)))
            .ok_or_else(|| overflow("주문 수량"))?
            .floor();
        let lots = lots.to_i64().ok_or_else(|| overflow("주문 수량"))?.max(1);
        lots.checked_mul(lot).ok_or_else(|| overflow("주문 수량"))
    }

    fn profit(&self, buy_price: f64, sell_price: f64, cnt: i64) -> BacktestResult<f64> {
        let cnt = Decimal::from(cnt);
        let buy = checked_amount(to_decimal(buy_price)?, cnt, Decimal::ONE)?;
        let sell = checked_amount(to_decimal(sell_price)?, cnt, Decimal::ONE)?;
        let profit = buy
            .checked_add(sell)
            .and_then(|turnover| turnover.checked_mul(self.config.commission_rate))
            .and_then(|fees| sell.checked_sub(buy)?.checked_sub(fees))
            .ok_or_else(|| overflow("손익"))?;
        Ok(profit.round_dp(4).to_f64().unwrap_or(0.0))
    }

    /// 주문을 날짜순 행동으로 펼치고 현금 원장으로 체결 여부를 결정합니다.
    ///
    /// 같은 날에는 매도가 매수보다 먼저 처리됩니다.
    fn settle(&self, orders: &[OrderRow]) -> BacktestResult<(Vec<ActionRow>, Decimal)> {
        // (date, 매도 우선, 주문 인덱스)
        let mut events: Vec<(NaiveDate, u8, usize)> = Vec::with_capacity(orders.len() * 2);
        for (i, order) in orders.iter().enumerate() {
            events.push((order.buy_date, 1, i));
            if let Some(date) = order.sell_date {
                events.push((date, 0, i));
            }
        }
        events.sort();

        let rate = self.config.commission_rate;
        let mut cash = self.config.initial_cash;
        let mut dealt = HashSet::new();
        let mut actions = Vec::with_capacity(events.len());
        for (date, kind, i) in events {
            let order = &orders[i];
            let cnt = Decimal::from(order.buy_cnt);
            if kind == 1 {
                let cost = checked_amount(to_decimal(order.buy_price)?, cnt, Decimal::ONE + rate)?;
                let deal = cost <= cash;
                if deal {
                    cash -= cost;
                    dealt.insert(i);
                }
                actions.push(ActionRow {
                    date,
                    symbol: order.symbol.clone(),
                    action: "buy".to_string(),
                    price: order.buy_price,
                    cnt: order.buy_cnt,
                    deal,
                });
            } else {
                let price = order.sell_price.unwrap_or(order.buy_price);
                let deal = dealt.contains(&i);
                if deal {
                    let proceeds = checked_amount(to_decimal(price)?, cnt, Decimal::ONE - rate)?;
                    cash = cash.checked_add(proceeds).ok_or_else(|| overflow("현금 잔고"))?;
                }
                actions.push(ActionRow {
                    date,
                    symbol: order.symbol.clone(),
                    action: "sell".to_string(),
                    price,
                    cnt: order.buy_cnt,
                    deal,
                });
            }
        }
        Ok((actions, cash))
    }
}

fn lot_size(symbol: &str) -> i64 {
    if market_from_symbol(symbol).is_cn() {
        100
    } else {
        1
    }
}

fn round_price(price: f64) -> f64 {
    (price * 10_000.0).round() / 10_000.0
}

/// `price × cnt × factor`, 범위를 넘으면 데이터 오류.
fn checked_amount(price: Decimal, cnt: Decimal, factor: Decimal) -> BacktestResult<Decimal> {
    price
        .checked_mul(cnt)
        .and_then(|v| v.checked_mul(factor))
        .ok_or_else(|| overflow("거래 금액"))
}

fn overflow(what: &str) -> BacktestError {
    BacktestError::DataError(format!("{} 계산이 Decimal 범위를 벗어났습니다", what))
}

fn to_decimal(value: f64) -> BacktestResult<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| BacktestError::DataError(format!("가격을 변환할 수 없습니다: {}", value)))
}
