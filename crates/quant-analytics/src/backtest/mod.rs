//! 백테스팅 모듈.
//!
//! 종목별 일봉을 벤치마크 달력에 맞춰 돌파 매수 / ATR-N 손절·익절로 시뮬레이션합니다.

pub mod engine;
pub mod factors;

pub use engine::{
    ActionRow, BacktestConfig, BacktestEngine, BacktestError, BacktestInput, BacktestOutcome,
    BacktestResult, OrderRow, SellType,
};
pub use factors::{BuyFactor, MacdParams, SellFactor};
