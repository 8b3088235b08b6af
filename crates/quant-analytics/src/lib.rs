//! 백테스트 및 시세 분석.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 돌파 매수 / ATR-N 손절·익절 백테스트 엔진 (MACD 교차 팩터 선택)
//! - 매개변수 그리드 탐색과 결과 순위
//! - 추세선, 갭, 속도, 상관/거리, 요일별 통계 등 분석 도구
//! - 출력 길이 제한을 위한 균등 간격 샘플링
//!
//! # Re-exports
//!
//! - [`backtest`]: 백테스트 엔진 (BacktestEngine, BacktestConfig 등)
//! - [`grid`]: 그리드 탐색 (GridSpec, GridRun 등)
//! - [`tools`]: 분석 도구 디스패치 (AnalysisTool, AnalysisRequest 등)

pub mod backtest;
pub mod error;
pub mod frame;
pub mod grid;
pub mod indicators;
pub mod sampling;
pub mod tools;

pub use backtest::{
    ActionRow, BacktestConfig, BacktestEngine, BacktestError, BacktestInput, BacktestOutcome,
    BacktestResult, BuyFactor, MacdParams, OrderRow, SellFactor, SellType,
};
pub use error::{AnalysisError, AnalysisResult};
pub use frame::KlineFrame;
pub use grid::{rank_runs, run_grid, GridPoint, GridRun, GridSpec};
pub use sampling::{series_points, stride_sample, Matrix, SeriesPoint, DEFAULT_SAMPLE_LIMIT};
pub use tools::{run_analysis, AnalysisRequest, AnalysisTool, KlineLoader};
