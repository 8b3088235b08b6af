//! 분석 도구 에러 타입.
//!
//! 메시지는 작업 레코드의 `error` 필드에 그대로 기록됩니다.

use thiserror::Error;

/// 분석 도구 에러.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// 알 수 없는 도구 이름
    #[error("Unsupported analysis tool")]
    UnsupportedTool(String),

    /// 종목 데이터 없음
    #[error("No data for {0}")]
    NoData(String),

    /// 상관/거리 도구에 필요한 종목 수 부족
    #[error("Correlation tools require at least two symbols")]
    NotEnoughSymbols,

    /// 속도 비교용 데이터 누락
    #[error("Missing kline data for speed comparison")]
    MissingSpeedData,

    /// 요청한 종목 모두 데이터 없음
    #[error("No data for requested symbols")]
    NoDataForSymbols,

    /// 지원하지 않는 옵션 값
    #[error("Invalid option {name}: {value}")]
    InvalidOption { name: String, value: String },

    /// 요청 종목 없음
    #[error("No symbols specified for analysis")]
    NoSymbols,
}

/// 분석 결과 타입.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
