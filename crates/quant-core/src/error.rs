//! 퀀트 작업 서비스의 에러 타입.

use thiserror::Error;

/// 핵심 에러.
#[derive(Debug, Error)]
pub enum QuantError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 데이터 에러
    #[error("데이터 에러: {0}")]
    Data(String),

    /// 외부 데이터 제공자 에러
    #[error("제공자 에러: {0}")]
    Provider(String),

    /// 백테스트/분석 엔진 에러
    #[error("엔진 에러: {0}")]
    Engine(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 핵심 작업을 위한 Result 타입.
pub type QuantResult<T> = Result<T, QuantError>;

impl QuantError {
    /// 호출자 입력 문제로 발생한 에러인지 확인합니다.
    pub fn is_client_error(&self) -> bool {
        matches!(self, QuantError::InvalidInput(_) | QuantError::NotFound(_))
    }
}

impl From<serde_json::Error> for QuantError {
    fn from(err: serde_json::Error) -> Self {
        QuantError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for QuantError {
    fn from(err: config::ConfigError) -> Self {
        QuantError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(QuantError::InvalidInput("bad tool".to_string()).is_client_error());
        assert!(QuantError::NotFound("job 1".to_string()).is_client_error());
        assert!(!QuantError::Provider("timeout".to_string()).is_client_error());
    }
}
