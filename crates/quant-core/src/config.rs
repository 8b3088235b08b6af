//! 설정 관리.
//!
//! 기본값 → 설정 파일(선택) → `QUANT__SECTION__KEY` 환경 변수 순서로 덮어씁니다.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QuantError, QuantResult};

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 서버 설정
    pub server: ServerConfig,
    /// 데이터베이스 설정
    pub database: DatabaseConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
    /// 작업 실행기 설정
    pub jobs: JobsConfig,
    /// 시세 제공자 설정
    pub providers: ProvidersConfig,
}

/// 서버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 서비스 이름 (health 응답에 사용)
    pub app_name: String,
    /// 바인딩할 호스트
    pub host: String,
    /// 리스닝할 포트
    pub port: u16,
    /// API 경로 접두사
    pub api_prefix: String,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 허용할 CORS origin 목록
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: "Quant Job API".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            api_prefix: "/api/v1".to_string(),
            request_timeout_secs: 30,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

/// 데이터베이스 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 최대 연결 수
    pub max_connections: u32,
    /// 연결 획득 타임아웃 (초)
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 10,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 작업 실행기 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    /// 동시에 실행할 워커 수
    pub workers: usize,
    /// 대기열 용량 (가득 차면 제출 거부)
    pub queue_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

/// 시세 제공자 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// 1순위 제공자 이름
    pub primary: String,
    /// 순서대로 시도할 대체 제공자
    pub fallbacks: Vec<String>,
    /// 중국 시장 전용 최후 제공자
    pub secondary: Option<String>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// Tencent 시세 API 기본 URL
    pub tencent_base_url: String,
    /// Eastmoney 시세 API 기본 URL
    pub eastmoney_base_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: "yahoo".to_string(),
            fallbacks: vec!["tencent".to_string()],
            secondary: Some("eastmoney".to_string()),
            timeout_secs: 15,
            tencent_base_url: "https://web.ifzq.gtimg.cn".to_string(),
            eastmoney_base_url: "https://push2his.eastmoney.com".to_string(),
        }
    }
}

impl ProvidersConfig {
    /// 시도 순서대로 정렬된 제공자 이름 (중복 제거).
    pub fn ranked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let candidates = std::iter::once(&self.primary)
            .chain(self.fallbacks.iter())
            .chain(self.secondary.iter());
        for name in candidates {
            let name = name.trim().to_lowercase();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> QuantResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("QUANT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("providers.fallbacks")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> QuantResult<Self> {
        Self::load("config/default.toml")
    }

    /// 설정 값의 유효성을 검사합니다.
    pub fn validate(&self) -> QuantResult<()> {
        if self.jobs.workers == 0 {
            return Err(QuantError::Config("jobs.workers must be at least 1".to_string()));
        }
        if self.jobs.queue_capacity == 0 {
            return Err(QuantError::Config(
                "jobs.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.providers.ranked_names().is_empty() {
            return Err(QuantError::Config("no market data provider configured".to_string()));
        }
        if !self.server.api_prefix.starts_with('/') {
            return Err(QuantError::Config(format!(
                "server.api_prefix must start with '/': {}",
                self.server.api_prefix
            )));
        }
        Ok(())
    }
}
