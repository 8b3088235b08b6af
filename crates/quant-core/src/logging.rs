//! tracing 기반 로깅 초기화.
//!
//! 출력 형식은 `pretty`(개발용), `json`(로그 집계용), `compact`(한 줄) 중 하나입니다.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 로그 레벨 필터 (예: "info", "quant_api=debug")
    pub level: String,
    pub format: LogFormat,
}

impl LogConfig {
    /// 애플리케이션 설정의 logging 섹션에서 생성합니다.
    ///
    /// `RUST_LOG`/`LOG_FORMAT` 환경 변수가 있으면 우선합니다.
    pub fn from_app_config(logging: &LoggingConfig) -> Self {
        Self::resolve(
            logging,
            std::env::var("RUST_LOG").ok(),
            std::env::var("LOG_FORMAT").ok(),
        )
    }

    fn resolve(logging: &LoggingConfig, level: Option<String>, format: Option<String>) -> Self {
        let format = format
            .and_then(|s| s.parse().ok())
            .or_else(|| logging.format.parse().ok())
            .unwrap_or_default();

        Self {
            level: level.unwrap_or_else(|| logging.level.clone()),
            format,
        }
    }
}

/// 주어진 설정으로 전역 subscriber를 설치합니다.
///
/// ```no_run
/// use quant_core::config::LoggingConfig;
/// use quant_core::logging::{init_logging, LogConfig};
///
/// init_logging(LogConfig::from_app_config(&LoggingConfig::default())).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level)?;

    // 선택된 형식의 레이어만 Some
    let (pretty, json, compact) = match config.format {
        LogFormat::Pretty => (Some(fmt::layer().pretty()), None, None),
        LogFormat::Json => (None, Some(fmt::layer().json()), None),
        LogFormat::Compact => (None, None, Some(fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .with(compact)
        .try_init()?;

    tracing::info!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}
