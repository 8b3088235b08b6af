//! 퀀트 작업 REST API 서버.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - Axum 기반 REST API
//! - 고정 크기 큐와 워커 풀로 구성된 작업 실행기
//! - JSON/CSV 결과 내보내기
//! - 헬스 체크 엔드포인트
//! - Prometheus 메트릭
//!
//! # 모듈 구성
//!
//! - [`state`]: 애플리케이션 공유 상태 (AppState)
//! - [`routes`]: REST API 엔드포인트
//! - [`repository`]: 작업 저장소 (PostgreSQL / 메모리)
//! - [`runner`]: 작업 큐와 워커
//! - [`export`]: 작업 결과 내보내기
//! - [`metrics`]: Prometheus 메트릭 수집
//! - [`middleware`]: HTTP 미들웨어
//! - [`openapi`]: OpenAPI 문서 및 Swagger UI

pub mod error;
pub mod export;
pub mod metrics;
pub mod middleware;
pub mod openapi;
pub mod repository;
pub mod routes;
pub mod runner;
pub mod state;

pub use error::{ApiErrorResponse, ApiResponse, ApiResult};
pub use metrics::setup_metrics_recorder;
pub use middleware::metrics_layer;
pub use openapi::swagger_ui_router;
pub use repository::{Job, JobStatus, JobStore, JobType, MemoryJobStore, PgJobStore};
pub use routes::{app_router, create_api_router};
pub use runner::{JobExecutor, JobRunner, SubmitError};
pub use state::AppState;

#[cfg(any(test, feature = "test-utils"))]
pub use state::create_test_state;
