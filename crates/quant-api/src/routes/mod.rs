//! API 라우트.
//!
//! # 라우트 구조
//!
//! - `/health` - 헬스 체크 (liveness)
//! - `/health/ready` - 상세 헬스 체크 (readiness)
//! - `{prefix}/quant` - 작업 제출, 기능 목록, 종목 조회
//! - `{prefix}/jobs` - 작업 조회/삭제/내보내기
//!
//! `prefix` 기본값은 `/api/v1`입니다.

pub mod health;
pub mod jobs;
pub mod quant;

pub use health::{health_router, ComponentHealth, ComponentStatus, HealthResponse, ServiceInfo};
pub use jobs::{jobs_router, CreateJobRequest, DeletedJob};
pub use quant::{
    quant_router, FeatureItem, FeaturesResponse, ImportSymbolsRequest, ImportSymbolsResponse,
    SymbolListResponse, SymbolView,
};

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

/// 전체 API 라우터 생성.
pub fn create_api_router(api_prefix: &str) -> Router<Arc<AppState>> {
    let prefix = api_prefix.trim_end_matches('/');
    Router::new()
        .nest("/health", health_router())
        .nest(&format!("{}/quant", prefix), quant_router())
        .nest(&format!("{}/jobs", prefix), jobs_router())
}

/// 상태를 주입한 라우터. 테스트와 바이너리에서 공통으로 사용합니다.
pub fn app_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.server.api_prefix.clone();
    create_api_router(&prefix).with_state(state)
}
