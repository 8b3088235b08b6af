//! OpenAPI 문서화 설정.
//!
//! utoipa로 REST API의 OpenAPI 3.0 스펙을 생성합니다.
//! Swagger UI는 `/swagger-ui` 경로에서 사용 가능합니다.
//!
//! 새 엔드포인트를 추가할 때:
//!
//! 1. 응답/요청 타입에 `#[derive(ToSchema)]` 추가
//! 2. 핸들러에 `#[utoipa::path(...)]` 어노테이션 추가
//! 3. 이 파일의 `components(schemas(...))` 및 `paths(...)` 섹션에 추가

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ApiErrorResponse;
use crate::repository::{Job, JobStatus, JobType};
use crate::routes::{
    ComponentHealth, ComponentStatus, CreateJobRequest, DeletedJob, FeatureItem,
    FeaturesResponse, HealthResponse, ImportSymbolsRequest, ImportSymbolsResponse, ServiceInfo,
    SymbolListResponse, SymbolView,
};
use quant_core::{Market, SymbolKind};

/// Quant Job API 문서.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Quant Job API",
        version = "0.1.0",
        description = r#"
# Quant Job API

일봉 수집, 백테스트, 그리드 탐색, 시세 분석을 비동기 작업으로 실행하는 REST API입니다.

## 작업 흐름

1. `POST /api/v1/quant/...`로 작업 제출 (202, `queued`)
2. `GET /api/v1/jobs/{id}`로 상태 폴링 (`running` → `succeeded` / `failed`)
3. `GET /api/v1/jobs/{id}/export?format=csv`로 결과 내려받기
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    tags(
        (name = "health", description = "서버 상태 확인"),
        (name = "quant", description = "작업 제출, 기능 목록, 종목 조회"),
        (name = "jobs", description = "작업 조회, 삭제, 결과 내보내기"),
    ),
    components(schemas(
        ApiErrorResponse,
        Job,
        JobType,
        JobStatus,
        Market,
        SymbolKind,
        CreateJobRequest,
        DeletedJob,
        ServiceInfo,
        HealthResponse,
        ComponentHealth,
        ComponentStatus,
        FeatureItem,
        FeaturesResponse,
        ImportSymbolsRequest,
        ImportSymbolsResponse,
        SymbolListResponse,
        SymbolView,
    )),
    paths(
        crate::routes::health::health_check,
        crate::routes::health::health_ready,
        crate::routes::quant::kl_update,
        crate::routes::quant::backtest,
        crate::routes::quant::grid_search,
        crate::routes::quant::analysis_tools,
        crate::routes::quant::verify,
        crate::routes::quant::features,
        crate::routes::quant::list_symbols,
        crate::routes::quant::get_symbol,
        crate::routes::quant::import_symbol_list,
        crate::routes::jobs::list_jobs,
        crate::routes::jobs::create_job,
        crate::routes::jobs::get_job,
        crate::routes::jobs::delete_job,
        crate::routes::jobs::export_job_result,
    )
)]
pub struct ApiDoc;

/// Swagger UI 라우터 생성.
pub fn swagger_ui_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().expect("OpenAPI JSON 생성 실패");
        assert!(json.contains("Quant Job API"));
        assert!(json.contains("/api/v1/jobs/{id}/export"));
        assert!(json.contains("/api/v1/quant/grid-search"));
    }

    #[test]
    fn test_schemas_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components 누락");
        assert!(components.schemas.contains_key("Job"));
        assert!(components.schemas.contains_key("ApiErrorResponse"));
        assert!(components.schemas.contains_key("SymbolView"));
    }
}
