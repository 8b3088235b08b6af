//! 작업 조회/제출/삭제/내보내기 endpoint.
//!
//! # 엔드포인트
//!
//! - `GET /api/v1/jobs` - 최신순 목록
//! - `POST /api/v1/jobs` - 임의 종류 작업 제출
//! - `GET /api/v1/jobs/{id}` - 단건 조회 (폴링용)
//! - `DELETE /api/v1/jobs/{id}` - 삭제 (실행 중이면 409)
//! - `GET /api/v1/jobs/{id}/export` - 결과 내려받기

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::{
    api_error, bad_request, conflict, internal_error, not_found, ApiErrorResponse, ApiResponse,
    ApiResult,
};
use crate::export::export_job;
use crate::repository::{DeleteOutcome, Job, JobType};
use crate::runner::SubmitError;
use crate::state::AppState;

// ==================== 요청/응답 타입 ====================

/// 목록 조회 쿼리.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListJobsQuery {
    /// 최대 건수 (기본 50, 최대 500)
    pub limit: Option<i64>,
}

/// 작업 제출 요청.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    /// 작업 종류 (`kl_update`, `backtest`, `grid_search`, `analysis`, `verify`)
    #[serde(rename = "type")]
    pub job_type: String,
    /// 작업 매개변수
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Map<String, Value>,
}

/// 내보내기 쿼리.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ExportQuery {
    /// `json` (기본) 또는 `csv`
    pub format: Option<String>,
    /// 결과 객체의 하위 키
    pub section: Option<String>,
}

/// 삭제 응답.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeletedJob {
    pub id: i64,
}

// ==================== 공통 ====================

/// 작업을 제출하고 202 응답을 만듭니다.
pub(crate) async fn submit_job(
    state: &AppState,
    job_type: JobType,
    params: Value,
) -> ApiResult<(StatusCode, Json<ApiResponse<Job>>)> {
    match state.runner.submit(job_type, params).await {
        Ok(job) => Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse::with_message("Job queued", job)),
        )),
        Err(SubmitError::QueueFull) => {
            warn!(job_type = %job_type, "작업 큐 가득 참, 제출 거절");
            Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_FULL",
                "Job queue is full, try again later",
            ))
        }
        Err(SubmitError::Closed) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SHUTTING_DOWN",
            "Job runner is shut down",
        )),
        Err(SubmitError::Store(e)) => Err(internal_error(e)),
    }
}

// ==================== Handler ====================

/// 작업 목록 조회.
///
/// GET /api/v1/jobs
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    params(ListJobsQuery),
    responses((status = 200, description = "최신순 작업 목록", body = [Job])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Job>>>> {
    let jobs = state
        .jobs
        .list(query.limit.unwrap_or(50))
        .await
        .map_err(internal_error)?;
    Ok(Json(ApiResponse::ok(jobs)))
}

/// 작업 제출.
///
/// POST /api/v1/jobs
///
/// 알 수 없는 종류는 행을 만들기 전에 400으로 거절합니다.
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "작업 대기열 등록", body = Job),
        (status = 400, description = "지원하지 않는 작업 종류", body = ApiErrorResponse),
        (status = 503, description = "작업 큐 가득 참", body = ApiErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Job>>)> {
    let job_type: JobType = request
        .job_type
        .parse()
        .map_err(|_| bad_request("Unsupported job type"))?;
    submit_job(&state, job_type, Value::Object(request.params)).await
}

/// 작업 단건 조회.
///
/// GET /api/v1/jobs/{id}
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(("id" = i64, Path, description = "작업 ID")),
    responses(
        (status = 200, description = "작업", body = Job),
        (status = 404, description = "작업 없음", body = ApiErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<Job>>> {
    let job = state
        .jobs
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Job not found"))?;
    Ok(Json(ApiResponse::ok(job)))
}

/// 작업 삭제.
///
/// DELETE /api/v1/jobs/{id}
#[utoipa::path(
    delete,
    path = "/api/v1/jobs/{id}",
    params(("id" = i64, Path, description = "작업 ID")),
    responses(
        (status = 200, description = "삭제됨", body = DeletedJob),
        (status = 404, description = "작업 없음", body = ApiErrorResponse),
        (status = 409, description = "실행 중인 작업", body = ApiErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<DeletedJob>>> {
    match state.jobs.delete(id).await.map_err(internal_error)? {
        DeleteOutcome::Deleted => {
            info!(job_id = id, "작업 삭제");
            Ok(Json(ApiResponse::with_message("Job deleted", DeletedJob { id })))
        }
        DeleteOutcome::NotFound => Err(not_found("Job not found")),
        DeleteOutcome::Running => Err(conflict("Job is running")),
    }
}

/// 작업 결과 내보내기.
///
/// GET /api/v1/jobs/{id}/export?format=csv&section=orders
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/export",
    params(("id" = i64, Path, description = "작업 ID"), ExportQuery),
    responses(
        (status = 200, description = "첨부 파일 (JSON 또는 CSV)"),
        (status = 400, description = "지원하지 않는 형식", body = ApiErrorResponse),
        (status = 404, description = "작업 없음", body = ApiErrorResponse),
        (status = 409, description = "결과 없음", body = ApiErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn export_job_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let job = state
        .jobs
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Job not found"))?;
    export_job(
        &job,
        query.format.as_deref().unwrap_or("json"),
        query.section.as_deref(),
    )
}

/// 작업 라우터 생성.
pub fn jobs_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/{id}", get(get_job).delete(delete_job))
        .route("/{id}/export", get(export_job_result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_test_state;
    use axum::{body::Body, http::Request};
    use serde_json::json;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/jobs", jobs_router()).with_state(state)
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_type_rejected_before_row() {
        let state = Arc::new(create_test_state());
        let response = app(state.clone())
            .oneshot(post_json("/jobs", json!({"type": "train_model", "params": {}})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Unsupported job type");
        assert!(state.jobs.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_job_returns_queued_row() {
        let state = Arc::new(create_test_state());
        let response = app(state)
            .oneshot(post_json("/jobs", json!({"type": "verify"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Job queued");
        assert_eq!(json["data"]["type"], "verify");
        assert_eq!(json["data"]["params"], json!({}));
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let state = Arc::new(create_test_state());
        let response = app(state)
            .oneshot(Request::builder().uri("/jobs/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Job not found");
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let state = Arc::new(create_test_state());
        let running = state.jobs.create(JobType::Backtest, json!({})).await.unwrap();
        state.jobs.mark_running(running.id).await.unwrap();
        let finished = state.jobs.create(JobType::Verify, json!({})).await.unwrap();

        let delete = |id: i64| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/jobs/{}", id))
                .body(Body::empty())
                .unwrap()
        };

        let response = app(state.clone()).oneshot(delete(running.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["message"], "Job is running");

        let response = app(state.clone()).oneshot(delete(finished.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Job deleted");
        assert_eq!(json["data"]["id"], finished.id);

        let response = app(state).oneshot(delete(finished.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_export_without_result_conflicts() {
        let state = Arc::new(create_test_state());
        let job = state.jobs.create(JobType::Backtest, json!({})).await.unwrap();
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}/export?format=csv", job.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
