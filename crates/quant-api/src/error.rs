//! API 응답 envelope과 에러 응답 타입.
//!
//! 성공 응답은 `{message, data}` envelope, 실패 응답은 [`ApiErrorResponse`]를 사용합니다.

use axum::http::{Method, StatusCode, Uri};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use utoipa::ToSchema;

/// 성공 응답 envelope.
///
/// ```json
/// { "message": "Job queued", "data": { "id": 1, "type": "kl_update", "status": "queued" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 결과 메시지 (기본 "success")
    pub message: String,
    /// 응답 데이터
    pub data: T,
}

impl<T> ApiResponse<T> {
    /// 기본 메시지("success")로 감쌉니다.
    pub fn ok(data: T) -> Self {
        Self::with_message("success", data)
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

/// 통합 API 에러 응답.
///
/// # 예시
///
/// ```json
/// {
///   "code": "NOT_FOUND",
///   "message": "Job not found",
///   "timestamp": 1738300800
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "INVALID_INPUT", "NOT_FOUND", "QUEUE_FULL")
    pub code: String,
    /// 사람이 읽을 수 있는 에러 메시지
    pub message: String,
    /// 추가 에러 상세 정보 (선택적)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// 에러 발생 타임스탬프 (Unix timestamp, 선택적)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// HTTP 메서드 (GET, POST 등)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 요청 경로
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ApiErrorResponse {
    /// 기본 에러 생성 (타임스탬프 포함).
    ///
    /// ```
    /// use quant_api::error::ApiErrorResponse;
    ///
    /// let error = ApiErrorResponse::new("NOT_FOUND", "Job not found");
    /// assert_eq!(error.code(), "NOT_FOUND");
    /// ```
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: Some(chrono::Utc::now().timestamp()),
            method: None,
            path: None,
        }
    }

    /// 상세 정보 포함 에러 생성.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            details: Some(details),
            ..Self::new(code, message)
        }
    }

    /// 타임스탬프 없는 간단한 에러.
    pub fn simple(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            ..Self::new(code, message)
        }
    }

    /// 요청 정보(메서드, 경로)를 추가합니다.
    #[must_use]
    pub fn with_request_info(mut self, method: &Method, uri: &Uri) -> Self {
        self.method = Some(method.to_string());
        self.path = Some(uri.path().to_string());
        self
    }

    /// 에러 코드 반환.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// 에러 메시지 반환.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiErrorResponse {}

// ==================== Result Type Alias ====================

/// 핸들러 에러 타입.
pub type ApiError = (StatusCode, Json<ApiErrorResponse>);

/// API 핸들러 Result 타입 별칭.
///
/// ```ignore
/// async fn get_job(
///     Path(id): Path<i64>,
///     State(state): State<Arc<AppState>>,
/// ) -> ApiResult<Json<ApiResponse<Job>>> {
///     let job = state.jobs.get(id).await.map_err(internal_error)?
///         .ok_or_else(|| not_found("Job not found"))?;
///     Ok(Json(ApiResponse::ok(job)))
/// }
/// ```
pub type ApiResult<T> = Result<T, ApiError>;

// ==================== 헬퍼 함수 ====================

/// 상태 코드와 에러 코드로 에러 응답을 만듭니다.
pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (status, Json(ApiErrorResponse::new(code, message)))
}

/// 400 잘못된 입력.
pub fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "INVALID_INPUT", message)
}

/// 404 리소스 없음.
pub fn not_found(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// 409 상태 충돌.
pub fn conflict(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::CONFLICT, "CONFLICT", message)
}

/// 500 내부 오류. 원인은 로그에만 남기고 응답에는 요약만 싣습니다.
pub fn internal_error(err: impl std::fmt::Display) -> ApiError {
    error!(error = %err, "요청 처리 중 내부 오류");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiErrorResponse::with_details(
            "INTERNAL_ERROR",
            "Internal Server Error",
            serde_json::json!({ "error": err.to_string() }),
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_response_new() {
        let error = ApiErrorResponse::new("TEST_ERROR", "Test message");
        assert_eq!(error.code, "TEST_ERROR");
        assert_eq!(error.message, "Test message");
        assert!(error.timestamp.is_some());
        assert!(error.details.is_none());
        assert!(error.method.is_none());
    }

    #[test]
    fn test_api_error_response_simple() {
        let error = ApiErrorResponse::simple("TEST_ERROR", "Test message");
        assert!(error.timestamp.is_none());

        let json = serde_json::to_string(&error).unwrap();
        assert!(!json.contains("timestamp"));
        assert!(!json.contains("details"));
        assert!(json.contains(r#""code":"TEST_ERROR""#));
    }

    #[test]
    fn test_with_request_info() {
        let uri: Uri = "/api/v1/jobs/7?format=csv".parse().unwrap();
        let error = ApiErrorResponse::simple("NOT_FOUND", "Job not found")
            .with_request_info(&Method::GET, &uri);
        assert_eq!(error.method.as_deref(), Some("GET"));
        assert_eq!(error.path.as_deref(), Some("/api/v1/jobs/7"));
        assert_eq!(error.to_string(), "[NOT_FOUND] Job not found");
    }

    #[test]
    fn test_helpers_status_codes() {
        assert_eq!(bad_request("x").0, StatusCode::BAD_REQUEST);
        assert_eq!(not_found("x").0, StatusCode::NOT_FOUND);
        assert_eq!(conflict("Job is running").1.message(), "Job is running");

        let (status, Json(body)) = internal_error("pool timed out");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.details, Some(serde_json::json!({"error": "pool timed out"})));
    }

    #[test]
    fn test_envelope_default_message() {
        let body = serde_json::to_value(ApiResponse::ok(serde_json::json!({"count": 3}))).unwrap();
        assert_eq!(body["message"], "success");
        assert_eq!(body["data"]["count"], 3);
    }
}
