//! 퀀트 작업 제출 및 종목 조회 endpoint.
//!
//! # 엔드포인트
//!
//! - `POST /api/v1/quant/kl/update` - 일봉 캐시 갱신 작업
//! - `POST /api/v1/quant/backtest` - 백테스트 작업
//! - `POST /api/v1/quant/grid-search` - 그리드 탐색 작업
//! - `POST /api/v1/quant/tools` - 분석 도구 작업
//! - `GET /api/v1/quant/verify` - 실행 환경 확인 작업
//! - `GET /api/v1/quant/features` - 기능 목록
//! - `GET /api/v1/quant/symbols` - 종목 검색
//! - `GET /api/v1/quant/symbols/{symbol}` - 종목 조회
//! - `POST /api/v1/quant/symbols/import` - 내장 종목 목록 가져오기
//!
//! 작업 제출 endpoint는 모두 `queued` 작업을 202로 즉시 반환합니다.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use super::jobs::submit_job;
use crate::error::{bad_request, internal_error, not_found, ApiErrorResponse, ApiResponse, ApiResult};
use crate::repository::{Job, JobType};
use crate::state::AppState;
use quant_analytics::AnalysisTool;
use quant_core::{market_scope, normalize_symbol, Market, SymbolKind};
use quant_data::seed::import_symbols;
use quant_data::{SymbolQuery, SymbolRecord};

/// 종목 목록 페이지 크기 상한.
const MAX_PAGE_SIZE: u32 = 200;

// ==================== 요청/응답 타입 ====================

/// 종목 검색 쿼리.
#[derive(Debug, Deserialize, IntoParams)]
pub struct SymbolSearchQuery {
    /// 시장 (기본 CN)
    pub market: Option<String>,
    /// 종목 코드/이름 부분 일치
    pub q: Option<String>,
    /// `stock`, `index`, `all`
    pub kind: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// 단건 조회 쿼리.
#[derive(Debug, Deserialize, IntoParams)]
pub struct SymbolDetailQuery {
    /// 시장 (기본 CN)
    pub market: Option<String>,
}

/// 종목 가져오기 요청.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ImportSymbolsRequest {
    /// 시장 (기본 CN)
    pub market: Option<String>,
}

/// 종목 정보.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SymbolView {
    pub market: String,
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub industry: Option<String>,
    pub kind: SymbolKind,
}

impl From<SymbolRecord> for SymbolView {
    fn from(record: SymbolRecord) -> Self {
        let kind = record.kind();
        Self {
            market: record.market,
            symbol: record.symbol,
            name: record.name,
            exchange: record.exchange,
            industry: record.industry,
            kind,
        }
    }
}

/// 종목 검색 결과.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SymbolListResponse {
    pub items: Vec<SymbolView>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// 가져오기 결과.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportSymbolsResponse {
    pub market: String,
    pub count: usize,
}

/// 기능 항목.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeatureItem {
    pub name: String,
    pub job_type: JobType,
    pub api: String,
}

/// 기능 목록.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeaturesResponse {
    pub features: Vec<FeatureItem>,
    pub analysis_tools: Vec<String>,
    pub markets: Vec<String>,
    pub providers: Vec<String>,
}

// ==================== 작업 제출 Handler ====================

/// 일봉 캐시 갱신.
///
/// POST /api/v1/quant/kl/update
#[utoipa::path(
    post,
    path = "/api/v1/quant/kl/update",
    request_body(content = serde_json::Value, description = "market, symbols, all, start, end, n_folds"),
    responses(
        (status = 202, description = "작업 대기열 등록", body = Job),
        (status = 503, description = "작업 큐 가득 참", body = ApiErrorResponse)
    ),
    tag = "quant"
)]
pub async fn kl_update(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Job>>)> {
    submit_job(&state, JobType::KlUpdate, Value::Object(params)).await
}

/// 백테스트.
///
/// POST /api/v1/quant/backtest
#[utoipa::path(
    post,
    path = "/api/v1/quant/backtest",
    request_body(content = serde_json::Value, description = "market, symbols, start, end, n_folds, buy_xd, stop_loss_n, stop_win_n, cash, buy_factor, sell_factor"),
    responses(
        (status = 202, description = "작업 대기열 등록", body = Job),
        (status = 503, description = "작업 큐 가득 참", body = ApiErrorResponse)
    ),
    tag = "quant"
)]
pub async fn backtest(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Job>>)> {
    submit_job(&state, JobType::Backtest, Value::Object(params)).await
}

/// 그리드 탐색.
///
/// POST /api/v1/quant/grid-search
#[utoipa::path(
    post,
    path = "/api/v1/quant/grid-search",
    request_body(content = serde_json::Value, description = "market, symbols, buy_xd_list, stop_loss_n_list, stop_win_n_list, max_runs"),
    responses(
        (status = 202, description = "작업 대기열 등록", body = Job),
        (status = 503, description = "작업 큐 가득 참", body = ApiErrorResponse)
    ),
    tag = "quant"
)]
pub async fn grid_search(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Job>>)> {
    submit_job(&state, JobType::GridSearch, Value::Object(params)).await
}

/// 분석 도구.
///
/// POST /api/v1/quant/tools
#[utoipa::path(
    post,
    path = "/api/v1/quant/tools",
    request_body(content = serde_json::Value, description = "tool, market, symbols, limit, options"),
    responses(
        (status = 202, description = "작업 대기열 등록", body = Job),
        (status = 503, description = "작업 큐 가득 참", body = ApiErrorResponse)
    ),
    tag = "quant"
)]
pub async fn analysis_tools(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Job>>)> {
    submit_job(&state, JobType::Analysis, Value::Object(params)).await
}

/// 실행 환경 확인.
///
/// GET /api/v1/quant/verify
#[utoipa::path(
    get,
    path = "/api/v1/quant/verify",
    responses((status = 202, description = "작업 대기열 등록", body = Job)),
    tag = "quant"
)]
pub async fn verify(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Job>>)> {
    submit_job(&state, JobType::Verify, Value::Object(Map::new())).await
}

// ==================== 조회 Handler ====================

/// 기능 목록.
///
/// GET /api/v1/quant/features
#[utoipa::path(
    get,
    path = "/api/v1/quant/features",
    responses((status = 200, description = "기능 목록", body = FeaturesResponse)),
    tag = "quant"
)]
pub async fn features(State(state): State<Arc<AppState>>) -> Json<ApiResponse<FeaturesResponse>> {
    let prefix = state.config.server.api_prefix.trim_end_matches('/');
    let feature = |name: &str, job_type: JobType, api: &str| FeatureItem {
        name: name.to_string(),
        job_type,
        api: format!("{}{}", prefix, api),
    };

    Json(ApiResponse::ok(FeaturesResponse {
        features: vec![
            feature("kline_update", JobType::KlUpdate, "/quant/kl/update"),
            feature("backtest", JobType::Backtest, "/quant/backtest"),
            feature("grid_search", JobType::GridSearch, "/quant/grid-search"),
            feature("analysis", JobType::Analysis, "/quant/tools"),
            feature("verify", JobType::Verify, "/quant/verify"),
        ],
        analysis_tools: AnalysisTool::ALL
            .iter()
            .map(|t| t.as_str().to_string())
            .collect(),
        markets: [
            Market::Cn,
            Market::Sh,
            Market::Sz,
            Market::Chinext,
            Market::Hk,
            Market::Us,
        ]
        .iter()
        .map(|m| m.code().to_string())
        .collect(),
        providers: state.adapter.chain().names(),
    }))
}

/// 종목 검색.
///
/// GET /api/v1/quant/symbols?market=CN&q=招商&kind=stock&page=1&page_size=50
#[utoipa::path(
    get,
    path = "/api/v1/quant/symbols",
    params(SymbolSearchQuery),
    responses(
        (status = 200, description = "종목 목록", body = SymbolListResponse),
        (status = 400, description = "잘못된 kind", body = ApiErrorResponse)
    ),
    tag = "quant"
)]
pub async fn list_symbols(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolSearchQuery>,
) -> ApiResult<Json<ApiResponse<SymbolListResponse>>> {
    let kind = parse_kind(query.kind.as_deref())?;
    let market = query.market.as_deref().unwrap_or("CN");
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);

    let result = state
        .adapter
        .symbol_store()
        .search(&SymbolQuery {
            markets: market_scope(market),
            q: query.q.clone(),
            kind,
            page,
            page_size,
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(ApiResponse::ok(SymbolListResponse {
        items: result.items.into_iter().map(SymbolView::from).collect(),
        total: result.total,
        page,
        page_size,
    })))
}

/// 종목 단건 조회.
///
/// GET /api/v1/quant/symbols/{symbol}?market=CN
#[utoipa::path(
    get,
    path = "/api/v1/quant/symbols/{symbol}",
    params(("symbol" = String, Path, description = "종목 코드"), SymbolDetailQuery),
    responses(
        (status = 200, description = "종목 정보", body = SymbolView),
        (status = 404, description = "종목 없음", body = ApiErrorResponse)
    ),
    tag = "quant"
)]
pub async fn get_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<SymbolDetailQuery>,
) -> ApiResult<Json<ApiResponse<SymbolView>>> {
    let market = query.market.as_deref().unwrap_or("CN");
    let normalized =
        normalize_symbol(&symbol, market).ok_or_else(|| not_found("Symbol not found"))?;

    let store = state.adapter.symbol_store();
    for scope_market in market_scope(market) {
        if let Some(record) = store
            .get(Some(&scope_market), &normalized)
            .await
            .map_err(internal_error)?
        {
            return Ok(Json(ApiResponse::ok(record.into())));
        }
    }
    Err(not_found("Symbol not found"))
}

/// 내장 종목 목록 가져오기.
///
/// POST /api/v1/quant/symbols/import
#[utoipa::path(
    post,
    path = "/api/v1/quant/symbols/import",
    request_body = ImportSymbolsRequest,
    responses(
        (status = 200, description = "가져온 종목 수", body = ImportSymbolsResponse),
        (status = 400, description = "지원하지 않는 시장", body = ApiErrorResponse)
    ),
    tag = "quant"
)]
pub async fn import_symbol_list(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportSymbolsRequest>,
) -> ApiResult<Json<ApiResponse<ImportSymbolsResponse>>> {
    let market = request
        .market
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("CN")
        .to_uppercase();

    if Market::parse(&market).is_none() {
        return Err(bad_request(format!("Unsupported market: {}", market)));
    }

    let count = import_symbols(state.adapter.symbol_store().as_ref(), &market)
        .await
        .map_err(|e| {
            warn!(market = %market, error = %e, "종목 목록 가져오기 실패");
            internal_error(e)
        })?;
    info!(market = %market, count, "종목 목록 가져오기");

    Ok(Json(ApiResponse::with_message(
        "Symbols imported",
        ImportSymbolsResponse { market, count },
    )))
}

// ==================== 헬퍼 함수 ====================

fn parse_kind(raw: Option<&str>) -> ApiResult<Option<SymbolKind>> {
    match raw.map(|k| k.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("all") => Ok(None),
        Some("stock") => Ok(Some(SymbolKind::Stock)),
        Some("index") => Ok(Some(SymbolKind::Index)),
        Some(_) => Err(bad_request("Invalid kind")),
    }
}

/// 퀀트 라우터 생성.
pub fn quant_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/kl/update", post(kl_update))
        .route("/backtest", post(backtest))
        .route("/grid-search", post(grid_search))
        .route("/tools", post(analysis_tools))
        .route("/verify", get(verify))
        .route("/features", get(features))
        .route("/symbols", get(list_symbols))
        .route("/symbols/import", post(import_symbol_list))
        .route("/symbols/{symbol}", get(get_symbol))
}
