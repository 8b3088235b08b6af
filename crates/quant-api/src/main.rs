//! Quant Job API 서버.
//!
//! Axum 기반 REST API 서버와 작업 워커를 시작합니다.
//! 일봉 수집, 백테스트, 그리드 탐색, 분석 작업을 큐에 받아 비동기로 실행합니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{http::StatusCode, middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use quant_api::metrics::setup_metrics_recorder;
use quant_api::middleware::metrics_layer;
use quant_api::openapi::swagger_ui_router;
use quant_api::repository::{JobStore, MemoryJobStore, PgJobStore};
use quant_api::routes::create_api_router;
use quant_api::state::AppState;
use quant_core::logging::{init_logging, LogConfig};
use quant_core::AppConfig;
use quant_data::{
    run_migrations, FetchAdapter, KlineStore, MemoryKlineStore, MemorySymbolStore, PgKlineStore,
    PgSymbolStore, ProviderChain, SymbolStore,
};

/// 저장소 묶음.
struct Stores {
    klines: Arc<dyn KlineStore>,
    symbols: Arc<dyn SymbolStore>,
    jobs: Arc<dyn JobStore>,
    pool: Option<PgPool>,
}

impl Stores {
    fn memory() -> Self {
        Self {
            klines: Arc::new(MemoryKlineStore::new()),
            symbols: Arc::new(MemorySymbolStore::new()),
            jobs: Arc::new(MemoryJobStore::new()),
            pool: None,
        }
    }

    fn postgres(pool: PgPool) -> Self {
        Self {
            klines: Arc::new(PgKlineStore::new(pool.clone())),
            symbols: Arc::new(PgSymbolStore::new(pool.clone())),
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            pool: Some(pool),
        }
    }
}

/// DB 연결 설정 (DATABASE_URL 환경변수에서).
///
/// 연결에 실패하거나 미설정이면 메모리 저장소로 동작합니다.
async fn create_stores(config: &AppConfig) -> Stores {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        warn!("DATABASE_URL not set, using in-memory stores (data is lost on restart)");
        return Stores::memory();
    };

    let pool = match PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return Stores::memory();
        }
    };

    if let Err(e) = run_migrations(&pool).await {
        error!(error = %e, "마이그레이션 실패, 메모리 저장소로 전환");
        return Stores::memory();
    }

    info!("Connected to PostgreSQL successfully");
    Stores::postgres(pool)
}

/// CORS 레이어 생성.
///
/// CORS_ORIGINS 환경변수가 설정되어 있으면 해당 origin만 허용하고,
/// 없으면 설정 파일의 `server.cors_origins`를 사용합니다.
/// 둘 다 비어 있으면 모든 origin을 허용합니다.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let configured: Vec<String> = match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            origins.split(',').map(|s| s.trim().to_string()).collect()
        }
        _ => config.server.cors_origins.clone(),
    };

    let origins: Vec<_> = configured
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
        ])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        warn!("No valid CORS origins configured, allowing any origin (development mode)");
        cors.allow_origin(AllowOrigin::any())
    } else {
        info!("CORS configured with {} allowed origins", origins.len());
        // 자격 증명은 origin 목록이 있을 때만 허용
        cors.allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}

/// /metrics 엔드포인트 핸들러.
async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> String {
    handle.render()
}

/// 전체 라우터 생성.
fn create_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let config = state.config.clone();

    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    let api_router = create_api_router(&config.server.api_prefix).with_state(state);

    Router::new()
        .merge(metrics_router)
        .merge(api_router)
        .merge(swagger_ui_router())
        .layer(middleware::from_fn(metrics_layer))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.request_timeout_secs),
        ))
        .layer(cors_layer(&config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (있는 경우)
    let _ = dotenvy::dotenv();

    let config = AppConfig::load_default().context("설정 로드 실패")?;

    init_logging(LogConfig::from_app_config(&config.logging))
        .map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    info!("Starting Quant Job API server...");

    let metrics_handle = setup_metrics_recorder().context("메트릭 레코더 설정 실패")?;
    info!("Prometheus metrics recorder initialized");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            error!(
                host = %config.server.host,
                port = config.server.port,
                error = %e,
                "소켓 주소 설정이 유효하지 않습니다. QUANT__SERVER__HOST, QUANT__SERVER__PORT를 확인하세요."
            );
            e
        })?;

    let stores = create_stores(&config).await;
    let chain = ProviderChain::from_config(&config.providers);
    if chain.is_empty() {
        warn!("사용 가능한 시세 제공자가 없습니다. 캐시된 데이터만 사용합니다.");
    }
    info!(providers = ?chain.names(), "시세 제공자 체인 구성");

    let adapter = FetchAdapter::new(stores.klines, stores.symbols, chain);

    // 전역 종료 토큰 (워커 종료 전파용)
    let shutdown_token = CancellationToken::new();

    let mut state = AppState::start(config, adapter, stores.jobs, shutdown_token.clone());
    if let Some(pool) = stores.pool {
        state = state.with_db_pool(pool);
    }
    let state = Arc::new(state);

    info!(
        version = %state.version,
        has_db = state.db_pool.is_some(),
        workers = state.config.jobs.workers,
        queue_capacity = state.config.jobs.queue_capacity,
        "Application state initialized"
    );

    let app = create_router(state, metrics_handle);

    info!(%addr, "API server listening");
    info!("Swagger UI available at http://{}/swagger-ui", addr);
    info!("Metrics available at http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    // 워커에 종료 전파. 실행 중인 작업은 running 상태로 남습니다.
    shutdown_token.cancel();
    info!("Server stopped gracefully");

    Ok(())
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM 시그널을 수신하면 종료 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Ctrl+C 핸들러 설치 실패");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM 핸들러 설치 실패");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown_token.cancel();
    info!("Shutdown signal propagated to background tasks");
}
