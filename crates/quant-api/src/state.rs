//! 애플리케이션 상태 관리.
//!
//! 모든 핸들러가 공유하는 상태를 정의합니다.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::repository::JobStore;
use crate::runner::{JobExecutor, JobRunner};
use quant_core::AppConfig;
use quant_data::FetchAdapter;

/// 애플리케이션 공유 상태.
///
/// `Arc<AppState>`로 래핑하여 핸들러 간에 공유합니다.
pub struct AppState {
    /// 설정
    pub config: Arc<AppConfig>,

    /// PostgreSQL 연결 풀 (미설정 시 메모리 저장소 사용)
    pub db_pool: Option<PgPool>,

    /// 캐시 우선 일봉 조회 어댑터
    pub adapter: FetchAdapter,

    /// 작업 저장소
    pub jobs: Arc<dyn JobStore>,

    /// 작업 제출 핸들
    pub runner: JobRunner,

    /// 서버 시작 시간
    pub started_at: DateTime<Utc>,

    /// API 버전
    pub version: String,
}

impl AppState {
    /// 작업 실행기를 시작하고 상태를 생성합니다.
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn start(
        config: AppConfig,
        adapter: FetchAdapter,
        jobs: Arc<dyn JobStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let executor = Arc::new(JobExecutor::new(adapter.clone()));
        Self::start_with_executor(config, adapter, jobs, executor, shutdown)
    }

    /// 실행기를 직접 지정하여 상태를 생성합니다.
    pub fn start_with_executor(
        config: AppConfig,
        adapter: FetchAdapter,
        jobs: Arc<dyn JobStore>,
        executor: Arc<JobExecutor>,
        shutdown: CancellationToken,
    ) -> Self {
        let runner = JobRunner::start(jobs.clone(), executor, &config.jobs, shutdown);
        Self {
            config: Arc::new(config),
            db_pool: None,
            adapter,
            jobs,
            runner,
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// DB 연결 풀 설정.
    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    /// 서버 업타임 (초).
    pub fn uptime_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
    }

    /// 데이터베이스 연결 상태 확인.
    pub async fn is_db_healthy(&self) -> bool {
        if let Some(pool) = &self.db_pool {
            sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
        } else {
            false
        }
    }
}

/// 테스트용 상태. 메모리 저장소와 빈 제공자 체인을 사용합니다.
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_state() -> AppState {
    use crate::repository::MemoryJobStore;
    use quant_data::{MemoryKlineStore, MemorySymbolStore, ProviderChain};

    let adapter = FetchAdapter::new(
        Arc::new(MemoryKlineStore::new()),
        Arc::new(MemorySymbolStore::new()),
        ProviderChain::default(),
    );
    AppState::start(
        AppConfig::default(),
        adapter,
        Arc::new(MemoryJobStore::new()),
        CancellationToken::new(),
    )
}
