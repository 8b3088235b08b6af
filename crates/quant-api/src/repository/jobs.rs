//! 비동기 작업 Repository.
//!
//! 작업 행은 제출 시 `queued`로 생성되고, 실행기만 상태를 옮깁니다.
//!
//! # 상태 전이
//!
//! ```text
//! queued ──mark_running──▶ running ──set_result──▶ succeeded
//!                                  └──set_error───▶ failed
//! ```
//!
//! 전이 함수는 조건부 UPDATE로 구현하여 잘못된 상태의 행은 건드리지 않고 `false`를 반환합니다.
//! 결과와 오류는 서로 배타적이며 한쪽을 기록하면 다른 쪽은 지워집니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use utoipa::ToSchema;

/// 목록 조회 최대 건수.
pub const MAX_LIST_LIMIT: i64 = 500;

// ==================== 작업 모델 ====================

/// 작업 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// 일봉 캐시 갱신
    KlUpdate,
    /// 단일 백테스트
    Backtest,
    /// 매개변수 그리드 탐색
    GridSearch,
    /// 분석 도구 실행
    Analysis,
    /// 실행 환경 확인
    Verify,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::KlUpdate,
        JobType::Backtest,
        JobType::GridSearch,
        JobType::Analysis,
        JobType::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::KlUpdate => "kl_update",
            JobType::Backtest => "backtest",
            JobType::GridSearch => "grid_search",
            JobType::Analysis => "analysis",
            JobType::Verify => "verify",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| JobStoreError::UnsupportedType(s.to_string()))
    }
}

/// 작업 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// 종료 상태 여부.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobStoreError::InvalidRecord(format!("unknown job status: {}", other))),
        }
    }
}

/// 작업 행.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub id: i64,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// 제출 매개변수 (JSON 객체)
    pub params: Value,
    /// 성공 결과
    pub result: Option<Value>,
    /// 실패 메시지
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// 내보낼 결과가 있는지 여부. `null`, 빈 객체, 빈 배열은 결과 없음으로 봅니다.
    pub fn has_result(&self) -> bool {
        match &self.result {
            None | Some(Value::Null) => false,
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        }
    }
}

/// 삭제 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// 실행 중인 작업은 삭제하지 않습니다.
    Running,
}

// ==================== 에러 ====================

/// 작업 저장소 에러.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid job record: {0}")]
    InvalidRecord(String),

    #[error("Unsupported job type: {0}")]
    UnsupportedType(String),
}

pub type JobStoreResult<T> = Result<T, JobStoreError>;

// ==================== 저장소 trait ====================

/// 작업 저장소.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// `queued` 상태의 새 작업을 생성합니다.
    async fn create(&self, job_type: JobType, params: Value) -> JobStoreResult<Job>;

    async fn get(&self, id: i64) -> JobStoreResult<Option<Job>>;

    /// 최신순 목록. `limit`은 `[1, MAX_LIST_LIMIT]`으로 제한합니다.
    async fn list(&self, limit: i64) -> JobStoreResult<Vec<Job>>;

    /// `queued` → `running`. 전이가 일어났으면 `true`.
    async fn mark_running(&self, id: i64) -> JobStoreResult<bool>;

    /// `running` → `succeeded`. 결과를 기록하고 오류를 지웁니다.
    async fn set_result(&self, id: i64, result: Value) -> JobStoreResult<bool>;

    /// `running` → `failed`. 오류를 기록하고 결과를 지웁니다.
    async fn set_error(&self, id: i64, error: &str) -> JobStoreResult<bool>;

    /// 실행 중이 아닌 작업을 삭제합니다.
    async fn delete(&self, id: i64) -> JobStoreResult<DeleteOutcome>;
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIST_LIMIT)
}

// ==================== PostgreSQL 구현 ====================

/// 작업 DB 레코드.
#[derive(Debug, Clone, FromRow)]
struct JobRecord {
    id: i64,
    #[sqlx(rename = "type")]
    job_type: String,
    status: String,
    params: Value,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRecord> for Job {
    type Error = JobStoreError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let job_type = record
            .job_type
            .parse()
            .map_err(|_| JobStoreError::InvalidRecord(format!("unknown job type: {}", record.job_type)))?;
        Ok(Self {
            id: record.id,
            job_type,
            status: record.status.parse()?,
            params: record.params,
            result: record.result,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, type, status, params, result, error, created_at, updated_at";

/// PostgreSQL 작업 저장소 (`quant_jobs` 테이블).
///
/// 모든 연산은 풀에서 연결을 빌려 단일 문장으로 실행합니다.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, params))]
    async fn create(&self, job_type: JobType, params: Value) -> JobStoreResult<Job> {
        let record: JobRecord = sqlx::query_as(&format!(
            "INSERT INTO quant_jobs (type, status, params) VALUES ($1, 'queued', $2) RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_type.as_str())
        .bind(&params)
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id = record.id, job_type = %job_type, "작업 생성");
        record.try_into()
    }

    async fn get(&self, id: i64) -> JobStoreResult<Option<Job>> {
        let record: Option<JobRecord> =
            sqlx::query_as(&format!("SELECT {} FROM quant_jobs WHERE id = $1", JOB_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        record.map(Job::try_from).transpose()
    }

    async fn list(&self, limit: i64) -> JobStoreResult<Vec<Job>> {
        let records: Vec<JobRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM quant_jobs ORDER BY created_at DESC, id DESC LIMIT $1",
            JOB_COLUMNS
        ))
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Job::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn mark_running(&self, id: i64) -> JobStoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE quant_jobs
            SET status = 'running', updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, result))]
    async fn set_result(&self, id: i64, result: Value) -> JobStoreResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE quant_jobs
            SET status = 'succeeded', result = $2, error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(&result)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn set_error(&self, id: i64, error: &str) -> JobStoreResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE quant_jobs
            SET status = 'failed', error = $2, result = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> JobStoreResult<DeleteOutcome> {
        let deleted = sqlx::query("DELETE FROM quant_jobs WHERE id = $1 AND status <> 'running'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if deleted.rows_affected() == 1 {
            return Ok(DeleteOutcome::Deleted);
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM quant_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match exists {
            Some(_) => DeleteOutcome::Running,
            None => DeleteOutcome::NotFound,
        })
    }
}

// ==================== 메모리 구현 ====================

#[derive(Debug, Default)]
struct MemoryJobs {
    next_id: i64,
    rows: BTreeMap<i64, Job>,
}

/// 메모리 작업 저장소. `DATABASE_URL`이 없을 때와 테스트에서 사용합니다.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: RwLock<MemoryJobs>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 조건이 맞을 때만 행을 갱신합니다.
    async fn transition(
        &self,
        id: i64,
        from: &[JobStatus],
        apply: impl FnOnce(&mut Job),
    ) -> JobStoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.rows.get_mut(&id) {
            Some(job) if from.contains(&job.status) => {
                apply(job);
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_type: JobType, params: Value) -> JobStoreResult<Job> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let now = Utc::now();
        let job = Job {
            id: inner.next_id,
            job_type,
            status: JobStatus::Queued,
            params,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: i64) -> JobStoreResult<Option<Job>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn list(&self, limit: i64) -> JobStoreResult<Vec<Job>> {
        let inner = self.inner.read().await;
        // id가 생성 순서와 같으므로 역순이 최신순
        Ok(inner
            .rows
            .values()
            .rev()
            .take(clamp_limit(limit) as usize)
            .cloned()
            .collect())
    }

    async fn mark_running(&self, id: i64) -> JobStoreResult<bool> {
        self.transition(id, &[JobStatus::Queued], |job| job.status = JobStatus::Running)
            .await
    }

    async fn set_result(&self, id: i64, result: Value) -> JobStoreResult<bool> {
        self.transition(id, &[JobStatus::Running], |job| {
            job.status = JobStatus::Succeeded;
            job.result = Some(result);
            job.error = None;
        })
        .await
    }

    async fn set_error(&self, id: i64, error: &str) -> JobStoreResult<bool> {
        self.transition(id, &[JobStatus::Running], |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.result = None;
        })
        .await
    }

    async fn delete(&self, id: i64) -> JobStoreResult<DeleteOutcome> {
        let mut inner = self.inner.write().await;
        match inner.rows.get(&id).map(|job| job.status) {
            None => Ok(DeleteOutcome::NotFound),
            Some(JobStatus::Running) => Ok(DeleteOutcome::Running),
            Some(_) => {
                inner.rows.remove(&id);
                Ok(DeleteOutcome::Deleted)
            }
        }
    }
}
