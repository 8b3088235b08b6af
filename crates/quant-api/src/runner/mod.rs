//! 백그라운드 작업 실행기.
//!
//! # 구조
//!
//! ```text
//! submit ──▶ [bounded mpsc 큐] ──▶ worker × N ──▶ JobExecutor
//!   │                                  │
//!   └── queued 행 생성                 └── running → succeeded / failed
//! ```
//!
//! 작업 테이블은 저장소로만 사용하며 폴링하지 않습니다. 큐가 가득 차면 제출을 거절합니다.
//! 종료 토큰이 취소되면 워커는 진행 중인 작업을 마친 뒤 멈춥니다.

pub mod executor;
pub mod params;

pub use executor::{BenchmarkResolver, JobExecutor, MarketBenchmarkResolver};
pub use params::DataWindow;

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{record_job_finished, record_job_submitted};
use crate::repository::{Job, JobStatus, JobStore, JobStoreError, JobType};
use quant_core::config::JobsConfig;

/// 작업 제출 에러.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Job runner is shut down")]
    Closed,

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// 작업 제출 핸들. 복제해서 여러 핸들러가 공유합니다.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    queue: mpsc::Sender<i64>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("capacity", &self.queue.max_capacity())
            .field("available", &self.queue.capacity())
            .finish()
    }
}

impl JobRunner {
    /// 큐와 워커를 시작합니다.
    pub fn start(
        store: Arc<dyn JobStore>,
        executor: Arc<JobExecutor>,
        config: &JobsConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = config.workers.max(1);

        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                store: store.clone(),
                executor: executor.clone(),
                queue: rx.clone(),
                shutdown: shutdown.clone(),
            };
            tokio::spawn(worker.run());
        }

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            "작업 실행기 시작"
        );

        Self { store, queue: tx }
    }

    /// 작업을 제출합니다.
    ///
    /// 큐 자리를 먼저 확보한 뒤 `queued` 행을 만들므로, 거절된 제출은 행을 남기지 않습니다.
    pub async fn submit(&self, job_type: JobType, params: Value) -> Result<Job, SubmitError> {
        let permit = self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })?;

        let job = self.store.create(job_type, params).await?;
        permit.send(job.id);

        record_job_submitted(job_type.as_str());
        info!(job_id = job.id, job_type = %job_type, "작업 제출");
        Ok(job)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

// ==================== 워커 ====================

struct Worker {
    id: usize,
    store: Arc<dyn JobStore>,
    executor: Arc<JobExecutor>,
    queue: Arc<Mutex<mpsc::Receiver<i64>>>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "워커 시작");
        loop {
            let next = {
                let mut rx = self.queue.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => None,
                    id = rx.recv() => id,
                }
            };

            let Some(job_id) = next else {
                break;
            };
            self.process(job_id).await;
        }
        debug!(worker = self.id, "워커 종료");
    }

    /// 작업 하나를 실행하고 결과를 기록합니다. 어떤 오류도 워커 밖으로 나가지 않습니다.
    async fn process(&self, job_id: i64) {
        match self.store.mark_running(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(job_id, "queued 상태가 아닌 작업, 건너뜀");
                return;
            }
            Err(e) => {
                error!(job_id, error = %e, "작업 상태 변경 실패");
                self.fail_unstarted(job_id, &format!("Failed to start job: {}", e))
                    .await;
                return;
            }
        }

        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "실행할 작업을 찾을 수 없음");
                return;
            }
            Err(e) => {
                error!(job_id, error = %e, "작업 조회 실패");
                self.record_failure(job_id, &format!("Failed to load job: {}", e))
                    .await;
                return;
            }
        };

        let job_type = job.job_type;
        info!(job_id, job_type = %job_type, worker = self.id, "작업 실행 시작");
        let started = Instant::now();

        let executor = self.executor.clone();
        let params = job.params;
        let outcome =
            tokio::spawn(async move { executor.execute(job_type, &params).await }).await;

        let status = match outcome {
            Ok(Ok(result)) => match self.store.set_result(job_id, result).await {
                Ok(_) => {
                    info!(job_id, job_type = %job_type, "작업 성공");
                    JobStatus::Succeeded
                }
                Err(e) => {
                    error!(job_id, error = %e, "작업 결과 저장 실패");
                    self.record_failure(job_id, &format!("Failed to store result: {}", e))
                        .await;
                    JobStatus::Failed
                }
            },
            Ok(Err(e)) => {
                let message = format!("{:#}", e);
                warn!(job_id, job_type = %job_type, error = %message, "작업 실패");
                self.record_failure(job_id, &message).await;
                JobStatus::Failed
            }
            Err(e) if e.is_panic() => {
                let panic = e.into_panic();
                let message = format!("Job panicked: {}", panic_message(panic.as_ref()));
                error!(job_id, job_type = %job_type, error = %message, "작업 패닉");
                self.record_failure(job_id, &message).await;
                JobStatus::Failed
            }
            Err(e) => {
                let message = format!("Job task aborted: {}", e);
                error!(job_id, job_type = %job_type, error = %message, "작업 태스크 중단");
                self.record_failure(job_id, &message).await;
                JobStatus::Failed
            }
        };

        record_job_finished(
            job_type.as_str(),
            status.as_str(),
            started.elapsed().as_secs_f64(),
        );
    }

    /// 시작하지 못한 작업을 다시 점유한 뒤 failed로 기록합니다.
    ///
    /// failed는 running에서만 갈 수 있으므로 한 번 더 `mark_running`을 시도합니다.
    async fn fail_unstarted(&self, job_id: i64, message: &str) {
        match self.store.mark_running(job_id).await {
            Ok(true) => self.record_failure(job_id, message).await,
            Ok(false) => warn!(job_id, "queued 상태가 아닌 작업, 건너뜀"),
            Err(e) => error!(job_id, error = %e, "작업이 queued 상태로 남음"),
        }
    }

    async fn record_failure(&self, job_id: i64, message: &str) {
        if let Err(e) = self.store.set_error(job_id, message).await {
            error!(job_id, error = %e, "작업 오류 저장 실패");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 실행기 테스트용 시세 제공자.

    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate};
    use quant_data::{
        FetchAdapter, FetchRequest, KlineSource, MemoryKlineStore, MemorySymbolStore,
        ProviderChain, RawBar,
    };
    use std::sync::Arc;

    /// 요청과 무관하게 같은 일봉을 돌려주는 제공자.
    pub struct FixedSource {
        pub bars: Vec<RawBar>,
    }

    impl FixedSource {
        /// 2024-01-01부터 하루씩 종가가 1씩 오르는 일봉.
        pub fn rising(days: usize) -> Self {
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
            let bars = (0..days)
                .map(|i| {
                    let close = 10.0 + i as f64;
                    RawBar {
                        trade_date: Some(start + Duration::days(i as i64)),
                        open: Some(close - 0.5),
                        close: Some(close),
                        high: Some(close + 0.5),
                        low: Some(close - 1.0),
                        volume: Some(1_000),
                        p_change: None,
                    }
                })
                .collect();
            Self { bars }
        }
    }

    #[async_trait]
    impl KlineSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch_equity(&self, _req: &FetchRequest) -> quant_data::Result<Vec<RawBar>> {
            Ok(self.bars.clone())
        }
    }

    /// 메모리 저장소 위의 어댑터. `source`가 없으면 빈 제공자 체인.
    pub fn adapter_with(source: Option<FixedSource>) -> FetchAdapter {
        let chain = match source {
            Some(source) => ProviderChain::new(vec![Arc::new(source) as Arc<dyn KlineSource>]),
            None => ProviderChain::default(),
        };
        FetchAdapter::new(
            Arc::new(MemoryKlineStore::new()),
            Arc::new(MemorySymbolStore::new()),
            chain,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{adapter_with, FixedSource};
    use super::*;
    use crate::repository::{DeleteOutcome, JobStoreResult, MemoryJobStore};
    use serde_json::json;
    use std::time::Duration;

    fn config(workers: usize, queue_capacity: usize) -> JobsConfig {
        JobsConfig {
            workers,
            queue_capacity,
        }
    }

    async fn wait_terminal(store: &Arc<dyn JobStore>, id: i64) -> Job {
        for _ in 0..200 {
            if let Some(job) = store.get(id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_submit_runs_to_success() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let executor = Arc::new(JobExecutor::new(adapter_with(Some(FixedSource::rising(5)))));
        let runner = JobRunner::start(store.clone(), executor, &config(2, 8), CancellationToken::new());

        let job = runner.submit(JobType::Verify, json!({})).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let done = wait_terminal(&store, job.id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.result.unwrap()["providers"], json!(["fixed"]));
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let executor = Arc::new(JobExecutor::new(adapter_with(None)));
        let runner = JobRunner::start(store.clone(), executor, &config(1, 8), CancellationToken::new());

        let job = runner
            .submit(JobType::Analysis, json!({"tool": "unknown_tool"}))
            .await
            .unwrap();
        let done = wait_terminal(&store, job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("Unsupported analysis tool"));
        assert!(done.result.is_none());
    }

    /// 끝나지 않는 제공자. 워커를 붙잡아 두는 데 사용합니다.
    struct PendingSource;

    #[async_trait::async_trait]
    impl quant_data::KlineSource for PendingSource {
        fn name(&self) -> &str {
            "pending"
        }

        async fn fetch_equity(
            &self,
            _req: &quant_data::FetchRequest,
        ) -> quant_data::Result<Vec<quant_data::RawBar>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_queue_full_creates_no_row() {
        let adapter = quant_data::FetchAdapter::new(
            Arc::new(quant_data::MemoryKlineStore::new()),
            Arc::new(quant_data::MemorySymbolStore::new()),
            quant_data::ProviderChain::new(vec![Arc::new(PendingSource)]),
        );
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let executor = Arc::new(JobExecutor::new(adapter));
        let runner = JobRunner::start(store.clone(), executor, &config(1, 1), CancellationToken::new());

        let blocking = runner
            .submit(JobType::KlUpdate, json!({"market": "US", "symbols": "AAPL"}))
            .await
            .unwrap();
        for _ in 0..200 {
            let job = store.get(blocking.id).await.unwrap().unwrap();
            if job.status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // 워커가 바쁜 동안 큐 한 칸만 채울 수 있음
        runner.submit(JobType::Verify, json!({})).await.unwrap();
        let err = runner.submit(JobType::Verify, json!({})).await.unwrap_err();
        assert!(matches!(err, SubmitError::QueueFull));
        assert_eq!(store.list(10).await.unwrap().len(), 2);
    }

    /// 첫 `mark_running` 호출만 실패하는 저장소.
    struct FailingStartStore {
        inner: MemoryJobStore,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl JobStore for FailingStartStore {
        async fn create(&self, job_type: JobType, params: Value) -> JobStoreResult<Job> {
            self.inner.create(job_type, params).await
        }

        async fn get(&self, id: i64) -> JobStoreResult<Option<Job>> {
            self.inner.get(id).await
        }

        async fn list(&self, limit: i64) -> JobStoreResult<Vec<Job>> {
            self.inner.list(limit).await
        }

        async fn mark_running(&self, id: i64) -> JobStoreResult<bool> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(JobStoreError::InvalidRecord("connection reset".to_string()));
            }
            self.inner.mark_running(id).await
        }

        async fn set_result(&self, id: i64, result: Value) -> JobStoreResult<bool> {
            self.inner.set_result(id, result).await
        }

        async fn set_error(&self, id: i64, error: &str) -> JobStoreResult<bool> {
            self.inner.set_error(id, error).await
        }

        async fn delete(&self, id: i64) -> JobStoreResult<DeleteOutcome> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_start_failure_marks_job_failed() {
        let store: Arc<dyn JobStore> = Arc::new(FailingStartStore {
            inner: MemoryJobStore::new(),
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let executor = Arc::new(JobExecutor::new(adapter_with(Some(FixedSource::rising(5)))));
        let runner = JobRunner::start(store.clone(), executor, &config(1, 8), CancellationToken::new());

        let first = runner.submit(JobType::Verify, json!({})).await.unwrap();
        let done = wait_terminal(&store, first.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(
            done.error.as_deref(),
            Some("Failed to start job: Invalid job record: connection reset")
        );
        assert!(done.result.is_none());

        // 다음 작업은 정상 실행
        let second = runner.submit(JobType::Verify, json!({})).await.unwrap();
        let done = wait_terminal(&store, second.id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
