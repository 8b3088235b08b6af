//! 데이터베이스 접근 Repository.
//!
//! 핸들러와 작업 실행기는 SQL을 직접 다루지 않고 이 모듈의 저장소 trait을 통해 접근합니다.
//! 일봉/종목 저장소는 `quant-data`에 있습니다.

pub mod jobs;

pub use jobs::{
    DeleteOutcome, Job, JobStatus, JobStore, JobStoreError, JobStoreResult, JobType,
    MemoryJobStore, PgJobStore,
};
