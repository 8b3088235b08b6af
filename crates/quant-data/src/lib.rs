//! 시세 데이터 관리.
//!
//! 이 crate는 다음을 제공합니다:
//! - 일봉(kline) 행 모델과 파생 필드 보정
//! - 일봉/종목 저장소 (PostgreSQL, 메모리)
//! - 외부 시세 제공자 체인 (Yahoo, Tencent, Eastmoney)
//! - 캐시 우선 조회를 담당하는 fetch 어댑터
//! - 내장 종목 목록 시딩

pub mod error;
pub mod fetch;
pub mod kline;
pub mod provider;
pub mod seed;
pub mod storage;

pub use error::{DataError, Result};
pub use fetch::FetchAdapter;
pub use kline::{backfill, KlineRow, RawBar};
pub use provider::{FetchRequest, KlineSource, ProviderChain};
pub use seed::{bundled_symbols, seed_symbols_if_empty};
pub use storage::memory::{MemoryKlineStore, MemorySymbolStore};
pub use storage::postgres::{run_migrations, PgKlineStore, PgSymbolStore};
pub use storage::{
    KlineStore, SymbolPage, SymbolQuery, SymbolRecord, SymbolStore, UpsertStats,
};
