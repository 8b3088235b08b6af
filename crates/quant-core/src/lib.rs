//! 퀀트 작업 서비스의 핵심 타입.
//!
//! 이 crate는 다음을 제공합니다:
//! - 종목 코드 정규화와 시장 테이블
//! - 거래일/조회 구간 계산
//! - 공통 에러 타입
//! - 설정 로딩과 로깅 초기화

pub mod config;
pub mod dates;
pub mod error;
pub mod logging;
pub mod symbol;

pub use config::AppConfig;
pub use dates::{parse_date_str, parse_trade_date, resolve_date_range, resolve_date_range_at};
pub use error::{QuantError, QuantResult};
pub use symbol::{
    default_benchmark, is_index_symbol, market_from_symbol, market_scope, normalize_symbol,
    normalize_symbols, split_symbols, symbol_kind, Market, SymbolKind,
};
