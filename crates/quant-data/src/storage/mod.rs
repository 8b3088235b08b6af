//! 일봉/종목 저장소.
//!
//! - [`postgres`]: sqlx 기반 PostgreSQL 구현
//! - [`memory`]: `DATABASE_URL`이 없을 때와 테스트에서 쓰는 메모리 구현

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::kline::KlineRow;
use quant_core::SymbolKind;

/// upsert 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    /// 새로 삽입된 행 수
    pub inserted: usize,
    /// 기존 행을 갱신한 수
    pub updated: usize,
}

impl UpsertStats {
    /// 영향받은 전체 행 수.
    pub fn affected(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: UpsertStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// 종목 메타데이터.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub market: String,
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub industry: Option<String>,
}

impl SymbolRecord {
    pub fn kind(&self) -> SymbolKind {
        quant_core::symbol_kind(&self.symbol, self.name.as_deref(), self.industry.as_deref())
    }
}

/// 종목 검색 조건.
#[derive(Debug, Clone, Default)]
pub struct SymbolQuery {
    /// 비어 있으면 전체 시장
    pub markets: Vec<String>,
    /// 종목 코드/이름 부분 일치
    pub q: Option<String>,
    /// 종류 필터 (`None`이면 전체)
    pub kind: Option<SymbolKind>,
    /// 1부터 시작
    pub page: u32,
    pub page_size: u32,
}

impl SymbolQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.page_size)
    }

    /// 메모리 구현과 테스트에서 쓰는 조건 판정.
    pub fn matches(&self, record: &SymbolRecord) -> bool {
        if !self.markets.is_empty() && !self.markets.contains(&record.market) {
            return false;
        }
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            let in_symbol = record.symbol.to_lowercase().contains(&q);
            let in_name = record
                .name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&q));
            if !in_symbol && !in_name {
                return false;
            }
        }
        match self.kind {
            Some(kind) => record.kind() == kind,
            None => true,
        }
    }
}

/// 종목 검색 결과 한 페이지.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolPage {
    pub items: Vec<SymbolRecord>,
    pub total: u64,
}

/// 일봉 캐시 저장소.
#[async_trait]
pub trait KlineStore: Send + Sync {
    /// `(market, symbol, trade_date)` 기준 insert-or-update.
    ///
    /// 키 필드가 빈 행은 버리고, 같은 키가 배치에 여러 번 있으면 마지막 행을 씁니다.
    async fn upsert(&self, rows: Vec<KlineRow>) -> Result<UpsertStats>;

    /// 거래일 오름차순 일봉. 없으면 빈 목록.
    async fn load(
        &self,
        market: &str,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<KlineRow>>;

    /// 캐시된 첫/마지막 거래일.
    async fn coverage(&self, market: &str, symbol: &str) -> Result<Option<(NaiveDate, NaiveDate)>>;
}

/// 종목 메타데이터 저장소.
#[async_trait]
pub trait SymbolStore: Send + Sync {
    /// `(market, symbol)` 기준 insert-or-update.
    async fn upsert_symbols(&self, records: Vec<SymbolRecord>) -> Result<UpsertStats>;

    /// 주어진 시장 중 하나라도 종목이 있는지 확인합니다.
    async fn has_any(&self, markets: &[String]) -> Result<bool>;

    async fn has(&self, market: &str) -> Result<bool> {
        self.has_any(&[market.to_string()]).await
    }

    /// 시장 목록에 속한 종목 (시장, 종목 코드 순).
    async fn list_by_markets(&self, markets: &[String]) -> Result<Vec<SymbolRecord>>;

    /// 종목 코드로 조회합니다. 시장을 주면 해당 시장에서만 찾습니다.
    async fn get(&self, market: Option<&str>, symbol: &str) -> Result<Option<SymbolRecord>>;

    async fn search(&self, query: &SymbolQuery) -> Result<SymbolPage>;
}

/// 키 필드가 빈 행을 버리고 배치 내 중복 키는 마지막 행만 남깁니다.
///
/// 남은 행은 키가 처음 나온 순서를 유지합니다.
pub fn dedup_rows(rows: Vec<KlineRow>) -> Vec<KlineRow> {
    let mut positions: HashMap<(String, String, NaiveDate), usize> = HashMap::new();
    let mut out: Vec<KlineRow> = Vec::with_capacity(rows.len());
    for row in rows.into_iter().filter(KlineRow::has_key_fields) {
        match positions.get(&row.unique_key()) {
            Some(&idx) => out[idx] = row,
            None => {
                positions.insert(row.unique_key(), out.len());
                out.push(row);
            }
        }
    }
    out
}

/// 종목 메타데이터용 중복 제거 (마지막 행 우선).
pub fn dedup_symbols(records: Vec<SymbolRecord>) -> Vec<SymbolRecord> {
    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    let mut out: Vec<SymbolRecord> = Vec::with_capacity(records.len());
    for record in records {
        if record.market.trim().is_empty() || record.symbol.trim().is_empty() {
            continue;
        }
        let key = (record.market.clone(), record.symbol.clone());
        match positions.get(&key) {
            Some(&idx) => out[idx] = record,
            None => {
                positions.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_dedup_rows_last_wins() {
        let rows = vec![
            KlineRow::new("SH", "sh600036", day(1)).with_close(1.0),
            KlineRow::new("", "sh600036", day(1)).with_close(5.0),
            KlineRow::new("SH", "sh600036", day(2)).with_close(2.0),
            KlineRow::new("SH", "sh600036", day(1)).with_close(3.0),
            KlineRow::new("SH", " ", day(3)).with_close(4.0),
        ];
        let out = dedup_rows(rows);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].trade_date, day(1));
        assert_eq!(out[0].close, Some(3.0));
        assert_eq!(out[1].close, Some(2.0));
    }

    #[test]
    fn test_symbol_query_matches() {
        let record = SymbolRecord {
            market: "SH".to_string(),
            symbol: "sh000001".to_string(),
            name: Some("上证指数".to_string()),
            exchange: None,
            industry: None,
        };
        let mut query = SymbolQuery {
            markets: vec!["SH".to_string()],
            q: Some("上证".to_string()),
            kind: Some(SymbolKind::Index),
            page: 1,
            page_size: 20,
        };
        assert!(query.matches(&record));
        query.kind = Some(SymbolKind::Stock);
        assert!(!query.matches(&record));
        query.kind = None;
        query.markets = vec!["HK".to_string()];
        assert!(!query.matches(&record));
    }
}
