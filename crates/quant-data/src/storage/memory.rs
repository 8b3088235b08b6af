//! 메모리 저장소.
//!
//! 프로세스가 끝나면 사라집니다. `DATABASE_URL` 없이 서버를 띄우거나 테스트할 때 사용합니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{
    dedup_rows, dedup_symbols, KlineStore, SymbolPage, SymbolQuery, SymbolRecord, SymbolStore,
    UpsertStats,
};
use crate::error::Result;
use crate::kline::{backfill, KlineRow};

type SeriesKey = (String, String);

/// 메모리 일봉 저장소.
#[derive(Debug, Default)]
pub struct MemoryKlineStore {
    series: RwLock<BTreeMap<SeriesKey, BTreeMap<NaiveDate, KlineRow>>>,
}

impl MemoryKlineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 전체 행 수.
    pub async fn len(&self) -> usize {
        self.series.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KlineStore for MemoryKlineStore {
    async fn upsert(&self, rows: Vec<KlineRow>) -> Result<UpsertStats> {
        let rows = dedup_rows(rows);
        let mut stats = UpsertStats::default();
        let mut series = self.series.write().await;
        for row in rows {
            let bars = series
                .entry((row.market.clone(), row.symbol.clone()))
                .or_default();
            match bars.insert(row.trade_date, row) {
                Some(_) => stats.updated += 1,
                None => stats.inserted += 1,
            }
        }
        Ok(stats)
    }

    async fn load(
        &self,
        market: &str,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<KlineRow>> {
        let series = self.series.read().await;
        let Some(bars) = series.get(&(market.to_string(), symbol.to_string())) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<KlineRow> = bars
            .values()
            .filter(|r| start.map_or(true, |s| r.trade_date >= s))
            .filter(|r| end.map_or(true, |e| r.trade_date <= e))
            .cloned()
            .collect();
        backfill(&mut rows);
        Ok(rows)
    }

    async fn coverage(&self, market: &str, symbol: &str) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let series = self.series.read().await;
        Ok(series
            .get(&(market.to_string(), symbol.to_string()))
            .and_then(|bars| {
                let first = bars.keys().next()?;
                let last = bars.keys().next_back()?;
                Some((*first, *last))
            }))
    }
}

/// 메모리 종목 저장소.
#[derive(Debug, Default)]
pub struct MemorySymbolStore {
    symbols: RwLock<BTreeMap<(String, String), SymbolRecord>>,
}

impl MemorySymbolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SymbolStore for MemorySymbolStore {
    async fn upsert_symbols(&self, records: Vec<SymbolRecord>) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        let mut symbols = self.symbols.write().await;
        for record in dedup_symbols(records) {
            let key = (record.market.clone(), record.symbol.clone());
            match symbols.insert(key, record) {
                Some(_) => stats.updated += 1,
                None => stats.inserted += 1,
            }
        }
        Ok(stats)
    }

    async fn has_any(&self, markets: &[String]) -> Result<bool> {
        let symbols = self.symbols.read().await;
        Ok(symbols.keys().any(|(market, _)| markets.contains(market)))
    }

    async fn list_by_markets(&self, markets: &[String]) -> Result<Vec<SymbolRecord>> {
        let symbols = self.symbols.read().await;
        Ok(symbols
            .values()
            .filter(|r| markets.contains(&r.market))
            .cloned()
            .collect())
    }

    async fn get(&self, market: Option<&str>, symbol: &str) -> Result<Option<SymbolRecord>> {
        let symbols = self.symbols.read().await;
        Ok(symbols
            .values()
            .find(|r| r.symbol == symbol && market.map_or(true, |m| r.market == m))
            .cloned())
    }

    async fn search(&self, query: &SymbolQuery) -> Result<SymbolPage> {
        let symbols = self.symbols.read().await;
        let matched: Vec<&SymbolRecord> = symbols.values().filter(|r| query.matches(r)).collect();
        let items = matched
            .iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .map(|r| (*r).clone())
            .collect();
        Ok(SymbolPage {
            items,
            total: matched.len() as u64,
        })
    }
}
