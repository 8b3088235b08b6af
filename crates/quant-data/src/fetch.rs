//! 캐시 우선 일봉 조회 어댑터.
//!
//! # 동작 방식
//!
//! 1. 요청 구간을 캐시가 모두 덮으면 캐시에서 반환
//! 2. 아니면 제공자 체인을 순서대로 시도
//! 3. 받은 데이터를 보정 후 캐시에 upsert하고 반환
//!
//! 시장은 종목 코드에서 추론하여 매 호출에 명시적으로 전달합니다.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::kline::{rows_from_bars, KlineRow};
use crate::provider::{FetchRequest, ProviderChain};
use crate::storage::{KlineStore, SymbolStore};
use quant_core::{is_index_symbol, market_from_symbol, resolve_date_range, symbol_kind, Market, SymbolKind};

/// 일봉 조회 어댑터.
#[derive(Clone)]
pub struct FetchAdapter {
    klines: Arc<dyn KlineStore>,
    symbols: Arc<dyn SymbolStore>,
    chain: ProviderChain,
}

impl std::fmt::Debug for FetchAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchAdapter")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl FetchAdapter {
    pub fn new(
        klines: Arc<dyn KlineStore>,
        symbols: Arc<dyn SymbolStore>,
        chain: ProviderChain,
    ) -> Self {
        Self {
            klines,
            symbols,
            chain,
        }
    }

    pub fn kline_store(&self) -> &Arc<dyn KlineStore> {
        &self.klines
    }

    pub fn symbol_store(&self) -> &Arc<dyn SymbolStore> {
        &self.symbols
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// 지수 여부. 접두사 규칙 또는 저장된 이름/업종의 지수 표식으로 판별합니다.
    pub async fn is_index(&self, symbol: &str, market: Market) -> bool {
        if is_index_symbol(symbol) {
            return true;
        }
        match self.symbols.get(Some(market.code()), symbol).await {
            Ok(Some(record)) => {
                symbol_kind(symbol, record.name.as_deref(), record.industry.as_deref())
                    == SymbolKind::Index
            }
            Ok(None) => false,
            Err(e) => {
                warn!(symbol = symbol, error = %e, "종목 메타데이터 조회 실패");
                false
            }
        }
    }

    /// 캐시에서만 읽습니다. 보정된 행을 반환합니다.
    pub async fn load_cached(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<KlineRow>> {
        let market = market_from_symbol(symbol);
        self.klines.load(market.code(), symbol, start, end).await
    }

    /// 캐시 우선 조회.
    ///
    /// 캐시된 첫 거래일이 `start` 이전이고 마지막 거래일이 `end` 이후면 캐시 적중입니다.
    /// 제공자 체인이 모두 비면 캐시에 남아 있는 부분 데이터를 반환합니다.
    #[instrument(skip(self))]
    pub async fn klines(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        n_folds: i64,
    ) -> Result<Vec<KlineRow>> {
        let market = market_from_symbol(symbol);

        if let Some((first, last)) = self.klines.coverage(market.code(), symbol).await? {
            let covers_start = start.map_or(true, |s| first <= s);
            let covers_end = end.map_or(true, |e| last >= e);
            if covers_start && covers_end {
                debug!(symbol = symbol, "캐시 적중");
                return self.klines.load(market.code(), symbol, start, end).await;
            }
        }

        let fetched = self.fetch_and_store(symbol, market, start, end, n_folds).await?;
        if fetched.is_empty() {
            return self.klines.load(market.code(), symbol, start, end).await;
        }
        Ok(within(fetched, start, end))
    }

    /// 캐시 우선 조회 후, 구간 지정 조회가 비면 구간 없이 한 번 더 조회합니다.
    pub async fn update_klines(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        n_folds: i64,
    ) -> Result<Vec<KlineRow>> {
        let rows = self.klines(symbol, start, end, n_folds).await?;
        if !rows.is_empty() || (start.is_none() && end.is_none()) {
            return Ok(rows);
        }
        let market = market_from_symbol(symbol);
        info!(symbol = symbol, "구간 조회 결과 없음, 전체 구간으로 재조회");
        self.fetch_and_store(symbol, market, None, None, n_folds.max(2))
            .await
    }

    /// 구간 안에 캐시된 행이 하나라도 있으면 `true`.
    ///
    /// 없으면 `max(1, n_folds)`로 조회하고, 비었는데 구간이 지정되어 있었다면
    /// 구간 없이 `max(2, n_folds)`로 한 번 더 조회합니다.
    #[instrument(skip(self))]
    pub async fn ensure_klines(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        n_folds: i64,
    ) -> Result<bool> {
        let market = market_from_symbol(symbol);
        let cached = self.klines.load(market.code(), symbol, start, end).await?;
        if !cached.is_empty() {
            return Ok(true);
        }

        let mut rows = self
            .fetch_and_store(symbol, market, start, end, n_folds.max(1))
            .await?;
        if rows.is_empty() && (start.is_some() || end.is_some()) {
            rows = self
                .fetch_and_store(symbol, market, None, None, n_folds.max(2))
                .await?;
        }
        Ok(!rows.is_empty())
    }

    /// 여러 종목을 확보하고 데이터가 없는 종목 목록을 반환합니다.
    pub async fn ensure_many(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        n_folds: i64,
    ) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for symbol in symbols {
            if !self.ensure_klines(symbol, start, end, n_folds).await? {
                missing.push(symbol.clone());
            }
        }
        Ok(missing)
    }

    /// 제공자 체인에서 조회하여 캐시에 저장합니다. 조회된 전체 행을 반환합니다.
    async fn fetch_and_store(
        &self,
        symbol: &str,
        market: Market,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        n_folds: i64,
    ) -> Result<Vec<KlineRow>> {
        let (range_start, range_end) = resolve_date_range(start, end, n_folds);
        let request = FetchRequest {
            symbol: symbol.to_string(),
            market,
            is_index: self.is_index(symbol, market).await,
            start: range_start,
            end: range_end,
        };

        let Some((source, bars)) = self.chain.fetch(&request).await else {
            warn!(
                symbol = symbol,
                start = %range_start,
                end = %range_end,
                "모든 시세 제공자에서 데이터 없음"
            );
            return Ok(Vec::new());
        };

        let rows = rows_from_bars(bars, market.code(), symbol);
        let stats = self.klines.upsert(rows.clone()).await?;
        info!(
            symbol = symbol,
            source = %source,
            rows = rows.len(),
            inserted = stats.inserted,
            updated = stats.updated,
            "일봉 캐시에 저장"
        );
        Ok(rows)
    }
}

fn within(rows: Vec<KlineRow>, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<KlineRow> {
    rows.into_iter()
        .filter(|r| start.map_or(true, |s| r.trade_date >= s))
        .filter(|r| end.map_or(true, |e| r.trade_date <= e))
        .collect()
}
