//! 작업 종류별 실행 본문.
//!
//! 각 본문은 `anyhow::Result<Value>`를 반환하며, 오류 메시지는 워커가 작업의 `error`로 기록합니다.
//! 백테스트/그리드 탐색은 CPU 작업이므로 `spawn_blocking`에서 실행합니다.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use quant_analytics::{
    run_analysis, run_grid, AnalysisRequest, BacktestConfig, BacktestEngine, BacktestInput,
    KlineLoader,
};
use quant_core::{default_benchmark, market_scope, normalize_symbol, resolve_date_range};
use quant_data::{seed_symbols_if_empty, FetchAdapter, KlineRow};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::params::{
    parse_params, AnalysisParams, BacktestParams, DataWindow, GridSearchParams, KlUpdateParams,
};
use crate::repository::JobType;

/// 결과에 담는 목록 최대 길이.
pub const RESULT_ROWS_LIMIT: usize = 200;

/// 데이터 없음 오류에 나열하는 종목 수.
const MISSING_PREVIEW: usize = 10;

/// 백테스트 기준 종목 결정.
#[async_trait]
pub trait BenchmarkResolver: Send + Sync {
    /// `available`은 데이터가 확보된 요청 종목입니다 (비어 있지 않음).
    async fn resolve(&self, market: &str, available: &[String], window: &DataWindow) -> String;
}

/// 시장 기본 지수를 우선 사용하고, 데이터가 없으면 첫 번째 종목으로 대체합니다.
#[derive(Debug, Clone)]
pub struct MarketBenchmarkResolver {
    adapter: FetchAdapter,
}

impl MarketBenchmarkResolver {
    pub fn new(adapter: FetchAdapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl BenchmarkResolver for MarketBenchmarkResolver {
    async fn resolve(&self, market: &str, available: &[String], window: &DataWindow) -> String {
        let candidate = default_benchmark(market);
        let fallback = || {
            available
                .first()
                .cloned()
                .unwrap_or_else(|| candidate.to_string())
        };

        match self
            .adapter
            .ensure_klines(candidate, window.start, window.end, window.n_folds)
            .await
        {
            Ok(true) => candidate.to_string(),
            Ok(false) => {
                info!(benchmark = candidate, "기준 지수 데이터 없음, 첫 종목으로 대체");
                fallback()
            }
            Err(e) => {
                warn!(benchmark = candidate, error = %e, "기준 지수 조회 실패, 첫 종목으로 대체");
                fallback()
            }
        }
    }
}

/// 캐시에서만 읽는 분석용 로더.
struct CacheLoader {
    adapter: FetchAdapter,
    window: DataWindow,
}

#[async_trait]
impl KlineLoader for CacheLoader {
    async fn load(&self, symbol: &str) -> Option<Vec<KlineRow>> {
        match load_window(&self.adapter, symbol, &self.window).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(symbol = symbol, error = %e, "캐시 조회 실패");
                None
            }
        }
    }
}

/// 작업 실행기.
pub struct JobExecutor {
    adapter: FetchAdapter,
    benchmark: Arc<dyn BenchmarkResolver>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    pub fn new(adapter: FetchAdapter) -> Self {
        let benchmark = Arc::new(MarketBenchmarkResolver::new(adapter.clone()));
        Self { adapter, benchmark }
    }

    pub fn with_benchmark_resolver(mut self, resolver: Arc<dyn BenchmarkResolver>) -> Self {
        self.benchmark = resolver;
        self
    }

    pub fn adapter(&self) -> &FetchAdapter {
        &self.adapter
    }

    /// 작업 본문을 실행합니다.
    #[instrument(skip(self, params), fields(job_type = %job_type))]
    pub async fn execute(&self, job_type: JobType, params: &Value) -> anyhow::Result<Value> {
        match job_type {
            JobType::KlUpdate => self.kl_update(params).await,
            JobType::Backtest => self.backtest(params).await,
            JobType::GridSearch => self.grid_search(params).await,
            JobType::Analysis => self.analysis(params).await,
            JobType::Verify => Ok(self.verify()),
        }
    }

    // ==================== kl_update ====================

    async fn kl_update(&self, params: &Value) -> anyhow::Result<Value> {
        let params: KlUpdateParams = parse_params(params)?;
        let market = params.data.market_or("CN");
        let window = params.data.window();

        let mut seeded = 0;
        let symbols = if params.all() {
            let store = self.adapter.symbol_store();
            seeded = match seed_symbols_if_empty(store.as_ref(), &market).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(market = %market, error = %e, "종목 목록 시딩 실패");
                    0
                }
            };
            store
                .list_by_markets(&market_scope(&market))
                .await?
                .into_iter()
                .filter_map(|record| normalize_symbol(&record.symbol, &record.market))
                .collect()
        } else {
            params.data.symbols(&market)
        };

        if symbols.is_empty() {
            bail!("No symbols available; import symbols into database first.");
        }

        info!(market = %market, symbols = symbols.len(), seeded, "일봉 갱신 시작");

        let mut rows = 0usize;
        let mut updated = 0usize;
        let mut missing = Vec::new();
        for symbol in &symbols {
            let fetched = self
                .adapter
                .update_klines(symbol, window.start, window.end, window.n_folds)
                .await?;
            if fetched.is_empty() {
                missing.push(symbol.clone());
            } else {
                rows += fetched.len();
                updated += 1;
            }
        }

        info!(rows, updated, missing = missing.len(), "일봉 갱신 완료");

        missing.truncate(RESULT_ROWS_LIMIT);
        Ok(json!({
            "message": "kl_update finished",
            "symbols": head(&symbols),
            "rows": rows,
            "seeded_symbols": seeded,
            "updated_symbols": updated,
            "missing_symbols": missing,
        }))
    }

    // ==================== backtest ====================

    async fn backtest(&self, params: &Value) -> anyhow::Result<Value> {
        let params: BacktestParams = parse_params(params)?;
        let market = params.data.market_or("CN");
        let symbols = params.data.symbols(&market);
        let window = params.data.window();

        let input = self
            .prepare_input("backtest", &market, &symbols, &window)
            .await?;
        let mut config = BacktestConfig::default().with_initial_cash(cash_decimal(params.cash())?);
        config.buy_factors = vec![params.buy_factor()];
        config.sell_factors = vec![params.sell_factor()];

        let outcome = tokio::task::spawn_blocking(move || {
            BacktestEngine::new(config).and_then(|engine| engine.run(&input))
        })
        .await
        .context("Backtest task failed")??
        .ok_or_else(|| anyhow!("Backtest returned empty result"))?;

        info!(
            orders = outcome.orders.len(),
            actions = outcome.actions.len(),
            benchmark = %outcome.benchmark,
            "백테스트 완료"
        );

        let mut result = Map::new();
        result.insert(
            "summary".to_string(),
            json!({
                "market": market,
                "symbols": symbols,
                "orders_rows": outcome.orders.len(),
                "actions_rows": outcome.actions.len(),
                "benchmark": outcome.benchmark,
                "final_cash": outcome.final_cash.to_f64(),
            }),
        );
        // 미리보기는 행이 있을 때만
        if !outcome.orders.is_empty() {
            result.insert("orders".to_string(), head(&outcome.orders));
        }
        if !outcome.actions.is_empty() {
            result.insert("actions".to_string(), head(&outcome.actions));
        }
        Ok(Value::Object(result))
    }

    // ==================== grid_search ====================

    async fn grid_search(&self, params: &Value) -> anyhow::Result<Value> {
        let params: GridSearchParams = parse_params(params)?;
        let market = params.data.market_or("CN");
        let symbols = params.data.symbols(&market);
        let window = params.data.window();
        let spec = params.grid_spec();

        let input = self
            .prepare_input("grid search", &market, &symbols, &window)
            .await?;
        let base = BacktestConfig::default().with_initial_cash(cash_decimal(params.cash())?);

        let grid = spec.clone();
        let runs = tokio::task::spawn_blocking(move || run_grid(&grid, &base, &input))
            .await
            .context("Grid search task failed")?;

        info!(runs = runs.len(), max_runs = spec.max_runs, "그리드 탐색 완료");

        Ok(json!({
            "market": market,
            "symbols": symbols,
            "max_runs": spec.max_runs,
            "best": runs.first(),
            "runs": head(&runs),
        }))
    }

    // ==================== analysis ====================

    async fn analysis(&self, params: &Value) -> anyhow::Result<Value> {
        let params: AnalysisParams = parse_params(params)?;
        let market = params.data.market_or("US");
        let symbols = params.data.symbols(&market);

        let request = AnalysisRequest::new(params.tool(), market, symbols)
            .with_limit(params.limit())
            .with_options(params.options());
        let loader = CacheLoader {
            adapter: self.adapter.clone(),
            window: params.data.window(),
        };

        Ok(run_analysis(&request, &loader).await?)
    }

    // ==================== verify ====================

    fn verify(&self) -> Value {
        let engine_error = BacktestEngine::new(BacktestConfig::breakout(42, 0.5, 3.0))
            .err()
            .map(|e| e.to_string());
        json!({
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "engine": "quant-analytics",
            "engine_version": env!("CARGO_PKG_VERSION"),
            "engine_error": engine_error,
            "providers": self.adapter.chain().names(),
        })
    }

    // ==================== 헬퍼 함수 ====================

    /// 요청 종목의 일봉을 확보하고 백테스트 입력을 만듭니다.
    async fn prepare_input(
        &self,
        purpose: &str,
        market: &str,
        symbols: &[String],
        window: &DataWindow,
    ) -> anyhow::Result<BacktestInput> {
        if symbols.is_empty() {
            bail!("No symbols specified for {}.", purpose);
        }
        let missing = self
            .adapter
            .ensure_many(symbols, window.start, window.end, window.n_folds)
            .await?;
        let available: Vec<String> = symbols
            .iter()
            .filter(|s| !missing.contains(s))
            .cloned()
            .collect();

        if available.is_empty() {
            let preview: Vec<&String> = missing.iter().take(MISSING_PREVIEW).collect();
            bail!(
                "No kline data available for selected symbols; data source returned empty. \
                 Try kl_update with a wider range (omit start/end), or check data source. \
                 Missing: {:?}",
                preview
            );
        }
        if !missing.is_empty() {
            warn!(missing = ?missing, "일부 종목 데이터 없음");
        }

        let benchmark = self.benchmark.resolve(market, &available, window).await;
        debug!(benchmark = %benchmark, "기준 종목 결정");

        let mut klines = HashMap::new();
        for symbol in &available {
            let rows = load_window(&self.adapter, symbol, window).await?;
            if !rows.is_empty() {
                klines.insert(symbol.clone(), rows);
            }
        }
        let benchmark_klines = match klines.get(&benchmark) {
            Some(rows) => rows.clone(),
            None => load_window(&self.adapter, &benchmark, window).await?,
        };

        Ok(BacktestInput {
            symbols: symbols.to_vec(),
            klines,
            benchmark,
            benchmark_klines,
        })
    }
}

/// 조회 구간의 캐시 일봉. 구간 안에 행이 없으면 캐시 전체를 씁니다.
async fn load_window(
    adapter: &FetchAdapter,
    symbol: &str,
    window: &DataWindow,
) -> quant_data::Result<Vec<KlineRow>> {
    let (start, end) = resolve_date_range(window.start, window.end, window.n_folds);
    let rows = adapter.load_cached(symbol, Some(start), Some(end)).await?;
    if !rows.is_empty() {
        return Ok(rows);
    }
    adapter.load_cached(symbol, None, None).await
}

fn cash_decimal(cash: f64) -> anyhow::Result<Decimal> {
    Decimal::from_f64(cash).ok_or_else(|| anyhow!("Invalid cash: {}", cash))
}

fn head<T: serde::Serialize>(rows: &[T]) -> Value {
    json!(&rows[..rows.len().min(RESULT_ROWS_LIMIT)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{adapter_with, FixedSource};
    use chrono::NaiveDate;

    fn executor(source: Option<FixedSource>) -> JobExecutor {
        JobExecutor::new(adapter_with(source))
    }

    struct FirstSymbol;

    #[async_trait]
    impl BenchmarkResolver for FirstSymbol {
        async fn resolve(&self, _market: &str, available: &[String], _w: &DataWindow) -> String {
            available[0].clone()
        }
    }

    #[tokio::test]
    async fn test_verify_lists_providers() {
        let executor = executor(Some(FixedSource::rising(5)));
        let result = executor.execute(JobType::Verify, &json!({})).await.unwrap();
        assert_eq!(result["engine"], "quant-analytics");
        assert!(result["engine_error"].is_null());
        assert_eq!(result["providers"], json!(["fixed"]));
    }

    #[tokio::test]
    async fn test_kl_update_reports_missing() {
        let executor = executor(None);
        let result = executor
            .execute(JobType::KlUpdate, &json!({"market": "US", "symbols": "AAPL,MSFT"}))
            .await
            .unwrap();
        assert_eq!(result["message"], "kl_update finished");
        assert_eq!(result["rows"], 0);
        assert_eq!(result["symbols"], json!(["usAAPL", "usMSFT"]));
        assert_eq!(result["missing_symbols"], json!(["usAAPL", "usMSFT"]));
    }

    #[tokio::test]
    async fn test_kl_update_all_seeds_symbols() {
        let executor = executor(Some(FixedSource::rising(3)));
        let result = executor
            .execute(JobType::KlUpdate, &json!({"market": "HK", "all": true}))
            .await
            .unwrap();
        assert!(result["seeded_symbols"].as_u64().unwrap() > 0);
        let listed = result["symbols"].as_array().unwrap().len() as u64;
        assert!(listed > 0);
        assert_eq!(listed, result["updated_symbols"].as_u64().unwrap().min(RESULT_ROWS_LIMIT as u64));
    }

    #[tokio::test]
    async fn test_backtest_without_data_names_symbol() {
        let executor = executor(None);
        let err = executor
            .execute(JobType::Backtest, &json!({"market": "US", "symbols": ["TSLA"]}))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("No kline data available"));
        assert!(message.contains("usTSLA"));
    }

    #[tokio::test]
    async fn test_backtest_produces_summary() {
        let executor = executor(Some(FixedSource::rising(60)))
            .with_benchmark_resolver(Arc::new(FirstSymbol));
        let result = executor
            .execute(
                JobType::Backtest,
                &json!({
                    "market": "US",
                    "symbols": "AAPL",
                    "start": "2024-01-01",
                    "end": "2024-03-31",
                    "buy_xd": 10
                }),
            )
            .await
            .unwrap();
        let summary = &result["summary"];
        assert_eq!(summary["benchmark"], "usAAPL");
        assert_eq!(summary["symbols"], json!(["usAAPL"]));
        assert!(summary["orders_rows"].as_u64().unwrap() > 0);
        assert!(result["orders"].as_array().unwrap().len() <= RESULT_ROWS_LIMIT);
    }

    #[tokio::test]
    async fn test_backtest_without_orders_omits_previews() {
        let executor = executor(Some(FixedSource::rising(20)))
            .with_benchmark_resolver(Arc::new(FirstSymbol));
        let result = executor
            .execute(
                JobType::Backtest,
                &json!({"market": "US", "symbols": "AAPL", "buy_xd": 100}),
            )
            .await
            .unwrap();
        assert_eq!(result["summary"]["orders_rows"], 0);
        assert!(result.get("orders").is_none());
        assert!(result.get("actions").is_none());
    }

    #[tokio::test]
    async fn test_prepare_input_requires_symbols() {
        let executor = executor(Some(FixedSource::rising(5)));
        let window = DataWindow {
            start: None,
            end: None,
            n_folds: 1,
        };
        let err = executor
            .prepare_input("backtest", "US", &[], &window)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No symbols specified for backtest.");
    }

    #[tokio::test]
    async fn test_grid_search_ranks_runs() {
        let executor = executor(Some(FixedSource::rising(60)))
            .with_benchmark_resolver(Arc::new(FirstSymbol));
        let result = executor
            .execute(
                JobType::GridSearch,
                &json!({
                    "market": "US",
                    "symbols": "AAPL",
                    "buy_xd_list": [5, 10],
                    "stop_loss_n_list": [0.5],
                    "stop_win_n_list": [2.0],
                    "max_runs": 1
                }),
            )
            .await
            .unwrap();
        assert_eq!(result["max_runs"], 1);
        assert_eq!(result["runs"].as_array().unwrap().len(), 1);
        assert_eq!(result["best"]["buy_xd"], 5);
    }

    #[tokio::test]
    async fn test_analysis_reads_cache_only() {
        let executor = executor(Some(FixedSource::rising(30)));
        let err = executor
            .execute(
                JobType::Analysis,
                &json!({"tool": "p_change_stats", "symbols": "AAPL"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No data for requested symbols");

        executor
            .adapter()
            .update_klines("usAAPL", None, None, 1)
            .await
            .unwrap();
        let result = executor
            .execute(
                JobType::Analysis,
                &json!({"tool": "p_change_stats", "symbols": "AAPL", "n_folds": 5}),
            )
            .await
            .unwrap();
        assert_eq!(result["tool"], "p_change_stats");
    }

    #[tokio::test]
    async fn test_load_window_falls_back_to_full_cache() {
        let executor = executor(Some(FixedSource::rising(5)));
        executor
            .adapter()
            .update_klines("usAAPL", None, None, 1)
            .await
            .unwrap();
        let window = DataWindow {
            start: NaiveDate::from_ymd_opt(2020, 1, 1),
            end: NaiveDate::from_ymd_opt(2020, 6, 1),
            n_folds: 1,
        };
        let rows = load_window(executor.adapter(), "usAAPL", &window).await.unwrap();
        assert_eq!(rows.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_tool_message() {
        let executor = executor(None);
        let err = executor
            .execute(JobType::Analysis, &json!({"tool": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported analysis tool");
    }
}
