//! 외부 시세 제공자.
//!
//! 각 제공자는 [`KlineSource`]를 구현하고, [`ProviderChain`]이 순위대로 시도합니다.
//! 제공자 오류는 로그만 남기고 "데이터 없음"으로 취급합니다.

pub mod eastmoney;
pub mod tencent;
pub mod yahoo;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::kline::RawBar;
use quant_core::config::ProvidersConfig;
use quant_core::Market;

pub use eastmoney::EastmoneySource;
pub use tencent::TencentSource;
pub use yahoo::YahooSource;

/// 일봉 조회 요청.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// 정규화된 종목 코드 (예: `sh600036`)
    pub symbol: String,
    pub market: Market,
    /// 지수 여부 (지수 전용 경로 사용)
    pub is_index: bool,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchRequest {
    /// 접두사를 뗀 종목 코드.
    pub fn code(&self) -> &str {
        let lower = self.symbol.to_ascii_lowercase();
        match quant_core::symbol::SYMBOL_PREFIXES
            .iter()
            .find(|p| lower.starts_with(*p))
        {
            Some(prefix) => &self.symbol[prefix.len()..],
            None => &self.symbol,
        }
    }
}

/// 일봉 데이터 제공자.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// 제공자 이름 (설정에서 참조하는 키).
    fn name(&self) -> &str;

    /// 이 시장을 지원하는지 여부.
    fn supports(&self, _market: Market) -> bool {
        true
    }

    /// 일반 종목 일봉.
    async fn fetch_equity(&self, req: &FetchRequest) -> Result<Vec<RawBar>>;

    /// 지수 일봉. 기본 구현은 종목 경로를 그대로 사용합니다.
    async fn fetch_index(&self, req: &FetchRequest) -> Result<Vec<RawBar>> {
        self.fetch_equity(req).await
    }
}

/// 순위가 매겨진 제공자 목록.
#[derive(Clone, Default)]
pub struct ProviderChain {
    sources: Vec<Arc<dyn KlineSource>>,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("sources", &self.names())
            .finish()
    }
}

impl ProviderChain {
    /// 제공자 목록으로 체인을 만듭니다. 이름이 겹치면 앞의 것만 남깁니다.
    pub fn new(sources: Vec<Arc<dyn KlineSource>>) -> Self {
        let mut chain = Self::default();
        for source in sources {
            chain = chain.with_source(source);
        }
        chain
    }

    /// 체인 끝에 제공자를 추가합니다.
    pub fn with_source(mut self, source: Arc<dyn KlineSource>) -> Self {
        if !self.sources.iter().any(|s| s.name() == source.name()) {
            self.sources.push(source);
        }
        self
    }

    /// 설정의 순위대로 내장 제공자를 구성합니다.
    ///
    /// 알 수 없는 이름이나 초기화에 실패한 제공자는 경고 후 건너뜁니다.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut chain = Self::default();
        for name in config.ranked_names() {
            let source: Result<Arc<dyn KlineSource>> = match name.as_str() {
                yahoo::NAME => YahooSource::new().map(|s| Arc::new(s) as Arc<dyn KlineSource>),
                tencent::NAME => {
                    TencentSource::new(&config.tencent_base_url, config.timeout_secs)
                        .map(|s| Arc::new(s) as Arc<dyn KlineSource>)
                }
                eastmoney::NAME => {
                    EastmoneySource::new(&config.eastmoney_base_url, config.timeout_secs)
                        .map(|s| Arc::new(s) as Arc<dyn KlineSource>)
                }
                other => {
                    warn!(provider = other, "알 수 없는 시세 제공자, 건너뜀");
                    continue;
                }
            };
            match source {
                Ok(source) => chain = chain.with_source(source),
                Err(e) => warn!(provider = %name, error = %e, "시세 제공자 초기화 실패"),
            }
        }
        info!(sources = ?chain.names(), "시세 제공자 체인 구성");
        chain
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 순서대로 시도하여 처음으로 비어 있지 않은 결과를 반환합니다.
    ///
    /// 모든 제공자가 실패하거나 빈 결과면 `None`.
    pub async fn fetch(&self, req: &FetchRequest) -> Option<(String, Vec<RawBar>)> {
        for source in &self.sources {
            if !source.supports(req.market) {
                continue;
            }
            let result = if req.is_index {
                source.fetch_index(req).await
            } else {
                source.fetch_equity(req).await
            };
            match result {
                Ok(bars) if !bars.is_empty() => {
                    metrics::counter!(
                        "quant_kline_fetch_total",
                        "source" => source.name().to_string(),
                        "outcome" => "hit"
                    )
                    .increment(1);
                    debug!(
                        source = source.name(),
                        symbol = %req.symbol,
                        rows = bars.len(),
                        "시세 조회 성공"
                    );
                    return Some((source.name().to_string(), bars));
                }
                Ok(_) => {
                    metrics::counter!(
                        "quant_kline_fetch_total",
                        "source" => source.name().to_string(),
                        "outcome" => "empty"
                    )
                    .increment(1);
                    debug!(source = source.name(), symbol = %req.symbol, "시세 조회 결과 없음");
                }
                Err(e) => {
                    metrics::counter!(
                        "quant_kline_fetch_total",
                        "source" => source.name().to_string(),
                        "outcome" => "error"
                    )
                    .increment(1);
                    warn!(
                        source = source.name(),
                        symbol = %req.symbol,
                        error = %e,
                        "시세 조회 실패, 다음 제공자 시도"
                    );
                }
            }
        }
        None
    }
}

// ==================== 헬퍼 함수 ====================

/// 문자열 또는 숫자 JSON 값을 f64로 읽습니다.
pub(crate) fn json_f64(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::DataError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 고정 응답을 돌려주는 테스트용 제공자.
    pub struct StaticSource {
        pub name: &'static str,
        pub bars: Vec<RawBar>,
        pub fail: bool,
        pub cn_only: bool,
        pub calls: AtomicUsize,
        pub index_calls: AtomicUsize,
    }

    impl StaticSource {
        pub fn new(name: &'static str, bars: Vec<RawBar>) -> Self {
            Self {
                name,
                bars,
                fail: false,
                cn_only: false,
                calls: AtomicUsize::new(0),
                index_calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(name: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::new(name, Vec::new())
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KlineSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, market: Market) -> bool {
            !self.cn_only || market.is_cn()
        }

        async fn fetch_equity(&self, _req: &FetchRequest) -> Result<Vec<RawBar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DataError::FetchError(format!("{} unavailable", self.name)));
            }
            Ok(self.bars.clone())
        }

        async fn fetch_index(&self, req: &FetchRequest) -> Result<Vec<RawBar>> {
            self.index_calls.fetch_add(1, Ordering::SeqCst);
            self.fetch_equity(req).await
        }
    }

    pub fn bars(days: u32) -> Vec<RawBar> {
        (1..=days)
            .map(|d| RawBar {
                trade_date: NaiveDate::from_ymd_opt(2024, 1, d),
                close: Some(10.0 + d as f64),
                ..Default::default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{bars, StaticSource};
    use super::*;
    use std::sync::atomic::Ordering;

    fn request(symbol: &str, market: Market) -> FetchRequest {
        FetchRequest {
            symbol: symbol.to_string(),
            market,
            is_index: false,
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }
    }

    #[test]
    fn test_request_code() {
        assert_eq!(request("sh600036", Market::Sh).code(), "600036");
        assert_eq!(request("usAAPL", Market::Us).code(), "AAPL");
        assert_eq!(request("7203", Market::Cn).code(), "7203");
    }

    #[tokio::test]
    async fn test_chain_swallows_errors_and_stops_at_first_hit() {
        let failing = Arc::new(StaticSource::failing("primary"));
        let empty = Arc::new(StaticSource::new("fallback", Vec::new()));
        let good = Arc::new(StaticSource::new("secondary", bars(3)));
        let unused = Arc::new(StaticSource::new("last", bars(5)));

        let chain = ProviderChain::new(vec![
            failing.clone(),
            empty.clone(),
            good.clone(),
            unused.clone(),
        ]);
        let (source, rows) = chain.fetch(&request("sh600036", Market::Sh)).await.unwrap();

        assert_eq!(source, "secondary");
        assert_eq!(rows.len(), 3);
        assert_eq!(failing.calls(), 1);
        assert_eq!(empty.calls(), 1);
        assert_eq!(unused.calls(), 0);
    }

    #[tokio::test]
    async fn test_chain_skips_unsupported_market_and_dedups() {
        let mut cn_only = StaticSource::new("eastmoney", bars(2));
        cn_only.cn_only = true;
        let cn_only = Arc::new(cn_only);
        let duplicate = Arc::new(StaticSource::new("eastmoney", bars(9)));

        let chain = ProviderChain::new(vec![cn_only.clone(), duplicate]);
        assert_eq!(chain.names(), vec!["eastmoney"]);
        assert!(chain.fetch(&request("usAAPL", Market::Us)).await.is_none());
        assert_eq!(cn_only.calls(), 0);
    }

    #[tokio::test]
    async fn test_chain_routes_index_requests() {
        let source = Arc::new(StaticSource::new("primary", bars(1)));
        let chain = ProviderChain::new(vec![source.clone()]);
        let mut req = request("sh000001", Market::Sh);
        req.is_index = true;
        chain.fetch(&req).await.unwrap();
        assert_eq!(source.index_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_json_f64() {
        assert_eq!(json_f64(&serde_json::json!("1.5")), Some(1.5));
        assert_eq!(json_f64(&serde_json::json!(2)), Some(2.0));
        assert_eq!(json_f64(&serde_json::json!("-")), None);
    }
}
