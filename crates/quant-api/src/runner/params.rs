//! 작업 매개변수 파싱.
//!
//! 매개변수는 JSON 객체로 저장되며 실행 시점에 타입별 구조체로 읽습니다.
//! 빠진 값과 `null`은 기본값으로 채웁니다.

use anyhow::Context;
use chrono::NaiveDate;
use quant_analytics::{BuyFactor, GridSpec, MacdParams, SellFactor};
use quant_core::{normalize_symbols, parse_date_str};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// 작업 매개변수 객체를 타입으로 읽습니다.
pub fn parse_params<T: DeserializeOwned>(params: &Value) -> anyhow::Result<T> {
    let object = match params {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(object).context("Invalid job parameters")
}

// ==================== 공통 데이터 범위 ====================

/// 시세 조회 구간.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub n_folds: i64,
}

/// 시장, 종목, 구간 매개변수.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataParams {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub symbols: Value,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub n_folds: Option<i64>,
}

impl DataParams {
    /// 대문자 시장 코드. 비어 있으면 `default`.
    pub fn market_or(&self, default: &str) -> String {
        self.market
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default)
            .to_uppercase()
    }

    /// 정규화된 종목 목록. 비면 시장 기본 종목.
    pub fn symbols(&self, market: &str) -> Vec<String> {
        normalize_symbols(&self.symbols, market)
    }

    /// 날짜 문자열을 읽습니다. 해석할 수 없는 값은 지정하지 않은 것으로 봅니다.
    pub fn window(&self) -> DataWindow {
        let date = |raw: &Option<String>| raw.as_deref().and_then(parse_date_str);
        DataWindow {
            start: date(&self.start),
            end: date(&self.end),
            n_folds: self.n_folds.unwrap_or(1),
        }
    }
}

// ==================== 작업별 매개변수 ====================

/// `kl_update` 매개변수.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KlUpdateParams {
    #[serde(flatten)]
    pub data: DataParams,
    #[serde(default)]
    pub all: Option<bool>,
}

impl KlUpdateParams {
    pub fn all(&self) -> bool {
        self.all.unwrap_or(false)
    }
}

/// `backtest` 매개변수.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BacktestParams {
    #[serde(flatten)]
    pub data: DataParams,
    #[serde(default)]
    pub buy_xd: Option<usize>,
    #[serde(default)]
    pub stop_loss_n: Option<f64>,
    #[serde(default)]
    pub stop_win_n: Option<f64>,
    #[serde(default)]
    pub cash: Option<f64>,
    /// `macd`면 돌파 매수 대신 MACD 교차 매수
    #[serde(default)]
    pub buy_factor: Option<String>,
    /// `macd`면 ATR-N 대신 MACD 교차 매도
    #[serde(default)]
    pub sell_factor: Option<String>,
    #[serde(default)]
    pub fast_period: Option<usize>,
    #[serde(default)]
    pub slow_period: Option<usize>,
    #[serde(default)]
    pub signal_period: Option<usize>,
}

impl BacktestParams {
    pub fn buy_xd(&self) -> usize {
        self.buy_xd.unwrap_or(42)
    }

    pub fn stop_loss_n(&self) -> f64 {
        self.stop_loss_n.unwrap_or(0.5)
    }

    pub fn stop_win_n(&self) -> f64 {
        self.stop_win_n.unwrap_or(3.0)
    }

    pub fn cash(&self) -> f64 {
        self.cash.unwrap_or(1_000_000.0)
    }

    fn macd(&self) -> MacdParams {
        let defaults = MacdParams::default();
        MacdParams {
            fast_period: self.fast_period.unwrap_or(defaults.fast_period),
            slow_period: self.slow_period.unwrap_or(defaults.slow_period),
            signal_period: self.signal_period.unwrap_or(defaults.signal_period),
        }
    }

    pub fn buy_factor(&self) -> BuyFactor {
        if is_macd(&self.buy_factor) {
            BuyFactor::MacdCross(self.macd())
        } else {
            BuyFactor::Breakout { xd: self.buy_xd() }
        }
    }

    pub fn sell_factor(&self) -> SellFactor {
        if is_macd(&self.sell_factor) {
            SellFactor::MacdCross(self.macd())
        } else {
            SellFactor::AtrNStop {
                stop_loss_n: self.stop_loss_n(),
                stop_win_n: self.stop_win_n(),
            }
        }
    }
}

fn is_macd(raw: &Option<String>) -> bool {
    raw.as_deref()
        .is_some_and(|f| f.trim().eq_ignore_ascii_case("macd"))
}

/// `grid_search` 매개변수.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GridSearchParams {
    #[serde(flatten)]
    pub data: DataParams,
    #[serde(default)]
    pub cash: Option<f64>,
    #[serde(default)]
    pub buy_xd_list: Option<Vec<usize>>,
    #[serde(default)]
    pub stop_loss_n_list: Option<Vec<f64>>,
    #[serde(default)]
    pub stop_win_n_list: Option<Vec<f64>>,
    #[serde(default)]
    pub max_runs: Option<i64>,
}

impl GridSearchParams {
    pub fn cash(&self) -> f64 {
        self.cash.unwrap_or(1_000_000.0)
    }

    /// 빈 목록은 기본 목록으로 채운 그리드 정의.
    pub fn grid_spec(&self) -> GridSpec {
        let defaults = GridSpec::default();
        let max_runs = self.max_runs.unwrap_or(defaults.max_runs as i64);
        GridSpec {
            buy_xd_list: non_empty(&self.buy_xd_list).unwrap_or(defaults.buy_xd_list),
            stop_loss_n_list: non_empty(&self.stop_loss_n_list)
                .unwrap_or(defaults.stop_loss_n_list),
            stop_win_n_list: non_empty(&self.stop_win_n_list).unwrap_or(defaults.stop_win_n_list),
            max_runs: defaults.max_runs,
        }
        .with_max_runs(max_runs)
    }
}

fn non_empty<T: Clone>(list: &Option<Vec<T>>) -> Option<Vec<T>> {
    list.as_ref().filter(|items| !items.is_empty()).cloned()
}

/// `analysis` 매개변수.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisParams {
    #[serde(flatten)]
    pub data: DataParams,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub options: Option<Map<String, Value>>,
}

impl AnalysisParams {
    pub fn tool(&self) -> String {
        self.tool.as_deref().unwrap_or_default().trim().to_lowercase()
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(200).max(1)
    }

    pub fn options(&self) -> Map<String, Value> {
        self.options.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_params_defaults() {
        let params: KlUpdateParams = parse_params(&json!({})).unwrap();
        assert_eq!(params.data.market_or("CN"), "CN");
        assert!(!params.all());
        let window = params.data.window();
        assert_eq!(window.n_folds, 1);
        assert!(window.start.is_none());
        // 기본 종목으로 채움
        assert!(!params.data.symbols("CN").is_empty());
    }

    #[test]
    fn test_data_params_nulls_and_bad_dates() {
        let params: KlUpdateParams = parse_params(&json!({
            "market": "sh",
            "symbols": "600036",
            "start": "not-a-date",
            "end": "2024-03-01",
            "n_folds": null,
            "all": null
        }))
        .unwrap();
        assert_eq!(params.data.market_or("CN"), "SH");
        assert_eq!(params.data.symbols("SH"), vec!["sh600036".to_string()]);
        let window = params.data.window();
        assert!(window.start.is_none());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn test_backtest_factor_selection() {
        let params: BacktestParams = parse_params(&json!({
            "buy_factor": "MACD",
            "fast_period": 5
        }))
        .unwrap();
        assert_eq!(
            params.buy_factor(),
            BuyFactor::MacdCross(MacdParams {
                fast_period: 5,
                slow_period: 26,
                signal_period: 9
            })
        );
        assert_eq!(
            params.sell_factor(),
            SellFactor::AtrNStop {
                stop_loss_n: 0.5,
                stop_win_n: 3.0
            }
        );
        assert_eq!(params.cash(), 1_000_000.0);
    }

    #[test]
    fn test_grid_spec_fills_empty_lists() {
        let params: GridSearchParams = parse_params(&json!({
            "buy_xd_list": [],
            "stop_win_n_list": [1.5],
            "max_runs": 1000
        }))
        .unwrap();
        let spec = params.grid_spec();
        assert_eq!(spec.buy_xd_list, vec![20, 42, 60]);
        assert_eq!(spec.stop_win_n_list, vec![1.5]);
        assert_eq!(spec.max_runs, 200);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let err = parse_params::<BacktestParams>(&json!({"buy_xd": "abc"})).unwrap_err();
        assert!(err.to_string().contains("Invalid job parameters"));
    }

    #[test]
    fn test_analysis_params() {
        let params: AnalysisParams = parse_params(&json!({
            "tool": " Jump ",
            "options": {"mode": "gap"}
        }))
        .unwrap();
        assert_eq!(params.tool(), "jump");
        assert_eq!(params.limit(), 200);
        assert_eq!(params.data.market_or("US"), "US");
        assert_eq!(params.options()["mode"], "gap");
    }
}
