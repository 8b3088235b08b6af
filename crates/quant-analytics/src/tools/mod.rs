//! 분석 도구 디스패치.
//!
//! 도구 이름(별칭 포함)으로 계산을 선택하고, 캐시에서만 일봉을 읽어 JSON 결과를 만듭니다.
//! 시계열 출력은 [`stride_sample`](crate::sampling::stride_sample)로 `limit`개 이하로 줄입니다.

pub mod correlation;
pub mod golden;
pub mod jump;
pub mod regress;
pub mod speed;
pub mod stats;
pub mod trend_line;

use async_trait::async_trait;
use quant_core::{default_benchmark, normalize_symbol};
use quant_data::KlineRow;
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::error::{AnalysisError, AnalysisResult};
use crate::frame::KlineFrame;
use crate::sampling::{series_points, stride_sample, DEFAULT_SAMPLE_LIMIT};

/// 분석 도구.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisTool {
    SupportResistance,
    JumpGap,
    TrendSpeed,
    ShiftDistance,
    Regress,
    GoldenRatio,
    Correlation,
    Distance,
    PChangeStats,
    DateWeekWave,
    DateWeekWin,
    BcutChangeVc,
    QcutChangeVc,
    WaveChangeRate,
}

impl AnalysisTool {
    /// 모든 도구 (대표 이름 순).
    pub const ALL: [AnalysisTool; 14] = [
        Self::SupportResistance,
        Self::JumpGap,
        Self::TrendSpeed,
        Self::ShiftDistance,
        Self::Regress,
        Self::GoldenRatio,
        Self::Correlation,
        Self::Distance,
        Self::PChangeStats,
        Self::DateWeekWave,
        Self::DateWeekWin,
        Self::BcutChangeVc,
        Self::QcutChangeVc,
        Self::WaveChangeRate,
    ];

    /// 대표 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupportResistance => "support_resistance",
            Self::JumpGap => "jump_gap",
            Self::TrendSpeed => "trend_speed",
            Self::ShiftDistance => "shift_distance",
            Self::Regress => "regress",
            Self::GoldenRatio => "golden_ratio",
            Self::Correlation => "correlation",
            Self::Distance => "distance",
            Self::PChangeStats => "p_change_stats",
            Self::DateWeekWave => "date_week_wave",
            Self::DateWeekWin => "date_week_win",
            Self::BcutChangeVc => "bcut_change_vc",
            Self::QcutChangeVc => "qcut_change_vc",
            Self::WaveChangeRate => "wave_change_rate",
        }
    }

    /// 여러 종목의 통계를 함께 내는 도구인지.
    fn is_stats(&self) -> bool {
        matches!(
            self,
            Self::PChangeStats
                | Self::DateWeekWave
                | Self::DateWeekWin
                | Self::BcutChangeVc
                | Self::QcutChangeVc
                | Self::WaveChangeRate
        )
    }
}

impl fmt::Display for AnalysisTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisTool {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tool = match s.trim().to_lowercase().as_str() {
            "support_resistance" | "support" | "resistance" => Self::SupportResistance,
            "jump_gap" | "jump" => Self::JumpGap,
            "trend_speed" | "pair_speed" => Self::TrendSpeed,
            "shift_distance" => Self::ShiftDistance,
            "regress" | "price_channel" => Self::Regress,
            "golden_ratio" | "golden" => Self::GoldenRatio,
            "correlation" => Self::Correlation,
            "distance" => Self::Distance,
            "p_change_stats" => Self::PChangeStats,
            "date_week_wave" => Self::DateWeekWave,
            "date_week_win" => Self::DateWeekWin,
            "bcut_change_vc" => Self::BcutChangeVc,
            "qcut_change_vc" => Self::QcutChangeVc,
            "wave_change_rate" => Self::WaveChangeRate,
            _ => return Err(AnalysisError::UnsupportedTool(s.to_string())),
        };
        Ok(tool)
    }
}

/// 종목 일봉 로더. 분석은 캐시에서만 읽습니다.
#[async_trait]
pub trait KlineLoader: Send + Sync {
    /// 조회 구간의 일봉. 없으면 `None` 또는 빈 벡터.
    async fn load(&self, symbol: &str) -> Option<Vec<KlineRow>>;
}

/// 분석 요청.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// 요청한 도구 이름 (소문자, 별칭 그대로)
    pub tool: String,
    pub market: String,
    pub symbols: Vec<String>,
    pub limit: usize,
    pub options: Map<String, Value>,
}

impl AnalysisRequest {
    pub fn new(tool: impl Into<String>, market: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            tool: tool.into().trim().to_lowercase(),
            market: market.into(),
            symbols,
            limit: DEFAULT_SAMPLE_LIMIT,
            options: Map::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    fn options(&self) -> Options<'_> {
        Options(&self.options)
    }
}

/// 분석을 실행합니다.
#[instrument(skip(request, loader), fields(tool = %request.tool))]
pub async fn run_analysis(
    request: &AnalysisRequest,
    loader: &dyn KlineLoader,
) -> AnalysisResult<Value> {
    let tool: AnalysisTool = request.tool.parse()?;
    let first = request
        .symbols
        .first()
        .cloned()
        .ok_or(AnalysisError::NoSymbols)?;
    let options = request.options();
    let limit = request.limit;
    debug!(%tool, symbols = request.symbols.len(), "분석 시작");

    if tool.is_stats() {
        let frames = load_frames(loader, &request.symbols).await;
        if frames.is_empty() {
            return Err(AnalysisError::NoDataForSymbols);
        }
        let mut payload = stats::run(tool, &frames)?;
        payload.insert("tool".into(), json!(request.tool));
        return Ok(Value::Object(payload));
    }

    match tool {
        AnalysisTool::Correlation | AnalysisTool::Distance => {
            let frames = load_frames(loader, &request.symbols).await;
            if frames.len() < 2 {
                return Err(AnalysisError::NotEnoughSymbols);
            }
            let field = options.str_or("field", "p_change");
            let matrix = if tool == AnalysisTool::Correlation {
                correlation::corr_matrix(&frames, &field, &options.str_or("corr_type", "pears"))?
            } else {
                correlation::distance_matrix(
                    &frames,
                    &field,
                    &options.str_or("distance_type", "manhattan"),
                )?
            };
            Ok(json!({"tool": request.tool, "field": field, "matrix": matrix}))
        }
        AnalysisTool::TrendSpeed => {
            let benchmark = resolve_benchmark(request);
            let frame = load_frame(loader, &first).await;
            let bench = load_frame(loader, &benchmark).await;
            let (Some(frame), Some(bench)) = (frame, bench) else {
                return Err(AnalysisError::MissingSpeedData);
            };
            let resample = options.usize_or("resample", 5);
            let speed_key = options.str_or("speed_key", "close");
            let result = speed::compare(&frame, &bench, resample, &speed_key)?;
            Ok(json!({
                "tool": request.tool,
                "symbol": first,
                "benchmark": benchmark,
                "speed": result.speed,
                "benchmark_speed": result.benchmark_speed,
                "corr": result.corr,
            }))
        }
        _ => {
            let frame = load_frame(loader, &first)
                .await
                .ok_or_else(|| AnalysisError::NoData(first.clone()))?;
            single_symbol(tool, request, &frame, &options, limit)
        }
    }
}

fn single_symbol(
    tool: AnalysisTool,
    request: &AnalysisRequest,
    frame: &KlineFrame,
    options: &Options<'_>,
    limit: usize,
) -> AnalysisResult<Value> {
    let symbol = &frame.symbol;
    let close_points = || series_points(&frame.dates, &frame.close, limit);
    let payload = match tool {
        AnalysisTool::SupportResistance => {
            let only_last = options.truthy_or("only_last", true);
            json!({
                "tool": request.tool,
                "symbol": symbol,
                "trend_lines": trend_line::support_resistance(&frame.close, only_last),
                "close": close_points(),
            })
        }
        AnalysisTool::JumpGap => {
            let mode = jump::JumpMode::parse(&options.str_or("mode", "stats"));
            let params = jump::JumpParams {
                jump_diff_factor: options.f64_or("jump_diff_factor", 1.0),
                power_threshold: options.f64_or("power_threshold", 2.0),
                weight: options.pair_or("weight", (0.5, 0.5)),
            };
            let rows = jump::calc(frame, mode, &params);
            json!({
                "tool": request.tool,
                "symbol": symbol,
                "mode": mode.as_str(),
                "rows": stride_sample(&rows, limit),
            })
        }
        AnalysisTool::ShiftDistance => {
            let step_x = options.f64_or("step_x", 1.0);
            let how = trend_line::ShiftHow::parse(&options.str_or("mode", "close"));
            json!({
                "tool": request.tool,
                "symbol": symbol,
                "segments": trend_line::shift_distance(&frame.close, how, step_x),
            })
        }
        AnalysisTool::Regress => {
            let mode = options.str_or("mode", "best");
            let mut payload = Map::new();
            payload.insert("tool".into(), json!(request.tool));
            payload.insert("symbol".into(), json!(symbol));
            payload.insert("mode".into(), json!(mode));
            match mode.as_str() {
                "least" => {
                    payload.insert("least_poly".into(), json!(regress::least_valid_poly(&frame.close)));
                }
                "best" => {
                    payload.insert("best_poly".into(), json!(regress::best_poly(&frame.close)));
                }
                _ => {
                    payload.insert(
                        "channel".into(),
                        json!(regress::regress_channel(&frame.close, limit)),
                    );
                }
            }
            payload.insert("close".into(), json!(close_points()));
            Value::Object(payload)
        }
        AnalysisTool::GoldenRatio => json!({
            "tool": request.tool,
            "symbol": symbol,
            "golden": golden::golden_points(&frame.close),
            "golden_ex": golden::golden_points_ex(&frame.close),
        }),
        other => return Err(AnalysisError::UnsupportedTool(other.to_string())),
    };
    Ok(payload)
}

// ==================== 헬퍼 함수 ====================

async fn load_frame(loader: &dyn KlineLoader, symbol: &str) -> Option<KlineFrame> {
    let rows = loader.load(symbol).await?;
    KlineFrame::from_rows(symbol, &rows)
}

/// 데이터가 있는 종목만 요청 순서대로 반환합니다. 중복 종목은 한 번만 읽습니다.
async fn load_frames(loader: &dyn KlineLoader, symbols: &[String]) -> Vec<KlineFrame> {
    let mut frames: Vec<KlineFrame> = Vec::new();
    for symbol in symbols {
        if frames.iter().any(|f| &f.symbol == symbol) {
            continue;
        }
        if let Some(frame) = load_frame(loader, symbol).await {
            frames.push(frame);
        }
    }
    frames
}

/// 옵션의 벤치마크 → 두 번째 종목 → 시장 기본 벤치마크.
fn resolve_benchmark(request: &AnalysisRequest) -> String {
    let fallback = default_benchmark(&request.market).to_string();
    let raw = request
        .options
        .get("benchmark")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .or_else(|| request.symbols.get(1).cloned());
    raw.and_then(|s| normalize_symbol(&s, &request.market))
        .unwrap_or(fallback)
}

/// 느슨한 옵션 접근자. 문자열로 들어온 숫자도 받아들입니다.
pub(crate) struct Options<'a>(&'a Map<String, Value>);

impl Options<'_> {
    fn str_or(&self, key: &str, default: &str) -> String {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(value_f64).unwrap_or(default)
    }

    fn usize_or(&self, key: &str, default: usize) -> usize {
        self.0
            .get(key)
            .and_then(value_f64)
            .filter(|v| *v >= 1.0)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    /// 불리언 또는 `true/1/yes/y` 문자열.
    fn truthy_or(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => {
                matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "y")
            }
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }

    /// 두 원소 배열. 형식이 다르면 기본값.
    fn pair_or(&self, key: &str, default: (f64, f64)) -> (f64, f64) {
        match self.0.get(key).and_then(Value::as_array) {
            Some(items) if items.len() == 2 => {
                match (value_f64(&items[0]), value_f64(&items[1])) {
                    (Some(a), Some(b)) => (a, b),
                    _ => default,
                }
            }
            _ => default,
        }
    }
}

fn value_f64(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}


#[cfg(test)]
mod tests {
    use super::testing::MapLoader;
    use super::*;
    use crate::frame::testing::rows;

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + 10.0 * ((i as f64) / 8.0).sin() + i as f64 * 0.1)
            .collect()
    }

    #[test]
    fn test_tool_aliases() {
        assert_eq!("support".parse::<AnalysisTool>().unwrap(), AnalysisTool::SupportResistance);
        assert_eq!("JUMP".parse::<AnalysisTool>().unwrap(), AnalysisTool::JumpGap);
        assert_eq!("pair_speed".parse::<AnalysisTool>().unwrap(), AnalysisTool::TrendSpeed);
        assert_eq!("price_channel".parse::<AnalysisTool>().unwrap(), AnalysisTool::Regress);
        assert_eq!("golden".parse::<AnalysisTool>().unwrap(), AnalysisTool::GoldenRatio);
        assert!("nope".parse::<AnalysisTool>().is_err());
        for tool in AnalysisTool::ALL {
            assert_eq!(tool.as_str().parse::<AnalysisTool>().unwrap(), tool);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let request = AnalysisRequest::new("nope", "US", vec!["usAAPL".into()]);
        let err = run_analysis(&request, &MapLoader::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported analysis tool");
    }

    #[tokio::test]
    async fn test_missing_data_names_symbol() {
        let request = AnalysisRequest::new("golden", "US", vec!["usAAPL".into()]);
        let err = run_analysis(&request, &MapLoader::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "No data for usAAPL");
    }

    #[tokio::test]
    async fn test_support_resistance_payload_is_sampled() {
        let loader = MapLoader::default().with("usAAPL", rows("usAAPL", &wave(500)));
        let request = AnalysisRequest::new("support_resistance", "US", vec!["usAAPL".into()])
            .with_limit(100);
        let payload = run_analysis(&request, &loader).await.unwrap();
        assert_eq!(payload["tool"], "support_resistance");
        assert_eq!(payload["symbol"], "usAAPL");
        let close = payload["close"].as_array().unwrap();
        assert!(close.len() <= 100);
        assert_eq!(close[0]["x"], "2024-01-01");
        assert!(payload["trend_lines"].is_array());
    }

    #[tokio::test]
    async fn test_correlation_requires_two_symbols() {
        let loader = MapLoader::default().with("usAAPL", rows("usAAPL", &wave(50)));
        let request =
            AnalysisRequest::new("correlation", "US", vec!["usAAPL".into(), "usMSFT".into()]);
        let err = run_analysis(&request, &loader).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Correlation tools require at least two symbols"
        );
    }

    #[tokio::test]
    async fn test_trend_speed_uses_second_symbol_as_benchmark() {
        let loader = MapLoader::default()
            .with("usAAPL", rows("usAAPL", &wave(60)))
            .with("usMSFT", rows("usMSFT", &wave(60)));
        let request =
            AnalysisRequest::new("trend_speed", "US", vec!["usAAPL".into(), "usMSFT".into()]);
        let payload = run_analysis(&request, &loader).await.unwrap();
        assert_eq!(payload["benchmark"], "usMSFT");
        assert!((payload["corr"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_trend_speed_missing_benchmark() {
        let loader = MapLoader::default().with("usAAPL", rows("usAAPL", &wave(60)));
        let request = AnalysisRequest::new("trend_speed", "US", vec!["usAAPL".into()]);
        let err = run_analysis(&request, &loader).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing kline data for speed comparison");
    }

    #[tokio::test]
    async fn test_stats_tool_without_data() {
        let request = AnalysisRequest::new("p_change_stats", "US", vec!["usAAPL".into()]);
        let err = run_analysis(&request, &MapLoader::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "No data for requested symbols");
    }

    #[test]
    fn test_options_accessors() {
        let map = json!({
            "only_last": "Yes",
            "step_x": "2.5",
            "weight": [0.3, 0.7],
            "bad_weight": [1.0],
            "resample": 0,
        });
        let opts = Options(map.as_object().unwrap());
        assert!(opts.truthy_or("only_last", false));
        assert!(opts.truthy_or("missing", true));
        assert_eq!(opts.f64_or("step_x", 1.0), 2.5);
        assert_eq!(opts.pair_or("weight", (0.5, 0.5)), (0.3, 0.7));
        assert_eq!(opts.pair_or("bad_weight", (0.5, 0.5)), (0.5, 0.5));
        assert_eq!(opts.usize_or("resample", 5), 5);
    }
}
