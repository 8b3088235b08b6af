//! 종목 코드 정규화와 시장 테이블.
//!
//! 사용자가 입력한 종목 코드를 시장 접두사가 붙은 정규 형태로 바꿉니다.
//! (`AAPL` + `US` → `usAAPL`, `600036` + `CN` → `sh600036`)
//! 모든 함수는 순수 함수이며 멱등입니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 인식하는 시장 접두사.
pub const SYMBOL_PREFIXES: [&str; 4] = ["us", "hk", "sh", "sz"];

/// 이름/업종에 포함되면 지수로 취급하는 표식.
pub const INDEX_MARKER: &str = "指数";

/// 시장 코드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum Market {
    /// 미국
    #[serde(rename = "US")]
    Us,
    /// 홍콩
    #[serde(rename = "HK")]
    Hk,
    /// 중국 본토 전체 (상하이/선전 자동 판별)
    #[serde(rename = "CN")]
    Cn,
    /// 상하이
    #[serde(rename = "SH")]
    Sh,
    /// 선전
    #[serde(rename = "SZ")]
    Sz,
    /// 선전 창업판
    #[serde(rename = "300")]
    Chinext,
}

impl Market {
    /// 대소문자와 공백을 무시하고 시장 코드를 해석합니다.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "US" => Some(Self::Us),
            "HK" => Some(Self::Hk),
            "CN" => Some(Self::Cn),
            "SH" => Some(Self::Sh),
            "SZ" => Some(Self::Sz),
            "300" => Some(Self::Chinext),
            _ => None,
        }
    }

    /// 저장소에 기록되는 시장 코드.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Hk => "HK",
            Self::Cn => "CN",
            Self::Sh => "SH",
            Self::Sz => "SZ",
            Self::Chinext => "300",
        }
    }

    /// 중국 본토 시장 여부.
    pub fn is_cn(&self) -> bool {
        matches!(self, Self::Cn | Self::Sh | Self::Sz | Self::Chinext)
    }

    /// 입력이 비었을 때 사용할 기본 종목.
    pub fn default_symbols(&self) -> &'static [&'static str] {
        match self {
            Self::Us => &["usAAPL"],
            Self::Hk => &["hk00700"],
            Self::Cn | Self::Sh => &["sh600036"],
            Self::Sz => &["sz000001"],
            Self::Chinext => &["sz300750"],
        }
    }

    /// 백테스트 기준 지수.
    pub fn default_benchmark(&self) -> &'static str {
        match self {
            Self::Us => "usSPY",
            Self::Hk => "hk00001",
            Self::Cn | Self::Sh => "sh000001",
            Self::Sz => "sz399001",
            Self::Chinext => "sz399006",
        }
    }

    /// 종목 목록 조회/시딩에 사용하는 실제 시장 범위.
    pub fn scope(&self) -> Vec<Market> {
        match self {
            Self::Cn => vec![Self::Sh, Self::Sz, Self::Chinext],
            other => vec![*other],
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 종목 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum SymbolKind {
    Stock,
    Index,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Index => "index",
        }
    }
}

/// 원시 입력을 종목 토큰 목록으로 나눕니다.
///
/// 문자열은 공백, `,`, `;` 기준으로 나누고 배열은 원소별로 문자열화합니다.
/// 빈 토큰은 버립니다.
pub fn split_symbols(raw: &Value) -> Vec<String> {
    match raw {
        Value::Null => Vec::new(),
        Value::String(s) => split_symbol_str(s),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let token = match item {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (!token.is_empty()).then_some(token)
            })
            .collect(),
        other => split_symbol_str(&other.to_string()),
    }
}

/// 구분자 문자열을 종목 토큰으로 나눕니다.
pub fn split_symbol_str(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// 알려진 접두사가 붙어 있으면 (소문자 접두사, 나머지)를 반환합니다.
fn split_prefix(token: &str) -> Option<(&'static str, &str)> {
    SYMBOL_PREFIXES.iter().find_map(|prefix| {
        let head = token.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix)
            .then(|| (*prefix, &token[prefix.len()..]))
    })
}

/// 단일 종목 코드를 정규화합니다.
///
/// 알 수 없는 시장 코드면 입력을 그대로 돌려줍니다.
pub fn normalize_symbol(token: &str, market: &str) -> Option<String> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    if let Some((prefix, rest)) = split_prefix(token) {
        let rest = if prefix == "us" {
            rest.to_uppercase()
        } else {
            rest.to_string()
        };
        return Some(format!("{}{}", prefix, rest));
    }

    let normalized = match Market::parse(market) {
        Some(Market::Us) => format!("us{}", token.to_uppercase()),
        Some(Market::Hk) => format!("hk{}", token),
        Some(Market::Cn) => {
            if token.starts_with('6') {
                format!("sh{}", token)
            } else {
                format!("sz{}", token)
            }
        }
        Some(Market::Sh) => format!("sh{}", token),
        Some(Market::Sz) | Some(Market::Chinext) => format!("sz{}", token),
        None => token.to_string(),
    };
    Some(normalized)
}

/// 원시 입력을 정규화된 종목 목록으로 바꿉니다.
///
/// 결과가 비면 시장 기본 종목(알 수 없는 시장은 미국 기본 종목)을 반환합니다.
pub fn normalize_symbols(raw: &Value, market: &str) -> Vec<String> {
    let symbols: Vec<String> = split_symbols(raw)
        .iter()
        .filter_map(|token| normalize_symbol(token, market))
        .collect();

    if symbols.is_empty() {
        let market = Market::parse(market).unwrap_or(Market::Us);
        return market
            .default_symbols()
            .iter()
            .map(|s| s.to_string())
            .collect();
    }
    symbols
}

/// 정규화된 종목 코드에서 저장 시장을 추론합니다.
pub fn market_from_symbol(symbol: &str) -> Market {
    match split_prefix(symbol) {
        Some(("sh", _)) => Market::Sh,
        Some(("sz", rest)) if rest.starts_with('3') => Market::Chinext,
        Some(("sz", _)) => Market::Sz,
        Some(("hk", _)) => Market::Hk,
        Some(("us", _)) => Market::Us,
        _ => Market::Cn,
    }
}

/// 시장 기준 지수 (알 수 없는 시장은 중국 기준).
pub fn default_benchmark(market: &str) -> &'static str {
    Market::parse(market)
        .unwrap_or(Market::Cn)
        .default_benchmark()
}

/// 접두사 규칙으로 지수 종목인지 판별합니다.
pub fn is_index_symbol(symbol: &str) -> bool {
    let lower = symbol.trim().to_lowercase();
    lower.starts_with("sh000") || lower.starts_with("sz399")
}

/// 접두사 규칙과 이름/업종 표식으로 종목 종류를 판별합니다.
pub fn symbol_kind(symbol: &str, name: Option<&str>, industry: Option<&str>) -> SymbolKind {
    let marked = |text: Option<&str>| text.is_some_and(|t| t.contains(INDEX_MARKER));
    if is_index_symbol(symbol) || marked(name) || marked(industry) {
        SymbolKind::Index
    } else {
        SymbolKind::Stock
    }
}

/// 시장 범위를 시장 코드 목록으로 펼칩니다.
///
/// `CN`, `ALL`, `A`는 중국 본토 세 시장으로 펼치고 그 외 코드는 대문자로 그대로 둡니다.
pub fn market_scope(market: &str) -> Vec<String> {
    let key = market.trim().to_uppercase();
    match key.as_str() {
        "CN" | "ALL" | "A" => Market::Cn.scope().iter().map(|m| m.code().to_string()).collect(),
        _ => vec![key],
    }
}
