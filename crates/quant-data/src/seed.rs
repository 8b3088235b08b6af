//! 내장 종목 목록과 시딩.
//!
//! 시장별 CSV(`symbol,market,co_name,exchange,industry`)를 바이너리에 포함합니다.

use serde::Deserialize;
use tracing::info;

use crate::error::{DataError, Result};
use crate::storage::{SymbolRecord, SymbolStore};
use quant_core::{market_scope, normalize_symbol, Market};

const STOCK_CODE_CN: &str = include_str!("../data/stock_code_CN.csv");
const STOCK_CODE_HK: &str = include_str!("../data/stock_code_HK.csv");
const STOCK_CODE_US: &str = include_str!("../data/stock_code_US.csv");

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvRow {
    symbol: Option<String>,
    market: Option<String>,
    co_name: Option<String>,
    exchange: Option<String>,
    cc: Option<String>,
    industry: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bundled_csv(market: Market) -> &'static str {
    match market {
        Market::Hk => STOCK_CODE_HK,
        Market::Us => STOCK_CODE_US,
        Market::Cn | Market::Sh | Market::Sz | Market::Chinext => STOCK_CODE_CN,
    }
}

/// 내장 목록에서 시장에 해당하는 종목 레코드를 만듭니다.
///
/// `CN`은 본토 세 시장 전체, `SH`/`SZ`/`300`은 해당 시장만 반환합니다.
/// 선전 종목 중 `3`으로 시작하는 코드는 `300` 시장으로 분류합니다.
pub fn bundled_symbols(market: &str) -> Result<Vec<SymbolRecord>> {
    let target = Market::parse(market)
        .ok_or_else(|| DataError::InvalidData(format!("Unsupported market: {}", market)))?;

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bundled_csv(target).as_bytes());

    let mut records = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row?;
        let Some(code) = non_blank(row.symbol) else {
            continue;
        };
        let row_market = non_blank(row.market.clone())
            .map(|m| m.to_uppercase())
            .unwrap_or_default();
        let mut market_code = if row_market.is_empty() {
            target.code().to_string()
        } else {
            row_market.clone()
        };
        if row_market == "SZ" && code.starts_with('3') {
            market_code = Market::Chinext.code().to_string();
        }
        if target != Market::Cn && market_code != target.code() {
            continue;
        }
        let Some(symbol) = normalize_symbol(&code, &market_code) else {
            continue;
        };

        let mut exchange = non_blank(row.exchange).or_else(|| non_blank(row.cc));
        if Market::parse(&market_code).is_some_and(|m| m.is_cn()) {
            exchange = exchange.or_else(|| non_blank(row.market));
        }

        records.push(SymbolRecord {
            market: market_code,
            symbol,
            name: non_blank(row.co_name),
            exchange,
            industry: non_blank(row.industry),
        });
    }
    Ok(records)
}

/// 내장 목록을 저장소에 upsert하고 영향받은 행 수를 반환합니다.
pub async fn import_symbols(store: &dyn SymbolStore, market: &str) -> Result<usize> {
    let records = bundled_symbols(market)?;
    let stats = store.upsert_symbols(records).await?;
    info!(market = market, count = stats.affected(), "종목 목록 가져오기 완료");
    Ok(stats.affected())
}

/// 시장 범위에 종목이 하나도 없을 때만 내장 목록으로 채웁니다.
///
/// 반환값은 새로 기록된 종목 수이며, 이미 있으면 0입니다.
pub async fn seed_symbols_if_empty(store: &dyn SymbolStore, market: &str) -> Result<usize> {
    let scope = market_scope(market);
    if store.has_any(&scope).await? {
        return Ok(0);
    }
    let key = market.trim().to_uppercase();
    let source_market = match key.as_str() {
        "ALL" | "A" => "CN",
        other => other,
    };
    import_symbols(store, source_market).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemorySymbolStore;

    #[test]
    fn test_bundled_cn_split_into_markets() {
        let records = bundled_symbols("CN").unwrap();
        let chinext: Vec<&SymbolRecord> = records.iter().filter(|r| r.market == "300").collect();
        assert!(chinext.iter().any(|r| r.symbol == "sz300750"));
        assert!(chinext.iter().any(|r| r.symbol == "sz399006"));
        assert!(records
            .iter()
            .any(|r| r.market == "SH" && r.symbol == "sh600036" && r.exchange.as_deref() == Some("SSE")));
    }

    #[test]
    fn test_bundled_single_market_filter() {
        let sz = bundled_symbols("sz").unwrap();
        assert!(!sz.is_empty());
        assert!(sz.iter().all(|r| r.market == "SZ" && r.symbol.starts_with("sz")));

        let us = bundled_symbols("US").unwrap();
        assert!(us.iter().any(|r| r.symbol == "usAAPL"));

        assert!(bundled_symbols("JP").is_err());
    }

    #[tokio::test]
    async fn test_seed_only_when_empty() {
        let store = MemorySymbolStore::new();
        let seeded = seed_symbols_if_empty(&store, "ALL").await.unwrap();
        assert!(seeded > 0);
        assert_eq!(seed_symbols_if_empty(&store, "CN").await.unwrap(), 0);
        assert!(store.has("300").await.unwrap());
    }
}
