//! 거래일 파싱과 조회 구간 계산.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// 1 fold에 해당하는 일수.
pub const DAYS_PER_FOLD: i64 = 365;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];

/// `YYYY-MM-DD`, `YYYYMMDD`, `YYYY/MM/DD` 형식의 날짜를 파싱합니다.
pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// 거래일 값을 파싱합니다.
///
/// 문자열 날짜 형식 외에 ISO 일시와 `20240105` 같은 정수도 받습니다.
pub fn parse_trade_date(raw: &Value) -> Option<NaiveDate> {
    match raw {
        Value::String(s) => parse_date_str(s).or_else(|| parse_datetime_str(s)),
        Value::Number(n) => {
            let n = n.as_i64()?;
            NaiveDate::parse_from_str(&n.to_string(), "%Y%m%d").ok()
        }
        _ => None,
    }
}

fn parse_datetime_str(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}

/// 오늘 날짜 기준으로 조회 구간을 계산합니다.
pub fn resolve_date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    n_folds: i64,
) -> (NaiveDate, NaiveDate) {
    resolve_date_range_at(start, end, n_folds, Utc::now().date_naive())
}

/// 주어진 `today` 기준으로 조회 구간을 계산합니다.
///
/// - 종료일 기본값은 오늘이며 오늘을 넘지 않습니다.
/// - 시작일 기본값은 종료일에서 `365 × max(1, n_folds)`일 전입니다.
/// - 시작일이 종료일보다 늦으면 기본 시작일로 되돌립니다.
pub fn resolve_date_range_at(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    n_folds: i64,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let end = end.map(|e| e.min(today)).unwrap_or(today);
    let folds = n_folds.max(1);
    let default_start = end - Duration::days(DAYS_PER_FOLD * folds);
    let start = match start {
        Some(s) if s <= end => s,
        _ => default_start,
    };
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_date_str_formats() {
        assert_eq!(parse_date_str("2024-01-05"), Some(d(2024, 1, 5)));
        assert_eq!(parse_date_str("20240105"), Some(d(2024, 1, 5)));
        assert_eq!(parse_date_str("2024/01/05"), Some(d(2024, 1, 5)));
        assert_eq!(parse_date_str("05.01.2024"), None);
        assert_eq!(parse_date_str(""), None);
    }

    #[test]
    fn test_parse_trade_date_variants() {
        assert_eq!(parse_trade_date(&json!(20240105)), Some(d(2024, 1, 5)));
        assert_eq!(parse_trade_date(&json!("2024-01-05T00:00:00")), Some(d(2024, 1, 5)));
        assert_eq!(parse_trade_date(&json!("2024-01-05T09:30:00+08:00")), Some(d(2024, 1, 5)));
        assert_eq!(parse_trade_date(&json!(null)), None);
    }

    #[test]
    fn test_resolve_defaults() {
        let today = d(2024, 6, 30);
        let (start, end) = resolve_date_range_at(None, None, 0, today);
        assert_eq!(end, today);
        assert_eq!(start, today - Duration::days(365));

        let (start, _) = resolve_date_range_at(None, None, 3, today);
        assert_eq!(start, today - Duration::days(365 * 3));
    }

    #[test]
    fn test_resolve_clamps_end_and_resets_start() {
        let today = d(2024, 6, 30);
        let (start, end) = resolve_date_range_at(Some(d(2025, 1, 1)), Some(d(2030, 1, 1)), 1, today);
        assert_eq!(end, today);
        assert_eq!(start, today - Duration::days(365));

        let (start, end) = resolve_date_range_at(Some(d(2024, 1, 1)), Some(d(2024, 3, 1)), 1, today);
        assert_eq!((start, end), (d(2024, 1, 1), d(2024, 3, 1)));
    }
}
