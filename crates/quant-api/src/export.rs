//! 작업 결과 내보내기 (JSON / CSV).
//!
//! CSV는 UTF-8 BOM과 CRLF 줄바꿈을 사용합니다.
//!
//! | 결과 형태            | CSV                                      |
//! |----------------------|------------------------------------------|
//! | 객체 배열            | 첫 등장 순서의 키 합집합을 헤더로 사용    |
//! | 객체                 | `key,value` 행                           |
//! | 그 외                | `value` 단일 열                          |

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{api_error, bad_request, internal_error, ApiError, ApiResult};
use crate::repository::Job;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 내보내기 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(bad_request("Unsupported format")),
        }
    }
}

/// 작업 결과를 내려받기 응답으로 만듭니다.
pub fn export_job(job: &Job, format: &str, section: Option<&str>) -> ApiResult<Response> {
    let format: ExportFormat = format.parse()?;

    let result = match &job.result {
        Some(result) if job.has_result() => result,
        _ => {
            return Err(api_error(
                StatusCode::CONFLICT,
                "NO_RESULT",
                "Job has no result yet",
            ))
        }
    };

    let section = section.map(str::trim).filter(|s| !s.is_empty());
    let (payload, stem) = match (section, result) {
        (Some(name), Value::Object(map)) if map.contains_key(name) => {
            (&map[name], format!("job_{}_{}", job.id, sanitize(name)))
        }
        _ => (result, format!("job_{}", job.id)),
    };

    match format {
        ExportFormat::Json => {
            let body = serde_json::to_vec_pretty(payload).map_err(internal_error)?;
            Ok(attachment(body, "application/json", &format!("{}.json", stem)))
        }
        ExportFormat::Csv => {
            let body = render_csv(payload).map_err(internal_error)?;
            Ok(attachment(body, "text/csv; charset=utf-8", &format!("{}.csv", stem)))
        }
    }
}

/// JSON 값을 CSV 바이트로 렌더링합니다.
pub fn render_csv(value: &Value) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .flexible(true)
        .from_writer(UTF8_BOM.to_vec());

    match value {
        Value::Array(items) if items.first().is_some_and(Value::is_object) => {
            let columns = union_keys(items);
            writer.write_record(&columns)?;
            for item in items {
                let row: Vec<String> = match item {
                    Value::Object(map) => columns
                        .iter()
                        .map(|c| map.get(c).map(cell).unwrap_or_default())
                        .collect(),
                    other => vec![cell(other)],
                };
                writer.write_record(&row)?;
            }
        }
        Value::Object(map) => {
            writer.write_record(["key", "value"])?;
            for (key, value) in map {
                writer.write_record([key.as_str(), cell(value).as_str()])?;
            }
        }
        Value::Array(items) => {
            writer.write_record(["value"])?;
            for item in items {
                writer.write_record([cell(item)])?;
            }
        }
        other => {
            writer.write_record(["value"])?;
            writer.write_record([cell(other)])?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

// ==================== 헬퍼 함수 ====================

/// 객체 배열의 키 합집합 (첫 등장 순서).
fn union_keys(items: &[Value]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for map in items.iter().filter_map(Value::as_object) {
        for key in map.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// CSV 셀 문자열. `null`은 빈 칸, 중첩 값은 JSON 문자열.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn attachment(body: Vec<u8>, content_type: &'static str, filename: &str) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{JobStatus, JobType};
    use chrono::Utc;
    use serde_json::json;

    fn job(result: Option<Value>) -> Job {
        let now = Utc::now();
        Job {
            id: 7,
            job_type: JobType::Backtest,
            status: JobStatus::Succeeded,
            params: json!({}),
            result,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn text(bytes: &[u8]) -> &str {
        assert!(bytes.starts_with(UTF8_BOM));
        std::str::from_utf8(&bytes[UTF8_BOM.len()..]).unwrap()
    }

    #[test]
    fn test_csv_list_of_objects_unions_keys() {
        let value = json!([{"x": 1, "y": 2}, {"y": 3, "z": null}, {"x": {"n": 1}}]);
        let bytes = render_csv(&value).unwrap();
        assert_eq!(text(&bytes), "x,y,z\r\n1,2,\r\n,3,\r\n\"{\"\"n\"\":1}\",,\r\n");
    }

    #[test]
    fn test_csv_object_as_key_value() {
        let bytes = render_csv(&json!({"rows": 10, "missing": ["a"], "ok": true})).unwrap();
        let text = text(&bytes);
        assert!(text.starts_with("key,value\r\n"));
        assert!(text.contains("rows,10\r\n"));
        assert!(text.contains("ok,true\r\n"));
        assert!(text.contains("missing,\"[\"\"a\"\"]\"\r\n"));
    }

    #[test]
    fn test_csv_scalar_list() {
        let bytes = render_csv(&json!(["a", 1])).unwrap();
        assert_eq!(text(&bytes), "value\r\na\r\n1\r\n");
    }

    #[test]
    fn test_export_section_and_filename() {
        let job = job(Some(json!({"a": [{"x": 1, "y": 2}], "b": 1})));
        let response = export_job(&job, "CSV", Some("a")).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert_eq!(disposition, "attachment; filename=\"job_7_a.csv\"");

        // 없는 section은 무시
        let response = export_job(&job, "json", Some("missing")).unwrap();
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert_eq!(disposition, "attachment; filename=\"job_7.json\"");
    }

    #[test]
    fn test_export_rejects_empty_and_bad_format() {
        for empty in [None, Some(json!(null)), Some(json!({})), Some(json!([]))] {
            let err = export_job(&job(empty), "json", None).unwrap_err();
            assert_eq!(err.0, StatusCode::CONFLICT);
        }

        let err = export_job(&job(Some(json!({"a": 1}))), "xlsx", None).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1.message(), "Unsupported format");
    }
}
