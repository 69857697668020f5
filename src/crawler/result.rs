//! Result assembly
//!
//! Turns the value returned by a page function into dataset records. Every record
//! carries the `#error` flag and `#debug` request metadata; these are applied last so
//! they win over fields of the same name in the extraction result. Lineage is not part
//! of `#debug` and never reaches the dataset.

use crate::request::CrawlRequest;
use crate::ScraperError;
use serde::Serialize;
use serde_json::{Map, Value};

/// One emitted dataset record
pub type OutputRecord = Map<String, Value>;

/// Key of the error flag in every record
pub const ERROR_KEY: &str = "#error";

/// Key of the request metadata in every record
pub const DEBUG_KEY: &str = "#debug";

/// Request metadata attached to every record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub url: String,
    pub method: String,
    pub retry_count: u32,
    pub error_messages: Vec<String>,
    pub request_id: String,
}

impl DebugInfo {
    pub fn from_request(request: &CrawlRequest) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            retry_count: request.retry_count,
            error_messages: request.error_messages.clone(),
            request_id: request.id.clone(),
        }
    }
}

/// Assembles the dataset records for one request
///
/// `None` and `null` become a single empty record. An object yields one record, an
/// array one record per element (`null` elements become empty records). Any other
/// value, at the top level or inside an array, fails with
/// [`ScraperError::InvalidResultType`].
pub fn assemble(
    request: &CrawlRequest,
    result: Option<Value>,
    is_error: bool,
) -> Result<Vec<OutputRecord>, ScraperError> {
    let items = match result.unwrap_or(Value::Null) {
        Value::Null => vec![Map::new()],
        Value::Object(object) => vec![object],
        Value::Array(values) => values
            .into_iter()
            .map(into_object)
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(ScraperError::InvalidResultType {
                found: type_name(&other),
            })
        }
    };

    let debug = serde_json::to_value(DebugInfo::from_request(request))?;

    Ok(items
        .into_iter()
        .map(|mut record| {
            record.insert(ERROR_KEY.to_string(), Value::Bool(is_error));
            record.insert(DEBUG_KEY.to_string(), debug.clone());
            record
        })
        .collect())
}

fn into_object(value: Value) -> Result<OutputRecord, ScraperError> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(object) => Ok(object),
        other => Err(ScraperError::InvalidResultType {
            found: type_name(&other),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
