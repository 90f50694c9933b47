use crate::domain::HistoryItem;
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

const ENVELOPE_KEYS: [&str; 4] = ["data", "history", "items", "results"];

#[derive(Clone, Debug, Default)]
pub struct HistoryLoad {
    pub items: Vec<HistoryItem>,
    /// Records that were present but could not be read as a history item.
    pub warnings: usize,
}

#[derive(Debug, Error)]
pub enum LoadHistoryError {
    #[error("failed to read history {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("invalid history json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("history has no record list (expected an array or a `data`/`history` field)")]
    UnexpectedShape,
}

/// Reads a chat-history response body from a file, or from stdin when `path` is `-`.
pub fn load_history(path: &Path) -> Result<HistoryLoad, LoadHistoryError> {
    let text = read_input(path).map_err(|source| LoadHistoryError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_history(&text)
}

pub fn read_input(path: &Path) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().lock().read_to_string(&mut text)?;
        return Ok(text);
    }
    fs::read_to_string(path)
}

/// Accepts a JSON array of records, an object wrapping one (`{"data": [...]}`), a single
/// record object, or JSON lines.
pub fn parse_history(text: &str) -> Result<HistoryLoad, LoadHistoryError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(HistoryLoad::default());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(records)) => Ok(decode_records(records)),
        Ok(Value::Object(fields)) => {
            if fields.contains_key("prompt") {
                return Ok(decode_records(vec![Value::Object(fields)]));
            }
            let records =
                find_enveloped_records(fields).ok_or(LoadHistoryError::UnexpectedShape)?;
            Ok(decode_records(records))
        }
        Ok(_) => Err(LoadHistoryError::UnexpectedShape),
        Err(error) => parse_json_lines(trimmed).ok_or(LoadHistoryError::Json(error)),
    }
}

fn find_enveloped_records(mut fields: Map<String, Value>) -> Option<Vec<Value>> {
    for key in ENVELOPE_KEYS {
        match fields.remove(key) {
            Some(Value::Array(records)) => return Some(records),
            Some(Value::Object(inner)) => {
                if let Some(records) = find_enveloped_records(inner) {
                    return Some(records);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_json_lines(text: &str) -> Option<HistoryLoad> {
    let mut load = HistoryLoad::default();
    let mut parsed_any = false;
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryItem>(line) {
            Ok(item) => {
                parsed_any = true;
                load.items.push(item);
            }
            Err(error) => {
                tracing::warn!(line_no = idx + 1, %error, "skipping unreadable history line");
                load.warnings += 1;
            }
        }
    }
    parsed_any.then_some(load)
}

fn decode_records(records: Vec<Value>) -> HistoryLoad {
    let mut load = HistoryLoad::default();
    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<HistoryItem>(record) {
            Ok(item) => load.items.push(item),
            Err(error) => {
                tracing::warn!(index, %error, "skipping unreadable history record");
                load.warnings += 1;
            }
        }
    }
    load
}
