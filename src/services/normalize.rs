//! The API is loose about response shapes: a list may arrive bare, wrapped
//! in `data`, or as a single object. Everything is folded into one typed
//! value here so callers never branch on shape.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse {
        message: Some(format!("Unexpected response shape: {}", e)),
    })
}

pub fn into_list<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, ApiError> {
    match unwrap_data(value) {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(decode).collect(),
        single @ Value::Object(_) => Ok(vec![decode(single)?]),
        other => Err(ApiError::InvalidResponse {
            message: Some(format!("Expected a list, got {}", other)),
        }),
    }
}

/// Decodes a single record; `Ok(None)` when the body was empty.
pub fn into_one<T: DeserializeOwned>(value: Value) -> Result<Option<T>, ApiError> {
    match unwrap_data(value) {
        Value::Null => Ok(None),
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => decode(first).map(Some),
            None => Ok(None),
        },
        other => decode(other).map(Some),
    }
}
