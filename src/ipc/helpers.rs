use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub fn db_conn<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    match state.db.as_ref() {
        Some(conn) => Ok(conn),
        None => Err(err(&req.id, "no_workspace", "select a workspace first", None)),
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_field(req, key, format!("missing {}", key)))
}

/// `bad_params` carrying the offending field, matching engine validation errors.
pub fn bad_field(req: &Request, key: &str, message: impl Into<String>) -> serde_json::Value {
    err(&req.id, "bad_params", message, Some(json!({ "field": key })))
}

/// Absent and `null` both read as `None`; any other non-string is rejected.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) => Ok(Some(s.to_string())),
            None => Err(bad_field(req, key, format!("{} must be a string", key))),
        },
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| bad_field(req, key, format!("missing or non-numeric {}", key)))
}
