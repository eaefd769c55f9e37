use rusqlite::Connection;
use serde_json::Value;
use tracing::error;

use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

/// Map a persistence error: unique-constraint violations become a
/// `duplicate_key` naming the offending fields; everything else is logged
/// verbatim and surfaced with a generic message.
pub fn map_db_err(e: rusqlite::Error, op: &'static str) -> HandlerErr {
    if let Some(fields) = unique_violation_fields(&e) {
        return HandlerErr::with_details(
            "duplicate_key",
            format!("a record with the same {} already exists", fields.join(", ")),
            serde_json::json!({ "fields": fields }),
        );
    }
    error!(op, error = %e, "database operation failed");
    HandlerErr::new(op, "database operation failed")
}

/// Extract column names from SQLite's "UNIQUE constraint failed:
/// table.column[, ...]" message. Primary-key violations use the same text.
fn unique_violation_fields(e: &rusqlite::Error) -> Option<Vec<String>> {
    let rusqlite::Error::SqliteFailure(failure, Some(message)) = e else {
        return None;
    };
    if failure.code != rusqlite::ErrorCode::ConstraintViolation {
        return None;
    }
    let rest = message.strip_prefix("UNIQUE constraint failed: ")?;
    Some(
        rest.split(", ")
            .map(|column| column.rsplit('.').next().unwrap_or(column).to_string())
            .collect(),
    )
}
