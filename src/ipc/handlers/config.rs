//! Key/value configuration store: feature flags, school identity metadata
//! and the allowed email domain. Absence of a key is a valid state.

use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use tracing::info;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, map_db_err, require_db};
use crate::ipc::types::{AppState, Request};

fn handle_list(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut stmt = conn
        .prepare("SELECT id, name, value FROM configs ORDER BY name")
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let value: String = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "value": value }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    Ok(json!({ "configs": rows }))
}

fn handle_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    let value = get_opt_str(&req.params, "value")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing value"))?;
    conn.execute(
        "INSERT INTO configs(name, value) VALUES(?, ?)",
        rusqlite::params![&name, &value],
    )
    .map_err(|e| map_db_err(e, "db_insert_failed"))?;
    let id = conn.last_insert_rowid();
    info!(name = %name, "config created");
    Ok(json!({ "id": id, "name": name, "value": value }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = req
        .params
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing id"))?;
    let value = get_opt_str(&req.params, "value")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing value"))?;

    let name: Option<String> = conn
        .query_row("SELECT name FROM configs WHERE id = ?", [id], |r| r.get(0))
        .optional()
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    let Some(name) = name else {
        return Err(HandlerErr::new(
            "not_found",
            format!("config {} not found", id),
        ));
    };

    conn.execute(
        "UPDATE configs SET value = ? WHERE id = ?",
        rusqlite::params![&value, id],
    )
    .map_err(|e| map_db_err(e, "db_update_failed"))?;
    info!(name = %name, "config updated");
    Ok(json!({ "id": id, "name": name, "value": value }))
}

fn handle_get(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    let row = conn
        .query_row(
            "SELECT id, value FROM configs WHERE name = ?",
            [&name],
            |r| {
                let id: i64 = r.get(0)?;
                let value: String = r.get(1)?;
                Ok(json!({ "id": id, "name": name.clone(), "value": value }))
            },
        )
        .optional()
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    Ok(json!({ "config": row }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.list" => Some(respond(&req.id, handle_list(state))),
        "config.create" => Some(respond(&req.id, handle_create(state, req))),
        "config.update" => Some(respond(&req.id, handle_update(state, req))),
        "config.get" => Some(respond(&req.id, handle_get(state, req))),
        _ => None,
    }
}
