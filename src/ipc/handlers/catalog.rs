//! CRUD over the reference tables: faculties, programs, student statuses.
//!
//! Students reference these rows by name. Renaming a row does not cascade
//! into existing student records; the stale name simply stays on them.

use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use tracing::info;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, map_db_err, require_db};
use crate::ipc::types::{AppState, Request};

#[derive(Clone, Copy)]
struct Catalog {
    prefix: &'static str,
    table: &'static str,
    entity: &'static str,
}

const CATALOGS: [Catalog; 3] = [
    Catalog {
        prefix: "faculties",
        table: "faculties",
        entity: "faculty",
    },
    Catalog {
        prefix: "programs",
        table: "programs",
        entity: "program",
    },
    Catalog {
        prefix: "statuses",
        table: "student_statuses",
        entity: "status",
    },
];

fn handle_list(state: &AppState, catalog: Catalog) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, name FROM {} ORDER BY name",
            catalog.table
        ))
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    Ok(json!({ "items": rows }))
}

fn handle_create(state: &AppState, req: &Request, catalog: Catalog) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    conn.execute(
        &format!("INSERT INTO {}(name) VALUES(?)", catalog.table),
        [&name],
    )
    .map_err(|e| map_db_err(e, "db_insert_failed"))?;
    let id = conn.last_insert_rowid();
    info!(entity = catalog.entity, name = %name, "reference row created");
    Ok(json!({ "id": id, "name": name }))
}

fn handle_update(state: &AppState, req: &Request, catalog: Catalog) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = req
        .params
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing id"))?;
    let name = get_required_str(&req.params, "name")?;

    let exists: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?", catalog.table),
            [id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    if exists.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            format!("{} {} not found", catalog.entity, id),
        ));
    }

    conn.execute(
        &format!("UPDATE {} SET name = ? WHERE id = ?", catalog.table),
        rusqlite::params![&name, id],
    )
    .map_err(|e| map_db_err(e, "db_update_failed"))?;
    info!(entity = catalog.entity, id, name = %name, "reference row renamed");
    Ok(json!({ "id": id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (prefix, action) = req.method.split_once('.')?;
    let catalog = CATALOGS.into_iter().find(|c| c.prefix == prefix)?;
    match action {
        "list" => Some(respond(&req.id, handle_list(state, catalog))),
        "create" => Some(respond(&req.id, handle_create(state, req, catalog))),
        "update" => Some(respond(&req.id, handle_update(state, req, catalog))),
        _ => None,
    }
}
