use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;

use crate::db;
use crate::format;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, map_db_err, require_db};
use crate::ipc::types::{AppState, Request};
use crate::rules;
use crate::validate::{self, FieldError, StudentInput};

const COLUMNS: &str = "mssv, name, dob, gender, faculty, course, program, address, email, phone, status";

pub struct StoredStudent {
    pub record: StudentInput,
    pub created_at: String,
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn insert_student(
    conn: &Connection,
    record: &StudentInput,
    created_at: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO students(
            mssv, name, dob, gender, faculty, course, program,
            address, email, phone, status, created_at
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.mssv,
            &record.name,
            &record.dob,
            &record.gender,
            &record.faculty,
            &record.course,
            &record.program,
            &record.address,
            &record.email,
            &record.phone,
            &record.status,
            created_at,
        ),
    )?;
    Ok(())
}

/// Callers never see created_at; it only drives the deletion window.
pub fn student_to_json(record: &StudentInput) -> Value {
    json!({
        "mssv": record.mssv,
        "name": record.name,
        "dob": record.dob,
        "gender": record.gender,
        "faculty": record.faculty,
        "course": record.course,
        "program": record.program,
        "address": record.address,
        "email": record.email,
        "phone": record.phone,
        "status": record.status,
    })
}

/// Resolve the email-domain rule once per operation: `Some(domain)` only
/// when the flag is active and a non-blank domain is configured.
pub fn resolve_allowed_domain(conn: &Connection) -> Option<String> {
    if !db::flag_active(conn, "apply_email_domain_rule") {
        return None;
    }
    db::config_get(conn, "allowed_domain")
        .ok()
        .flatten()
        .filter(|d| !d.trim().is_empty())
}

pub fn load_student(conn: &Connection, mssv: &str) -> Result<Option<StoredStudent>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS}, created_at FROM students WHERE mssv = ?"),
        [mssv],
        |row| {
            Ok(StoredStudent {
                record: StudentInput {
                    mssv: row.get(0)?,
                    name: row.get(1)?,
                    dob: row.get(2)?,
                    gender: row.get(3)?,
                    faculty: row.get(4)?,
                    course: row.get(5)?,
                    program: row.get(6)?,
                    address: row.get(7)?,
                    email: row.get(8)?,
                    phone: row.get(9)?,
                    status: row.get(10)?,
                },
                created_at: row.get(11)?,
            })
        },
    )
    .optional()
    .map_err(|e| map_db_err(e, "db_query_failed"))
}

fn validation_failed(errors: Vec<FieldError>) -> HandlerErr {
    let fields: Vec<Value> = errors
        .iter()
        .map(|e| json!({ "field": e.field, "message": e.message }))
        .collect();
    HandlerErr::with_details(
        "validation_failed",
        "student record failed validation",
        json!({ "fields": fields }),
    )
}

fn parse_student_params(params: &Value) -> StudentInput {
    let field = |key: &str| get_opt_str(params, key).unwrap_or_default();
    StudentInput {
        mssv: field("mssv"),
        name: field("name"),
        dob: field("dob"),
        gender: field("gender"),
        faculty: field("faculty"),
        course: field("course"),
        program: field("program"),
        address: field("address"),
        email: field("email"),
        phone: field("phone"),
        status: field("status"),
    }
}

fn handle_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let search = get_opt_str(&req.params, "search").unwrap_or_default();
    let faculty = get_opt_str(&req.params, "faculty").unwrap_or_default();
    let page = req
        .params
        .get("page")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(20)
        .clamp(1, 500);
    let offset = page * limit;

    let search_like = format!("%{}%", search);
    let faculty_like = format!("%{}%", faculty);

    // The total must be a dedicated filtered count, not the page length,
    // or pagination UIs break past the first page.
    let (total, students) = if faculty.is_empty() {
        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM students WHERE (mssv LIKE ?1 OR name LIKE ?1)",
                [&search_like],
                |r| r.get(0),
            )
            .map_err(|e| map_db_err(e, "db_query_failed"))?;
        let students = query_page(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM students
                 WHERE (mssv LIKE ?1 OR name LIKE ?1)
                 ORDER BY mssv LIMIT ?2 OFFSET ?3"
            ),
            rusqlite::params![&search_like, limit, offset],
        )?;
        (total, students)
    } else {
        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM students
                 WHERE (mssv LIKE ?1 OR name LIKE ?1) AND faculty LIKE ?2",
                rusqlite::params![&search_like, &faculty_like],
                |r| r.get(0),
            )
            .map_err(|e| map_db_err(e, "db_query_failed"))?;
        let students = query_page(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM students
                 WHERE (mssv LIKE ?1 OR name LIKE ?1) AND faculty LIKE ?2
                 ORDER BY mssv LIMIT ?3 OFFSET ?4"
            ),
            rusqlite::params![&search_like, &faculty_like, limit, offset],
        )?;
        (total, students)
    };

    Ok(json!({ "total": total, "students": students }))
}

fn query_page(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(StudentInput {
                mssv: row.get(0)?,
                name: row.get(1)?,
                dob: row.get(2)?,
                gender: row.get(3)?,
                faculty: row.get(4)?,
                course: row.get(5)?,
                program: row.get(6)?,
                address: row.get(7)?,
                email: row.get(8)?,
                phone: row.get(9)?,
                status: row.get(10)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    Ok(rows.iter().map(student_to_json).collect())
}

fn handle_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut input = parse_student_params(&req.params);
    input.dob = format::normalize_date(&input.dob);
    input.phone = format::normalize_phone(&input.phone);

    let allowed_domain = resolve_allowed_domain(conn);
    let mut errors = validate::validate_student(&input, allowed_domain.as_deref());
    if input.dob == format::INVALID_DATE {
        errors.push(FieldError {
            field: "dob",
            message: "dob is not a recognizable date".to_string(),
        });
    }
    if !errors.is_empty() {
        return Err(validation_failed(errors));
    }

    insert_student(conn, &input, &now_rfc3339()).map_err(|e| map_db_err(e, "db_insert_failed"))?;
    info!(mssv = %input.mssv, "student created");
    Ok(json!({ "student": student_to_json(&input) }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mssv = get_required_str(&req.params, "mssv")?;
    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing patch"))?;

    let existing = load_student(conn, &mssv)?
        .ok_or_else(|| HandlerErr::new("not_found", format!("student {} not found", mssv)))?;

    if let Some(new_mssv) = patch.get("mssv").and_then(|v| v.as_str()) {
        if new_mssv != existing.record.mssv {
            return Err(HandlerErr::new("bad_params", "mssv is immutable"));
        }
    }

    if let Some(new_status) = patch.get("status").and_then(|v| v.as_str()) {
        if new_status != existing.record.status
            && db::flag_active(conn, "update_student_status_with_rule")
            && !rules::transition_allowed(&existing.record.status, new_status)
        {
            return Err(HandlerErr::with_details(
                "invalid_transition",
                format!(
                    "invalid status transition from \"{}\" to \"{}\"",
                    existing.record.status, new_status
                ),
                json!({ "from": existing.record.status, "to": new_status }),
            ));
        }
    }

    let pick = |key: &str, current: &str| {
        patch
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| current.to_string())
    };

    let mut merged = StudentInput {
        mssv: existing.record.mssv.clone(),
        name: pick("name", &existing.record.name),
        dob: existing.record.dob.clone(),
        gender: pick("gender", &existing.record.gender),
        faculty: pick("faculty", &existing.record.faculty),
        course: pick("course", &existing.record.course),
        program: pick("program", &existing.record.program),
        address: pick("address", &existing.record.address),
        email: pick("email", &existing.record.email),
        phone: pick("phone", &existing.record.phone),
        status: pick("status", &existing.record.status),
    };
    if let Some(dob) = patch.get("dob").and_then(|v| v.as_str()) {
        merged.dob = format::normalize_date(dob);
    }

    let allowed_domain = resolve_allowed_domain(conn);
    let mut errors = validate::validate_student(&merged, allowed_domain.as_deref());
    if merged.dob == format::INVALID_DATE {
        errors.push(FieldError {
            field: "dob",
            message: "dob is not a recognizable date".to_string(),
        });
    }
    if !errors.is_empty() {
        return Err(validation_failed(errors));
    }

    conn.execute(
        "UPDATE students SET
            name = ?, dob = ?, gender = ?, faculty = ?, course = ?,
            program = ?, address = ?, email = ?, phone = ?, status = ?
         WHERE mssv = ?",
        (
            &merged.name,
            &merged.dob,
            &merged.gender,
            &merged.faculty,
            &merged.course,
            &merged.program,
            &merged.address,
            &merged.email,
            &merged.phone,
            &merged.status,
            &merged.mssv,
        ),
    )
    .map_err(|e| map_db_err(e, "db_update_failed"))?;

    info!(mssv = %merged.mssv, "student updated");
    Ok(json!({ "student": student_to_json(&merged) }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mssv = get_required_str(&req.params, "mssv")?;

    let existing = load_student(conn, &mssv)?
        .ok_or_else(|| HandlerErr::new("not_found", format!("student {} not found", mssv)))?;

    // The flag is re-read on every delete; no caching across requests.
    if db::flag_active(conn, "delete_student_in_time") {
        let created = DateTime::parse_from_rfc3339(&existing.created_at)
            .map_err(|_| HandlerErr::new("db_query_failed", "stored created_at is unreadable"))?;
        let elapsed = Utc::now()
            .signed_duration_since(created.with_timezone(&Utc))
            .num_minutes();
        if !rules::delete_window_open(elapsed) {
            return Err(HandlerErr::with_details(
                "delete_window_expired",
                format!(
                    "students can only be deleted within {} minutes of creation",
                    rules::DELETE_WINDOW_MINUTES
                ),
                json!({
                    "limitMinutes": rules::DELETE_WINDOW_MINUTES,
                    "elapsedMinutes": elapsed
                }),
            ));
        }
    }

    conn.execute("DELETE FROM students WHERE mssv = ?", [&mssv])
        .map_err(|e| map_db_err(e, "db_delete_failed"))?;
    info!(mssv = %mssv, "student deleted");
    Ok(json!({ "deleted": mssv }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(respond(&req.id, handle_list(state, req))),
        "students.create" => Some(respond(&req.id, handle_create(state, req))),
        "students.update" => Some(respond(&req.id, handle_update(state, req))),
        "students.delete" => Some(respond(&req.id, handle_delete(state, req))),
        _ => None,
    }
}
