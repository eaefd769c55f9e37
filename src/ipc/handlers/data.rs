//! Bulk import/export of the student table and enrollment-certificate
//! generation.

use std::path::PathBuf;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::db;
use crate::format;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::students::{
    insert_student, load_student, now_rfc3339, student_to_json,
};
use crate::ipc::helpers::{get_opt_str, get_required_str, map_db_err, require_db};
use crate::ipc::types::{AppState, Request};
use crate::rules;
use crate::tabular::{self, Cell, RowMap};
use crate::validate::StudentInput;

const EXPORT_HEADERS: [&str; 11] = [
    "mssv", "name", "dob", "gender", "faculty", "course", "program", "address", "email", "phone",
    "status",
];

const SCHOOL_KEYS: [&str; 4] = [
    "school_name",
    "school_address",
    "school_phone",
    "school_email",
];

fn handle_import(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let path = PathBuf::from(get_required_str(&req.params, "path")?);
    let fmt = get_required_str(&req.params, "format")?;

    let rows = match fmt.as_str() {
        "csv" => tabular::read_csv_rows(&path),
        "xlsx" | "excel" => tabular::read_xlsx_rows(&path),
        _ => return Err(HandlerErr::new("bad_params", "format must be csv or xlsx")),
    }
    .map_err(|e| {
        // The file itself is unreadable; abort the whole batch.
        error!(path = %path.display(), error = %e, "import file unreadable");
        HandlerErr::new("bad_input", format!("could not parse {} input", fmt))
    })?;

    info!(path = %path.display(), rows = rows.len(), "importing students");

    // XLSX date cells may arrive as spreadsheet serial day counts.
    let serial_dates = fmt.as_str() != "csv";

    let mut students: Vec<Value> = Vec::new();
    let mut errors: Vec<Value> = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        // 1-based file row, counting the header line.
        let row_no = idx + 2;
        match import_row(conn, row, serial_dates) {
            Ok(record) => students.push(student_to_json(&record)),
            Err(message) => {
                // Row failures never abort the batch.
                error!(row = row_no, %message, "import row skipped");
                errors.push(json!({ "row": row_no, "message": message }));
            }
        }
    }

    info!(
        imported = students.len(),
        skipped = errors.len(),
        "import finished"
    );
    Ok(json!({ "students": students, "errors": errors }))
}

fn import_row(conn: &Connection, row: &RowMap, serial_dates: bool) -> Result<StudentInput, String> {
    let text = |key: &str| -> Result<String, String> {
        match row.get(key) {
            Some(cell) if !cell.is_blank() => Ok(cell.display()),
            _ => Err(format!("missing field {}", key)),
        }
    };

    let dob = match row.get("dob") {
        None => return Err("missing field dob".to_string()),
        Some(Cell::Number(n)) if serial_dates => format::serial_date_to_dmy(*n)
            .ok_or_else(|| format!("dob serial {} is out of range", n))?,
        Some(cell) => {
            let normalized = format::normalize_date(&cell.display());
            if normalized.is_empty() || normalized == format::INVALID_DATE {
                return Err(format!(
                    "dob \"{}\" is not a recognizable date",
                    cell.display()
                ));
            }
            normalized
        }
    };

    let record = StudentInput {
        mssv: text("mssv")?,
        name: text("name")?,
        dob,
        gender: text("gender")?,
        faculty: text("faculty")?,
        course: text("course")?,
        program: text("program")?,
        address: text("address")?,
        email: text("email")?,
        phone: format::normalize_phone(&text("phone")?),
        status: text("status")?,
    };

    insert_student(conn, &record, &now_rfc3339()).map_err(|e| e.to_string())?;
    Ok(record)
}

fn handle_export(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let fmt = get_required_str(&req.params, "format")?;
    let mut path = PathBuf::from(get_required_str(&req.params, "path")?);

    let filename = match fmt.as_str() {
        "csv" => "students.csv",
        "xlsx" | "excel" => "students.xlsx",
        _ => return Err(HandlerErr::new("bad_params", "format must be csv or xlsx")),
    };
    if path.is_dir() {
        path = path.join(filename);
    }

    // Whole table, no pagination; created_at stays internal.
    let mut stmt = conn
        .prepare(
            "SELECT mssv, name, dob, gender, faculty, course, program,
                    address, email, phone, status
             FROM students ORDER BY mssv",
        )
        .map_err(|e| map_db_err(e, "db_query_failed"))?;
    let rows: Vec<Vec<String>> = stmt
        .query_map([], |row| {
            (0..EXPORT_HEADERS.len())
                .map(|i| row.get::<_, String>(i))
                .collect()
        })
        .and_then(|it| it.collect())
        .map_err(|e| map_db_err(e, "db_query_failed"))?;

    let written = match filename {
        "students.csv" => tabular::write_csv(&path, &EXPORT_HEADERS, &rows),
        _ => tabular::write_xlsx(&path, "Students", &EXPORT_HEADERS, &rows),
    };
    written.map_err(|e| {
        error!(path = %path.display(), error = %e, "export failed");
        HandlerErr::new("export_failed", "could not write export file")
    })?;

    info!(path = %path.display(), rows = rows.len(), "exported students");
    Ok(json!({
        "path": path.to_string_lossy(),
        "filename": filename,
        "rows": rows.len()
    }))
}

fn handle_certificate(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mssv = get_required_str(&req.params, "mssv")?;
    let reason = get_opt_str(&req.params, "reason").unwrap_or_default();
    let fmt = get_opt_str(&req.params, "format").unwrap_or_else(|| "markdown".to_string());

    if reason.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "reason is required"));
    }
    if fmt != "markdown" && fmt != "json" {
        return Err(HandlerErr::new("bad_params", "format must be markdown or json"));
    }

    let student = load_student(conn, &mssv)?
        .ok_or_else(|| HandlerErr::new("not_found", format!("student {} not found", mssv)))?;

    let mut school = serde_json::Map::new();
    let mut missing: Vec<&str> = Vec::new();
    for key in SCHOOL_KEYS {
        match db::config_get(conn, key) {
            Ok(Some(value)) => {
                // "school_name" -> "name" etc.
                let field = key.trim_start_matches("school_");
                school.insert(field.to_string(), Value::String(value));
            }
            _ => missing.push(key),
        }
    }
    if !missing.is_empty() {
        return Err(HandlerErr::with_details(
            "config_missing",
            "school metadata is not configured",
            json!({ "missing": missing }),
        ));
    }

    let from = Utc::now();
    let to = from + Duration::days(rules::certificate_validity_days(&reason));
    info!(mssv = %mssv, %reason, "generating certificate");

    let mut result = json!({
        "school": Value::Object(school.clone()),
        "from": from.to_rfc3339_opts(SecondsFormat::Secs, true),
        "to": to.to_rfc3339_opts(SecondsFormat::Secs, true),
    });
    if fmt == "markdown" {
        let school_name = school
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        result["content"] = Value::String(render_certificate(
            &student.record,
            school_name,
            &reason,
            from,
            to,
        ));
    } else {
        result["student"] = student_to_json(&student.record);
    }
    Ok(result)
}

fn render_certificate(
    record: &StudentInput,
    school_name: &str,
    reason: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> String {
    format!(
        "### **GIẤY XÁC NHẬN TÌNH TRẠNG SINH VIÊN**

Trường {school} xác nhận:

**1. Thông tin sinh viên:**
- **Họ và tên:** {name}
- **Mã số sinh viên:** {mssv}
- **Ngày sinh:** {dob}
- **Giới tính:** {gender}
- **Khoa:** {faculty}
- **Chương trình đào tạo:** {program}
- **Khóa:** K{course}

**2. Tình trạng sinh viên hiện tại:**
- {status}

**3. Mục đích xác nhận:**
- {reason}

**4. Thời gian cấp giấy:**
- Giấy xác nhận có hiệu lực đến ngày: {valid_to}

📍 **Xác nhận của Trường {school}**

📅 Ngày cấp: {issued}

🖋 **Trưởng Phòng Đào Tạo**
(Ký, ghi rõ họ tên, đóng dấu)
",
        school = school_name,
        name = record.name,
        mssv = record.mssv,
        dob = record.dob,
        gender = record.gender,
        faculty = record.faculty,
        program = record.program,
        course = record.course,
        status = record.status,
        reason = reason,
        valid_to = to.format("%d/%m/%Y"),
        issued = from.format("%d/%m/%Y"),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "data.import" => Some(respond(&req.id, handle_import(state, req))),
        "data.export" => Some(respond(&req.id, handle_export(state, req))),
        "certificate.generate" => Some(respond(&req.id, handle_certificate(state, req))),
        _ => None,
    }
}
