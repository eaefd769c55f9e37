use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

const DEFAULT_FACULTIES: [&str; 5] = [
    "Công nghệ thông tin",
    "Luật",
    "Tiếng Anh thương mại",
    "Tiếng Nhật",
    "Tiếng Pháp",
];

const DEFAULT_PROGRAMS: [&str; 5] = [
    "Đại trà",
    "Chất lượng cao",
    "Cử nhân tài năng",
    "Việt Pháp",
    "Tăng cường tiếng anh",
];

const DEFAULT_STATUSES: [&str; 4] = [
    "Đang học",
    "Đã tốt nghiệp",
    "Đã thôi học",
    "Tạm dừng học",
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("sisreg.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            mssv TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            dob TEXT NOT NULL,
            gender TEXT NOT NULL,
            faculty TEXT NOT NULL,
            course TEXT NOT NULL,
            program TEXT NOT NULL,
            address TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Older workspaces predate the deletion-window rule and lack created_at.
    ensure_students_created_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_faculty ON students(faculty)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status ON students(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculties(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_statuses(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS configs(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            value TEXT NOT NULL
        )",
        [],
    )?;

    seed_reference_rows(&conn)?;

    Ok(conn)
}

fn seed_reference_rows(conn: &Connection) -> anyhow::Result<()> {
    for name in DEFAULT_FACULTIES {
        conn.execute("INSERT OR IGNORE INTO faculties(name) VALUES(?)", [name])?;
    }
    for name in DEFAULT_PROGRAMS {
        conn.execute("INSERT OR IGNORE INTO programs(name) VALUES(?)", [name])?;
    }
    for name in DEFAULT_STATUSES {
        conn.execute(
            "INSERT OR IGNORE INTO student_statuses(name) VALUES(?)",
            [name],
        )?;
    }
    Ok(())
}

fn ensure_students_created_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "created_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN created_at TEXT", [])?;
    // Backfill with "now": pre-existing rows get a fresh deletion window
    // rather than an immediately-expired one.
    conn.execute(
        "UPDATE students SET created_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE created_at IS NULL",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Point-read of a config entry. Absence is a valid state, not an error.
pub fn config_get(conn: &Connection, name: &str) -> anyhow::Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM configs WHERE name = ?", [name], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(value)
}

/// A rule flag is active iff the config row exists and holds exactly "true".
/// A failed lookup counts as inactive.
pub fn flag_active(conn: &Connection, name: &str) -> bool {
    matches!(config_get(conn, name), Ok(Some(v)) if v == "true")
}
