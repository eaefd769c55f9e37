use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sisregd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sisregd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn assert_ok(resp: &serde_json::Value, what: &str) {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        what,
        resp
    );
}

fn error_code(resp: &serde_json::Value) -> &str {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn student_params(mssv: &str, name: &str, faculty: &str) -> serde_json::Value {
    json!({
        "mssv": mssv,
        "name": name,
        "dob": "07/11/2001",
        "gender": "Nam",
        "faculty": faculty,
        "course": "2022",
        "program": "Đại trà",
        "address": "12 Nguyễn Trãi, TP.HCM",
        "email": format!("{}@student.edu.vn", mssv),
        "phone": "0351234567",
        "status": "Đang học",
    })
}

#[test]
fn crud_rules_and_pagination() {
    let workspace = temp_dir("sisreg-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_ok(&health, "health");

    // Catalog methods need a workspace first.
    let early = request(&mut stdin, &mut reader, "1b", "students.list", json!({}));
    assert_eq!(error_code(&early), "no_workspace");

    let selected = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_ok(&selected, "workspace.select");

    for i in 0..6 {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "students.create",
            student_params(
                &format!("2212345{}", i),
                &format!("Nguyễn Văn {}", i),
                "Công nghệ thông tin",
            ),
        );
        assert_ok(&resp, "students.create");
    }
    let other = request(
        &mut stdin,
        &mut reader,
        "c6",
        "students.create",
        student_params("22999999", "Trần Thị Bình", "Luật"),
    );
    assert_ok(&other, "students.create");
    // Responses carry the normalized record and never created_at.
    let record = &other["result"]["student"];
    assert_eq!(record["dob"], "07-11-2001");
    assert!(record.get("created_at").is_none());

    let dup = request(
        &mut stdin,
        &mut reader,
        "dup",
        "students.create",
        student_params("22999999", "Trần Thị Bình", "Luật"),
    );
    assert_eq!(error_code(&dup), "duplicate_key");
    assert!(dup["error"]["details"]["fields"]
        .as_array()
        .expect("duplicate fields")
        .iter()
        .any(|f| f.as_str() == Some("mssv")));

    let invalid = request(
        &mut stdin,
        &mut reader,
        "inv",
        "students.create",
        json!({ "mssv": "123", "gender": "X" }),
    );
    assert_eq!(error_code(&invalid), "validation_failed");
    assert!(
        invalid["error"]["details"]["fields"]
            .as_array()
            .expect("validation fields")
            .len()
            > 2
    );

    // Total counts every filtered row, not just the returned page.
    let page = request(
        &mut stdin,
        &mut reader,
        "p1",
        "students.list",
        json!({ "limit": 5, "page": 0 }),
    );
    assert_eq!(page["result"]["total"], 7);
    assert_eq!(page["result"]["students"].as_array().unwrap().len(), 5);

    let page2 = request(
        &mut stdin,
        &mut reader,
        "p2",
        "students.list",
        json!({ "limit": 5, "page": 1 }),
    );
    assert_eq!(page2["result"]["total"], 7);
    assert_eq!(page2["result"]["students"].as_array().unwrap().len(), 2);

    let by_faculty = request(
        &mut stdin,
        &mut reader,
        "p3",
        "students.list",
        json!({ "faculty": "Luật" }),
    );
    assert_eq!(by_faculty["result"]["total"], 1);

    let by_search = request(
        &mut stdin,
        &mut reader,
        "p4",
        "students.list",
        json!({ "search": "Trần Thị" }),
    );
    assert_eq!(by_search["result"]["total"], 1);

    // Status transitions are only enforced while the flag is "true".
    let flag = request(
        &mut stdin,
        &mut reader,
        "f1",
        "config.create",
        json!({ "name": "update_student_status_with_rule", "value": "true" }),
    );
    assert_ok(&flag, "config.create");
    let flag_id = flag["result"]["id"].as_i64().expect("config id");

    let graduated = request(
        &mut stdin,
        &mut reader,
        "u1",
        "students.update",
        json!({ "mssv": "22999999", "patch": { "status": "Đã tốt nghiệp" } }),
    );
    assert_ok(&graduated, "graduate");

    let back = request(
        &mut stdin,
        &mut reader,
        "u2",
        "students.update",
        json!({ "mssv": "22999999", "patch": { "status": "Đang học" } }),
    );
    assert_eq!(error_code(&back), "invalid_transition");
    assert_eq!(back["error"]["details"]["from"], "Đã tốt nghiệp");
    assert_eq!(back["error"]["details"]["to"], "Đang học");

    let off = request(
        &mut stdin,
        &mut reader,
        "f2",
        "config.update",
        json!({ "id": flag_id, "value": "false" }),
    );
    assert_ok(&off, "config.update");
    let back2 = request(
        &mut stdin,
        &mut reader,
        "u3",
        "students.update",
        json!({ "mssv": "22999999", "patch": { "status": "Đang học" } }),
    );
    assert_ok(&back2, "transition with rule disabled");

    let renamed = request(
        &mut stdin,
        &mut reader,
        "u4",
        "students.update",
        json!({ "mssv": "22123450", "patch": { "mssv": "99999999" } }),
    );
    assert_eq!(error_code(&renamed), "bad_params");

    let ghost = request(
        &mut stdin,
        &mut reader,
        "u5",
        "students.update",
        json!({ "mssv": "00000000", "patch": { "name": "Ai đó" } }),
    );
    assert_eq!(error_code(&ghost), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn email_domain_rule_gates_creation() {
    let workspace = temp_dir("sisreg-domain");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "config.create",
        json!({ "name": "apply_email_domain_rule", "value": "true" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "config.create",
        json!({ "name": "allowed_domain", "value": "student.edu.vn" }),
    );

    let mut foreign = student_params("22000001", "Lê Văn Cường", "Luật");
    foreign["email"] = json!("cuong@gmail.com");
    let rejected = request(&mut stdin, &mut reader, "4", "students.create", foreign);
    assert_eq!(error_code(&rejected), "validation_failed");

    let accepted = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        student_params("22000001", "Lê Văn Cường", "Luật"),
    );
    assert_ok(&accepted, "matching domain");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deletion_window_applies_only_under_the_flag() {
    let workspace = temp_dir("sisreg-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let flag = request(
        &mut stdin,
        &mut reader,
        "2",
        "config.create",
        json!({ "name": "delete_student_in_time", "value": "true" }),
    );
    let flag_id = flag["result"]["id"].as_i64().expect("config id");

    for mssv in ["22000010", "22000011"] {
        let resp = request(
            &mut stdin,
            &mut reader,
            mssv,
            "students.create",
            student_params(mssv, "Phạm Văn Dũng", "Luật"),
        );
        assert_ok(&resp, "create");
    }

    // Fresh record: still inside the window.
    let fresh = request(
        &mut stdin,
        &mut reader,
        "d1",
        "students.delete",
        json!({ "mssv": "22000010" }),
    );
    assert_ok(&fresh, "delete inside window");

    // Age the second record past the window behind the daemon's back.
    let past = (chrono::Utc::now() - chrono::Duration::minutes(31))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let conn = rusqlite::Connection::open(workspace.join("sisreg.sqlite3")).expect("open db");
    conn.execute(
        "UPDATE students SET created_at = ? WHERE mssv = ?",
        rusqlite::params![past, "22000011"],
    )
    .expect("age record");
    drop(conn);

    let expired = request(
        &mut stdin,
        &mut reader,
        "d2",
        "students.delete",
        json!({ "mssv": "22000011" }),
    );
    assert_eq!(error_code(&expired), "delete_window_expired");
    assert_eq!(expired["error"]["details"]["limitMinutes"], 30);
    assert!(expired["error"]["details"]["elapsedMinutes"].as_i64().unwrap() >= 31);

    // With the flag off the same record deletes fine.
    let _ = request(
        &mut stdin,
        &mut reader,
        "d3",
        "config.update",
        json!({ "id": flag_id, "value": "false" }),
    );
    let late = request(
        &mut stdin,
        &mut reader,
        "d4",
        "students.delete",
        json!({ "mssv": "22000011" }),
    );
    assert_ok(&late, "delete with rule disabled");

    let gone = request(
        &mut stdin,
        &mut reader,
        "d5",
        "students.delete",
        json!({ "mssv": "22000011" }),
    );
    assert_eq!(error_code(&gone), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn catalog_tables_list_create_and_rename() {
    let workspace = temp_dir("sisreg-catalog");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Seeded defaults are present on a fresh workspace.
    let listed = request(&mut stdin, &mut reader, "2", "faculties.list", json!({}));
    let names: Vec<String> = listed["result"]["items"]
        .as_array()
        .expect("faculty items")
        .iter()
        .map(|i| i["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.iter().any(|n| n == "Luật"), "{:?}", names);
    assert!(names.iter().any(|n| n == "Công nghệ thông tin"), "{:?}", names);

    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "faculties.create",
        json!({ "name": "Khoa Toán" }),
    );
    assert_ok(&created, "faculties.create");
    let id = created["result"]["id"].as_i64().expect("faculty id");

    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "faculties.create",
        json!({ "name": "Khoa Toán" }),
    );
    assert_eq!(error_code(&dup), "duplicate_key");

    let renamed = request(
        &mut stdin,
        &mut reader,
        "5",
        "faculties.update",
        json!({ "id": id, "name": "Khoa Toán - Tin" }),
    );
    assert_ok(&renamed, "faculties.update");

    let ghost = request(
        &mut stdin,
        &mut reader,
        "6",
        "faculties.update",
        json!({ "id": 9999, "name": "Không tồn tại" }),
    );
    assert_eq!(error_code(&ghost), "not_found");

    let programs = request(&mut stdin, &mut reader, "7", "programs.list", json!({}));
    assert!(!programs["result"]["items"].as_array().unwrap().is_empty());
    let statuses = request(&mut stdin, &mut reader, "8", "statuses.list", json!({}));
    assert!(statuses["result"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .any(|i| i["name"] == "Đang học"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
