use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_nidod");
    let mut child = Command::new(exe)
        .env("NIDO_CONFIG", "/nonexistent/nidod.toml")
        .env("NIDO_DEMO__QUERY_MAX_MS", "0")
        .env("NIDO_DEMO__MUTATION_MAX_MS", "0")
        .env("NIDO_LOG__LEVEL", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn nidod");
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

fn str_at<'a>(v: &'a serde_json::Value, path: &[&str]) -> &'a str {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing {key} in {v}"));
    }
    cur.as_str().unwrap_or_else(|| panic!("{path:?} is not a string"))
}

#[test]
fn every_report_kind_generates_and_is_stored() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "0", "demo.reset", json!({}));

    let classrooms = request_ok(&mut stdin, &mut reader, "1", "classrooms.list", json!({}));
    let classroom_id = classrooms["classrooms"][0]["id"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let cases = [
        ("attendance", json!({ "kind": "attendance" })),
        ("grades", json!({ "kind": "grades", "classroomId": classroom_id, "period": 1 })),
        ("payments", json!({ "kind": "payments" })),
        ("payroll", json!({ "kind": "payroll", "period": "2030-01" })),
        ("enrollment", json!({ "kind": "enrollment", "title": "Seats" })),
    ];
    let mut ids = Vec::new();
    for (i, (kind, params)) in cases.into_iter().enumerate() {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{i}"),
            "reports.generate",
            params,
        );
        assert_eq!(res["report"]["kind"], json!(kind));
        assert!(res["report"]["data"].is_object(), "{kind} data missing");
        ids.push(str_at(&res, &["report", "id"]).to_string());
    }

    let listed = request_ok(&mut stdin, &mut reader, "2", "reports.list", json!({}));
    let reports = listed["reports"].as_array().cloned().unwrap_or_default();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.get("data").is_none()));

    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.get",
        json!({ "reportId": ids[4] }),
    );
    assert_eq!(enrollment["report"]["title"], json!("Seats"));
    let rooms = enrollment["report"]["data"]["classrooms"]
        .as_array()
        .map(|a| a.len())
        .unwrap_or(0);
    assert!(rooms > 0);

    let payroll = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.get",
        json!({ "reportId": ids[3] }),
    );
    assert_eq!(payroll["report"]["params"]["period"], json!("2030-01"));
    assert_eq!(payroll["report"]["data"]["count"], json!(0));

    let only_payroll = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.list",
        json!({ "kind": "payroll" }),
    );
    assert_eq!(only_payroll["reports"].as_array().map(|a| a.len()), Some(1));

    for (i, params) in [
        json!({ "kind": "salaries" }),
        json!({ "kind": "grades", "classroomId": classroom_id }),
        json!({ "kind": "payroll", "period": "2030-1" }),
        json!({ "kind": "attendance", "from": "2030-02-01", "to": "2030-01-01" }),
    ]
    .into_iter()
    .enumerate()
    {
        let code = request_err(&mut stdin, &mut reader, &format!("b{i}"), "reports.generate", params);
        assert_eq!(code, "bad_params");
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.delete",
        json!({ "reportId": ids[0] }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "reports.get",
        json!({ "reportId": ids[0] }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn dashboard_stats_reflect_the_store() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "0", "demo.reset", json!({}));

    let stats = request_ok(&mut stdin, &mut reader, "1", "dashboard.stats", json!({}));
    for key in [
        "date",
        "students",
        "activeWorkers",
        "activeTeachers",
        "classrooms",
        "attendance",
        "payments",
        "openTasks",
        "plansAwaitingReview",
    ] {
        assert!(stats.get(key).is_some(), "missing {key}");
    }
    assert_eq!(stats["classrooms"], json!(3));
    assert_eq!(stats["students"]["total"], json!(10));
    assert_eq!(stats["students"]["withdrawn"], json!(1));
    assert!(stats["plansAwaitingReview"].as_i64().unwrap_or(0) >= 1);

    let _ = request_ok(&mut stdin, &mut reader, "2", "demo.clear", json!({}));
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "dashboard.stats",
        json!({ "date": "2030-01-15" }),
    );
    assert_eq!(empty["date"], json!("2030-01-15"));
    assert_eq!(empty["students"]["total"], json!(0));
    assert_eq!(empty["attendance"]["rate"], json!(0.0));
    assert_eq!(empty["payments"]["overdueCount"], json!(0));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "dashboard.stats",
        json!({ "date": "15/01/2030" }),
    );
    assert_eq!(code, "bad_params");
}
