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
fn payments_track_overdue_and_settle_once() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "0", "demo.clear", json!({}));
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "firstName": "Emma", "lastName": "Quispe" }),
    );
    let student_id = str_at(&student, &["student", "id"]).to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "payments.create",
        json!({ "studentId": student_id, "concept": "tuition", "amount": 0, "dueDate": "2030-01-10" }),
    );
    assert_eq!(code, "bad_params");

    let mut ids = Vec::new();
    for (i, (concept, amount, due)) in [
        ("tuition", 300.0, "2030-01-10"),
        ("materials", 45.5, "2030-01-20"),
        ("tuition", 300.0, "2030-02-10"),
    ]
    .into_iter()
    .enumerate()
    {
        let p = request_ok(
            &mut stdin,
            &mut reader,
            &format!("p{i}"),
            "payments.create",
            json!({ "studentId": student_id, "concept": concept, "amount": amount, "dueDate": due }),
        );
        assert_eq!(p["payment"]["status"], json!("pending"));
        ids.push(str_at(&p, &["payment", "id"]).to_string());
    }

    let overdue = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "payments.list",
        json!({ "asOf": "2030-02-01", "overdue": true }),
    );
    assert_eq!(overdue["asOf"], json!("2030-02-01"));
    assert_eq!(overdue["payments"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(overdue["payments"][0]["overdue"], json!(true));

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.pay",
        json!({ "paymentId": ids[0], "method": "transfer", "paidAt": "2030-01-31" }),
    );
    assert_eq!(paid["payment"]["status"], json!("paid"));
    assert_eq!(paid["payment"]["paidAt"], json!("2030-01-31"));
    assert_eq!(paid["payment"]["overdue"], json!(false));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "payments.pay",
        json!({ "paymentId": ids[0], "method": "cash" }),
    );
    assert_eq!(code, "conflict");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "payments.pay",
        json!({ "paymentId": ids[1] }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "payments.cancel",
        json!({ "paymentId": ids[2] }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "payments.cancel",
        json!({ "paymentId": ids[0] }),
    );
    assert_eq!(code, "conflict");

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "payments.summary",
        json!({ "asOf": "2030-02-01" }),
    );
    assert_eq!(summary["collected"], json!(300.0));
    assert_eq!(summary["pending"], json!(45.5));
    assert_eq!(summary["overdue"], json!(45.5));
    assert_eq!(summary["counts"]["paid"], json!(1));
    assert_eq!(summary["counts"]["overdue"], json!(1));
    assert_eq!(summary["counts"]["cancelled"], json!(1));

    let january = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "payments.list",
        json!({ "from": "2030-01-01", "to": "2030-01-31" }),
    );
    assert_eq!(january["payments"].as_array().map(|a| a.len()), Some(2));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "payments.delete",
        json!({ "paymentId": ids[1] }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "payments.delete",
        json!({ "paymentId": ids[1] }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn payroll_generates_once_and_moves_through_its_states() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "0", "demo.clear", json!({}));
    let worker = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workers.create",
        json!({ "firstName": "Rosa", "lastName": "Apaza", "role": "teacher", "baseSalary": 2000 }),
    );
    let worker_id = str_at(&worker, &["worker", "id"]).to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workers.create",
        json!({ "firstName": "Old", "lastName": "Timer", "role": "support", "baseSalary": 900, "status": "inactive" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "payroll.generate",
        json!({ "period": "2030-13" }),
    );
    assert_eq!(code, "bad_params");

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payroll.generate",
        json!({ "period": "2030-03" }),
    );
    assert_eq!(generated["created"], json!(1));
    let entry = &generated["entries"][0];
    assert_eq!(entry["workerId"], json!(worker_id));
    assert_eq!(entry["deductions"], json!(260.0));
    assert_eq!(entry["netPay"], json!(1740.0));
    assert_eq!(entry["status"], json!("draft"));
    let entry_id = entry["id"].as_str().unwrap_or_default().to_string();

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "payroll.generate",
        json!({ "period": "2030-03" }),
    );
    assert_eq!(again["created"], json!(0));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "payroll.update",
        json!({ "payrollId": entry_id, "bonuses": 100 }),
    );
    assert_eq!(updated["payroll"]["netPay"], json!(1840.0));

    let negative = request(
        &mut stdin,
        &mut reader,
        "7",
        "payroll.update",
        json!({ "payrollId": entry_id, "deductions": 5000 }),
    );
    assert_eq!(negative["error"]["code"], json!("bad_params"));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "payroll.update",
        json!({ "payrollId": entry_id, "bonuses": -1 }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "payroll.pay",
        json!({ "payrollId": entry_id }),
    );
    assert_eq!(code, "conflict");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "payroll.approve",
        json!({ "payrollId": entry_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "payroll.update",
        json!({ "payrollId": entry_id, "bonuses": 5 }),
    );
    assert_eq!(code, "conflict");
    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "payroll.pay",
        json!({ "payrollId": entry_id }),
    );
    assert_eq!(paid["payroll"]["status"], json!("paid"));
    assert!(paid["payroll"]["paidAt"].is_string());

    let code = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "payroll.delete",
        json!({ "payrollId": entry_id }),
    );
    assert_eq!(code, "conflict");
    // Paid payroll keeps the worker on the books.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "workers.delete",
        json!({ "workerId": worker_id }),
    );
    assert_eq!(code, "conflict");

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "payroll.summary",
        json!({ "period": "2030-03" }),
    );
    assert_eq!(summary["count"], json!(1));
    assert_eq!(summary["netPay"], json!(1840.0));
    assert_eq!(summary["byStatus"]["paid"]["count"], json!(1));
    assert_eq!(summary["byStatus"]["draft"]["count"], json!(0));
}
