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
fn lesson_plans_go_through_submission_and_review() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "0", "demo.clear", json!({}));
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workers.create",
        json!({ "firstName": "Nora", "lastName": "Vargas", "role": "teacher" }),
    );
    let teacher_id = str_at(&teacher, &["worker", "id"]).to_string();
    let classroom = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classrooms.create",
        json!({ "name": "Abejitas", "capacity": 15, "teacherId": teacher_id }),
    );
    let classroom_id = str_at(&classroom, &["classroom", "id"]).to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "plans.create",
        json!({ "teacherId": teacher_id, "classroomId": classroom_id, "title": "Colors", "weekStart": "2030-03-05" }),
    );
    assert_eq!(code, "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "plans.create",
        json!({
            "teacherId": teacher_id,
            "classroomId": classroom_id,
            "title": "Colors",
            "weekStart": "2030-03-04",
            "activities": ["Finger painting", "Color hunt"],
        }),
    );
    let plan_id = str_at(&created, &["plan", "id"]).to_string();
    assert_eq!(created["plan"]["status"], json!("draft"));
    assert_eq!(created["plan"]["activities"][1], json!("Color hunt"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "plans.review",
        json!({ "planId": plan_id, "decision": "approve" }),
    );
    assert_eq!(code, "conflict");

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "plans.submit",
        json!({ "planId": plan_id }),
    );
    assert!(submitted["plan"]["submittedAt"].is_string());
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "plans.update",
        json!({ "planId": plan_id, "title": "Shapes" }),
    );
    assert_eq!(code, "conflict");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "plans.review",
        json!({ "planId": plan_id, "decision": "reject" }),
    );
    assert_eq!(code, "bad_params");
    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "plans.review",
        json!({ "planId": plan_id, "decision": "reject", "comment": "Add outdoor time" }),
    );
    assert_eq!(rejected["plan"]["status"], json!("rejected"));
    assert_eq!(rejected["plan"]["reviewComment"], json!("Add outdoor time"));

    // Rejected plans can be revised and sent again.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "plans.update",
        json!({ "planId": plan_id, "activities": ["Finger painting", "Garden walk"] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "plans.submit",
        json!({ "planId": plan_id }),
    );
    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "plans.review",
        json!({ "planId": plan_id, "decision": "approve" }),
    );
    assert_eq!(approved["plan"]["status"], json!("approved"));

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "plans.get",
        json!({ "planId": plan_id }),
    );
    assert_eq!(detail["teacherName"], json!("Nora Vargas"));
    assert_eq!(detail["classroomName"], json!("Abejitas"));
    assert_eq!(detail["plan"]["activities"][1], json!("Garden walk"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "plans.delete",
        json!({ "planId": plan_id }),
    );
    assert_eq!(code, "conflict");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "plans.list",
        json!({ "status": "approved", "weekStart": "2030-03-04" }),
    );
    assert_eq!(listed["plans"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn annotations_are_listed_newest_first_and_summarized() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "0", "demo.clear", json!({}));
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "firstName": "Pia", "lastName": "Torres" }),
    );
    let student_id = str_at(&student, &["student", "id"]).to_string();

    for (i, (kind, date)) in [
        ("positive", "2030-04-01"),
        ("positive", "2030-04-03"),
        ("observation", "2030-04-02"),
    ]
    .into_iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{i}"),
            "annotations.create",
            json!({ "studentId": student_id, "kind": kind, "description": "Noted", "date": date }),
        );
    }
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "annotations.create",
        json!({ "studentId": student_id, "kind": "neutral", "description": "Noted" }),
    );
    assert_eq!(code, "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "annotations.list",
        json!({ "studentId": student_id }),
    );
    let dates: Vec<&str> = listed["annotations"]
        .as_array()
        .map(|a| a.iter().filter_map(|n| n["date"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(dates, vec!["2030-04-03", "2030-04-02", "2030-04-01"]);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "annotations.summary",
        json!({ "studentId": student_id }),
    );
    assert_eq!(summary["total"], json!(3));
    assert_eq!(summary["counts"]["positive"], json!(2));
    assert_eq!(summary["counts"]["negative"], json!(0));

    let first_id = listed["annotations"][0]["id"].as_str().unwrap_or_default().to_string();
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "annotations.update",
        json!({ "annotationId": first_id, "kind": "negative", "description": "Pushed a friend" }),
    );
    assert_eq!(updated["annotation"]["kind"], json!("negative"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "annotations.delete",
        json!({ "annotationId": first_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "annotations.delete",
        json!({ "annotationId": first_id }),
    );
    assert_eq!(code, "not_found");
}
