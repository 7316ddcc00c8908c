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

fn two_classrooms_and_a_teacher(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String, String) {
    let _ = request_ok(stdin, reader, "f0", "demo.clear", json!({}));
    let teacher = request_ok(
        stdin,
        reader,
        "f1",
        "workers.create",
        json!({ "firstName": "Luz", "lastName": "Ramos", "role": "teacher" }),
    );
    let mut rooms = Vec::new();
    for (i, name) in ["Delfines", "Tortugas"].iter().enumerate() {
        let c = request_ok(
            stdin,
            reader,
            &format!("f-c{i}"),
            "classrooms.create",
            json!({ "name": name, "capacity": 12 }),
        );
        rooms.push(str_at(&c, &["classroom", "id"]).to_string());
    }
    (
        rooms.remove(0),
        rooms.remove(0),
        str_at(&teacher, &["worker", "id"]).to_string(),
    )
}

#[test]
fn schedule_slots_reject_overlaps_per_classroom_and_teacher() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (room_a, room_b, teacher) = two_classrooms_and_a_teacher(&mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedules.create",
        json!({
            "classroomId": room_a, "teacherId": teacher, "course": "Music",
            "dayOfWeek": 1, "startTime": "08:00", "endTime": "09:00",
        }),
    );
    let first_id = str_at(&first, &["schedule", "id"]).to_string();

    // Back-to-back is fine.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedules.create",
        json!({
            "classroomId": room_a, "course": "Art",
            "dayOfWeek": 1, "startTime": "09:00", "endTime": "09:45",
        }),
    );

    let clash = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedules.create",
        json!({
            "classroomId": room_b, "teacherId": teacher, "course": "Music",
            "dayOfWeek": 1, "startTime": "08:30", "endTime": "09:30",
        }),
    );
    assert_eq!(clash["error"]["code"], json!("conflict"));
    assert_eq!(clash["error"]["details"]["scope"], json!("teacher"));
    assert_eq!(clash["error"]["details"]["conflictingSlotId"], json!(first_id));

    let other_day = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedules.create",
        json!({
            "classroomId": room_b, "teacherId": teacher, "course": "Music",
            "dayOfWeek": 2, "startTime": "08:30", "endTime": "09:30",
        }),
    );
    let other_id = str_at(&other_day, &["schedule", "id"]).to_string();

    for (i, params) in [
        json!({ "classroomId": room_b, "course": "Play", "dayOfWeek": 3, "startTime": "10:00", "endTime": "10:00" }),
        json!({ "classroomId": room_b, "course": "Play", "dayOfWeek": 8, "startTime": "10:00", "endTime": "11:00" }),
        json!({ "classroomId": room_b, "course": "Play", "dayOfWeek": 3, "startTime": "25:00", "endTime": "26:00" }),
    ]
    .into_iter()
    .enumerate()
    {
        let code = request_err(&mut stdin, &mut reader, &format!("b{i}"), "schedules.create", params);
        assert_eq!(code, "bad_params");
    }

    // Moving a slot onto its own time does not clash with itself.
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.update",
        json!({ "scheduleId": other_id, "startTime": "08:45" }),
    );
    assert_eq!(moved["schedule"]["startTime"], json!("08:45"));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "schedules.update",
        json!({ "scheduleId": other_id, "dayOfWeek": 1 }),
    );
    assert_eq!(code, "conflict");

    let monday = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedules.list",
        json!({ "classroomId": room_a, "dayOfWeek": 1 }),
    );
    let starts: Vec<&str> = monday["schedules"]
        .as_array()
        .map(|a| a.iter().filter_map(|s| s["startTime"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(starts, vec!["08:00", "09:00"]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedules.delete",
        json!({ "scheduleId": first_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "schedules.delete",
        json!({ "scheduleId": first_id }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn tasks_stamp_completion_and_sort_by_due_date() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (room_a, _room_b, teacher) = two_classrooms_and_a_teacher(&mut stdin, &mut reader);

    let undated = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "tasks.create",
        json!({ "title": "Order crayons" }),
    );
    assert_eq!(undated["task"]["priority"], json!("medium"));
    assert_eq!(undated["task"]["status"], json!("pending"));
    let late = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tasks.create",
        json!({ "title": "Parent meeting", "dueDate": "2030-05-20", "assigneeId": teacher, "priority": "high" }),
    );
    let soon = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "tasks.create",
        json!({ "title": "Decorate room", "dueDate": "2030-05-02", "classroomId": room_a }),
    );
    let soon_id = str_at(&soon, &["task", "id"]).to_string();

    let all = request_ok(&mut stdin, &mut reader, "4", "tasks.list", json!({}));
    let titles: Vec<&str> = all["tasks"]
        .as_array()
        .map(|a| a.iter().filter_map(|t| t["title"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(titles, vec!["Decorate room", "Parent meeting", "Order crayons"]);

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "tasks.list",
        json!({ "dueBefore": "2030-05-10" }),
    );
    assert_eq!(before["tasks"].as_array().map(|a| a.len()), Some(1));
    // The bound itself is excluded.
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "5b",
        "tasks.list",
        json!({ "dueBefore": "2030-05-20" }),
    );
    assert_eq!(before["tasks"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(before["tasks"][0]["id"], json!(soon_id));

    let done = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "tasks.setStatus",
        json!({ "taskId": soon_id, "status": "completed" }),
    );
    assert!(done["task"]["completedAt"].is_string());
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "tasks.setStatus",
        json!({ "taskId": soon_id, "status": "in_progress" }),
    );
    assert_eq!(reopened["task"]["completedAt"], json!(null));

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "tasks.list",
        json!({ "assigneeId": teacher }),
    );
    assert_eq!(mine["tasks"][0]["id"], late["task"]["id"]);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "tasks.create",
        json!({ "title": "Ghost", "assigneeId": "nobody" }),
    );
    assert_eq!(code, "not_found");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "tasks.setStatus",
        json!({ "taskId": soon_id, "status": "archived" }),
    );
    assert_eq!(code, "bad_params");

    // Deleting the assignee keeps the task, unassigned.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "workers.delete",
        json!({ "workerId": teacher }),
    );
    let orphan = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "tasks.list",
        json!({ "status": "pending" }),
    );
    assert!(orphan["tasks"]
        .as_array()
        .map(|a| a.iter().all(|t| t["assigneeId"].is_null()))
        .unwrap_or(false));
}

#[test]
fn task_update_clears_nulls_and_keeps_absent_fields() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (room_a, room_b, teacher) = two_classrooms_and_a_teacher(&mut stdin, &mut reader);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "tasks.create",
        json!({
            "title": "Plan field trip",
            "description": "Zoo, bus for 20",
            "classroomId": room_a,
            "assigneeId": teacher,
            "dueDate": "2030-06-01",
            "priority": "high",
        }),
    );
    let task_id = str_at(&created, &["task", "id"]).to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tasks.update",
        json!({
            "taskId": task_id,
            "description": null,
            "dueDate": null,
            "classroomId": room_b,
            "status": "completed",
        }),
    );
    let task = &updated["task"];
    assert_eq!(task["title"], json!("Plan field trip"));
    assert_eq!(task["description"], json!(null));
    assert_eq!(task["dueDate"], json!(null));
    assert_eq!(task["classroomId"], json!(room_b));
    assert_eq!(task["assigneeId"], json!(teacher));
    assert_eq!(task["priority"], json!("high"));
    assert!(task["completedAt"].is_string());

    let unassigned = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "tasks.update",
        json!({ "taskId": task_id, "assigneeId": null, "title": "Plan museum trip" }),
    );
    assert_eq!(unassigned["task"]["assigneeId"], json!(null));
    assert_eq!(unassigned["task"]["title"], json!("Plan museum trip"));
    assert_eq!(unassigned["task"]["status"], json!("completed"));

    for (i, params) in [
        json!({ "taskId": task_id, "title": null }),
        json!({ "taskId": task_id, "title": "   " }),
        json!({ "taskId": task_id, "dueDate": "01/06/2030" }),
        json!({ "taskId": task_id, "priority": "urgent" }),
    ]
    .into_iter()
    .enumerate()
    {
        let code = request_err(&mut stdin, &mut reader, &format!("b{i}"), "tasks.update", params);
        assert_eq!(code, "bad_params");
    }

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "tasks.update",
        json!({ "taskId": task_id, "classroomId": "missing-room" }),
    );
    assert_eq!(code, "not_found");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "tasks.update",
        json!({ "taskId": "missing-task", "title": "x" }),
    );
    assert_eq!(code, "not_found");

    // Failed updates leave the stored task untouched.
    let listed = request_ok(&mut stdin, &mut reader, "6", "tasks.list", json!({}));
    assert_eq!(listed["tasks"][0]["title"], json!("Plan museum trip"));
    assert_eq!(listed["tasks"][0]["classroomId"], json!(room_b));
}
