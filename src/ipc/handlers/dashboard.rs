use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};

use crate::ipc::handlers::students::STUDENT_STATUSES;
use crate::ipc::handlers::{attendance, payments};
use crate::ipc::helpers::{
    count, fmt_date, opt_date, respond, today, Filters, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

fn dashboard_stats(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let date = opt_date(params, "date")?.unwrap_or_else(today);

    let mut students = serde_json::Map::new();
    let mut student_total = 0;
    for status in STUDENT_STATUSES {
        let n = count(
            conn,
            "SELECT COUNT(*) FROM students WHERE status = ?",
            &[&status],
        )?;
        student_total += n;
        students.insert(status.to_string(), json!(n));
    }
    students.insert("total".to_string(), json!(student_total));

    let active_workers = count(
        conn,
        "SELECT COUNT(*) FROM workers WHERE status = 'active'",
        &[],
    )?;
    let active_teachers = count(
        conn,
        "SELECT COUNT(*) FROM workers WHERE status = 'active' AND role = 'teacher'",
        &[],
    )?;
    let classrooms = count(conn, "SELECT COUNT(*) FROM classrooms", &[])?;

    let mut day = Filters::default();
    day.eq("date", Some(fmt_date(date)));
    let attendance = attendance::summarize(conn, &day)?;

    let money = payments::summarize(conn, None, None, date)?;
    let open_tasks = count(
        conn,
        "SELECT COUNT(*) FROM tasks WHERE status <> 'completed'",
        &[],
    )?;
    let plans_awaiting_review = count(
        conn,
        "SELECT COUNT(*) FROM lesson_plans WHERE status = 'submitted'",
        &[],
    )?;

    Ok(json!({
        "date": fmt_date(date),
        "students": students,
        "activeWorkers": active_workers,
        "activeTeachers": active_teachers,
        "classrooms": classrooms,
        "attendance": {
            "rate": attendance["rate"],
            "total": attendance["total"],
            "counts": attendance["counts"],
        },
        "payments": {
            "pending": money["pending"],
            "overdue": money["overdue"],
            "overdueCount": money["counts"]["overdue"],
        },
        "openTasks": open_tasks,
        "plansAwaitingReview": plans_awaiting_review,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let result = match req.method.as_str() {
        "dashboard.stats" => dashboard_stats(&state.db, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
