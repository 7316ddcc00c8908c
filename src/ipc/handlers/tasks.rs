use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::helpers::{
    db_failed, fmt_date, new_id, now_ts, opt_date, opt_enum, opt_str, patch_date, patch_enum,
    patch_required_str, patch_str, require_record, required_enum, required_str, respond, Filters,
    HandlerErr, HandlerResult, Patch,
};
use crate::ipc::types::{AppState, Request};

const PRIORITIES: [&str; 3] = ["low", "medium", "high"];
const STATUSES: [&str; 3] = ["pending", "in_progress", "completed"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub classroom_id: Option<String>,
    pub assignee_id: Option<String>,
    pub due_date: Option<String>,
    pub priority: String,
    pub status: String,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, title, description, classroom_id, assignee_id, due_date, priority,
    status, completed_at, created_at, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        classroom_id: r.get(3)?,
        assignee_id: r.get(4)?,
        due_date: r.get(5)?,
        priority: r.get(6)?,
        status: r.get(7)?,
        completed_at: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn require_task(conn: &Connection, id: &str) -> Result<Task, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("task not found"))
}

/// Applies a status change, stamping or clearing `completed_at`.
fn set_status(task: &mut Task, status: String) {
    if status == "completed" {
        if task.status != "completed" {
            task.completed_at = Some(now_ts());
        }
    } else {
        task.completed_at = None;
    }
    task.status = status;
}

fn write_task(conn: &Connection, t: &Task) -> Result<(), HandlerErr> {
    conn.execute(
        &format!(
            "INSERT INTO tasks({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               description = excluded.description,
               classroom_id = excluded.classroom_id,
               assignee_id = excluded.assignee_id,
               due_date = excluded.due_date,
               priority = excluded.priority,
               status = excluded.status,
               completed_at = excluded.completed_at,
               updated_at = excluded.updated_at"
        ),
        rusqlite::params![
            t.id,
            t.title,
            t.description,
            t.classroom_id,
            t.assignee_id,
            t.due_date,
            t.priority,
            t.status,
            t.completed_at,
            t.created_at,
            t.updated_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "tasks"))?;
    Ok(())
}

fn check_refs(
    conn: &Connection,
    classroom_id: Option<&str>,
    assignee_id: Option<&str>,
) -> Result<(), HandlerErr> {
    if let Some(cid) = classroom_id {
        require_record(conn, "classrooms", cid, "classroom")?;
    }
    if let Some(aid) = assignee_id {
        require_record(conn, "workers", aid, "assignee")?;
    }
    Ok(())
}

fn tasks_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq("assignee_id", opt_str(params, "assigneeId")?)
        .eq("status", opt_enum(params, "status", &STATUSES)?)
        .cmp("due_date", "<", opt_date(params, "dueBefore")?.map(fmt_date));
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM tasks{} ORDER BY due_date IS NULL, due_date, created_at, id",
        filters.where_sql()
    ))?;
    let tasks = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "tasks": tasks }))
}

fn tasks_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let classroom_id = opt_str(params, "classroomId")?;
    let assignee_id = opt_str(params, "assigneeId")?;
    check_refs(conn, classroom_id.as_deref(), assignee_id.as_deref())?;
    let now = now_ts();
    let mut task = Task {
        id: new_id(),
        title: required_str(params, "title")?,
        description: opt_str(params, "description")?,
        classroom_id,
        assignee_id,
        due_date: opt_date(params, "dueDate")?.map(fmt_date),
        priority: opt_enum(params, "priority", &PRIORITIES)?
            .unwrap_or_else(|| "medium".to_string()),
        status: "pending".to_string(),
        completed_at: None,
        created_at: now.clone(),
        updated_at: now,
    };
    if let Some(status) = opt_enum(params, "status", &STATUSES)? {
        set_status(&mut task, status);
    }
    write_task(conn, &task)?;
    Ok(json!({ "task": task }))
}

fn tasks_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut t = require_task(conn, &required_str(params, "taskId")?)?;
    let classroom = patch_str(params, "classroomId")?;
    let assignee = patch_str(params, "assigneeId")?;
    let set_ref = |p: &Patch<String>| match p {
        Patch::Set(id) => Some(id.clone()),
        _ => None,
    };
    check_refs(
        conn,
        set_ref(&classroom).as_deref(),
        set_ref(&assignee).as_deref(),
    )?;
    t.classroom_id = classroom.apply(t.classroom_id);
    t.assignee_id = assignee.apply(t.assignee_id);
    t.title = patch_required_str(params, "title", t.title)?;
    t.description = patch_str(params, "description")?.apply(t.description);
    t.due_date = patch_date(params, "dueDate")?.apply(t.due_date);
    if let Patch::Set(p) = patch_enum(params, "priority", &PRIORITIES)? {
        t.priority = p;
    }
    if let Patch::Set(s) = patch_enum(params, "status", &STATUSES)? {
        set_status(&mut t, s);
    }
    t.updated_at = now_ts();
    write_task(conn, &t)?;
    Ok(json!({ "task": t }))
}

fn tasks_set_status(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut t = require_task(conn, &required_str(params, "taskId")?)?;
    let status = required_enum(params, "status", &STATUSES)?;
    set_status(&mut t, status);
    t.updated_at = now_ts();
    write_task(conn, &t)?;
    Ok(json!({ "task": t }))
}

fn tasks_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "taskId")?;
    let removed = conn
        .execute("DELETE FROM tasks WHERE id = ?", [&id])
        .map_err(db_failed("db_delete_failed", "tasks"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("task not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "tasks.list" => tasks_list(conn, &req.params),
        "tasks.create" => tasks_create(conn, &req.params),
        "tasks.update" => tasks_update(conn, &req.params),
        "tasks.setStatus" => tasks_set_status(conn, &req.params),
        "tasks.delete" => tasks_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
