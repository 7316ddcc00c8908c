use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::handlers::classrooms::require_classroom;
use crate::ipc::handlers::grades::check_period;
use crate::ipc::helpers::{
    begin, commit, db_failed, fmt_date, new_id, now_ts, opt_enum, opt_i64, opt_str, patch_date,
    patch_required_str, patch_str, record_exists, required_date, required_i64, required_str,
    respond, Filters, HandlerErr, HandlerResult, Patch,
};
use crate::ipc::types::{AppState, Request};

const KINDS: [&str; 3] = ["diagnostic", "formative", "summative"];
const STATUSES: [&str; 2] = ["scheduled", "completed"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub title: String,
    pub course: String,
    pub classroom_id: String,
    pub teacher_id: Option<String>,
    pub period: i64,
    pub kind: String,
    pub date: String,
    pub status: String,
    pub created_at: String,
}

const COLUMNS: &str =
    "id, title, course, classroom_id, teacher_id, period, kind, date, status, created_at";

fn from_row(r: &Row) -> rusqlite::Result<Evaluation> {
    Ok(Evaluation {
        id: r.get(0)?,
        title: r.get(1)?,
        course: r.get(2)?,
        classroom_id: r.get(3)?,
        teacher_id: r.get(4)?,
        period: r.get(5)?,
        kind: r.get(6)?,
        date: r.get(7)?,
        status: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn require_evaluation(conn: &Connection, id: &str) -> Result<Evaluation, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM evaluations WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("evaluation not found"))
}

fn ensure_worker(conn: &Connection, id: Option<&str>) -> Result<(), HandlerErr> {
    if let Some(id) = id {
        if !record_exists(conn, "workers", id)? {
            return Err(HandlerErr::not_found("teacher not found"));
        }
    }
    Ok(())
}

fn write_evaluation(conn: &Connection, e: &Evaluation) -> Result<(), HandlerErr> {
    conn.execute(
        &format!(
            "INSERT INTO evaluations({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               course = excluded.course,
               classroom_id = excluded.classroom_id,
               teacher_id = excluded.teacher_id,
               period = excluded.period,
               kind = excluded.kind,
               date = excluded.date,
               status = excluded.status"
        ),
        rusqlite::params![
            e.id,
            e.title,
            e.course,
            e.classroom_id,
            e.teacher_id,
            e.period,
            e.kind,
            e.date,
            e.status,
            e.created_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "evaluations"))?;
    Ok(())
}

fn evaluations_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq_i64("period", opt_i64(params, "period")?)
        .eq("status", opt_enum(params, "status", &STATUSES)?);
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM evaluations{} ORDER BY date, title, id",
        filters.where_sql()
    ))?;
    let evaluations = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "evaluations": evaluations }))
}

fn evaluations_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let classroom = require_classroom(conn, &required_str(params, "classroomId")?)?;
    let teacher_id = opt_str(params, "teacherId")?.or(classroom.teacher_id.clone());
    ensure_worker(conn, teacher_id.as_deref())?;
    let evaluation = Evaluation {
        id: new_id(),
        title: required_str(params, "title")?,
        course: required_str(params, "course")?,
        classroom_id: classroom.id,
        teacher_id,
        period: check_period(required_i64(params, "period")?)?,
        kind: opt_enum(params, "kind", &KINDS)?.unwrap_or_else(|| "formative".to_string()),
        date: fmt_date(required_date(params, "date")?),
        status: "scheduled".to_string(),
        created_at: now_ts(),
    };
    write_evaluation(conn, &evaluation)?;
    Ok(json!({ "evaluation": evaluation }))
}

fn evaluations_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut e = require_evaluation(conn, &required_str(params, "evaluationId")?)?;
    e.title = patch_required_str(params, "title", e.title)?;
    e.course = patch_required_str(params, "course", e.course)?;
    let teacher = patch_str(params, "teacherId")?;
    if let Patch::Set(tid) = &teacher {
        ensure_worker(conn, Some(tid))?;
    }
    e.teacher_id = teacher.apply(e.teacher_id);
    if let Some(period) = opt_i64(params, "period")? {
        e.period = check_period(period)?;
    }
    if let Some(kind) = opt_enum(params, "kind", &KINDS)? {
        e.kind = kind;
    }
    match patch_date(params, "date")? {
        Patch::Set(d) => e.date = d,
        Patch::Clear => return Err(HandlerErr::bad_params("date must not be empty")),
        Patch::Keep => {}
    }
    write_evaluation(conn, &e)?;
    Ok(json!({ "evaluation": e }))
}

fn evaluations_complete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut e = require_evaluation(conn, &required_str(params, "evaluationId")?)?;
    if e.status == "completed" {
        return Err(HandlerErr::conflict("evaluation already completed"));
    }
    e.status = "completed".to_string();
    write_evaluation(conn, &e)?;
    Ok(json!({ "evaluation": e }))
}

fn evaluations_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let e = require_evaluation(conn, &required_str(params, "evaluationId")?)?;
    let tx = begin(conn)?;
    tx.execute(
        "UPDATE grades SET evaluation_id = NULL WHERE evaluation_id = ?",
        [&e.id],
    )
    .map_err(db_failed("db_update_failed", "grades"))?;
    tx.execute("DELETE FROM evaluations WHERE id = ?", [&e.id])
        .map_err(db_failed("db_delete_failed", "evaluations"))?;
    commit(tx)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "evaluations.list" => evaluations_list(conn, &req.params),
        "evaluations.create" => evaluations_create(conn, &req.params),
        "evaluations.update" => evaluations_update(conn, &req.params),
        "evaluations.complete" => evaluations_complete(conn, &req.params),
        "evaluations.delete" => evaluations_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
