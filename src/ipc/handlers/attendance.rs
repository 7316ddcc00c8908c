use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::calc::attendance_rate;
use crate::ipc::handlers::classrooms::require_classroom;
use crate::ipc::handlers::students::require_student;
use crate::ipc::helpers::{
    begin, commit, db_failed, fmt_date, new_id, now_ts, opt_date, opt_str, opt_str_array,
    required_date, required_enum, required_str, respond, Filters, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

pub const STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub classroom_id: String,
    pub date: String,
    pub status: String,
    pub note: Option<String>,
    pub updated_at: String,
}

const COLUMNS: &str = "id, student_id, classroom_id, date, status, note, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        classroom_id: r.get(2)?,
        date: r.get(3)?,
        status: r.get(4)?,
        note: r.get(5)?,
        updated_at: r.get(6)?,
    })
}

/// Upserts one `(student, date)` mark and returns the stored record.
fn write_mark(
    conn: &Connection,
    student_id: &str,
    classroom_id: &str,
    date: &str,
    status: &str,
    note: Option<&str>,
) -> Result<AttendanceRecord, HandlerErr> {
    let existing_id: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance WHERE student_id = ? AND date = ?",
            (student_id, date),
            |r| r.get(0),
        )
        .optional()?;
    let record = AttendanceRecord {
        id: existing_id.unwrap_or_else(new_id),
        student_id: student_id.to_string(),
        classroom_id: classroom_id.to_string(),
        date: date.to_string(),
        status: status.to_string(),
        note: note.map(str::to_string),
        updated_at: now_ts(),
    };
    conn.execute(
        &format!(
            "INSERT INTO attendance({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(student_id, date) DO UPDATE SET
               classroom_id = excluded.classroom_id,
               status = excluded.status,
               note = excluded.note,
               updated_at = excluded.updated_at"
        ),
        rusqlite::params![
            record.id,
            record.student_id,
            record.classroom_id,
            record.date,
            record.status,
            record.note,
            record.updated_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "attendance"))?;
    Ok(record)
}

fn date_range_filters(params: &JsonValue, filters: &mut Filters) -> Result<(), HandlerErr> {
    let from = opt_date(params, "from")?;
    let to = opt_date(params, "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    filters
        .cmp("date", ">=", from.map(fmt_date))
        .cmp("date", "<=", to.map(fmt_date));
    Ok(())
}

fn attendance_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq("student_id", opt_str(params, "studentId")?)
        .eq("date", opt_date(params, "date")?.map(fmt_date));
    date_range_filters(params, &mut filters)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM attendance{} ORDER BY date DESC, student_id",
        filters.where_sql()
    ))?;
    let records = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attendance": records }))
}

fn attendance_mark(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;
    let date = fmt_date(required_date(params, "date")?);
    let status = required_enum(params, "status", &STATUSES)?;
    let note = opt_str(params, "note")?;
    let Some(classroom_id) = opt_str(params, "classroomId")?.or(student.classroom_id.clone())
    else {
        return Err(HandlerErr::bad_params(
            "student has no classroom; pass classroomId",
        ));
    };
    require_classroom(conn, &classroom_id)?;
    let record = write_mark(
        conn,
        &student.id,
        &classroom_id,
        &date,
        &status,
        note.as_deref(),
    )?;
    Ok(json!({ "attendance": record }))
}

fn attendance_bulk_mark(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let classroom = require_classroom(conn, &required_str(params, "classroomId")?)?;
    let date = fmt_date(required_date(params, "date")?);
    let status = required_enum(params, "status", &STATUSES)?;

    let members = {
        let mut stmt = conn.prepare(
            "SELECT id FROM students WHERE classroom_id = ? AND status = 'active' ORDER BY id",
        )?;
        let ids = stmt
            .query_map([&classroom.id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let targets: Vec<String> = match opt_str_array(params, "studentIds")? {
        Some(ids) => ids,
        None => members.clone(),
    };

    let tx = begin(conn)?;
    let mut written = 0usize;
    let mut skipped = Vec::new();
    for student_id in targets {
        // Anyone who is not an active member is skipped, not rejected.
        if !members.contains(&student_id) {
            skipped.push(student_id);
            continue;
        }
        write_mark(&tx, &student_id, &classroom.id, &date, &status, None)?;
        written += 1;
    }
    commit(tx)?;
    Ok(json!({ "written": written, "skipped": skipped }))
}

fn attendance_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "attendanceId")?;
    let removed = conn
        .execute("DELETE FROM attendance WHERE id = ?", [&id])
        .map_err(db_failed("db_delete_failed", "attendance"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("attendance record not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Status counts and attendance rate over the records `filters` selects.
pub fn summarize(conn: &Connection, filters: &Filters) -> Result<JsonValue, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*) FROM attendance{} GROUP BY status",
        filters.where_sql()
    ))?;
    let rows = stmt
        .query_map(filters.args(), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = serde_json::Map::new();
    for s in STATUSES {
        counts.insert(s.to_string(), json!(0));
    }
    let mut total = 0usize;
    let mut attended = 0usize;
    for (status, n) in rows {
        let n = usize::try_from(n).unwrap_or(0);
        total += n;
        if status == "present" || status == "late" {
            attended += n;
        }
        counts.insert(status, json!(n));
    }
    Ok(json!({
        "counts": counts,
        "total": total,
        "rate": attendance_rate(attended, total),
    }))
}

fn attendance_summary(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student_id = opt_str(params, "studentId")?;
    let classroom_id = opt_str(params, "classroomId")?;
    if let Some(sid) = student_id.as_deref() {
        require_student(conn, sid)?;
    }
    if let Some(cid) = classroom_id.as_deref() {
        require_classroom(conn, cid)?;
    }
    let mut filters = Filters::default();
    filters
        .eq("student_id", student_id.clone())
        .eq("classroom_id", classroom_id.clone());
    date_range_filters(params, &mut filters)?;
    let mut summary = summarize(conn, &filters)?;
    summary["studentId"] = json!(student_id);
    summary["classroomId"] = json!(classroom_id);
    Ok(summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "attendance.list" => attendance_list(conn, &req.params),
        "attendance.mark" => attendance_mark(conn, &req.params),
        "attendance.bulkMark" => attendance_bulk_mark(conn, &req.params),
        "attendance.delete" => attendance_delete(conn, &req.params),
        "attendance.summary" => attendance_summary(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
