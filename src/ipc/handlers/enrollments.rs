use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::handlers::classrooms::{current_school_year, require_classroom};
use crate::ipc::handlers::students::require_student;
use crate::ipc::helpers::{
    begin, commit, count, db_failed, fmt_date, new_id, now_ts, opt_date, opt_enum, opt_f64,
    opt_i64, opt_str, required_enum, required_str, respond, today, Filters, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};

const STATUSES: [&str; 4] = ["pending", "active", "cancelled", "completed"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub classroom_id: String,
    pub school_year: i64,
    pub status: String,
    pub fee: f64,
    pub enrolled_at: String,
    pub created_at: String,
}

const COLUMNS: &str =
    "id, student_id, classroom_id, school_year, status, fee, enrolled_at, created_at";

fn from_row(r: &Row) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        classroom_id: r.get(2)?,
        school_year: r.get(3)?,
        status: r.get(4)?,
        fee: r.get(5)?,
        enrolled_at: r.get(6)?,
        created_at: r.get(7)?,
    })
}

fn require_enrollment(conn: &Connection, id: &str) -> Result<Enrollment, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM enrollments WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("enrollment not found"))
}

/// Legal status moves; everything else is a conflict.
pub fn transition_allowed(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        ("pending", "active")
            | ("pending", "cancelled")
            | ("active", "completed")
            | ("active", "cancelled")
    )
}

fn ensure_capacity(conn: &Connection, classroom_id: &str) -> Result<(), HandlerErr> {
    let classroom = require_classroom(conn, classroom_id)?;
    let active = count(
        conn,
        "SELECT COUNT(*) FROM enrollments WHERE classroom_id = ? AND status = 'active'",
        &[&classroom_id],
    )?;
    if active >= classroom.capacity {
        return Err(HandlerErr::conflict(format!(
            "classroom {} is full ({}/{})",
            classroom.name, active, classroom.capacity
        ))
        .with_details(json!({ "capacity": classroom.capacity, "active": active })));
    }
    Ok(())
}

fn set_student_classroom(
    conn: &Connection,
    student_id: &str,
    classroom_id: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE students SET classroom_id = ?, updated_at = ? WHERE id = ?",
        (classroom_id, now_ts(), student_id),
    )
    .map_err(db_failed("db_update_failed", "students"))?;
    Ok(())
}

fn enrollments_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("student_id", opt_str(params, "studentId")?)
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq_i64("school_year", opt_i64(params, "schoolYear")?)
        .eq("status", opt_enum(params, "status", &STATUSES)?);
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM enrollments{} ORDER BY school_year DESC, enrolled_at DESC, id",
        filters.where_sql()
    ))?;
    let enrollments = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "enrollments": enrollments }))
}

fn enrollments_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;
    let classroom_id = required_str(params, "classroomId")?;
    require_classroom(conn, &classroom_id)?;
    let school_year = opt_i64(params, "schoolYear")?.unwrap_or_else(current_school_year);
    let status = opt_enum(params, "status", &["pending", "active"])?
        .unwrap_or_else(|| "pending".to_string());
    let fee = opt_f64(params, "fee")?.unwrap_or(0.0);
    if !fee.is_finite() || fee < 0.0 {
        return Err(HandlerErr::bad_params("fee must be >= 0"));
    }

    let open = count(
        conn,
        "SELECT COUNT(*) FROM enrollments
         WHERE student_id = ? AND school_year = ? AND status IN ('pending', 'active')",
        &[&student.id, &school_year],
    )?;
    if open > 0 {
        return Err(HandlerErr::conflict(format!(
            "student already has an open enrollment for {school_year}"
        )));
    }
    if status == "active" {
        ensure_capacity(conn, &classroom_id)?;
    }

    let now = now_ts();
    let enrollment = Enrollment {
        id: new_id(),
        student_id: student.id.clone(),
        classroom_id,
        school_year,
        status,
        fee,
        enrolled_at: opt_date(params, "enrolledAt")?
            .map(fmt_date)
            .unwrap_or_else(|| fmt_date(today())),
        created_at: now,
    };

    let tx = begin(conn)?;
    tx.execute(
        &format!("INSERT INTO enrollments({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        rusqlite::params![
            enrollment.id,
            enrollment.student_id,
            enrollment.classroom_id,
            enrollment.school_year,
            enrollment.status,
            enrollment.fee,
            enrollment.enrolled_at,
            enrollment.created_at,
        ],
    )
    .map_err(db_failed("db_insert_failed", "enrollments"))?;
    if enrollment.status == "active" {
        set_student_classroom(&tx, &enrollment.student_id, Some(&enrollment.classroom_id))?;
    }
    commit(tx)?;
    Ok(json!({ "enrollment": enrollment }))
}

fn enrollments_set_status(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut e = require_enrollment(conn, &required_str(params, "enrollmentId")?)?;
    let status = required_enum(params, "status", &STATUSES)?;
    if !transition_allowed(&e.status, &status) {
        return Err(HandlerErr::conflict(format!(
            "cannot move enrollment from {} to {}",
            e.status, status
        )));
    }
    if status == "active" {
        ensure_capacity(conn, &e.classroom_id)?;
    }
    let was_active = e.status == "active";
    e.status = status;

    let tx = begin(conn)?;
    tx.execute(
        "UPDATE enrollments SET status = ? WHERE id = ?",
        (&e.status, &e.id),
    )
    .map_err(db_failed("db_update_failed", "enrollments"))?;
    match e.status.as_str() {
        "active" => set_student_classroom(&tx, &e.student_id, Some(&e.classroom_id))?,
        "cancelled" if was_active => release_student(&tx, &e)?,
        _ => {}
    }
    commit(tx)?;
    Ok(json!({ "enrollment": e }))
}

/// Clears the student's classroom when it still points at `e`'s classroom.
fn release_student(conn: &Connection, e: &Enrollment) -> Result<(), HandlerErr> {
    let current: Option<String> = conn
        .query_row(
            "SELECT classroom_id FROM students WHERE id = ?",
            [&e.student_id],
            |r| r.get(0),
        )
        .optional()?
        .flatten();
    if current.as_deref() == Some(e.classroom_id.as_str()) {
        set_student_classroom(conn, &e.student_id, None)?;
    }
    Ok(())
}

fn enrollments_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let e = require_enrollment(conn, &required_str(params, "enrollmentId")?)?;
    let tx = begin(conn)?;
    tx.execute("DELETE FROM enrollments WHERE id = ?", [&e.id])
        .map_err(db_failed("db_delete_failed", "enrollments"))?;
    if e.status == "active" {
        release_student(&tx, &e)?;
    }
    commit(tx)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "enrollments.list" => enrollments_list(conn, &req.params),
        "enrollments.create" => enrollments_create(conn, &req.params),
        "enrollments.setStatus" => enrollments_set_status(conn, &req.params),
        "enrollments.delete" => enrollments_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::transition_allowed;

    #[test]
    fn only_forward_transitions_are_allowed() {
        assert!(transition_allowed("pending", "active"));
        assert!(transition_allowed("active", "completed"));
        assert!(transition_allowed("active", "cancelled"));
        assert!(!transition_allowed("cancelled", "active"));
        assert!(!transition_allowed("completed", "active"));
        assert!(!transition_allowed("pending", "completed"));
        assert!(!transition_allowed("active", "active"));
    }
}
