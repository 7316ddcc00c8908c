use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::calc::{average_grade, GRADE_SCALE};
use crate::ipc::handlers::classrooms::require_classroom;
use crate::ipc::handlers::students::require_student;
use crate::ipc::helpers::{
    db_failed, new_id, now_ts, opt_i64, opt_str, patch_str, record_exists, required_enum,
    required_i64, required_str, respond, Filters, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub classroom_id: String,
    pub course: String,
    pub period: i64,
    pub grade: String,
    pub comment: Option<String>,
    pub evaluation_id: Option<String>,
    pub teacher_id: Option<String>,
    pub updated_at: String,
}

const COLUMNS: &str = "id, student_id, classroom_id, course, period, grade, comment,
    evaluation_id, teacher_id, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<Grade> {
    Ok(Grade {
        id: r.get(0)?,
        student_id: r.get(1)?,
        classroom_id: r.get(2)?,
        course: r.get(3)?,
        period: r.get(4)?,
        grade: r.get(5)?,
        comment: r.get(6)?,
        evaluation_id: r.get(7)?,
        teacher_id: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

pub fn check_period(period: i64) -> Result<i64, HandlerErr> {
    if (1..=4).contains(&period) {
        Ok(period)
    } else {
        Err(HandlerErr::bad_params("period must be between 1 and 4"))
    }
}

fn query_grades(conn: &Connection, filters: &Filters) -> Result<Vec<Grade>, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM grades{} ORDER BY course, period, student_id",
        filters.where_sql()
    ))?;
    let rows = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn grades_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("student_id", opt_str(params, "studentId")?)
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq("course", opt_str(params, "course")?)
        .eq_i64("period", opt_i64(params, "period")?.map(check_period).transpose()?);
    Ok(json!({ "grades": query_grades(conn, &filters)? }))
}

fn grades_upsert(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;
    let course = required_str(params, "course")?;
    let period = check_period(required_i64(params, "period")?)?;
    let grade = required_enum(params, "grade", &GRADE_SCALE)?;

    let classroom_id = match opt_str(params, "classroomId")?.or(student.classroom_id.clone()) {
        Some(id) => id,
        None => {
            return Err(HandlerErr::bad_params(
                "student has no classroom; pass classroomId",
            ))
        }
    };
    require_classroom(conn, &classroom_id)?;
    let evaluation_id = opt_str(params, "evaluationId")?;
    if let Some(eid) = evaluation_id.as_deref() {
        if !record_exists(conn, "evaluations", eid)? {
            return Err(HandlerErr::not_found("evaluation not found"));
        }
    }
    let teacher_id = opt_str(params, "teacherId")?;
    if let Some(tid) = teacher_id.as_deref() {
        if !record_exists(conn, "workers", tid)? {
            return Err(HandlerErr::not_found("teacher not found"));
        }
    }

    let existing = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM grades WHERE student_id = ? AND course = ? AND period = ?"
            ),
            (&student.id, &course, period),
            from_row,
        )
        .optional()?;

    let record = match existing {
        Some(mut g) => {
            g.classroom_id = classroom_id;
            g.grade = grade;
            g.comment = patch_str(params, "comment")?.apply(g.comment);
            if evaluation_id.is_some() {
                g.evaluation_id = evaluation_id;
            }
            if teacher_id.is_some() {
                g.teacher_id = teacher_id;
            }
            g.updated_at = now_ts();
            g
        }
        None => Grade {
            id: new_id(),
            student_id: student.id,
            classroom_id,
            course,
            period,
            grade,
            comment: opt_str(params, "comment")?,
            evaluation_id,
            teacher_id,
            updated_at: now_ts(),
        },
    };

    conn.execute(
        &format!(
            "INSERT INTO grades({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               classroom_id = excluded.classroom_id,
               grade = excluded.grade,
               comment = excluded.comment,
               evaluation_id = excluded.evaluation_id,
               teacher_id = excluded.teacher_id,
               updated_at = excluded.updated_at"
        ),
        rusqlite::params![
            record.id,
            record.student_id,
            record.classroom_id,
            record.course,
            record.period,
            record.grade,
            record.comment,
            record.evaluation_id,
            record.teacher_id,
            record.updated_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "grades"))?;
    Ok(json!({ "grade": record }))
}

fn grades_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "gradeId")?;
    let removed = conn
        .execute("DELETE FROM grades WHERE id = ?", [&id])
        .map_err(db_failed("db_delete_failed", "grades"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("grade not found"));
    }
    Ok(json!({ "ok": true }))
}

fn grades_summary(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;
    let mut filters = Filters::default();
    filters.eq("student_id", Some(student.id.clone()));
    let grades = query_grades(conn, &filters)?;

    let mut by_course: BTreeMap<&str, Vec<&Grade>> = BTreeMap::new();
    for g in &grades {
        by_course.entry(g.course.as_str()).or_default().push(g);
    }
    let courses: Vec<JsonValue> = by_course
        .iter()
        .map(|(course, gs)| {
            let periods: serde_json::Map<String, JsonValue> = gs
                .iter()
                .map(|g| (g.period.to_string(), json!(g.grade)))
                .collect();
            json!({
                "course": course,
                "periods": periods,
                "average": average_grade(gs.iter().map(|g| g.grade.as_str())),
            })
        })
        .collect();

    Ok(json!({
        "studentId": student.id,
        "courses": courses,
        "overall": average_grade(grades.iter().map(|g| g.grade.as_str())),
        "gradeCount": grades.len(),
    }))
}

/// Per-course letter counts for one classroom and period.
pub fn classroom_summary(
    conn: &Connection,
    classroom_id: &str,
    period: i64,
) -> Result<JsonValue, HandlerErr> {
    let classroom = require_classroom(conn, classroom_id)?;
    let period = check_period(period)?;
    let mut stmt = conn.prepare(
        "SELECT course, grade, COUNT(*)
         FROM grades
         WHERE classroom_id = ? AND period = ?
         GROUP BY course, grade
         ORDER BY course",
    )?;
    let rows = stmt
        .query_map((&classroom.id, period), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_course: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    for (course, grade, n) in rows {
        let counts = by_course.entry(course).or_insert_with(|| {
            GRADE_SCALE
                .iter()
                .map(|g| (g.to_string(), 0))
                .collect()
        });
        *counts.entry(grade).or_insert(0) += n;
    }
    let courses: Vec<JsonValue> = by_course
        .into_iter()
        .map(|(course, counts)| {
            let total: i64 = counts.values().sum();
            json!({ "course": course, "counts": counts, "total": total })
        })
        .collect();

    Ok(json!({
        "classroomId": classroom.id,
        "classroomName": classroom.name,
        "period": period,
        "courses": courses,
    }))
}

fn grades_classroom_summary(conn: &Connection, params: &JsonValue) -> HandlerResult {
    classroom_summary(
        conn,
        &required_str(params, "classroomId")?,
        required_i64(params, "period")?,
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "grades.list" => grades_list(conn, &req.params),
        "grades.upsert" => grades_upsert(conn, &req.params),
        "grades.delete" => grades_delete(conn, &req.params),
        "grades.summary" => grades_summary(conn, &req.params),
        "grades.classroomSummary" => grades_classroom_summary(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
