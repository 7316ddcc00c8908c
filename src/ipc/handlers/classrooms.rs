use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::handlers::students::query_students;
use crate::ipc::handlers::workers::require_active_teacher;
use crate::ipc::helpers::{
    begin, commit, count, db_failed, new_id, now_ts, opt_enum, opt_i64, opt_str, patch_str,
    patch_required_str, required_i64, required_str, respond, today, Filters, HandlerErr,
    HandlerResult, Patch,
};
use crate::ipc::types::{AppState, Request};

const SHIFTS: [&str; 2] = ["morning", "afternoon"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub age_group: Option<String>,
    pub section: Option<String>,
    pub shift: String,
    pub capacity: i64,
    pub teacher_id: Option<String>,
    pub school_year: i64,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, name, age_group, section, shift, capacity, teacher_id, school_year,
    created_at, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: r.get(0)?,
        name: r.get(1)?,
        age_group: r.get(2)?,
        section: r.get(3)?,
        shift: r.get(4)?,
        capacity: r.get(5)?,
        teacher_id: r.get(6)?,
        school_year: r.get(7)?,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

pub fn require_classroom(conn: &Connection, id: &str) -> Result<Classroom, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM classrooms WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("classroom not found"))
}

pub fn list_classrooms(conn: &Connection) -> Result<Vec<Classroom>, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM classrooms ORDER BY school_year DESC, name, id"
    ))?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn current_school_year() -> i64 {
    i64::from(today().year())
}

fn positive_capacity(v: i64) -> Result<i64, HandlerErr> {
    if v > 0 {
        Ok(v)
    } else {
        Err(HandlerErr::bad_params("capacity must be > 0"))
    }
}

fn write_classroom(conn: &Connection, c: &Classroom) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO classrooms(id, name, age_group, section, shift, capacity, teacher_id,
           school_year, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           age_group = excluded.age_group,
           section = excluded.section,
           shift = excluded.shift,
           capacity = excluded.capacity,
           teacher_id = excluded.teacher_id,
           school_year = excluded.school_year,
           updated_at = excluded.updated_at",
        rusqlite::params![
            c.id,
            c.name,
            c.age_group,
            c.section,
            c.shift,
            c.capacity,
            c.teacher_id,
            c.school_year,
            c.created_at,
            c.updated_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "classrooms"))?;
    Ok(())
}

fn classrooms_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq_i64("c.school_year", opt_i64(params, "schoolYear")?)
        .eq("c.teacher_id", opt_str(params, "teacherId")?);

    // Correlated subquery keeps the count from multiplying with the join.
    let mut stmt = conn.prepare(&format!(
        "SELECT c.id, c.name, c.age_group, c.section, c.shift, c.capacity, c.teacher_id,
           c.school_year, c.created_at, c.updated_at,
           (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id AND s.status = 'active'),
           w.first_name || ' ' || w.last_name
         FROM classrooms c
         LEFT JOIN workers w ON w.id = c.teacher_id{}
         ORDER BY c.school_year DESC, c.name, c.id",
        filters.where_sql()
    ))?;
    let classrooms = stmt
        .query_map(filters.args(), |r| {
            let c = from_row(r)?;
            let student_count: i64 = r.get(10)?;
            let teacher_name: Option<String> = r.get(11)?;
            let mut v = json!(c);
            v["studentCount"] = json!(student_count);
            v["teacherName"] = json!(teacher_name);
            Ok(v)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classrooms": classrooms }))
}

fn classrooms_get(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let classroom = require_classroom(conn, &required_str(params, "classroomId")?)?;
    let mut filters = Filters::default();
    filters.eq("classroom_id", Some(classroom.id.clone()));
    let students = query_students(conn, &filters)?;
    let teacher = match classroom.teacher_id.as_deref() {
        Some(tid) => conn
            .query_row(
                "SELECT id, first_name, last_name FROM workers WHERE id = ?",
                [tid],
                |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "firstName": r.get::<_, String>(1)?,
                        "lastName": r.get::<_, String>(2)?,
                    }))
                },
            )
            .optional()?,
        None => None,
    };
    Ok(json!({
        "classroom": classroom,
        "teacher": teacher,
        "students": students,
    }))
}

fn classrooms_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let teacher_id = opt_str(params, "teacherId")?;
    if let Some(tid) = teacher_id.as_deref() {
        require_active_teacher(conn, tid)?;
    }
    let now = now_ts();
    let classroom = Classroom {
        id: new_id(),
        name: required_str(params, "name")?,
        age_group: opt_str(params, "ageGroup")?,
        section: opt_str(params, "section")?,
        shift: opt_enum(params, "shift", &SHIFTS)?.unwrap_or_else(|| "morning".to_string()),
        capacity: positive_capacity(required_i64(params, "capacity")?)?,
        teacher_id,
        school_year: opt_i64(params, "schoolYear")?.unwrap_or_else(current_school_year),
        created_at: now.clone(),
        updated_at: now,
    };
    write_classroom(conn, &classroom)?;
    Ok(json!({ "classroom": classroom }))
}

fn classrooms_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut c = require_classroom(conn, &required_str(params, "classroomId")?)?;
    c.name = patch_required_str(params, "name", c.name)?;
    c.age_group = patch_str(params, "ageGroup")?.apply(c.age_group);
    c.section = patch_str(params, "section")?.apply(c.section);
    if let Some(shift) = opt_enum(params, "shift", &SHIFTS)? {
        c.shift = shift;
    }
    if let Some(capacity) = opt_i64(params, "capacity")? {
        let capacity = positive_capacity(capacity)?;
        let active = count(
            conn,
            "SELECT COUNT(*) FROM enrollments WHERE classroom_id = ? AND status = 'active'",
            &[&c.id],
        )?;
        if capacity < active {
            return Err(HandlerErr::conflict(format!(
                "capacity {capacity} is below the {active} active enrollments"
            )));
        }
        c.capacity = capacity;
    }
    let teacher = patch_str(params, "teacherId")?;
    if let Patch::Set(tid) = &teacher {
        require_active_teacher(conn, tid)?;
    }
    c.teacher_id = teacher.apply(c.teacher_id);
    if let Some(year) = opt_i64(params, "schoolYear")? {
        c.school_year = year;
    }
    c.updated_at = now_ts();
    write_classroom(conn, &c)?;
    Ok(json!({ "classroom": c }))
}

fn classrooms_assign_teacher(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut c = require_classroom(conn, &required_str(params, "classroomId")?)?;
    if params.get("teacherId").is_none() {
        return Err(HandlerErr::bad_params("missing teacherId"));
    }
    let teacher = patch_str(params, "teacherId")?;
    if let Patch::Set(tid) = &teacher {
        require_active_teacher(conn, tid)?;
    }
    c.teacher_id = teacher.apply(c.teacher_id);
    c.updated_at = now_ts();
    write_classroom(conn, &c)?;
    Ok(json!({ "classroom": c }))
}

fn classrooms_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let c = require_classroom(conn, &required_str(params, "classroomId")?)?;
    let id = c.id.as_str();

    let blockers = [
        ("SELECT COUNT(*) FROM students WHERE classroom_id = ?", "students"),
        ("SELECT COUNT(*) FROM enrollments WHERE classroom_id = ?", "enrollments"),
        ("SELECT COUNT(*) FROM grades WHERE classroom_id = ?", "grades"),
        ("SELECT COUNT(*) FROM attendance WHERE classroom_id = ?", "attendance"),
    ];
    for (sql, what) in blockers {
        let n = count(conn, sql, &[&id])?;
        if n > 0 {
            return Err(HandlerErr::conflict(format!(
                "classroom {} still has {n} {what}",
                c.name
            ))
            .with_details(json!({ "table": what, "count": n })));
        }
    }

    let tx = begin(conn)?;
    // Explicit dependency order; there is no ON DELETE CASCADE.
    let steps = [
        ("DELETE FROM schedules WHERE classroom_id = ?", "schedules"),
        ("UPDATE tasks SET classroom_id = NULL WHERE classroom_id = ?", "tasks"),
        (
            "UPDATE grades SET evaluation_id = NULL
             WHERE evaluation_id IN (SELECT id FROM evaluations WHERE classroom_id = ?)",
            "grades",
        ),
        ("DELETE FROM evaluations WHERE classroom_id = ?", "evaluations"),
        ("DELETE FROM lesson_plans WHERE classroom_id = ?", "lesson_plans"),
        ("DELETE FROM classrooms WHERE id = ?", "classrooms"),
    ];
    for (sql, table) in steps {
        tx.execute(sql, [id])
            .map_err(db_failed("db_delete_failed", table))?;
    }
    commit(tx)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "classrooms.list" => classrooms_list(conn, &req.params),
        "classrooms.get" => classrooms_get(conn, &req.params),
        "classrooms.create" => classrooms_create(conn, &req.params),
        "classrooms.update" => classrooms_update(conn, &req.params),
        "classrooms.assignTeacher" => classrooms_assign_teacher(conn, &req.params),
        "classrooms.delete" => classrooms_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
