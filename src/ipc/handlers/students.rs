use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::helpers::{
    begin, commit, db_failed, fmt_date, new_id, now_ts, opt_date, opt_enum, opt_str, patch_date, patch_enum,
    patch_required_str, patch_str, record_exists, required_str, respond, Filters, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};

pub const STUDENT_STATUSES: [&str; 3] = ["active", "inactive", "withdrawn"];
const GENDERS: [&str; 3] = ["male", "female", "other"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub document_number: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub classroom_id: Option<String>,
    pub status: String,
    pub address: Option<String>,
    pub medical_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, first_name, last_name, document_number, birth_date, gender,
    classroom_id, status, address, medical_notes, created_at, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        document_number: r.get(3)?,
        birth_date: r.get(4)?,
        gender: r.get(5)?,
        classroom_id: r.get(6)?,
        status: r.get(7)?,
        address: r.get(8)?,
        medical_notes: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

pub fn load_student(conn: &Connection, id: &str) -> Result<Option<Student>, HandlerErr> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM students WHERE id = ?"),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn require_student(conn: &Connection, id: &str) -> Result<Student, HandlerErr> {
    load_student(conn, id)?.ok_or_else(|| HandlerErr::not_found("student not found"))
}

pub fn query_students(conn: &Connection, filters: &Filters) -> Result<Vec<Student>, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM students{} ORDER BY last_name, first_name, id",
        filters.where_sql()
    ))?;
    let rows = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn ensure_document_free(
    conn: &Connection,
    document: Option<&str>,
    except_id: Option<&str>,
) -> Result<(), HandlerErr> {
    let Some(doc) = document else {
        return Ok(());
    };
    let owner: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE document_number = ?",
            [doc],
            |r| r.get(0),
        )
        .optional()?;
    match owner {
        Some(id) if Some(id.as_str()) != except_id => Err(HandlerErr::conflict(format!(
            "documentNumber {doc} already belongs to another student"
        ))
        .with_details(json!({ "studentId": id }))),
        _ => Ok(()),
    }
}

fn ensure_classroom(conn: &Connection, classroom_id: Option<&str>) -> Result<(), HandlerErr> {
    if let Some(id) = classroom_id {
        if !record_exists(conn, "classrooms", id)? {
            return Err(HandlerErr::not_found("classroom not found"));
        }
    }
    Ok(())
}

fn write_student(conn: &Connection, s: &Student) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO students(id, first_name, last_name, document_number, birth_date, gender,
           classroom_id, status, address, medical_notes, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
           first_name = excluded.first_name,
           last_name = excluded.last_name,
           document_number = excluded.document_number,
           birth_date = excluded.birth_date,
           gender = excluded.gender,
           classroom_id = excluded.classroom_id,
           status = excluded.status,
           address = excluded.address,
           medical_notes = excluded.medical_notes,
           updated_at = excluded.updated_at",
        rusqlite::params![
            s.id,
            s.first_name,
            s.last_name,
            s.document_number,
            s.birth_date,
            s.gender,
            s.classroom_id,
            s.status,
            s.address,
            s.medical_notes,
            s.created_at,
            s.updated_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "students"))?;
    Ok(())
}

fn students_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq("status", opt_enum(params, "status", &STUDENT_STATUSES)?)
        .search(
            &["first_name", "last_name", "document_number"],
            opt_str(params, "search")?,
        );
    let students = query_students(conn, &filters)?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;

    let mut stmt = conn.prepare(
        "SELECT p.id, p.first_name, p.last_name, p.relationship, p.phone, p.email, sp.is_primary
         FROM student_parents sp
         JOIN parents p ON p.id = sp.parent_id
         WHERE sp.student_id = ?
         ORDER BY sp.is_primary DESC, p.last_name, p.first_name",
    )?;
    let parents = stmt
        .query_map([&student.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "relationship": r.get::<_, String>(3)?,
                "phone": r.get::<_, String>(4)?,
                "email": r.get::<_, Option<String>>(5)?,
                "isPrimary": r.get::<_, i64>(6)? != 0,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let classroom = match student.classroom_id.as_deref() {
        Some(cid) => conn
            .query_row(
                "SELECT id, name FROM classrooms WHERE id = ?",
                [cid],
                |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "name": r.get::<_, String>(1)?,
                    }))
                },
            )
            .optional()?,
        None => None,
    };

    Ok(json!({
        "student": student,
        "parents": parents,
        "classroom": classroom,
    }))
}

fn students_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let now = now_ts();
    let student = Student {
        id: new_id(),
        first_name: required_str(params, "firstName")?,
        last_name: required_str(params, "lastName")?,
        document_number: opt_str(params, "documentNumber")?,
        birth_date: opt_date(params, "birthDate")?.map(fmt_date),
        gender: opt_enum(params, "gender", &GENDERS)?,
        classroom_id: opt_str(params, "classroomId")?,
        status: opt_enum(params, "status", &STUDENT_STATUSES)?
            .unwrap_or_else(|| "active".to_string()),
        address: opt_str(params, "address")?,
        medical_notes: opt_str(params, "medicalNotes")?,
        created_at: now.clone(),
        updated_at: now,
    };
    ensure_classroom(conn, student.classroom_id.as_deref())?;
    ensure_document_free(conn, student.document_number.as_deref(), None)?;
    write_student(conn, &student)?;
    Ok(json!({ "student": student }))
}

fn students_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut s = require_student(conn, &required_str(params, "studentId")?)?;

    s.first_name = patch_required_str(params, "firstName", s.first_name)?;
    s.last_name = patch_required_str(params, "lastName", s.last_name)?;
    s.document_number = patch_str(params, "documentNumber")?.apply(s.document_number);
    s.birth_date = patch_date(params, "birthDate")?.apply(s.birth_date);
    s.gender = patch_enum(params, "gender", &GENDERS)?.apply(s.gender);
    s.classroom_id = patch_str(params, "classroomId")?.apply(s.classroom_id);
    if let Some(status) = opt_enum(params, "status", &STUDENT_STATUSES)? {
        s.status = status;
    }
    s.address = patch_str(params, "address")?.apply(s.address);
    s.medical_notes = patch_str(params, "medicalNotes")?.apply(s.medical_notes);
    s.updated_at = now_ts();

    ensure_classroom(conn, s.classroom_id.as_deref())?;
    ensure_document_free(conn, s.document_number.as_deref(), Some(&s.id))?;
    write_student(conn, &s)?;
    Ok(json!({ "student": s }))
}

fn students_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    if !record_exists(conn, "students", &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = begin(conn)?;
    // Dependents first; there is no ON DELETE CASCADE.
    for table in [
        "student_parents",
        "enrollments",
        "grades",
        "attendance",
        "payments",
        "annotations",
    ] {
        tx.execute(
            &format!("DELETE FROM {table} WHERE student_id = ?"),
            [&student_id],
        )
        .map_err(db_failed("db_delete_failed", table))?;
    }
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(db_failed("db_delete_failed", "students"))?;
    commit(tx)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "students.list" => students_list(conn, &req.params),
        "students.get" => students_get(conn, &req.params),
        "students.create" => students_create(conn, &req.params),
        "students.update" => students_update(conn, &req.params),
        "students.delete" => students_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
