use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::helpers::{
    begin, commit, count, db_failed, fmt_date, new_id, now_ts, opt_date, opt_enum, opt_f64,
    opt_str, patch_date, patch_required_str, patch_str, required_enum, required_str, respond,
    Filters, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

pub const ROLES: [&str; 5] = ["teacher", "assistant", "admin", "director", "support"];
const STATUSES: [&str; 2] = ["active", "inactive"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub document_number: Option<String>,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub hire_date: Option<String>,
    pub base_salary: f64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Worker {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

const COLUMNS: &str = "id, first_name, last_name, document_number, role, email, phone,
    specialty, hire_date, base_salary, status, created_at, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<Worker> {
    Ok(Worker {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        document_number: r.get(3)?,
        role: r.get(4)?,
        email: r.get(5)?,
        phone: r.get(6)?,
        specialty: r.get(7)?,
        hire_date: r.get(8)?,
        base_salary: r.get(9)?,
        status: r.get(10)?,
        created_at: r.get(11)?,
        updated_at: r.get(12)?,
    })
}

pub fn load_worker(conn: &Connection, id: &str) -> Result<Option<Worker>, HandlerErr> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM workers WHERE id = ?"),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn require_worker(conn: &Connection, id: &str) -> Result<Worker, HandlerErr> {
    load_worker(conn, id)?.ok_or_else(|| HandlerErr::not_found("worker not found"))
}

/// Classrooms and lesson plans can only point at active teachers.
pub fn require_active_teacher(conn: &Connection, id: &str) -> Result<Worker, HandlerErr> {
    let w = require_worker(conn, id)?;
    if w.role != "teacher" {
        return Err(HandlerErr::bad_params(format!(
            "worker {} is not a teacher",
            w.full_name()
        )));
    }
    if w.status != "active" {
        return Err(HandlerErr::conflict(format!(
            "teacher {} is inactive",
            w.full_name()
        )));
    }
    Ok(w)
}

pub fn query_workers(conn: &Connection, filters: &Filters) -> Result<Vec<Worker>, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM workers{} ORDER BY last_name, first_name, id",
        filters.where_sql()
    ))?;
    let rows = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn non_negative_salary(v: f64) -> Result<f64, HandlerErr> {
    if v.is_finite() && v >= 0.0 {
        Ok(v)
    } else {
        Err(HandlerErr::bad_params("baseSalary must be >= 0"))
    }
}

fn write_worker(conn: &Connection, w: &Worker) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO workers(id, first_name, last_name, document_number, role, email, phone,
           specialty, hire_date, base_salary, status, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
           first_name = excluded.first_name,
           last_name = excluded.last_name,
           document_number = excluded.document_number,
           role = excluded.role,
           email = excluded.email,
           phone = excluded.phone,
           specialty = excluded.specialty,
           hire_date = excluded.hire_date,
           base_salary = excluded.base_salary,
           status = excluded.status,
           updated_at = excluded.updated_at",
        rusqlite::params![
            w.id,
            w.first_name,
            w.last_name,
            w.document_number,
            w.role,
            w.email,
            w.phone,
            w.specialty,
            w.hire_date,
            w.base_salary,
            w.status,
            w.created_at,
            w.updated_at,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::conflict("documentNumber already belongs to another worker")
        }
        other => db_failed("db_update_failed", "workers")(other),
    })?;
    Ok(())
}

fn workers_list(conn: &Connection, params: &JsonValue, role: Option<&str>) -> HandlerResult {
    let role = match role {
        Some(r) => Some(r.to_string()),
        None => opt_enum(params, "role", &ROLES)?,
    };
    let mut filters = Filters::default();
    filters
        .eq("role", role)
        .eq("status", opt_enum(params, "status", &STATUSES)?)
        .search(
            &["first_name", "last_name", "document_number", "specialty"],
            opt_str(params, "search")?,
        );
    let workers = query_workers(conn, &filters)?;
    Ok(json!({ "workers": workers }))
}

fn workers_get(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let worker = require_worker(conn, &required_str(params, "workerId")?)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, school_year FROM classrooms WHERE teacher_id = ? ORDER BY name",
    )?;
    let classrooms = stmt
        .query_map([&worker.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "schoolYear": r.get::<_, i64>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "worker": worker, "classrooms": classrooms }))
}

fn workers_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let now = now_ts();
    let worker = Worker {
        id: new_id(),
        first_name: required_str(params, "firstName")?,
        last_name: required_str(params, "lastName")?,
        document_number: opt_str(params, "documentNumber")?,
        role: required_enum(params, "role", &ROLES)?,
        email: opt_str(params, "email")?,
        phone: opt_str(params, "phone")?,
        specialty: opt_str(params, "specialty")?,
        hire_date: opt_date(params, "hireDate")?.map(fmt_date),
        base_salary: non_negative_salary(opt_f64(params, "baseSalary")?.unwrap_or(0.0))?,
        status: opt_enum(params, "status", &STATUSES)?.unwrap_or_else(|| "active".to_string()),
        created_at: now.clone(),
        updated_at: now,
    };
    write_worker(conn, &worker)?;
    Ok(json!({ "worker": worker }))
}

fn workers_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut w = require_worker(conn, &required_str(params, "workerId")?)?;
    w.first_name = patch_required_str(params, "firstName", w.first_name)?;
    w.last_name = patch_required_str(params, "lastName", w.last_name)?;
    w.document_number = patch_str(params, "documentNumber")?.apply(w.document_number);
    if let Some(role) = opt_enum(params, "role", &ROLES)? {
        if role != "teacher" && w.role == "teacher" {
            let led = count(
                conn,
                "SELECT COUNT(*) FROM classrooms WHERE teacher_id = ?",
                &[&w.id],
            )?;
            if led > 0 {
                return Err(HandlerErr::conflict(
                    "worker leads a classroom; reassign it before changing role",
                ));
            }
        }
        w.role = role;
    }
    w.email = patch_str(params, "email")?.apply(w.email);
    w.phone = patch_str(params, "phone")?.apply(w.phone);
    w.specialty = patch_str(params, "specialty")?.apply(w.specialty);
    w.hire_date = patch_date(params, "hireDate")?.apply(w.hire_date);
    if let Some(salary) = opt_f64(params, "baseSalary")? {
        w.base_salary = non_negative_salary(salary)?;
    }
    if let Some(status) = opt_enum(params, "status", &STATUSES)? {
        w.status = status;
    }
    w.updated_at = now_ts();
    write_worker(conn, &w)?;
    Ok(json!({ "worker": w }))
}

fn workers_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let worker = require_worker(conn, &required_str(params, "workerId")?)?;
    let id = worker.id.as_str();

    let blockers = [
        ("SELECT COUNT(*) FROM classrooms WHERE teacher_id = ?", "leads a classroom"),
        ("SELECT COUNT(*) FROM schedules WHERE teacher_id = ?", "owns schedule slots"),
        ("SELECT COUNT(*) FROM lesson_plans WHERE teacher_id = ?", "owns lesson plans"),
        (
            "SELECT COUNT(*) FROM payroll WHERE worker_id = ? AND status <> 'draft'",
            "has approved or paid payroll",
        ),
    ];
    for (sql, reason) in blockers {
        if count(conn, sql, &[&id])? > 0 {
            return Err(HandlerErr::conflict(format!(
                "worker {} {reason}",
                worker.full_name()
            )));
        }
    }

    let tx = begin(conn)?;
    let steps = [
        ("DELETE FROM payroll WHERE worker_id = ?", "payroll"),
        ("UPDATE tasks SET assignee_id = NULL WHERE assignee_id = ?", "tasks"),
        ("UPDATE evaluations SET teacher_id = NULL WHERE teacher_id = ?", "evaluations"),
        ("UPDATE grades SET teacher_id = NULL WHERE teacher_id = ?", "grades"),
        ("UPDATE annotations SET author_id = NULL WHERE author_id = ?", "annotations"),
        ("DELETE FROM workers WHERE id = ?", "workers"),
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
        "workers.list" => workers_list(conn, &req.params, None),
        "teachers.list" => workers_list(conn, &req.params, Some("teacher")),
        "workers.get" => workers_get(conn, &req.params),
        "workers.create" => workers_create(conn, &req.params),
        "workers.update" => workers_update(conn, &req.params),
        "workers.delete" => workers_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
