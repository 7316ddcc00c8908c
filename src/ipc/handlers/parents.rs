use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::helpers::{
    begin, commit, db_failed, new_id, now_ts, opt_bool, opt_enum, opt_str, opt_str_array, patch_required_str,
    patch_str, require_record, required_str, respond, Filters, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};

const RELATIONSHIPS: [&str; 4] = ["mother", "father", "guardian", "other"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub document_number: Option<String>,
    pub relationship: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub occupation: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, first_name, last_name, document_number, relationship, phone, email,
    address, occupation, created_at, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<Parent> {
    Ok(Parent {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        document_number: r.get(3)?,
        relationship: r.get(4)?,
        phone: r.get(5)?,
        email: r.get(6)?,
        address: r.get(7)?,
        occupation: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn require_parent(conn: &Connection, id: &str) -> Result<Parent, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM parents WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("parent not found"))
}

fn student_ids_for(conn: &Connection, parent_id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM student_parents WHERE parent_id = ? ORDER BY student_id",
    )?;
    let ids = stmt
        .query_map([parent_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn write_parent(conn: &Connection, p: &Parent) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO parents(id, first_name, last_name, document_number, relationship, phone,
           email, address, occupation, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
           first_name = excluded.first_name,
           last_name = excluded.last_name,
           document_number = excluded.document_number,
           relationship = excluded.relationship,
           phone = excluded.phone,
           email = excluded.email,
           address = excluded.address,
           occupation = excluded.occupation,
           updated_at = excluded.updated_at",
        rusqlite::params![
            p.id,
            p.first_name,
            p.last_name,
            p.document_number,
            p.relationship,
            p.phone,
            p.email,
            p.address,
            p.occupation,
            p.created_at,
            p.updated_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "parents"))?;
    Ok(())
}

/// Links a parent to a student. A primary link demotes the student's other
/// parents.
fn link(
    conn: &Connection,
    parent_id: &str,
    student_id: &str,
    is_primary: bool,
) -> Result<(), HandlerErr> {
    if is_primary {
        conn.execute(
            "UPDATE student_parents SET is_primary = 0 WHERE student_id = ?",
            [student_id],
        )
        .map_err(db_failed("db_update_failed", "student_parents"))?;
    }
    conn.execute(
        "INSERT INTO student_parents(student_id, parent_id, is_primary)
         VALUES(?, ?, ?)
         ON CONFLICT(student_id, parent_id) DO UPDATE SET is_primary = excluded.is_primary",
        (student_id, parent_id, i64::from(is_primary)),
    )
    .map_err(db_failed("db_insert_failed", "student_parents"))?;
    Ok(())
}

fn parents_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    if let Some(student_id) = opt_str(params, "studentId")? {
        filters.raw(
            "id IN (SELECT parent_id FROM student_parents WHERE student_id = ?)",
            vec![student_id.into()],
        );
    }
    filters.search(
        &["first_name", "last_name", "document_number", "phone"],
        opt_str(params, "search")?,
    );
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM parents{} ORDER BY last_name, first_name, id",
        filters.where_sql()
    ))?;
    let parents = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(parents.len());
    for p in parents {
        let student_ids = student_ids_for(conn, &p.id)?;
        let mut v = json!(p);
        v["studentIds"] = json!(student_ids);
        out.push(v);
    }
    Ok(json!({ "parents": out }))
}

fn parents_get(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let parent = require_parent(conn, &required_str(params, "parentId")?)?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.first_name, s.last_name, s.classroom_id, s.status, sp.is_primary
         FROM student_parents sp
         JOIN students s ON s.id = sp.student_id
         WHERE sp.parent_id = ?
         ORDER BY s.last_name, s.first_name",
    )?;
    let children = stmt
        .query_map([&parent.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "classroomId": r.get::<_, Option<String>>(3)?,
                "status": r.get::<_, String>(4)?,
                "isPrimary": r.get::<_, i64>(5)? != 0,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "parent": parent, "children": children }))
}

fn parents_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let now = now_ts();
    let parent = Parent {
        id: new_id(),
        first_name: required_str(params, "firstName")?,
        last_name: required_str(params, "lastName")?,
        document_number: opt_str(params, "documentNumber")?,
        relationship: opt_enum(params, "relationship", &RELATIONSHIPS)?
            .unwrap_or_else(|| "guardian".to_string()),
        phone: required_str(params, "phone")?,
        email: opt_str(params, "email")?,
        address: opt_str(params, "address")?,
        occupation: opt_str(params, "occupation")?,
        created_at: now.clone(),
        updated_at: now,
    };
    let student_ids = opt_str_array(params, "studentIds")?.unwrap_or_default();
    for sid in &student_ids {
        require_record(conn, "students", sid, "student")?;
    }

    let tx = begin(conn)?;
    write_parent(&tx, &parent)?;
    for sid in &student_ids {
        link(&tx, &parent.id, sid, false)?;
    }
    commit(tx)?;

    Ok(json!({ "parent": parent, "studentIds": student_ids }))
}

fn parents_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut p = require_parent(conn, &required_str(params, "parentId")?)?;
    p.first_name = patch_required_str(params, "firstName", p.first_name)?;
    p.last_name = patch_required_str(params, "lastName", p.last_name)?;
    p.document_number = patch_str(params, "documentNumber")?.apply(p.document_number);
    if let Some(rel) = opt_enum(params, "relationship", &RELATIONSHIPS)? {
        p.relationship = rel;
    }
    p.phone = patch_required_str(params, "phone", p.phone)?;
    p.email = patch_str(params, "email")?.apply(p.email);
    p.address = patch_str(params, "address")?.apply(p.address);
    p.occupation = patch_str(params, "occupation")?.apply(p.occupation);
    p.updated_at = now_ts();
    write_parent(conn, &p)?;
    Ok(json!({ "parent": p }))
}

fn parents_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let parent_id = required_str(params, "parentId")?;
    require_record(conn, "parents", &parent_id, "parent")?;
    let tx = begin(conn)?;
    tx.execute("DELETE FROM student_parents WHERE parent_id = ?", [&parent_id])
        .map_err(db_failed("db_delete_failed", "student_parents"))?;
    tx.execute("DELETE FROM parents WHERE id = ?", [&parent_id])
        .map_err(db_failed("db_delete_failed", "parents"))?;
    commit(tx)?;
    Ok(json!({ "ok": true }))
}

fn parents_link(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let parent_id = required_str(params, "parentId")?;
    let student_id = required_str(params, "studentId")?;
    let is_primary = opt_bool(params, "isPrimary")?.unwrap_or(false);
    require_record(conn, "parents", &parent_id, "parent")?;
    require_record(conn, "students", &student_id, "student")?;

    let tx = begin(conn)?;
    link(&tx, &parent_id, &student_id, is_primary)?;
    commit(tx)?;
    Ok(json!({
        "parentId": parent_id,
        "studentId": student_id,
        "isPrimary": is_primary,
    }))
}

fn parents_unlink(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let parent_id = required_str(params, "parentId")?;
    let student_id = required_str(params, "studentId")?;
    let removed = conn
        .execute(
            "DELETE FROM student_parents WHERE parent_id = ? AND student_id = ?",
            (&parent_id, &student_id),
        )
        .map_err(db_failed("db_delete_failed", "student_parents"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("parent is not linked to student"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "parents.list" => parents_list(conn, &req.params),
        "parents.get" => parents_get(conn, &req.params),
        "parents.create" => parents_create(conn, &req.params),
        "parents.update" => parents_update(conn, &req.params),
        "parents.delete" => parents_delete(conn, &req.params),
        "parents.link" => parents_link(conn, &req.params),
        "parents.unlink" => parents_unlink(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

