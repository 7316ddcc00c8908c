use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::handlers::students::require_student;
use crate::ipc::helpers::{
    db_failed, fmt_date, new_id, now_ts, opt_date, opt_enum, opt_str, patch_date, patch_enum,
    patch_required_str, patch_str, require_record, required_enum, required_str, respond, today,
    Filters, HandlerErr, HandlerResult, Patch,
};
use crate::ipc::types::{AppState, Request};

const KINDS: [&str; 3] = ["positive", "negative", "observation"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub student_id: String,
    pub author_id: Option<String>,
    pub kind: String,
    pub category: Option<String>,
    pub description: String,
    pub date: String,
    pub created_at: String,
}

const COLUMNS: &str = "id, student_id, author_id, kind, category, description, date, created_at";

fn from_row(r: &Row) -> rusqlite::Result<Annotation> {
    Ok(Annotation {
        id: r.get(0)?,
        student_id: r.get(1)?,
        author_id: r.get(2)?,
        kind: r.get(3)?,
        category: r.get(4)?,
        description: r.get(5)?,
        date: r.get(6)?,
        created_at: r.get(7)?,
    })
}

fn require_annotation(conn: &Connection, id: &str) -> Result<Annotation, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM annotations WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("annotation not found"))
}

fn write_annotation(conn: &Connection, a: &Annotation) -> Result<(), HandlerErr> {
    conn.execute(
        &format!(
            "INSERT INTO annotations({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
               author_id = excluded.author_id,
               kind = excluded.kind,
               category = excluded.category,
               description = excluded.description,
               date = excluded.date"
        ),
        rusqlite::params![
            a.id,
            a.student_id,
            a.author_id,
            a.kind,
            a.category,
            a.description,
            a.date,
            a.created_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "annotations"))?;
    Ok(())
}

fn annotations_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("student_id", opt_str(params, "studentId")?)
        .eq("author_id", opt_str(params, "authorId")?)
        .eq("kind", opt_enum(params, "kind", &KINDS)?)
        .cmp("date", ">=", opt_date(params, "from")?.map(fmt_date))
        .cmp("date", "<=", opt_date(params, "to")?.map(fmt_date));
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM annotations{} ORDER BY date DESC, created_at DESC, id",
        filters.where_sql()
    ))?;
    let annotations = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "annotations": annotations }))
}

fn annotations_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;
    let author_id = opt_str(params, "authorId")?;
    if let Some(aid) = author_id.as_deref() {
        require_record(conn, "workers", aid, "author")?;
    }
    let annotation = Annotation {
        id: new_id(),
        student_id: student.id,
        author_id,
        kind: required_enum(params, "kind", &KINDS)?,
        category: opt_str(params, "category")?,
        description: required_str(params, "description")?,
        date: fmt_date(opt_date(params, "date")?.unwrap_or_else(today)),
        created_at: now_ts(),
    };
    write_annotation(conn, &annotation)?;
    Ok(json!({ "annotation": annotation }))
}

fn annotations_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut a = require_annotation(conn, &required_str(params, "annotationId")?)?;
    let author = patch_str(params, "authorId")?;
    if let Patch::Set(aid) = &author {
        require_record(conn, "workers", aid, "author")?;
    }
    a.author_id = author.apply(a.author_id);
    if let Patch::Set(kind) = patch_enum(params, "kind", &KINDS)? {
        a.kind = kind;
    }
    a.category = patch_str(params, "category")?.apply(a.category);
    a.description = patch_required_str(params, "description", a.description)?;
    if let Patch::Set(d) = patch_date(params, "date")? {
        a.date = d;
    }
    write_annotation(conn, &a)?;
    Ok(json!({ "annotation": a }))
}

fn annotations_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "annotationId")?;
    let removed = conn
        .execute("DELETE FROM annotations WHERE id = ?", [&id])
        .map_err(db_failed("db_delete_failed", "annotations"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("annotation not found"));
    }
    Ok(json!({ "ok": true }))
}

fn annotations_summary(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;
    let mut stmt = conn.prepare(
        "SELECT kind, COUNT(*) FROM annotations WHERE student_id = ? GROUP BY kind",
    )?;
    let rows = stmt
        .query_map([&student.id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = serde_json::Map::new();
    for kind in KINDS {
        counts.insert(kind.to_string(), json!(0));
    }
    let mut total = 0i64;
    for (kind, n) in rows {
        total += n;
        counts.insert(kind, json!(n));
    }
    Ok(json!({ "studentId": student.id, "counts": counts, "total": total }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "annotations.list" => annotations_list(conn, &req.params),
        "annotations.create" => annotations_create(conn, &req.params),
        "annotations.update" => annotations_update(conn, &req.params),
        "annotations.delete" => annotations_delete(conn, &req.params),
        "annotations.summary" => annotations_summary(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
