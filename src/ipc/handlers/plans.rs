use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::ipc::handlers::classrooms::require_classroom;
use crate::ipc::handlers::workers::require_active_teacher;
use crate::ipc::helpers::{
    db_failed, fmt_date, new_id, now_ts, opt_date, opt_enum, opt_str, opt_str_array,
    patch_required_str, patch_str, required_date, required_enum, required_str, respond, Filters,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

const STATUSES: [&str; 4] = ["draft", "submitted", "approved", "rejected"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPlan {
    pub id: String,
    pub teacher_id: String,
    pub classroom_id: String,
    pub title: String,
    pub week_start: String,
    pub objectives: Option<String>,
    pub activities: Vec<String>,
    pub resources: Option<String>,
    pub status: String,
    pub review_comment: Option<String>,
    pub submitted_at: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, teacher_id, classroom_id, title, week_start, objectives, activities,
    resources, status, review_comment, submitted_at, reviewed_at, created_at, updated_at";

fn from_row(r: &Row) -> rusqlite::Result<LessonPlan> {
    let activities: String = r.get(6)?;
    Ok(LessonPlan {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        classroom_id: r.get(2)?,
        title: r.get(3)?,
        week_start: r.get(4)?,
        objectives: r.get(5)?,
        // Stored by write_plan; anything unreadable shows as no activities.
        activities: serde_json::from_str(&activities).unwrap_or_default(),
        resources: r.get(7)?,
        status: r.get(8)?,
        review_comment: r.get(9)?,
        submitted_at: r.get(10)?,
        reviewed_at: r.get(11)?,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
    })
}

fn require_plan(conn: &Connection, id: &str) -> Result<LessonPlan, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM lesson_plans WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("lesson plan not found"))
}

fn check_week_start(d: NaiveDate) -> Result<String, HandlerErr> {
    if d.weekday() == Weekday::Mon {
        Ok(fmt_date(d))
    } else {
        Err(HandlerErr::bad_params("weekStart must be a Monday"))
    }
}

fn write_plan(conn: &Connection, p: &LessonPlan) -> Result<(), HandlerErr> {
    let activities = serde_json::to_string(&p.activities)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    conn.execute(
        &format!(
            "INSERT INTO lesson_plans({COLUMNS})
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
               classroom_id = excluded.classroom_id,
               title = excluded.title,
               week_start = excluded.week_start,
               objectives = excluded.objectives,
               activities = excluded.activities,
               resources = excluded.resources,
               status = excluded.status,
               review_comment = excluded.review_comment,
               submitted_at = excluded.submitted_at,
               reviewed_at = excluded.reviewed_at,
               updated_at = excluded.updated_at"
        ),
        rusqlite::params![
            p.id,
            p.teacher_id,
            p.classroom_id,
            p.title,
            p.week_start,
            p.objectives,
            activities,
            p.resources,
            p.status,
            p.review_comment,
            p.submitted_at,
            p.reviewed_at,
            p.created_at,
            p.updated_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "lesson_plans"))?;
    Ok(())
}

fn plans_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("teacher_id", opt_str(params, "teacherId")?)
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq("status", opt_enum(params, "status", &STATUSES)?)
        .eq("week_start", opt_date(params, "weekStart")?.map(fmt_date));
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM lesson_plans{} ORDER BY week_start DESC, title, id",
        filters.where_sql()
    ))?;
    let plans = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "plans": plans }))
}

fn plans_get(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let plan = require_plan(conn, &required_str(params, "planId")?)?;
    let teacher_name: Option<String> = conn
        .query_row(
            "SELECT first_name || ' ' || last_name FROM workers WHERE id = ?",
            [&plan.teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    let classroom_name: Option<String> = conn
        .query_row(
            "SELECT name FROM classrooms WHERE id = ?",
            [&plan.classroom_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(json!({
        "plan": plan,
        "teacherName": teacher_name,
        "classroomName": classroom_name,
    }))
}

fn plans_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let teacher = require_active_teacher(conn, &required_str(params, "teacherId")?)?;
    let classroom = require_classroom(conn, &required_str(params, "classroomId")?)?;
    let now = now_ts();
    let plan = LessonPlan {
        id: new_id(),
        teacher_id: teacher.id,
        classroom_id: classroom.id,
        title: required_str(params, "title")?,
        week_start: check_week_start(required_date(params, "weekStart")?)?,
        objectives: opt_str(params, "objectives")?,
        activities: opt_str_array(params, "activities")?.unwrap_or_default(),
        resources: opt_str(params, "resources")?,
        status: "draft".to_string(),
        review_comment: None,
        submitted_at: None,
        reviewed_at: None,
        created_at: now.clone(),
        updated_at: now,
    };
    write_plan(conn, &plan)?;
    Ok(json!({ "plan": plan }))
}

fn plans_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut p = require_plan(conn, &required_str(params, "planId")?)?;
    if p.status != "draft" && p.status != "rejected" {
        return Err(HandlerErr::conflict(format!(
            "lesson plan is {}; only drafts and rejected plans can be edited",
            p.status
        )));
    }
    if let Some(cid) = opt_str(params, "classroomId")? {
        p.classroom_id = require_classroom(conn, &cid)?.id;
    }
    p.title = patch_required_str(params, "title", p.title)?;
    if let Some(d) = opt_date(params, "weekStart")? {
        p.week_start = check_week_start(d)?;
    }
    p.objectives = patch_str(params, "objectives")?.apply(p.objectives);
    p.resources = patch_str(params, "resources")?.apply(p.resources);
    if let Some(activities) = opt_str_array(params, "activities")? {
        p.activities = activities;
    }
    p.updated_at = now_ts();
    write_plan(conn, &p)?;
    Ok(json!({ "plan": p }))
}

fn plans_submit(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut p = require_plan(conn, &required_str(params, "planId")?)?;
    if p.status != "draft" && p.status != "rejected" {
        return Err(HandlerErr::conflict(format!(
            "lesson plan is {}; cannot submit",
            p.status
        )));
    }
    let now = now_ts();
    p.status = "submitted".to_string();
    p.submitted_at = Some(now.clone());
    p.updated_at = now;
    write_plan(conn, &p)?;
    Ok(json!({ "plan": p }))
}

fn plans_review(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut p = require_plan(conn, &required_str(params, "planId")?)?;
    let decision = required_enum(params, "decision", &["approve", "reject"])?;
    let comment = opt_str(params, "comment")?;
    if p.status != "submitted" {
        return Err(HandlerErr::conflict(format!(
            "lesson plan is {}; only submitted plans can be reviewed",
            p.status
        )));
    }
    if decision == "reject" && comment.is_none() {
        return Err(HandlerErr::bad_params("a comment is required to reject a plan"));
    }
    let now = now_ts();
    p.status = if decision == "approve" {
        "approved"
    } else {
        "rejected"
    }
    .to_string();
    p.review_comment = comment;
    p.reviewed_at = Some(now.clone());
    p.updated_at = now;
    write_plan(conn, &p)?;
    Ok(json!({ "plan": p }))
}

fn plans_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let p = require_plan(conn, &required_str(params, "planId")?)?;
    if p.status == "approved" {
        return Err(HandlerErr::conflict("approved lesson plans cannot be deleted"));
    }
    conn.execute("DELETE FROM lesson_plans WHERE id = ?", [&p.id])
        .map_err(db_failed("db_delete_failed", "lesson_plans"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "plans.list" => plans_list(conn, &req.params),
        "plans.get" => plans_get(conn, &req.params),
        "plans.create" => plans_create(conn, &req.params),
        "plans.update" => plans_update(conn, &req.params),
        "plans.submit" => plans_submit(conn, &req.params),
        "plans.review" => plans_review(conn, &req.params),
        "plans.delete" => plans_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_start_must_be_monday() {
        let monday = NaiveDate::from_ymd_opt(2025, 3, 10).expect("date");
        let tuesday = NaiveDate::from_ymd_opt(2025, 3, 11).expect("date");
        assert_eq!(check_week_start(monday).ok(), Some("2025-03-10".to_string()));
        assert!(check_week_start(tuesday).is_err());
    }
}
