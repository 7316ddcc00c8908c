use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::calc::{parse_hhmm, slots_overlap};
use crate::ipc::handlers::classrooms::require_classroom;
use crate::ipc::handlers::workers::require_worker;
use crate::ipc::helpers::{
    db_failed, new_id, opt_i64, opt_str, patch_required_str, patch_str, required_i64,
    required_str, respond, Filters, HandlerErr, HandlerResult, Patch,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub id: String,
    pub classroom_id: String,
    pub teacher_id: Option<String>,
    pub course: String,
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
}

impl ScheduleSlot {
    fn minutes(&self) -> Option<(u32, u32)> {
        Some((parse_hhmm(&self.start_time)?, parse_hhmm(&self.end_time)?))
    }
}

const COLUMNS: &str = "id, classroom_id, teacher_id, course, day_of_week, start_time, end_time";

fn from_row(r: &Row) -> rusqlite::Result<ScheduleSlot> {
    Ok(ScheduleSlot {
        id: r.get(0)?,
        classroom_id: r.get(1)?,
        teacher_id: r.get(2)?,
        course: r.get(3)?,
        day_of_week: r.get(4)?,
        start_time: r.get(5)?,
        end_time: r.get(6)?,
    })
}

fn require_slot(conn: &Connection, id: &str) -> Result<ScheduleSlot, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM schedules WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("schedule slot not found"))
}

fn check_day(day: i64) -> Result<i64, HandlerErr> {
    if (1..=7).contains(&day) {
        Ok(day)
    } else {
        Err(HandlerErr::bad_params("dayOfWeek must be between 1 (Monday) and 7"))
    }
}

fn check_time(key: &str, raw: &str) -> Result<String, HandlerErr> {
    let minutes =
        parse_hhmm(raw).ok_or_else(|| HandlerErr::bad_params(format!("{key} must be HH:MM")))?;
    Ok(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}

/// Validates the slot shape and rejects overlaps with its classroom or teacher.
fn validate_slot(conn: &Connection, slot: &ScheduleSlot) -> Result<(), HandlerErr> {
    let Some(range) = slot.minutes() else {
        return Err(HandlerErr::bad_params("startTime and endTime must be HH:MM"));
    };
    if range.0 >= range.1 {
        return Err(HandlerErr::bad_params("startTime must be before endTime"));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM schedules
         WHERE day_of_week = ?1 AND id <> ?2
           AND (classroom_id = ?3 OR (?4 IS NOT NULL AND teacher_id = ?4))"
    ))?;
    let same_day = stmt
        .query_map(
            (slot.day_of_week, &slot.id, &slot.classroom_id, &slot.teacher_id),
            from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for other in same_day {
        let Some(other_range) = other.minutes() else {
            continue;
        };
        if slots_overlap(range, other_range) {
            let owner = if other.classroom_id == slot.classroom_id {
                "classroom"
            } else {
                "teacher"
            };
            return Err(HandlerErr::conflict(format!(
                "slot overlaps {} {}-{} for the same {owner}",
                other.course, other.start_time, other.end_time
            ))
            .with_details(json!({ "conflictingSlotId": other.id, "scope": owner })));
        }
    }
    Ok(())
}

fn write_slot(conn: &Connection, s: &ScheduleSlot) -> Result<(), HandlerErr> {
    conn.execute(
        &format!(
            "INSERT INTO schedules({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
               classroom_id = excluded.classroom_id,
               teacher_id = excluded.teacher_id,
               course = excluded.course,
               day_of_week = excluded.day_of_week,
               start_time = excluded.start_time,
               end_time = excluded.end_time"
        ),
        rusqlite::params![
            s.id,
            s.classroom_id,
            s.teacher_id,
            s.course,
            s.day_of_week,
            s.start_time,
            s.end_time,
        ],
    )
    .map_err(db_failed("db_update_failed", "schedules"))?;
    Ok(())
}

fn schedules_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("classroom_id", opt_str(params, "classroomId")?)
        .eq("teacher_id", opt_str(params, "teacherId")?)
        .eq_i64(
            "day_of_week",
            opt_i64(params, "dayOfWeek")?.map(check_day).transpose()?,
        );
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM schedules{} ORDER BY day_of_week, start_time, classroom_id",
        filters.where_sql()
    ))?;
    let slots = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "schedules": slots }))
}

fn schedules_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let classroom = require_classroom(conn, &required_str(params, "classroomId")?)?;
    let teacher_id = opt_str(params, "teacherId")?;
    if let Some(tid) = teacher_id.as_deref() {
        require_worker(conn, tid)?;
    }
    let slot = ScheduleSlot {
        id: new_id(),
        classroom_id: classroom.id,
        teacher_id,
        course: required_str(params, "course")?,
        day_of_week: check_day(required_i64(params, "dayOfWeek")?)?,
        start_time: check_time("startTime", &required_str(params, "startTime")?)?,
        end_time: check_time("endTime", &required_str(params, "endTime")?)?,
    };
    validate_slot(conn, &slot)?;
    write_slot(conn, &slot)?;
    Ok(json!({ "schedule": slot }))
}

fn schedules_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut s = require_slot(conn, &required_str(params, "scheduleId")?)?;
    if let Some(cid) = opt_str(params, "classroomId")? {
        s.classroom_id = require_classroom(conn, &cid)?.id;
    }
    let teacher = patch_str(params, "teacherId")?;
    if let Patch::Set(tid) = &teacher {
        require_worker(conn, tid)?;
    }
    s.teacher_id = teacher.apply(s.teacher_id);
    s.course = patch_required_str(params, "course", s.course)?;
    if let Some(day) = opt_i64(params, "dayOfWeek")? {
        s.day_of_week = check_day(day)?;
    }
    if let Some(start) = opt_str(params, "startTime")? {
        s.start_time = check_time("startTime", &start)?;
    }
    if let Some(end) = opt_str(params, "endTime")? {
        s.end_time = check_time("endTime", &end)?;
    }
    validate_slot(conn, &s)?;
    write_slot(conn, &s)?;
    Ok(json!({ "schedule": s }))
}

fn schedules_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "scheduleId")?;
    let removed = conn
        .execute("DELETE FROM schedules WHERE id = ?", [&id])
        .map_err(db_failed("db_delete_failed", "schedules"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("schedule slot not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "schedules.list" => schedules_list(conn, &req.params),
        "schedules.create" => schedules_create(conn, &req.params),
        "schedules.update" => schedules_update(conn, &req.params),
        "schedules.delete" => schedules_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn times_are_normalized_and_days_bounded() {
        assert_eq!(check_time("startTime", "08:05").ok(), Some("08:05".to_string()));
        assert!(check_time("startTime", "8:05").is_err());
        assert!(check_time("startTime", "24:00").is_err());
        assert!(check_day(0).is_err());
        assert!(check_day(8).is_err());
        assert_eq!(check_day(7).ok(), Some(7));
    }
}
