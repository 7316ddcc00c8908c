use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::calc::round_off_1_decimal;
use crate::ipc::handlers::classrooms::{current_school_year, list_classrooms, require_classroom};
use crate::ipc::handlers::{attendance, grades, payments, payroll};
use crate::ipc::helpers::{
    db_failed, fmt_date, new_id, now_ts, opt_date, opt_i64, opt_str, parse_period, required_i64,
    required_str, respond, today, Filters, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportKind {
    Attendance,
    Grades,
    Payments,
    Payroll,
    Enrollment,
}

impl ReportKind {
    const ALL: [ReportKind; 5] = [
        ReportKind::Attendance,
        ReportKind::Grades,
        ReportKind::Payments,
        ReportKind::Payroll,
        ReportKind::Enrollment,
    ];

    fn as_str(self) -> &'static str {
        match self {
            ReportKind::Attendance => "attendance",
            ReportKind::Grades => "grades",
            ReportKind::Payments => "payments",
            ReportKind::Payroll => "payroll",
            ReportKind::Enrollment => "enrollment",
        }
    }

    fn parse(raw: &str) -> Result<Self, HandlerErr> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == raw)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                HandlerErr::bad_params(format!("kind must be one of: {}", names.join(", ")))
            })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    id: String,
    kind: String,
    title: String,
    params: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<JsonValue>,
    generated_at: String,
}

/// Title, echoed params and computed data.
type Built = (String, JsonValue, JsonValue);

fn parse_stored(raw: String) -> JsonValue {
    serde_json::from_str(&raw).unwrap_or(JsonValue::Null)
}

fn summary_row(r: &Row) -> rusqlite::Result<Report> {
    Ok(Report {
        id: r.get(0)?,
        kind: r.get(1)?,
        title: r.get(2)?,
        params: parse_stored(r.get(3)?),
        data: None,
        generated_at: r.get(4)?,
    })
}

/// Per-classroom attendance between `from` and `to` (defaults: month to date).
fn attendance_report(conn: &Connection, params: &JsonValue) -> Result<Built, HandlerErr> {
    let to = opt_date(params, "to")?.unwrap_or_else(today);
    let from = opt_date(params, "from")?
        .or_else(|| to.with_day(1))
        .unwrap_or(to);
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    let (from, to) = (fmt_date(from), fmt_date(to));

    let mut rows = Vec::new();
    for classroom in list_classrooms(conn)? {
        let mut filters = Filters::default();
        filters
            .eq("classroom_id", Some(classroom.id.clone()))
            .cmp("date", ">=", Some(from.clone()))
            .cmp("date", "<=", Some(to.clone()));
        let mut summary = attendance::summarize(conn, &filters)?;
        summary["classroomId"] = json!(classroom.id);
        summary["classroomName"] = json!(classroom.name);
        rows.push(summary);
    }
    Ok((
        format!("Attendance {from} to {to}"),
        json!({ "from": from, "to": to }),
        json!({ "from": from, "to": to, "classrooms": rows }),
    ))
}

fn grades_report(conn: &Connection, params: &JsonValue) -> Result<Built, HandlerErr> {
    let classroom = require_classroom(conn, &required_str(params, "classroomId")?)?;
    let period = required_i64(params, "period")?;
    let data = grades::classroom_summary(conn, &classroom.id, period)?;
    Ok((
        format!("Grades {} period {period}", classroom.name),
        json!({ "classroomId": classroom.id, "period": period }),
        data,
    ))
}

fn payments_report(conn: &Connection, params: &JsonValue) -> Result<Built, HandlerErr> {
    let from = opt_date(params, "from")?;
    let to = opt_date(params, "to")?;
    let as_of = opt_date(params, "asOf")?.unwrap_or_else(today);
    let data = payments::summarize(conn, from, to, as_of)?;
    Ok((
        format!("Payments as of {}", fmt_date(as_of)),
        json!({ "from": from.map(fmt_date), "to": to.map(fmt_date), "asOf": fmt_date(as_of) }),
        data,
    ))
}

fn payroll_report(conn: &Connection, params: &JsonValue) -> Result<Built, HandlerErr> {
    let raw = opt_str(params, "period")?
        .unwrap_or_else(|| today().format("%Y-%m").to_string());
    let period = parse_period("period", &raw)?;
    let data = payroll::summarize(conn, &period)?;
    Ok((
        format!("Payroll {period}"),
        json!({ "period": period }),
        data,
    ))
}

fn enrollment_report(conn: &Connection, params: &JsonValue) -> Result<Built, HandlerErr> {
    let school_year = opt_i64(params, "schoolYear")?.unwrap_or_else(current_school_year);
    let mut rows = Vec::new();
    let (mut total_active, mut total_capacity) = (0i64, 0i64);
    for classroom in list_classrooms(conn)?
        .into_iter()
        .filter(|c| c.school_year == school_year)
    {
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enrollments
             WHERE classroom_id = ? AND school_year = ? AND status = 'active'",
            (&classroom.id, school_year),
            |r| r.get(0),
        )?;
        total_active += active;
        total_capacity += classroom.capacity;
        rows.push(json!({
            "classroomId": classroom.id,
            "classroomName": classroom.name,
            "active": active,
            "capacity": classroom.capacity,
            "available": (classroom.capacity - active).max(0),
            "occupancy": occupancy(active, classroom.capacity),
        }));
    }
    Ok((
        format!("Enrollment {school_year}"),
        json!({ "schoolYear": school_year }),
        json!({
            "schoolYear": school_year,
            "classrooms": rows,
            "active": total_active,
            "capacity": total_capacity,
            "occupancy": occupancy(total_active, total_capacity),
        }),
    ))
}

fn occupancy(active: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 0.0;
    }
    round_off_1_decimal(active as f64 * 100.0 / capacity as f64)
}

fn reports_generate(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let kind = ReportKind::parse(&required_str(params, "kind")?)?;
    let (default_title, report_params, data) = match kind {
        ReportKind::Attendance => attendance_report(conn, params)?,
        ReportKind::Grades => grades_report(conn, params)?,
        ReportKind::Payments => payments_report(conn, params)?,
        ReportKind::Payroll => payroll_report(conn, params)?,
        ReportKind::Enrollment => enrollment_report(conn, params)?,
    };
    let report = Report {
        id: new_id(),
        kind: kind.as_str().to_string(),
        title: opt_str(params, "title")?.unwrap_or(default_title),
        params: report_params,
        data: Some(data),
        generated_at: now_ts(),
    };
    conn.execute(
        "INSERT INTO reports(id, kind, title, params, data, generated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        (
            &report.id,
            &report.kind,
            &report.title,
            report.params.to_string(),
            report.data.as_ref().map(JsonValue::to_string),
            &report.generated_at,
        ),
    )
    .map_err(db_failed("db_insert_failed", "reports"))?;
    Ok(json!({ "report": report }))
}

fn reports_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    if let Some(kind) = opt_str(params, "kind")? {
        filters.eq("kind", Some(ReportKind::parse(&kind)?.as_str().to_string()));
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT id, kind, title, params, generated_at FROM reports{}
         ORDER BY generated_at DESC, rowid DESC",
        filters.where_sql()
    ))?;
    let reports = stmt
        .query_map(filters.args(), summary_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "reports": reports }))
}

fn reports_get(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "reportId")?;
    let report = conn
        .query_row(
            "SELECT id, kind, title, params, generated_at, data FROM reports WHERE id = ?",
            [&id],
            |r| {
                let mut report = summary_row(r)?;
                report.data = Some(parse_stored(r.get(5)?));
                Ok(report)
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("report not found"))?;
    Ok(json!({ "report": report }))
}

fn reports_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "reportId")?;
    let removed = conn
        .execute("DELETE FROM reports WHERE id = ?", [&id])
        .map_err(db_failed("db_delete_failed", "reports"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("report not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "reports.generate" => reports_generate(conn, &req.params),
        "reports.list" => reports_list(conn, &req.params),
        "reports.get" => reports_get(conn, &req.params),
        "reports.delete" => reports_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
