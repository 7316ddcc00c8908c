use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::calc::round_cents;
use crate::ipc::handlers::students::require_student;
use crate::ipc::helpers::{
    db_failed, fmt_date, new_id, now_ts, opt_bool, opt_date, opt_enum, opt_str, required_date,
    required_enum, required_f64, required_str, respond, today, Filters, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

const CONCEPTS: [&str; 4] = ["enrollment", "tuition", "materials", "other"];
const STATUSES: [&str; 3] = ["pending", "paid", "cancelled"];
const METHODS: [&str; 4] = ["cash", "transfer", "card", "other"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub student_id: String,
    pub concept: String,
    pub description: Option<String>,
    pub amount: f64,
    pub due_date: String,
    pub status: String,
    pub method: Option<String>,
    pub paid_at: Option<String>,
    pub created_at: String,
}

impl Payment {
    /// Pending and past due as of `as_of`.
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.status == "pending" && self.due_date < fmt_date(as_of)
    }
}

const COLUMNS: &str =
    "id, student_id, concept, description, amount, due_date, status, method, paid_at, created_at";

fn from_row(r: &Row) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        concept: r.get(2)?,
        description: r.get(3)?,
        amount: r.get(4)?,
        due_date: r.get(5)?,
        status: r.get(6)?,
        method: r.get(7)?,
        paid_at: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn with_overdue(p: &Payment, as_of: NaiveDate) -> JsonValue {
    let mut v = json!(p);
    v["overdue"] = json!(p.is_overdue(as_of));
    v
}

fn require_payment(conn: &Connection, id: &str) -> Result<Payment, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM payments WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("payment not found"))
}

fn query_payments(conn: &Connection, filters: &Filters) -> Result<Vec<Payment>, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM payments{} ORDER BY due_date, id",
        filters.where_sql()
    ))?;
    let rows = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn due_range(params: &JsonValue, filters: &mut Filters) -> Result<(), HandlerErr> {
    filters
        .cmp("due_date", ">=", opt_date(params, "from")?.map(fmt_date))
        .cmp("due_date", "<=", opt_date(params, "to")?.map(fmt_date));
    Ok(())
}

fn as_of(params: &JsonValue) -> Result<NaiveDate, HandlerErr> {
    Ok(opt_date(params, "asOf")?.unwrap_or_else(today))
}

fn set_status(conn: &Connection, p: &Payment) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE payments SET status = ?, method = ?, paid_at = ? WHERE id = ?",
        (&p.status, &p.method, &p.paid_at, &p.id),
    )
    .map_err(db_failed("db_update_failed", "payments"))?;
    Ok(())
}

fn payments_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let as_of = as_of(params)?;
    let mut filters = Filters::default();
    filters
        .eq("student_id", opt_str(params, "studentId")?)
        .eq("status", opt_enum(params, "status", &STATUSES)?);
    due_range(params, &mut filters)?;
    let overdue = opt_bool(params, "overdue")?;
    let payments: Vec<JsonValue> = query_payments(conn, &filters)?
        .iter()
        .filter(|p| overdue.map_or(true, |want| p.is_overdue(as_of) == want))
        .map(|p| with_overdue(p, as_of))
        .collect();
    Ok(json!({ "payments": payments, "asOf": fmt_date(as_of) }))
}

fn payments_create(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let student = require_student(conn, &required_str(params, "studentId")?)?;
    let amount = required_f64(params, "amount")?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be > 0"));
    }
    let payment = Payment {
        id: new_id(),
        student_id: student.id,
        concept: required_enum(params, "concept", &CONCEPTS)?,
        description: opt_str(params, "description")?,
        amount: round_cents(amount),
        due_date: fmt_date(required_date(params, "dueDate")?),
        status: "pending".to_string(),
        method: None,
        paid_at: None,
        created_at: now_ts(),
    };
    conn.execute(
        &format!("INSERT INTO payments({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        rusqlite::params![
            payment.id,
            payment.student_id,
            payment.concept,
            payment.description,
            payment.amount,
            payment.due_date,
            payment.status,
            payment.method,
            payment.paid_at,
            payment.created_at,
        ],
    )
    .map_err(db_failed("db_insert_failed", "payments"))?;
    Ok(json!({ "payment": with_overdue(&payment, today()) }))
}

fn payments_pay(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut p = require_payment(conn, &required_str(params, "paymentId")?)?;
    if p.status != "pending" {
        return Err(HandlerErr::conflict(format!("payment is already {}", p.status)));
    }
    p.method = Some(required_enum(params, "method", &METHODS)?);
    p.paid_at = Some(fmt_date(opt_date(params, "paidAt")?.unwrap_or_else(today)));
    p.status = "paid".to_string();
    set_status(conn, &p)?;
    Ok(json!({ "payment": with_overdue(&p, today()) }))
}

fn payments_cancel(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut p = require_payment(conn, &required_str(params, "paymentId")?)?;
    if p.status != "pending" {
        return Err(HandlerErr::conflict(format!("payment is already {}", p.status)));
    }
    p.status = "cancelled".to_string();
    set_status(conn, &p)?;
    Ok(json!({ "payment": with_overdue(&p, today()) }))
}

fn payments_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let id = required_str(params, "paymentId")?;
    let removed = conn
        .execute("DELETE FROM payments WHERE id = ?", [&id])
        .map_err(db_failed("db_delete_failed", "payments"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("payment not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Totals by state over payments due in `[from, to]`.
pub fn summarize(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    as_of: NaiveDate,
) -> Result<JsonValue, HandlerErr> {
    let mut filters = Filters::default();
    filters
        .cmp("due_date", ">=", from.map(fmt_date))
        .cmp("due_date", "<=", to.map(fmt_date));
    let payments = query_payments(conn, &filters)?;

    let (mut collected, mut pending, mut overdue) = (0.0, 0.0, 0.0);
    let (mut paid_count, mut pending_count, mut overdue_count, mut cancelled_count) =
        (0usize, 0usize, 0usize, 0usize);
    for p in &payments {
        match p.status.as_str() {
            "paid" => {
                collected += p.amount;
                paid_count += 1;
            }
            "pending" => {
                pending += p.amount;
                pending_count += 1;
                if p.is_overdue(as_of) {
                    overdue += p.amount;
                    overdue_count += 1;
                }
            }
            _ => cancelled_count += 1,
        }
    }
    Ok(json!({
        "asOf": fmt_date(as_of),
        "from": from.map(fmt_date),
        "to": to.map(fmt_date),
        "collected": round_cents(collected),
        "pending": round_cents(pending),
        "overdue": round_cents(overdue),
        "counts": {
            "paid": paid_count,
            "pending": pending_count,
            "overdue": overdue_count,
            "cancelled": cancelled_count,
        },
    }))
}

fn payments_summary(conn: &Connection, params: &JsonValue) -> HandlerResult {
    summarize(
        conn,
        opt_date(params, "from")?,
        opt_date(params, "to")?,
        as_of(params)?,
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "payments.list" => payments_list(conn, &req.params),
        "payments.create" => payments_create(conn, &req.params),
        "payments.pay" => payments_pay(conn, &req.params),
        "payments.cancel" => payments_cancel(conn, &req.params),
        "payments.delete" => payments_delete(conn, &req.params),
        "payments.summary" => payments_summary(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
