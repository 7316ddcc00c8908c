use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::calc::round_cents;
use crate::config::PayrollConfig;
use crate::ipc::helpers::{
    begin, commit, db_failed, fmt_date, new_id, now_ts, opt_enum, opt_str, parse_period,
    patch_f64, required_str, respond, today, Filters, HandlerErr, HandlerResult, Patch,
};
use crate::ipc::types::{AppState, Request};

const STATUSES: [&str; 3] = ["draft", "approved", "paid"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollEntry {
    pub id: String,
    pub worker_id: String,
    pub period: String,
    pub base_salary: f64,
    pub bonuses: f64,
    pub deductions: f64,
    pub net_pay: f64,
    pub status: String,
    pub paid_at: Option<String>,
    pub created_at: String,
}

impl PayrollEntry {
    fn recompute_net(&mut self) {
        self.net_pay = round_cents(self.base_salary + self.bonuses - self.deductions);
    }
}

const COLUMNS: &str = "id, worker_id, period, base_salary, bonuses, deductions, net_pay,
    status, paid_at, created_at";

fn from_row(r: &Row) -> rusqlite::Result<PayrollEntry> {
    Ok(PayrollEntry {
        id: r.get(0)?,
        worker_id: r.get(1)?,
        period: r.get(2)?,
        base_salary: r.get(3)?,
        bonuses: r.get(4)?,
        deductions: r.get(5)?,
        net_pay: r.get(6)?,
        status: r.get(7)?,
        paid_at: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn require_entry(conn: &Connection, id: &str) -> Result<PayrollEntry, HandlerErr> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM payroll WHERE id = ?"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("payroll entry not found"))
}

fn query_entries(conn: &Connection, filters: &Filters) -> Result<Vec<PayrollEntry>, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM payroll{} ORDER BY period DESC, worker_id",
        filters.where_sql()
    ))?;
    let rows = stmt
        .query_map(filters.args(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn write_entry(conn: &Connection, e: &PayrollEntry) -> Result<(), HandlerErr> {
    conn.execute(
        &format!(
            "INSERT INTO payroll({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               bonuses = excluded.bonuses,
               deductions = excluded.deductions,
               net_pay = excluded.net_pay,
               status = excluded.status,
               paid_at = excluded.paid_at"
        ),
        rusqlite::params![
            e.id,
            e.worker_id,
            e.period,
            e.base_salary,
            e.bonuses,
            e.deductions,
            e.net_pay,
            e.status,
            e.paid_at,
            e.created_at,
        ],
    )
    .map_err(db_failed("db_update_failed", "payroll"))?;
    Ok(())
}

fn opt_period(params: &JsonValue) -> Result<Option<String>, HandlerErr> {
    opt_str(params, "period")?
        .map(|p| parse_period("period", &p))
        .transpose()
}

fn required_period(params: &JsonValue) -> Result<String, HandlerErr> {
    opt_period(params)?.ok_or_else(|| HandlerErr::bad_params("missing period"))
}

fn non_negative_amount(key: &str, patch: Patch<f64>) -> Result<Option<f64>, HandlerErr> {
    match patch {
        Patch::Keep => Ok(None),
        Patch::Clear => Ok(Some(0.0)),
        Patch::Set(v) if v.is_finite() && v >= 0.0 => Ok(Some(round_cents(v))),
        Patch::Set(_) => Err(HandlerErr::bad_params(format!("{key} must be >= 0"))),
    }
}

fn payroll_list(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut filters = Filters::default();
    filters
        .eq("period", opt_period(params)?)
        .eq("worker_id", opt_str(params, "workerId")?)
        .eq("status", opt_enum(params, "status", &STATUSES)?);
    Ok(json!({ "payroll": query_entries(conn, &filters)? }))
}

/// Drafts one entry per active worker that has none for `period`.
pub fn generate(
    conn: &Connection,
    period: &str,
    cfg: &PayrollConfig,
) -> Result<Vec<PayrollEntry>, HandlerErr> {
    let workers = {
        let mut stmt = conn.prepare(
            "SELECT id, base_salary FROM workers
             WHERE status = 'active'
               AND id NOT IN (SELECT worker_id FROM payroll WHERE period = ?)
             ORDER BY last_name, first_name, id",
        )?;
        let rows = stmt
            .query_map([period], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let tx = begin(conn)?;
    let now = now_ts();
    let mut created = Vec::with_capacity(workers.len());
    for (worker_id, base_salary) in workers {
        let mut entry = PayrollEntry {
            id: new_id(),
            worker_id,
            period: period.to_string(),
            base_salary,
            bonuses: 0.0,
            deductions: round_cents(base_salary * cfg.pension_rate),
            net_pay: 0.0,
            status: "draft".to_string(),
            paid_at: None,
            created_at: now.clone(),
        };
        entry.recompute_net();
        write_entry(&tx, &entry)?;
        created.push(entry);
    }
    commit(tx)?;
    Ok(created)
}

fn payroll_generate(conn: &Connection, cfg: &PayrollConfig, params: &JsonValue) -> HandlerResult {
    let period = required_period(params)?;
    let created = generate(conn, &period, cfg)?;
    Ok(json!({ "period": period, "created": created.len(), "entries": created }))
}

fn payroll_update(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let mut e = require_entry(conn, &required_str(params, "payrollId")?)?;
    if e.status != "draft" {
        return Err(HandlerErr::conflict(format!(
            "payroll entry is {}; only drafts can be edited",
            e.status
        )));
    }
    if let Some(b) = non_negative_amount("bonuses", patch_f64(params, "bonuses")?)? {
        e.bonuses = b;
    }
    if let Some(d) = non_negative_amount("deductions", patch_f64(params, "deductions")?)? {
        e.deductions = d;
    }
    e.recompute_net();
    if e.net_pay < 0.0 {
        return Err(HandlerErr::bad_params("net pay must not be negative")
            .with_details(json!({ "netPay": e.net_pay })));
    }
    write_entry(conn, &e)?;
    Ok(json!({ "payroll": e }))
}

fn advance(conn: &Connection, params: &JsonValue, from: &str, to: &str) -> HandlerResult {
    let mut e = require_entry(conn, &required_str(params, "payrollId")?)?;
    if e.status != from {
        return Err(HandlerErr::conflict(format!(
            "payroll entry is {}; expected {from}",
            e.status
        )));
    }
    e.status = to.to_string();
    if to == "paid" {
        e.paid_at = Some(fmt_date(today()));
    }
    write_entry(conn, &e)?;
    Ok(json!({ "payroll": e }))
}

fn payroll_delete(conn: &Connection, params: &JsonValue) -> HandlerResult {
    let e = require_entry(conn, &required_str(params, "payrollId")?)?;
    if e.status != "draft" {
        return Err(HandlerErr::conflict(format!(
            "payroll entry is {}; only drafts can be deleted",
            e.status
        )));
    }
    conn.execute("DELETE FROM payroll WHERE id = ?", [&e.id])
        .map_err(db_failed("db_delete_failed", "payroll"))?;
    Ok(json!({ "ok": true }))
}

/// Totals per status and overall for one period.
pub fn summarize(conn: &Connection, period: &str) -> Result<JsonValue, HandlerErr> {
    let mut filters = Filters::default();
    filters.eq("period", Some(period.to_string()));
    let entries = query_entries(conn, &filters)?;

    let mut by_status = serde_json::Map::new();
    for status in STATUSES {
        let subset: Vec<&PayrollEntry> = entries.iter().filter(|e| e.status == status).collect();
        by_status.insert(
            status.to_string(),
            json!({
                "count": subset.len(),
                "netPay": round_cents(subset.iter().map(|e| e.net_pay).sum()),
            }),
        );
    }
    Ok(json!({
        "period": period,
        "byStatus": by_status,
        "count": entries.len(),
        "baseSalary": round_cents(entries.iter().map(|e| e.base_salary).sum()),
        "bonuses": round_cents(entries.iter().map(|e| e.bonuses).sum()),
        "deductions": round_cents(entries.iter().map(|e| e.deductions).sum()),
        "netPay": round_cents(entries.iter().map(|e| e.net_pay).sum()),
    }))
}

fn payroll_summary(conn: &Connection, params: &JsonValue) -> HandlerResult {
    summarize(conn, &required_period(params)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let conn = &state.db;
    let result = match req.method.as_str() {
        "payroll.list" => payroll_list(conn, &req.params),
        "payroll.generate" => payroll_generate(conn, &state.config.payroll, &req.params),
        "payroll.update" => payroll_update(conn, &req.params),
        "payroll.approve" => advance(conn, &req.params, "draft", "approved"),
        "payroll.pay" => advance(conn, &req.params, "approved", "paid"),
        "payroll.delete" => payroll_delete(conn, &req.params),
        "payroll.summary" => payroll_summary(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
