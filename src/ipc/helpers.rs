use chrono::{Local, NaiveDate, SecondsFormat, Utc};
use rusqlite::{types::Value as SqlValue, Connection, OptionalExtension, Transaction};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::ipc::error::{err, ok};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<JsonValue>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> JsonValue {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// Maps a storage error to `code`, tagging the table it happened on.
pub fn db_failed(code: &'static str, table: &'static str) -> impl FnOnce(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string()).with_details(serde_json::json!({ "table": table }))
}

pub type HandlerResult = Result<JsonValue, HandlerErr>;

pub fn respond(id: &str, result: HandlerResult) -> JsonValue {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

/// Update semantics for optional fields: absent keeps, `null` or blank
/// clears, anything else sets.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Patch::Keep => current,
            Patch::Clear => None,
            Patch::Set(v) => Some(v),
        }
    }
}

fn patch_with<T>(
    params: &JsonValue,
    key: &str,
    expected: &str,
    parse: impl Fn(&JsonValue) -> Option<T>,
) -> Result<Patch<T>, HandlerErr> {
    match params.get(key) {
        None => Ok(Patch::Keep),
        Some(v) if v.is_null() => Ok(Patch::Clear),
        Some(v) => parse(v)
            .map(Patch::Set)
            .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be {expected}"))),
    }
}

pub fn patch_str(params: &JsonValue, key: &str) -> Result<Patch<String>, HandlerErr> {
    let patch = patch_with(params, key, "string or null", |v| {
        v.as_str().map(|s| s.trim().to_string())
    })?;
    Ok(match patch {
        Patch::Set(s) if s.is_empty() => Patch::Clear,
        other => other,
    })
}

pub fn patch_f64(params: &JsonValue, key: &str) -> Result<Patch<f64>, HandlerErr> {
    patch_with(params, key, "number or null", JsonValue::as_f64)
}

pub fn patch_i64(params: &JsonValue, key: &str) -> Result<Patch<i64>, HandlerErr> {
    patch_with(params, key, "integer or null", JsonValue::as_i64)
}

pub fn opt_str(params: &JsonValue, key: &str) -> Result<Option<String>, HandlerErr> {
    Ok(patch_str(params, key)?.apply(None))
}

pub fn required_str(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    opt_str(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

/// For required fields on update: absent keeps `current`, blank is rejected.
pub fn patch_required_str(
    params: &JsonValue,
    key: &str,
    current: String,
) -> Result<String, HandlerErr> {
    match patch_str(params, key)? {
        Patch::Keep => Ok(current),
        Patch::Clear => Err(HandlerErr::bad_params(format!("{key} must not be empty"))),
        Patch::Set(v) => Ok(v),
    }
}

pub fn opt_i64(params: &JsonValue, key: &str) -> Result<Option<i64>, HandlerErr> {
    Ok(patch_i64(params, key)?.apply(None))
}

pub fn required_i64(params: &JsonValue, key: &str) -> Result<i64, HandlerErr> {
    opt_i64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

pub fn opt_f64(params: &JsonValue, key: &str) -> Result<Option<f64>, HandlerErr> {
    Ok(patch_f64(params, key)?.apply(None))
}

pub fn required_f64(params: &JsonValue, key: &str) -> Result<f64, HandlerErr> {
    opt_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

pub fn opt_bool(params: &JsonValue, key: &str) -> Result<Option<bool>, HandlerErr> {
    Ok(patch_with(params, key, "boolean or null", JsonValue::as_bool)?.apply(None))
}

pub fn opt_str_array(params: &JsonValue, key: &str) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be array of strings")))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be array of strings")))?
            .trim()
            .to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    Ok(Some(out))
}

pub fn check_enum(key: &str, value: &str, allowed: &[&str]) -> Result<(), HandlerErr> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(HandlerErr::bad_params(format!(
            "{key} must be one of: {}",
            allowed.join(", ")
        )))
    }
}

pub fn opt_enum(
    params: &JsonValue,
    key: &str,
    allowed: &[&str],
) -> Result<Option<String>, HandlerErr> {
    let v = opt_str(params, key)?;
    if let Some(s) = v.as_deref() {
        check_enum(key, s, allowed)?;
    }
    Ok(v)
}

pub fn patch_enum(
    params: &JsonValue,
    key: &str,
    allowed: &[&str],
) -> Result<Patch<String>, HandlerErr> {
    let patch = patch_str(params, key)?;
    if let Patch::Set(v) = &patch {
        check_enum(key, v, allowed)?;
    }
    Ok(patch)
}

pub fn required_enum(params: &JsonValue, key: &str, allowed: &[&str]) -> Result<String, HandlerErr> {
    opt_enum(params, key, allowed)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

pub fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{key} must be a YYYY-MM-DD date")))
}

pub fn opt_date(params: &JsonValue, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    opt_str(params, key)?
        .map(|s| parse_date(key, &s))
        .transpose()
}

pub fn required_date(params: &JsonValue, key: &str) -> Result<NaiveDate, HandlerErr> {
    opt_date(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

pub fn patch_date(params: &JsonValue, key: &str) -> Result<Patch<String>, HandlerErr> {
    Ok(match patch_str(params, key)? {
        Patch::Set(s) => Patch::Set(fmt_date(parse_date(key, &s)?)),
        other => other,
    })
}

/// `YYYY-MM`
pub fn parse_period(key: &str, raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    let bad = || HandlerErr::bad_params(format!("{key} must be YYYY-MM"));
    let (y, m) = t.split_once('-').ok_or_else(bad)?;
    if y.len() != 4 || m.len() != 2 {
        return Err(bad());
    }
    let year: i32 = y.parse().map_err(|_| bad())?;
    let month: u32 = m.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) {
        return Err(bad());
    }
    Ok(format!("{year:04}-{month:02}"))
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// `table` must be one of the crate's own table names.
pub fn record_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ? LIMIT 1"),
            [id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn require_record(
    conn: &Connection,
    table: &str,
    id: &str,
    label: &str,
) -> Result<(), HandlerErr> {
    if record_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{label} not found")))
    }
}

pub fn count(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(sql, args, |r| r.get(0))?)
}

pub fn begin(conn: &Connection) -> Result<Transaction<'_>, HandlerErr> {
    conn.unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))
}

pub fn commit(tx: Transaction<'_>) -> Result<(), HandlerErr> {
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Accumulates `WHERE` clauses and their bound values for list queries.
#[derive(Default)]
pub struct Filters {
    clauses: Vec<String>,
    args: Vec<SqlValue>,
}

impl Filters {
    pub fn eq(&mut self, column: &str, value: Option<String>) -> &mut Self {
        if let Some(v) = value {
            self.clauses.push(format!("{column} = ?"));
            self.args.push(SqlValue::Text(v));
        }
        self
    }

    pub fn eq_i64(&mut self, column: &str, value: Option<i64>) -> &mut Self {
        if let Some(v) = value {
            self.clauses.push(format!("{column} = ?"));
            self.args.push(SqlValue::Integer(v));
        }
        self
    }

    pub fn cmp(&mut self, column: &str, op: &str, value: Option<String>) -> &mut Self {
        if let Some(v) = value {
            self.clauses.push(format!("{column} {op} ?"));
            self.args.push(SqlValue::Text(v));
        }
        self
    }

    /// Case-insensitive substring match over any of `columns`. Both sides are
    /// folded with Unicode rules and the term matches literally.
    pub fn search(&mut self, columns: &[&str], term: Option<String>) -> &mut Self {
        let Some(term) = term else {
            return self;
        };
        let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("fold_case(COALESCE({c}, '')) LIKE ? ESCAPE '\\'"))
            .collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            self.args.push(SqlValue::Text(pattern.clone()));
        }
        self
    }

    pub fn raw(&mut self, clause: &str, args: Vec<SqlValue>) -> &mut Self {
        self.clauses.push(clause.to_string());
        self.args.extend(args);
        self
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn args(&self) -> rusqlite::ParamsFromIter<std::slice::Iter<'_, SqlValue>> {
        rusqlite::params_from_iter(self.args.iter())
    }
}
