use log::{info, warn};
use serde_json::{json, Value as JsonValue};

use crate::db;
use crate::demo::{CallKind, DelayRange};
use crate::ipc::helpers::{respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::seed;

fn handle_health(state: &mut AppState, _params: &JsonValue) -> HandlerResult {
    let counts = db::table_counts(&state.db)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:?}")))?;
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "seeded": state.seeded,
        "counts": counts,
    }))
}

fn clear_store(state: &mut AppState) -> Result<(), HandlerErr> {
    db::clear_all(&state.db).map_err(|e| HandlerErr::new("db_delete_failed", format!("{e:?}")))?;
    state.seeded = false;
    Ok(())
}

fn handle_demo_reset(state: &mut AppState, _params: &JsonValue) -> HandlerResult {
    clear_store(state)?;
    seed::seed(&state.db, &state.config.payroll).map_err(|e| {
        warn!("event=seed module=seed status=error error={e:?}");
        HandlerErr::new("db_seed_failed", format!("{e:?}"))
    })?;
    state.seeded = true;
    let counts = db::table_counts(&state.db)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:?}")))?;
    info!("event=demo_reset status=ok");
    Ok(json!({ "seeded": true, "counts": counts }))
}

fn handle_demo_clear(state: &mut AppState, _params: &JsonValue) -> HandlerResult {
    clear_store(state)?;
    info!("event=demo_clear status=ok");
    Ok(json!({ "seeded": false }))
}

fn config_view(state: &AppState) -> JsonValue {
    json!({
        "query": state.demo.query,
        "mutation": state.demo.mutation,
        "seed": state.demo.seed,
    })
}

fn handle_demo_config_get(state: &mut AppState, _params: &JsonValue) -> HandlerResult {
    Ok(config_view(state))
}

/// Reads `{minMs, maxMs}` for one call kind; missing keys keep the current value.
fn parse_range(
    params: &JsonValue,
    key: &str,
    current: DelayRange,
) -> Result<Option<DelayRange>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if !v.is_object() {
        return Err(HandlerErr::bad_params(format!("{key} must be an object")));
    }
    let field = |name: &str, fallback: u64| -> Result<u64, HandlerErr> {
        match v.get(name) {
            None => Ok(fallback),
            Some(n) => n.as_u64().ok_or_else(|| {
                HandlerErr::bad_params(format!("{key}.{name} must be a non-negative integer"))
            }),
        }
    };
    Ok(Some(DelayRange {
        min_ms: field("minMs", current.min_ms)?,
        max_ms: field("maxMs", current.max_ms)?,
    }))
}

fn handle_demo_config_set(state: &mut AppState, params: &JsonValue) -> HandlerResult {
    // Both ranges are validated before either is applied.
    let mut next = state.demo.clone();
    for kind in [CallKind::Query, CallKind::Mutation] {
        if let Some(range) = parse_range(params, kind.as_str(), next.range(kind))? {
            next.set_range(kind, range)
                .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        }
    }
    state.demo = next;
    info!(
        "event=demo_config_set query_ms={}-{} mutation_ms={}-{}",
        state.demo.query.min_ms,
        state.demo.query.max_ms,
        state.demo.mutation.min_ms,
        state.demo.mutation.max_ms
    );
    Ok(config_view(state))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, &req.params),
        "demo.reset" => handle_demo_reset(state, &req.params),
        "demo.clear" => handle_demo_clear(state, &req.params),
        "demo.config.get" => handle_demo_config_get(state, &req.params),
        "demo.config.set" => handle_demo_config_set(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ranges_keep_the_other_bound() {
        let current = DelayRange {
            min_ms: 150,
            max_ms: 450,
        };
        let params = json!({ "query": { "maxMs": 0 } });
        let parsed = parse_range(&params, "query", current).ok().flatten();
        assert_eq!(
            parsed,
            Some(DelayRange {
                min_ms: 150,
                max_ms: 0
            })
        );
        assert_eq!(parse_range(&params, "mutation", current).ok(), Some(None));
        assert!(parse_range(&json!({ "query": { "minMs": -1 } }), "query", current).is_err());
    }
}
