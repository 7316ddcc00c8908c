use std::time::Instant;

use super::handlers;
use super::types::{AppState, Request};
use crate::demo;
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::students::try_handle,
    handlers::parents::try_handle,
    handlers::workers::try_handle,
    handlers::classrooms::try_handle,
    handlers::enrollments::try_handle,
    handlers::grades::try_handle,
    handlers::attendance::try_handle,
    handlers::payments::try_handle,
    handlers::payroll::try_handle,
    handlers::schedules::try_handle,
    handlers::tasks::try_handle,
    handlers::evaluations::try_handle,
    handlers::annotations::try_handle,
    handlers::plans::try_handle,
    handlers::reports::try_handle,
    handlers::dashboard::try_handle,
];

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    for try_handle in FAMILIES {
        if let Some(resp) = try_handle(state, req) {
            return resp;
        }
    }
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

/// Runs one request through the demo layer: simulated latency, dispatch,
/// then a `demo_call` log line.
pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let Some(kind) = demo::classify(&req.method) else {
        return dispatch(state, &req);
    };
    let delay_ms = state.demo.simulate(kind);
    let started = Instant::now();
    let resp = dispatch(state, &req);
    demo::log_call(kind, &req.method, &req.params, &resp, delay_ms, started.elapsed());
    resp
}
