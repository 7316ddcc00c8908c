//! Simulated network behavior around every data call: a randomized delay
//! before dispatch and one structured log line after it.

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{validate_delay_range, DemoConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Query,
    Mutation,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Query => "query",
            CallKind::Mutation => "mutation",
        }
    }
}

const QUERY_SUFFIXES: [&str; 5] = [".list", ".get", ".summary", ".stats", ".classroomSummary"];

/// `None` for methods that bypass the simulation entirely.
pub fn classify(method: &str) -> Option<CallKind> {
    if matches!(method, "health" | "demo.config.get") {
        return None;
    }
    if QUERY_SUFFIXES.iter().any(|s| method.ends_with(s)) {
        Some(CallKind::Query)
    } else {
        Some(CallKind::Mutation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    /// Uniform in `[min_ms, max_ms]`; 0 when the range is disabled.
    pub fn pick(self) -> u64 {
        if self.max_ms == 0 {
            return 0;
        }
        if self.min_ms >= self.max_ms {
            return self.max_ms;
        }
        let span = u128::from(self.max_ms - self.min_ms + 1);
        self.min_ms + (Uuid::new_v4().as_u128() % span) as u64
    }
}

/// Runtime copy of the demo settings; delay ranges can be changed while
/// the process runs.
#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub query: DelayRange,
    pub mutation: DelayRange,
    pub seed: bool,
}

impl From<&DemoConfig> for DemoSettings {
    fn from(cfg: &DemoConfig) -> Self {
        Self {
            query: DelayRange {
                min_ms: cfg.query_min_ms,
                max_ms: cfg.query_max_ms,
            },
            mutation: DelayRange {
                min_ms: cfg.mutation_min_ms,
                max_ms: cfg.mutation_max_ms,
            },
            seed: cfg.seed,
        }
    }
}

impl DemoSettings {
    pub fn range(&self, kind: CallKind) -> DelayRange {
        match kind {
            CallKind::Query => self.query,
            CallKind::Mutation => self.mutation,
        }
    }

    pub fn set_range(&mut self, kind: CallKind, range: DelayRange) -> anyhow::Result<()> {
        validate_delay_range(kind.as_str(), range.min_ms, range.max_ms)?;
        match kind {
            CallKind::Query => self.query = range,
            CallKind::Mutation => self.mutation = range,
        }
        Ok(())
    }

    /// Blocks for the simulated latency and returns it in milliseconds.
    pub fn simulate(&self, kind: CallKind) -> u64 {
        let ms = self.range(kind).pick();
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
        ms
    }
}

pub fn log_call(
    kind: CallKind,
    method: &str,
    params: &serde_json::Value,
    response: &serde_json::Value,
    delay_ms: u64,
    elapsed: Duration,
) {
    if kind == CallKind::Mutation {
        let keys: Vec<&str> = params
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        debug!(
            "event=demo_call_params method={} keys={}",
            method,
            keys.join(",")
        );
    }

    let ok = response.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
    if ok {
        info!(
            "event=demo_call kind={} method={} status=ok delay_ms={} duration_ms={}",
            kind.as_str(),
            method,
            delay_ms,
            elapsed.as_millis()
        );
    } else {
        let code = response
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        warn!(
            "event=demo_call kind={} method={} status=error delay_ms={} duration_ms={} error_code={}",
            kind.as_str(),
            method,
            delay_ms,
            elapsed.as_millis(),
            code
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_splits_queries_and_mutations() {
        assert_eq!(classify("students.list"), Some(CallKind::Query));
        assert_eq!(classify("grades.classroomSummary"), Some(CallKind::Query));
        assert_eq!(classify("dashboard.stats"), Some(CallKind::Query));
        assert_eq!(classify("students.create"), Some(CallKind::Mutation));
        assert_eq!(classify("demo.reset"), Some(CallKind::Mutation));
        assert_eq!(classify("health"), None);
        assert_eq!(classify("demo.config.get"), None);
    }

    #[test]
    fn pick_stays_inside_range() {
        let range = DelayRange {
            min_ms: 10,
            max_ms: 20,
        };
        for _ in 0..200 {
            let ms = range.pick();
            assert!((10..=20).contains(&ms), "{ms} outside range");
        }
    }

    #[test]
    fn zero_max_disables_delay() {
        let range = DelayRange {
            min_ms: 300,
            max_ms: 0,
        };
        assert_eq!(range.pick(), 0);
    }

    #[test]
    fn set_range_rejects_inverted_bounds() {
        let mut settings = DemoSettings::from(&DemoConfig::default());
        let err = settings
            .set_range(
                CallKind::Query,
                DelayRange {
                    min_ms: 50,
                    max_ms: 10,
                },
            )
            .expect_err("inverted");
        assert!(err.to_string().contains("query"));
        assert_eq!(settings.query.max_ms, DemoConfig::default().query_max_ms);
    }
}
