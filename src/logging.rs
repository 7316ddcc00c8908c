//! Logging bootstrap.
//!
//! stdout carries the response channel, so every log line goes to stderr.
//! Messages use `event=<name> key=value` pairs.

use flexi_logger::{Logger, LoggerHandle};
use log::info;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<(String, LoggerHandle)> = OnceCell::new();

/// Starts the stderr logger once per process.
///
/// Re-initializing with the same level is a no-op; a different level is
/// rejected. Never panics.
pub fn init_logging(level: &str) -> Result<(), String> {
    let level = normalize_level(level)?;

    if let Some((active, _)) = LOGGER.get() {
        if active != level {
            return Err(format!(
                "logging already initialized with level `{active}`; refusing to switch to `{level}`"
            ));
        }
        return Ok(());
    }

    LOGGER.get_or_try_init(|| -> Result<(String, LoggerHandle), String> {
        let handle = Logger::try_with_str(level)
            .map_err(|e| format!("invalid log level `{level}`: {e}"))?
            .log_to_stderr()
            .format(flexi_logger::detailed_format)
            .start()
            .map_err(|e| format!("failed to start logger: {e}"))?;
        info!(
            "event=app_start module=core status=ok platform={} version={}",
            std::env::consts::OS,
            env!("CARGO_PKG_VERSION")
        );
        Ok((level.to_string(), handle))
    })?;
    Ok(())
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => Ok("off"),
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected off|trace|debug|info|warn|error"
        )),
    }
}
