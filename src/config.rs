//! Startup configuration.
//!
//! Loaded from (later sources override earlier):
//! 1. Default values
//! 2. TOML file at `$NIDO_CONFIG`, or `nidod.toml` in the working directory
//! 3. Environment variables prefixed with `NIDO_`, using `__` for nesting
//!    (`NIDO_DEMO__QUERY_MAX_MS=0`)

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_PATH_ENV: &str = "NIDO_CONFIG";
const CONFIG_FILE_NAME: &str = "nidod.toml";

/// Upper bound for any simulated delay.
pub const MAX_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub demo: DemoConfig,
    pub payroll: PayrollConfig,
    pub log: LogConfig,
}

/// Simulated network latency and seed behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub query_min_ms: u64,
    pub query_max_ms: u64,
    pub mutation_min_ms: u64,
    pub mutation_max_ms: u64,
    /// Load the sample dataset at startup.
    pub seed: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            query_min_ms: 150,
            query_max_ms: 450,
            mutation_min_ms: 300,
            mutation_max_ms: 800,
            seed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayrollConfig {
    /// Fraction of the base salary withheld on generated payroll drafts.
    pub pension_rate: f64,
}

impl Default for PayrollConfig {
    fn default() -> Self {
        Self { pension_rate: 0.13 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        Self::load_from(path)
    }

    pub fn load_from(path: PathBuf) -> anyhow::Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("NIDO_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_delay_range("query", self.demo.query_min_ms, self.demo.query_max_ms)?;
        validate_delay_range(
            "mutation",
            self.demo.mutation_min_ms,
            self.demo.mutation_max_ms,
        )?;
        if !(0.0..1.0).contains(&self.payroll.pension_rate) {
            anyhow::bail!(
                "payroll.pension_rate must be in [0, 1), got {}",
                self.payroll.pension_rate
            );
        }
        if self.log.level.trim().is_empty() {
            anyhow::bail!("log.level must not be empty");
        }
        Ok(())
    }
}

/// A range with `max_ms == 0` disables the delay, whatever `min_ms` says.
pub fn validate_delay_range(kind: &str, min_ms: u64, max_ms: u64) -> anyhow::Result<()> {
    if max_ms > MAX_DELAY_MS {
        anyhow::bail!("{kind} delay max_ms must be <= {MAX_DELAY_MS}, got {max_ms}");
    }
    if max_ms > 0 && min_ms > max_ms {
        anyhow::bail!("{kind} delay min_ms ({min_ms}) cannot exceed max_ms ({max_ms})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("defaults validate");
    }

    #[test]
    fn zero_max_disables_range_check() {
        validate_delay_range("query", 500, 0).expect("disabled range is valid");
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = validate_delay_range("mutation", 900, 100).expect_err("inverted range");
        assert!(err.to_string().contains("cannot exceed"));
    }

    #[test]
    fn oversized_delay_is_rejected() {
        assert!(validate_delay_range("query", 0, MAX_DELAY_MS + 1).is_err());
    }

    #[test]
    fn pension_rate_out_of_range_is_rejected() {
        let mut cfg = Config::default();
        cfg.payroll.pension_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("nidod-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("nidod.toml");
        std::fs::write(
            &path,
            "[demo]\nquery_max_ms = 0\nseed = false\n\n[payroll]\npension_rate = 0.1\n",
        )
        .expect("write config");

        let cfg = Config::load_from(path).expect("load config");
        assert_eq!(cfg.demo.query_max_ms, 0);
        assert!(!cfg.demo.seed);
        assert_eq!(cfg.demo.mutation_max_ms, DemoConfig::default().mutation_max_ms);
        assert!((cfg.payroll.pension_rate - 0.1).abs() < f64::EPSILON);
    }
}
