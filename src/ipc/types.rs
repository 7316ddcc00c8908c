use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::demo::DemoSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub db: Connection,
    pub config: Config,
    pub demo: DemoSettings,
    /// True while the store holds the sample dataset loaded by `seed`.
    pub seeded: bool,
}
