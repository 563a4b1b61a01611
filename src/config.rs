//! Service configuration.
//!
//! Settings are read from `config.toml` (or the file given on the command line), then from
//! `ATTENDANCE__<SECTION>__<KEY>` environment variables. `DATABASE_URL`, typically provided
//! through a `.env` file, takes precedence over `database.url`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub timetable: TimetableSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimetableSettings {
    pub base_url: String,
    pub sheet_id: String,
    pub timeout_secs: u64,
}

impl TimetableSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSettings {
    pub path: String,
}

impl Settings {
    /// Loads settings from `path` (default `config`, any extension `config` understands).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("config").required(false),
        };

        let settings = Config::builder()
            .set_default("server.bind", "127.0.0.1:3000")?
            .set_default("database.url", "attendance.sqlite3")?
            .set_default("database.pool_size", 8)?
            .set_default("timetable.base_url", "https://docs.google.com")?
            .set_default("timetable.sheet_id", "")?
            .set_default("timetable.timeout_secs", 10)?
            .set_default("catalog.path", "catalog.csv")?
            .add_source(file)
            .add_source(Environment::with_prefix("ATTENDANCE").separator("__"))
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .build()
            .context("failed to read configuration")?;

        settings
            .try_deserialize()
            .context("invalid configuration")
    }
}
