//! Typed configuration.
//!
//! Environment (`Config`) carries connection details and secrets; loads once
//! at startup and fails fast if required vars are missing. Tuning knobs live
//! in a TOML file (`Settings`).

pub mod settings;

pub use settings::{
    DelayWindow, ExportSettings, ProxySettings, RandomField, Settings, StoreSettings,
    TargetSettings, TimingSettings,
};

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
