use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{Result, ServiceError};

pub const DEFAULT_DATA_PATH: &str = "clientes_limpio.csv";
pub const DEFAULT_MODEL_PATH: &str = "churn_model.json";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "https://dracostack.com",
    "http://dracostack.com",
    "https://www.dracostack.com",
    "http://www.dracostack.com",
];

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Customer CSV
    pub data_path: PathBuf,
    /// Serialized classifier
    pub model_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// CORS origins allowed to call the API
    pub allowed_origins: Vec<String>,
    /// Re-read the CSV on every request instead of once at startup
    pub reload_data: bool,
}

impl Config {
    /// Loads configuration from the environment, reading `.env` first.
    ///
    /// Optional environment variables:
    /// - `CHURN_DATA_PATH` (default: `clientes_limpio.csv`)
    /// - `CHURN_MODEL_PATH` (default: `churn_model.json`)
    /// - `CHURN_BIND_ADDR` (default: `0.0.0.0:8000`)
    /// - `CHURN_ALLOWED_ORIGINS`: comma-separated origins
    /// - `CHURN_RELOAD_DATA`: `true`/`false` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_path = lookup("CHURN_DATA_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_DATA_PATH), PathBuf::from);
        let model_path = lookup("CHURN_MODEL_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH), PathBuf::from);

        let bind_addr = parse_bind_addr(
            &lookup("CHURN_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let allowed_origins = match lookup("CHURN_ALLOWED_ORIGINS") {
            Some(raw) => parse_origins(&raw)?,
            None => DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect(),
        };

        let reload_data = match lookup("CHURN_RELOAD_DATA") {
            Some(raw) => parse_bool("CHURN_RELOAD_DATA", &raw)?,
            None => false,
        };

        Ok(Self {
            data_path,
            model_path,
            bind_addr,
            allowed_origins,
            reload_data,
        })
    }
}

pub fn parse_bind_addr(raw: &str) -> Result<SocketAddr> {
    raw.trim()
        .parse()
        .map_err(|err| ServiceError::Config(format!("invalid bind address '{raw}': {err}")))
}

/// Credentialed CORS needs explicit origins, so `*` is rejected.
fn parse_origins(raw: &str) -> Result<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect();

    if origins.iter().any(|origin| origin == "*") {
        return Err(ServiceError::Config(
            "wildcard origin is not allowed with credentials".to_string(),
        ));
    }
    Ok(origins)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ServiceError::Config(format!(
            "{key} must be true or false, got '{raw}'"
        ))),
    }
}
