//! Server configuration from environment variables.
//!
//! The variable names are a compatibility contract with existing
//! deployments of the simulator (`BESIM_DATABASE`, `FLASK_HOST`,
//! `FLASK_PORT`, `FLASK_DEBUG`, `LATITUDE`, `LONGITUDE`), plus
//! `BESIM_UDP_PORT` for the protocol listener.  Everything has a default;
//! values that fail to parse are a startup error.

use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_UDP_PORT: u16 = 6199;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path.
    pub database: PathBuf,
    pub http_host: String,
    pub http_port: u16,
    pub debug: bool,
    pub udp_port: u16,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration from an arbitrary lookup (for tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        Ok(Config {
            database: PathBuf::from(lookup("BESIM_DATABASE").unwrap_or_else(|| "besim.db".to_owned())),
            http_host: lookup("FLASK_HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            http_port: parse_var("FLASK_PORT", lookup("FLASK_PORT"), 80)?,
            debug: lookup("FLASK_DEBUG").is_some_and(|v| truthy(&v)),
            udp_port: parse_var("BESIM_UDP_PORT", lookup("BESIM_UDP_PORT"), DEFAULT_UDP_PORT)?,
            latitude: parse_var("LATITUDE", lookup("LATITUDE"), 0.0)?,
            longitude: parse_var("LONGITUDE", lookup("LONGITUDE"), 0.0)?,
        })
    }
}

fn truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0" | "false" | "False")
}

fn parse_var<T: std::str::FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
