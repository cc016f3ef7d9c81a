//! Configuration loading from disk, environment and command line.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub backend: Option<String>,
    pub encrypted: Option<bool>,
}

/// Parse a configuration file without validating it.
pub fn read_config_file(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Layer environment variables over `config`.
///
/// `lookup` is `std::env::var` in production; tests pass a map.
pub fn apply_env<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(backend) = lookup("BACKEND_ENDPOINT").filter(|v| !v.is_empty()) {
        config.backend.address = backend;
    }
    if let Some(raw) = lookup("BACKEND_HTTPS") {
        config.backend.encrypted = match parse_bool(&raw) {
            Some(value) => value,
            None => {
                tracing::warn!(value = %raw, "BACKEND_HTTPS is not a boolean, treating as false");
                false
            }
        };
    }
    if let Some(listen) = lookup("LISTEN").filter(|v| !v.is_empty()) {
        config.listener.bind_address = normalize_bind_address(&listen);
    }
    if let Some(prefix) = lookup("ROUTE_PREFIX").filter(|v| !v.is_empty()) {
        config.tunnel.route_prefix = prefix;
    }
}

/// Apply command line overrides.
pub fn apply_overrides(config: &mut ProxyConfig, overrides: &ConfigOverrides) {
    if let Some(listen) = &overrides.listen {
        config.listener.bind_address = normalize_bind_address(listen);
    }
    if let Some(backend) = &overrides.backend {
        config.backend.address = backend.clone();
    }
    if let Some(encrypted) = overrides.encrypted {
        config.backend.encrypted = encrypted;
    }
}

/// Load, layer and validate the configuration.
///
/// Order: defaults, then the TOML file, then the process environment,
/// then `overrides`.
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => ProxyConfig::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok());
    apply_overrides(&mut config, overrides);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Boolean spellings accepted for `BACKEND_HTTPS`.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// `:8080` binds every interface.
fn normalize_bind_address(raw: &str) -> String {
    match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => raw.to_string(),
    }
}
