//! Configuration management for the simulator.
//!
//! Values come from an optional TOML file and may be overridden by
//! `CREST_`-prefixed environment variables (`CREST_PSK_IDENTITY`, ...).

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CREST_";

/// Required length of a pre-shared key.
pub const PSK_KEY_LENGTH: usize = 16;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// JSON lines
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Platform endpoint, e.g. `coap://localhost:55554/`.
    pub uri: String,
    /// Device identity; also reported as the envelope `ID`.
    pub psk_identity: String,
    /// Key used to provision revision 0 when the key table is empty.
    pub psk_key: String,
    /// Secret authenticating key rotations.
    pub psk_secret: String,
    pub sleep_duration_ms: u64,
    /// When false the envelope is replaced by a fixed invalid payload.
    pub produce_valid_cbor: bool,
    pub database_path: PathBuf,
    pub request_timeout_ms: u64,
    pub log_format: LogFormat,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            uri: "coap://localhost:55554/".to_string(),
            psk_identity: "867787050253370".to_string(),
            psk_key: "1234567891234567".to_string(),
            psk_secret: "secret".to_string(),
            sleep_duration_ms: 60_000,
            produce_valid_cbor: true,
            database_path: PathBuf::from("crest-simulator.db"),
            request_timeout_ms: 10_000,
            log_format: LogFormat::Text,
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file. Missing fields fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load the file (if any), apply process environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CREST_*` overrides from the given variables. Unknown names are ignored.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(field) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field {
                "URI" => self.uri = value,
                "PSK_IDENTITY" => self.psk_identity = value,
                "PSK_KEY" => self.psk_key = value,
                "PSK_SECRET" => self.psk_secret = value,
                "SLEEP_DURATION_MS" => {
                    self.sleep_duration_ms = parse_number("sleep_duration_ms", &value)?
                }
                "PRODUCE_VALID_CBOR" => {
                    self.produce_valid_cbor =
                        value.parse().map_err(|_| CoreError::InvalidConfig {
                            field: "produce_valid_cbor",
                            reason: format!("expected true or false, got {value:?}"),
                        })?
                }
                "DATABASE_PATH" => self.database_path = PathBuf::from(value),
                "REQUEST_TIMEOUT_MS" => {
                    self.request_timeout_ms = parse_number("request_timeout_ms", &value)?
                }
                "LOG_FORMAT" => {
                    self.log_format = match value.to_ascii_lowercase().as_str() {
                        "text" => LogFormat::Text,
                        "json" => LogFormat::Json,
                        _ => {
                            return Err(CoreError::InvalidConfig {
                                field: "log_format",
                                reason: format!("expected text or json, got {value:?}"),
                            })
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.psk_identity.is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "psk_identity",
                reason: "must not be empty".to_string(),
            });
        }
        if self.psk_key.len() != PSK_KEY_LENGTH
            || !self.psk_key.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(CoreError::InvalidConfig {
                field: "psk_key",
                reason: format!("must be {PSK_KEY_LENGTH} alphanumeric characters"),
            });
        }
        if self.psk_secret.is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "psk_secret",
                reason: "must not be empty".to_string(),
            });
        }
        if self.sleep_duration_ms == 0 {
            return Err(CoreError::InvalidConfig {
                field: "sleep_duration_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig {
                field: "request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn sleep_duration(&self) -> Duration {
        Duration::from_millis(self.sleep_duration_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| CoreError::InvalidConfig {
        field,
        reason: format!("expected a non-negative integer, got {value:?}"),
    })
}
