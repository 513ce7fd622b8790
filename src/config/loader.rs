use figment::{
    error::Kind,
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::schema::ProxyConfig;
use crate::error::{ConfigError, Result};

const ENV_PREFIX: &str = "AIRPRINT_PROXY_";

/// Values supplied on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<PathBuf>,
}

/// Load configuration from the default file locations, the environment and
/// the command line, in increasing order of precedence.
pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<ProxyConfig> {
    let figment = match path {
        Some(path) => Figment::new().merge(file_provider(path)?),
        None => Figment::new()
            .merge(Toml::file("airprint-proxy.toml"))
            .merge(Json::file("airprint-proxy.json"))
            .merge(Yaml::file("airprint-proxy.yaml"))
            .merge(Yaml::file("airprint-proxy.yml")),
    };

    let config: ProxyConfig = figment
        .merge(Env::prefixed(ENV_PREFIX))
        .merge(Serialized::defaults(overrides))
        .extract()
        .map_err(config_error)?;

    validate(&config)?;
    Ok(config)
}

fn file_provider(path: &Path) -> Result<Figment> {
    if !path.exists() {
        return Err(ConfigError::Parse(format!(
            "Configuration file not found: {}",
            path.display()
        ))
        .into());
    }

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::from(Toml::file(path)),
        Some("json") => Figment::from(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::from(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };
    Ok(figment)
}

fn config_error(err: figment::Error) -> ConfigError {
    match &err.kind {
        Kind::MissingField(field) => ConfigError::MissingField(field.to_string()),
        _ => ConfigError::Parse(err.to_string()),
    }
}

pub fn validate(config: &ProxyConfig) -> Result<()> {
    config.backend()?;
    config.listen_addr()?;

    if config.transcript_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("Transcript directory must not be empty".into()).into());
    }

    if config.connect_timeout_ms == 0 {
        return Err(
            ConfigError::Validation("Connect timeout must be greater than 0".into()).into(),
        );
    }

    if config.request_timeout_ms == Some(0) {
        return Err(
            ConfigError::Validation("Request timeout must be greater than 0 when set".into())
                .into(),
        );
    }

    Ok(())
}
