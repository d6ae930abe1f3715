use crate::channel::{socket::socket_endpoint, ChannelError};
use reqwest::Url;
use std::env;
use thiserror::Error;

pub const BACKEND_URL_VAR: &str = "POLL_BACKEND_URL";
pub const SOCKET_URL_VAR: &str = "POLL_SOCKET_URL";
pub const APP_ORIGIN_VAR: &str = "POLL_APP_ORIGIN";
pub const STATE_DB_VAR: &str = "POLL_STATE_DB";

const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
const DEFAULT_STATE_DB: &str = "sqlite:poll_state.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value} is not a valid URL: {reason}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var}={value} must be an http or https URL")]
    UnsupportedScheme { var: &'static str, value: String },

    #[error(transparent)]
    Socket(#[from] ChannelError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend_url: Url,
    pub socket_url: Url,
    /// Origin for share links, also the scope of the stored vote state.
    pub app_origin: String,
    pub state_db_url: String,
}

impl Config {
    /// Read the environment (after `.env` has been loaded), with an optional
    /// backend URL taking precedence over `POLL_BACKEND_URL`.
    pub fn from_env(backend_override: Option<&str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match (key, backend_override) {
            (BACKEND_URL_VAR, Some(url)) => Some(url.to_string()),
            _ => env::var(key).ok(),
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // blank values count as unset
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend_raw = get(BACKEND_URL_VAR).unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let backend_url = http_url(BACKEND_URL_VAR, &backend_raw)?;

        let socket_url = match get(SOCKET_URL_VAR) {
            Some(raw) => socket_endpoint(&parse_url(SOCKET_URL_VAR, &raw)?)?,
            None => socket_endpoint(&backend_url)?,
        };

        let app_origin = match get(APP_ORIGIN_VAR) {
            Some(raw) => http_url(APP_ORIGIN_VAR, &raw)?.origin().ascii_serialization(),
            None => backend_url.origin().ascii_serialization(),
        };

        Ok(Self {
            backend_url,
            socket_url,
            app_origin,
            state_db_url: get(STATE_DB_VAR).unwrap_or_else(|| DEFAULT_STATE_DB.to_string()),
        })
    }
}

fn parse_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn http_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = parse_url(var, value)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme {
            var,
            value: value.to_string(),
        }),
    }
}
