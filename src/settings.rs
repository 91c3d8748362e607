//! Widget settings parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use time::UtcOffset;
use wire::Codec;

use crate::onboarding::{EmailShape, InputValidator, Permissive};
use crate::services::DEFAULT_TICKET_CATEGORY;
use crate::session::SessionOptions;
use crate::transport::AuthMode;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_SOCKETIO_NAMESPACE: &str = "/";
pub const DEFAULT_RECONNECT_MS: u64 = 3000;
pub const DEFAULT_TYPING_DELAY_MS: u64 = 600;
pub const DEFAULT_STORAGE_DIR: &str = ".chat-widget";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("missing required setting {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_token: String,
    pub api_base_url: String,
    pub ws_url: String,
    pub codec: Codec,
    pub auth_mode: AuthMode,
    pub reconnect_backoff: Duration,
    pub typing_delay: Duration,
    pub request_timeout: Option<Duration>,
    pub validate_email: bool,
    pub ticket_category: String,
    pub storage_dir: PathBuf,
    pub utc_offset: UtcOffset,
}

impl Settings {
    /// Build typed settings from environment variables.
    ///
    /// Required:
    /// - `CHAT_WIDGET_API_TOKEN`
    ///
    /// Optional:
    /// - `CHAT_WIDGET_API_BASE_URL`: default `http://127.0.0.1:3000`
    /// - `CHAT_WIDGET_WS_URL`: derived from the base URL, path `/ws`
    /// - `CHAT_WIDGET_CODEC`: `json` (default) or `socketio`
    /// - `CHAT_WIDGET_SOCKETIO_NAMESPACE`: default `/`
    /// - `CHAT_WIDGET_AUTH_MODE`: `connect` (default) or `first_message`
    /// - `CHAT_WIDGET_RECONNECT_MS`: default 3000
    /// - `CHAT_WIDGET_TYPING_DELAY_MS`: default 600
    /// - `CHAT_WIDGET_REQUEST_TIMEOUT_SECS`: unset means no timeout
    /// - `CHAT_WIDGET_VALIDATE_EMAIL`: default false
    /// - `CHAT_WIDGET_TICKET_CATEGORY`: default `support`
    /// - `CHAT_WIDGET_STORAGE_DIR`: default `.chat-widget`
    /// - `CHAT_WIDGET_UTC_OFFSET_MINUTES`: day boundary for date separators, default 0
    ///
    /// # Errors
    ///
    /// Returns an error when the token is missing or an enumerated value is
    /// not recognized.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Settings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_token = var("CHAT_WIDGET_API_TOKEN").ok_or(SettingsError::Missing { var: "CHAT_WIDGET_API_TOKEN" })?;
        let api_base_url = var("CHAT_WIDGET_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let ws_url = match var("CHAT_WIDGET_WS_URL") {
            Some(url) => url,
            None => derive_ws_url(&api_base_url)?,
        };

        let codec = match var("CHAT_WIDGET_CODEC") {
            None => Codec::Json,
            Some(raw) => raw
                .parse::<Codec>()
                .map_err(|message| SettingsError::Invalid { var: "CHAT_WIDGET_CODEC", message })?,
        };
        let codec = match codec {
            Codec::SocketIo { .. } => Codec::SocketIo {
                namespace: var("CHAT_WIDGET_SOCKETIO_NAMESPACE").unwrap_or_else(|| DEFAULT_SOCKETIO_NAMESPACE.into()),
            },
            Codec::Json => Codec::Json,
        };
        let auth_mode = match var("CHAT_WIDGET_AUTH_MODE") {
            None => AuthMode::default(),
            Some(raw) => raw
                .parse::<AuthMode>()
                .map_err(|message| SettingsError::Invalid { var: "CHAT_WIDGET_AUTH_MODE", message })?,
        };

        let reconnect_backoff =
            Duration::from_millis(env_parse(&var, "CHAT_WIDGET_RECONNECT_MS").unwrap_or(DEFAULT_RECONNECT_MS));
        let typing_delay =
            Duration::from_millis(env_parse(&var, "CHAT_WIDGET_TYPING_DELAY_MS").unwrap_or(DEFAULT_TYPING_DELAY_MS));
        let request_timeout = env_parse::<u64>(&var, "CHAT_WIDGET_REQUEST_TIMEOUT_SECS").map(Duration::from_secs);
        let validate_email = var("CHAT_WIDGET_VALIDATE_EMAIL").is_some_and(|raw| parse_bool(&raw));
        let ticket_category = var("CHAT_WIDGET_TICKET_CATEGORY").unwrap_or_else(|| DEFAULT_TICKET_CATEGORY.into());
        let storage_dir = PathBuf::from(var("CHAT_WIDGET_STORAGE_DIR").unwrap_or_else(|| DEFAULT_STORAGE_DIR.into()));

        let offset_minutes: i32 = env_parse(&var, "CHAT_WIDGET_UTC_OFFSET_MINUTES").unwrap_or(0);
        let utc_offset = UtcOffset::from_whole_seconds(offset_minutes.saturating_mul(60)).map_err(|e| {
            SettingsError::Invalid { var: "CHAT_WIDGET_UTC_OFFSET_MINUTES", message: e.to_string() }
        })?;

        Ok(Self {
            api_token,
            api_base_url,
            ws_url,
            codec,
            auth_mode,
            reconnect_backoff,
            typing_delay,
            request_timeout,
            validate_email,
            ticket_category,
            storage_dir,
            utc_offset,
        })
    }

    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            api_token: self.api_token.clone(),
            auth_mode: self.auth_mode,
            reconnect_backoff: self.reconnect_backoff,
            typing_delay: self.typing_delay,
            ticket_category: self.ticket_category.clone(),
            utc_offset: self.utc_offset,
        }
    }

    #[must_use]
    pub fn validator(&self) -> Box<dyn InputValidator> {
        if self.validate_email { Box::new(EmailShape) } else { Box::new(Permissive) }
    }
}

/// `http://host` becomes `ws://host/ws`, `https://host` becomes `wss://host/ws`.
fn derive_ws_url(base_url: &str) -> Result<String, SettingsError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}{DEFAULT_WS_PATH}"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}{DEFAULT_WS_PATH}"));
    }
    Err(SettingsError::Invalid {
        var: "CHAT_WIDGET_API_BASE_URL",
        message: format!("expected an http:// or https:// url, got '{base_url}'"),
    })
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
