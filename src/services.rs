//! Backend HTTP contracts: widget configuration and ticket creation.
//!
//! Both services sit behind async traits so the session runtime can be driven
//! by in-process fakes. [`HttpBackend`] implements both over `reqwest`,
//! authenticating every request with the `apiKey` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::model::{TicketInfo, WidgetConfig};

pub const CONFIG_PATH: &str = "/integrations/chat-widgets";
pub const TICKETS_PATH: &str = "/integrations/tickets";
pub const DEFAULT_TICKET_CATEGORY: &str = "support";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status { endpoint: &'static str, status: u16, body: String },
    #[error("ticket response has no ticket id")]
    MissingTicketId,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Body of `POST /integrations/tickets`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub user_id: String,
    pub category: String,
    pub attachments: Vec<String>,
    pub description: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_guest: bool,
}

#[async_trait]
pub trait TicketService: Send + Sync {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<TicketInfo, ServiceError>;
}

#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn fetch_config(&self) -> Result<WidgetConfig, ServiceError>;
}

#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns an error when the token is not a valid header value or the
    /// client cannot be built.
    pub fn new(base_url: &str, api_token: &str, timeout: Option<Duration>) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("apikey"), HeaderValue::from_str(api_token)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self { client: builder.build()?, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ConfigService for HttpBackend {
    async fn fetch_config(&self) -> Result<WidgetConfig, ServiceError> {
        let response = self.client.get(self.url(CONFIG_PATH)).send().await?;
        let value = checked_json(CONFIG_PATH, response).await?;
        let config = parse_config_response(value)?;
        debug!(name = config.display_name(), "services: widget config loaded");
        Ok(config)
    }
}

#[async_trait]
impl TicketService for HttpBackend {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<TicketInfo, ServiceError> {
        let response = self.client.post(self.url(TICKETS_PATH)).json(request).send().await?;
        let value = checked_json(TICKETS_PATH, response).await?;
        let info = parse_ticket_response(&value)?;
        info!(ticket_id = info.id.as_deref().unwrap_or("-"), "services: ticket created");
        Ok(info)
    }
}

async fn checked_json(endpoint: &'static str, response: reqwest::Response) -> Result<Value, ServiceError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ServiceError::Status { endpoint, status: status.as_u16(), body });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

/// Read `{ data: { id, organizationId } }`. Numeric ids are accepted.
///
/// # Errors
///
/// Returns [`ServiceError::MissingTicketId`] when no usable id is present.
pub fn parse_ticket_response(value: &Value) -> Result<TicketInfo, ServiceError> {
    let data = value.get("data").unwrap_or(value);
    let id = id_string(data.get("id")).ok_or(ServiceError::MissingTicketId)?;
    let organization_id = id_string(data.get("organizationId").or_else(|| data.get("organization_id")));
    Ok(TicketInfo { id: Some(id), organization_id })
}

/// The config document may arrive bare or wrapped in `data`.
///
/// # Errors
///
/// Returns an error when the document does not match the config shape.
pub fn parse_config_response(value: Value) -> Result<WidgetConfig, ServiceError> {
    let value = match value {
        Value::Null => return Ok(WidgetConfig::default()),
        Value::Object(mut map) if !map.contains_key("name") && map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "services_test.rs"]
mod tests;
