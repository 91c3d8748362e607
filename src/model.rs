//! Conversation records shared by the store, the log, and the controller.
//!
//! Persisted shapes use the camelCase keys the browser widget has always
//! written, so records from an existing install load unchanged.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Anonymous visitor identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorId(String);

impl VisitorId {
    /// Fresh random id in UUID v4 shape.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for VisitorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for VisitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Onboarding answers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl UserDetails {
    /// Email is the last collected field; once known, details are complete.
    #[must_use]
    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }
}

/// Ticket association. Both fields are absent until ticket creation succeeds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TicketInfo {
    pub id: Option<String>,
    pub organization_id: Option<String>,
}

impl TicketInfo {
    #[must_use]
    pub fn new(id: impl Into<String>, organization_id: Option<String>) -> Self {
        Self { id: Some(id.into()), organization_id }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn clear(&mut self) {
        self.id = None;
        self.organization_id = None;
    }
}

/// Who wrote a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "bot")]
    Agent,
}

/// One entry of the conversation log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    #[serde(with = "iso8601")]
    pub timestamp: OffsetDateTime,
    /// Backend message id, when the backend supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Branding and copy served by the widget config endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetConfig {
    pub name: Option<String>,
    pub opening_message: Option<String>,
    pub supporting_message: Option<String>,
    pub logo_url: Option<String>,
    pub brand_color: Option<BrandColor>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrandColor {
    pub primary_color: Option<String>,
    pub bubble_color: Option<String>,
}

pub const DEFAULT_WIDGET_NAME: &str = "Chatbot Name";
pub const DEFAULT_OPENING_MESSAGE: &str = "Hi there 👋 how can we help?";
pub const DEFAULT_SUPPORTING_MESSAGE: &str = "Our support team is online and ready to chat";
pub const DEFAULT_PRIMARY_COLOR: &str = "#4F46E5";
pub const DEFAULT_BUBBLE_COLOR: &str = "#FEF3C7";

impl WidgetConfig {
    #[must_use]
    pub fn display_name(&self) -> &str {
        non_blank(self.name.as_deref()).unwrap_or(DEFAULT_WIDGET_NAME)
    }

    #[must_use]
    pub fn opening_message(&self) -> &str {
        non_blank(self.opening_message.as_deref()).unwrap_or(DEFAULT_OPENING_MESSAGE)
    }

    #[must_use]
    pub fn supporting_message(&self) -> &str {
        non_blank(self.supporting_message.as_deref()).unwrap_or(DEFAULT_SUPPORTING_MESSAGE)
    }

    #[must_use]
    pub fn primary_color(&self) -> &str {
        let color = self.brand_color.as_ref().and_then(|c| c.primary_color.as_deref());
        non_blank(color).unwrap_or(DEFAULT_PRIMARY_COLOR)
    }

    #[must_use]
    pub fn bubble_color(&self) -> &str {
        let color = self.brand_color.as_ref().and_then(|c| c.bubble_color.as_deref());
        non_blank(color).unwrap_or(DEFAULT_BUBBLE_COLOR)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Render a timestamp the way it goes on the wire and into storage.
#[must_use]
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// RFC 3339 serde adapter for [`OffsetDateTime`].
pub(crate) mod iso8601 {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    pub fn serialize<S: Serializer>(ts: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = ts.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&raw)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        OffsetDateTime::parse(&raw, &Rfc3339).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
