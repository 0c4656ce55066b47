// crates/core/src/notice/message.rs
//! The envelope that travels through the notification bus.

use serde::{Deserialize, Serialize};

use super::progress::{Progress, ProgressInfo};
use crate::error::NoticeError;

/// How the browser renders a message. The bus never looks at it; delivery
/// is gated on the message type only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Update an inline page element identified by [`Message::id`].
    #[default]
    Element,
    /// Toast notification.
    Notify,
    Modal,
}

impl DisplayMode {
    /// Parse the `noticeMode`/`mode` query value. Unknown values fall back
    /// to [`DisplayMode::Element`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "notify" => Self::Notify,
            "modal" => Self::Modal,
            _ => Self::Element,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Element => "element",
            Self::Notify => "notify",
            Self::Modal => "modal",
        }
    }
}

/// One notification. Fields are fixed at send time; the progress is a
/// snapshot, not a live reference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Target client. Empty means every client of the user.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    /// Display element id on the client page.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Topic the recipient must have opened.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    /// `> 0` success, `<= 0` failure. The meaning of each value is up to the caller.
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub mode: DisplayMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressInfo>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    pub fn with_content(mut self, content: impl Into<serde_json::Value>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attach a snapshot of `progress` as it is right now.
    pub fn with_progress(mut self, progress: &Progress) -> Self {
        self.progress = Some(progress.snapshot());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status > 0
    }

    pub fn to_json(&self) -> Result<String, NoticeError> {
        serde_json::to_string(self).map_err(|e| NoticeError::Encode {
            format: "json",
            message: e.to_string(),
        })
    }

    /// Sequences become repeated elements, so an array directly inside an
    /// array has no XML form. Such content is rejected rather than flattened.
    pub fn to_xml(&self) -> Result<String, NoticeError> {
        if has_nested_array(&self.content) {
            return Err(NoticeError::Encode {
                format: "xml",
                message: "content holds an array inside an array".to_string(),
            });
        }
        quick_xml::se::to_string(self).map_err(|e| NoticeError::Encode {
            format: "xml",
            message: e.to_string(),
        })
    }
}

fn has_nested_array(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .any(|item| item.is_array() || has_nested_array(item)),
        serde_json::Value::Object(fields) => fields.values().any(has_nested_array),
        _ => false,
    }
}
