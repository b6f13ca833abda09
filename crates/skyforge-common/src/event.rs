//! Webhook progress events.
//!
//! The wire shape is fixed for compatibility with existing receivers:
//!
//! ```json
//! {
//!   "vm_name": "web01",
//!   "status": "provisioning",
//!   "resource_group": "rg-web",
//!   "location": "uksouth",
//!   "details": {
//!     "step": "creating_vnet",
//!     "message": "Creating virtual network web01-vnet",
//!     "timestamp": "2025-01-01T00:00:00Z"
//!   }
//! }
//! ```
//!
//! The first key is `<target>_name` and varies by blueprint, so
//! [`StatusEvent`] serializes itself by hand.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::status::EventStatus;

/// The `details` object of a webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    /// Machine-readable step id, e.g. `creating_vnet`.
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Step-specific fields (`public_ip`, `url`, `records`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One progress event sent to the caller's webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    /// JSON key carrying the target name, e.g. `vm_name`.
    pub target_key: String,
    pub target_name: String,
    pub status: EventStatus,
    pub resource_group: String,
    pub location: String,
    pub details: StatusDetails,
}

impl StatusEvent {
    pub fn new(
        target_key: impl Into<String>,
        target_name: impl Into<String>,
        status: EventStatus,
        resource_group: impl Into<String>,
        location: impl Into<String>,
        step: impl Into<String>,
    ) -> Self {
        Self {
            target_key: target_key.into(),
            target_name: target_name.into(),
            status,
            resource_group: resource_group.into(),
            location: location.into(),
            details: StatusDetails {
                step: step.into(),
                message: None,
                error: None,
                timestamp: Utc::now(),
                extra: serde_json::Map::new(),
            },
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.details.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.details.error = Some(error.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn step(&self) -> &str {
        &self.details.step
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serializing into a Value cannot fail: every key is a string.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for StatusEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry(&self.target_key, &self.target_name)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("resource_group", &self.resource_group)?;
        map.serialize_entry("location", &self.location)?;
        map.serialize_entry("details", &self.details)?;
        map.end()
    }
}
