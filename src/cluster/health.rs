//! Server health registry, kept in the agency under
//! `Supervision/Health/<serverId>`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "GOOD")]
    Good,
    #[serde(rename = "BAD")]
    Bad,
    #[serde(rename = "FAILED")]
    Failed,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Good => "GOOD",
            HealthStatus::Bad => "BAD",
            HealthStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOOD" => Some(HealthStatus::Good),
            "BAD" => Some(HealthStatus::Bad),
            "FAILED" => Some(HealthStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHealth {
    pub server: String,
    pub short_name: String,
    pub status: HealthStatus,
}

impl ServerHealth {
    pub fn to_value(&self) -> Value {
        json!({
            "Status": self.status.as_str(),
            "ShortName": self.short_name,
        })
    }

    pub fn from_value(server: &str, value: &Value) -> Option<Self> {
        Some(Self {
            server: server.to_string(),
            short_name: value.get("ShortName")?.as_str()?.to_string(),
            status: HealthStatus::parse(value.get("Status")?.as_str()?)?,
        })
    }
}
