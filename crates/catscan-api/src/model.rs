//! Entities enumerated from the remote API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute values keyed by name. Always key-sorted.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A workspace in an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace ID (`ws-...`), the identity
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Owning organization
    pub organization: String,
    /// ID of the current state version, if the workspace has state
    pub last_state_version_id: Option<String>,
}

/// Current state marker for a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
    pub workspace_id: String,
    pub version_id: String,
    /// Monotonic per workspace; unchanged serial means unchanged resources
    pub serial: u64,
    pub created_at: DateTime<Utc>,
}

/// Identity of a resource across snapshots
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub workspace_id: String,
    pub address: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workspace_id, self.address)
    }
}

/// One managed infrastructure object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub workspace_id: String,
    /// Unique within the workspace
    pub address: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub provider: String,
    pub module_path: Option<String>,
    pub attributes: Attributes,
}

impl Resource {
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId {
            workspace_id: self.workspace_id.clone(),
            address: self.address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_ordering_is_workspace_then_address() {
        let a = ResourceId {
            workspace_id: "ws-a".into(),
            address: "z".into(),
        };
        let b = ResourceId {
            workspace_id: "ws-b".into(),
            address: "a".into(),
        };
        assert!(a < b);
        assert_eq!(a.to_string(), "ws-a:z");
    }

    #[test]
    fn test_resource_serializes_type_field() {
        let resource = Resource {
            workspace_id: "ws-1".into(),
            address: "aws_instance.web".into(),
            resource_type: "aws_instance".into(),
            provider: "hashicorp/aws".into(),
            module_path: None,
            attributes: Attributes::new(),
        };
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["type"], "aws_instance");
    }
}
