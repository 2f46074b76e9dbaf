//! Domain types for cloud instances.
//!
//! Instances are immutable snapshots of provider state. Nothing in the
//! fleet mutates a snapshot in place; a fresh one is obtained by querying
//! the provider again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier assigned by the cloud provider.
pub type InstanceId = String;

/// Tag key holding the instance name (`<prefix>-<seq>`).
pub const NAME_TAG: &str = "Name";

/// Tag key holding the instance role.
pub const ROLE_TAG: &str = "Role";

// ── Lifecycle ──────────────────────────────────────────────────────

/// Provider-reported lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
        }
    }

    /// Parse a provider state name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InstanceState::Pending),
            "running" => Some(InstanceState::Running),
            "stopping" => Some(InstanceState::Stopping),
            "stopped" => Some(InstanceState::Stopped),
            "shutting-down" => Some(InstanceState::ShuttingDown),
            "terminated" => Some(InstanceState::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Roles ──────────────────────────────────────────────────────────

/// Cluster role persisted as the `Role` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Hosts the shared-storage export every other member mounts.
    Head,
    /// Mounts the head's export.
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Head => "head",
            Role::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "head" => Some(Role::Head),
            "client" => Some(Role::Client),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags applied to a newly launched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceTags {
    pub name: String,
    pub role: Role,
}

impl InstanceTags {
    /// Key/value pairs in the order they are written to the provider.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (NAME_TAG, self.name.clone()),
            (ROLE_TAG, self.role.as_str().to_string()),
        ]
    }
}

// ── Instance ───────────────────────────────────────────────────────

/// Snapshot of one cloud instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudInstance {
    pub id: InstanceId,
    /// Value of the `Name` tag, if any.
    pub name: Option<String>,
    /// Value of the `Role` tag, if any.
    pub role: Option<Role>,
    pub state: InstanceState,
    /// Machine type the instance will boot with (e.g. `m1.xlarge`).
    pub instance_type: String,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
}

impl CloudInstance {
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn is_head(&self) -> bool {
        self.role == Some(Role::Head)
    }

    /// Whether the name tag follows the `<prefix>-` naming convention.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.name
            .as_deref()
            .and_then(|n| n.strip_prefix(prefix))
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Sequence number encoded in a `<prefix>-<seq>` name.
    pub fn sequence(&self, prefix: &str) -> Option<u32> {
        self.name
            .as_deref()?
            .strip_prefix(prefix)?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    /// Address used to reach the instance from the operator's machine.
    pub fn public_host(&self) -> Option<&str> {
        self.public_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .or_else(|| self.private_host())
    }

    /// Address used by cluster members to reach each other.
    pub fn private_host(&self) -> Option<&str> {
        self.private_address.as_deref().filter(|a| !a.is_empty())
    }

    /// Human-readable label for log lines (name tag, else id).
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Format the name for sequence number `seq`, e.g. `hstore-07`.
pub fn instance_name(prefix: &str, seq: u32) -> String {
    format!("{prefix}-{seq:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> CloudInstance {
        CloudInstance {
            id: "i-1".to_string(),
            name: Some(name.to_string()),
            role: None,
            state: InstanceState::Stopped,
            instance_type: "m1.xlarge".to_string(),
            public_address: None,
            private_address: Some("10.0.0.1".to_string()),
        }
    }

    #[test]
    fn state_names_round_trip() {
        for state in [
            InstanceState::Pending,
            InstanceState::Running,
            InstanceState::Stopping,
            InstanceState::Stopped,
            InstanceState::ShuttingDown,
            InstanceState::Terminated,
        ] {
            assert_eq!(InstanceState::parse(state.as_str()), Some(state));
        }
        assert_eq!(InstanceState::parse("rebooting"), None);
    }

    #[test]
    fn prefix_requires_dash_separator() {
        assert!(named("hstore-03").matches_prefix("hstore"));
        assert!(!named("hstorex-03").matches_prefix("hstore"));
        assert!(!named("other-03").matches_prefix("hstore"));
    }

    #[test]
    fn sequence_parses_padded_suffix() {
        assert_eq!(named("hstore-07").sequence("hstore"), Some(7));
        assert_eq!(named("hstore-112").sequence("hstore"), Some(112));
        assert_eq!(named("hstore-nfs").sequence("hstore"), None);
    }

    #[test]
    fn public_host_falls_back_to_private() {
        let inst = named("hstore-00");
        assert_eq!(inst.public_host(), Some("10.0.0.1"));

        let mut inst = inst;
        inst.public_address = Some("ec2-1.compute.amazonaws.com".to_string());
        assert_eq!(inst.public_host(), Some("ec2-1.compute.amazonaws.com"));
    }

    #[test]
    fn instance_name_is_zero_padded() {
        assert_eq!(instance_name("hstore", 3), "hstore-03");
        assert_eq!(instance_name("hstore", 14), "hstore-14");
    }

    #[test]
    fn tags_carry_name_and_role() {
        let tags = InstanceTags {
            name: "hstore-00".to_string(),
            role: Role::Head,
        };
        assert_eq!(
            tags.pairs(),
            vec![("Name", "hstore-00".to_string()), ("Role", "head".to_string())]
        );
    }
}
