//! Resource model shared by every provider

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    /// States the locator considers "present". Terminating and terminated
    /// instances are never reused.
    pub const LIVE: [LifecycleState; 3] = [
        LifecycleState::Pending,
        LifecycleState::Running,
        LifecycleState::Stopped,
    ];

    /// States teardown terminates. Adds the transitional states to
    /// [`LIVE`](Self::LIVE): a stopping or shutting-down instance still holds
    /// its network interface.
    pub const TEARDOWN: [LifecycleState; 5] = [
        LifecycleState::Pending,
        LifecycleState::Running,
        LifecycleState::Stopping,
        LifecycleState::Stopped,
        LifecycleState::ShuttingDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Terminated => "terminated",
        }
    }

    pub fn is_live(&self) -> bool {
        Self::LIVE.contains(self)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(LifecycleState::Pending),
            "running" => Ok(LifecycleState::Running),
            "stopping" => Ok(LifecycleState::Stopping),
            "stopped" => Ok(LifecycleState::Stopped),
            "shutting-down" => Ok(LifecycleState::ShuttingDown),
            "terminated" => Ok(LifecycleState::Terminated),
            other => Err(CloudError::InvalidConfig(format!(
                "unknown lifecycle state: {}",
                other
            ))),
        }
    }
}

/// A compute instance identified by its role tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub role: String,
    pub id: String,
    pub state: LifecycleState,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
    /// Name of the key pair the instance was launched with.
    pub key_name: Option<String>,
}

impl ManagedResource {
    pub fn public_address(&self) -> Result<&str> {
        self.public_address.as_deref().ok_or_else(|| {
            CloudError::NotFound(format!("public address of {} ({})", self.role, self.id))
        })
    }

    pub fn private_address(&self) -> Result<&str> {
        self.private_address.as_deref().ok_or_else(|| {
            CloudError::NotFound(format!("private address of {} ({})", self.role, self.id))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootVolume {
    pub device_name: String,
    pub size_gib: i32,
    pub volume_type: String,
}

impl Default for RootVolume {
    fn default() -> Self {
        Self {
            device_name: "/dev/sda1".to_string(),
            size_gib: 50,
            volume_type: "gp3".to_string(),
        }
    }
}

/// Everything a provider needs to launch one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub role: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub root_volume: Option<RootVolume>,
    pub tags: Vec<Tag>,
    pub user_data: String,
}

/// Default VPC and the subnet instances are launched into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub vpc_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    All,
}

impl Protocol {
    /// Wire value used by the compute API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::All => "-1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortRange {
    All,
    Range { from: i32, to: i32 },
}

impl PortRange {
    pub fn single(port: i32) -> Self {
        PortRange::Range {
            from: port,
            to: port,
        }
    }

    pub fn bounds(&self) -> (Option<i32>, Option<i32>) {
        match self {
            PortRange::All => (None, None),
            PortRange::Range { from, to } => (Some(*from), Some(*to)),
        }
    }
}

/// Where traffic allowed by a rule may come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleSource {
    Cidr(String),
    /// Another group in the same converge call, referenced by name.
    Group(String),
    GroupId(String),
}

/// A declared ingress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub ports: PortRange,
    pub source: RuleSource,
}

impl IngressRule {
    pub fn tcp_from_cidr(port: i32, cidr: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            ports: PortRange::single(port),
            source: RuleSource::Cidr(cidr.into()),
        }
    }

    pub fn tcp_from_group(port: i32, group: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            ports: PortRange::single(port),
            source: RuleSource::Group(group.into()),
        }
    }

    pub fn all_from_group(group: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::All,
            ports: PortRange::All,
            source: RuleSource::Group(group.into()),
        }
    }

    /// Turn the declaration into a concrete permission, resolving group names
    /// through `group_ids`.
    pub fn resolve(&self, group_ids: &BTreeMap<String, String>) -> Result<Permission> {
        let (from_port, to_port) = self.ports.bounds();
        let mut permission = Permission {
            protocol: self.protocol.as_str().to_string(),
            from_port,
            to_port,
            cidr_blocks: Vec::new(),
            group_ids: Vec::new(),
        };
        match &self.source {
            RuleSource::Cidr(cidr) => permission.cidr_blocks.push(cidr.clone()),
            RuleSource::GroupId(id) => permission.group_ids.push(id.clone()),
            RuleSource::Group(name) => {
                let id = group_ids.get(name).ok_or_else(|| {
                    CloudError::InvalidConfig(format!(
                        "rule references unknown security group '{}'",
                        name
                    ))
                })?;
                permission.group_ids.push(id.clone());
            }
        }
        Ok(permission)
    }
}

/// Desired security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: String,
    pub tags: Vec<Tag>,
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroupSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tags: Vec::new(),
            ingress: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn allow(mut self, rule: IngressRule) -> Self {
        self.ingress.push(rule);
        self
    }
}

/// A concrete permission as reported by (or sent to) the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub cidr_blocks: Vec<String>,
    pub group_ids: Vec<String>,
}

impl Permission {
    pub fn references(&self, group_id: &str) -> bool {
        self.group_ids.iter().any(|g| g == group_id)
    }

    /// Copy of this permission restricted to the single group pair, so a
    /// revoke removes the reference without touching CIDR entries.
    pub fn narrowed_to_group(&self, group_id: &str) -> Permission {
        Permission {
            protocol: self.protocol.clone(),
            from_port: self.from_port,
            to_port: self.to_port,
            cidr_blocks: Vec::new(),
            group_ids: vec![group_id.to_string()],
        }
    }

    /// True when every source of `other` is already granted by `self` for the
    /// same protocol and ports.
    pub fn covers(&self, other: &Permission) -> bool {
        self.protocol == other.protocol
            && self.from_port == other.from_port
            && self.to_port == other.to_port
            && other.cidr_blocks.iter().all(|c| self.cidr_blocks.contains(c))
            && other.group_ids.iter().all(|g| self.group_ids.contains(g))
    }
}

/// A security group as it currently exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub vpc_id: Option<String>,
    pub ingress: Vec<Permission>,
    pub egress: Vec<Permission>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_state_round_trip() {
        for state in [
            LifecycleState::Pending,
            LifecycleState::ShuttingDown,
            LifecycleState::Terminated,
        ] {
            let parsed: LifecycleState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("exploded".parse::<LifecycleState>().is_err());
        assert!(!LifecycleState::Stopping.is_live());
        assert!(LifecycleState::Stopped.is_live());
    }

    #[test]
    fn test_resolve_group_reference() {
        let mut ids = BTreeMap::new();
        ids.insert("convoy-app".to_string(), "sg-app".to_string());

        let perm = IngressRule::tcp_from_group(27017, "convoy-app")
            .resolve(&ids)
            .unwrap();
        assert_eq!(perm.protocol, "tcp");
        assert_eq!(perm.from_port, Some(27017));
        assert_eq!(perm.group_ids, vec!["sg-app".to_string()]);

        let all = IngressRule::all_from_group("convoy-app")
            .resolve(&ids)
            .unwrap();
        assert_eq!(all.protocol, "-1");
        assert_eq!(all.from_port, None);

        let err = IngressRule::tcp_from_group(22, "missing").resolve(&ids);
        assert!(matches!(err, Err(CloudError::InvalidConfig(_))));
    }

    #[test]
    fn test_narrowed_permission_drops_cidrs() {
        let perm = Permission {
            protocol: "tcp".into(),
            from_port: Some(22),
            to_port: Some(22),
            cidr_blocks: vec!["0.0.0.0/0".into()],
            group_ids: vec!["sg-a".into(), "sg-b".into()],
        };
        let narrowed = perm.narrowed_to_group("sg-b");
        assert!(narrowed.cidr_blocks.is_empty());
        assert_eq!(narrowed.group_ids, vec!["sg-b".to_string()]);
        assert!(perm.covers(&narrowed));
    }

    #[test]
    fn test_missing_address_is_not_found() {
        let resource = ManagedResource {
            role: "db".into(),
            id: "i-1".into(),
            state: LifecycleState::Running,
            public_address: None,
            private_address: Some("10.0.0.4".into()),
            key_name: None,
        };
        assert!(resource.public_address().is_err());
        assert_eq!(resource.private_address().unwrap(), "10.0.0.4");
    }
}
