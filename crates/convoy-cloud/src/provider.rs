//! Provider trait definitions

use crate::error::{CloudError, Result};
use crate::model::{LaunchRequest, LifecycleState, ManagedResource, Permission, SecurityGroup, Tag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Compute API abstraction
///
/// Implementations map provider-specific "already exists", "duplicate rule"
/// and "not found" conditions onto [`CloudError::Duplicate`] and
/// [`CloudError::NotFound`] so callers can treat them as benign.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Returns the provider name (e.g., "aws-ec2", "memory")
    fn name(&self) -> &str;

    /// Instances whose `Name` tag equals `role` and whose state is in `states`.
    async fn find_instances(
        &self,
        role: &str,
        states: &[LifecycleState],
    ) -> Result<Vec<ManagedResource>>;

    /// Current view of one instance; `None` once the provider forgot it.
    async fn describe_instance(&self, id: &str) -> Result<Option<ManagedResource>>;

    /// Launch one instance and return its id.
    async fn run_instance(&self, request: &LaunchRequest) -> Result<String>;

    async fn start_instances(&self, ids: &[String]) -> Result<()>;

    async fn stop_instances(&self, ids: &[String]) -> Result<()>;

    async fn terminate_instances(&self, ids: &[String]) -> Result<()>;

    async fn key_pair_exists(&self, name: &str) -> Result<bool>;

    async fn import_key_pair(&self, name: &str, public_key: &[u8]) -> Result<()>;

    /// Id of the account's default VPC, if there is one.
    async fn default_vpc(&self) -> Result<Option<String>>;

    async fn subnets(&self, vpc_id: &str) -> Result<Vec<String>>;

    async fn find_security_group(
        &self,
        name: &str,
        vpc_id: Option<&str>,
    ) -> Result<Option<SecurityGroup>>;

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String>;

    async fn tag_resource(&self, id: &str, tags: &[Tag]) -> Result<()>;

    async fn authorize_ingress(&self, group_id: &str, permission: &Permission) -> Result<()>;

    async fn revoke_ingress(&self, group_id: &str, permissions: &[Permission]) -> Result<()>;

    async fn revoke_egress(&self, group_id: &str, permissions: &[Permission]) -> Result<()>;

    async fn delete_security_group(&self, group_id: &str) -> Result<()>;

    /// Network interfaces still attached to the group.
    async fn network_interfaces(&self, group_id: &str) -> Result<Vec<String>>;
}

/// Resolves an OS version (e.g. "22.04") to a concrete image id.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, os_version: &str) -> Result<String>;
}

/// Result of a DNS change submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsChange {
    pub id: String,
    pub status: String,
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or replace the A record for `domain` in its parent zone.
    async fn upsert_a_record(&self, domain: &str, address: &str) -> Result<DnsChange>;
}

/// Hosted zone that owns `domain`: the domain minus its first label, with a
/// trailing dot (`chat.example.com` -> `example.com.`).
pub fn parent_zone(domain: &str) -> Result<String> {
    let domain = domain.trim().trim_end_matches('.');
    match domain.split_once('.') {
        Some((label, rest)) if !label.is_empty() && !rest.is_empty() => Ok(format!("{}.", rest)),
        _ => Err(CloudError::InvalidConfig(format!(
            "domain '{}' has no parent zone",
            domain
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_zone() {
        assert_eq!(parent_zone("chat.example.com").unwrap(), "example.com.");
        assert_eq!(parent_zone("a.b.c.d").unwrap(), "b.c.d.");
        assert_eq!(parent_zone("chat.example.com.").unwrap(), "example.com.");
    }

    #[test]
    fn test_parent_zone_rejects_bare_label() {
        assert!(parent_zone("localhost").is_err());
        assert!(parent_zone(".com").is_err());
        assert!(parent_zone("").is_err());
    }
}
