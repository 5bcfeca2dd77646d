//! One deploy invocation and its result

use crate::error::{CoreError, Result};
use crate::topology::Topology;
use chrono::{DateTime, Utc};
use convoy_cloud::{DeploymentLock, DnsChange, ManagedResource};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Explicit argument, then `DEPLOYMENT_NAME`, then `deploy-<UTC timestamp>`.
pub fn deployment_name(
    explicit: Option<&str>,
    configured: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    explicit
        .or(configured)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| now.format("deploy-%Y%m%d%H%M%S").to_string())
}

#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub name: String,
    pub topology: Topology,
    pub resources: BTreeMap<String, ManagedResource>,
}

impl DeploymentRun {
    pub fn new(name: impl Into<String>, topology: Topology) -> Self {
        Self {
            name: name.into(),
            topology,
            resources: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, resource: ManagedResource) {
        self.resources.insert(resource.role.clone(), resource);
    }

    pub fn resource(&self, role: &str) -> Result<&ManagedResource> {
        self.resources
            .get(role)
            .ok_or_else(|| CoreError::Precondition(format!("role {} was not provisioned", role)))
    }

    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            deployment: self.name.clone(),
            topology: self.topology,
            nodes: self
                .resources
                .iter()
                .map(|(role, r)| {
                    (
                        role.clone(),
                        NodeSummary {
                            id: r.id.clone(),
                            public: r.public_address.clone(),
                            private: r.private_address.clone(),
                        },
                    )
                })
                .collect(),
            dns: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub public: Option<String>,
    pub private: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub deployment: String,
    pub topology: Topology,
    pub nodes: BTreeMap<String, NodeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsChange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DeploymentSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `ssh -i <key> ubuntu@<public address>` for the fronting node.
    pub fn ssh_hint(&self, key_path: &Path) -> Option<String> {
        let node = self.nodes.get(self.topology.fronting_role())?;
        let public = node.public.as_deref()?;
        Some(format!("ssh -i {} ubuntu@{}", key_path.display(), public))
    }
}

/// Release `lock`. A failure is logged and handed back as text so it never
/// replaces the outcome of the flow that held the lock.
pub(crate) async fn release_lock(lock: DeploymentLock) -> Option<String> {
    match lock.release().await {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(error = %e, "failed to release deployment lock");
            Some(e.to_string())
        }
    }
}
