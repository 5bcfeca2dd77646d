//! Security group convergence and teardown

use crate::error::{CloudError, Result};
use crate::model::{NetworkInfo, Permission, SecurityGroup, SecurityGroupSpec};
use crate::provider::ComputeProvider;
use crate::report::Report;
use crate::waiter::{WaitConfig, wait_for};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of [`NetworkPolicyManager::converge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergeOutcome {
    /// Group name -> id for every converged group.
    pub group_ids: BTreeMap<String, String>,
    /// Groups that did not exist before this call.
    pub created: Vec<String>,
    /// Rules newly authorized.
    pub applied: usize,
    /// Rules the provider reported as already present.
    pub already_present: usize,
}

impl ConvergeOutcome {
    pub fn group_id(&self, name: &str) -> Result<&str> {
        self.group_ids
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| CloudError::NotFound(format!("security group {}", name)))
    }

    /// Declared rules now known to be in place.
    pub fn rule_count(&self) -> usize {
        self.applied + self.already_present
    }
}

/// Manages the security groups of one VPC.
///
/// Convergence only ever adds rules. Rules are removed solely by the
/// teardown passes ([`revoke_cross_references`](Self::revoke_cross_references)).
#[derive(Clone)]
pub struct NetworkPolicyManager {
    provider: Arc<dyn ComputeProvider>,
}

impl NetworkPolicyManager {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self { provider }
    }

    /// Default VPC and its first subnet.
    pub async fn resolve_network(&self) -> Result<NetworkInfo> {
        let vpc_id = self
            .provider
            .default_vpc()
            .await?
            .ok_or_else(|| CloudError::NetworkNotFound("no default VPC".to_string()))?;
        let subnet_id = self
            .provider
            .subnets(&vpc_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::NetworkNotFound(format!("no subnet in {}", vpc_id)))?;
        tracing::info!(vpc_id = %vpc_id, subnet_id = %subnet_id, "resolved network");
        Ok(NetworkInfo { vpc_id, subnet_id })
    }

    /// Resolve or create every group, then authorize every declared rule.
    ///
    /// Groups are resolved before any rule is applied so rules may reference
    /// groups declared later in `groups`.
    pub async fn converge(
        &self,
        vpc_id: &str,
        groups: &[SecurityGroupSpec],
    ) -> Result<ConvergeOutcome> {
        let mut outcome = ConvergeOutcome::default();

        for spec in groups {
            let id = match self
                .provider
                .find_security_group(&spec.name, Some(vpc_id))
                .await?
            {
                Some(existing) => {
                    tracing::debug!(group = %spec.name, group_id = %existing.id, "security group exists");
                    existing.id
                }
                None => {
                    let id = self.create_group(vpc_id, spec).await?;
                    outcome.created.push(spec.name.clone());
                    id
                }
            };
            outcome.group_ids.insert(spec.name.clone(), id);
        }

        for spec in groups {
            let group_id = outcome.group_id(&spec.name)?.to_string();
            for rule in &spec.ingress {
                let permission = rule.resolve(&outcome.group_ids)?;
                match self.provider.authorize_ingress(&group_id, &permission).await {
                    Ok(()) => {
                        outcome.applied += 1;
                        tracing::info!(
                            group = %spec.name,
                            group_id = %group_id,
                            protocol = %permission.protocol,
                            from_port = ?permission.from_port,
                            "authorized ingress rule"
                        );
                    }
                    Err(e) if e.is_duplicate() => {
                        outcome.already_present += 1;
                        tracing::debug!(group = %spec.name, "ingress rule already present");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(
            groups = outcome.group_ids.len(),
            applied = outcome.applied,
            already_present = outcome.already_present,
            "network policy converged"
        );
        Ok(outcome)
    }

    async fn create_group(&self, vpc_id: &str, spec: &SecurityGroupSpec) -> Result<String> {
        let id = match self
            .provider
            .create_security_group(&spec.name, &spec.description, vpc_id)
            .await
        {
            Ok(id) => id,
            // Lost a race with another run: adopt the group it created.
            Err(e) if e.is_duplicate() => self
                .provider
                .find_security_group(&spec.name, Some(vpc_id))
                .await?
                .map(|g| g.id)
                .ok_or(e)?,
            Err(e) => return Err(e),
        };
        tracing::info!(group = %spec.name, group_id = %id, vpc_id, "created security group");

        if !spec.tags.is_empty() {
            self.provider.tag_resource(&id, &spec.tags).await?;
        }
        Ok(id)
    }

    /// Look up existing groups by name. Missing groups are noted and skipped.
    pub async fn lookup_groups(&self, names: &[String], report: &mut Report) -> Vec<SecurityGroup> {
        let mut found = Vec::new();
        for name in names {
            match self.provider.find_security_group(name, None).await {
                Ok(Some(group)) => found.push(group),
                Ok(None) => report.add_success(
                    format!("lookup {}", name),
                    "security group not found; nothing to delete".to_string(),
                ),
                Err(e) => report.add_warning(format!("lookup {}", name), e.to_string()),
            }
        }
        found
    }

    /// Wait for every network interface in each group to detach. Timeouts
    /// are recorded as warnings only.
    pub async fn wait_detached(
        &self,
        groups: &[SecurityGroup],
        config: WaitConfig,
        report: &mut Report,
    ) {
        let provider: &dyn ComputeProvider = self.provider.as_ref();
        for group in groups {
            let group_id = group.id.as_str();
            let what = format!("network interfaces of {} to detach", group.name);
            let result = wait_for(&what, config, move || async move {
                match provider.network_interfaces(group_id).await {
                    Ok(enis) if enis.is_empty() => true,
                    Ok(enis) => {
                        tracing::debug!(group_id, attached = enis.len(), "interfaces still attached");
                        false
                    }
                    Err(e) if e.is_not_found() => true,
                    Err(e) => {
                        tracing::debug!(group_id, error = %e, "interface lookup failed");
                        false
                    }
                }
            })
            .await;
            match result {
                Ok(()) => report.add_success(
                    format!("detach {}", group.name),
                    "no attached interfaces".to_string(),
                ),
                Err(e) => report.add_warning(format!("detach {}", group.name), e.to_string()),
            }
        }
    }

    /// Revoke, in every group of the set, each ingress and egress permission
    /// that references another group of the set. Runs to completion before
    /// any group is deleted.
    pub async fn revoke_cross_references(&self, groups: &[SecurityGroup], report: &mut Report) {
        for target in groups {
            for holder in groups.iter().filter(|g| g.id != target.id) {
                let current = match self.provider.find_security_group(&holder.name, holder.vpc_id.as_deref()).await {
                    Ok(Some(g)) => g,
                    Ok(None) => continue,
                    Err(e) => {
                        report.add_warning(format!("describe {}", holder.name), e.to_string());
                        continue;
                    }
                };

                let ingress = referencing(&current.ingress, &target.id);
                if !ingress.is_empty() {
                    let step = format!("revoke ingress {} -> {}", target.name, holder.name);
                    match self.provider.revoke_ingress(&holder.id, &ingress).await {
                        Ok(()) => {
                            tracing::info!(group_id = %holder.id, source = %target.id, rules = ingress.len(), "revoked ingress references");
                            report.add_success(step, format!("{} rule(s)", ingress.len()));
                        }
                        Err(e) if e.is_benign() => report.add_success(step, e.to_string()),
                        Err(e) => report.add_warning(step, e.to_string()),
                    }
                }

                let egress = referencing(&current.egress, &target.id);
                if !egress.is_empty() {
                    let step = format!("revoke egress {} -> {}", holder.name, target.name);
                    match self.provider.revoke_egress(&holder.id, &egress).await {
                        Ok(()) => {
                            tracing::info!(group_id = %holder.id, target = %target.id, rules = egress.len(), "revoked egress references");
                            report.add_success(step, format!("{} rule(s)", egress.len()));
                        }
                        Err(e) if e.is_benign() => report.add_success(step, e.to_string()),
                        Err(e) => report.add_warning(step, e.to_string()),
                    }
                }
            }
        }
    }

    /// Delete each group. "Not found" counts as deleted.
    pub async fn delete_groups(&self, groups: &[SecurityGroup], report: &mut Report) {
        for group in groups {
            let step = format!("delete {}", group.name);
            match self.provider.delete_security_group(&group.id).await {
                Ok(()) => {
                    tracing::info!(group = %group.name, group_id = %group.id, "deleted security group");
                    report.add_success(step, group.id.clone());
                }
                Err(e) if e.is_not_found() => {
                    tracing::info!(group = %group.name, group_id = %group.id, "security group already gone");
                    report.add_success(step, "already deleted".to_string());
                }
                Err(e) => {
                    tracing::warn!(group = %group.name, group_id = %group.id, error = %e, "could not delete security group");
                    report.add_warning(step, e.to_string());
                }
            }
        }
    }
}

fn referencing(permissions: &[Permission], group_id: &str) -> Vec<Permission> {
    permissions
        .iter()
        .filter(|p| p.references(group_id))
        .map(|p| p.narrowed_to_group(group_id))
        .collect()
}
