//! In-memory cloud for tests
//!
//! Behaves like a small EC2 account: transitional states advance one step
//! each time an instance is described, launched instances hold a network
//! interface in each of their groups until terminated, and a group cannot be
//! deleted while another group references it or interfaces are attached.

use crate::error::{CloudError, Result};
use crate::model::{
    IngressRule, LaunchRequest, LifecycleState, ManagedResource, Permission, SecurityGroup, Tag,
};
use crate::provider::{ComputeProvider, DnsChange, DnsProvider, ImageResolver, parent_zone};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Instance {
    resource: ManagedResource,
    security_group_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u32,
    instances: BTreeMap<String, Instance>,
    groups: BTreeMap<String, SecurityGroup>,
    group_tags: HashMap<String, Vec<Tag>>,
    extra_interfaces: HashMap<String, u32>,
    key_pairs: BTreeSet<String>,
    launches: Vec<LaunchRequest>,
    calls: Vec<String>,
    failures: HashMap<String, CloudError>,
    dns_records: Vec<(String, String)>,
}

impl Inner {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn check(&mut self, op: &str) -> Result<()> {
        match self.failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn attached_interfaces(&self, group_id: &str) -> Vec<String> {
        let mut enis: Vec<String> = self
            .instances
            .values()
            .filter(|i| i.resource.state != LifecycleState::Terminated)
            .filter(|i| i.security_group_ids.iter().any(|g| g == group_id))
            .map(|i| format!("eni-{}", i.resource.id))
            .collect();
        let extra = self.extra_interfaces.get(group_id).copied().unwrap_or(0);
        if extra > 0 {
            enis.push(format!("eni-extra-{}", group_id));
        }
        enis
    }
}

pub struct MemoryCloud {
    inner: Mutex<Inner>,
    default_vpc: Option<String>,
    public_address: Option<String>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            default_vpc: Some("vpc-default".to_string()),
            public_address: None,
        }
    }

    pub fn without_default_vpc(mut self) -> Self {
        self.default_vpc = None;
        self
    }

    /// Give every instance the same public address (e.g. `127.0.0.1` so
    /// port probes hit a local listener).
    pub fn with_public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn addresses(&self, n: u32) -> (String, String) {
        let public = self
            .public_address
            .clone()
            .unwrap_or_else(|| format!("203.0.113.{}", n % 250 + 1));
        (public, format!("10.0.0.{}", n % 250 + 1))
    }

    /// Insert an instance directly, bypassing the call log.
    pub fn seed_instance(&self, role: &str, state: LifecycleState, key_name: &str) -> String {
        let mut inner = self.lock();
        let id = inner.next("i");
        let (public, private) = self.addresses(inner.next_id);
        let running = state == LifecycleState::Running || state == LifecycleState::Pending;
        inner.instances.insert(
            id.clone(),
            Instance {
                resource: ManagedResource {
                    role: role.to_string(),
                    id: id.clone(),
                    state,
                    public_address: running.then_some(public),
                    private_address: Some(private),
                    key_name: Some(key_name.to_string()),
                },
                security_group_ids: Vec::new(),
            },
        );
        id
    }

    pub fn seed_group(&self, name: &str, vpc_id: &str) -> String {
        let mut inner = self.lock();
        let id = inner.next("sg");
        inner.groups.insert(
            id.clone(),
            SecurityGroup {
                id: id.clone(),
                name: name.to_string(),
                vpc_id: Some(vpc_id.to_string()),
                ingress: Vec::new(),
                egress: Vec::new(),
            },
        );
        id
    }

    pub fn seed_ingress(&self, group_id: &str, rule: IngressRule) {
        let mut inner = self.lock();
        let names: BTreeMap<String, String> = inner
            .groups
            .values()
            .map(|g| (g.name.clone(), g.id.clone()))
            .collect();
        if let (Ok(permission), Some(group)) = (rule.resolve(&names), inner.groups.get_mut(group_id)) {
            group.ingress.push(permission);
        }
    }

    /// Add an all-traffic egress rule in `holder_id` pointing at `target_id`.
    pub fn seed_egress(&self, holder_id: &str, target_id: &str) {
        let mut inner = self.lock();
        if let Some(group) = inner.groups.get_mut(holder_id) {
            group.egress.push(Permission {
                protocol: "-1".to_string(),
                from_port: None,
                to_port: None,
                cidr_blocks: Vec::new(),
                group_ids: vec![target_id.to_string()],
            });
        }
    }

    /// Keep `polls` extra interfaces reported on the group; each lookup
    /// consumes one.
    pub fn attach_interfaces(&self, group_id: &str, polls: u32) {
        self.lock()
            .extra_interfaces
            .insert(group_id.to_string(), polls);
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: &str, error: CloudError) {
        self.lock().failures.insert(op.to_string(), error);
    }

    /// Remove a group without going through the API, as if someone deleted
    /// it from the console.
    pub fn delete_externally(&self, group_id: &str) {
        self.lock().groups.remove(group_id);
    }

    pub fn group(&self, id: &str) -> Option<SecurityGroup> {
        self.lock().groups.get(id).cloned()
    }

    pub fn group_tags(&self, id: &str) -> Vec<Tag> {
        self.lock().group_tags.get(id).cloned().unwrap_or_default()
    }

    pub fn group_by_name(&self, name: &str) -> Option<SecurityGroup> {
        self.lock().groups.values().find(|g| g.name == name).cloned()
    }

    pub fn instances_with_role(&self, role: &str) -> Vec<ManagedResource> {
        self.lock()
            .instances
            .values()
            .filter(|i| i.resource.role == role && i.resource.state != LifecycleState::Terminated)
            .map(|i| i.resource.clone())
            .collect()
    }

    pub fn state_of(&self, id: &str) -> Option<LifecycleState> {
        self.lock().instances.get(id).map(|i| i.resource.state)
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.lock().launches.clone()
    }

    pub fn key_pairs(&self) -> Vec<String> {
        self.lock().key_pairs.iter().cloned().collect()
    }

    pub fn dns_records(&self) -> Vec<(String, String)> {
        self.lock().dns_records.clone()
    }

    /// Every state-changing call in order, as `"<op> <target>"`.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

fn revoke_from(list: &mut Vec<Permission>, permissions: &[Permission]) -> bool {
    let mut removed = false;
    for wanted in permissions {
        for existing in list.iter_mut() {
            if existing.protocol != wanted.protocol
                || existing.from_port != wanted.from_port
                || existing.to_port != wanted.to_port
            {
                continue;
            }
            let before = existing.group_ids.len() + existing.cidr_blocks.len();
            existing.group_ids.retain(|g| !wanted.group_ids.contains(g));
            existing.cidr_blocks.retain(|c| !wanted.cidr_blocks.contains(c));
            removed |= existing.group_ids.len() + existing.cidr_blocks.len() < before;
        }
    }
    list.retain(|p| !p.group_ids.is_empty() || !p.cidr_blocks.is_empty());
    removed
}

#[async_trait]
impl ComputeProvider for MemoryCloud {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_instances(
        &self,
        role: &str,
        states: &[LifecycleState],
    ) -> Result<Vec<ManagedResource>> {
        let mut inner = self.lock();
        inner.check("find_instances")?;
        Ok(inner
            .instances
            .values()
            .filter(|i| i.resource.role == role && states.contains(&i.resource.state))
            .map(|i| i.resource.clone())
            .collect())
    }

    async fn describe_instance(&self, id: &str) -> Result<Option<ManagedResource>> {
        let mut inner = self.lock();
        inner.check("describe_instance")?;
        let Some(instance) = inner.instances.get_mut(id) else {
            return Ok(None);
        };
        let resource = &mut instance.resource;
        let current = resource.clone();
        resource.state = match resource.state {
            LifecycleState::Pending => LifecycleState::Running,
            LifecycleState::Stopping => LifecycleState::Stopped,
            LifecycleState::ShuttingDown => LifecycleState::Terminated,
            other => other,
        };
        if resource.state == LifecycleState::Terminated {
            resource.public_address = None;
        }
        Ok(Some(current))
    }

    async fn run_instance(&self, request: &LaunchRequest) -> Result<String> {
        let mut inner = self.lock();
        inner.check("run_instance")?;
        if !inner.key_pairs.contains(&request.key_name) {
            // Tests may skip key import; register it the way a seeded account would.
            inner.key_pairs.insert(request.key_name.clone());
        }
        let id = inner.next("i");
        let (public, private) = self.addresses(inner.next_id);
        inner.instances.insert(
            id.clone(),
            Instance {
                resource: ManagedResource {
                    role: request.role.clone(),
                    id: id.clone(),
                    state: LifecycleState::Pending,
                    public_address: Some(public),
                    private_address: Some(private),
                    key_name: Some(request.key_name.clone()),
                },
                security_group_ids: request.security_group_ids.clone(),
            },
        );
        inner.launches.push(request.clone());
        inner.record(format!("run_instance {}", request.role));
        Ok(id)
    }

    async fn start_instances(&self, ids: &[String]) -> Result<()> {
        let mut inner = self.lock();
        inner.check("start_instances")?;
        let (public, _) = self.addresses(inner.next_id + 1);
        for id in ids {
            let instance = inner
                .instances
                .get_mut(id)
                .ok_or_else(|| CloudError::NotFound(id.clone()))?;
            if instance.resource.state == LifecycleState::Stopped {
                instance.resource.state = LifecycleState::Pending;
                instance.resource.public_address = Some(public.clone());
            }
        }
        inner.record(format!("start_instances {}", ids.join(",")));
        Ok(())
    }

    async fn stop_instances(&self, ids: &[String]) -> Result<()> {
        let mut inner = self.lock();
        inner.check("stop_instances")?;
        for id in ids {
            if let Some(instance) = inner.instances.get_mut(id) {
                instance.resource.state = LifecycleState::Stopping;
            }
        }
        inner.record(format!("stop_instances {}", ids.join(",")));
        Ok(())
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<()> {
        let mut inner = self.lock();
        inner.check("terminate_instances")?;
        for id in ids {
            if let Some(instance) = inner.instances.get_mut(id) {
                if instance.resource.state != LifecycleState::Terminated {
                    instance.resource.state = LifecycleState::ShuttingDown;
                }
            }
        }
        inner.record(format!("terminate_instances {}", ids.join(",")));
        Ok(())
    }

    async fn key_pair_exists(&self, name: &str) -> Result<bool> {
        let mut inner = self.lock();
        inner.check("key_pair_exists")?;
        Ok(inner.key_pairs.contains(name))
    }

    async fn import_key_pair(&self, name: &str, _public_key: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        inner.check("import_key_pair")?;
        if !inner.key_pairs.insert(name.to_string()) {
            return Err(CloudError::Duplicate(format!("key pair {}", name)));
        }
        inner.record(format!("import_key_pair {}", name));
        Ok(())
    }

    async fn default_vpc(&self) -> Result<Option<String>> {
        self.lock().check("default_vpc")?;
        Ok(self.default_vpc.clone())
    }

    async fn subnets(&self, vpc_id: &str) -> Result<Vec<String>> {
        self.lock().check("subnets")?;
        if Some(vpc_id) == self.default_vpc.as_deref() {
            Ok(vec!["subnet-a".to_string(), "subnet-b".to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn find_security_group(
        &self,
        name: &str,
        vpc_id: Option<&str>,
    ) -> Result<Option<SecurityGroup>> {
        let mut inner = self.lock();
        inner.check("find_security_group")?;
        Ok(inner
            .groups
            .values()
            .find(|g| g.name == name && (vpc_id.is_none() || g.vpc_id.as_deref() == vpc_id))
            .cloned())
    }

    async fn create_security_group(
        &self,
        name: &str,
        _description: &str,
        vpc_id: &str,
    ) -> Result<String> {
        let mut inner = self.lock();
        inner.check("create_security_group")?;
        if inner
            .groups
            .values()
            .any(|g| g.name == name && g.vpc_id.as_deref() == Some(vpc_id))
        {
            return Err(CloudError::Duplicate(format!("security group {}", name)));
        }
        let id = inner.next("sg");
        inner.groups.insert(
            id.clone(),
            SecurityGroup {
                id: id.clone(),
                name: name.to_string(),
                vpc_id: Some(vpc_id.to_string()),
                ingress: Vec::new(),
                egress: Vec::new(),
            },
        );
        inner.record(format!("create_security_group {}", name));
        Ok(id)
    }

    async fn tag_resource(&self, id: &str, tags: &[Tag]) -> Result<()> {
        let mut inner = self.lock();
        inner.check("tag_resource")?;
        inner
            .group_tags
            .entry(id.to_string())
            .or_default()
            .extend(tags.iter().cloned());
        inner.record(format!("tag_resource {}", id));
        Ok(())
    }

    async fn authorize_ingress(&self, group_id: &str, permission: &Permission) -> Result<()> {
        let mut inner = self.lock();
        inner.check("authorize_ingress")?;
        let group = inner
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CloudError::NotFound(group_id.to_string()))?;
        if group.ingress.iter().any(|p| p.covers(permission)) {
            return Err(CloudError::Duplicate(format!("rule on {}", group_id)));
        }
        group.ingress.push(permission.clone());
        inner.record(format!("authorize_ingress {}", group_id));
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, permissions: &[Permission]) -> Result<()> {
        let mut inner = self.lock();
        inner.check("revoke_ingress")?;
        let group = inner
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CloudError::NotFound(group_id.to_string()))?;
        if !revoke_from(&mut group.ingress, permissions) {
            return Err(CloudError::NotFound(format!("ingress rule on {}", group_id)));
        }
        inner.record(format!("revoke_ingress {}", group_id));
        Ok(())
    }

    async fn revoke_egress(&self, group_id: &str, permissions: &[Permission]) -> Result<()> {
        let mut inner = self.lock();
        inner.check("revoke_egress")?;
        let group = inner
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CloudError::NotFound(group_id.to_string()))?;
        if !revoke_from(&mut group.egress, permissions) {
            return Err(CloudError::NotFound(format!("egress rule on {}", group_id)));
        }
        inner.record(format!("revoke_egress {}", group_id));
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.check("delete_security_group")?;
        if !inner.groups.contains_key(group_id) {
            return Err(CloudError::NotFound(group_id.to_string()));
        }
        let referenced = inner.groups.values().any(|g| {
            g.id != group_id
                && (g.ingress.iter().any(|p| p.references(group_id))
                    || g.egress.iter().any(|p| p.references(group_id)))
        });
        if referenced {
            return Err(CloudError::DependencyViolation(format!(
                "{} is referenced by another group",
                group_id
            )));
        }
        if !inner.attached_interfaces(group_id).is_empty() {
            return Err(CloudError::DependencyViolation(format!(
                "{} has attached network interfaces",
                group_id
            )));
        }
        inner.groups.remove(group_id);
        inner.record(format!("delete_security_group {}", group_id));
        Ok(())
    }

    async fn network_interfaces(&self, group_id: &str) -> Result<Vec<String>> {
        let mut inner = self.lock();
        inner.check("network_interfaces")?;
        let enis = inner.attached_interfaces(group_id);
        if let Some(remaining) = inner.extra_interfaces.get_mut(group_id) {
            *remaining = remaining.saturating_sub(1);
        }
        Ok(enis)
    }
}

#[async_trait]
impl ImageResolver for MemoryCloud {
    async fn resolve(&self, os_version: &str) -> Result<String> {
        match os_version {
            "18.04" | "20.04" | "22.04" | "24.04" => Ok(format!("ami-ubuntu-{}", os_version.replace('.', ""))),
            other => Err(CloudError::NoMatchingImage(other.to_string())),
        }
    }
}

#[async_trait]
impl DnsProvider for MemoryCloud {
    async fn upsert_a_record(&self, domain: &str, address: &str) -> Result<DnsChange> {
        let zone = parent_zone(domain)?;
        let mut inner = self.lock();
        inner.check("upsert_a_record")?;
        inner.dns_records.retain(|(d, _)| d != domain);
        inner
            .dns_records
            .push((domain.to_string(), address.to_string()));
        inner.record(format!("upsert_a_record {} {}", zone, domain));
        Ok(DnsChange {
            id: format!("change-{}", inner.next_id),
            status: "INSYNC".to_string(),
        })
    }
}
