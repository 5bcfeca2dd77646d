//! Reuse-or-recreate provisioning of role instances

use crate::error::{CloudError, Result};
use crate::locator::ResourceLocator;
use crate::model::{LaunchRequest, LifecycleState, ManagedResource, RootVolume, Tag};
use crate::provider::{ComputeProvider, ImageResolver};
use crate::waiter::{WaitConfig, wait_until};
use std::sync::Arc;
use std::time::Duration;

/// Cloud-init payload for every instance; configuration happens later over SSH.
pub const NOOP_USER_DATA: &str = "#!/usr/bin/env bash\nexit 0\n";

/// Desired shape of one role instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub os_version: String,
    pub instance_type: String,
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub root_volume: Option<RootVolume>,
    /// Tags applied to the instance and its volumes besides `Name`.
    pub tags: Vec<Tag>,
}

/// What [`Provisioner::ensure`] will do with the current state of a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create,
    Start(String),
    Reuse(String),
    WaitRunning(String),
    /// Launched with a different key pair; terminate, then create.
    Replace(String),
}

impl Decision {
    pub fn for_existing(existing: Option<&ManagedResource>, key_name: &str) -> Decision {
        let Some(resource) = existing else {
            return Decision::Create;
        };
        if resource.key_name.as_deref() != Some(key_name) {
            return Decision::Replace(resource.id.clone());
        }
        match resource.state {
            LifecycleState::Running => Decision::Reuse(resource.id.clone()),
            LifecycleState::Stopped => Decision::Start(resource.id.clone()),
            LifecycleState::Pending => Decision::WaitRunning(resource.id.clone()),
            // The locator never returns these; replace rather than guess.
            LifecycleState::Stopping | LifecycleState::ShuttingDown | LifecycleState::Terminated => {
                Decision::Replace(resource.id.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPairStatus {
    Imported,
    AlreadyPresent,
}

/// Wait windows for instance state transitions.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionWaits {
    pub running: WaitConfig,
    pub terminated: WaitConfig,
}

impl Default for ProvisionWaits {
    fn default() -> Self {
        Self {
            running: WaitConfig::new(Duration::from_secs(600), Duration::from_secs(5)),
            terminated: WaitConfig::new(Duration::from_secs(600), Duration::from_secs(5)),
        }
    }
}

pub struct Provisioner {
    provider: Arc<dyn ComputeProvider>,
    images: Arc<dyn ImageResolver>,
    locator: ResourceLocator,
    waits: ProvisionWaits,
}

impl Provisioner {
    pub fn new(
        provider: Arc<dyn ComputeProvider>,
        images: Arc<dyn ImageResolver>,
        waits: ProvisionWaits,
    ) -> Self {
        Self {
            locator: ResourceLocator::new(provider.clone()),
            provider,
            images,
            waits,
        }
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    /// Import the public key under `name` unless the provider already has it.
    pub async fn ensure_key_pair(&self, name: &str, public_key: &[u8]) -> Result<KeyPairStatus> {
        if self.provider.key_pair_exists(name).await? {
            tracing::info!(key_name = name, "key pair already present");
            return Ok(KeyPairStatus::AlreadyPresent);
        }
        match self.provider.import_key_pair(name, public_key).await {
            Ok(()) => {
                tracing::info!(key_name = name, "imported key pair");
                Ok(KeyPairStatus::Imported)
            }
            Err(e) if e.is_duplicate() => {
                tracing::info!(key_name = name, "key pair appeared concurrently");
                Ok(KeyPairStatus::AlreadyPresent)
            }
            Err(e) => Err(e),
        }
    }

    /// Bring `role` to a running instance matching `spec`.
    pub async fn ensure(&self, role: &str, spec: &InstanceSpec) -> Result<ManagedResource> {
        let existing = self.locator.find(role).await?;
        let decision = Decision::for_existing(existing.as_ref(), &spec.key_name);

        match decision {
            Decision::Reuse(id) => {
                tracing::info!(role, instance_id = %id, "reusing running instance");
                self.wait_for_state(role, &id, LifecycleState::Running).await
            }
            Decision::WaitRunning(id) => {
                tracing::info!(role, instance_id = %id, "instance pending; waiting for running");
                self.wait_for_state(role, &id, LifecycleState::Running).await
            }
            Decision::Start(id) => {
                tracing::info!(role, instance_id = %id, "starting stopped instance");
                self.provider.start_instances(std::slice::from_ref(&id)).await?;
                self.wait_for_state(role, &id, LifecycleState::Running).await
            }
            Decision::Replace(id) => {
                let found_key = existing
                    .as_ref()
                    .and_then(|r| r.key_name.clone())
                    .unwrap_or_else(|| "<none>".to_string());
                tracing::warn!(
                    role,
                    instance_id = %id,
                    found_key = %found_key,
                    wanted_key = %spec.key_name,
                    "key pair mismatch; replacing instance"
                );
                self.terminate(role, std::slice::from_ref(&id)).await?;
                self.create(role, spec).await
            }
            Decision::Create => self.create(role, spec).await,
        }
    }

    /// Terminate `ids` and block until the provider reports them gone.
    pub async fn terminate(&self, role: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        tracing::info!(role, instance_ids = ?ids, "terminating instances");
        self.provider.terminate_instances(ids).await?;
        for id in ids {
            self.wait_for_state(role, id, LifecycleState::Terminated)
                .await?;
        }
        Ok(())
    }

    async fn create(&self, role: &str, spec: &InstanceSpec) -> Result<ManagedResource> {
        let image_id = self.images.resolve(&spec.os_version).await?;

        let mut tags = vec![Tag::new("Name", role)];
        tags.extend(spec.tags.iter().filter(|t| t.key != "Name").cloned());

        let request = LaunchRequest {
            role: role.to_string(),
            image_id,
            instance_type: spec.instance_type.clone(),
            key_name: spec.key_name.clone(),
            subnet_id: spec.subnet_id.clone(),
            security_group_ids: spec.security_group_ids.clone(),
            root_volume: spec.root_volume.clone(),
            tags,
            user_data: NOOP_USER_DATA.to_string(),
        };

        let id = self.provider.run_instance(&request).await?;
        tracing::info!(
            role,
            instance_id = %id,
            image_id = %request.image_id,
            instance_type = %request.instance_type,
            "launched instance"
        );
        self.wait_for_state(role, &id, LifecycleState::Running).await
    }

    /// Poll until instance `id` reaches `target`. A vanished instance counts
    /// as terminated.
    pub async fn wait_for_state(
        &self,
        role: &str,
        id: &str,
        target: LifecycleState,
    ) -> Result<ManagedResource> {
        let config = match target {
            LifecycleState::Terminated => self.waits.terminated,
            _ => self.waits.running,
        };
        let provider: &dyn ComputeProvider = self.provider.as_ref();
        let what = format!("{} ({}) to be {}", id, role, target);

        let mut resource = wait_until(&what, config, move || async move {
            match provider.describe_instance(id).await {
                Ok(Some(r)) if r.state == target => Some(Ok(r)),
                Ok(None) if target == LifecycleState::Terminated => Some(Ok(ManagedResource {
                    role: String::new(),
                    id: id.to_string(),
                    state: LifecycleState::Terminated,
                    public_address: None,
                    private_address: None,
                    key_name: None,
                })),
                Ok(Some(r))
                    if target == LifecycleState::Running
                        && r.state == LifecycleState::Terminated =>
                {
                    Some(Err(CloudError::InstanceLost(id.to_string())))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(instance_id = id, error = %e, "describe failed while waiting");
                    None
                }
            }
        })
        .await??;

        resource.role = role.to_string();
        tracing::info!(
            role,
            instance_id = id,
            state = %resource.state,
            public = resource.public_address.as_deref().unwrap_or("-"),
            private = resource.private_address.as_deref().unwrap_or("-"),
            "instance reached target state"
        );
        if target == LifecycleState::Running && resource.private_address.is_none() {
            return Err(CloudError::NotFound(format!(
                "running instance {} has no private address",
                id
            )));
        }
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;

    fn spec(key: &str) -> InstanceSpec {
        InstanceSpec {
            os_version: "22.04".into(),
            instance_type: "t2.xlarge".into(),
            key_name: key.into(),
            subnet_id: "subnet-1".into(),
            security_group_ids: vec!["sg-1".into()],
            root_volume: Some(RootVolume::default()),
            tags: vec![Tag::new("Project", "convoy"), Tag::new("Deployment", "d1")],
        }
    }

    fn provisioner(cloud: &Arc<MemoryCloud>) -> Provisioner {
        let waits = ProvisionWaits {
            running: WaitConfig::new(Duration::from_secs(30), Duration::from_secs(1)),
            terminated: WaitConfig::new(Duration::from_secs(30), Duration::from_secs(1)),
        };
        Provisioner::new(cloud.clone(), cloud.clone(), waits)
    }

    #[test]
    fn test_decision_table() {
        let mut resource = ManagedResource {
            role: "db".into(),
            id: "i-1".into(),
            state: LifecycleState::Stopped,
            public_address: None,
            private_address: None,
            key_name: Some("key".into()),
        };
        assert_eq!(Decision::for_existing(None, "key"), Decision::Create);
        assert_eq!(
            Decision::for_existing(Some(&resource), "key"),
            Decision::Start("i-1".into())
        );
        resource.state = LifecycleState::Pending;
        assert_eq!(
            Decision::for_existing(Some(&resource), "key"),
            Decision::WaitRunning("i-1".into())
        );
        resource.state = LifecycleState::Running;
        assert_eq!(
            Decision::for_existing(Some(&resource), "key"),
            Decision::Reuse("i-1".into())
        );
        assert_eq!(
            Decision::for_existing(Some(&resource), "other"),
            Decision::Replace("i-1".into())
        );
        resource.key_name = None;
        assert_eq!(
            Decision::for_existing(Some(&resource), "key"),
            Decision::Replace("i-1".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_creates_when_absent() {
        let cloud = Arc::new(MemoryCloud::new());
        let provisioner = provisioner(&cloud);

        let resource = provisioner.ensure("db", &spec("key")).await.unwrap();

        assert_eq!(resource.role, "db");
        assert_eq!(resource.state, LifecycleState::Running);
        assert!(resource.public_address.is_some());
        assert!(resource.private_address.is_some());
        assert_eq!(cloud.instances_with_role("db").len(), 1);

        let launch = cloud.launches().pop().unwrap();
        assert_eq!(launch.tags[0], Tag::new("Name", "db"));
        assert!(launch.tags.contains(&Tag::new("Deployment", "d1")));
        assert_eq!(launch.user_data, NOOP_USER_DATA);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_starts_stopped_instance() {
        let cloud = Arc::new(MemoryCloud::new());
        let id = cloud.seed_instance("db", LifecycleState::Stopped, "key");
        let provisioner = provisioner(&cloud);

        let resource = provisioner.ensure("db", &spec("key")).await.unwrap();

        assert_eq!(resource.id, id);
        assert_eq!(resource.state, LifecycleState::Running);
        assert!(cloud.launches().is_empty());
        assert_eq!(cloud.instances_with_role("db").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_is_idempotent() {
        let cloud = Arc::new(MemoryCloud::new());
        let provisioner = provisioner(&cloud);

        let first = provisioner.ensure("db", &spec("key")).await.unwrap();
        let second = provisioner.ensure("db", &spec("key")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(cloud.launches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_key_is_replaced() {
        let cloud = Arc::new(MemoryCloud::new());
        let stale = cloud.seed_instance("db", LifecycleState::Running, "old-key");
        let provisioner = provisioner(&cloud);

        let resource = provisioner.ensure("db", &spec("new-key")).await.unwrap();

        assert_ne!(resource.id, stale);
        assert_eq!(resource.key_name.as_deref(), Some("new-key"));
        assert_eq!(cloud.state_of(&stale), Some(LifecycleState::Terminated));

        let calls = cloud.mutating_calls();
        let terminate = calls.iter().position(|c| c.starts_with("terminate")).unwrap();
        let launch = calls.iter().position(|c| c.starts_with("run_instance")).unwrap();
        assert!(terminate < launch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_while_waiting_for_running_fails_fast() {
        let cloud = Arc::new(MemoryCloud::new());
        let id = cloud.seed_instance("db", LifecycleState::Terminated, "key");
        let provisioner = provisioner(&cloud);
        let start = tokio::time::Instant::now();

        let err = provisioner
            .wait_for_state("db", &id, LifecycleState::Running)
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::InstanceLost(ref lost) if *lost == id));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_is_fatal() {
        let cloud = Arc::new(MemoryCloud::new());
        let provisioner = provisioner(&cloud);
        let mut spec = spec("key");
        spec.os_version = "12.04".into();

        let err = provisioner.ensure("db", &spec).await.unwrap_err();
        assert!(matches!(err, CloudError::NoMatchingImage(_)));
        assert!(cloud.launches().is_empty());
    }

    #[tokio::test]
    async fn test_key_pair_import_once() {
        let cloud = Arc::new(MemoryCloud::new());
        let provisioner = provisioner(&cloud);

        let first = provisioner.ensure_key_pair("key", b"ssh-ed25519 AAAA").await.unwrap();
        let second = provisioner.ensure_key_pair("key", b"ssh-ed25519 AAAA").await.unwrap();

        assert_eq!(first, KeyPairStatus::Imported);
        assert_eq!(second, KeyPairStatus::AlreadyPresent);
        let imports = cloud
            .mutating_calls()
            .into_iter()
            .filter(|c| c.starts_with("import_key_pair"))
            .count();
        assert_eq!(imports, 1);
    }
}
