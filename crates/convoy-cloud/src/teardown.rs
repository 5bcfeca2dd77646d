//! Cloud-side teardown
//!
//! Terminates every instance of the given roles (transitional states
//! included), then removes the named
//! security groups: wait for interfaces to detach, revoke every cross-group
//! reference in the set, and only then delete. Each failure becomes a
//! warning in the returned [`Report`]; nothing here aborts the sequence.

use crate::model::LifecycleState;
use crate::network::NetworkPolicyManager;
use crate::provisioner::Provisioner;
use crate::report::Report;
use crate::waiter::WaitConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct TeardownWaits {
    pub interfaces_detached: WaitConfig,
}

impl Default for TeardownWaits {
    fn default() -> Self {
        Self {
            interfaces_detached: WaitConfig::attempts(10, Duration::from_secs(5)),
        }
    }
}

pub struct CloudTeardown<'a> {
    provisioner: &'a Provisioner,
    network: &'a NetworkPolicyManager,
    waits: TeardownWaits,
}

impl<'a> CloudTeardown<'a> {
    pub fn new(
        provisioner: &'a Provisioner,
        network: &'a NetworkPolicyManager,
        waits: TeardownWaits,
    ) -> Self {
        Self {
            provisioner,
            network,
            waits,
        }
    }

    pub async fn teardown(&self, roles: &[String], group_names: &[String]) -> Report {
        let start = Instant::now();
        let mut report = Report::new();

        self.terminate_roles(roles, &mut report).await;

        let groups = self.network.lookup_groups(group_names, &mut report).await;
        self.network
            .wait_detached(&groups, self.waits.interfaces_detached, &mut report)
            .await;
        self.network.revoke_cross_references(&groups, &mut report).await;
        self.network.delete_groups(&groups, &mut report).await;

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            roles = roles.len(),
            groups = groups.len(),
            warnings = report.warnings.len(),
            elapsed_ms = report.duration_ms,
            "cloud teardown finished"
        );
        report
    }

    async fn terminate_roles(&self, roles: &[String], report: &mut Report) {
        for role in roles {
            let step = format!("terminate {}", role);
            let ids: Vec<String> = match self
                .provisioner
                .locator()
                .find_all_states(role, &LifecycleState::TEARDOWN)
                .await
            {
                Ok(found) => found.into_iter().map(|r| r.id).collect(),
                Err(e) => {
                    report.add_warning(step, e.to_string());
                    continue;
                }
            };
            if ids.is_empty() {
                report.add_success(step, "no live instances".to_string());
                continue;
            }
            match self.provisioner.terminate(role, &ids).await {
                Ok(()) => report.add_success(step, ids.join(", ")),
                Err(e) => report.add_warning(step, e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use crate::model::IngressRule;
    use crate::provider::ComputeProvider;
    use crate::provisioner::ProvisionWaits;
    use std::sync::Arc;

    fn fast_waits() -> ProvisionWaits {
        ProvisionWaits {
            running: WaitConfig::attempts(5, Duration::from_secs(1)),
            terminated: WaitConfig::attempts(5, Duration::from_secs(1)),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_interlinked_groups_with_attached_interfaces() {
        let cloud = Arc::new(MemoryCloud::new());
        let ctl = cloud.seed_instance("ctl", LifecycleState::Running, "k");
        let wkr = cloud.seed_instance("wkr", LifecycleState::Stopped, "k");
        let a = cloud.seed_group("sg-ctl", "vpc-default");
        let b = cloud.seed_group("sg-wkr", "vpc-default");
        cloud.seed_ingress(&a, IngressRule::all_from_group("sg-wkr"));
        cloud.seed_ingress(&b, IngressRule::all_from_group("sg-ctl"));
        cloud.seed_egress(&a, &b);
        cloud.attach_interfaces(&a, 2);
        cloud.attach_interfaces(&b, 3);

        let provider: Arc<dyn ComputeProvider> = cloud.clone();
        let provisioner = Provisioner::new(provider.clone(), cloud.clone(), fast_waits());
        let network = NetworkPolicyManager::new(provider);
        let teardown = CloudTeardown::new(&provisioner, &network, TeardownWaits::default());

        let report = teardown
            .teardown(&names(&["ctl", "wkr"]), &names(&["sg-ctl", "sg-wkr"]))
            .await;

        assert!(report.is_clean(), "warnings: {:?}", report.warnings);
        assert_eq!(cloud.state_of(&ctl), Some(LifecycleState::Terminated));
        assert_eq!(cloud.state_of(&wkr), Some(LifecycleState::Terminated));
        assert!(cloud.group(&a).is_none());
        assert!(cloud.group(&b).is_none());

        let calls = cloud.mutating_calls();
        let last_revoke = calls.iter().rposition(|c| c.starts_with("revoke_")).unwrap();
        let first_delete = calls
            .iter()
            .position(|c| c.starts_with("delete_security_group"))
            .unwrap();
        assert!(last_revoke < first_delete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_instance_is_terminated() {
        let cloud = Arc::new(MemoryCloud::new());
        let ctl = cloud.seed_instance("ctl", LifecycleState::Stopping, "k");

        let provider: Arc<dyn ComputeProvider> = cloud.clone();
        let provisioner = Provisioner::new(provider.clone(), cloud.clone(), fast_waits());
        let network = NetworkPolicyManager::new(provider);
        let teardown = CloudTeardown::new(&provisioner, &network, TeardownWaits::default());

        let report = teardown.teardown(&names(&["ctl"]), &[]).await;

        assert!(report.is_clean(), "warnings: {:?}", report.warnings);
        assert_eq!(report.succeeded[0].message, ctl);
        assert_eq!(cloud.state_of(&ctl), Some(LifecycleState::Terminated));
        assert!(
            cloud
                .mutating_calls()
                .contains(&format!("terminate_instances {}", ctl))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutting_down_instance_is_waited_out() {
        let cloud = Arc::new(MemoryCloud::new());
        let wkr = cloud.seed_instance("wkr", LifecycleState::ShuttingDown, "k");
        let sg = cloud.seed_group("sg-wkr", "vpc-default");

        let provider: Arc<dyn ComputeProvider> = cloud.clone();
        let provisioner = Provisioner::new(provider.clone(), cloud.clone(), fast_waits());
        let network = NetworkPolicyManager::new(provider);
        let teardown = CloudTeardown::new(&provisioner, &network, TeardownWaits::default());

        let report = teardown
            .teardown(&names(&["wkr"]), &names(&["sg-wkr"]))
            .await;

        assert!(report.is_clean(), "warnings: {:?}", report.warnings);
        assert_eq!(report.succeeded[0].message, wkr);
        assert_eq!(cloud.state_of(&wkr), Some(LifecycleState::Terminated));
        assert!(cloud.group(&sg).is_none());

        let calls = cloud.mutating_calls();
        let terminate = calls
            .iter()
            .position(|c| c.starts_with("terminate_instances"))
            .unwrap();
        let delete = calls
            .iter()
            .position(|c| c.starts_with("delete_security_group"))
            .unwrap();
        assert!(terminate < delete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_already_deleted_externally() {
        let cloud = Arc::new(MemoryCloud::new());
        let a = cloud.seed_group("sg-ctl", "vpc-default");
        let b = cloud.seed_group("sg-wkr", "vpc-default");
        cloud.seed_ingress(&a, IngressRule::all_from_group("sg-wkr"));
        cloud.seed_ingress(&b, IngressRule::all_from_group("sg-ctl"));
        cloud.delete_externally(&b);

        let provider: Arc<dyn ComputeProvider> = cloud.clone();
        let provisioner = Provisioner::new(provider.clone(), cloud.clone(), fast_waits());
        let network = NetworkPolicyManager::new(provider);
        let teardown = CloudTeardown::new(&provisioner, &network, TeardownWaits::default());

        let report = teardown
            .teardown(&names(&["ctl", "wkr"]), &names(&["sg-ctl", "sg-wkr"]))
            .await;

        assert!(report.is_clean(), "warnings: {:?}", report.warnings);
        assert!(cloud.group(&a).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_interfaces_only_warn() {
        let cloud = Arc::new(MemoryCloud::new());
        let a = cloud.seed_group("sg-ctl", "vpc-default");
        cloud.attach_interfaces(&a, 1000);

        let provider: Arc<dyn ComputeProvider> = cloud.clone();
        let provisioner = Provisioner::new(provider.clone(), cloud.clone(), fast_waits());
        let network = NetworkPolicyManager::new(provider);
        let teardown = CloudTeardown::new(&provisioner, &network, TeardownWaits::default());

        let report = teardown.teardown(&[], &names(&["sg-ctl"])).await;

        // Detach timed out, then the delete itself failed; both are warnings.
        assert_eq!(report.warnings.len(), 2);
        assert!(cloud.group(&a).is_some());
    }
}
