//! Everything a pipeline needs, built once in `main`

use convoy_cloud::{
    ComputeProvider, DnsProvider, ImageResolver, ProvisionWaits, TeardownWaits, WaitConfig,
};
use convoy_config::Settings;
use convoy_tools::CommandRunner;
use std::sync::Arc;
use std::time::Duration;

/// Timeouts, retry bounds and ports used by the deploy and destroy flows.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub provision: ProvisionWaits,
    pub teardown: TeardownWaits,
    /// TCP reachability of a fresh node before bootstrapping it.
    pub port_reachable: WaitConfig,
    /// `ssh true` logins on cluster nodes.
    pub ssh_login: WaitConfig,
    pub ssh_port: u16,
    /// `kubectl get namespace kube-system` polling.
    pub api_health: WaitConfig,
    pub phase_retry_delay: Duration,
    /// Pause between the infra phase and fetching cluster credentials.
    pub settle: Duration,
    /// Soft wait for the DNS name to resolve; `None` skips it.
    pub dns_propagation: Option<WaitConfig>,
    pub bootstrap_timeout: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            provision: ProvisionWaits::default(),
            teardown: TeardownWaits::default(),
            port_reachable: WaitConfig::new(Duration::from_secs(120), Duration::from_secs(5)),
            ssh_login: WaitConfig::new(Duration::from_secs(300), Duration::from_secs(5)),
            ssh_port: 22,
            api_health: WaitConfig::attempts(30, Duration::from_secs(5)),
            phase_retry_delay: Duration::from_secs(20),
            settle: Duration::from_secs(10),
            dns_propagation: Some(WaitConfig::new(
                Duration::from_secs(300),
                Duration::from_secs(10),
            )),
            bootstrap_timeout: Duration::from_secs(600),
        }
    }
}

pub struct Runtime {
    pub settings: Settings,
    pub compute: Arc<dyn ComputeProvider>,
    pub images: Arc<dyn ImageResolver>,
    pub dns: Arc<dyn DnsProvider>,
    pub runner: Arc<dyn CommandRunner>,
    pub tuning: Tuning,
}

impl Runtime {
    pub fn new(
        settings: Settings,
        compute: Arc<dyn ComputeProvider>,
        images: Arc<dyn ImageResolver>,
        dns: Arc<dyn DnsProvider>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            settings,
            compute,
            images,
            dns,
            runner,
            tuning: Tuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }
}
