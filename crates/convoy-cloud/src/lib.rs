//! Convoy Cloud Lifecycle
//!
//! Provider-neutral engine for locating, provisioning, waiting on and
//! tearing down the virtual machines and firewall groups of a Convoy
//! deployment. Concrete providers (EC2, Route53) live in `convoy-cloud-aws`;
//! this crate only talks to them through the traits in [`provider`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 convoy-core                      │
//! │          (Orchestrator / Deprovisioner)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                convoy-cloud                      │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │   Locator    │  │ Provisioner  │             │
//! │  └──────────────┘  └──────────────┘             │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │   Network    │  │   Waiter     │             │
//! │  │   Policy     │  │              │             │
//! │  └──────────────┘  └──────────────┘             │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait ComputeProvider / DnsProvider      │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │  EC2 / Route53│ │  MemoryCloud  │
//! │ (cloud-aws)   │ │  (testing)    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod error;
pub mod locator;
pub mod lock;
pub mod model;
pub mod network;
pub mod provider;
pub mod provisioner;
pub mod report;
pub mod teardown;
pub mod waiter;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

// Re-exports
pub use error::{CloudError, Result, Severity};
pub use locator::ResourceLocator;
pub use lock::DeploymentLock;
pub use model::{
    IngressRule, LaunchRequest, LifecycleState, ManagedResource, NetworkInfo, Permission,
    PortRange, Protocol, RootVolume, RuleSource, SecurityGroup, SecurityGroupSpec, Tag,
};
pub use network::{ConvergeOutcome, NetworkPolicyManager};
pub use provider::{ComputeProvider, DnsChange, DnsProvider, ImageResolver, parent_zone};
pub use provisioner::{Decision, InstanceSpec, KeyPairStatus, ProvisionWaits, Provisioner};
pub use report::{Report, StepRecord};
pub use teardown::{CloudTeardown, TeardownWaits};
pub use waiter::{WaitConfig, tcp_reachable, wait_for, wait_for_port, wait_until};
