//! Convoy external tool wrappers
//!
//! Every external program Convoy drives (`terraform`, `kubectl`, `helm`,
//! `ssh`) runs through the [`CommandRunner`] trait so pipelines can be
//! exercised against a scripted runner in tests.
//!
//! - [`StagedApplier`]: ordered infra-apply phases with a fixed retry bound
//! - [`DeploymentDescriptor`]: the `terraform.tfvars` handed to the applier
//! - [`kubeconfig`]: fetched cluster credentials and address patching

pub mod applier;
pub mod descriptor;
pub mod error;
pub mod kubeconfig;
pub mod kubectl;
pub mod runner;
pub mod script;
pub mod ssh;
pub mod terraform;

// Re-exports
pub use applier::{PhaseExecutor, PhaseReport, StagePhase, StagePlan, StagedApplier};
pub use descriptor::{DescriptorValue, DeploymentDescriptor};
pub use error::{Result, ToolError};
pub use kubectl::{Helm, Kubectl};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use script::{RemoteScript, shell_quote};
pub use ssh::Ssh;
pub use terraform::Terraform;

#[cfg(any(test, feature = "testing"))]
pub use runner::ScriptedRunner;
