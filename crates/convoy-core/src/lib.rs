//! Convoy deployment pipelines
//!
//! Ties the cloud engine (`convoy-cloud`) and the external tools
//! (`convoy-tools`) into runnable pipelines:
//!
//! - [`Orchestrator`]: deploy a topology and update DNS
//! - [`Deprovisioner`]: ordered, best-effort teardown
//! - [`Registry`]: the name → handler table the CLI dispatches through
//!
//! Everything a pipeline touches arrives through a [`Runtime`] built once at
//! startup.

pub mod args;
pub mod deployment;
pub mod deprovisioner;
pub mod error;
pub mod orchestrator;
pub mod pipelines;
pub mod progress;
pub mod runtime;
pub mod tfvars;
pub mod topology;

#[cfg(test)]
mod testkit;

// Re-exports
pub use args::{DeployArgs, DestroyArgs, DnsArgs, decode_args};
pub use deployment::{DeploymentRun, DeploymentSummary, NodeSummary, deployment_name};
pub use deprovisioner::Deprovisioner;
pub use error::{CoreError, Result};
pub use orchestrator::{Orchestrator, three_node_plan};
pub use pipelines::{Pipeline, PipelineOutcome, Registry};
pub use progress::{StepLogger, StepResult};
pub use runtime::{Runtime, Tuning};
pub use topology::Topology;
