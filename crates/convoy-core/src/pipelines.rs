//! Pipeline registry
//!
//! Every runnable pipeline is listed once in [`Registry::builtin`]: a name,
//! a one-line summary, its markdown description and a typed handler. The
//! table is validated when it is built, so a bad entry fails at startup
//! rather than when someone tries to run it.

use crate::args::{DeployArgs, DestroyArgs, DnsArgs, decode_args};
use crate::deployment::DeploymentSummary;
use crate::deprovisioner::Deprovisioner;
use crate::error::{CoreError, Result};
use crate::orchestrator::Orchestrator;
use crate::runtime::Runtime;
use crate::topology::Topology;
use convoy_cloud::{DnsChange, Report};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashSet;

pub type Handler = for<'a> fn(&'a Runtime, &'a [String]) -> BoxFuture<'a, Result<PipelineOutcome>>;

/// What a pipeline produced, for the caller to print or serialise.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Deployed(DeploymentSummary),
    Destroyed(Report),
    DnsUpdated(DnsChange),
}

pub struct Pipeline {
    pub name: &'static str,
    pub summary: &'static str,
    pub docs: &'static str,
    pub handler: Handler,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

pub struct Registry {
    pipelines: Vec<Pipeline>,
}

impl Registry {
    pub fn new(pipelines: Vec<Pipeline>) -> Result<Self> {
        let mut seen = HashSet::new();
        for p in &pipelines {
            if p.name.is_empty()
                || !p
                    .name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                return Err(CoreError::InvalidRegistry(format!(
                    "pipeline name '{}' must be lowercase kebab-case",
                    p.name
                )));
            }
            if !seen.insert(p.name) {
                return Err(CoreError::InvalidRegistry(format!(
                    "pipeline '{}' registered twice",
                    p.name
                )));
            }
            if p.docs.trim().is_empty() {
                return Err(CoreError::InvalidRegistry(format!(
                    "pipeline '{}' has no description",
                    p.name
                )));
            }
        }
        Ok(Self { pipelines })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(vec![
            Pipeline {
                name: "deploy-mongo",
                summary: "Standalone MongoDB node, bootstrapped over ssh",
                docs: include_str!("../docs/deploy-mongo.md"),
                handler: deploy_mongo,
            },
            Pipeline {
                name: "deploy-two-node",
                summary: "Database and application node, bootstrapped over ssh",
                docs: include_str!("../docs/deploy-two-node.md"),
                handler: deploy_two_node,
            },
            Pipeline {
                name: "deploy-three-node",
                summary: "Database, MicroK8s controller and worker, finished by terraform",
                docs: include_str!("../docs/deploy-three-node.md"),
                handler: deploy_three_node,
            },
            Pipeline {
                name: "destroy-two-node",
                summary: "Terminate the two-node instances and delete their groups",
                docs: include_str!("../docs/destroy-two-node.md"),
                handler: destroy_two_node,
            },
            Pipeline {
                name: "destroy-three-node",
                summary: "Uninstall cluster software, destroy infra and clean local state",
                docs: include_str!("../docs/destroy-three-node.md"),
                handler: destroy_three_node,
            },
            Pipeline {
                name: "dns-update",
                summary: "Point DOMAIN at the public address of a running node",
                docs: include_str!("../docs/dns-update.md"),
                handler: dns_update,
            },
        ])
    }

    pub fn list(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn get(&self, name: &str) -> Result<&Pipeline> {
        self.pipelines
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| CoreError::UnknownPipeline {
                name: name.to_string(),
                available: self
                    .pipelines
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub async fn run(&self, name: &str, rt: &Runtime, args: &[String]) -> Result<PipelineOutcome> {
        let pipeline = self.get(name)?;
        tracing::info!(pipeline = pipeline.name, args = ?args, "running pipeline");
        (pipeline.handler)(rt, args).await
    }
}

fn deploy_mongo<'a>(rt: &'a Runtime, args: &'a [String]) -> BoxFuture<'a, Result<PipelineOutcome>> {
    Box::pin(async move {
        let args: DeployArgs = decode_args(args)?;
        let summary = Orchestrator::new(rt).deploy(Topology::Mongo, &args).await?;
        Ok(PipelineOutcome::Deployed(summary))
    })
}

fn deploy_two_node<'a>(rt: &'a Runtime, args: &'a [String]) -> BoxFuture<'a, Result<PipelineOutcome>> {
    Box::pin(async move {
        let args: DeployArgs = decode_args(args)?;
        let summary = Orchestrator::new(rt).deploy(Topology::TwoNode, &args).await?;
        Ok(PipelineOutcome::Deployed(summary))
    })
}

fn deploy_three_node<'a>(
    rt: &'a Runtime,
    args: &'a [String],
) -> BoxFuture<'a, Result<PipelineOutcome>> {
    Box::pin(async move {
        let args: DeployArgs = decode_args(args)?;
        let summary = Orchestrator::new(rt).deploy(Topology::ThreeNode, &args).await?;
        Ok(PipelineOutcome::Deployed(summary))
    })
}

fn destroy_two_node<'a>(rt: &'a Runtime, args: &'a [String]) -> BoxFuture<'a, Result<PipelineOutcome>> {
    Box::pin(async move {
        let args: DestroyArgs = decode_args(args)?;
        let report = Deprovisioner::new(rt).destroy(Topology::TwoNode, &args).await?;
        Ok(PipelineOutcome::Destroyed(report))
    })
}

fn destroy_three_node<'a>(
    rt: &'a Runtime,
    args: &'a [String],
) -> BoxFuture<'a, Result<PipelineOutcome>> {
    Box::pin(async move {
        let args: DestroyArgs = decode_args(args)?;
        let report = Deprovisioner::new(rt)
            .destroy(Topology::ThreeNode, &args)
            .await?;
        Ok(PipelineOutcome::Destroyed(report))
    })
}

fn dns_update<'a>(rt: &'a Runtime, args: &'a [String]) -> BoxFuture<'a, Result<PipelineOutcome>> {
    Box::pin(async move {
        let args: DnsArgs = decode_args(args)?;
        let change = Orchestrator::new(rt).update_dns(&args).await?;
        Ok(PipelineOutcome::DnsUpdated(change))
    })
}
