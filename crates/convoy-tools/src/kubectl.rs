//! kubectl and helm wrappers

use crate::error::Result;
use crate::runner::{CommandRunner, CommandSpec};
use convoy_cloud::{WaitConfig, wait_for};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const KUBECTL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: PathBuf,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.into(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("kubectl")
            .arg("--kubeconfig")
            .arg(self.kubeconfig.display().to_string())
            .timeout(KUBECTL_TIMEOUT)
    }

    /// `kubectl delete -f <source> --ignore-not-found`. `source` may be a
    /// path or URL.
    pub async fn delete_manifest(&self, source: &str) -> Result<()> {
        let spec = self
            .command()
            .args(["delete", "-f", source, "--ignore-not-found"]);
        self.runner.run(&spec).await?.check(&spec)?;
        tracing::info!(manifest = source, "deleted manifest objects");
        Ok(())
    }

    pub async fn apply_manifest(&self, source: &str) -> Result<()> {
        let spec = self.command().args(["apply", "-f", source]);
        self.runner.run(&spec).await?.check(&spec)?;
        tracing::info!(manifest = source, "applied manifest");
        Ok(())
    }

    /// True when `kubectl get namespace <ns>` succeeds.
    pub async fn namespace_ready(&self, namespace: &str) -> bool {
        let spec = self.command().args(["get", "namespace", namespace]);
        match self.runner.run(&spec).await {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!(namespace, error = %e, "namespace probe failed");
                false
            }
        }
    }

    /// Poll the API until `namespace` is visible.
    pub async fn wait_for_namespace(&self, namespace: &str, config: WaitConfig) -> Result<()> {
        let what = format!("namespace {} via the cluster API", namespace);
        wait_for(&what, config, || self.namespace_ready(namespace)).await?;
        tracing::info!(namespace, "cluster API healthy");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: PathBuf,
}

impl Helm {
    pub fn new(runner: Arc<dyn CommandRunner>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.into(),
        }
    }

    /// Uninstall `release`; a release that is not installed is not an error.
    pub async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        let spec = CommandSpec::new("helm")
            .args(["uninstall", release, "--namespace", namespace, "--kubeconfig"])
            .arg(self.kubeconfig.display().to_string())
            .timeout(Duration::from_secs(300));
        let out = self.runner.run(&spec).await?;
        if !out.success() && out.stderr.contains("not found") {
            tracing::info!(release, namespace, "release not installed");
            return Ok(());
        }
        out.check(&spec)?;
        tracing::info!(release, namespace, "release uninstalled");
        Ok(())
    }
}
