//! terraform CLI wrapper

use crate::applier::PhaseExecutor;
use crate::error::Result;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const VAR_FILE: &str = "terraform.tfvars";

/// terraform invocations scoped to one working directory.
#[derive(Clone)]
pub struct Terraform {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl Terraform {
    pub fn new(runner: Arc<dyn CommandRunner>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            timeout: Duration::from_secs(45 * 60),
            env: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn command(&self, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new("terraform")
            .args(args.iter().copied())
            .cwd(&self.workdir)
            .timeout(self.timeout);
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec
    }

    pub async fn init(&self) -> Result<()> {
        let spec = self.command(&["init", "-input=false"]);
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    /// `apply -auto-approve` with the variables file, limited to `targets`
    /// when non-empty. The exit status is returned, not checked.
    pub async fn apply(&self, targets: &[String]) -> Result<CommandOutput> {
        let var_file = format!("-var-file={}", VAR_FILE);
        let mut spec = self.command(&["apply", "-auto-approve", "-input=false", &var_file]);
        for target in targets {
            spec = spec.arg(format!("-target={}", target));
        }
        self.runner.run(&spec).await
    }

    pub async fn destroy(&self) -> Result<()> {
        let var_file = format!("-var-file={}", VAR_FILE);
        let spec = self.command(&["destroy", "-auto-approve", "-input=false", &var_file]);
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }
}

#[async_trait]
impl PhaseExecutor for Terraform {
    async fn apply_targets(&self, targets: &[String]) -> Result<CommandOutput> {
        self.apply(targets).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;

    #[tokio::test]
    async fn test_apply_arguments() {
        let runner = Arc::new(ScriptedRunner::new());
        let tf = Terraform::new(runner.clone(), "/work/infra")
            .with_env("KUBE_INSECURE_SKIP_TLS_VERIFY", "true");

        tf.apply(&["aws_instance.db".to_string(), "null_resource.install".to_string()])
            .await
            .unwrap();

        let call = runner.calls().pop().unwrap();
        assert_eq!(call.cwd.as_deref(), Some(Path::new("/work/infra")));
        assert_eq!(
            call.args,
            vec![
                "apply",
                "-auto-approve",
                "-input=false",
                "-var-file=terraform.tfvars",
                "-target=aws_instance.db",
                "-target=null_resource.install",
            ]
        );
        assert!(call.env.contains(&(
            "KUBE_INSECURE_SKIP_TLS_VERIFY".to_string(),
            "true".to_string()
        )));
    }

    #[tokio::test]
    async fn test_apply_reports_failure_without_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("apply", vec![CommandOutput::failed(1, "Error: timeout")]);
        let tf = Terraform::new(runner.clone(), "/work/infra");

        let out = tf.apply(&[]).await.unwrap();
        assert_eq!(out.code, Some(1));
        assert!(!runner.calls()[0].args.iter().any(|a| a.starts_with("-target")));
    }

    #[tokio::test]
    async fn test_init_failure_is_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("init", vec![CommandOutput::failed(1, "no provider")]);
        let tf = Terraform::new(runner, "/work/infra");
        assert!(tf.init().await.is_err());
    }
}
