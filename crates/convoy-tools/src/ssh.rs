//! ssh wrapper

use crate::error::{Result, ToolError};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::script::{RemoteScript, shell_quote};
use convoy_cloud::{WaitConfig, wait_for};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(20);
const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Non-interactive ssh as one user with one identity file.
#[derive(Clone)]
pub struct Ssh {
    runner: Arc<dyn CommandRunner>,
    key_path: PathBuf,
    user: String,
}

impl Ssh {
    pub fn new(runner: Arc<dyn CommandRunner>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            key_path: key_path.into(),
            user: "ubuntu".to_string(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    fn command(&self, host: &str) -> CommandSpec {
        CommandSpec::new("ssh")
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-i",
            ])
            .arg(self.key_path.display().to_string())
            .arg(format!("{}@{}", self.user, host))
    }

    /// One `ssh host true` attempt.
    pub async fn probe(&self, host: &str) -> bool {
        let spec = self.command(host).arg("true").timeout(PROBE_TIMEOUT);
        match self.runner.run(&spec).await {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!(host, error = %e, "ssh probe failed");
                false
            }
        }
    }

    /// Poll until ssh logins succeed.
    pub async fn wait_reachable(&self, host: &str, config: WaitConfig) -> Result<()> {
        let what = format!("ssh on {}", host);
        wait_for(&what, config, || self.probe(host)).await?;
        tracing::info!(host, "ssh reachable");
        Ok(())
    }

    /// Run `command` remotely; non-zero exit is an error.
    pub async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let spec = self.command(host).arg(command).timeout(EXEC_TIMEOUT);
        self.runner.run(&spec).await?.check(&spec)
    }

    /// Pipe `script` into `sudo bash -s` and return the remote exit code.
    /// Output streams to the terminal.
    pub async fn run_script(
        &self,
        host: &str,
        script: &RemoteScript,
        timeout: Duration,
    ) -> Result<i32> {
        let spec = self
            .command(host)
            .args(["sudo", "bash", "-s"])
            .stdin(script.render())
            .timeout(timeout)
            .streamed();
        tracing::info!(host, exports = ?script.exported_keys().collect::<Vec<_>>(), "running remote script");
        let out = self.runner.run(&spec).await?;
        out.code.ok_or_else(|| ToolError::CommandFailed {
            command: spec.display(),
            code: None,
            stderr: "remote script killed by signal".to_string(),
        })
    }

    /// Append `public_key` to the remote user's authorized_keys.
    pub async fn install_public_key(&self, host: &str, public_key: &str) -> Result<()> {
        let key = shell_quote(public_key.trim());
        let command = format!(
            "mkdir -p ~/.ssh && chmod 700 ~/.ssh && grep -qxF {key} ~/.ssh/authorized_keys 2>/dev/null || echo {key} >> ~/.ssh/authorized_keys; chmod 600 ~/.ssh/authorized_keys",
        );
        self.exec(host, &command).await?;
        tracing::info!(host, "public key installed");
        Ok(())
    }

    /// Forward `local_port` on 127.0.0.1 to the same port on `host`, in the
    /// background.
    pub async fn open_tunnel(&self, host: &str, port: u16) -> Result<()> {
        let spec = self
            .command(host)
            .args(["-f", "-N", "-L"])
            .arg(format!("{port}:127.0.0.1:{port}"))
            .timeout(PROBE_TIMEOUT);
        self.runner.run(&spec).await?.check(&spec)?;
        tracing::info!(host, port, "tunnel opened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;

    fn ssh(runner: &Arc<ScriptedRunner>) -> Ssh {
        Ssh::new(runner.clone(), "/keys/id_convoy")
    }

    #[tokio::test]
    async fn test_probe_command_line() {
        let runner = Arc::new(ScriptedRunner::new());
        assert!(ssh(&runner).probe("203.0.113.7").await);

        let line = runner.command_lines().pop().unwrap();
        assert!(line.starts_with("ssh -o StrictHostKeyChecking=no"));
        assert!(line.contains("BatchMode=yes"));
        assert!(line.ends_with("-i /keys/id_convoy ubuntu@203.0.113.7 true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reachable_retries() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            " true",
            vec![
                CommandOutput::failed(255, "Connection refused"),
                CommandOutput::failed(255, "Connection refused"),
                CommandOutput::ok(""),
            ],
        );
        let config = WaitConfig::new(Duration::from_secs(300), Duration::from_secs(5));
        ssh(&runner).wait_reachable("host", config).await.unwrap();
        assert_eq!(runner.count(" true"), 3);
    }

    #[tokio::test]
    async fn test_run_script_returns_exit_code() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("sudo bash -s", vec![CommandOutput::failed(22, "")]);
        let script = RemoteScript::new("exit 22").export("DOMAIN", "chat.example.com");

        let code = ssh(&runner)
            .run_script("host", &script, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(code, 22);

        let call = runner.calls().pop().unwrap();
        assert!(call.stream);
        assert_eq!(
            call.stdin.as_deref(),
            Some("export DOMAIN=chat.example.com\nexit 22\n")
        );
    }

    #[tokio::test]
    async fn test_tunnel_failure_is_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("-L", vec![CommandOutput::failed(255, "bind: Address already in use")]);
        let err = ssh(&runner).open_tunnel("host", 16443).await.unwrap_err();
        assert!(matches!(err, ToolError::CommandFailed { .. }));
        assert!(runner.command_lines()[0].contains("16443:127.0.0.1:16443"));
    }
}
