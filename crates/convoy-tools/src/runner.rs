//! Subprocess execution

use crate::error::{Result, ToolError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// A fully described subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// Pass stdout/stderr straight through to the terminal instead of
    /// capturing them.
    pub stream: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
            stream: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Command line for logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Exit status plus captured output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `lines` lines of stderr, falling back to stdout.
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = source.trim_end().lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }

    /// Error unless the exit code is zero.
    pub fn check(self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::CommandFailed {
                command: spec.display(),
                code: self.code,
                stderr: self.tail(20),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is returned, not raised; spawn
    /// failures and timeouts are errors.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if spec.stream {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {}", spec.display());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotInstalled(spec.program.clone())
            } else {
                ToolError::Io(e)
            }
        })?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::TimedOut {
                command: spec.display(),
                timeout: spec.timeout,
            })??;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(any(test, feature = "testing"))]
mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Rule {
        needle: String,
        outputs: VecDeque<CommandOutput>,
    }

    /// Records every command and answers from a script.
    ///
    /// A rule matches when the command line contains its needle; its outputs
    /// are handed out in order and the last one repeats. Commands matching no
    /// rule succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Mutex<Vec<Rule>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, needle: &str, outputs: Vec<CommandOutput>) -> &Self {
            self.rules
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(Rule {
                    needle: needle.to_string(),
                    outputs: outputs.into(),
                });
            self
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn command_lines(&self) -> Vec<String> {
            self.calls().iter().map(CommandSpec::display).collect()
        }

        pub fn count(&self, needle: &str) -> usize {
            self.command_lines()
                .iter()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(spec.clone());
            let line = spec.display();
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            let Some(rule) = rules.iter_mut().find(|r| line.contains(&r.needle)) else {
                return Ok(CommandOutput::ok(""));
            };
            let output = if rule.outputs.len() > 1 {
                rule.outputs.pop_front()
            } else {
                rule.outputs.front().cloned()
            };
            Ok(output.unwrap_or_default())
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedRunner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("terraform")
            .args(["apply", "-auto-approve"])
            .arg("-target=aws_instance.db");
        assert_eq!(
            spec.display(),
            "terraform apply -auto-approve -target=aws_instance.db"
        );
        assert_eq!(CommandSpec::new("true").display(), "true");
    }

    #[test]
    fn test_output_tail_prefers_stderr() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "a\nb\n".into(),
            stderr: "x\ny\nz\n".into(),
        };
        assert_eq!(out.tail(2), "y\nz");
        assert_eq!(CommandOutput::ok("one\ntwo").tail(5), "one\ntwo");
    }

    #[test]
    fn test_check_maps_failure() {
        let spec = CommandSpec::new("kubectl").arg("get");
        let err = CommandOutput::failed(2, "boom").check(&spec).unwrap_err();
        match err {
            ToolError::CommandFailed { command, code, stderr } => {
                assert_eq!(command, "kubectl get");
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_runner_captures_output_and_stdin() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "cat; echo err >&2; exit 3"])
            .stdin("hello");
        let out = ProcessRunner.run(&spec).await.unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_process_runner_missing_program() {
        let spec = CommandSpec::new("convoy-definitely-not-installed");
        let err = ProcessRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ToolError::NotInstalled(_)));
    }

    #[tokio::test]
    async fn test_process_runner_timeout() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        let err = ProcessRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_scripted_runner_sequences_outputs() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "apply",
            vec![CommandOutput::failed(1, "flaky"), CommandOutput::ok("done")],
        );

        let apply = CommandSpec::new("terraform").arg("apply");
        assert_eq!(runner.run(&apply).await.unwrap().code, Some(1));
        assert!(runner.run(&apply).await.unwrap().success());
        assert!(runner.run(&apply).await.unwrap().success());
        assert!(runner.run(&CommandSpec::new("true")).await.unwrap().success());
        assert_eq!(runner.count("apply"), 3);
    }
}
