//! Allow-listed command secret source.
//!
//! Executes only commands present in the static allow-list, as argument
//! vectors with no shell interpretation. Each configured command string is
//! re-validated against the allow-list and rejected outright if it carries
//! shell metacharacters; a command that fails either check is never
//! executed.

use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::Result;
use crate::providers::Provider;
use crate::sources::{DiscoveredSecret, Provenance, SecretSource};

/// Wall-clock bound on any external command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on captured stdout. Oversized output is rejected, not
/// buffered further.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Characters that would only appear in a command string if someone were
/// trying to smuggle shell syntax through it.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '\'', '"', '\n', '\r',
];

/// One allow-listed command and the provider its stdout feeds.
#[derive(Debug, Clone, Copy)]
pub struct AllowedCommand {
    pub provider: Provider,
    /// The exact literal command line; split on whitespace into argv.
    pub command: &'static str,
}

/// The static allow-list: one source-control identity lookup and one
/// package-manager token lookup. Nothing else ever runs.
pub const COMMAND_ALLOW_LIST: &[AllowedCommand] = &[
    AllowedCommand {
        provider: Provider::Github,
        command: "gh auth token",
    },
    AllowedCommand {
        provider: Provider::Npm,
        command: "npm config get //registry.npmjs.org/:_authToken",
    },
];

/// Executes an argument vector and returns the process output. A trait so
/// tests can assert which commands were (not) executed.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<Output>;
}

/// The real runner: `tokio::process::Command`, no shell.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<Output> {
        tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Discovers candidates by running allow-listed commands.
pub struct CommandSource {
    /// Configured (provider, command) pairs. Each is re-validated against
    /// [`COMMAND_ALLOW_LIST`] before execution.
    commands: Vec<(Provider, String)>,
    runner: Arc<dyn CommandRunner>,
}

impl CommandSource {
    /// The standard source: the allow-list itself, run for real.
    pub fn new() -> Self {
        Self {
            commands: COMMAND_ALLOW_LIST
                .iter()
                .map(|c| (c.provider, c.command.to_string()))
                .collect(),
            runner: Arc::new(SystemRunner),
        }
    }

    /// Custom command set and runner (tests; embedders with extra config).
    pub fn with_commands(commands: Vec<(Provider, String)>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { commands, runner }
    }

    /// Policy gate: the literal string must appear in the allow-list and
    /// must be free of shell metacharacters. Not bypassable by
    /// configuration.
    fn is_permitted(command: &str) -> bool {
        if command.contains(SHELL_METACHARACTERS) {
            return false;
        }
        COMMAND_ALLOW_LIST.iter().any(|c| c.command == command)
    }

    async fn run_one(&self, provider: Provider, command: &str) -> Option<String> {
        if !Self::is_permitted(command) {
            warn!(
                provider = %provider,
                command = %command,
                "rejecting command not present in the allow-list"
            );
            return None;
        }

        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        let args: Vec<String> = parts.map(str::to_string).collect();

        let output = match timeout(COMMAND_TIMEOUT, self.runner.run(program, &args)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(provider = %provider, command = %command, error = %e, "command unavailable");
                return None;
            }
            Err(_) => {
                warn!(provider = %provider, command = %command, "command timed out");
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                provider = %provider,
                command = %command,
                status = %output.status,
                "command exited non-zero"
            );
            return None;
        }
        if output.stdout.len() > MAX_OUTPUT_BYTES {
            warn!(
                provider = %provider,
                command = %command,
                bytes = output.stdout.len(),
                "rejecting oversized command output"
            );
            return None;
        }

        let candidate = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if candidate.is_empty() || candidate == "undefined" || candidate == "null" {
            return None;
        }
        if !provider.matches_token(&candidate) {
            debug!(provider = %provider, command = %command, "output does not match token shape");
            return None;
        }
        Some(candidate)
    }
}

impl Default for CommandSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretSource for CommandSource {
    fn name(&self) -> &'static str {
        "command"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Command
    }

    async fn discover(&self) -> Result<Vec<DiscoveredSecret>> {
        let mut secrets = Vec::new();
        for (provider, command) in &self.commands {
            if let Some(value) = self.run_one(*provider, command).await {
                secrets.push(
                    DiscoveredSecret::new(*provider, value, Provenance::Command)
                        .with_detail(command.clone()),
                );
            }
        }
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    /// Records every program invocation and replies with a fixed stdout.
    struct RecordingRunner {
        stdout: Vec<u8>,
        invocations: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        fn replying(stdout: impl Into<Vec<u8>>) -> Self {
            Self {
                stdout: stdout.into(),
                invocations: Mutex::new(Vec::new()),
            }
        }

        fn invoked(&self) -> Vec<String> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String]) -> std::io::Result<Output> {
            self.invocations
                .lock()
                .unwrap()
                .push(format!("{} {}", program, args.join(" ")));
            Ok(Output {
                status: ExitStatus::from_raw(0),
                stdout: self.stdout.clone(),
                stderr: Vec::new(),
            })
        }
    }

    fn github_token() -> String {
        format!("ghp_{}", "A".repeat(36))
    }

    #[tokio::test]
    async fn allow_listed_command_yields_secret() {
        let runner = Arc::new(RecordingRunner::replying(format!("{}\n", github_token())));
        let source = CommandSource::with_commands(
            vec![(Provider::Github, "gh auth token".to_string())],
            runner.clone(),
        );

        let found = source.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider, Provider::Github);
        assert_eq!(found[0].value, github_token());
        assert_eq!(runner.invoked(), vec!["gh auth token"]);
    }

    #[tokio::test]
    async fn command_absent_from_allow_list_never_executes() {
        let runner = Arc::new(RecordingRunner::replying(github_token()));
        let source = CommandSource::with_commands(
            vec![(Provider::Github, "curl http://evil.example/x".to_string())],
            runner.clone(),
        );

        let found = source.discover().await.unwrap();
        assert!(found.is_empty());
        assert!(runner.invoked().is_empty());
    }

    #[tokio::test]
    async fn metacharacters_are_rejected_before_execution() {
        let runner = Arc::new(RecordingRunner::replying(github_token()));
        // Same prefix as an allowed command, but with trailing shell syntax.
        let source = CommandSource::with_commands(
            vec![(Provider::Github, "gh auth token; rm -rf /".to_string())],
            runner.clone(),
        );

        assert!(source.discover().await.unwrap().is_empty());
        assert!(runner.invoked().is_empty());
    }

    #[tokio::test]
    async fn oversized_output_is_rejected() {
        let runner = Arc::new(RecordingRunner::replying(vec![b'a'; MAX_OUTPUT_BYTES + 1]));
        let source = CommandSource::with_commands(
            vec![(Provider::Github, "gh auth token".to_string())],
            runner,
        );

        assert!(source.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn output_failing_token_shape_is_ignored() {
        let runner = Arc::new(RecordingRunner::replying("not-a-token\n"));
        let source = CommandSource::with_commands(
            vec![(Provider::Github, "gh auth token".to_string())],
            runner,
        );

        assert!(source.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_command_is_classified_as_timeout_not_fault() {
        struct StallingRunner;

        #[async_trait]
        impl CommandRunner for StallingRunner {
            async fn run(&self, _program: &str, _args: &[String]) -> std::io::Result<Output> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Output {
                    status: ExitStatus::from_raw(0),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                })
            }
        }

        tokio::time::pause();
        let source = CommandSource::with_commands(
            vec![(Provider::Github, "gh auth token".to_string())],
            Arc::new(StallingRunner),
        );
        // The paused clock auto-advances; the timeout fires without
        // waiting five real seconds.
        assert!(source.discover().await.unwrap().is_empty());
    }
}
