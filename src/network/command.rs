//! Bounded execution of OS networking utilities

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished utility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            stdout: String::new(),
        }
    }
}

/// Runs an external program under a hard timeout
///
/// `None` means the program could not be spawned or did not finish in time.
/// Callers treat both as "no signal".
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Option<CommandOutput>;
}

/// Spawns real subprocesses with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Option<CommandOutput> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                log::debug!("{} could not be started: {}", program, e);
                return None;
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Some(CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            }),
            Ok(Err(e)) => {
                log::debug!("{} failed: {}", program, e);
                None
            }
            Err(_) => {
                log::debug!("{} timed out after {:?}", program, timeout);
                None
            }
        }
    }
}

/// Owned argument list from string literals
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Canned responses keyed by command line, for tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    responses: Vec<(String, CommandOutput)>,
    pub calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl ScriptedRunner {
    /// Respond to any command line starting with `prefix`
    pub fn on(mut self, prefix: &str, stdout: &str) -> Self {
        self.responses.push((prefix.to_string(), CommandOutput::ok(stdout)));
        self
    }

    pub fn fail(mut self, prefix: &str) -> Self {
        self.responses.push((prefix.to_string(), CommandOutput::failed()));
        self
    }
}

#[cfg(test)]
#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String], _timeout: Duration) -> Option<CommandOutput> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());
        self.responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
    }
}
