//! Terminator collaborators: tear down a replica's compute unit.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use crate::error::TerminationError;

pub type TerminateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TerminationError>> + Send + 'a>>;

/// Tears down the compute unit behind a replica.
pub trait Terminator: Send + Sync {
    fn terminate<'a>(&'a self, container_ref: &'a str) -> TerminateFuture<'a>;
}

/// Runs an external command with the container reference appended,
/// e.g. `["docker", "rm", "-f"]`.
#[derive(Debug, Clone)]
pub struct CommandTerminator {
    program: String,
    args: Vec<String>,
}

impl CommandTerminator {
    /// Returns `None` for an empty command line.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Terminator for CommandTerminator {
    fn terminate<'a>(&'a self, container_ref: &'a str) -> TerminateFuture<'a> {
        Box::pin(async move {
            debug!(program = %self.program, %container_ref, "running terminate command");
            let status = tokio::process::Command::new(&self.program)
                .args(&self.args)
                .arg(container_ref)
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|e| TerminationError::Spawn {
                    program: self.program.clone(),
                    reason: e.to_string(),
                })?;

            if status.success() {
                return Ok(());
            }
            match status.code() {
                Some(code) => Err(TerminationError::Exit {
                    container_ref: container_ref.to_string(),
                    code,
                }),
                None => Err(TerminationError::Signal {
                    container_ref: container_ref.to_string(),
                }),
            }
        })
    }
}

/// Records the decision only. Used when no terminate command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTerminator;

impl Terminator for LogTerminator {
    fn terminate<'a>(&'a self, container_ref: &'a str) -> TerminateFuture<'a> {
        info!(%container_ref, "no terminator configured, replica left running");
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> CommandTerminator {
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        CommandTerminator::new(&parts).unwrap()
    }

    #[test]
    fn empty_command_is_none() {
        assert!(CommandTerminator::new(&[]).is_none());
    }

    #[tokio::test]
    async fn successful_command() {
        assert!(cmd(&["true"]).terminate("ctr-1").await.is_ok());
    }

    #[tokio::test]
    async fn non_zero_exit_is_error() {
        assert_eq!(
            cmd(&["false"]).terminate("ctr-1").await.unwrap_err(),
            TerminationError::Exit {
                container_ref: "ctr-1".to_string(),
                code: 1
            }
        );
    }

    #[tokio::test]
    async fn container_ref_is_appended() {
        // `test ctr-1 = ctr-1` exits 0 only if the ref lands last.
        assert!(cmd(&["test", "ctr-1", "="]).terminate("ctr-1").await.is_ok());
        assert!(cmd(&["test", "ctr-1", "="]).terminate("ctr-2").await.is_err());
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = cmd(&["/nonexistent/meshgate-terminate"])
            .terminate("ctr-1")
            .await
            .unwrap_err();
        assert!(matches!(err, TerminationError::Spawn { .. }));
    }

    #[tokio::test]
    async fn log_terminator_always_succeeds() {
        assert!(LogTerminator.terminate("ctr-1").await.is_ok());
    }
}
