//! Subprocess dispatch for tasks that shell out rather than compute their
//! result in-process.
//!
//! Grounded on `turborepo-process::child`'s spawn/pipe-output/wait shape,
//! trimmed to what the spec needs: no PTY, no graceful-shutdown-with-SIGINT
//! (a running process is never killed mid-flight by `gantry`; the drain
//! policy only stops new dispatch). A non-zero exit status is always a
//! failure, same convention as the teacher.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command line is empty")]
    EmptyCommand,

    #[error("command `{program}` not found on PATH")]
    CommandNotFound { program: String },

    #[error("invalid command line `{line}`: {reason}")]
    InvalidCommandLine { line: String, reason: String },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait on `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "`{program}` exited with status {status}; see {stdout_path} / {stderr_path}"
    )]
    NonZeroExit {
        program: String,
        status: String,
        stdout_path: String,
        stderr_path: String,
    },

    #[error("could not create output file {path}: {source}")]
    OutputFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "`{task_name}` ({task_id}) self-invocation exited 0 but left no cache entry behind"
    )]
    NoCacheEntryAfterDispatch { task_name: String, task_id: String },
}

/// Where a dispatched process's captured output landed.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

/// Reconstructs a task from the outside, for prefix dispatch.
///
/// `gantry` never maintains a `task_name -> constructor` registry itself
/// (building one means scanning the consumer's task module, a CLI-front-end
/// concern per spec §9's design notes). Instead, a collaborator supplies an
/// implementation of this trait that knows how to re-invoke the current
/// program so it reconstructs the task identified by `(task_name, task_id)`,
/// runs its body, and persists the result via the same cache store before
/// exiting `0` — the contract spec §4.6 describes as "enough context to
/// reconstruct the exact task instance."
pub trait SelfInvoke: Send + Sync {
    /// The self-invocation command line (unprefixed), e.g.
    /// `"/usr/bin/myapp --task-name Choose --task-id ab12cd --cache /var/…"`.
    /// The scheduler prepends the resolved prefix command ahead of this.
    fn command_line(&self, task_name: &str, task_id: &str, cache_root: &Path) -> String;
}

/// Run `command` (optionally prefixed by `prefix_command`, e.g. a sandbox
/// or container wrapper a task declares via `task_prefix_command`),
/// redirecting stdout/stderr to `stdout_path`/`stderr_path` — siblings of
/// the task's `scratch/` directory in the cache entry layout, not inside it.
///
/// Both `prefix_command` and `command` are split with POSIX word-splitting
/// rules (via `shell_words`), not interpreted by an actual shell — `gantry`
/// never spawns `/bin/sh -c`, so shell metacharacters in a task's command
/// string are passed through literally as argv words, not interpreted.
#[tracing::instrument(skip(stdout_path, stderr_path))]
pub async fn dispatch(
    command: &str,
    prefix_command: Option<&str>,
    stdout_path: &Path,
    stderr_path: &Path,
) -> Result<ProcessOutput, ProcessError> {
    let mut argv = Vec::new();
    if let Some(prefix) = prefix_command {
        argv.extend(split(prefix)?);
    }
    argv.extend(split(command)?);

    let Some((program, args)) = argv.split_first() else {
        return Err(ProcessError::EmptyCommand);
    };

    let resolved = which::which(program).map_err(|_| ProcessError::CommandNotFound {
        program: program.clone(),
    })?;

    let stdout_file = File::create(stdout_path).map_err(|e| ProcessError::OutputFile {
        path: stdout_path.display().to_string(),
        source: e,
    })?;
    let stderr_file = File::create(stderr_path).map_err(|e| ProcessError::OutputFile {
        path: stderr_path.display().to_string(),
        source: e,
    })?;

    debug!(program = %resolved.display(), ?args, "dispatching process");

    let mut child = Command::new(&resolved)
        .args(args)
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| ProcessError::Spawn {
            program: program.clone(),
            source: e,
        })?;

    let status = child.wait().await.map_err(|e| ProcessError::Wait {
        program: program.clone(),
        source: e,
    })?;

    if !status.success() {
        return Err(ProcessError::NonZeroExit {
            program: program.clone(),
            status: status.to_string(),
            stdout_path: stdout_path.display().to_string(),
            stderr_path: stderr_path.display().to_string(),
        });
    }

    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(0),
        stdout_path: stdout_path.to_path_buf(),
        stderr_path: stderr_path.to_path_buf(),
    })
}

fn split(line: &str) -> Result<Vec<String>, ProcessError> {
    shell_words::split(line).map_err(|e| ProcessError::InvalidCommandLine {
        line: line.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        (dir.path().join("stdout.log"), dir.path().join("stderr.log"))
    }

    #[tokio::test]
    async fn runs_a_simple_command_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout_path, stderr_path) = paths(&dir);
        let out = dispatch("echo hello", None, &stdout_path, &stderr_path)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        let stdout = std::fs::read_to_string(out.stdout_path).unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn prefix_command_is_prepended() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout_path, stderr_path) = paths(&dir);
        // `env` just re-execs its argv, so this proves prefix tokens
        // actually land ahead of the task's own command.
        let out = dispatch("echo from-task", Some("env"), &stdout_path, &stderr_path)
            .await
            .unwrap();
        let stdout = std::fs::read_to_string(out.stdout_path).unwrap();
        assert_eq!(stdout.trim(), "from-task");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout_path, stderr_path) = paths(&dir);
        let err = dispatch("false", None, &stdout_path, &stderr_path)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NonZeroExit { .. }));
    }

    #[tokio::test]
    async fn missing_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout_path, stderr_path) = paths(&dir);
        let err = dispatch(
            "this-binary-does-not-exist-xyz",
            None,
            &stdout_path,
            &stderr_path,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::CommandNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout_path, stderr_path) = paths(&dir);
        let err = dispatch("   ", None, &stdout_path, &stderr_path)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommand));
    }
}
