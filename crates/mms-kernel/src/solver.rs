//! The external solver boundary.
//!
//! The solver is an opaque executable: it consumes a generated script and
//! leaves numeric output files behind. [`SolverEngine`] is the capability
//! seam so campaigns can swap the real FreeFEM binary for a deterministic
//! fake in tests, and [`run_command`] is the shared spawn-with-timeout
//! primitive (also used for plot conversion downstream).

use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// One request to an external solver.
#[derive(Debug, Clone)]
pub struct SolverJob<'a> {
    /// Path of the rendered script.
    pub script: &'a Path,
    /// Extra arguments appended after the script path.
    pub args: &'a [String],
    /// Working directory for the child process; relative output paths in
    /// the script resolve against this.
    pub workdir: &'a Path,
    /// Wall-clock budget; the child is killed when it expires.
    pub timeout: Duration,
}

/// Captured outcome of a finished solver process.
#[derive(Debug, Clone)]
pub struct SolverRun {
    /// Exit code, if the process exited normally (None when killed by a
    /// signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SolverRun {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Failures that prevent a verdict on the process itself.
///
/// A non-zero exit is not an error here: the process ran to completion and
/// the caller decides what its status means.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("could not launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("i/o failure while waiting for the solver: {0}")]
    Wait(#[from] std::io::Error),
}

/// Spawn `program` with `args`, capture stdout/stderr, and enforce a
/// wall-clock timeout. The child is killed if the timeout fires.
pub async fn run_command(
    program: &str,
    args: &[String],
    workdir: Option<&Path>,
    timeout: Duration,
) -> Result<SolverRun, SolverError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }

    debug!(program = program, args = ?args, "spawning");

    let child = command.spawn().map_err(|source| SolverError::Launch {
        command: program.to_string(),
        source,
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => Err(SolverError::Timeout(timeout)),
        Ok(Err(source)) => Err(SolverError::Wait(source)),
        Ok(Ok(output)) => Ok(SolverRun {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
    }
}

/// Capability interface over the external solver.
pub trait SolverEngine {
    /// Submit one job and wait for the process to finish or time out.
    fn submit(
        &self,
        job: SolverJob<'_>,
    ) -> impl Future<Output = Result<SolverRun, SolverError>> + Send;
}

/// Production engine: runs scripts through the FreeFEM executable in
/// no-window mode (`FreeFem++ -nw <script> ...`).
#[derive(Debug, Clone)]
pub struct FreeFemEngine {
    command: String,
}

impl FreeFemEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Default for FreeFemEngine {
    fn default() -> Self {
        Self::new("FreeFem++")
    }
}

impl SolverEngine for FreeFemEngine {
    async fn submit(&self, job: SolverJob<'_>) -> Result<SolverRun, SolverError> {
        let mut args = Vec::with_capacity(job.args.len() + 2);
        args.push("-nw".to_string());
        args.push(job.script.display().to_string());
        args.extend_from_slice(job.args);
        run_command(&self.command, &args, Some(job.workdir), job.timeout).await
    }
}
