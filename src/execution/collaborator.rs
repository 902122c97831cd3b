//! External collaborators - the opaque executables steps invoke

use crate::core::{
    context::StepContext,
    secret::{Redactor, SecretError},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Exit status of an invoked collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);

    pub fn from_code(code: i32) -> Self {
        Self(code)
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn success(&self) -> bool {
        self.0 == 0
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatus(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus(128 + signal);
            }
        }
        ExitStatus(-1)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}", self.0)
    }
}

/// Failure to invoke a collaborator at all (as opposed to a non-zero exit)
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to make '{path}' executable: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("step credential unavailable: {0}")]
    Credential(#[from] SecretError),

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Anything a step can invoke
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Run to completion and report the exit status
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ExitStatus, CollaboratorError>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// An inline shell command run with `sh -c`
#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Collaborator for ShellCommand {
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ExitStatus, CollaboratorError> {
        let rendered = ctx.run.render(&self.command);
        debug!("[{}/{}] sh -c {}", ctx.stage, ctx.step, rendered);

        let mut command = Command::new("sh");
        command.arg("-c").arg(&rendered);
        let label = format!("{}/{}", ctx.stage, ctx.step);
        run_process(command, "sh", ctx.workspace(), &ctx.env, &label, &ctx.redactor).await
    }

    fn describe(&self) -> String {
        self.command.clone()
    }
}

/// An external script, made executable before it is invoked
#[derive(Debug, Clone)]
pub struct Script {
    path: PathBuf,
    args: Vec<String>,
}

impl Script {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Collaborator for Script {
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ExitStatus, CollaboratorError> {
        let path = ctx.run.resolve_path(&self.path);
        if !path.is_file() {
            return Err(CollaboratorError::NotFound(path));
        }
        make_executable(&path)?;

        let args: Vec<String> = self.args.iter().map(|a| ctx.run.render(a)).collect();
        debug!("[{}/{}] {} {:?}", ctx.stage, ctx.step, path.display(), args);

        let program = path.display().to_string();
        let mut command = Command::new(&path);
        command.args(&args);
        let label = format!("{}/{}", ctx.stage, ctx.step);
        run_process(command, &program, ctx.workspace(), &ctx.env, &label, &ctx.redactor).await
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.path.display().to_string()
        } else {
            format!("{} {}", self.path.display(), self.args.join(" "))
        }
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), CollaboratorError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions_error = |source| CollaboratorError::Permissions {
        path: path.to_path_buf(),
        source,
    };
    let mut permissions = std::fs::metadata(path).map_err(permissions_error)?.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0o111 {
        permissions.set_mode(mode | 0o111);
        std::fs::set_permissions(path, permissions).map_err(permissions_error)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), CollaboratorError> {
    Ok(())
}

/// Spawn `command` in `workdir` with `env` added, forwarding its output to the log.
///
/// The child is killed if the returned future is dropped.
pub(crate) async fn run_process(
    mut command: Command,
    program: &str,
    workdir: &Path,
    env: &BTreeMap<String, String>,
    label: &str,
    redactor: &Redactor,
) -> Result<ExitStatus, CollaboratorError> {
    command
        .current_dir(workdir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| CollaboratorError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, _, _) = tokio::join!(
        child.wait(),
        forward_lines(stdout, label, false, redactor),
        forward_lines(stderr, label, true, redactor),
    );

    let status = status.map_err(|source| CollaboratorError::Wait {
        program: program.to_string(),
        source,
    })?;
    Ok(ExitStatus::from(status))
}

async fn forward_lines<R: AsyncRead + Unpin>(
    reader: Option<R>,
    label: &str,
    is_stderr: bool,
    redactor: &Redactor,
) {
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = redactor.redact(&line);
        if is_stderr {
            warn!("[{}] {}", label, line);
        } else {
            info!("[{}] {}", label, line);
        }
    }
}
