//! Running the Meda CLI as a subprocess.
//!
//! Short calls use [`run_captured`], which collects both streams. Long calls
//! (image creation, pulls, pushes) use [`run_streamed`]: two reader tasks drain
//! stdout and stderr into the log as lines arrive, stderr is also buffered, and
//! both readers are joined before the caller sees the output. The caller can
//! then scan the buffered text with [`contains_denial`], since the backend may
//! exit successfully even when a registry refused the request.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LocalBackend;
use crate::error::{Error, Result};

/// Markers that mean the backend was refused, whatever its exit code says.
const DENIAL_MARKERS: [&str; 3] = ["unauthorized", "denied", "authentication required"];

/// How to launch the Meda CLI: a binary, or `cargo run --` in a source checkout.
#[derive(Debug, Clone)]
pub struct MedaCommand {
    program: PathBuf,
    prefix: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl MedaCommand {
    pub fn new(backend: &LocalBackend) -> Self {
        match backend {
            LocalBackend::Binary(path) => Self {
                program: path.clone(),
                prefix: Vec::new(),
                current_dir: None,
            },
            LocalBackend::Cargo { source_dir } => Self {
                program: PathBuf::from("cargo"),
                prefix: vec!["run".to_owned(), "--".to_owned()],
                current_dir: Some(source_dir.clone()),
            },
        }
    }

    /// Full argument vector for a Meda subcommand, including the launcher prefix.
    pub fn args(&self, args: &[String]) -> Vec<String> {
        self.prefix.iter().chain(args).cloned().collect()
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Build a command for `args`, with piped output.
    pub fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        debug!(program = %self.program.display(), args = ?self.args(args), "running meda");
        cmd
    }
}

/// Exit status plus captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// stdout followed by stderr, the way a terminal would interleave them.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Run to completion and capture both streams.
pub async fn run_captured(mut cmd: Command) -> Result<CommandOutput> {
    let program = program_name(&cmd);
    let output = cmd
        .output()
        .await
        .map_err(|source| Error::SpawnFailed { program, source })?;
    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run while forwarding every output line to the log.
///
/// Cancelling `cancel` sends SIGTERM to the child, reaps it, and returns
/// [`Error::Cancelled`].
pub async fn run_streamed(mut cmd: Command, cancel: &CancellationToken) -> Result<CommandOutput> {
    let program = program_name(&cmd);
    let mut child = cmd
        .spawn()
        .map_err(|source| Error::SpawnFailed { program, source })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(drain(stdout, "stdout"));
    let stderr_task = tokio::spawn(drain(stderr, "stderr"));

    let status = tokio::select! {
        () = cancel.cancelled() => {
            warn!("cancelling meda subprocess");
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            child.wait().await.ok();
            // Grandchildren may still hold the pipes open.
            stdout_task.abort();
            stderr_task.abort();
            return Err(Error::Cancelled);
        }
        status = child.wait() => status?,
    };

    // Both readers must reach EOF before stderr is evaluated.
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

/// Whether `text` carries an authorization-denial marker.
pub fn contains_denial(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    DENIAL_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Log and buffer every line of `stream` until EOF.
///
/// Lines are split on raw bytes so that output which is not valid UTF-8 does
/// not end the read early.
async fn drain<R>(stream: Option<R>, name: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(stream) = stream else {
        return captured;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                info!(stream = name, "{line}");
                captured.push_str(line);
                captured.push('\n');
            }
            Err(err) => {
                warn!(stream = name, error = %err, "output read failed");
                break;
            }
        }
    }
    captured
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}
