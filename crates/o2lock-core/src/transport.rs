//! Sources of raw `locking_state` lines.
//!
//! A transport never fails from the caller's point of view: any problem is
//! logged and reported as an empty batch, and the freshness sweep of the
//! node's series takes care of recovery.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::TransportError;

/// Directory under which OCFS2 publishes per-lockspace debug files.
pub const DEBUGFS_ROOT: &str = "/sys/kernel/debug/ocfs2";

/// Path of the `locking_state` file of `lockspace`.
pub fn locking_state_path(lockspace: &str) -> PathBuf {
    Path::new(DEBUGFS_ROOT).join(lockspace).join("locking_state")
}

/// Hostname of this machine, or `localhost` if it cannot be read.
pub fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

/// Fetches one node's raw lines.
pub trait Transport: Send {
    /// Node name shown in detailed report rows.
    fn label(&self) -> &str;

    /// This cycle's lines; empty on any failure.
    fn fetch(&mut self) -> Vec<String>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn fetch(&mut self) -> Vec<String> {
        (**self).fetch()
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_owned)
        .collect()
}

/// Reads a `locking_state` file on this machine.
#[derive(Debug, Clone)]
pub struct FileTransport {
    path: PathBuf,
    label: String,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }

    /// The debugfs file of `lockspace`, labelled with the local hostname.
    pub fn local(lockspace: &str) -> Self {
        Self::new(locking_state_path(lockspace), local_hostname())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<String>, TransportError> {
        let text = fs::read_to_string(&self.path).map_err(|source| TransportError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(split_lines(&text))
    }
}

impl Transport for FileTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn fetch(&mut self) -> Vec<String> {
        match self.read() {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(node = %self.label, error = %e, "fetch failed");
                Vec::new()
            }
        }
    }
}

/// Pulls a remote `locking_state` over ssh.
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    user: String,
    remote_path: PathBuf,
    timeout: Duration,
}

impl SshTransport {
    pub fn new(host: impl Into<String>, user: impl Into<String>, lockspace: &str, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            remote_path: locking_state_path(lockspace),
            timeout,
        }
    }

    /// `ssh -oBatchMode=yes <user>@<host> cat <path>`
    pub fn command(&self) -> Command {
        let mut cmd = ssh_command(&self.user, &self.host);
        cmd.arg("cat").arg(&self.remote_path);
        cmd
    }
}

impl Transport for SshTransport {
    fn label(&self) -> &str {
        &self.host
    }

    fn fetch(&mut self) -> Vec<String> {
        match capture_output(self.command(), self.timeout) {
            Ok(text) => split_lines(&text),
            Err(e) => {
                tracing::warn!(node = %self.host, error = %e, "fetch failed");
                Vec::new()
            }
        }
    }
}

/// Non-interactive ssh invocation for `user@host`, without a remote command.
pub fn ssh_command(user: &str, host: &str) -> Command {
    let mut cmd = Command::new("ssh");
    cmd.arg("-oBatchMode=yes").arg(format!("{user}@{host}"));
    cmd
}

/// Kill and reap a child whose output is no longer wanted.
fn abandon(child: &mut Child, program: &str) {
    if let Err(e) = child.kill() {
        tracing::debug!(program, error = %e, "kill failed");
    }
    if let Err(e) = child.wait() {
        tracing::debug!(program, error = %e, "reaping failed");
    }
}

/// Run `cmd` and return its stdout, killing it after `timeout`.
pub fn capture_output(mut cmd: Command, timeout: Duration) -> Result<String, TransportError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| TransportError::Spawn {
            program: program.clone(),
            source,
        })?;

    let Some(mut stdout) = child.stdout.take() else {
        abandon(&mut child, &program);
        return Err(TransportError::Output {
            program,
            source: std::io::Error::other("stdout not captured"),
        });
    };

    // Drain stdout off-thread; the deadline is enforced on the channel.
    let (tx, rx) = mpsc::channel();
    let reader = thread::Builder::new()
        .name(format!("{program}-stdout"))
        .spawn(move || {
            let mut buf = Vec::new();
            let result = stdout.read_to_end(&mut buf).map(|_| buf);
            if tx.send(result).is_err() {
                tracing::trace!("output reader outlived its deadline");
            }
        });
    if let Err(source) = reader {
        abandon(&mut child, &program);
        return Err(TransportError::Spawn { program, source });
    }

    let output = match rx.recv_timeout(timeout) {
        Ok(Ok(buf)) => buf,
        Ok(Err(source)) => {
            abandon(&mut child, &program);
            return Err(TransportError::Output { program, source });
        }
        Err(_) => {
            abandon(&mut child, &program);
            return Err(TransportError::Timeout { program, timeout });
        }
    };

    let status = child.wait().map_err(|source| TransportError::Output {
        program: program.clone(),
        source,
    })?;
    if !status.success() {
        return Err(TransportError::Exit { program, status });
    }

    String::from_utf8(output).map_err(|_| TransportError::NotUtf8 { program })
}
