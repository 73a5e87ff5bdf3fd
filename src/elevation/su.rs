//! `su`-backed elevation.
//!
//! A session is one long-lived `su` (or `sh`, when the process is already
//! root) child. Each command is written to its stdin followed by an `echo` of
//! a marker line carrying the command id and `$?`. A reader task collects the
//! marker lines so that `try_exit_code` never blocks.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::error::ShellError;
use crate::runtime::Runtime;

use super::{CommandId, Elevation, ShellSession};

const DONE_MARKER: &str = "__SYSAPP_DONE__";
const READY_MARKER: &str = "__SYSAPP_READY__";

/// How long the user gets to answer the su consent prompt.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `su -c "id -u"` may take before access counts as not granted.
const ACCESS_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SuElevation<R: Runtime> {
    runtime: R,
    su_binary: String,
    granted: AtomicBool,
    check_timeout: Duration,
}

impl<R: Runtime> SuElevation<R> {
    pub fn new(runtime: R, su_binary: impl Into<String>) -> Self {
        Self {
            runtime,
            su_binary: su_binary.into(),
            granted: AtomicBool::new(false),
            check_timeout: ACCESS_CHECK_TIMEOUT,
        }
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Ask su for the uid it would run as. `None` when su could not be run or
    /// did not answer in time; the child is killed in that case.
    async fn query_uid(&self) -> Option<String> {
        let output = Command::new(&self.su_binary)
            .args(["-c", "id -u"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.check_timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => {
                debug!("{} access check exited with {}", self.su_binary, output.status);
                None
            }
            Ok(Err(e)) => {
                debug!("{} access check failed: {}", self.su_binary, e);
                None
            }
            Err(_) => {
                warn!(
                    "no answer from {} within {:?}, treating root as not granted",
                    self.su_binary, self.check_timeout
                );
                None
            }
        }
    }

    /// Program that provides the elevated shell.
    fn shell_program(&self) -> &str {
        if self.runtime.is_privileged() {
            "sh"
        } else {
            &self.su_binary
        }
    }
}

#[async_trait]
impl<R: Runtime> Elevation for SuElevation<R> {
    fn is_available(&self) -> bool {
        self.runtime.is_privileged() || self.runtime.find_executable(&self.su_binary).is_some()
    }

    async fn is_access_given(&self) -> bool {
        if self.runtime.is_privileged() || self.granted.load(Ordering::SeqCst) {
            return true;
        }
        if !self.is_available() {
            return false;
        }

        match self.query_uid().await {
            Some(uid) if uid == "0" => {
                self.granted.store(true, Ordering::SeqCst);
                true
            }
            Some(uid) => {
                debug!("{} reported uid {}", self.su_binary, uid);
                false
            }
            None => false,
        }
    }

    async fn open_session(&self) -> Result<Box<dyn ShellSession>, ShellError> {
        let program = self.shell_program().to_string();
        let session = SuSession::spawn(&program).await?;
        self.granted.store(true, Ordering::SeqCst);
        Ok(Box::new(session))
    }
}

pub struct SuSession {
    child: Child,
    stdin: Option<ChildStdin>,
    done_rx: mpsc::UnboundedReceiver<(CommandId, i32)>,
    finished: HashMap<CommandId, i32>,
    next_id: CommandId,
}

impl SuSession {
    /// Spawn `program` as a command shell and wait until it answers.
    pub async fn spawn(program: &str) -> Result<Self, ShellError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ShellError::AccessDenied(format!("cannot start {}: {}", program, e))
                }
                _ => ShellError::Io(format!("cannot start {}: {}", program, e)),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::Io("shell stdout not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::Io("shell stdin not captured".to_string()))?;

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_markers(BufReader::new(stdout), ready_tx, done_tx));

        let mut session = Self {
            child,
            stdin: Some(stdin),
            done_rx,
            finished: HashMap::new(),
            next_id: 1,
        };

        session.write_line(&format!("echo {}", READY_MARKER)).await?;
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {
                debug!("privileged shell {} ready", program);
                Ok(session)
            }
            Ok(Err(_)) => Err(ShellError::AccessDenied(format!(
                "{} exited before granting a shell",
                program
            ))),
            Err(_) => Err(ShellError::AccessDenied(format!(
                "no answer from {} within {:?}",
                program, HANDSHAKE_TIMEOUT
            ))),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ShellError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ShellError::Io("privileged shell already closed".to_string()))?;
        stdin
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| ShellError::Io(e.to_string()))?;
        stdin.flush().await.map_err(|e| ShellError::Io(e.to_string()))
    }
}

/// Parse `__SYSAPP_DONE__ <id> <code>` lines; everything else is command output.
fn parse_done_marker(line: &str) -> Option<(CommandId, i32)> {
    let start = line.find(DONE_MARKER)?;
    let mut fields = line[start + DONE_MARKER.len()..].split_whitespace();
    let id = fields.next()?.parse().ok()?;
    let code = fields.next()?.parse().ok()?;
    Some((id, code))
}

async fn read_markers<T>(
    mut reader: BufReader<T>,
    ready_tx: tokio::sync::oneshot::Sender<()>,
    done_tx: mpsc::UnboundedSender<(CommandId, i32)>,
) where
    T: tokio::io::AsyncRead + Unpin,
{
    let mut ready_tx = Some(ready_tx);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("privileged shell read failed: {}", e);
                break;
            }
        }

        if line.contains(READY_MARKER) {
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(());
            }
        } else if let Some(done) = parse_done_marker(&line) {
            if done_tx.send(done).is_err() {
                break;
            }
        } else {
            debug!("shell: {}", line.trim_end());
        }
    }
}

#[async_trait]
impl ShellSession for SuSession {
    async fn submit(&mut self, command: &str) -> Result<CommandId, ShellError> {
        let id = self.next_id;
        self.next_id += 1;
        self.write_line(command).await?;
        self.write_line(&format!("echo \"{} {} $?\"", DONE_MARKER, id))
            .await?;
        Ok(id)
    }

    fn try_exit_code(&mut self, id: CommandId) -> Result<Option<i32>, ShellError> {
        loop {
            match self.done_rx.try_recv() {
                Ok((done_id, code)) => {
                    self.finished.insert(done_id, code);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if let Some(code) = self.finished.remove(&id) {
                        return Ok(Some(code));
                    }
                    return Err(ShellError::Io("privileged shell exited".to_string()));
                }
            }
        }
        Ok(self.finished.remove(&id))
    }

    async fn close(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"exit\n").await;
        }
        if let Err(e) = self.child.wait().await {
            warn!("privileged shell did not exit cleanly: {}", e);
        }
    }
}
