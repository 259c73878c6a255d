//! Managed child processes.
//!
//! A [`ManagedProcess`] owns one shell command: it spawns it in its own
//! process group, forwards its output to the shared sink, and accepts
//! graceful and forceful stop requests from the supervisor at any time.

use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::output::OutputSink;

/// Exit code reported for a command that could not be launched at all.
pub const LAUNCH_FAILURE_CODE: i32 = 127;

/// How long to keep reading output after the child exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// One named entry from the process list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDefinition {
    pub name: String,
    pub command: String,
    /// Exported to the child as `PORT`.
    pub port: Option<u16>,
}

/// Lifecycle of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Waiting for its runner to spawn the child.
    NotStarted,
    /// The child is alive and has not been asked to stop.
    Running { pid: u32 },
    /// SIGINT (or CTRL_BREAK) was sent to the child's process group.
    Interrupting { pid: u32 },
    /// A forceful kill was requested.
    Killing { pid: u32 },
    /// The child is gone and its output drained.
    Stopped { code: i32 },
    /// A stop request arrived before the child was spawned.
    Cancelled,
}

/// What the supervisor needs from a process it manages.
pub trait ProcessHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the process to completion and reports whether it succeeded.
    ///
    /// Called exactly once. Resolves only after the process has fully
    /// stopped and its output has been flushed.
    fn run(&self) -> impl Future<Output = bool> + Send;

    /// Asks the process to shut down. No-op once it is stopping or stopped.
    fn interrupt(&self);

    /// Terminates the process. No-op once it is stopped.
    fn kill(&self);

    /// Final exit code, available after `run` resolved.
    fn exit_code(&self) -> Option<i32>;
}

pub struct ManagedProcess {
    definition: ProcessDefinition,
    color: u8,
    root: PathBuf,
    output: Arc<OutputSink>,
    status: Mutex<ProcessStatus>,
    kill_requested: Notify,
}

impl ManagedProcess {
    pub fn new(
        definition: ProcessDefinition,
        color: u8,
        root: PathBuf,
        output: Arc<OutputSink>,
    ) -> Self {
        Self {
            definition,
            color,
            root,
            output,
            status: Mutex::new(ProcessStatus::NotStarted),
            kill_requested: Notify::new(),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        *self.lock_status()
    }

    fn lock_status(&self) -> MutexGuard<'_, ProcessStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: ProcessStatus) {
        *self.lock_status() = status;
    }

    fn announce(&self, message: &str) {
        self.output
            .write_status(&self.definition.name, self.color, message);
    }

    fn command(&self) -> Command {
        let mut command = shell_command(&self.definition.command);
        command
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(port) = self.definition.port {
            command.env("PORT", port.to_string());
        }

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        // Own process group: stop requests reach the whole command tree, and a
        // terminal Ctrl-C reaches only the supervisor.
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        command
    }

    // Records the spawned pid, applying a stop request that raced the spawn.
    fn mark_started(&self, pid: u32) {
        let mut status = self.lock_status();
        if *status == ProcessStatus::Cancelled {
            *status = ProcessStatus::Interrupting { pid };
            send_interrupt(pid);
        } else {
            *status = ProcessStatus::Running { pid };
        }
    }

    async fn run_child(&self) -> bool {
        if self.status() == ProcessStatus::Cancelled {
            debug!(process = %self.definition.name, "stop requested before launch, not starting");
            return false;
        }
        self.launch().await
    }

    // Stop requests may still land between the check above and the spawn.
    async fn launch(&self) -> bool {
        let name = self.definition.name.as_str();
        self.announce("Running...");
        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(process = %name, error = %err, "failed to start process");
                self.announce(&format!("Failed to start: {}", err));
                self.set_status(ProcessStatus::Stopped {
                    code: LAUNCH_FAILURE_CODE,
                });
                return false;
            }
        };
        let pid = child.id().unwrap_or(0);
        info!(process = %name, pid, command = %self.definition.command, "process started");
        self.mark_started(pid);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(stderr));
        }

        let waited = tokio::select! {
            status = child.wait() => status,
            _ = self.kill_requested.notified() => {
                self.set_status(ProcessStatus::Killing { pid });
                force_kill(&mut child, pid);
                child.wait().await
            }
        };
        drain_readers(readers).await;

        let (code, succeeded) = match waited {
            Ok(status) => (exit_code_of(status), status.success()),
            Err(err) => {
                warn!(process = %name, error = %err, "failed to wait for process");
                (1, false)
            }
        };
        info!(process = %name, code, "process exited");
        self.announce(&format!("Exited with code {}", code));
        self.set_status(ProcessStatus::Stopped { code });
        succeeded
    }

    fn spawn_reader<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(forward_lines(
            reader,
            Arc::clone(&self.output),
            self.definition.name.clone(),
            self.color,
        ))
    }
}

impl ProcessHandle for ManagedProcess {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn run(&self) -> impl Future<Output = bool> + Send {
        self.run_child()
    }

    fn interrupt(&self) {
        let mut status = self.lock_status();
        match *status {
            ProcessStatus::NotStarted => *status = ProcessStatus::Cancelled,
            ProcessStatus::Running { pid } => {
                *status = ProcessStatus::Interrupting { pid };
                self.announce("Interrupting...");
                send_interrupt(pid);
            }
            _ => {}
        }
    }

    fn kill(&self) {
        let mut status = self.lock_status();
        match *status {
            // The permit is kept by `Notify`, so a spawn racing this request
            // is force-killed as soon as it starts waiting.
            ProcessStatus::NotStarted | ProcessStatus::Cancelled => {
                *status = ProcessStatus::Cancelled;
                self.kill_requested.notify_one();
            }
            ProcessStatus::Running { pid } | ProcessStatus::Interrupting { pid } => {
                *status = ProcessStatus::Killing { pid };
                self.announce("Killing...");
                self.kill_requested.notify_one();
            }
            _ => {}
        }
    }

    fn exit_code(&self) -> Option<i32> {
        match self.status() {
            ProcessStatus::Stopped { code } => Some(code),
            _ => None,
        }
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    }
}

/// Exit code as a shell would report it: signal deaths map to `128 + signal`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

async fn forward_lines<R>(reader: R, output: Arc<OutputSink>, name: String, color: u8)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                output.write_line(&name, color, line.trim_end_matches(['\n', '\r']));
            }
        }
    }
}

// A grandchild may keep a pipe open after the child itself is gone.
async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

fn force_kill(child: &mut tokio::process::Child, pid: u32) {
    #[cfg(unix)]
    signal_group(pid, libc::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.start_kill();
}

#[cfg(unix)]
fn send_interrupt(pid: u32) {
    signal_group(pid, libc::SIGINT);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    if pid == 0 {
        return;
    }
    let pid = pid as libc::pid_t;
    unsafe {
        if libc::kill(-pid, signal) != 0 {
            let _ = libc::kill(pid, signal);
        }
    }
}

#[cfg(windows)]
fn send_interrupt(pid: u32) {
    use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;
    use windows_sys::Win32::System::Console::CTRL_BREAK_EVENT;
    // Closest console equivalent of SIGINT for a new process group.
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(all(not(unix), not(windows)))]
fn send_interrupt(_pid: u32) {}
