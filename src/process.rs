//! Managed external processes.
//!
//! The orchestration logic never talks to [`std::process`] directly. It goes
//! through the [`ProcessManager`] / [`ProcessHandle`] pair so that the whole
//! slot lifecycle can be exercised in tests with a scripted fake manager,
//! and so platform details (process groups, signals) stay in one place.
//!
//! [`OsProcessManager`] is the production implementation. Detached processes
//! (the battle servers) are placed in their own process group and terminated
//! by signalling the group, so a server that forked helpers does not leave
//! orphans behind.

use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{error, trace};

use crate::interrupt::CancelToken;

/// Where a child's combined stdout/stderr should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Discard both streams.
    Suppress,
    /// Append both streams to a single file, created (truncated) at spawn.
    LogFile(PathBuf),
}

/// A fully described command, ready to be launched by a [`ProcessManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory for the child, if different from the caller's.
    pub cwd: Option<PathBuf>,
    /// Output disposition.
    pub output: OutputMode,
    /// Detach the child into its own process group so it survives terminal
    /// signals aimed at the caller and can be torn down as a group.
    pub detach: bool,
}

impl CommandSpec {
    /// A foreground command with suppressed output.
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: vec![],
            cwd: None,
            output: OutputMode::Suppress,
            detach: false,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the child's working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Redirect combined stdout/stderr to `path`.
    #[must_use]
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = OutputMode::LogFile(path.into());
        self
    }

    /// Detach the child into its own process group.
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.detach = true;
        self
    }
}

/// Exit state of a finished child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Process exited with this code.
    Exited(i32),
    /// Process was terminated by a signal (or exited without a code).
    Signaled,
}

impl ExitStatus {
    /// True for exit code zero.
    #[must_use]
    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled => write!(f, "killed by signal"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitStatus::Exited(code),
            None => ExitStatus::Signaled,
        }
    }
}

/// A running (or finished) child owned by exactly one caller.
pub trait ProcessHandle {
    /// OS process identifier, for logging.
    fn id(&self) -> u32;

    /// Non-blocking check for completion. Returns the exit status once the
    /// child has finished; subsequent calls keep returning it.
    fn poll(&mut self) -> anyhow::Result<Option<ExitStatus>>;

    /// Terminate the child (and its process group, when detached) and reap
    /// it. Safe to call on an already finished child.
    fn terminate(&mut self) -> anyhow::Result<()>;
}

/// Launches external processes. Implemented by [`OsProcessManager`] for real
/// processes and by test fakes for orchestration tests.
pub trait ProcessManager: Send + Sync {
    /// Concrete handle type for children of this manager.
    type Handle: ProcessHandle;

    /// Start the described command.
    ///
    /// # Errors
    /// Returns an error when the program cannot be spawned (not found, log
    /// file not writable, ...). A child that starts and then fails is *not*
    /// an error here; that shows up through [`ProcessHandle::poll`].
    fn launch(&self, spec: &CommandSpec) -> anyhow::Result<Self::Handle>;
}

/// The production [`ProcessManager`] over [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessManager;

impl OsProcessManager {
    /// Create a manager. Stateless; all state lives in the handles.
    #[must_use]
    pub fn new() -> Self {
        OsProcessManager
    }
}

impl ProcessManager for OsProcessManager {
    type Handle = OsProcess;

    fn launch(&self, spec: &CommandSpec) -> anyhow::Result<OsProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        match &spec.output {
            OutputMode::Suppress => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
            OutputMode::LogFile(path) => {
                let out = File::create(path)
                    .with_context(|| format!("could not create log file {}", path.display()))?;
                let err = out
                    .try_clone()
                    .with_context(|| format!("could not reopen log file {}", path.display()))?;
                cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
        }
        #[cfg(unix)]
        if spec.detach {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("command '{}' not found", spec.program))?;
        trace!(program = %spec.program, pid = child.id(), detach = spec.detach, "spawned");

        Ok(OsProcess {
            child,
            detached: spec.detach,
            status: None,
        })
    }
}

/// Handle to a real OS child process.
///
/// The child is killed on drop if it was neither reaped nor terminated; a
/// slot that panics does not leave a stray server running.
#[derive(Debug)]
pub struct OsProcess {
    child: Child,
    detached: bool,
    status: Option<ExitStatus>,
}

impl OsProcess {
    /// How long to wait after SIGTERM before escalating to SIGKILL.
    const KILL_GRACE: Duration = Duration::from_secs(2);

    #[cfg(unix)]
    fn signal_term(&self) -> bool {
        let pid = self.child.id() as libc::pid_t;
        let rc = if self.detached {
            // detached children are their own group leader
            unsafe { libc::killpg(pid, libc::SIGTERM) }
        } else {
            unsafe { libc::kill(pid, libc::SIGTERM) }
        };
        rc == 0
    }

    #[cfg(not(unix))]
    fn signal_term(&self) -> bool {
        false
    }
}

impl ProcessHandle for OsProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn poll(&mut self) -> anyhow::Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let status = self
            .child
            .try_wait()
            .context("could not poll child process")?;
        if let Some(status) = status {
            self.status = Some(status.into());
        }
        Ok(self.status)
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        if self.poll()?.is_some() {
            return Ok(());
        }
        if self.signal_term() {
            let deadline = Instant::now() + Self::KILL_GRACE;
            while Instant::now() < deadline {
                if self.poll()?.is_some() {
                    trace!(pid = self.id(), "terminated after SIGTERM");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        self.child.kill().context("could not kill child process")?;
        let status = self
            .child
            .wait()
            .context("could not reap killed child process")?;
        self.status = Some(status.into());
        trace!(pid = self.id(), "killed");
        Ok(())
    }
}

impl Drop for OsProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(e) = self.terminate() {
                error!(pid = self.id(), "could not clean up child process on drop: {e:#}");
            }
        }
    }
}

/// Result of waiting cancellably on a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    /// Child finished on its own.
    Exited(ExitStatus),
    /// Cancellation was requested before the child finished; the child has
    /// NOT been touched.
    Cancelled,
}

/// Block until the child exits or `token` is cancelled, polling both at
/// `interval`.
pub(crate) fn wait_or_cancel<H: ProcessHandle>(
    handle: &mut H,
    token: &CancelToken,
    interval: Duration,
) -> anyhow::Result<Wait> {
    loop {
        if let Some(status) = handle.poll()? {
            return Ok(Wait::Exited(status));
        }
        if token.is_cancelled() {
            return Ok(Wait::Cancelled);
        }
        std::thread::sleep(interval);
    }
}
