//! Process supervision: launch, poll, wait, terminate

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::pid1::missing_defaults;
use crate::units::ExecCommand;

/// Children spawned by this process that nobody has waited for yet
static TRACKED: Mutex<BTreeSet<i32>> = Mutex::new(BTreeSet::new());

/// Lock the table of our own children. The orphan reaper holds this while
/// it collects, so nothing it reaps can belong to a live `Child`.
pub fn tracked_children() -> MutexGuard<'static, BTreeSet<i32>> {
    TRACKED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn with the table locked so the child is never visible untracked
pub(crate) fn spawn_tracked(command: &mut Command) -> io::Result<Child> {
    let mut tracked = tracked_children();
    let child = command.spawn()?;
    if let Some(pid) = child.id() {
        tracked.insert(pid as i32);
    }
    Ok(child)
}

pub(crate) fn untrack(pid: u32) {
    tracked_children().remove(&(pid as i32));
}

/// Command for `cmd` with stdin closed and the init defaults for any unset
/// PATH, HOME, SHELL or TERM
pub(crate) fn command_for(cmd: &ExecCommand) -> Command {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::null())
        .envs(missing_defaults(|k| std::env::var(k).ok()));
    command
}

/// Identity of a launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID {}", self.pid)
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Process exited normally with code
    Exited(i32),
    /// Process killed by signal
    Signaled(i32),
    /// Unknown status
    Unknown,
}

impl ExitStatus {
    fn from_std(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ExitStatus::Exited(code)
        } else if let Some(sig) = status.signal() {
            ExitStatus::Signaled(sig)
        } else {
            ExitStatus::Unknown
        }
    }

    /// Shell-style exit code (128 + signal for signaled processes)
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(sig) => 128 + sig,
            ExitStatus::Unknown => -1,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled(sig) => write!(f, "killed by signal {}", sig),
            ExitStatus::Unknown => f.write_str("unknown status"),
        }
    }
}

/// Owns every child process launched on behalf of a unit
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    children: HashMap<ProcessHandle, Child>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `cmd` as a child process in its own process group
    pub fn launch(&mut self, cmd: &ExecCommand) -> Result<ProcessHandle, LaunchError> {
        let mut command = command_for(cmd);
        command
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);

        let child = spawn_tracked(&mut command).map_err(|e| LaunchError::Spawn {
            command: cmd.to_string(),
            source: e,
        })?;

        let pid = child
            .id()
            .ok_or_else(|| LaunchError::ExitedImmediately(cmd.to_string()))?;
        let handle = ProcessHandle { pid };

        log::debug!("Launched {} ({})", cmd, handle);
        self.children.insert(handle, child);
        Ok(handle)
    }

    /// Non-blocking check. Returns the exit status once the process is gone
    /// and forgets it.
    pub fn poll(&mut self, handle: ProcessHandle) -> Result<Option<ExitStatus>, LaunchError> {
        let child = self
            .children
            .get_mut(&handle)
            .ok_or(LaunchError::NotSupervised(handle))?;

        match child.try_wait().map_err(LaunchError::Wait)? {
            Some(status) => {
                self.children.remove(&handle);
                untrack(handle.pid);
                Ok(Some(ExitStatus::from_std(status)))
            }
            None => Ok(None),
        }
    }

    /// Block until the process exits
    pub async fn wait(&mut self, handle: ProcessHandle) -> Result<ExitStatus, LaunchError> {
        let mut child = self
            .children
            .remove(&handle)
            .ok_or(LaunchError::NotSupervised(handle))?;

        let status = child.wait().await;
        untrack(handle.pid);
        Ok(ExitStatus::from_std(status.map_err(LaunchError::Wait)?))
    }

    /// SIGTERM to the whole process group, wait up to `grace` for the
    /// leader, then SIGKILL the group
    pub async fn terminate(
        &mut self,
        handle: ProcessHandle,
        grace: Duration,
    ) -> Result<ExitStatus, LaunchError> {
        let mut child = self
            .children
            .remove(&handle)
            .ok_or(LaunchError::NotSupervised(handle))?;

        signal_group(handle, Signal::SIGTERM);

        let status = match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                log::warn!("{} did not exit within {:?}, sending SIGKILL", handle, grace);
                signal_group(handle, Signal::SIGKILL);
                child.wait().await
            }
        };
        untrack(handle.pid);
        let status = status.map_err(LaunchError::Wait)?;

        // Background children the leader left behind share its group
        signal_group(handle, Signal::SIGKILL);
        Ok(ExitStatus::from_std(status))
    }

    pub fn is_supervised(&self, handle: ProcessHandle) -> bool {
        self.children.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

fn signal_group(handle: ProcessHandle, signal: Signal) {
    match killpg(Pid::from_raw(handle.pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to send {:?} to group of {}: {}", signal, handle, e),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} exited before it could be tracked")]
    ExitedImmediately(String),

    #[error("{0} is not supervised")]
    NotSupervised(ProcessHandle),

    #[error("Wait failed: {0}")]
    Wait(#[source] std::io::Error),
}
