//! Lifecycle hooks
//!
//! Each unit carries an optional set of behaviours invoked at specific
//! transitions. A missing hook is a no-op that succeeds.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::process::{command_for, spawn_tracked, untrack};
use crate::units::ExecCommand;

pub type HookFn = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;
pub type StatusFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Transition a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    Start,
    Stop,
    Reload,
    PreInstall,
    PostInstall,
    PreRemove,
    PostRemove,
}

impl HookPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reload => "reload",
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
            Self::PreRemove => "pre-remove",
            Self::PostRemove => "post-remove",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single hook: an in-process callback or an external command
#[derive(Clone)]
pub enum Hook {
    Callback(HookFn),
    Command(ExecCommand),
}

impl Hook {
    pub fn callback(f: impl Fn() -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(f))
    }

    pub fn command(cmd: ExecCommand) -> Self {
        Self::Command(cmd)
    }

    /// Run the hook. Commands must exit 0 within `timeout`.
    pub async fn run(&self, timeout: Duration) -> Result<(), HookError> {
        match self {
            Self::Callback(f) => f().map_err(HookError::Failed),
            Self::Command(cmd) => run_command(cmd, timeout).await,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Command(cmd) => write!(f, "Command({})", cmd),
        }
    }
}

async fn run_command(cmd: &ExecCommand, timeout: Duration) -> Result<(), HookError> {
    log::debug!("Running hook command: {}", cmd);

    let mut command = command_for(cmd);
    command.kill_on_drop(true);
    let mut child = spawn_tracked(&mut command).map_err(|e| HookError::Spawn {
        command: cmd.to_string(),
        source: e,
    })?;
    let pid = child.id();

    let waited = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(waited) => waited,
        Err(_) => {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill timed out hook {}: {}", cmd, e);
            }
            if let Some(pid) = pid {
                untrack(pid);
            }
            return Err(HookError::Timeout(timeout));
        }
    };
    if let Some(pid) = pid {
        untrack(pid);
    }

    let status = waited.map_err(|e| HookError::Spawn {
        command: cmd.to_string(),
        source: e,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(HookError::Exit {
            command: cmd.to_string(),
            code: status.code().unwrap_or(-1),
        })
    }
}

/// The capability set of a unit
#[derive(Clone, Default)]
pub struct Hooks {
    start: Option<Hook>,
    stop: Option<Hook>,
    reload: Option<Hook>,
    pre_install: Option<Hook>,
    post_install: Option<Hook>,
    pre_remove: Option<Hook>,
    post_remove: Option<Hook>,
    status: Option<StatusFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach (or replace) the hook for a transition
    pub fn on(mut self, point: HookPoint, hook: Hook) -> Self {
        *self.slot(point) = Some(hook);
        self
    }

    /// Attach a status reporter
    pub fn with_status(mut self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.status = Some(Arc::new(f));
        self
    }

    pub fn get(&self, point: HookPoint) -> Option<&Hook> {
        match point {
            HookPoint::Start => self.start.as_ref(),
            HookPoint::Stop => self.stop.as_ref(),
            HookPoint::Reload => self.reload.as_ref(),
            HookPoint::PreInstall => self.pre_install.as_ref(),
            HookPoint::PostInstall => self.post_install.as_ref(),
            HookPoint::PreRemove => self.pre_remove.as_ref(),
            HookPoint::PostRemove => self.post_remove.as_ref(),
        }
    }

    fn slot(&mut self, point: HookPoint) -> &mut Option<Hook> {
        match point {
            HookPoint::Start => &mut self.start,
            HookPoint::Stop => &mut self.stop,
            HookPoint::Reload => &mut self.reload,
            HookPoint::PreInstall => &mut self.pre_install,
            HookPoint::PostInstall => &mut self.post_install,
            HookPoint::PreRemove => &mut self.pre_remove,
            HookPoint::PostRemove => &mut self.post_remove,
        }
    }

    /// Run the hook for `point`; succeeds immediately when none is attached
    pub async fn run(&self, point: HookPoint, timeout: Duration) -> Result<(), HookError> {
        match self.get(point) {
            Some(hook) => hook.run(timeout).await,
            None => Ok(()),
        }
    }

    /// Human-readable status from the unit's reporter, if it has one
    pub fn status(&self) -> Option<String> {
        self.status.as_ref().map(|f| f())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("start", &self.start)
            .field("stop", &self.stop)
            .field("reload", &self.reload)
            .field("pre_install", &self.pre_install)
            .field("post_install", &self.post_install)
            .field("pre_remove", &self.pre_remove)
            .field("post_remove", &self.post_remove)
            .field("status", &self.status.is_some())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with code {code}")]
    Exit { command: String, code: i32 },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_missing_hook_succeeds() {
        let hooks = Hooks::new();
        assert!(hooks.run(HookPoint::Start, TIMEOUT).await.is_ok());
        assert!(hooks.status().is_none());
    }

    #[tokio::test]
    async fn test_callback_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hooks = Hooks::new()
            .on(
                HookPoint::Start,
                Hook::callback(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .on(HookPoint::Stop, Hook::callback(|| Err("busy".to_string())));

        hooks.run(HookPoint::Start, TIMEOUT).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = hooks.run(HookPoint::Stop, TIMEOUT).await.unwrap_err();
        assert_eq!(err.to_string(), "busy");
    }

    #[tokio::test]
    async fn test_command_hook_exit_codes() {
        let ok = Hook::command(ExecCommand::new("/bin/true"));
        assert!(ok.run(TIMEOUT).await.is_ok());

        let fail = Hook::command(ExecCommand::new("/bin/false"));
        assert!(matches!(
            fail.run(TIMEOUT).await,
            Err(HookError::Exit { code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_command_hook_timeout() {
        let slow = Hook::command(ExecCommand::new("/bin/sleep").arg("10"));
        let result = slow.run(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(HookError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_command_hook_missing_program() {
        let hook = Hook::command(ExecCommand::new("/nonexistent/unitd-hook"));
        assert!(matches!(hook.run(TIMEOUT).await, Err(HookError::Spawn { .. })));
    }

    #[test]
    fn test_status_reporter() {
        let hooks = Hooks::new().with_status(|| "listening on :53".to_string());
        assert_eq!(hooks.status().as_deref(), Some("listening on :53"));
    }

    #[test]
    fn test_replace_hook() {
        let hooks = Hooks::new()
            .on(HookPoint::Reload, Hook::command(ExecCommand::new("/bin/false")))
            .on(HookPoint::Reload, Hook::command(ExecCommand::new("/bin/true")));
        match hooks.get(HookPoint::Reload) {
            Some(Hook::Command(cmd)) => assert_eq!(cmd.program, std::path::PathBuf::from("/bin/true")),
            other => panic!("unexpected hook: {:?}", other),
        }
    }
}
