//! Unit lifecycle state machine
//!
//! Services:
//!
//! ```text
//!     ┌──────────┐
//!     │ Stopped  │◄──────────────────┐
//!     └────┬─────┘                   │
//!          │ start (deps satisfied)  │
//!     ┌────▼─────┐                   │
//!     │ Starting │──────────┐        │
//!     └────┬─────┘          │ hook/launch failure
//!          │                │        │
//!     ┌────▼─────┐     ┌────▼────┐   │
//!     │ Running  │     │ Failed  │   │
//!     └────┬─────┘     └────▲────┘   │
//!          │ stop           │        │
//!     ┌────▼─────┐          │        │
//!     │ Stopping │──────────┘        │
//!     └────┬─────┘ hook failure      │
//!          └─────────────────────────┘
//! ```
//!
//! Packages: `NotInstalled → Installed`, `Installed → Removing →
//! NotInstalled`, and `Broken` when a post-install hook fails.

use chrono::{DateTime, Local};

use super::process::ProcessHandle;
use crate::units::UnitKind;

/// Service lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }

    /// Start is accepted from a clean stop or as an explicit recovery
    pub fn accepts_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn accepts_stop(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Package lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    NotInstalled,
    Installed,
    Removing,
    /// Installed, but the post-install hook failed
    Broken,
}

impl PackageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not-installed",
            Self::Installed => "installed",
            Self::Removing => "removing",
            Self::Broken => "broken",
        }
    }

    /// Broken packages may be reinstalled
    pub fn accepts_install(&self) -> bool {
        matches!(self, Self::NotInstalled | Self::Broken)
    }

    pub fn accepts_remove(&self) -> bool {
        matches!(self, Self::Installed)
    }
}

/// State of any unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Service(ServiceState),
    Package(PackageState),
}

impl UnitState {
    pub fn initial(kind: UnitKind) -> Self {
        match kind {
            UnitKind::Service => Self::Service(ServiceState::Stopped),
            UnitKind::Package => Self::Package(PackageState::NotInstalled),
        }
    }

    /// Whether dependents can treat this unit as done
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            Self::Service(ServiceState::Running) | Self::Package(PackageState::Installed)
        )
    }

    /// Whether a start/install request may begin from here
    pub fn accepts_activation(&self) -> bool {
        match self {
            Self::Service(s) => s.accepts_start(),
            Self::Package(p) => p.accepts_install(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service(s) => s.as_str(),
            Self::Package(p) => p.as_str(),
        }
    }
}

/// Runtime bookkeeping for one unit
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub state: UnitState,
    /// Attached process, only while starting/running/stopping
    pub process: Option<ProcessHandle>,
    /// Last observed exit code; kept after stop
    pub exit_code: Option<i32>,
    /// Error message if failed or broken
    pub error: Option<String>,
    /// When the unit entered its current state
    pub since: DateTime<Local>,
}

impl RuntimeState {
    pub fn new(kind: UnitKind) -> Self {
        Self {
            state: UnitState::initial(kind),
            process: None,
            exit_code: None,
            error: None,
            since: Local::now(),
        }
    }

    fn enter(&mut self, state: UnitState) {
        self.state = state;
        self.since = Local::now();
    }

    pub fn set_starting(&mut self) {
        self.enter(UnitState::Service(ServiceState::Starting));
        self.error = None;
    }

    pub fn set_running(&mut self, process: Option<ProcessHandle>) {
        self.enter(UnitState::Service(ServiceState::Running));
        self.process = process;
    }

    pub fn set_stopping(&mut self) {
        self.enter(UnitState::Service(ServiceState::Stopping));
    }

    pub fn set_stopped(&mut self, exit_code: Option<i32>) {
        self.enter(UnitState::Service(ServiceState::Stopped));
        self.process = None;
        if exit_code.is_some() {
            self.exit_code = exit_code;
        }
    }

    pub fn set_failed(&mut self, error: String, exit_code: Option<i32>) {
        self.enter(UnitState::Service(ServiceState::Failed));
        self.process = None;
        self.error = Some(error);
        if exit_code.is_some() {
            self.exit_code = exit_code;
        }
    }

    pub fn set_installed(&mut self) {
        self.enter(UnitState::Package(PackageState::Installed));
        self.error = None;
    }

    pub fn set_broken(&mut self, error: String) {
        self.enter(UnitState::Package(PackageState::Broken));
        self.error = Some(error);
    }

    pub fn set_removing(&mut self) {
        self.enter(UnitState::Package(PackageState::Removing));
    }

    pub fn set_not_installed(&mut self) {
        self.enter(UnitState::Package(PackageState::NotInstalled));
        self.error = None;
    }
}
