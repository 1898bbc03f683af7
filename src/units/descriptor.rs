//! Unit descriptors: what a caller hands to the registry

use std::fmt;
use std::path::PathBuf;

use super::parser::{self, ParseError};
use crate::manager::{Hook, HookPoint, Hooks};

/// Kind of unit. Decides which lifecycle hooks apply and which state
/// counts as "satisfied" when something depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Long-running system service (start/stop/reload)
    Service,
    /// Installable package (install/remove)
    Package,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Package => "package",
        }
    }

    /// File extension used by the on-disk loader
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "service" => Some(Self::Service),
            "package" => Some(Self::Package),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared dependency on another unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    /// Missing or failed optional dependencies are skipped
    pub required: bool,
}

impl Dependency {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ExecCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse a shell-quoted command line
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let (program, args) = parser::parse_command(raw)?;
        Ok(Self {
            program: program.into(),
            args,
        })
    }
}

impl fmt::Display for ExecCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Registration input for a unit
#[derive(Debug, Clone)]
pub struct UnitDescriptor {
    pub name: String,
    pub kind: UnitKind,
    pub description: Option<String>,
    /// Process to supervise while the unit runs (services only)
    pub exec: Option<ExecCommand>,
    /// Lower starts earlier during bulk startup
    pub priority: i32,
    /// Included in bulk startup
    pub enabled: bool,
    pub dependencies: Vec<Dependency>,
    pub version: Option<String>,
    pub install_path: Option<PathBuf>,
    pub hooks: Hooks,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            exec: None,
            priority: 0,
            enabled: false,
            dependencies: Vec::new(),
            version: None,
            install_path: None,
            hooks: Hooks::default(),
        }
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(name, UnitKind::Service)
    }

    pub fn package(name: impl Into<String>) -> Self {
        Self::new(name, UnitKind::Package)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn exec(mut self, exec: ExecCommand) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::required(name));
        self
    }

    pub fn wants(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::optional(name));
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn hook(mut self, point: HookPoint, hook: Hook) -> Self {
        self.hooks = self.hooks.on(point, hook);
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}
