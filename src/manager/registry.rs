//! Unit registry: the owned table of registered units

use std::collections::HashMap;

use chrono::{DateTime, Local};

use super::hooks::Hooks;
use super::process::ProcessHandle;
use super::state::{RuntimeState, UnitState};
use crate::units::{Dependency, ExecCommand, UnitDescriptor, UnitKind};

/// Size limits enforced at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_units: usize,
    pub max_dependencies: usize,
    pub max_name_len: usize,
}

impl RegistryLimits {
    /// Limits for a service table
    pub const fn services() -> Self {
        Self {
            max_units: 128,
            max_dependencies: 16,
            max_name_len: 64,
        }
    }

    /// Limits for a package database
    pub const fn packages() -> Self {
        Self {
            max_units: 1024,
            max_dependencies: 32,
            max_name_len: 64,
        }
    }
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self::services()
    }
}

/// A registered unit. Only the registry constructs these.
#[derive(Debug)]
pub struct Unit {
    descriptor: UnitDescriptor,
    runtime: RuntimeState,
}

impl Unit {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> UnitKind {
        self.descriptor.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.descriptor.description.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.descriptor.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.descriptor.enabled
    }

    pub fn exec(&self) -> Option<&ExecCommand> {
        self.descriptor.exec.as_ref()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.descriptor.dependencies
    }

    pub fn version(&self) -> Option<&str> {
        self.descriptor.version.as_deref()
    }

    pub fn hooks(&self) -> &Hooks {
        &self.descriptor.hooks
    }

    pub fn state(&self) -> UnitState {
        self.runtime.state
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.runtime.process
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.runtime.exit_code
    }

    pub fn error(&self) -> Option<&str> {
        self.runtime.error.as_deref()
    }

    pub fn since(&self) -> DateTime<Local> {
        self.runtime.since
    }

    /// Output of the unit's status reporter, if any
    pub fn status_text(&self) -> Option<String> {
        self.descriptor.hooks.status()
    }

    /// Whether this unit lists `name` as a required dependency
    pub fn requires(&self, name: &str) -> bool {
        self.descriptor
            .dependencies
            .iter()
            .any(|d| d.required && d.name == name)
    }

    pub(crate) fn runtime_mut(&mut self) -> &mut RuntimeState {
        &mut self.runtime
    }
}

/// Registry of units, kept in registration order
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: Vec<Unit>,
    index: HashMap<String, usize>,
    limits: RegistryLimits,
}

impl UnitRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            units: Vec::new(),
            index: HashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Insert a unit. Fails without side effects on a duplicate name,
    /// a full table, or a descriptor outside the limits.
    pub fn register(&mut self, descriptor: UnitDescriptor) -> Result<(), RegistryError> {
        let name = descriptor.name.clone();

        if name.is_empty()
            || name.len() > self.limits.max_name_len
            || name.chars().any(|c| c.is_whitespace() || c == '/')
        {
            return Err(RegistryError::InvalidName(name));
        }
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        if self.units.len() >= self.limits.max_units {
            return Err(RegistryError::CapacityExceeded(self.limits.max_units));
        }
        if descriptor.dependencies.len() > self.limits.max_dependencies {
            return Err(RegistryError::TooManyDependencies {
                name,
                count: descriptor.dependencies.len(),
                max: self.limits.max_dependencies,
            });
        }

        let runtime = RuntimeState::new(descriptor.kind);
        self.index.insert(name, self.units.len());
        self.units.push(Unit {
            descriptor,
            runtime,
        });
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Unit> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    pub(crate) fn find_mut(&mut self, name: &str) -> Option<&mut Unit> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.units[i]),
            None => None,
        }
    }

    /// All units in registration order
    pub fn all(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unit already registered: {0}")]
    DuplicateName(String),

    #[error("Registry full ({0} units)")]
    CapacityExceeded(usize),

    #[error("Invalid unit name: {0:?}")]
    InvalidName(String),

    #[error("{name} declares {count} dependencies (max {max})")]
    TooManyDependencies {
        name: String,
        count: usize,
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::state::ServiceState;

    #[test]
    fn test_register_and_find() {
        let mut reg = UnitRegistry::default();
        reg.register(UnitDescriptor::service("syslog").priority(1))
            .unwrap();

        let unit = reg.find("syslog").unwrap();
        assert_eq!(unit.name(), "syslog");
        assert_eq!(unit.priority(), 1);
        assert_eq!(unit.state(), UnitState::Service(ServiceState::Stopped));
        assert!(unit.process().is_none());
        assert!(reg.find("devd").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = UnitRegistry::default();
        reg.register(UnitDescriptor::service("syslog")).unwrap();

        let err = reg
            .register(UnitDescriptor::service("syslog").priority(9))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "syslog"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.find("syslog").unwrap().priority(), 0);
    }

    #[test]
    fn test_capacity_exceeded() {
        let limits = RegistryLimits {
            max_units: 3,
            ..RegistryLimits::default()
        };
        let mut reg = UnitRegistry::new(limits);
        for i in 0..3 {
            reg.register(UnitDescriptor::service(format!("svc{}", i)))
                .unwrap();
        }

        let err = reg.register(UnitDescriptor::service("svc3")).unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded(3)));
        assert_eq!(reg.len(), 3);
        assert!(reg.find("svc3").is_none());
        let names: Vec<_> = reg.all().map(|u| u.name()).collect();
        assert_eq!(names, vec!["svc0", "svc1", "svc2"]);
    }

    #[test]
    fn test_invalid_names() {
        let mut reg = UnitRegistry::default();
        let long = "x".repeat(65);
        for name in ["", "two words", "a/b", long.as_str()] {
            assert!(matches!(
                reg.register(UnitDescriptor::service(name)),
                Err(RegistryError::InvalidName(_))
            ));
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn test_too_many_dependencies() {
        let limits = RegistryLimits {
            max_dependencies: 2,
            ..RegistryLimits::default()
        };
        let mut reg = UnitRegistry::new(limits);
        let desc = UnitDescriptor::service("web")
            .requires("a")
            .requires("b")
            .wants("c");

        assert!(matches!(
            reg.register(desc),
            Err(RegistryError::TooManyDependencies { count: 3, max: 2, .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_all_in_registration_order() {
        let mut reg = UnitRegistry::new(RegistryLimits::packages());
        for name in ["zlib", "openssl", "curl"] {
            reg.register(UnitDescriptor::package(name)).unwrap();
        }
        let names: Vec<_> = reg.all().map(|u| u.name()).collect();
        assert_eq!(names, vec!["zlib", "openssl", "curl"]);
    }

    #[test]
    fn test_requires() {
        let mut reg = UnitRegistry::default();
        reg.register(UnitDescriptor::package("curl").requires("zlib").wants("docs"))
            .unwrap();
        let curl = reg.find("curl").unwrap();
        assert!(curl.requires("zlib"));
        assert!(!curl.requires("docs"));
        assert!(!curl.requires("openssl"));
    }
}
