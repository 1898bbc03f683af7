//! Unit manager
//!
//! Registers units, resolves their dependencies, drives them through the
//! lifecycle state machine and supervises their processes.

mod hooks;
mod package;
mod process;
mod registry;
mod schedule;
mod state;

pub use hooks::{Hook, HookError, HookFn, HookPoint, Hooks, StatusFn};
pub use process::{tracked_children, ExitStatus, LaunchError, ProcessHandle, ProcessSupervisor};
pub use registry::{RegistryError, RegistryLimits, Unit, UnitRegistry};
pub use schedule::{priority_order, startup_order, BulkReport};
pub use state::{PackageState, RuntimeState, ServiceState, UnitState};

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use crate::units::{self, ParseError, UnitDescriptor, UnitKind};

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ManagerError>> + Send + 'a>>;

/// Manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub limits: RegistryLimits,
    /// Upper bound for command hooks
    pub hook_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop
    pub stop_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            limits: RegistryLimits::default(),
            hook_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Owns the unit registry and the processes launched for it
pub struct Manager {
    registry: UnitRegistry,
    supervisor: ProcessSupervisor,
    config: ManagerConfig,
}

impl Manager {
    /// Create a manager with default settings
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self {
            registry: UnitRegistry::new(config.limits),
            supervisor: ProcessSupervisor::new(),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    pub fn get_unit(&self, name: &str) -> Option<&Unit> {
        self.registry.find(name)
    }

    /// Register a unit
    pub fn register(&mut self, descriptor: UnitDescriptor) -> Result<(), ManagerError> {
        let name = descriptor.name.clone();
        let kind = descriptor.kind;
        self.registry.register(descriptor)?;
        log::debug!("Registered {} {}", kind, name);
        Ok(())
    }

    /// Load and register every unit file in `dir`.
    ///
    /// Units that fail to register are logged and skipped. Returns the
    /// number registered.
    pub async fn load_dir(&mut self, dir: &Path) -> Result<usize, ManagerError> {
        let descriptors = units::load_dir(dir).await?;
        let mut count = 0;
        for desc in descriptors {
            let name = desc.name.clone();
            match self.register(desc) {
                Ok(()) => count += 1,
                Err(e) => log::warn!("Not registering {}: {}", name, e),
            }
        }
        Ok(count)
    }

    fn unit(&self, name: &str) -> Result<&Unit, ManagerError> {
        self.registry
            .find(name)
            .ok_or_else(|| ManagerError::UnitNotFound(name.to_string()))
    }

    fn runtime_mut(&mut self, name: &str) -> Result<&mut RuntimeState, ManagerError> {
        self.registry
            .find_mut(name)
            .map(|u| u.runtime_mut())
            .ok_or_else(|| ManagerError::UnitNotFound(name.to_string()))
    }

    fn expect_kind(&self, name: &str, expected: UnitKind) -> Result<&Unit, ManagerError> {
        let unit = self.unit(name)?;
        if unit.kind() != expected {
            return Err(ManagerError::WrongKind {
                unit: name.to_string(),
                expected,
                actual: unit.kind(),
            });
        }
        Ok(unit)
    }

    /// Start a service after recursively starting its dependencies
    pub async fn start(&mut self, name: &str) -> Result<(), ManagerError> {
        self.expect_kind(name, UnitKind::Service)?;
        let mut resolving = Vec::new();
        self.resolve(name, &mut resolving).await
    }

    /// Bring a unit and its dependencies to their satisfied state
    /// (running services, installed packages).
    ///
    /// `resolving` holds the units whose dependencies are being resolved
    /// further up the call chain; meeting one of them again is a cycle.
    /// Dependencies that were started stay started if a later one fails.
    fn resolve<'a>(&'a mut self, name: &'a str, resolving: &'a mut Vec<String>) -> ResolveFuture<'a> {
        Box::pin(async move {
            let unit = self.unit(name)?;

            if resolving.iter().any(|n| n == name) {
                let mut cycle = resolving.clone();
                cycle.push(name.to_string());
                return Err(ManagerError::DependencyCycle(cycle));
            }

            let state = unit.state();
            if state.is_satisfied() {
                log::debug!("{} already {}", name, state.as_str());
                return Ok(());
            }
            if !state.accepts_activation() {
                return Err(ManagerError::InvalidStateForRequest {
                    unit: name.to_string(),
                    state: state.as_str(),
                    request: activation_verb(unit.kind()),
                });
            }

            let kind = unit.kind();
            let dependencies = unit.dependencies().to_vec();

            resolving.push(name.to_string());
            let deps_result = self.resolve_dependencies(name, &dependencies, resolving).await;
            resolving.pop();
            deps_result?;

            match kind {
                UnitKind::Service => self.activate_service(name).await,
                UnitKind::Package => self.activate_package(name).await,
            }
        })
    }

    async fn resolve_dependencies(
        &mut self,
        name: &str,
        dependencies: &[units::Dependency],
        resolving: &mut Vec<String>,
    ) -> Result<(), ManagerError> {
        for dep in dependencies {
            if !self.registry.contains(&dep.name) {
                if dep.required {
                    log::error!("{}: required dependency {} is not registered", name, dep.name);
                    return Err(ManagerError::DependencyUnsatisfied {
                        unit: name.to_string(),
                        dependency: dep.name.clone(),
                        reason: "not registered".to_string(),
                    });
                }
                log::warn!("{}: skipping unregistered optional dependency {}", name, dep.name);
                continue;
            }

            match self.resolve(&dep.name, resolving).await {
                Ok(()) => {}
                Err(e @ ManagerError::DependencyCycle(_)) if dep.required => return Err(e),
                Err(e) if dep.required => {
                    log::error!("{}: required dependency {} failed: {}", name, dep.name, e);
                    return Err(ManagerError::DependencyUnsatisfied {
                        unit: name.to_string(),
                        dependency: dep.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("{}: optional dependency {} failed: {}", name, dep.name, e);
                }
            }
        }
        Ok(())
    }

    /// Starting → start hook → launch → Running, or Failed
    async fn activate_service(&mut self, name: &str) -> Result<(), ManagerError> {
        let unit = self.unit(name)?;
        let hooks = unit.hooks().clone();
        let exec = unit.exec().cloned();

        self.runtime_mut(name)?.set_starting();
        log::info!("Starting {}", name);

        if let Err(e) = hooks.run(HookPoint::Start, self.config.hook_timeout).await {
            log::error!("{}: start hook failed: {}", name, e);
            self.runtime_mut(name)?.set_failed(e.to_string(), None);
            return Err(ManagerError::HookFailure {
                unit: name.to_string(),
                hook: HookPoint::Start,
                source: e,
            });
        }

        let process = match exec {
            Some(cmd) => match self.supervisor.launch(&cmd) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("{}: failed to launch {}: {}", name, cmd, e);
                    self.runtime_mut(name)?.set_failed(e.to_string(), None);
                    return Err(ManagerError::Launch {
                        unit: name.to_string(),
                        source: e,
                    });
                }
            },
            None => None,
        };

        self.runtime_mut(name)?.set_running(process);
        match process {
            Some(handle) => log::info!("Started {} ({})", name, handle),
            None => log::info!("Started {}", name),
        }
        Ok(())
    }

    /// Stop a running service. Services that depend on it are left alone.
    pub async fn stop(&mut self, name: &str) -> Result<(), ManagerError> {
        let unit = self.expect_kind(name, UnitKind::Service)?;
        let state = unit.state();
        if state != UnitState::Service(ServiceState::Running) {
            return Err(ManagerError::InvalidStateForRequest {
                unit: name.to_string(),
                state: state.as_str(),
                request: "stop",
            });
        }
        let hooks = unit.hooks().clone();
        let process = unit.process();

        self.runtime_mut(name)?.set_stopping();
        log::info!("Stopping {}", name);

        let hook_result = hooks.run(HookPoint::Stop, self.config.hook_timeout).await;

        // The process goes away even if the stop hook failed
        let exit_code = match process {
            Some(handle) => match self.supervisor.terminate(handle, self.config.stop_timeout).await {
                Ok(status) => {
                    log::info!("{} ({}) exited: {}", name, handle, status);
                    Some(status.code())
                }
                Err(e) => {
                    log::warn!("{}: failed to reap {}: {}", name, handle, e);
                    None
                }
            },
            None => None,
        };

        match hook_result {
            Ok(()) => {
                self.runtime_mut(name)?.set_stopped(exit_code);
                log::info!("Stopped {}", name);
                Ok(())
            }
            Err(e) => {
                log::error!("{}: stop hook failed: {}", name, e);
                self.runtime_mut(name)?.set_failed(e.to_string(), exit_code);
                Err(ManagerError::HookFailure {
                    unit: name.to_string(),
                    hook: HookPoint::Stop,
                    source: e,
                })
            }
        }
    }

    /// Run the reload hook of a running service. No state change either way.
    pub async fn reload(&mut self, name: &str) -> Result<(), ManagerError> {
        let unit = self.expect_kind(name, UnitKind::Service)?;
        let state = unit.state();
        if state != UnitState::Service(ServiceState::Running) {
            return Err(ManagerError::InvalidStateForRequest {
                unit: name.to_string(),
                state: state.as_str(),
                request: "reload",
            });
        }
        let hooks = unit.hooks().clone();

        log::info!("Reloading {}", name);
        hooks
            .run(HookPoint::Reload, self.config.hook_timeout)
            .await
            .map_err(|e| ManagerError::HookFailure {
                unit: name.to_string(),
                hook: HookPoint::Reload,
                source: e,
            })
    }

    /// Stop (if running) then start
    pub async fn restart(&mut self, name: &str) -> Result<(), ManagerError> {
        let unit = self.expect_kind(name, UnitKind::Service)?;
        if unit.state() == UnitState::Service(ServiceState::Running) {
            self.stop(name).await?;
        }
        self.start(name).await
    }

    /// Bring every enabled unit up in priority order.
    ///
    /// Keeps going past failures; the report says which units failed.
    pub async fn start_enabled(&mut self) -> BulkReport {
        let order = priority_order(&self.registry);
        let mut report = BulkReport::default();

        for name in order {
            let Some(unit) = self.registry.find(&name) else {
                continue;
            };
            if !unit.is_enabled() {
                report.skipped.push(name);
                continue;
            }

            let result = match unit.kind() {
                UnitKind::Service => self.start(&name).await,
                UnitKind::Package => self.install(&name).await,
            };
            match result {
                Ok(()) => report.succeeded.push(name),
                Err(e) => {
                    log::warn!("Failed to bring up {}: {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }

        if report.is_success() {
            log::info!("Startup complete: {} units up", report.succeeded.len());
        } else {
            log::warn!(
                "Startup finished with {} failed units: {}",
                report.failed.len(),
                report.failed_names().join(", ")
            );
        }
        report
    }

    /// Stop every running service, highest priority value first
    pub async fn stop_all(&mut self) -> BulkReport {
        let mut order = priority_order(&self.registry);
        order.reverse();
        let mut report = BulkReport::default();

        for name in order {
            let running = self
                .registry
                .find(&name)
                .is_some_and(|u| u.state() == UnitState::Service(ServiceState::Running));
            if !running {
                continue;
            }
            match self.stop(&name).await {
                Ok(()) => report.succeeded.push(name),
                Err(e) => {
                    log::warn!("Failed to stop {}: {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }
        report
    }

    /// Collect processes that exited on their own.
    ///
    /// The unit moves to Stopped on a clean exit and Failed otherwise.
    /// Units depending on it are not touched. Returns the affected units.
    pub fn reap(&mut self) -> Vec<String> {
        let watched: Vec<(String, ProcessHandle)> = self
            .registry
            .all()
            .filter(|u| u.state() == UnitState::Service(ServiceState::Running))
            .filter_map(|u| u.process().map(|p| (u.name().to_string(), p)))
            .collect();

        let mut exited = Vec::new();
        for (name, handle) in watched {
            let status = match self.supervisor.poll(handle) {
                Ok(Some(status)) => status,
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Error checking {} ({}): {}", name, handle, e);
                    continue;
                }
            };

            if let Some(unit) = self.registry.find_mut(&name) {
                let runtime = unit.runtime_mut();
                if status.success() {
                    log::info!("{} exited cleanly", name);
                    runtime.set_stopped(Some(status.code()));
                } else {
                    log::warn!("{} ({}) died: {}", name, handle, status);
                    runtime.set_failed(format!("Process {}", status), Some(status.code()));
                }
            }
            exited.push(name);
        }
        exited
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

fn activation_verb(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Service => "start",
        UnitKind::Package => "install",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("{unit}: required dependency {dependency} unsatisfied: {reason}")]
    DependencyUnsatisfied {
        unit: String,
        dependency: String,
        reason: String,
    },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Cannot {request} {unit} while {state}")]
    InvalidStateForRequest {
        unit: String,
        state: &'static str,
        request: &'static str,
    },

    #[error("{unit}: {hook} hook failed: {source}")]
    HookFailure {
        unit: String,
        hook: HookPoint,
        #[source]
        source: HookError,
    },

    #[error("{unit}: launch failed: {source}")]
    Launch {
        unit: String,
        #[source]
        source: LaunchError,
    },

    #[error("{unit} is still required by installed package {dependent}")]
    DependencyInUse { unit: String, dependent: String },

    #[error("{unit} is a {actual}, not a {expected}")]
    WrongKind {
        unit: String,
        expected: UnitKind,
        actual: UnitKind,
    },

    #[error("Failed to load units: {0}")]
    Load(#[from] ParseError),
}
