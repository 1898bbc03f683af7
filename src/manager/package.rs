//! Package install/remove
//!
//! Packages share the resolver with services: installing one first installs
//! everything it requires. Removal is refused while an installed package
//! still requires the target.

use super::{HookPoint, Manager, ManagerError, PackageState, UnitState};
use crate::units::UnitKind;

impl Manager {
    /// Install a package after recursively installing its dependencies
    pub async fn install(&mut self, name: &str) -> Result<(), ManagerError> {
        self.expect_kind(name, UnitKind::Package)?;
        let mut resolving = Vec::new();
        self.resolve(name, &mut resolving).await
    }

    /// pre-install → Installed → post-install.
    ///
    /// A failing pre-install leaves the package untouched. A failing
    /// post-install leaves it Broken but the install itself succeeds.
    pub(super) async fn activate_package(&mut self, name: &str) -> Result<(), ManagerError> {
        let hooks = self.unit(name)?.hooks().clone();
        let timeout = self.config.hook_timeout;

        log::info!("Installing {}", name);
        if let Err(e) = hooks.run(HookPoint::PreInstall, timeout).await {
            log::error!("{}: pre-install hook failed: {}", name, e);
            return Err(ManagerError::HookFailure {
                unit: name.to_string(),
                hook: HookPoint::PreInstall,
                source: e,
            });
        }

        self.runtime_mut(name)?.set_installed();

        if let Err(e) = hooks.run(HookPoint::PostInstall, timeout).await {
            log::warn!("{}: post-install hook failed, marking broken: {}", name, e);
            self.runtime_mut(name)?.set_broken(e.to_string());
            return Ok(());
        }

        log::info!("Installed {}", name);
        Ok(())
    }

    /// Remove an installed package
    pub async fn remove(&mut self, name: &str) -> Result<(), ManagerError> {
        let unit = self.expect_kind(name, UnitKind::Package)?;
        let state = unit.state();
        if state != UnitState::Package(PackageState::Installed) {
            return Err(ManagerError::InvalidStateForRequest {
                unit: name.to_string(),
                state: state.as_str(),
                request: "remove",
            });
        }
        let hooks = unit.hooks().clone();

        if let Some(dependent) = self.installed_dependent(name) {
            return Err(ManagerError::DependencyInUse {
                unit: name.to_string(),
                dependent,
            });
        }

        let timeout = self.config.hook_timeout;
        log::info!("Removing {}", name);
        if let Err(e) = hooks.run(HookPoint::PreRemove, timeout).await {
            log::error!("{}: pre-remove hook failed: {}", name, e);
            return Err(ManagerError::HookFailure {
                unit: name.to_string(),
                hook: HookPoint::PreRemove,
                source: e,
            });
        }

        self.runtime_mut(name)?.set_removing();

        if let Err(e) = hooks.run(HookPoint::PostRemove, timeout).await {
            log::warn!("{}: post-remove hook failed: {}", name, e);
        }

        self.runtime_mut(name)?.set_not_installed();
        log::info!("Removed {}", name);
        Ok(())
    }

    /// First installed package that requires `name`, in registration order
    fn installed_dependent(&self, name: &str) -> Option<String> {
        self.registry
            .all()
            .filter(|u| u.name() != name)
            .filter(|u| u.state() == UnitState::Package(PackageState::Installed))
            .find(|u| u.requires(name))
            .map(|u| u.name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{Hook, ManagerConfig, RegistryLimits};
    use crate::units::UnitDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn package_manager() -> Manager {
        Manager::with_config(ManagerConfig {
            limits: RegistryLimits::packages(),
            ..ManagerConfig::default()
        })
    }

    fn state(mgr: &Manager, name: &str) -> UnitState {
        mgr.get_unit(name).unwrap().state()
    }

    const INSTALLED: UnitState = UnitState::Package(PackageState::Installed);
    const NOT_INSTALLED: UnitState = UnitState::Package(PackageState::NotInstalled);
    const BROKEN: UnitState = UnitState::Package(PackageState::Broken);

    #[tokio::test]
    async fn test_install_pulls_in_dependencies() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = package_manager();
        for name in ["zlib", "openssl"] {
            let log = Arc::clone(&order);
            mgr.register(UnitDescriptor::package(name).hook(
                HookPoint::PostInstall,
                Hook::callback(move || {
                    log.lock().unwrap().push(name);
                    Ok(())
                }),
            ))
            .unwrap();
        }
        mgr.register(UnitDescriptor::package("curl").requires("openssl").requires("zlib"))
            .unwrap();

        mgr.install("curl").await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["openssl", "zlib"]);
        for name in ["zlib", "openssl", "curl"] {
            assert_eq!(state(&mgr, name), INSTALLED);
        }
    }

    #[tokio::test]
    async fn test_install_twice_runs_hooks_once() {
        let installs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&installs);
        let mut mgr = package_manager();
        mgr.register(UnitDescriptor::package("zlib").hook(
            HookPoint::PreInstall,
            Hook::callback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ))
        .unwrap();

        mgr.install("zlib").await.unwrap();
        mgr.install("zlib").await.unwrap();
        assert_eq!(installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_install_failure_leaves_not_installed() {
        let mut mgr = package_manager();
        mgr.register(
            UnitDescriptor::package("zlib")
                .hook(HookPoint::PreInstall, Hook::callback(|| Err("disk full".into()))),
        )
        .unwrap();

        let err = mgr.install("zlib").await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::HookFailure { hook: HookPoint::PreInstall, .. }
        ));
        assert_eq!(state(&mgr, "zlib"), NOT_INSTALLED);
    }

    #[tokio::test]
    async fn test_post_install_failure_is_broken_but_ok() {
        let mut mgr = package_manager();
        mgr.register(
            UnitDescriptor::package("fonts")
                .hook(HookPoint::PostInstall, Hook::callback(|| Err("fc-cache failed".into()))),
        )
        .unwrap();

        mgr.install("fonts").await.unwrap();
        assert_eq!(state(&mgr, "fonts"), BROKEN);
        assert_eq!(mgr.get_unit("fonts").unwrap().error(), Some("fc-cache failed"));
    }

    #[tokio::test]
    async fn test_broken_dependency_reinstalled() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut mgr = package_manager();
        mgr.register(UnitDescriptor::package("fonts").hook(
            HookPoint::PostInstall,
            Hook::callback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("fc-cache failed".into())
            }),
        ))
        .unwrap();
        mgr.register(UnitDescriptor::package("editor").requires("fonts"))
            .unwrap();

        mgr.install("fonts").await.unwrap();
        assert_eq!(state(&mgr, "fonts"), BROKEN);

        // Broken does not count as installed, so editor retries fonts
        mgr.install("editor").await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(state(&mgr, "fonts"), BROKEN);
        assert_eq!(state(&mgr, "editor"), INSTALLED);
    }

    #[tokio::test]
    async fn test_remove_blocked_by_installed_dependent() {
        let mut mgr = package_manager();
        mgr.register(UnitDescriptor::package("zlib")).unwrap();
        mgr.register(UnitDescriptor::package("curl").requires("zlib"))
            .unwrap();
        mgr.install("curl").await.unwrap();

        let err = mgr.remove("zlib").await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::DependencyInUse { ref dependent, .. } if dependent == "curl"
        ));
        assert_eq!(state(&mgr, "zlib"), INSTALLED);

        mgr.remove("curl").await.unwrap();
        mgr.remove("zlib").await.unwrap();
        assert_eq!(state(&mgr, "zlib"), NOT_INSTALLED);
    }

    #[tokio::test]
    async fn test_optional_dependent_does_not_block() {
        let mut mgr = package_manager();
        mgr.register(UnitDescriptor::package("docs")).unwrap();
        mgr.register(UnitDescriptor::package("curl").wants("docs"))
            .unwrap();
        mgr.install("curl").await.unwrap();

        mgr.remove("docs").await.unwrap();
        assert_eq!(state(&mgr, "curl"), INSTALLED);
    }

    #[tokio::test]
    async fn test_remove_not_installed() {
        let mut mgr = package_manager();
        mgr.register(UnitDescriptor::package("zlib")).unwrap();
        assert!(matches!(
            mgr.remove("zlib").await,
            Err(ManagerError::InvalidStateForRequest { request: "remove", .. })
        ));
    }

    #[tokio::test]
    async fn test_pre_remove_failure_keeps_installed() {
        let mut mgr = package_manager();
        mgr.register(
            UnitDescriptor::package("db")
                .hook(HookPoint::PreRemove, Hook::callback(|| Err("in use".into()))),
        )
        .unwrap();
        mgr.install("db").await.unwrap();

        assert!(mgr.remove("db").await.is_err());
        assert_eq!(state(&mgr, "db"), INSTALLED);
    }

    #[tokio::test]
    async fn test_post_remove_failure_ignored() {
        let mut mgr = package_manager();
        mgr.register(
            UnitDescriptor::package("cache")
                .hook(HookPoint::PostRemove, Hook::callback(|| Err("rm failed".into()))),
        )
        .unwrap();
        mgr.install("cache").await.unwrap();

        mgr.remove("cache").await.unwrap();
        assert_eq!(state(&mgr, "cache"), NOT_INSTALLED);
    }

    #[tokio::test]
    async fn test_package_ops_reject_services() {
        let mut mgr = package_manager();
        mgr.register(UnitDescriptor::service("syslog")).unwrap();
        assert!(matches!(
            mgr.install("syslog").await,
            Err(ManagerError::WrongKind { expected: UnitKind::Package, .. })
        ));
        assert!(matches!(
            mgr.remove("syslog").await,
            Err(ManagerError::WrongKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_package_cycle() {
        let mut mgr = package_manager();
        mgr.register(UnitDescriptor::package("a").requires("b")).unwrap();
        mgr.register(UnitDescriptor::package("b").requires("c")).unwrap();
        mgr.register(UnitDescriptor::package("c").requires("a")).unwrap();

        match mgr.install("a").await {
            Err(ManagerError::DependencyCycle(path)) => {
                assert_eq!(path, vec!["a", "b", "c", "a"])
            }
            other => panic!("expected cycle, got {:?}", other),
        }
        assert_eq!(state(&mgr, "a"), NOT_INSTALLED);
    }
}
