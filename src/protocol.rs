//! IPC protocol between unitctl and the unitd daemon
//!
//! Messages travel over peercred-ipc, which checks the caller's credentials
//! and encodes both enums as MessagePack.

use serde::{Deserialize, Serialize};

use crate::manager::{BulkReport, Unit, UnitRegistry};

pub const SOCKET_PATH: &str = "/run/unitd.sock";

/// Request from CLI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Ping,
    List,
    Status { name: String },
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Reload { name: String },
    Install { name: String },
    Remove { name: String },
    /// Declared dependencies with their current state
    Deps { name: String },
    /// Bring up every enabled unit
    Boot,
}

/// Unit snapshot returned by list/status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub kind: String,
    pub state: String,
    pub description: Option<String>,
    pub priority: i32,
    pub enabled: bool,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub version: Option<String>,
    /// RFC 3339 time the unit entered its current state
    pub since: String,
    /// Output of the unit's status reporter
    pub status: Option<String>,
}

impl UnitInfo {
    pub fn from_unit(unit: &Unit) -> Self {
        Self {
            name: unit.name().to_string(),
            kind: unit.kind().to_string(),
            state: unit.state().as_str().to_string(),
            description: unit.description().map(str::to_string),
            priority: unit.priority(),
            enabled: unit.is_enabled(),
            pid: unit.process().map(|p| p.pid()),
            exit_code: unit.exit_code(),
            error: unit.error().map(str::to_string),
            version: unit.version().map(str::to_string),
            since: unit.since().to_rfc3339(),
            status: unit.status_text(),
        }
    }
}

/// One declared dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepInfo {
    pub name: String,
    pub required: bool,
    /// None when the dependency is not registered
    pub state: Option<String>,
}

impl DepInfo {
    pub fn for_unit(unit: &Unit, registry: &UnitRegistry) -> Vec<Self> {
        unit.dependencies()
            .iter()
            .map(|dep| Self {
                name: dep.name.clone(),
                required: dep.required,
                state: registry
                    .find(&dep.name)
                    .map(|u| u.state().as_str().to_string()),
            })
            .collect()
    }
}

/// Result of a bulk startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSummary {
    pub succeeded: Vec<String>,
    /// (unit, error message)
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

impl From<&BulkReport> for BootSummary {
    fn from(report: &BulkReport) -> Self {
        Self {
            succeeded: report.succeeded.clone(),
            failed: report
                .failed
                .iter()
                .map(|(name, e)| (name.clone(), e.to_string()))
                .collect(),
            skipped: report.skipped.clone(),
        }
    }
}

/// Response from daemon to CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Pong,
    Units(Vec<UnitInfo>),
    Status(UnitInfo),
    Deps(Vec<DepInfo>),
    Boot(BootSummary),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ManagerError, RegistryLimits};
    use crate::units::UnitDescriptor;

    #[test]
    fn test_request_roundtrip() {
        let requests = vec![
            Request::Start {
                name: "syslog".into(),
            },
            Request::Remove {
                name: "openssl".into(),
            },
            Request::Boot,
        ];

        for req in requests {
            let encoded = rmp_serde::to_vec(&req).unwrap();
            let decoded: Request = rmp_serde::from_slice(&encoded).unwrap();
            assert_eq!(req, decoded);
        }
    }

    #[test]
    fn test_boot_response_roundtrip() {
        let response = Response::Boot(BootSummary {
            succeeded: vec!["devd".into()],
            failed: vec![("network".into(), "Unit not found: dhcp".into())],
            skipped: vec![],
        });
        let encoded = rmp_serde::to_vec(&response).unwrap();
        let decoded: Response = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(response, decoded);
    }

    #[test]
    fn test_garbage_rejected() {
        let result: Result<Request, _> = rmp_serde::from_slice(&[0xc1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unit_info_and_deps() {
        let mut reg = UnitRegistry::new(RegistryLimits::default());
        reg.register(UnitDescriptor::service("devd")).unwrap();
        reg.register(
            UnitDescriptor::service("network")
                .description("Network daemon")
                .priority(3)
                .requires("devd")
                .wants("dhcp"),
        )
        .unwrap();

        let network = reg.find("network").unwrap();
        let info = UnitInfo::from_unit(network);
        assert_eq!(info.kind, "service");
        assert_eq!(info.state, "stopped");
        assert_eq!(info.description.as_deref(), Some("Network daemon"));
        assert!(info.pid.is_none());

        let deps = DepInfo::for_unit(network, &reg);
        assert_eq!(
            deps,
            vec![
                DepInfo {
                    name: "devd".into(),
                    required: true,
                    state: Some("stopped".into()),
                },
                DepInfo {
                    name: "dhcp".into(),
                    required: false,
                    state: None,
                },
            ]
        );
    }

    #[test]
    fn test_boot_summary_from_report() {
        let report = BulkReport {
            succeeded: vec!["syslog".into()],
            failed: vec![("network".into(), ManagerError::UnitNotFound("devd".into()))],
            skipped: vec!["debug-shell".into()],
        };
        let summary = BootSummary::from(&report);
        assert_eq!(summary.succeeded, vec!["syslog"]);
        assert_eq!(
            summary.failed,
            vec![("network".to_string(), "Unit not found: devd".to_string())]
        );
        assert_eq!(summary.skipped, vec!["debug-shell"]);
    }
}
