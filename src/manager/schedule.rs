//! Priority ordering for bulk startup and shutdown

use super::registry::UnitRegistry;
use super::ManagerError;

/// Every unit in ascending priority; ties keep registration order
pub fn priority_order(registry: &UnitRegistry) -> Vec<String> {
    let mut units: Vec<_> = registry.all().collect();
    // sort_by_key is stable
    units.sort_by_key(|u| u.priority());
    units.into_iter().map(|u| u.name().to_string()).collect()
}

/// Enabled units in the order bulk startup visits them
pub fn startup_order(registry: &UnitRegistry) -> Vec<String> {
    priority_order(registry)
        .into_iter()
        .filter(|name| registry.find(name).is_some_and(|u| u.is_enabled()))
        .collect()
}

/// Outcome of a bulk operation over many units
#[derive(Debug, Default)]
pub struct BulkReport {
    /// Units processed successfully, in visit order
    pub succeeded: Vec<String>,
    /// Units that failed, with the reason
    pub failed: Vec<(String, ManagerError)>,
    /// Units left alone (not enabled)
    pub skipped: Vec<String>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(name, _)| name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitDescriptor;

    fn registry(units: &[(&str, i32, bool)]) -> UnitRegistry {
        let mut reg = UnitRegistry::default();
        for (name, priority, enabled) in units {
            reg.register(
                UnitDescriptor::service(*name)
                    .priority(*priority)
                    .enabled(*enabled),
            )
            .unwrap();
        }
        reg
    }

    #[test]
    fn test_ascending_priority() {
        let reg = registry(&[("c", 30, true), ("a", 10, true), ("b", 20, true)]);
        assert_eq!(startup_order(&reg), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let reg = registry(&[
            ("network", 3, true),
            ("syslog", 1, true),
            ("storage", 3, true),
            ("devd", 2, true),
            ("audio", 3, true),
        ]);
        assert_eq!(
            startup_order(&reg),
            vec!["syslog", "devd", "network", "storage", "audio"]
        );
    }

    #[test]
    fn test_disabled_units_skipped() {
        let reg = registry(&[("a", 1, true), ("b", 0, false), ("c", 2, true)]);
        assert_eq!(startup_order(&reg), vec!["a", "c"]);
        assert_eq!(priority_order(&reg), vec!["b", "a", "c"]);
        // Registry itself is untouched
        let names: Vec<_> = reg.all().map(|u| u.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_negative_priorities_first() {
        let reg = registry(&[("late", 5, true), ("early", -10, true)]);
        assert_eq!(startup_order(&reg), vec!["early", "late"]);
    }

    #[test]
    fn test_report_success() {
        let mut report = BulkReport::default();
        assert!(report.is_success());
        report
            .failed
            .push(("web".into(), ManagerError::UnitNotFound("web".into())));
        assert!(!report.is_success());
        assert_eq!(report.failed_names(), vec!["web"]);
    }
}
