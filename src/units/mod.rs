//! Unit definitions and the on-disk loader
//!
//! Unit files are INI-style. `foo.service` becomes a service named `foo`,
//! `bar.package` a package named `bar`.

mod descriptor;
mod parser;

pub use descriptor::{Dependency, ExecCommand, UnitDescriptor, UnitKind};
pub use parser::{parse_bool, parse_command, parse_file, parse_unit_file, ParseError, ParsedFile};

use std::path::{Path, PathBuf};

use crate::manager::{Hook, HookPoint};
use parser::ParsedSection;

/// First value of a key, if present
fn first<'a>(section: &'a ParsedSection, key: &str) -> Option<&'a str> {
    section
        .get(key)
        .and_then(|vals| vals.iter().min_by_key(|(order, _)| *order))
        .map(|(_, v)| v.as_str())
}

/// All values of a key in file order
fn all(section: &ParsedSection, key: &str) -> Vec<String> {
    let mut vals = section.get(key).cloned().unwrap_or_default();
    vals.sort_by_key(|(order, _)| *order);
    vals.into_iter().map(|(_, v)| v).collect()
}

/// Attach a command hook if the key is set
fn command_hook(
    desc: &mut UnitDescriptor,
    section: &ParsedSection,
    key: &str,
    point: HookPoint,
) -> Result<(), ParseError> {
    if let Some(raw) = first(section, key) {
        let cmd = ExecCommand::parse(raw)?;
        desc.hooks = std::mem::take(&mut desc.hooks).on(point, Hook::command(cmd));
    }
    Ok(())
}

const UNIT_KEYS: &[&str] = &["DESCRIPTION", "PRIORITY", "ENABLED", "REQUIRES", "WANTS"];
const SERVICE_KEYS: &[&str] = &["EXECSTART", "EXECSTARTPRE", "EXECSTOP", "EXECRELOAD"];
const PACKAGE_KEYS: &[&str] = &[
    "VERSION",
    "INSTALLPATH",
    "PREINSTALL",
    "POSTINSTALL",
    "PREREMOVE",
    "POSTREMOVE",
];

/// Sections and keys a unit of `kind` ignores, sorted, as `[Section]` or
/// `[Section] KEY`
pub fn unknown_keys(kind: UnitKind, parsed: &ParsedFile) -> Vec<String> {
    let mut unknown = Vec::new();
    for (section, entries) in parsed {
        let known = match section.as_str() {
            "[Unit]" => UNIT_KEYS,
            "[Service]" if kind == UnitKind::Service => SERVICE_KEYS,
            "[Package]" if kind == UnitKind::Package => PACKAGE_KEYS,
            _ => {
                unknown.push(section.clone());
                continue;
            }
        };
        unknown.extend(
            entries
                .keys()
                .filter(|key| !known.contains(&key.as_str()))
                .map(|key| format!("{} {}", section, key)),
        );
    }
    unknown.sort();
    unknown
}

/// Convert parsed INI data into a typed descriptor
pub fn parse_descriptor(
    name: &str,
    kind: UnitKind,
    parsed: &ParsedFile,
) -> Result<UnitDescriptor, ParseError> {
    let mut desc = UnitDescriptor::new(name, kind);

    for key in unknown_keys(kind, parsed) {
        log::warn!("{}.{}: ignoring unknown {}", name, kind, key);
    }

    // [Unit] section
    if let Some(unit) = parsed.get("[Unit]") {
        desc.description = first(unit, "DESCRIPTION").map(str::to_string);

        if let Some(p) = first(unit, "PRIORITY") {
            desc.priority = p.parse().map_err(|_| ParseError::InvalidValue {
                key: "Priority".to_string(),
                value: p.to_string(),
            })?;
        }
        if let Some(e) = first(unit, "ENABLED") {
            desc.enabled = parse_bool(e);
        }

        // Requires= first, then Wants=, each in file order
        for dep in all(unit, "REQUIRES") {
            desc.dependencies.push(Dependency::required(dep));
        }
        for dep in all(unit, "WANTS") {
            desc.dependencies.push(Dependency::optional(dep));
        }
    }

    match kind {
        UnitKind::Service => {
            if let Some(service) = parsed.get("[Service]") {
                if let Some(raw) = first(service, "EXECSTART") {
                    desc.exec = Some(ExecCommand::parse(raw)?);
                }
                command_hook(&mut desc, service, "EXECSTARTPRE", HookPoint::Start)?;
                command_hook(&mut desc, service, "EXECSTOP", HookPoint::Stop)?;
                command_hook(&mut desc, service, "EXECRELOAD", HookPoint::Reload)?;
            }
        }
        UnitKind::Package => {
            if let Some(package) = parsed.get("[Package]") {
                desc.version = first(package, "VERSION").map(str::to_string);
                desc.install_path = first(package, "INSTALLPATH").map(PathBuf::from);
                command_hook(&mut desc, package, "PREINSTALL", HookPoint::PreInstall)?;
                command_hook(&mut desc, package, "POSTINSTALL", HookPoint::PostInstall)?;
                command_hook(&mut desc, package, "PREREMOVE", HookPoint::PreRemove)?;
                command_hook(&mut desc, package, "POSTREMOVE", HookPoint::PostRemove)?;
            }
        }
    }

    Ok(desc)
}

/// Load a single unit file. The kind comes from the extension.
pub async fn load_unit(path: &Path) -> Result<UnitDescriptor, ParseError> {
    let kind = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(UnitKind::from_extension)
        .ok_or_else(|| ParseError::UnknownUnitType(path.display().to_string()))?;

    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ParseError::Generic(format!("Invalid unit file name: {:?}", path)))?;

    let parsed = parse_unit_file(path).await?;
    parse_descriptor(name, kind, &parsed)
}

/// Load every unit file in a directory, sorted by file name.
///
/// Files that fail to parse are logged and skipped. A missing directory
/// yields no units.
pub async fn load_dir(dir: &Path) -> Result<Vec<UnitDescriptor>, ParseError> {
    if !dir.is_dir() {
        log::debug!("Unit directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_unit = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(UnitKind::from_extension)
            .is_some();
        if is_unit {
            paths.push(path);
        }
    }
    paths.sort();

    let mut units = Vec::with_capacity(paths.len());
    for path in paths {
        match load_unit(&path).await {
            Ok(desc) => units.push(desc),
            Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
        }
    }

    Ok(units)
}

/// Units registered when no unit directory provides any
pub fn builtin_units() -> Vec<UnitDescriptor> {
    [
        ("syslog", "/sbin/syslogd", 1),
        ("devd", "/sbin/devd", 2),
        ("network", "/sbin/networkd", 3),
        ("storage", "/sbin/storaged", 3),
    ]
    .into_iter()
    .map(|(name, path, priority)| {
        UnitDescriptor::service(name)
            .exec(ExecCommand::new(path))
            .priority(priority)
            .enabled(true)
    })
    .collect()
}
