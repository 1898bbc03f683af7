//! Pseudo-filesystems unitd needs before any unit runs

use std::fs;
use std::path::Path;

use nix::mount::{mount, MsFlags};

struct MountPoint {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

const NOSUID_NODEV_NOEXEC: MsFlags = MsFlags::MS_NOSUID
    .union(MsFlags::MS_NODEV)
    .union(MsFlags::MS_NOEXEC);

/// Mounted in order; later entries live under earlier ones
const ESSENTIAL_MOUNTS: &[MountPoint] = &[
    MountPoint {
        source: "proc",
        target: "/proc",
        fstype: "proc",
        flags: NOSUID_NODEV_NOEXEC,
        data: None,
    },
    MountPoint {
        source: "sysfs",
        target: "/sys",
        fstype: "sysfs",
        flags: NOSUID_NODEV_NOEXEC,
        data: None,
    },
    MountPoint {
        source: "devtmpfs",
        target: "/dev",
        fstype: "devtmpfs",
        flags: MsFlags::MS_NOSUID,
        data: Some("mode=0755"),
    },
    MountPoint {
        source: "devpts",
        target: "/dev/pts",
        fstype: "devpts",
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NOEXEC),
        data: Some("gid=5,mode=0620,ptmxmode=0666"),
    },
    MountPoint {
        source: "tmpfs",
        target: "/dev/shm",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NODEV),
        data: Some("mode=1777"),
    },
    MountPoint {
        source: "tmpfs",
        target: "/run",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NODEV),
        data: Some("mode=0755"),
    },
];

/// Mount every essential filesystem that is not mounted yet
pub fn mount_essential_filesystems() -> Result<(), MountError> {
    let mounted = fs::read_to_string("/proc/mounts").unwrap_or_default();

    for mp in ESSENTIAL_MOUNTS {
        if is_listed(&mounted, mp.target) {
            log::debug!("{} already mounted", mp.target);
            continue;
        }
        mount_one(mp)?;
    }

    log::info!("Essential filesystems mounted");
    Ok(())
}

fn mount_one(mp: &MountPoint) -> Result<(), MountError> {
    let target = Path::new(mp.target);
    if !target.exists() {
        fs::create_dir_all(target).map_err(|e| MountError::CreateDir {
            path: mp.target.to_string(),
            source: e,
        })?;
    }

    mount(Some(mp.source), target, Some(mp.fstype), mp.flags, mp.data).map_err(|e| {
        MountError::Mount {
            target: mp.target.to_string(),
            fstype: mp.fstype.to_string(),
            source: e,
        }
    })?;

    log::info!("Mounted {} on {}", mp.fstype, mp.target);
    Ok(())
}

/// Whether `target` is a mount point in /proc/mounts content
fn is_listed(mounts: &str, target: &str) -> bool {
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mp| mp == target)
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to mount {fstype} on {target}: {source}")]
    Mount {
        target: String,
        fstype: String,
        #[source]
        source: nix::Error,
    },
}
