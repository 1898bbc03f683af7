//! Running as init
//!
//! Filesystem preparation done once before any unit starts, orphan
//! reaping, and the final power-off when PID 1 is told to shut down.

mod env;
mod mount;
mod reaper;
mod signals;

pub use env::missing_defaults;
pub use mount::{mount_essential_filesystems, MountError};
pub use reaper::reap_orphans;
pub use signals::{DaemonSignal, SignalHandler};

use std::process;

use nix::sys::reboot::{reboot, RebootMode};
use nix::unistd::sync;

pub fn is_pid1() -> bool {
    process::id() == 1
}

/// Mount pseudo-filesystems. Does nothing unless we are PID 1.
///
/// Default PATH, HOME, SHELL and TERM are given to each spawned child
/// instead of being exported here, since the runtime threads already exist.
pub fn init() -> Result<(), Pid1Error> {
    if !is_pid1() {
        log::debug!("Not PID 1 (pid={}), skipping init setup", process::id());
        return Ok(());
    }

    log::info!("Running as PID 1, preparing environment");
    mount_essential_filesystems()?;
    Ok(())
}

/// Sync disks and power off. PID 1 must never return from main.
pub fn power_off() -> Pid1Error {
    log::info!("Syncing filesystems");
    sync();
    match reboot(RebootMode::RB_POWER_OFF) {
        Ok(never) => match never {},
        Err(e) => Pid1Error::PowerOff(e),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Pid1Error {
    #[error("Mount failed: {0}")]
    Mount(#[from] MountError),

    #[error("Power off failed: {0}")]
    PowerOff(#[source] nix::Error),
}
