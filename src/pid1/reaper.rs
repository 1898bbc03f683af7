//! Zombie reaping for PID 1
//!
//! Processes whose parent dies are reparented to PID 1 and stay zombies
//! until it waits for them. Children unitd spawned itself are collected by
//! their owners (the supervisor or a hook), so the sweep only peeks at each
//! zombie and leaves tracked PIDs alone.

use nix::errno::Errno;
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};

use crate::manager::tracked_children;

/// Reap every orphaned zombie that is ready (non-blocking)
///
/// Stops at the first zombie that belongs to a tracked child; its owner
/// collects it and the next sweep carries on. Returns the number reaped.
pub fn reap_orphans() -> usize {
    let tracked = tracked_children();
    let peek = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    let mut count = 0;

    loop {
        let pid = match waitid(Id::All, peek) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => match status.pid() {
                Some(pid) => pid,
                None => break,
            },
            Err(Errno::ECHILD) => break,
            Err(e) => {
                log::error!("waitid error: {}", e);
                break;
            }
        };

        if tracked.contains(&pid.as_raw()) {
            break;
        }

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                log::debug!("Reaped orphan PID {} (exited {})", pid, code);
                count += 1;
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                log::debug!("Reaped orphan PID {} (killed by {})", pid, sig);
                count += 1;
            }
            Ok(_) => break,
            Err(e) => {
                log::error!("waitpid {} error: {}", pid, e);
                break;
            }
        }
    }

    count
}
