//! Signals the daemon reacts to
//!
//! - SIGTERM/SIGINT: stop all services and exit
//! - SIGCHLD: reap exited unit processes right away
//! - SIGHUP: log a state dump

use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    Child,
    Term,
    Int,
    Hup,
}

impl DaemonSignal {
    /// Whether this signal ends the daemon
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Term | Self::Int)
    }
}

pub struct SignalHandler {
    sigchld: Signal,
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl SignalHandler {
    /// Install the handlers. Requires a running tokio runtime.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigchld: signal(SignalKind::child())?,
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal
    pub async fn recv(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigchld.recv() => DaemonSignal::Child,
            _ = self.sigterm.recv() => DaemonSignal::Term,
            _ = self.sigint.recv() => DaemonSignal::Int,
            _ = self.sighup.recv() => DaemonSignal::Hup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signals() {
        assert!(DaemonSignal::Term.is_shutdown());
        assert!(DaemonSignal::Int.is_shutdown());
        assert!(!DaemonSignal::Hup.is_shutdown());
        assert!(!DaemonSignal::Child.is_shutdown());
    }

    #[tokio::test]
    async fn test_handler_installs() {
        assert!(SignalHandler::new().is_ok());
    }
}
