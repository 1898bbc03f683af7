//! unitd - service supervisor daemon
//!
//! Loads unit files, brings enabled units up in priority order and listens
//! on /run/unitd.sock for commands from unitctl.
//!
//! When running as PID 1:
//! - Mounts essential filesystems
//! - Reaps orphaned zombies alongside supervised children
//! - Powers off after stopping all services on SIGTERM/SIGINT

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use peercred_ipc::{CallerInfo, Connection, Server};
use tokio::sync::Mutex;

use unitd::manager::{Manager, ManagerConfig, ManagerError, RegistryLimits};
use unitd::pid1::{self, DaemonSignal, SignalHandler};
use unitd::protocol::{BootSummary, DepInfo, Request, Response, UnitInfo, SOCKET_PATH};
use unitd::units;

#[derive(Parser)]
#[command(name = "unitd")]
#[command(about = "Service supervisor with dependency-ordered startup")]
struct Args {
    /// Directory holding .service and .package files
    #[arg(long, default_value = "/etc/unitd")]
    unit_dir: PathBuf,

    /// Control socket path
    #[arg(long, default_value = SOCKET_PATH)]
    socket: String,

    /// Maximum number of registered units
    #[arg(long)]
    max_units: Option<usize>,

    /// Timeout for command hooks, in seconds
    #[arg(long, default_value_t = 30)]
    hook_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL on stop, in seconds
    #[arg(long, default_value_t = 10)]
    stop_timeout_secs: u64,

    /// Don't start enabled units at startup
    #[arg(long)]
    no_boot: bool,
}

impl Args {
    fn manager_config(&self) -> ManagerConfig {
        let defaults = RegistryLimits::default();
        ManagerConfig {
            limits: RegistryLimits {
                max_units: self.max_units.unwrap_or(defaults.max_units),
                ..defaults
            },
            hook_timeout: Duration::from_secs(self.hook_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }
}

type SharedManager = Arc<Mutex<Manager>>;

const REAP_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let is_pid1 = pid1::is_pid1();
    if is_pid1 {
        if let Err(e) = pid1::init() {
            // Keep going, some mounts may have worked
            log::error!("PID 1 initialization failed: {}", e);
        }
    }

    let mut manager = Manager::with_config(args.manager_config());
    load_units(&mut manager, &args.unit_dir).await;
    let manager: SharedManager = Arc::new(Mutex::new(manager));

    let mut signals = SignalHandler::new()?;

    // A socket left behind by a previous run blocks bind()
    if Path::new(&args.socket).exists() {
        std::fs::remove_file(&args.socket)?;
    }
    let server = Server::bind(&args.socket)?;
    info!("unitd listening on {}", args.socket);

    if !args.no_boot {
        let manager_boot = Arc::clone(&manager);
        tokio::spawn(async move {
            let report = manager_boot.lock().await.start_enabled().await;
            info!(
                "Boot complete: {} up, {} failed, {} skipped",
                report.succeeded.len(),
                report.failed.len(),
                report.skipped.len()
            );
        });
    }

    let manager_reap = Arc::clone(&manager);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            manager_reap.lock().await.reap();
        }
    });

    // Orphans need no manager state, so they are swept even while a long
    // operation holds the lock
    if is_pid1 {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                interval.tick().await;
                reap_orphans();
            }
        });
    }

    loop {
        tokio::select! {
            accepted = server.accept() => match accepted {
                Ok((conn, caller)) => {
                    tokio::spawn(handle_connection(conn, caller, Arc::clone(&manager)));
                }
                Err(e) => log::error!("accept error: {}", e),
            },
            sig = signals.recv() => match sig {
                DaemonSignal::Child => {
                    if is_pid1 {
                        reap_orphans();
                    }
                    manager.lock().await.reap();
                }
                DaemonSignal::Hup => dump_state(&manager).await,
                DaemonSignal::Term | DaemonSignal::Int => {
                    info!("Received {:?}, stopping all services", sig);
                    break;
                }
            },
        }
    }

    let report = manager.lock().await.stop_all().await;
    if !report.is_success() {
        log::warn!("Some services failed to stop: {}", report.failed_names().join(", "));
    }
    let _ = std::fs::remove_file(&args.socket);

    if is_pid1 {
        let e = pid1::power_off();
        log::error!("{}", e);
        // PID 1 must not exit
        std::future::pending::<()>().await;
    }
    Ok(())
}

/// Register units from `dir`, falling back to the built-in set when none load
async fn load_units(manager: &mut Manager, dir: &Path) {
    match manager.load_dir(dir).await {
        Ok(0) => info!("No units in {}, using built-in units", dir.display()),
        Ok(count) => {
            info!("Loaded {} units from {}", count, dir.display());
            return;
        }
        Err(e) => log::warn!("Failed to load {}: {}, using built-in units", dir.display(), e),
    }

    for desc in units::builtin_units() {
        let name = desc.name.clone();
        if let Err(e) = manager.register(desc) {
            log::warn!("Failed to register built-in {}: {}", name, e);
        }
    }
}

fn reap_orphans() {
    let count = pid1::reap_orphans();
    if count > 0 {
        log::debug!("Reaped {} orphaned processes", count);
    }
}

async fn dump_state(manager: &SharedManager) {
    info!("Received SIGHUP, dumping state");
    let mgr = manager.lock().await;
    for unit in mgr.registry().all() {
        match unit.process() {
            Some(process) => info!("  {}: {} ({})", unit.name(), unit.state().as_str(), process),
            None => info!("  {}: {}", unit.name(), unit.state().as_str()),
        }
    }
}

async fn handle_connection(mut conn: Connection, caller: CallerInfo, manager: SharedManager) {
    log::debug!(
        "connection from uid={} pid={} exe={:?}",
        caller.uid, caller.pid, caller.exe
    );

    let request: Request = match conn.read().await {
        Ok(r) => r,
        Err(e) => {
            log::error!("read error: {}", e);
            let _ = conn.write(&Response::Error("invalid request".into())).await;
            return;
        }
    };
    log::debug!("request: {:?}", request);

    let response = handle_request(request, &manager).await;
    if let Err(e) = conn.write(&response).await {
        log::error!("write error: {}", e);
    }
}

fn reply(result: Result<(), ManagerError>) -> Response {
    match result {
        Ok(()) => Response::Ok,
        Err(e) => Response::Error(e.to_string()),
    }
}

fn not_found(name: &str) -> Response {
    Response::Error(ManagerError::UnitNotFound(name.to_string()).to_string())
}

async fn handle_request(request: Request, manager: &SharedManager) -> Response {
    let mut mgr = manager.lock().await;
    match request {
        Request::Ping => Response::Pong,

        Request::List => Response::Units(mgr.registry().all().map(UnitInfo::from_unit).collect()),

        Request::Status { name } => match mgr.get_unit(&name) {
            Some(unit) => Response::Status(UnitInfo::from_unit(unit)),
            None => not_found(&name),
        },

        Request::Deps { name } => match mgr.get_unit(&name) {
            Some(unit) => Response::Deps(DepInfo::for_unit(unit, mgr.registry())),
            None => not_found(&name),
        },

        Request::Start { name } => reply(mgr.start(&name).await),
        Request::Stop { name } => reply(mgr.stop(&name).await),
        Request::Restart { name } => reply(mgr.restart(&name).await),
        Request::Reload { name } => reply(mgr.reload(&name).await),
        Request::Install { name } => reply(mgr.install(&name).await),
        Request::Remove { name } => reply(mgr.remove(&name).await),

        Request::Boot => {
            let report = mgr.start_enabled().await;
            Response::Boot(BootSummary::from(&report))
        }
    }
}
