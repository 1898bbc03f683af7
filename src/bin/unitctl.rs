//! unitctl - CLI for unitd
//!
//! Talks to the daemon over /run/unitd.sock.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use peercred_ipc::Client;

use unitd::protocol::{Request, Response, SOCKET_PATH};
use unitd::units::UnitDescriptor;

#[derive(Parser)]
#[command(name = "unitctl")]
#[command(about = "Control the unitd service supervisor")]
struct Args {
    /// Daemon socket path
    #[arg(long, global = true, default_value = SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered units
    List,

    /// Show unit status
    Status { name: String },

    /// Start a service and its dependencies
    Start { name: String },

    /// Stop a service
    Stop { name: String },

    /// Restart a service
    Restart { name: String },

    /// Run a service's reload hook
    Reload { name: String },

    /// Install a package and its dependencies
    Install { name: String },

    /// Remove a package
    Remove { name: String },

    /// Show unit dependencies
    Deps { name: String },

    /// Start every enabled unit
    Boot,

    /// Parse a unit file locally (doesn't require daemon)
    Parse {
        /// Path to the unit file
        path: PathBuf,
    },

    /// Ping the daemon
    Ping,
}

fn main() {
    let args = Args::parse();

    let request = match args.command {
        Command::Parse { path } => {
            parse_local(&path);
            return;
        }
        Command::List => Request::List,
        Command::Status { name } => Request::Status { name },
        Command::Start { name } => Request::Start { name },
        Command::Stop { name } => Request::Stop { name },
        Command::Restart { name } => Request::Restart { name },
        Command::Reload { name } => Request::Reload { name },
        Command::Install { name } => Request::Install { name },
        Command::Remove { name } => Request::Remove { name },
        Command::Deps { name } => Request::Deps { name },
        Command::Boot => Request::Boot,
        Command::Ping => Request::Ping,
    };

    match Client::call(&args.socket, &request) {
        Ok(response) => {
            let code = exit_code(&response);
            print_response(response);
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("unitctl: cannot reach daemon at {}: {}", args.socket, e);
            eprintln!("  start with: sudo unitd");
            std::process::exit(1);
        }
    }
}

/// 1 for errors and for a boot where any unit failed
fn exit_code(response: &Response) -> i32 {
    match response {
        Response::Error(_) => 1,
        Response::Boot(summary) if !summary.failed.is_empty() => 1,
        _ => 0,
    }
}

fn print_response(response: Response) {
    match response {
        Response::Ok => {}
        Response::Pong => println!("pong"),
        Response::Error(msg) => eprintln!("error: {}", msg),
        Response::Units(units) => {
            if units.is_empty() {
                println!("No units loaded");
                return;
            }
            println!("{:<32} {:>8} {:>14} {:>6}", "UNIT", "KIND", "STATE", "PRIO");
            for unit in units {
                println!(
                    "{:<32} {:>8} {:>14} {:>6}",
                    unit.name, unit.kind, unit.state, unit.priority
                );
            }
        }
        Response::Status(unit) => {
            println!("● {}", unit.name);
            if let Some(desc) = unit.description {
                println!("     Desc: {}", desc);
            }
            println!("     Kind: {}", unit.kind);
            println!("    State: {} since {}", unit.state, unit.since);
            println!("  Enabled: {}", if unit.enabled { "yes" } else { "no" });
            if let Some(version) = unit.version {
                println!("  Version: {}", version);
            }
            if let Some(pid) = unit.pid {
                println!("      PID: {}", pid);
            }
            if let Some(code) = unit.exit_code {
                println!("     Exit: {}", code);
            }
            if let Some(error) = unit.error {
                println!("    Error: {}", error);
            }
            if let Some(status) = unit.status {
                println!("   Status: {}", status);
            }
        }
        Response::Deps(deps) => {
            if deps.is_empty() {
                println!("No dependencies");
            }
            for dep in deps {
                let kind = if dep.required { "requires" } else { "wants" };
                let state = dep.state.as_deref().unwrap_or("not registered");
                println!("  {} {} ({})", kind, dep.name, state);
            }
        }
        Response::Boot(summary) => {
            for name in &summary.succeeded {
                println!("  → {}", name);
            }
            for (name, error) in &summary.failed {
                println!("  ✗ {}: {}", name, error);
            }
            if !summary.skipped.is_empty() {
                println!("Skipped (disabled): {}", summary.skipped.join(", "));
            }
        }
    }
}

fn print_descriptor(desc: &UnitDescriptor) {
    println!("Name: {}", desc.name);
    println!("Kind: {}", desc.kind);
    if let Some(description) = &desc.description {
        println!("Description: {}", description);
    }
    println!("Priority: {}", desc.priority);
    println!("Enabled: {}", desc.enabled);
    if let Some(exec) = &desc.exec {
        println!("Exec: {}", exec);
    }
    if let Some(version) = &desc.version {
        println!("Version: {}", version);
    }
    if let Some(path) = &desc.install_path {
        println!("InstallPath: {}", path.display());
    }
    let names = |required: bool| -> Vec<&str> {
        desc.dependencies
            .iter()
            .filter(|d| d.required == required)
            .map(|d| d.name.as_str())
            .collect()
    };
    let requires = names(true);
    if !requires.is_empty() {
        println!("Requires: {}", requires.join(", "));
    }
    let wants = names(false);
    if !wants.is_empty() {
        println!("Wants: {}", wants.join(", "));
    }
}

fn parse_local(path: &Path) {
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| e.to_string())
        .and_then(|rt| {
            rt.block_on(unitd::units::load_unit(path))
                .map_err(|e| e.to_string())
        });

    match result {
        Ok(desc) => print_descriptor(&desc),
        Err(e) => {
            eprintln!("Failed to parse: {}", e);
            std::process::exit(1);
        }
    }
}
