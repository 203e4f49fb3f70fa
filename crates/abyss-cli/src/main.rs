//! `abyss` – command line entry point for both ends of the link.
//!
//! * `abyss operator` runs the operator station and reads console commands
//!   from stdin (see [`input`]).
//! * `abyss vehicle` runs the vehicle station on stub hardware.
//! * `abyss config [--init]` prints the effective configuration or writes
//!   the defaults to `~/.abyss/config.toml`.
//!
//! Ctrl-C (or `quit` on the operator console) stops the running station.

mod config;
mod input;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::warn;

use abyss_hal::sim::SimRig;
use abyss_middleware::{Topic, TopicReceiver};
use abyss_runtime::{OperatorStation, VehicleStation};
use abyss_types::{ControlMode, EventPayload, ObjectType};

use crate::input::OperatorCommand;

#[derive(Parser)]
#[command(name = "abyss", version)]
#[command(about = "Underwater drone telemetry and control link")]
struct Cli {
    /// Config file (default `~/.abyss/config.toml`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the operator station
    Operator {
        /// Local address for telemetry
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Vehicle command address
        #[arg(long)]
        vehicle: Option<SocketAddr>,
        /// Terrain CSV path
        #[arg(long, conflicts_with = "no_log")]
        terrain_log: Option<PathBuf>,
        /// Keep the terrain map in memory only
        #[arg(long)]
        no_log: bool,
    },
    /// Run the vehicle station on stub hardware
    Vehicle {
        /// Local address for commands
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Operator telemetry address
        #[arg(long)]
        operator: Option<SocketAddr>,
        /// Label attached to every sonar echo
        #[arg(long, default_value = "sand")]
        seabed: ObjectType,
    },
    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let service = match cli.command {
        Command::Operator { .. } => "abyss-operator",
        Command::Vehicle { .. } => "abyss-vehicle",
        Command::Config { .. } => "abyss",
    };
    let _guard = abyss_runtime::init_tracing(service);

    let path = cli.config.unwrap_or_else(config::config_path);
    let cfg = match config::effective(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Config { init, force } => run_config(&cfg, &path, init, force),
        Command::Operator {
            bind,
            vehicle,
            terrain_log,
            no_log,
        } => {
            let mut op = cfg.to_operator_config();
            if let Some(addr) = bind {
                op.bind = addr;
            }
            if let Some(addr) = vehicle {
                op.vehicle_addr = addr;
            }
            if terrain_log.is_some() {
                op.terrain_log = terrain_log;
            }
            if no_log {
                op.terrain_log = None;
            }
            print_banner("operator");
            with_runtime(|shutdown| run_operator(op, shutdown))
        }
        Command::Vehicle {
            bind,
            operator,
            seabed,
        } => {
            let mut veh = cfg.to_vehicle_config();
            if let Some(addr) = bind {
                veh.bind = addr;
            }
            if let Some(addr) = operator {
                veh.operator_addr = addr;
            }
            print_banner("vehicle");
            with_runtime(|shutdown| run_vehicle(veh, seabed, shutdown))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime and shutdown
// ─────────────────────────────────────────────────────────────────────────────

/// Build the Tokio runtime, install the Ctrl-C handler and drive `station`
/// to completion.
fn with_runtime<F, Fut>(station: F) -> Result<(), String>
where
    F: FnOnce(Arc<watch::Sender<bool>>) -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;

    let (tx, _rx) = watch::channel(false);
    let shutdown = Arc::new(tx);
    let on_ctrlc = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        on_ctrlc.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use `quit` or kill the process");
    }

    let result = runtime.block_on(station(shutdown));
    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn run_config(
    cfg: &config::AbyssConfig,
    path: &std::path::Path,
    init: bool,
    force: bool,
) -> Result<(), String> {
    if init {
        if path.exists() && !force {
            return Err(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            ));
        }
        config::save_to(&config::AbyssConfig::default(), path)?;
        println!(
            "  {} Config written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        );
        return Ok(());
    }

    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("defaults ({} not found)", path.display())
    };
    println!("# {}", source.dimmed());
    println!("{}", config::to_toml(cfg)?);
    Ok(())
}

async fn run_vehicle(
    config: abyss_runtime::VehicleConfig,
    seabed: ObjectType,
    shutdown: Arc<watch::Sender<bool>>,
) -> Result<(), String> {
    let hardware = SimRig::new().with_object_type(seabed).build();
    let station = VehicleStation::bind(config, hardware)
        .await
        .map_err(|e| format!("Failed to start vehicle station: {}", e))?;
    let config = station.config();
    println!(
        "  Listening on {}, telemetry to {} every {} ms",
        config.bind.to_string().bold(),
        config.operator_addr.to_string().bold(),
        config.telemetry_period.as_millis()
    );
    println!("  Press {} to stop.\n", "Ctrl-C".bold());

    Arc::new(station).run(shutdown.subscribe()).await;
    println!("{}", "  ✓ Vehicle station stopped.".green());
    Ok(())
}

async fn run_operator(
    config: abyss_runtime::OperatorConfig,
    shutdown: Arc<watch::Sender<bool>>,
) -> Result<(), String> {
    let station = Arc::new(
        OperatorStation::bind(config)
            .await
            .map_err(|e| format!("Failed to start operator station: {}", e))?,
    );
    let config = station.config();
    println!(
        "  Listening on {}, commanding {}",
        config.bind.to_string().bold(),
        config.vehicle_addr.to_string().bold()
    );
    if let Some(log) = &config.terrain_log {
        println!("  Terrain log: {}", log.display().to_string().bold());
    }
    println!("  Type {} for a list of commands.\n", "help".bold().cyan());

    let alerts = tokio::spawn(print_alerts(station.bus().subscribe_to(Topic::SystemAlerts)));
    let runner = tokio::spawn(Arc::clone(&station).run(shutdown.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stop = shutdown.subscribe();
    let mut stdin_open = true;
    while !*stop.borrow() {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(text)) => match input::parse_line(&text) {
                    Ok(Some(OperatorCommand::Quit)) => {
                        shutdown.send_replace(true);
                    }
                    Ok(Some(command)) => execute(&station, command).await,
                    Ok(None) => {}
                    Err(e) => println!("  {} {}", "?".yellow().bold(), e),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "console input unavailable");
                    stdin_open = false;
                }
            },
        }
    }

    if runner.await.is_err() {
        warn!("operator scheduler ended abnormally");
    }
    alerts.abort();
    println!("{}", "  ✓ Operator station stopped.".green());
    Ok(())
}

async fn execute(station: &OperatorStation, command: OperatorCommand) {
    match command {
        OperatorCommand::Manual(preset) => {
            if let Err(e) = station.send_manual(preset).await {
                println!("  {} {}", "✗".red().bold(), e);
            }
        }
        OperatorCommand::Mode(mode) => {
            station.set_mode(mode).await;
            let label = match mode {
                ControlMode::Auto => "auto".green(),
                ControlMode::Manual => "manual".cyan(),
            };
            println!("  Mode: {}", label.bold());
        }
        OperatorCommand::Waypoint(point) => {
            station.add_waypoint(point).await;
            println!(
                "  Waypoint {} added ({:.2}, {:.2}, {:.2})",
                station.waypoints().await.len(),
                point.x,
                point.y,
                point.z
            );
        }
        OperatorCommand::ClearRoute => {
            station.clear_route().await;
            println!("  Route cleared.");
        }
        OperatorCommand::Status => print_status(station).await,
        OperatorCommand::Help => println!("{}", input::HELP),
        OperatorCommand::Quit => {}
    }
}

async fn print_status(station: &OperatorStation) {
    let state = station.state().await;
    let stalled = station.link_health().await;
    let p = state.position;
    println!("  Mode:      {:?}", state.mode);
    println!("  Position:  ({:.2}, {:.2}, {:.2})", p.x, p.y, p.z);
    println!("  Thrusters: {:?}", state.thruster_speeds);
    println!("  Terrain:   {} points", station.terrain_points().await.len());
    let labels: Vec<String> = station
        .terrain_histogram()
        .await
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(t, n)| format!("{t} {n}"))
        .collect();
    if !labels.is_empty() {
        println!("  Seabed:    {}", labels.join(", "));
    }
    match station.last_frame().await {
        Some(frame) => println!("  Last frame: #{}", frame.frame_id),
        None => println!("  Last frame: {}", "none".dimmed()),
    }
    println!("  Waypoints: {}", station.waypoints().await.len());
    if stalled.is_empty() {
        println!("  Link:      {}", "healthy".green());
    } else {
        let names: Vec<&str> = stalled.iter().map(|s| s.as_str()).collect();
        println!("  Link:      {} {}", "stalled".red().bold(), names.join(", "));
    }
}

async fn print_alerts(mut alerts: TopicReceiver) {
    loop {
        match alerts.recv().await {
            Ok(event) => {
                if let EventPayload::LinkFault { component, message } = event.payload {
                    println!("  {} [{}] {}", "⚠".yellow().bold(), component, message);
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(role: &str) {
    println!();
    println!("{}", r#"   ___   __                "#.bold().cyan());
    println!("{}", r#"  / _ | / /  __ _____ ___ "#.bold().cyan());
    println!("{}", r#" / __ |/ _ \/ // (_-<(_-< "#.bold().cyan());
    println!("{}", r#"/_/ |_/_.__/\_, /___/___/ "#.bold().cyan());
    println!("{}", r#"           /___/          "#.bold().cyan());
    println!();
    println!(
        "  {} {} {}",
        "Abyss".bold(),
        role,
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}
