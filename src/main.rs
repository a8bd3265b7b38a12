//! JalaIO daemon
//!
//! ```text
//! jala-io surface [--config <path>]   operator station: listens on all channels
//! jala-io vehicle [--config <path>]   robot: dials the surface, drives hardware
//! ```
//!
//! The config path defaults to `jala.toml`; without it the built-in defaults
//! (loopback, simulated devices) are used.

use jala_io::config::AppConfig;
use jala_io::nodes::surface::{self, SurfaceDevices};
use jala_io::nodes::vehicle::{self, VehicleDevices};
use jala_io::nodes::{NodeRole, Workers};
use jala_io::{Error, Result, Shutdown};
use std::env;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "jala.toml";

/// How often the main thread checks on its workers
const SUPERVISE_POLL: Duration = Duration::from_millis(200);

const USAGE: &str = "usage: jala-io <surface|vehicle> [--config <path>]";

/// Parse the node role (first positional argument)
fn parse_role(args: &[String]) -> Result<NodeRole> {
    match args.get(1) {
        Some(arg) if !arg.starts_with('-') => arg.parse(),
        _ => Err(Error::Config(USAGE.to_string())),
    }
}

/// Parse config path from `--config <path>` or `-c <path>`
fn parse_config_path(args: &[String]) -> String {
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    DEFAULT_CONFIG.to_string()
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let role = parse_role(&args)?;
    let config_path = parse_config_path(&args);

    // Load before the logger exists; the level comes from the file
    let found = Path::new(&config_path).exists();
    let config = if found {
        AppConfig::load(&config_path)?
    } else {
        AppConfig::default()
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("JalaIO v{} starting as {}", env!("CARGO_PKG_VERSION"), role);
    if found {
        log::info!("Using config: {}", config_path);
    } else {
        log::warn!("{} not found, using defaults", config_path);
    }

    let shutdown = Shutdown::new();
    let s = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        s.trigger();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let workers: Workers = match role {
        NodeRole::Surface => {
            surface::spawn(&config, SurfaceDevices::simulated(&config), shutdown)?.workers
        }
        NodeRole::Vehicle => {
            vehicle::spawn(&config, VehicleDevices::simulated(&config), shutdown)?.workers
        }
    };
    log::info!("{} workers running. Press Ctrl-C to stop.", workers.len());

    workers.supervise(SUPERVISE_POLL);

    log::info!("Shutting down...");
    let failed = workers.join();
    if failed > 0 {
        return Err(Error::Other(format!("{} worker(s) failed", failed)));
    }
    log::info!("JalaIO stopped");
    Ok(())
}
