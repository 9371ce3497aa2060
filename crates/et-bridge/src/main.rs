// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ET bridge CLI
//!
//! # Usage
//!
//! ```bash
//! # Bridge a station of one served system into another
//! et-bridge --from daq1:11111 --to daq2:11111 --station bridge
//!
//! # Swap 32-bit payload words that arrive in foreign byte order
//! et-bridge --from daq1:11111 --to daq2:11111 --station bridge --swap
//!
//! # Using configuration file
//! et-bridge --config bridge.toml
//! ```

use clap::{Parser, Subcommand};
use et_bridge::{
    BridgeConfig, BridgeError, BridgeService, BridgeStatsSnapshot, ConfigError, EndpointConfig,
    ServiceConfig, SwapKind, Wait,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// ET bridge
#[derive(Parser, Debug)]
#[command(name = "et-bridge")]
#[command(about = "ET bridge - moves events between two ET systems")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source system address (host:port)
    #[arg(long, conflicts_with = "config")]
    from: Option<String>,

    /// Destination system address (host:port)
    #[arg(long, conflicts_with = "config")]
    to: Option<String>,

    /// Source station to drain (created when missing)
    #[arg(short, long, conflicts_with = "config")]
    station: Option<String>,

    /// Destination station to produce from (GrandCentral when unset)
    #[arg(long, conflicts_with = "config")]
    to_station: Option<String>,

    /// Events per bridge call
    #[arg(short, long, default_value = "1000")]
    batch: usize,

    /// Events per source get
    #[arg(long, default_value = "100")]
    chunk_from: usize,

    /// Events per destination request
    #[arg(long, default_value = "100")]
    chunk_to: usize,

    /// Swap 32-bit payload words of events in foreign byte order
    #[arg(long)]
    swap: bool,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "10")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    let stats_interval = config.stats_interval_secs;

    println!("ET bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!(
        "{} [{}] -> {} [{}]",
        config.from.address,
        config.from.station.as_deref().unwrap_or("-"),
        config.to.address,
        config.to.station.as_deref().unwrap_or("GRAND_CENTRAL")
    );
    println!();

    let service = tokio::task::spawn_blocking(move || BridgeService::connect(config)).await??;
    let service = Arc::new(service);
    let handle = service.handle();

    let runner = {
        let service = Arc::clone(&service);
        tokio::task::spawn_blocking(move || service.run())
    };

    if stats_interval > 0 {
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                print_stats(&stats_handle.stats());
            }
        });
    }

    println!("Press Ctrl+C to stop...");
    println!();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("\nShutting down...");
            handle.stop();
        }
        _ = wait_stopped(handle.clone()) => {}
    }

    let moved = runner.await?;
    println!("\nFinal Statistics:");
    print_stats(&handle.stats());

    if let Ok(service) = Arc::try_unwrap(service) {
        tokio::task::spawn_blocking(move || service.shutdown()).await?;
    }

    moved?;
    Ok(())
}

async fn wait_stopped(handle: et_bridge::ServiceHandle) {
    while handle.is_running() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn build_config(args: &Args) -> Result<ServiceConfig, BridgeError> {
    if let Some(ref config_path) = args.config {
        return ServiceConfig::from_file(config_path).map_err(BridgeError::Config);
    }

    let from = args.from.as_deref().ok_or_else(|| {
        BridgeError::Config(ConfigError::Invalid("Missing --from (or use --config)".into()))
    })?;
    let to = args.to.as_deref().ok_or_else(|| {
        BridgeError::Config(ConfigError::Invalid("Missing --to (or use --config)".into()))
    })?;

    let mut config = ServiceConfig::new(from, to);
    config.from.station = args.station.clone();
    config.to.station = args.to_station.clone();
    config.batch = args.batch;
    config.transfer.chunk_from = args.chunk_from;
    config.transfer.chunk_to = args.chunk_to;
    if args.swap {
        config.transfer.swap = Some(SwapKind::Words32);
    }
    config.stats_interval_secs = args.stats_interval;
    config.log_level = args.log_level.clone();

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig {
        name: "example-bridge".into(),
        from: EndpointConfig {
            address: "daq1:11111".into(),
            station: Some("bridge".into()),
        },
        to: EndpointConfig {
            address: "daq2:11111".into(),
            station: None,
        },
        batch: 1000,
        transfer: BridgeConfig {
            mode_from: Wait::Timed,
            timeout_from_ms: 1000,
            mode_to: Wait::Sleep,
            timeout_to_ms: 0,
            chunk_from: 100,
            chunk_to: 50,
            swap: Some(SwapKind::Words32),
            swap_fn: None,
        },
        stats_interval_secs: 10,
        log_level: "info".into(),
    };

    let toml = toml::to_string_pretty(&config)?;
    let content = format!(
        "# ET bridge configuration\n\
         # Generated by et-bridge gen-config\n\n{}",
        toml
    );

    std::fs::write(&output, content)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match ServiceConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge: {}", config.name);
            println!(
                "  {} [{}] -> {} [{}]",
                config.from.address,
                config.from.station.as_deref().unwrap_or("-"),
                config.to.address,
                config.to.station.as_deref().unwrap_or("GRAND_CENTRAL")
            );
            println!(
                "  batch {}, chunks {}/{}, swap {}",
                config.batch,
                config.transfer.chunk_from,
                config.transfer.chunk_to,
                if config.transfer.swap.is_some() {
                    "on"
                } else {
                    "off"
                }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stat: &BridgeStatsSnapshot) {
    println!("--- Bridge Statistics ---");
    println!(
        "  {} events ({:.1} ev/s), {} ({}/s), {} calls, {} idle, {} errors",
        stat.events,
        stat.events_per_second(),
        format_bytes(stat.bytes),
        format_bytes(stat.bytes_per_second() as u64),
        stat.calls,
        stat.idle,
        stat.errors
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
