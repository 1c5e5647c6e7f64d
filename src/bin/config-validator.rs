//! # Saga Engine Configuration Validator
//!
//! Command-line tool that loads an engine configuration the same way the library does
//! (defaults, optional file, `SAGA__*` environment overrides) and reports whether it is valid.

use clap::{Parser, Subcommand};
use saga_core::config::{ConfigManager, EngineConfig};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate saga engine configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults and environment only when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate, printing a short summary
    Validate,

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|manager| match cli.command {
        Some(Commands::Show) => show(manager.config()),
        Some(Commands::Validate) | None => {
            summarize(&manager);
            Ok(())
        }
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("❌ {e}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>, Box<dyn std::error::Error>> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::load_from_file(path)?,
        None => ConfigManager::load()?,
    };
    Ok(manager)
}

fn summarize(manager: &ConfigManager) {
    let config = manager.config();
    println!("🔧 Saga Engine Configuration");
    match manager.source_file() {
        Some(path) => println!("Source: {}", path.display()),
        None => println!("Source: defaults + environment"),
    }
    println!();
    println!(
        "  scheduler.max_concurrent_actions  {}",
        config.scheduler.max_concurrent_actions
    );
    println!(
        "  scheduler.max_queue_size          {}",
        match config.scheduler.queue_capacity() {
            Some(capacity) => capacity.to_string(),
            None => "unbounded".to_string(),
        }
    );
    println!(
        "  scheduler.tick_interval_ms        {}",
        config.scheduler.tick_interval_ms
    );
    println!(
        "  saga.action_timeout_ms            {}",
        config.saga.action_timeout_ms
    );
    println!(
        "  saga.step_timeout_ms              {}",
        config.saga.step_timeout_ms
    );
    println!(
        "  retry.max_retry_attempts          {}",
        config.retry.max_retry_attempts
    );
    println!(
        "  retry.base_delay_ms               {}",
        config.retry.base_delay_ms
    );
    println!();
    println!("✅ Configuration is valid");
}

fn show(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
