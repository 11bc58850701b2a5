//! Mixpilot CLI - offline analysis and curve preview
//!
//! Command-line front end for the Mixpilot engine.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use mixpilot::cli::commands;
use mixpilot::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    info!("Mixpilot v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref()).context("loading configuration")?;

    let Some(command) = cli.command else {
        println!("Mixpilot v{}", env!("CARGO_PKG_VERSION"));
        println!("Use --help for available commands");
        return Ok(());
    };

    match command {
        Commands::Levels { path } => commands::levels(&config, &path, cli.json)
            .with_context(|| format!("metering {}", path.display()))?,
        Commands::Spectrum {
            path,
            fft_size,
            window,
            top,
        } => commands::spectrum(&config, &path, fft_size, window, top, cli.json)
            .with_context(|| format!("analyzing {}", path.display()))?,
        Commands::Curve {
            kind,
            min,
            max,
            steps,
            cycles,
            step_size,
            seed,
        } => commands::curve(&config, kind, min, max, steps, cycles, step_size, seed, cli.json)?,
        Commands::Feedback {
            path,
            sensitivity,
            threshold,
        } => commands::feedback(&config, &path, sensitivity, threshold, cli.json)
            .with_context(|| format!("scanning {}", path.display()))?,
        Commands::Config { file } => commands::show_config(&config, file.as_deref())?,
    }

    Ok(())
}
