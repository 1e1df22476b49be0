// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! UniKV CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments first to get log level
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        // Default to Warn
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "UniKV".bold().green(), unikv::VERSION);
            println!("One key-value interface over many storage engines");
            Ok(())
        }

        Commands::Drivers => {
            for driver in unikv::DriverRegistry::with_defaults().drivers() {
                println!("{}", driver);
            }
            Ok(())
        }

        Commands::Batch { file } => cli::handle_batch(&cli.connection, file, cli.format),

        Commands::Shell => cli::handle_shell(&cli.connection, cli.format),

        Commands::Store(command) => cli::handle_command(&cli.connection, command, cli.format),
    }
}
