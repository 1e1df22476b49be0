// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line definitions for the UniKV CLI

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// UniKV - one key-value interface over many storage engines
#[derive(Parser, Debug)]
#[command(name = "unikv", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<log::Level>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which store to open
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Storage driver (sled, redb, sqlite, postgresql, mysql, memory)
    #[arg(short, long, global = true, default_value = "sled")]
    pub driver: String,

    /// Data source: a path for embedded drivers, a connection string for
    /// postgresql or a mysql:// URL
    #[arg(long, global = true, default_value = "./unikv-data")]
    pub dsn: String,

    /// JSON file with store options
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// List the drivers compiled into this build
    Drivers,

    /// Run a JSON array of operations as one atomic transaction
    Batch {
        /// Path to the batch file
        file: PathBuf,
    },

    /// Start an interactive shell
    Shell,

    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that operate on an open store; also the shell's vocabulary
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Create a bucket (no-op if it exists)
    CreateTable { bucket: String },

    /// Drop a bucket and all of its keys
    DeleteTable { bucket: String },

    /// Read a key
    Get { bucket: String, key: String },

    /// Write a key
    Set {
        bucket: String,
        key: String,
        value: String,
    },

    /// Remove a key
    Del { bucket: String, key: String },

    /// List every entry in a bucket
    List { bucket: String },

    /// Replace a key's value only if it currently holds the expected value
    Cas {
        bucket: String,
        key: String,
        /// New value
        value: String,
        /// Expected current value
        #[arg(long, conflicts_with = "absent", required_unless_present = "absent")]
        expect: Option<String>,
        /// Expect the key to be absent
        #[arg(long)]
        absent: bool,
    },
}

/// Output format for command results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

/// One line typed into the shell
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: StoreCommand,
}
