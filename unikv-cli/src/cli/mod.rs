// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for UniKV
//!
//! Provides one-shot store commands, atomic batch execution from a JSON file,
//! and an interactive shell, all against any compiled-in driver.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{handle_batch, handle_command, handle_shell};
