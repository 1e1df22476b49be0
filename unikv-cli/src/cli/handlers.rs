// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers for UniKV

use clap::Parser;
use colored::Colorize;
use rustyline::{error::ReadlineError, CompletionType, Config, EditMode, Editor};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use unikv::{Command, Operation, Store, StoreError, StoreOptions, Transaction};

use super::commands::{ConnectionArgs, OutputFormat, ShellLine, StoreCommand};
use super::output::{CommandOutput, ResultFormatter};

/// Open the store selected on the command line
pub fn open_store(args: &ConnectionArgs) -> Result<Box<dyn Store>, Box<dyn std::error::Error>> {
    let options = match &args.config {
        Some(path) => StoreOptions::from_file(path)?,
        None => StoreOptions::default(),
    };
    log::debug!("Opening {} store at {}", args.driver, args.dsn);
    Ok(unikv::open(&args.driver, &args.dsn, &options)?)
}

/// Run one store command
pub fn execute(store: &dyn Store, command: &StoreCommand) -> Result<CommandOutput, StoreError> {
    match command {
        StoreCommand::CreateTable { bucket } => {
            store.create_table(bucket.as_bytes())?;
            Ok(CommandOutput::message(format!("Bucket {} created", bucket)))
        }
        StoreCommand::DeleteTable { bucket } => {
            store.delete_table(bucket.as_bytes())?;
            Ok(CommandOutput::message(format!("Bucket {} deleted", bucket)))
        }
        StoreCommand::Get { bucket, key } => {
            let value = store.get(bucket.as_bytes(), key.as_bytes())?;
            Ok(CommandOutput::value(bucket, key, &value))
        }
        StoreCommand::Set { bucket, key, value } => {
            store.set(bucket.as_bytes(), key.as_bytes(), value.as_bytes())?;
            Ok(CommandOutput::message(format!("{}/{} set", bucket, key)))
        }
        StoreCommand::Del { bucket, key } => {
            store.del(bucket.as_bytes(), key.as_bytes())?;
            Ok(CommandOutput::message(format!("{}/{} deleted", bucket, key)))
        }
        StoreCommand::List { bucket } => {
            let entries = store.list(bucket.as_bytes())?;
            Ok(CommandOutput::entries(&entries))
        }
        StoreCommand::Cas {
            bucket,
            key,
            value,
            expect,
            absent: _,
        } => {
            let outcome = store.cmp_and_swap(
                bucket.as_bytes(),
                key.as_bytes(),
                expect.as_deref().map(str::as_bytes),
                value.as_bytes(),
            )?;
            Ok(CommandOutput::swap(bucket, key, &outcome))
        }
    }
}

/// Handle a one-shot store command
pub fn handle_command(
    args: &ConnectionArgs,
    command: StoreCommand,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(args)?;
    let result = execute(store.as_ref(), &command);
    store.close()?;

    match result {
        Ok(output) => {
            println!("{}", ResultFormatter::format(&output, format));
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format!("Error: {}", e).red());
            Err(e.into())
        }
    }
}

/// One entry of a batch file
///
/// ```json
/// [
///   {"command": "CreateTable", "bucket": "users"},
///   {"command": "Set", "bucket": "users", "key": "alice", "value": "1"},
///   {"command": "CmpAndSwap", "bucket": "users", "key": "alice", "expect": "1", "value": "2"}
/// ]
/// ```
///
/// A CAS entry without `expect` expects the key to be absent.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchOperation {
    command: Command,
    bucket: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    expect: Option<String>,
}

impl From<BatchOperation> for Operation {
    fn from(op: BatchOperation) -> Self {
        let (bucket, key, value) = (op.bucket.as_bytes(), op.key.as_bytes(), op.value.as_bytes());
        let expect = op.expect.as_deref().map(str::as_bytes);
        match op.command {
            Command::CreateTable => Operation::create_table(bucket),
            Command::DeleteTable => Operation::delete_table(bucket),
            Command::Get => Operation::get(bucket, key),
            Command::Set => Operation::set(bucket, key, value),
            Command::Delete => Operation::delete(bucket, key),
            Command::CmpAndSwap => Operation::cmp_and_swap(bucket, key, expect, value),
            Command::CmpOrRollback => Operation::cmp_or_rollback(bucket, key, expect, value),
        }
    }
}

/// Parse a batch document into a transaction
pub fn parse_batch(json: &str) -> Result<Transaction, serde_json::Error> {
    let operations: Vec<BatchOperation> = serde_json::from_str(json)?;
    Ok(operations.into_iter().map(Operation::from).collect())
}

/// Handle the batch command
pub fn handle_batch(
    args: &ConnectionArgs,
    file: PathBuf,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(&file)
        .map_err(|e| format!("Failed to read batch file {:?}: {}", file, e))?;
    let tx = parse_batch(&json).map_err(|e| format!("Invalid batch file {:?}: {}", file, e))?;

    let store = open_store(args)?;
    let result = store.update(&tx);
    store.close()?;

    match result {
        Ok(results) => {
            let output = CommandOutput::batch(&tx, &results);
            println!("{}", ResultFormatter::format(&output, format));
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format!("Transaction rolled back: {}", e).red());
            Err(e.into())
        }
    }
}

/// Handle the shell (REPL) command
pub fn handle_shell(
    args: &ConnectionArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(args)?;

    println!("{}", "UniKV".bold().green());
    println!(
        "{}",
        format!("Connected to {} at {}", store.driver(), args.dsn).cyan()
    );
    println!("Type 'help' for commands, 'exit' or 'quit' to exit\n");

    let config = Config::builder()
        .edit_mode(EditMode::Emacs)
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .auto_add_history(false)
        .build();

    let mut rl = Editor::<(), _>::with_config(config)?;

    let history_path = ".unikv/history.txt";
    if let Some(parent) = Path::new(&history_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = rl.load_history(&history_path);

    let prompt = format!("{}> ", store.driver().to_string().cyan());
    loop {
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".green());
                break;
            }
            Err(err) => {
                eprintln!("{}", format!("Error: {:?}", err).red());
                break;
            }
        };

        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "exit" | "quit" => {
                println!("{}", "Goodbye!".green());
                break;
            }
            "help" => {
                print_help();
                continue;
            }
            "" => continue,
            _ => {}
        }
        rl.add_history_entry(trimmed)?;

        let words = match split_words(trimmed) {
            Ok(words) => words,
            Err(e) => {
                eprintln!("{}", format!("Error: {}", e).red());
                continue;
            }
        };
        let command = match ShellLine::try_parse_from(words) {
            Ok(line) => line.command,
            Err(e) => {
                eprintln!("{}", e.to_string().trim_end().red());
                continue;
            }
        };

        match execute(store.as_ref(), &command) {
            Ok(output) => println!("{}", ResultFormatter::format(&output, format)),
            Err(e) => eprintln!("{}", format!("Error: {}", e).red()),
        }
    }

    let _ = rl.save_history(&history_path);
    store.close()?;
    Ok(())
}

/// Split a shell line into words; double quotes group words and `\"` is a
/// literal quote
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err("dangling escape at end of line".to_string()),
            },
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Print help message
fn print_help() {
    println!("{}", "Available commands:".bold().green());
    println!("  {}  - Create a bucket", "create-table <bucket>".cyan());
    println!("  {}  - Drop a bucket", "delete-table <bucket>".cyan());
    println!("  {}  - Read a key", "get <bucket> <key>".cyan());
    println!("  {}  - Write a key", "set <bucket> <key> <value>".cyan());
    println!("  {}  - Remove a key", "del <bucket> <key>".cyan());
    println!("  {}  - List a bucket", "list <bucket>".cyan());
    println!(
        "  {}  - Compare and swap",
        "cas <bucket> <key> <value> (--expect <old> | --absent)".cyan()
    );
    println!("  {}  - Show this help message", "help".cyan());
    println!("  {}  - Exit the shell", "exit/quit".cyan());
    println!("\n{}", "Examples:".bold().green());
    println!("  {}", "set users alice \"Alice Smith\"".yellow());
    println!("  {}", "cas users counter 2 --expect 1".yellow());
}
