// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Result formatting for CLI output

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use unikv::{CasOutcome, Entry, OpResult, Transaction};

use super::commands::OutputFormat;

/// Tabular result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
    /// Status line for commands that return no rows
    pub message: Option<String>,
}

impl CommandOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn value(bucket: &str, key: &str, value: &[u8]) -> Self {
        Self {
            columns: vec!["bucket", "key", "value"],
            rows: vec![vec![bucket.to_string(), key.to_string(), text(value)]],
            message: None,
        }
    }

    pub fn entries(entries: &[Entry]) -> Self {
        Self {
            columns: vec!["bucket", "key", "value"],
            rows: entries
                .iter()
                .map(|e| vec![text(&e.bucket), text(&e.key), text(&e.value)])
                .collect(),
            message: None,
        }
    }

    pub fn swap(bucket: &str, key: &str, outcome: &CasOutcome) -> Self {
        Self {
            columns: vec!["bucket", "key", "value", "swapped"],
            rows: vec![vec![
                bucket.to_string(),
                key.to_string(),
                optional_text(outcome.value.as_deref()),
                outcome.swapped.to_string(),
            ]],
            message: None,
        }
    }

    /// One row per operation, next to its result
    pub fn batch(tx: &Transaction, results: &[OpResult]) -> Self {
        Self {
            columns: vec!["#", "command", "bucket", "key", "value", "swapped"],
            rows: tx
                .iter()
                .zip(results)
                .enumerate()
                .map(|(i, (op, result))| {
                    vec![
                        i.to_string(),
                        op.command.to_string(),
                        text(&op.bucket),
                        text(&op.key),
                        optional_text(result.value.as_deref()),
                        result.swapped.to_string(),
                    ]
                })
                .collect(),
            message: None,
        }
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn optional_text(bytes: Option<&[u8]>) -> String {
    bytes.map(text).unwrap_or_default()
}

/// Result formatter for different output formats
pub struct ResultFormatter;

impl ResultFormatter {
    /// Format command output in the specified format
    pub fn format(output: &CommandOutput, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(output),
            OutputFormat::Json => Self::format_json(output),
            OutputFormat::Csv => Self::format_csv(output),
        }
    }

    /// Format results as a table using comfy-table
    fn format_table(output: &CommandOutput) -> String {
        if let Some(msg) = &output.message {
            return format!("{}", format!("✅ {}", msg).green());
        }

        if output.rows.is_empty() {
            return format!("{}", "No entries found".yellow());
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(
            output
                .columns
                .iter()
                .map(|col| Cell::new(col).fg(Color::Green))
                .collect::<Vec<_>>(),
        );
        for row in &output.rows {
            table.add_row(row.clone());
        }

        format!("{}\nRows: {}", table, output.rows.len())
    }

    /// Format results as JSON
    fn format_json(output: &CommandOutput) -> String {
        let mut json_obj = serde_json::json!({
            "status": "success",
            "columns": output.columns,
            "rows": output.rows.iter().map(|row| {
                let row_map: serde_json::Map<String, serde_json::Value> = output
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, value)| (col.to_string(), serde_json::Value::String(value.clone())))
                    .collect();
                serde_json::Value::Object(row_map)
            }).collect::<Vec<_>>(),
        });

        if let (Some(msg), serde_json::Value::Object(map)) = (&output.message, &mut json_obj) {
            map.insert("message".to_string(), serde_json::json!(msg));
        }

        serde_json::to_string_pretty(&json_obj).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize results to JSON\"}".to_string()
        })
    }

    /// Format results as CSV
    fn format_csv(output: &CommandOutput) -> String {
        if let Some(msg) = &output.message {
            return format!("# {}", msg);
        }

        let mut lines = vec![output.columns.join(",")];
        for row in &output.rows {
            lines.push(
                row.iter()
                    .map(|v| Self::csv_field(v))
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        lines.join("\n")
    }

    /// Quote a CSV field when it contains a separator, quote or newline
    fn csv_field(value: &str) -> String {
        if value.contains(',') || value.contains('"') || value.contains('\n') {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_escapes_fields() {
        let output = CommandOutput::value("users", "alice", b"a,\"b\"");
        assert_eq!(
            ResultFormatter::format(&output, OutputFormat::Csv),
            "bucket,key,value\nusers,alice,\"a,\"\"b\"\"\""
        );
    }

    #[test]
    fn test_json_rows_are_objects() {
        let output = CommandOutput::swap(
            "users",
            "alice",
            &CasOutcome {
                value: None,
                swapped: false,
            },
        );
        let json: serde_json::Value =
            serde_json::from_str(&ResultFormatter::format(&output, OutputFormat::Json)).unwrap();
        assert_eq!(json["rows"][0]["value"], "");
        assert_eq!(json["rows"][0]["swapped"], "false");
    }

    #[test]
    fn test_batch_rows_follow_operations() {
        let mut tx = Transaction::new();
        tx.set(b"b", b"k", b"v").get(b"b", b"k");
        let results = vec![OpResult::empty(), OpResult::read(b"v".to_vec())];

        let output = CommandOutput::batch(&tx, &results);
        assert_eq!(output.rows.len(), 2);
        assert_eq!(output.rows[1], vec!["1", "Get", "b", "k", "v", "false"]);
    }
}
