// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Operation model
//!
//! A [`Transaction`] is an ordered list of [`Operation`]s executed as one
//! atomic unit by [`Store::update`](crate::Store::update). Outputs are not
//! written back into the operations; `update` returns one [`OpResult`] per
//! operation, in the same order.

use crate::error::display_bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A (bucket, key, value) triple returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(bucket: &[u8], key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            bucket: bucket.to_vec(),
            key,
            value,
        }
    }
}

/// Kind of work an [`Operation`] performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Create the bucket if it does not exist
    CreateTable,
    /// Drop the bucket and everything in it
    DeleteTable,
    /// Read a key
    Get,
    /// Upsert a key
    Set,
    /// Remove a key
    Delete,
    /// Replace a key's value if it matches `cmp_value`; a mismatch is reported
    /// through [`OpResult::swapped`] and the transaction continues
    CmpAndSwap,
    /// Like `CmpAndSwap`, but a mismatch aborts the whole transaction
    CmpOrRollback,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::CreateTable => "CreateTable",
            Command::DeleteTable => "DeleteTable",
            Command::Get => "Get",
            Command::Set => "Set",
            Command::Delete => "Delete",
            Command::CmpAndSwap => "CmpAndSwap",
            Command::CmpOrRollback => "CmpOrRollback",
        }
    }

    /// True for commands that only touch the bucket, not a key
    pub fn is_table_command(&self) -> bool {
        matches!(self, Command::CreateTable | Command::DeleteTable)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a [`Transaction`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub command: Command,
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    /// New value for `Set` and the CAS commands
    pub value: Vec<u8>,
    /// Expected current value for the CAS commands; `None` expects the key to
    /// be absent
    pub cmp_value: Option<Vec<u8>>,
}

impl Operation {
    fn new(command: Command, bucket: &[u8]) -> Self {
        Self {
            command,
            bucket: bucket.to_vec(),
            key: Vec::new(),
            value: Vec::new(),
            cmp_value: None,
        }
    }

    pub fn create_table(bucket: &[u8]) -> Self {
        Self::new(Command::CreateTable, bucket)
    }

    pub fn delete_table(bucket: &[u8]) -> Self {
        Self::new(Command::DeleteTable, bucket)
    }

    pub fn get(bucket: &[u8], key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            ..Self::new(Command::Get, bucket)
        }
    }

    pub fn set(bucket: &[u8], key: &[u8], value: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: value.to_vec(),
            ..Self::new(Command::Set, bucket)
        }
    }

    pub fn delete(bucket: &[u8], key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            ..Self::new(Command::Delete, bucket)
        }
    }

    pub fn cmp_and_swap(bucket: &[u8], key: &[u8], old: Option<&[u8]>, new: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: new.to_vec(),
            cmp_value: old.map(<[u8]>::to_vec),
            ..Self::new(Command::CmpAndSwap, bucket)
        }
    }

    pub fn cmp_or_rollback(bucket: &[u8], key: &[u8], old: Option<&[u8]>, new: &[u8]) -> Self {
        Self {
            command: Command::CmpOrRollback,
            ..Self::cmp_and_swap(bucket, key, old, new)
        }
    }

    /// `bucket/key` for messages
    pub fn target(&self) -> String {
        if self.command.is_table_command() {
            display_bytes(&self.bucket)
        } else {
            format!("{}/{}", display_bytes(&self.bucket), display_bytes(&self.key))
        }
    }
}

/// Output of one executed [`Operation`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpResult {
    /// Value read by `Get`, or the value stored after a CAS command (the
    /// current value when the swap did not happen)
    pub value: Option<Vec<u8>>,
    /// CAS outcome; always false for non-CAS commands
    pub swapped: bool,
}

impl OpResult {
    /// Result for commands that produce no output
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn read(value: Vec<u8>) -> Self {
        Self {
            value: Some(value),
            swapped: false,
        }
    }

    pub fn swap(value: Option<Vec<u8>>, swapped: bool) -> Self {
        Self { value, swapped }
    }
}

/// An ordered list of operations executed with all-or-nothing semantics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    operations: Vec<Operation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operations(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn push(&mut self, operation: Operation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    pub fn create_table(&mut self, bucket: &[u8]) -> &mut Self {
        self.push(Operation::create_table(bucket))
    }

    pub fn delete_table(&mut self, bucket: &[u8]) -> &mut Self {
        self.push(Operation::delete_table(bucket))
    }

    pub fn get(&mut self, bucket: &[u8], key: &[u8]) -> &mut Self {
        self.push(Operation::get(bucket, key))
    }

    pub fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> &mut Self {
        self.push(Operation::set(bucket, key, value))
    }

    pub fn delete(&mut self, bucket: &[u8], key: &[u8]) -> &mut Self {
        self.push(Operation::delete(bucket, key))
    }

    pub fn cmp_and_swap(
        &mut self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> &mut Self {
        self.push(Operation::cmp_and_swap(bucket, key, old, new))
    }

    pub fn cmp_or_rollback(
        &mut self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> &mut Self {
        self.push(Operation::cmp_or_rollback(bucket, key, old, new))
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    /// First operation whose command is in `unsupported`, with its position
    pub(crate) fn find_command(&self, unsupported: &[Command]) -> Option<(usize, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .find(|(_, op)| unsupported.contains(&op.command))
    }
}

impl<'a> IntoIterator for &'a Transaction {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

impl FromIterator<Operation> for Transaction {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_preserves_order() {
        let mut tx = Transaction::new();
        tx.create_table(b"users")
            .set(b"users", b"alice", b"1")
            .cmp_and_swap(b"users", b"alice", Some(b"1"), b"2")
            .get(b"users", b"alice");

        let commands: Vec<Command> = tx.iter().map(|op| op.command).collect();
        assert_eq!(
            commands,
            vec![
                Command::CreateTable,
                Command::Set,
                Command::CmpAndSwap,
                Command::Get
            ]
        );
        assert_eq!(tx.operations()[2].cmp_value.as_deref(), Some(&b"1"[..]));
        assert_eq!(tx.operations()[2].value, b"2".to_vec());
    }

    #[test]
    fn test_cmp_or_rollback_keeps_cas_fields() {
        let op = Operation::cmp_or_rollback(b"b", b"k", None, b"v");
        assert_eq!(op.command, Command::CmpOrRollback);
        assert_eq!(op.cmp_value, None);
        assert_eq!(op.value, b"v".to_vec());
    }

    #[test]
    fn test_target_formatting() {
        assert_eq!(Operation::get(b"users", b"alice").target(), "users/alice");
        assert_eq!(Operation::delete_table(b"users").target(), "users");
    }

    #[test]
    fn test_find_command() {
        let tx: Transaction = vec![
            Operation::set(b"b", b"k", b"v"),
            Operation::create_table(b"c"),
        ]
        .into_iter()
        .collect();
        let (index, op) = tx
            .find_command(&[Command::CreateTable, Command::DeleteTable])
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(op.bucket, b"c".to_vec());
        assert!(tx.find_command(&[Command::CmpOrRollback]).is_none());
    }
}
